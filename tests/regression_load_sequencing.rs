use feedreader_tester::{FeedDescriptor, FeedEntry, FeedRegistry, FeedServer, Harness, Result};

fn registry() -> FeedRegistry {
    FeedRegistry::new(vec![
        FeedDescriptor::new("http://feeds.example.com/fast", "Fast Feed"),
        FeedDescriptor::new("http://feeds.example.com/slow", "Slow Feed"),
    ])
}

fn staggered_server() -> FeedServer {
    let mut server = FeedServer::new();
    server.add_feed(
        "http://feeds.example.com/fast",
        5,
        vec![
            FeedEntry::new("Fast one", "http://feeds.example.com/fast/1", "first"),
            FeedEntry::new("Fast two", "http://feeds.example.com/fast/2", "second"),
        ],
    );
    server.add_feed(
        "http://feeds.example.com/slow",
        50,
        vec![FeedEntry::new(
            "Slow one",
            "http://feeds.example.com/slow/1",
            "only",
        )],
    );
    server
}

fn harness() -> Result<Harness> {
    Harness::feed_reader(registry(), staggered_server())
}

#[test]
fn reloading_the_same_feed_yields_an_identical_snapshot() -> Result<()> {
    let mut h = harness()?;

    let first = h.load_feed(0)?;
    h.await_load(first)?;
    let before = h.feed_snapshot();

    let again = h.load_feed(0)?;
    h.await_load(again)?;
    assert_eq!(h.feed_snapshot(), before);
    Ok(())
}

#[test]
fn distinct_feeds_yield_distinct_snapshots() -> Result<()> {
    let mut h = harness()?;

    let fast = h.load_feed(0)?;
    h.await_load(fast)?;
    let fast_content = h.feed_snapshot();

    let slow = h.load_feed(1)?;
    h.await_load(slow)?;
    assert_ne!(h.feed_snapshot(), fast_content);
    h.assert_feed_changed(&fast_content)?;
    Ok(())
}

#[test]
fn snapshot_is_captured_between_the_two_loads_not_after() -> Result<()> {
    let mut h = harness()?;

    // Mirror of the new-feed-selection sequence: the capture happens
    // strictly after the first completion and before the second request.
    let first = h.load_feed(0)?;
    h.await_load(first)?;
    let captured = h.feed_snapshot();
    assert!(h.pending_timers().is_empty());

    let second = h.load_feed(1)?;
    assert_eq!(h.pending_timers().len(), 1);
    h.await_load(second)?;

    h.assert_feed_changed(&captured)?;
    h.assert_text(".header-title", "Slow Feed")?;
    Ok(())
}

#[test]
fn slower_load_issued_first_still_renders_last() -> Result<()> {
    let mut h = harness()?;

    let slow = h.load_feed(1)?;
    let fast = h.load_feed(0)?;
    h.flush()?;

    assert!(h.is_load_complete(slow));
    assert!(h.is_load_complete(fast));
    // The slow feed's completion lands at t=50, after the fast one at t=5.
    h.assert_text(".header-title", "Slow Feed")?;
    assert_eq!(h.now_ms(), 50);
    Ok(())
}

#[test]
fn detached_reset_restores_the_first_feed_baseline() -> Result<()> {
    let mut h = harness()?;

    let first = h.load_feed(0)?;
    h.await_load(first)?;
    let baseline = h.feed_snapshot();

    let second = h.load_feed(1)?;
    h.await_load(second)?;
    h.assert_feed_changed(&baseline)?;

    h.load_feed_detached(0)?;
    h.flush()?;
    assert_eq!(h.feed_snapshot(), baseline);
    h.assert_text(".header-title", "Fast Feed")?;
    Ok(())
}

#[test]
fn await_load_is_idempotent_once_complete() -> Result<()> {
    let mut h = harness()?;

    let handle = h.load_feed(0)?;
    h.await_load(handle)?;
    let now = h.now_ms();

    h.await_load(handle)?;
    assert_eq!(h.now_ms(), now);
    Ok(())
}

#[test]
fn feed_links_load_their_own_feed_index() -> Result<()> {
    let mut h = harness()?;

    h.click(".menu-icon-link")?;
    h.click_nth(".feed-list li > a", 1)?;
    h.flush()?;

    h.assert_text(".header-title", "Slow Feed")?;
    h.assert_entry_count_at_least(1)?;
    assert_eq!(h.count_within(".feed", ".entry")?, 1);
    Ok(())
}

#[test]
fn empty_fixture_renders_no_entries_but_still_completes() -> Result<()> {
    let registry = FeedRegistry::new(vec![FeedDescriptor::new(
        "http://feeds.example.com/empty",
        "Empty Feed",
    )]);
    let mut server = FeedServer::new();
    server.add_feed("http://feeds.example.com/empty", 5, Vec::new());
    let mut h = Harness::feed_reader(registry, server)?;

    let handle = h.load_feed(0)?;
    h.await_load(handle)?;
    assert_eq!(h.count_within(".feed", ".entry")?, 0);
    assert_eq!(h.feed_snapshot().as_str(), "");
    h.assert_text(".header-title", "Empty Feed")?;
    Ok(())
}
