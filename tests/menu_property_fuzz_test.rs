use feedreader_tester::{FeedDescriptor, FeedRegistry, FeedServer, Harness};
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{FileFailurePersistence, TestCaseResult};

const MENU_PROPTEST_REGRESSION_FILE: &str =
    "tests/proptest-regressions/menu_property_fuzz_test.txt";
const DEFAULT_MENU_PROPTEST_CASES: u32 = 128;

fn menu_proptest_cases() -> u32 {
    std::env::var("FEEDREADER_TESTER_PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_MENU_PROPTEST_CASES)
}

#[derive(Clone, Debug)]
enum MenuAction {
    ClickIcon,
    ClickFeedLink(usize),
}

fn menu_action_strategy(feed_count: usize) -> BoxedStrategy<MenuAction> {
    prop_oneof![
        3 => Just(MenuAction::ClickIcon),
        2 => (0..feed_count).prop_map(MenuAction::ClickFeedLink),
    ]
    .boxed()
}

fn menu_action_sequence_strategy(feed_count: usize) -> BoxedStrategy<Vec<MenuAction>> {
    vec(menu_action_strategy(feed_count), 0..=32).boxed()
}

fn fuzz_registry() -> FeedRegistry {
    FeedRegistry::new(vec![
        FeedDescriptor::new("http://feeds.example.com/alpha", "Alpha"),
        FeedDescriptor::new("http://feeds.example.com/beta", "Beta"),
        FeedDescriptor::new("http://feeds.example.com/gamma", "Gamma"),
    ])
}

fn assert_menu_state_tracks_model(actions: &[MenuAction]) -> TestCaseResult {
    let registry = fuzz_registry();
    let feed_count = registry.len();
    let server = FeedServer::with_sample_entries(&registry);
    let mut harness = Harness::feed_reader(registry, server)
        .map_err(|err| proptest::test_runner::TestCaseError::fail(format!("{err:?}")))?;

    // Model: the menu starts hidden, the icon flips it, picking a feed
    // always re-hides it and schedules exactly one load.
    let mut hidden = true;
    let mut scheduled = 0usize;

    for (step, action) in actions.iter().enumerate() {
        let outcome = match action {
            MenuAction::ClickIcon => {
                hidden = !hidden;
                harness.click(".menu-icon-link")
            }
            MenuAction::ClickFeedLink(index) => {
                let index = index % feed_count;
                hidden = true;
                scheduled += 1;
                harness.click_nth(".feed-list li > a", index)
            }
        };

        prop_assert!(
            outcome.is_ok(),
            "action failed at step {step}: {action:?}, error={:?}",
            outcome.err()
        );

        let is_hidden = harness.assert_has_class("body", "menu-hidden").is_ok();
        prop_assert_eq!(
            is_hidden,
            hidden,
            "menu state diverged at step {}: {:?}, actions={:?}",
            step,
            action,
            actions
        );
        prop_assert_eq!(harness.pending_timers().len(), scheduled);
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: menu_proptest_cases(),
        failure_persistence: Some(Box::new(
            FileFailurePersistence::Direct(MENU_PROPTEST_REGRESSION_FILE),
        )),
        .. ProptestConfig::default()
    })]

    #[test]
    fn menu_visibility_matches_the_toggle_model(actions in menu_action_sequence_strategy(3)) {
        assert_menu_state_tracks_model(&actions)?;
    }
}
