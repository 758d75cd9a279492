use feedreader_tester::{
    FeedDescriptor, FeedField, FeedRegistry, FeedServer, FeedViolation, Harness,
};
use proptest::collection::vec;
use proptest::prelude::*;
use proptest::test_runner::{FileFailurePersistence, TestCaseResult};

const REGISTRY_PROPTEST_REGRESSION_FILE: &str =
    "tests/proptest-regressions/registry_property_fuzz_test.txt";
const DEFAULT_REGISTRY_PROPTEST_CASES: u32 = 256;

fn registry_proptest_cases() -> u32 {
    std::env::var("FEEDREADER_TESTER_PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_REGISTRY_PROPTEST_CASES)
}

fn field_strategy(filled: &'static str) -> BoxedStrategy<String> {
    prop_oneof![
        3 => Just(filled.to_string()),
        1 => Just(String::new()),
    ]
    .boxed()
}

fn descriptor_strategy() -> BoxedStrategy<FeedDescriptor> {
    (
        field_strategy("http://feeds.example.com/generated"),
        field_strategy("Generated Feed"),
    )
        .prop_map(|(url, name)| FeedDescriptor::new(url, name))
        .boxed()
}

fn registry_strategy() -> BoxedStrategy<FeedRegistry> {
    vec(descriptor_strategy(), 0..=8)
        .prop_map(FeedRegistry::new)
        .boxed()
}

fn assert_validation_matches_model(registry: &FeedRegistry) -> TestCaseResult {
    let violations = registry.validate();

    let mut expected = Vec::new();
    if registry.is_empty() {
        expected.push(FeedViolation::EmptyRegistry);
    }
    for (index, feed) in registry.iter().enumerate() {
        if feed.url.is_empty() {
            expected.push(FeedViolation::EmptyField {
                index,
                field: FeedField::Url,
            });
        }
        if feed.name.is_empty() {
            expected.push(FeedViolation::EmptyField {
                index,
                field: FeedField::Name,
            });
        }
    }

    prop_assert_eq!(&violations, &expected);

    // A clean registry must be accepted by the page; a dirty one rejected
    // with the same violation list the validator reports.
    let server = FeedServer::with_sample_entries(registry);
    match Harness::feed_reader(registry.clone(), server) {
        Ok(_) => prop_assert!(violations.is_empty()),
        Err(feedreader_tester::Error::InvalidRegistry(reported)) => {
            prop_assert_eq!(&reported, &violations);
        }
        Err(other) => prop_assert!(false, "unexpected construction error: {other:?}"),
    }

    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: registry_proptest_cases(),
        failure_persistence: Some(Box::new(
            FileFailurePersistence::Direct(REGISTRY_PROPTEST_REGRESSION_FILE),
        )),
        .. ProptestConfig::default()
    })]

    #[test]
    fn registry_validation_reports_exactly_the_empty_fields(registry in registry_strategy()) {
        assert_validation_matches_model(&registry)?;
    }
}
