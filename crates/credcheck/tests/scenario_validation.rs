use credcheck::scenario::{build_scenario, scenario_names, Scenario, ScenarioContext, MOCK_CSR};
use credcheck::topic::response_topic;

fn scenarios() -> Vec<Box<dyn Scenario>> {
    let ctx = ScenarioContext::new("device-001").with_correlation_id(12_345);
    scenario_names()
        .into_iter()
        .map(|name| build_scenario(name, &ctx).expect("registered scenario"))
        .collect()
}

#[test]
fn accepted_status_passes_for_every_scenario() {
    for scenario in scenarios() {
        let topic = response_topic("202", "12345", 1);
        let validation = scenario.validate_response(&topic, b"");
        assert!(validation.success, "{}: {}", scenario.name(), validation.message);
        assert!(validation.message.starts_with("✓ SUCCESS"));
        assert!(validation.message.contains("202"));
    }
}

#[test]
fn other_status_fails_naming_the_code() {
    for code in ["200", "400", "401", "404", "429", "500", "2020", "abc", ""] {
        for scenario in scenarios() {
            let topic = format!("$iothub/credentials/res/{code}/?$rid=12345");
            let validation = scenario.validate_response(&topic, b"{}");
            assert!(!validation.success, "{} accepted {code:?}", scenario.name());
            assert_eq!(
                validation.message,
                format!("✗ FAILURE: Expected status code 202, got {code}")
            );
        }
    }
}

#[test]
fn short_topics_fail_without_panicking() {
    for topic in ["", "$iothub", "$iothub/credentials", "$iothub/credentials/res"] {
        for scenario in scenarios() {
            let validation = scenario.validate_response(topic, &[0xff, 0x00]);
            assert!(!validation.success);
            assert_eq!(
                validation.message,
                "✗ FAILURE: Could not parse status code from topic"
            );
        }
    }
}

#[test]
fn status_is_positional_not_searched() {
    let scenario = &scenarios()[0];
    let validation =
        scenario.validate_response("$iothub/credentials/res/400/202/?$rid=12345", b"");
    assert!(!validation.success);

    let validation = scenario.validate_response("a/b/c/202/d/e", b"");
    assert!(validation.success);
}

#[test]
fn request_is_identical_across_scenarios() {
    let all = scenarios();
    for scenario in &all {
        assert_eq!(
            scenario.publish_topic(),
            "$iothub/credentials/POST/issueCertificate/?$rid=12345"
        );
        assert_eq!(scenario.subscribe_filter(), "$iothub/credentials/res/#");
        let payload: serde_json::Value = serde_json::from_slice(scenario.payload()).unwrap();
        assert_eq!(payload["id"], "device-001");
        assert_eq!(payload["csr"], MOCK_CSR);
    }
}

#[test]
fn custom_csr_is_carried_in_payload() {
    let ctx = ScenarioContext::new("dev").with_csr("QUJD");
    let scenario = build_scenario("happy_path", &ctx).unwrap();
    let payload: serde_json::Value = serde_json::from_slice(scenario.payload()).unwrap();
    assert_eq!(payload["csr"], "QUJD");
}

#[test]
fn correlation_ids_differ_between_runs() {
    let ctx = ScenarioContext::new("dev");
    let ids: std::collections::HashSet<u32> = (0..50)
        .map(|_| build_scenario("happy_path", &ctx).unwrap().correlation_id())
        .collect();
    assert!(ids.len() > 1);
    assert!(ids.iter().all(|id| (1..=99_999_999).contains(id)));
}
