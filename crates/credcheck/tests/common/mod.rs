#![allow(unused_imports, dead_code)]

pub use credcheck::harness::{
    unique_device_id, MockCall, MockHub, MockHubConfig, MockResponse, ResponseRid,
};

use credcheck::config::RidPolicy;
use credcheck::scenario::{build_scenario, Scenario, ScenarioContext};
use credcheck::{RunController, RunOptions};
use std::time::Duration;

pub const RID: u32 = 999_888_777;
pub const RESPONSE_FILTER: &str = "$iothub/credentials/res/#";

pub fn scenario(name: &str, device: &str) -> Box<dyn Scenario> {
    let ctx = ScenarioContext::new(device)
        .with_correlation_id(RID)
        .with_reconnect_delay(Duration::from_millis(50));
    build_scenario(name, &ctx).expect("registered scenario")
}

pub fn controller(hub: MockHub, timeout: Duration) -> RunController<MockHub> {
    RunController::new(hub, RunOptions::default().with_timeout(timeout))
}

pub fn lenient_controller(hub: MockHub, timeout: Duration) -> RunController<MockHub> {
    RunController::new(
        hub,
        RunOptions::default()
            .with_timeout(timeout)
            .with_rid_policy(RidPolicy::Lenient),
    )
}

pub fn request_topic() -> String {
    format!("$iothub/credentials/POST/issueCertificate/?$rid={RID}")
}
