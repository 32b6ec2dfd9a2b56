//! Conformance client for the IoT Hub MQTT credential-management flow.
//!
//! Publishes an `issueCertificate` request on
//! `$iothub/credentials/POST/issueCertificate/?$rid=<id>`, waits for the
//! asynchronous answer on `$iothub/credentials/res/#` and validates the
//! status code carried in the response topic.
//!
//! ## Architecture
//!
//! - [`scenario`] declares what a run publishes and how the response is judged.
//! - [`transport`] wraps the MQTT/TLS connection behind the [`Transport`] trait
//!   and reports network activity through a single [`EventHandler`].
//! - [`correlator`] is that handler: a state machine that drives
//!   subscribe → publish → await response and hands the [`RunOutcome`] to the
//!   waiting caller exactly once.
//! - [`controller`] runs one scenario end to end, including the
//!   disconnect/reconnect sequence, with a hard deadline on every wait.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use credcheck::auth::Authentication;
//! use credcheck::config::HubEndpoint;
//! use credcheck::controller::{RunController, RunOptions};
//! use credcheck::scenario::{build_scenario, ScenarioContext};
//! use credcheck::transport::MqttTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let endpoint = HubEndpoint::new("my-hub.azure-devices.net", "device-001");
//!     let auth = Authentication::certificate(
//!         "IoTHubRootCA.crt.pem",
//!         "certs/device-001.crt",
//!         "private/device-001.key",
//!     );
//!     let credentials = auth.resolve(&endpoint)?;
//!
//!     let scenario = build_scenario("happy_path", &ScenarioContext::new("device-001"))?;
//!     let transport = MqttTransport::new(&endpoint, credentials);
//!     let outcome = RunController::new(transport, RunOptions::default())
//!         .run(scenario)
//!         .await;
//!
//!     println!("{}", outcome.message);
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod auth;
pub mod config;
pub mod controller;
pub mod correlator;
pub mod csr;
pub mod error;
pub mod harness;
pub mod outcome;
pub mod report;
pub mod sas;
pub mod scenario;
pub mod topic;
pub mod transport;

pub use controller::{RunController, RunOptions};
pub use correlator::{ConnectionState, Correlator};
pub use error::{CredcheckError, Result};
pub use outcome::{FailureKind, ResponseEnvelope, ResponseSnapshot, RunOutcome};
pub use scenario::{Scenario, ScenarioContext, Validation};
pub use transport::{EventHandler, Session, Transport};
