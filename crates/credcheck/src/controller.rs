//! Runs one scenario end to end against a [`Transport`].

use crate::config::{RidPolicy, DEFAULT_TIMEOUT};
use crate::correlator::Correlator;
use crate::outcome::{FailureKind, RunOutcome};
use crate::scenario::Scenario;
use crate::transport::Transport;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Bound on every wait: initial response, disconnection, post-reconnect response.
    pub timeout: Duration,
    pub rid_policy: RidPolicy,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            rid_policy: RidPolicy::default(),
        }
    }
}

impl RunOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_rid_policy(mut self, rid_policy: RidPolicy) -> Self {
        self.rid_policy = rid_policy;
        self
    }
}

pub struct RunController<T: Transport> {
    transport: T,
    options: RunOptions,
}

/// Disconnects on drop unless disarmed, so an abandoned run never leaves a
/// session open.
struct StopGuard<'a, T: Transport> {
    transport: &'a T,
    armed: bool,
}

impl<T: Transport> StopGuard<'_, T> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<T: Transport> Drop for StopGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Run abandoned, disconnecting transport");
            self.transport.disconnect();
        }
    }
}

impl<T: Transport> RunController<T> {
    #[must_use]
    pub fn new(transport: T, options: RunOptions) -> Self {
        Self { transport, options }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn run(&self, scenario: Box<dyn Scenario>) -> RunOutcome {
        self.run_until(scenario, std::future::pending()).await
    }

    /// Runs `scenario`, giving up with an interrupted outcome as soon as
    /// `shutdown` resolves.
    pub async fn run_until<F>(&self, scenario: Box<dyn Scenario>, shutdown: F) -> RunOutcome
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let scenario: Arc<dyn Scenario> = Arc::from(scenario);
        let (correlator, completion) = Correlator::new(Arc::clone(&scenario), self.options.rid_policy);
        let correlator = Arc::new(correlator);
        self.transport.set_handler(correlator.clone());

        info!(
            scenario = scenario.name(),
            rid = scenario.correlation_id(),
            timeout = ?self.options.timeout,
            "Starting run"
        );

        let mut guard = StopGuard {
            transport: &self.transport,
            armed: true,
        };

        let outcome = tokio::select! {
            outcome = self.drive(scenario.as_ref(), &correlator, completion) => outcome,
            () = shutdown => {
                warn!("✗ Interrupted by user");
                self.transport.disconnect();
                RunOutcome::failed(
                    scenario.name(),
                    scenario.correlation_id(),
                    FailureKind::Interrupted,
                    "✗ Interrupted by user",
                )
            }
        };

        self.transport.shutdown().await;
        guard.disarm();

        outcome.with_elapsed(started.elapsed())
    }

    async fn drive(
        &self,
        scenario: &dyn Scenario,
        correlator: &Correlator,
        mut completion: oneshot::Receiver<RunOutcome>,
    ) -> RunOutcome {
        let mut state = correlator.subscribe_state();
        correlator.start(&self.transport);

        if scenario.disconnect_after_publish() {
            info!("Waiting for disconnect after publish...");
            let waited = tokio::time::timeout(self.options.timeout, async {
                tokio::select! {
                    biased;
                    outcome = &mut completion => Some(outcome),
                    _ = state.wait_for(|snapshot| snapshot.disconnects > 0) => None,
                }
            })
            .await;

            match waited {
                Err(_) => return self.timed_out(scenario),
                Ok(Some(outcome)) => return self.received(scenario, outcome),
                Ok(None) => {}
            }
            if let Ok(outcome) = completion.try_recv() {
                return outcome;
            }

            let delay = scenario.reconnect_delay();
            info!(delay = ?delay, "✓ Client disconnected as expected, waiting before reconnecting");
            tokio::time::sleep(delay).await;

            info!("Reconnecting to check for pending response");
            correlator.resume(&self.transport);
        }

        match tokio::time::timeout(self.options.timeout, &mut completion).await {
            Ok(outcome) => self.received(scenario, outcome),
            Err(_) => self.timed_out(scenario),
        }
    }

    fn received(
        &self,
        scenario: &dyn Scenario,
        outcome: Result<RunOutcome, oneshot::error::RecvError>,
    ) -> RunOutcome {
        outcome.unwrap_or_else(|_| {
            self.transport.disconnect();
            RunOutcome::failed(
                scenario.name(),
                scenario.correlation_id(),
                FailureKind::Connection,
                "✗ Run ended without an outcome",
            )
        })
    }

    fn timed_out(&self, scenario: &dyn Scenario) -> RunOutcome {
        let message = format!(
            "✗ Timeout: No response received after {}",
            humantime::format_duration(self.options.timeout)
        );
        warn!("{message}");
        self.transport.disconnect();
        RunOutcome::failed(
            scenario.name(),
            scenario.correlation_id(),
            FailureKind::Timeout,
            message,
        )
    }
}
