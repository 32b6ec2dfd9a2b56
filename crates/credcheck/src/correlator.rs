//! The event handler driving one run: subscribe → publish → await response.
//!
//! Transport callbacks advance a [`ConnectionState`] machine. The first
//! validated response is handed to the waiting caller through a one-shot
//! channel; anything after that is ignored. State changes are mirrored on a
//! watch channel with a running disconnect count, so a waiter can observe a
//! mid-run disconnection without confusing it with the initial state.

use crate::config::RidPolicy;
use crate::error::CredcheckError;
use crate::outcome::{FailureKind, ResponseEnvelope, RunOutcome};
use crate::scenario::Scenario;
use crate::topic;
use crate::transport::{
    ConnAckInfo, DisconnectReason, EventHandler, Session, SubscribeGrant, Transport,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    PublishPending,
    PublishAcked,
    AwaitingResponse,
    ResponseReceived,
    Disconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Subscribed => "subscribed",
            Self::PublishPending => "publish-pending",
            Self::PublishAcked => "publish-acked",
            Self::AwaitingResponse => "awaiting-response",
            Self::ResponseReceived => "response-received",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}

/// Current state plus the number of disconnections seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    pub state: ConnectionState,
    pub disconnects: u32,
}

#[derive(Debug, Default)]
struct RunState {
    state: ConnectionState,
    request_published: bool,
    /// Set once the client reconnects after the deliberate disconnect.
    resumed: bool,
    disconnect_requested: bool,
    disconnects: u32,
}

pub struct Correlator {
    scenario: Arc<dyn Scenario>,
    rid_policy: RidPolicy,
    expected_rid: String,
    run: Mutex<RunState>,
    state_tx: watch::Sender<StateSnapshot>,
    completion: Mutex<Option<oneshot::Sender<RunOutcome>>>,
    completed: AtomicBool,
}

impl Correlator {
    #[must_use]
    pub fn new(
        scenario: Arc<dyn Scenario>,
        rid_policy: RidPolicy,
    ) -> (Self, oneshot::Receiver<RunOutcome>) {
        let (tx, rx) = oneshot::channel();
        let (state_tx, _) = watch::channel(StateSnapshot::default());
        let expected_rid = scenario.correlation_id().to_string();
        let correlator = Self {
            scenario,
            rid_policy,
            expected_rid,
            run: Mutex::new(RunState::default()),
            state_tx,
            completion: Mutex::new(Some(tx)),
            completed: AtomicBool::new(false),
        };
        (correlator, rx)
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<StateSnapshot> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.run.lock().state
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Opens the first session.
    pub fn start<T: Transport + ?Sized>(&self, transport: &T) {
        self.transition(ConnectionState::Connecting);
        self.connect(transport);
    }

    /// Opens a session after the deliberate disconnect. The request is not
    /// published again; the new session only resubscribes.
    pub fn resume<T: Transport + ?Sized>(&self, transport: &T) {
        {
            let mut run = self.run.lock();
            run.resumed = true;
            run.disconnect_requested = false;
        }
        self.transition(ConnectionState::Connecting);
        self.connect(transport);
    }

    fn connect<T: Transport + ?Sized>(&self, transport: &T) {
        if let Err(e) = transport.connect() {
            error!(error = %e, "✗ Failed to start connection");
            self.transition(ConnectionState::Disconnected);
            self.fail(FailureKind::Connection, format!("✗ {e}"));
        }
    }

    /// Hands `outcome` to the waiter. Only the first call has any effect.
    pub fn complete(&self, outcome: RunOutcome) -> bool {
        let Some(tx) = self.completion.lock().take() else {
            return false;
        };
        self.completed.store(true, Ordering::Release);
        if tx.send(outcome).is_err() {
            debug!("Run outcome produced after the waiter left");
        }
        true
    }

    pub fn fail(&self, kind: FailureKind, message: impl Into<String>) -> bool {
        self.complete(RunOutcome::failed(
            self.scenario.name(),
            self.scenario.correlation_id(),
            kind,
            message,
        ))
    }

    fn transition(&self, next: ConnectionState) {
        let mut run = self.run.lock();
        self.set_state(&mut run, next);
    }

    fn set_state(&self, run: &mut RunState, next: ConnectionState) {
        if run.state != next {
            debug!(from = %run.state, to = %next, "State transition");
        }
        run.state = next;
        self.state_tx.send_replace(StateSnapshot {
            state: next,
            disconnects: run.disconnects,
        });
    }

    fn request_disconnect(&self, session: &dyn Session) {
        {
            let mut run = self.run.lock();
            run.disconnect_requested = true;
            self.set_state(&mut run, ConnectionState::Disconnecting);
        }
        if let Err(e) = session.disconnect() {
            error!(error = %e, "✗ Disconnect request failed");
        }
    }

    fn accepts(&self, message: &ResponseEnvelope) -> bool {
        if !topic::topic_matches_filter(&message.topic, self.scenario.subscribe_filter()) {
            debug!(topic = %message.topic, "Ignoring message outside the response filter");
            return false;
        }
        if self.rid_policy == RidPolicy::Strict {
            if let Some(rid) = topic::request_id(&message.topic) {
                if rid != self.expected_rid {
                    warn!(
                        topic = %message.topic,
                        expected = %self.expected_rid,
                        received = %rid,
                        "Ignoring response for a different request"
                    );
                    return false;
                }
            }
        }
        true
    }
}

impl EventHandler for Correlator {
    fn on_connect(&self, session: &dyn Session, result: Result<ConnAckInfo, CredcheckError>) {
        match result {
            Ok(ack) => {
                info!(session_present = ack.session_present, "✓ Connected");
                self.transition(ConnectionState::Connected);

                let filter = self.scenario.subscribe_filter();
                info!(filter, "✓ Subscribing");
                if let Err(e) = session.subscribe(filter) {
                    error!(error = %e, filter, "✗ Subscribe request failed");
                }
            }
            Err(e) => {
                error!(error = %e, "✗ Connection failed");
                self.transition(ConnectionState::Disconnected);
                self.fail(FailureKind::Connection, format!("✗ {e}"));
            }
        }
    }

    fn on_subscribe(&self, session: &dyn Session, grants: &[SubscribeGrant]) {
        if grants.iter().any(|g| !g.is_granted()) {
            error!(?grants, "✗ Subscription rejected by server");
        } else {
            info!(?grants, "✓ Subscribed");
        }

        let publish = {
            let mut run = self.run.lock();
            self.set_state(&mut run, ConnectionState::Subscribed);
            if run.resumed {
                self.set_state(&mut run, ConnectionState::AwaitingResponse);
                false
            } else if run.request_published {
                false
            } else {
                run.request_published = true;
                self.set_state(&mut run, ConnectionState::PublishPending);
                true
            }
        };

        if publish {
            let topic = self.scenario.publish_topic();
            info!(
                topic,
                payload = %String::from_utf8_lossy(self.scenario.payload()),
                "✓ Publishing"
            );
            match session.publish(topic, self.scenario.payload()) {
                Ok(()) => debug!("Publish request queued"),
                Err(e) => error!(error = %e, "✗ Publish failed"),
            }
        }
    }

    fn on_publish(&self, session: &dyn Session, packet_id: u16) {
        let disconnect = {
            let mut run = self.run.lock();
            if run.state != ConnectionState::PublishPending {
                debug!(packet_id, state = %run.state, "Ignoring PUBACK");
                return;
            }
            self.set_state(&mut run, ConnectionState::PublishAcked);
            if self.scenario.disconnect_after_publish() && !run.resumed {
                true
            } else {
                self.set_state(&mut run, ConnectionState::AwaitingResponse);
                false
            }
        };
        info!(packet_id, "✓ Publish acknowledged by broker");

        if disconnect {
            let filter = self.scenario.subscribe_filter();
            info!(filter, "✓ Unsubscribing");
            if let Err(e) = session.unsubscribe(filter) {
                error!(error = %e, "✗ Unsubscribe request failed");
            }
            info!("Disconnecting after publish");
            self.request_disconnect(session);
        }
    }

    fn on_message(&self, session: &dyn Session, message: ResponseEnvelope) {
        if self.is_complete() {
            debug!(topic = %message.topic, "Run already complete, ignoring message");
            return;
        }
        if !self.accepts(&message) {
            return;
        }

        info!(topic = %message.topic, bytes = message.payload.len(), "✓ Response received");
        self.transition(ConnectionState::ResponseReceived);

        let validation = self
            .scenario
            .validate_response(&message.topic, &message.payload);
        if validation.success {
            info!("{}", validation.message);
        } else {
            warn!("{}", validation.message);
        }

        let outcome = RunOutcome::validated(
            self.scenario.name(),
            self.scenario.correlation_id(),
            validation.success,
            validation.message,
            message.snapshot(),
        );
        if self.complete(outcome) {
            self.request_disconnect(session);
        }
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        let expected = {
            let mut run = self.run.lock();
            run.disconnects += 1;
            let expected = run.disconnect_requested || reason.is_expected();
            run.disconnect_requested = false;
            self.set_state(&mut run, ConnectionState::Disconnected);
            expected
        };

        if expected {
            info!("✓ Disconnected gracefully");
        } else {
            warn!(%reason, "✗ Unexpected disconnection");
        }
    }
}
