//! In-memory scripted hub for exercising runs without a network.
//!
//! [`MockHub`] implements [`Transport`] with a single dispatcher task that
//! plays the broker: it acknowledges subscriptions and publishes, answers
//! `issueCertificate` requests with scripted responses, and holds a response
//! while the client is disconnected until the next matching subscription.
//! Every request the client makes is recorded as a [`MockCall`].

#![allow(clippy::missing_panics_doc)]

use crate::error::{CredcheckError, Result};
use crate::outcome::ResponseEnvelope;
use crate::topic::{self, ISSUE_CERTIFICATE_PREFIX};
use crate::transport::{
    ConnAckInfo, DisconnectReason, EventHandler, Session, SubscribeGrant, Transport,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use ulid::Ulid;

/// A request the client issued against the hub, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: Vec<u8> },
    Disconnect,
}

/// Which `$rid` a scripted response carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseRid {
    /// The request's own correlation id.
    Echo,
    Fixed(String),
    Omitted,
}

/// One scripted answer to an `issueCertificate` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: String,
    pub rid: ResponseRid,
    pub delay: Duration,
    pub payload: Vec<u8>,
    /// Sent verbatim instead of a constructed response topic.
    pub raw_topic: Option<String>,
}

impl MockResponse {
    #[must_use]
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            rid: ResponseRid::Echo,
            delay: Duration::ZERO,
            payload: Vec::new(),
            raw_topic: None,
        }
    }

    #[must_use]
    pub fn accepted() -> Self {
        Self::status(topic::STATUS_ACCEPTED)
    }

    #[must_use]
    pub fn raw(topic: impl Into<String>) -> Self {
        Self {
            raw_topic: Some(topic.into()),
            ..Self::accepted()
        }
    }

    #[must_use]
    pub fn with_rid(mut self, rid: ResponseRid) -> Self {
        self.rid = rid;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    fn topic_for(&self, request_rid: Option<&str>) -> String {
        if let Some(raw) = &self.raw_topic {
            return raw.clone();
        }
        let rid = match &self.rid {
            ResponseRid::Echo => request_rid.map(str::to_string),
            ResponseRid::Fixed(rid) => Some(rid.clone()),
            ResponseRid::Omitted => None,
        };
        match rid {
            Some(rid) => topic::response_topic(&self.status, &rid, 1),
            None => format!("$iothub/credentials/res/{}/?$version=1", self.status),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockHubConfig {
    /// CONNACK refusal code returned to every connect.
    pub refuse_with: Option<u8>,
    pub reject_subscriptions: bool,
    pub ack_publishes: bool,
    /// Holds each PUBACK back this long after the publish arrives.
    pub ack_delay: Duration,
    pub responses: Vec<MockResponse>,
}

impl Default for MockHubConfig {
    fn default() -> Self {
        Self {
            refuse_with: None,
            reject_subscriptions: false,
            ack_publishes: true,
            ack_delay: Duration::ZERO,
            responses: vec![MockResponse::accepted()],
        }
    }
}

enum HubCommand {
    Connect,
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: Vec<u8> },
    Disconnect(DisconnectReason),
    Deliver(ResponseEnvelope),
    Ack(u16),
    Stop,
}

struct Dispatcher {
    commands: mpsc::UnboundedSender<HubCommand>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<MockCall>>,
    connected: AtomicBool,
}

/// Scripted in-memory hub.
pub struct MockHub {
    config: MockHubConfig,
    shared: Arc<Shared>,
    handler: Mutex<Option<Arc<dyn EventHandler>>>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

/// The client's view of the hub, handed to event callbacks.
#[derive(Clone)]
struct MockSession {
    commands: mpsc::UnboundedSender<HubCommand>,
    shared: Arc<Shared>,
}

impl MockSession {
    fn send(&self, call: MockCall, command: HubCommand) -> Result<()> {
        self.shared.calls.lock().push(call);
        self.commands
            .send(command)
            .map_err(|_| CredcheckError::RequestFailed("hub stopped".into()))
    }
}

impl Session for MockSession {
    fn subscribe(&self, filter: &str) -> Result<()> {
        self.send(
            MockCall::Subscribe(filter.to_string()),
            HubCommand::Subscribe(filter.to_string()),
        )
    }

    fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.send(
            MockCall::Unsubscribe(filter.to_string()),
            HubCommand::Unsubscribe(filter.to_string()),
        )
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.send(
            MockCall::Publish {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            },
            HubCommand::Publish {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            },
        )
    }

    fn disconnect(&self) -> Result<()> {
        self.send(
            MockCall::Disconnect,
            HubCommand::Disconnect(DisconnectReason::ClientInitiated),
        )
    }
}

impl MockHub {
    /// A hub that accepts connections and answers each request with `202`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockHubConfig::default())
    }

    #[must_use]
    pub fn with_config(config: MockHubConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::default()),
            handler: Mutex::new(None),
            dispatcher: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn refusing(code: u8) -> Self {
        Self::with_config(MockHubConfig {
            refuse_with: Some(code),
            ..MockHubConfig::default()
        })
    }

    #[must_use]
    pub fn with_responses(responses: Vec<MockResponse>) -> Self {
        Self::with_config(MockHubConfig {
            responses,
            ..MockHubConfig::default()
        })
    }

    /// A hub that acknowledges everything but never answers.
    #[must_use]
    pub fn silent() -> Self {
        Self::with_responses(Vec::new())
    }

    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.shared.calls.lock().clone()
    }

    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Connect))
    }

    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Publish { .. }))
    }

    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.count(|call| matches!(call, MockCall::Disconnect))
    }

    fn count(&self, pred: impl Fn(&MockCall) -> bool) -> usize {
        self.shared.calls.lock().iter().filter(|&c| pred(c)).count()
    }

    /// Closes the connection from the hub side.
    pub fn drop_connection(&self) {
        if let Some(dispatcher) = self.dispatcher.lock().as_ref() {
            let _ = dispatcher
                .commands
                .send(HubCommand::Disconnect(DisconnectReason::ServerClosed));
        }
    }

    fn ensure_dispatcher(&self, handler: Arc<dyn EventHandler>) -> Result<mpsc::UnboundedSender<HubCommand>> {
        let mut dispatcher = self.dispatcher.lock();
        if let Some(existing) = dispatcher.as_ref() {
            if !existing.task.is_finished() {
                return Ok(existing.commands.clone());
            }
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CredcheckError::ConnectionError(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = HubLoop {
            config: self.config.clone(),
            handler,
            session: MockSession {
                commands: tx.clone(),
                shared: Arc::clone(&self.shared),
            },
            connected: false,
            subscriptions: Vec::new(),
            pending: Vec::new(),
            next_packet_id: 1,
        };
        let task = runtime.spawn(hub.run(rx));
        *dispatcher = Some(Dispatcher {
            commands: tx.clone(),
            task,
        });
        Ok(tx)
    }
}

impl Default for MockHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockHub {
    fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.lock() = Some(handler);
    }

    fn connect(&self) -> Result<()> {
        let handler = self
            .handler
            .lock()
            .clone()
            .ok_or_else(|| CredcheckError::Configuration("no event handler registered".into()))?;
        if self.is_connected() {
            return Err(CredcheckError::ConnectionError(
                "a session is already active".into(),
            ));
        }
        let commands = self.ensure_dispatcher(handler)?;
        self.shared.calls.lock().push(MockCall::Connect);
        commands
            .send(HubCommand::Connect)
            .map_err(|_| CredcheckError::ConnectionError("hub stopped".into()))
    }

    fn disconnect(&self) {
        if !self.is_connected() {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.lock().as_ref() {
            self.shared.calls.lock().push(MockCall::Disconnect);
            let _ = dispatcher
                .commands
                .send(HubCommand::Disconnect(DisconnectReason::ClientInitiated));
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn shutdown(&self) {
        let dispatcher = { self.dispatcher.lock().take() };
        let Some(dispatcher) = dispatcher else {
            return;
        };
        let _ = dispatcher.commands.send(HubCommand::Stop);
        let mut task = dispatcher.task;
        if tokio::time::timeout(Duration::from_millis(500), &mut task)
            .await
            .is_err()
        {
            task.abort();
        }
    }
}

struct HubLoop {
    config: MockHubConfig,
    handler: Arc<dyn EventHandler>,
    session: MockSession,
    connected: bool,
    subscriptions: Vec<String>,
    /// Responses produced but not yet deliverable.
    pending: Vec<ResponseEnvelope>,
    next_packet_id: u16,
}

impl HubLoop {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(command) = commands.recv().await {
            match command {
                HubCommand::Connect => self.connect(),
                HubCommand::Subscribe(filter) => self.subscribe(filter),
                HubCommand::Unsubscribe(filter) => {
                    self.subscriptions.retain(|f| *f != filter);
                }
                HubCommand::Publish { topic, payload } => self.publish(&topic, &payload),
                HubCommand::Ack(packet_id) => {
                    if self.connected {
                        self.handler.on_publish(&self.session, packet_id);
                    }
                }
                HubCommand::Deliver(message) => {
                    self.pending.push(message);
                    self.flush();
                }
                HubCommand::Disconnect(reason) => self.disconnect(reason),
                HubCommand::Stop => {
                    if self.connected {
                        self.disconnect(DisconnectReason::ClientInitiated);
                    }
                    break;
                }
            }
        }
        debug!(undelivered = self.pending.len(), "Mock hub stopped");
    }

    fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        self.session
            .shared
            .connected
            .store(connected, Ordering::Release);
    }

    fn connect(&mut self) {
        if let Some(code) = self.config.refuse_with {
            debug!(code, "Mock hub refusing connection");
            self.handler
                .on_connect(&self.session, Err(CredcheckError::refused(code)));
            return;
        }
        self.set_connected(true);
        self.subscriptions.clear();
        self.handler
            .on_connect(&self.session, Ok(ConnAckInfo::default()));
    }

    fn subscribe(&mut self, filter: String) {
        if !self.connected {
            return;
        }
        let grant = if self.config.reject_subscriptions {
            SubscribeGrant::Rejected
        } else {
            self.subscriptions.push(filter);
            SubscribeGrant::Granted(1)
        };
        self.handler.on_subscribe(&self.session, &[grant]);
        self.flush();
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) {
        if !self.connected {
            return;
        }
        trace!(topic, bytes = payload.len(), "Mock hub received publish");
        if self.config.ack_publishes {
            let packet_id = self.next_packet_id;
            self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
            if self.config.ack_delay.is_zero() {
                self.handler.on_publish(&self.session, packet_id);
            } else {
                let commands = self.session.commands.clone();
                let delay = self.config.ack_delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = commands.send(HubCommand::Ack(packet_id));
                });
            }
        }
        if !topic.starts_with(ISSUE_CERTIFICATE_PREFIX) {
            return;
        }

        let request_rid = topic::request_id(topic);
        for response in &self.config.responses {
            let message = ResponseEnvelope::new(
                response.topic_for(request_rid.as_deref()),
                response.payload.clone(),
                1,
            );
            let commands = self.session.commands.clone();
            let delay = response.delay;
            // Queued behind whatever the PUBACK callback issued.
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let _ = commands.send(HubCommand::Deliver(message));
            });
        }
    }

    fn flush(&mut self) {
        if !self.connected {
            return;
        }
        let (ready, held): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|message| {
                self.subscriptions
                    .iter()
                    .any(|filter| topic::topic_matches_filter(&message.topic, filter))
            });
        self.pending = held;
        for message in ready {
            self.handler.on_message(&self.session, message);
        }
    }

    fn disconnect(&mut self, reason: DisconnectReason) {
        if !self.connected {
            return;
        }
        self.set_connected(false);
        self.subscriptions.clear();
        self.handler.on_disconnect(reason);
    }
}

/// Device id unique to one test.
#[must_use]
pub fn unique_device_id(prefix: &str) -> String {
    format!("credcheck-{prefix}-{}", Ulid::new())
}
