use super::{ConnAckInfo, DisconnectReason, EventHandler, Session, SubscribeGrant, Transport};
use crate::auth::SessionCredentials;
use crate::config::{HubEndpoint, DEFAULT_KEEP_ALIVE};
use crate::error::{CredcheckError, Result};
use crate::outcome::ResponseEnvelope;
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const REQUEST_CHANNEL_CAPACITY: usize = 16;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// MQTT 3.1.1 over TLS via `rumqttc`.
///
/// Every [`Transport::connect`] builds a fresh client/event-loop pair with a
/// clean session; one background task polls the loop and dispatches events.
pub struct MqttTransport {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    credentials: SessionCredentials,
    handler: Mutex<Option<Arc<dyn EventHandler>>>,
    active: Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    handle: SessionHandle,
    worker: JoinHandle<()>,
}

#[derive(Clone)]
struct SessionHandle {
    client: AsyncClient,
    flags: Arc<SessionFlags>,
}

#[derive(Default)]
struct SessionFlags {
    connected: AtomicBool,
    disconnect_requested: AtomicBool,
}

impl MqttTransport {
    #[must_use]
    pub fn new(endpoint: &HubEndpoint, credentials: SessionCredentials) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            client_id: endpoint.device_id.clone(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            credentials,
            handler: Mutex::new(None),
            active: Mutex::new(None),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_credentials(
            &self.credentials.username,
            self.credentials.password.as_deref().unwrap_or_default(),
        );
        options.set_transport(rumqttc::Transport::tls(
            self.credentials.tls.ca.clone(),
            self.credentials.tls.client_auth.clone(),
            None,
        ));
        options
    }
}

impl Transport for MqttTransport {
    fn set_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.lock() = Some(handler);
    }

    fn connect(&self) -> Result<()> {
        let handler = self
            .handler
            .lock()
            .clone()
            .ok_or_else(|| CredcheckError::Configuration("no event handler registered".into()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CredcheckError::ConnectionError(e.to_string()))?;

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            if previous.handle.flags.connected.load(Ordering::Acquire) {
                *active = Some(previous);
                return Err(CredcheckError::ConnectionError(
                    "a session is already active".into(),
                ));
            }
            previous.worker.abort();
        }

        let (client, eventloop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);
        let handle = SessionHandle {
            client,
            flags: Arc::new(SessionFlags::default()),
        };

        debug!(host = %self.host, port = self.port, client_id = %self.client_id, "Connecting");
        let worker = runtime.spawn(drive(eventloop, handle.clone(), handler));
        *active = Some(ActiveSession { handle, worker });
        Ok(())
    }

    fn disconnect(&self) {
        if let Some(active) = self.active.lock().as_ref() {
            if let Err(e) = active.handle.disconnect() {
                debug!(error = %e, "Disconnect request not queued");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|active| active.handle.flags.connected.load(Ordering::Acquire))
    }

    async fn shutdown(&self) {
        let active = { self.active.lock().take() };
        let Some(active) = active else {
            return;
        };
        if let Err(e) = active.handle.disconnect() {
            debug!(error = %e, "Disconnect request not queued during shutdown");
        }

        let mut worker = active.worker;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await.is_err() {
            debug!("Event loop did not stop within grace period, aborting");
            worker.abort();
        }
    }
}

impl Session for SessionHandle {
    fn subscribe(&self, filter: &str) -> Result<()> {
        self.client
            .try_subscribe(filter, QoS::AtLeastOnce)
            .map_err(|e| CredcheckError::RequestFailed(e.to_string()))
    }

    fn unsubscribe(&self, filter: &str) -> Result<()> {
        self.client
            .try_unsubscribe(filter)
            .map_err(|e| CredcheckError::RequestFailed(e.to_string()))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|e| CredcheckError::RequestFailed(e.to_string()))
    }

    fn disconnect(&self) -> Result<()> {
        self.flags.disconnect_requested.store(true, Ordering::Release);
        self.client
            .try_disconnect()
            .map_err(|e| CredcheckError::RequestFailed(e.to_string()))
    }
}

async fn drive(mut eventloop: EventLoop, handle: SessionHandle, handler: Arc<dyn EventHandler>) {
    let mut connected = false;

    loop {
        let event = match eventloop.poll().await {
            Ok(event) => event,
            Err(e) => {
                handle.flags.connected.store(false, Ordering::Release);
                if connected {
                    let reason = if handle.flags.disconnect_requested.load(Ordering::Acquire) {
                        DisconnectReason::ClientInitiated
                    } else {
                        DisconnectReason::NetworkError(e.to_string())
                    };
                    handler.on_disconnect(reason);
                } else {
                    handler.on_connect(&handle, Err(connection_error(&e)));
                }
                break;
            }
        };

        trace!(?event, "MQTT event");
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                if ack.code == ConnectReturnCode::Success {
                    connected = true;
                    handle.flags.connected.store(true, Ordering::Release);
                    handler.on_connect(
                        &handle,
                        Ok(ConnAckInfo {
                            session_present: ack.session_present,
                        }),
                    );
                } else {
                    handler.on_connect(&handle, Err(CredcheckError::refused(return_code(&ack.code))));
                    break;
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let grants: Vec<SubscribeGrant> =
                    ack.return_codes.iter().map(grant).collect();
                handler.on_subscribe(&handle, &grants);
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                handler.on_publish(&handle, ack.pkid);
            }
            Event::Incoming(Packet::Publish(publish)) => {
                let message =
                    ResponseEnvelope::new(publish.topic, publish.payload.to_vec(), publish.qos as u8);
                handler.on_message(&handle, message);
            }
            Event::Incoming(Packet::Disconnect) => {
                handle.flags.connected.store(false, Ordering::Release);
                handler.on_disconnect(DisconnectReason::ServerClosed);
                break;
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                handle.flags.connected.store(false, Ordering::Release);
                handler.on_disconnect(DisconnectReason::ClientInitiated);
                break;
            }
            _ => {}
        }
    }

    if handle.flags.disconnect_requested.load(Ordering::Acquire) {
        debug!("Event loop stopped after client disconnect");
    } else if connected {
        warn!("Event loop stopped");
    }
}

fn connection_error(error: &ConnectionError) -> CredcheckError {
    match error {
        ConnectionError::ConnectionRefused(code) => CredcheckError::refused(return_code(code)),
        other => CredcheckError::ConnectionError(other.to_string()),
    }
}

fn return_code(code: &ConnectReturnCode) -> u8 {
    match code {
        ConnectReturnCode::Success => 0,
        ConnectReturnCode::RefusedProtocolVersion => 1,
        ConnectReturnCode::BadClientId => 2,
        ConnectReturnCode::ServiceUnavailable => 3,
        ConnectReturnCode::BadUserNamePassword => 4,
        ConnectReturnCode::NotAuthorized => 5,
    }
}

fn grant(code: &SubscribeReasonCode) -> SubscribeGrant {
    match code {
        SubscribeReasonCode::Success(qos) => SubscribeGrant::Granted(*qos as u8),
        SubscribeReasonCode::Failure => SubscribeGrant::Rejected,
    }
}
