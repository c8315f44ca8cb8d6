//! Socket Mode ingress: a websocket session opened with the app-level token, and a runner that
//! acknowledges each envelope before handing it to the dispatcher.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use knowbot_core::surface::MessagingSurface;

use crate::events::{deliver, CallbackPayload, EventContext, EventDispatcher, HandlerResult, SlackEnvelope};
use crate::web::SlackWebClient;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport ack failed: {0}")]
    Acknowledge(String),
    #[error("transport disconnect failed: {0}")]
    Disconnect(String),
}

/// Backoff for failed connection attempts. A session that connected and later dropped does not
/// count against `max_retries`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Envelope source for Socket Mode. Acknowledgement must happen before the handler runs.
///
/// `next_envelope` yields `Ok(None)` when the source is exhausted for good and an error when
/// the session dropped and should be reopened.
#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

type SlackSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Slack Socket Mode over a websocket. Each `connect` asks `apps.connections.open` for a fresh url.
pub struct WebSocketTransport {
    web: Arc<SlackWebClient>,
    app_token: SecretString,
    socket: Mutex<Option<SlackSocket>>,
}

impl WebSocketTransport {
    pub fn new(web: Arc<SlackWebClient>, app_token: SecretString) -> Self {
        Self { web, app_token, socket: Mutex::new(None) }
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self
            .web
            .open_socket_connection(&self.app_token)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (socket, _) = connect_async(url.as_str()).await.map_err(|error| TransportError::Connect(error.to_string()))?;
        *self.socket.lock().await = Some(socket);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut guard = self.socket.lock().await;
        let socket = guard.as_mut().ok_or_else(|| TransportError::Receive("socket is not connected".to_owned()))?;

        loop {
            let message = socket
                .next()
                .await
                .ok_or_else(|| TransportError::Receive("socket stream ended".to_owned()))?
                .map_err(|error| TransportError::Receive(error.to_string()))?;

            match message {
                Message::Text(text) => match classify_frame(&text) {
                    SocketFrame::Event(envelope) => return Ok(Some(envelope)),
                    SocketFrame::Disconnect(reason) => {
                        return Err(TransportError::Receive(format!("slack asked to reconnect ({reason})")));
                    }
                    SocketFrame::Hello => debug!(event_name = "ingress.slack.socket_hello", "socket mode session ready"),
                    SocketFrame::Unhandled { envelope_id, kind } => {
                        debug!(envelope_id = %envelope_id, kind = %kind, "acknowledging envelope without a handler");
                        send_ack(socket, &envelope_id).await?;
                    }
                    SocketFrame::Ignored => {}
                },
                Message::Ping(payload) => {
                    socket.send(Message::Pong(payload)).await.map_err(|error| TransportError::Receive(error.to_string()))?;
                }
                Message::Close(_) => return Err(TransportError::Receive("slack closed the socket".to_owned())),
                _ => {}
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.socket.lock().await;
        let socket =
            guard.as_mut().ok_or_else(|| TransportError::Acknowledge("socket is not connected".to_owned()))?;
        send_ack(socket, envelope_id).await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(mut socket) = self.socket.lock().await.take() else {
            return Ok(());
        };
        socket.close(None).await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

async fn send_ack(socket: &mut SlackSocket, envelope_id: &str) -> Result<(), TransportError> {
    let ack = json!({ "envelope_id": envelope_id }).to_string();
    socket.send(Message::Text(ack.into())).await.map_err(|error| TransportError::Acknowledge(error.to_string()))
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    envelope_id: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, PartialEq)]
enum SocketFrame {
    Hello,
    Disconnect(String),
    Event(SlackEnvelope),
    /// Slash commands, interactivity and other envelopes this bot does not handle. Still acked.
    Unhandled { envelope_id: String, kind: String },
    Ignored,
}

fn classify_frame(text: &str) -> SocketFrame {
    let Ok(frame) = serde_json::from_str::<RawFrame>(text) else {
        debug!(event_name = "ingress.slack.frame_unparsed", "skipping unparsable socket frame");
        return SocketFrame::Ignored;
    };

    match (frame.kind.as_str(), frame.envelope_id) {
        ("hello", _) => SocketFrame::Hello,
        ("disconnect", _) => SocketFrame::Disconnect(frame.reason.unwrap_or_else(|| "unspecified".to_owned())),
        ("events_api", Some(envelope_id)) => match frame.payload.map(serde_json::from_value::<CallbackPayload>) {
            Some(Ok(CallbackPayload::EventCallback { event, .. })) => {
                SocketFrame::Event(SlackEnvelope { envelope_id, event: event.into_event() })
            }
            _ => SocketFrame::Unhandled { envelope_id, kind: frame.kind.clone() },
        },
        (_, Some(envelope_id)) => SocketFrame::Unhandled { envelope_id, kind: frame.kind.clone() },
        _ => SocketFrame::Ignored,
    }
}

enum SessionEnd {
    Closed,
    Dropped(TransportError),
}

pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: Arc<EventDispatcher>,
    surface: Arc<dyn MessagingSurface>,
    bot_user_id: Option<String>,
    reconnect_policy: ReconnectPolicy,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: Arc<EventDispatcher>,
        surface: Arc<dyn MessagingSurface>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, dispatcher, surface, bot_user_id: None, reconnect_policy }
    }

    pub fn with_bot_user_id(mut self, bot_user_id: Option<String>) -> Self {
        self.bot_user_id = bot_user_id;
        self
    }

    /// Runs until the transport closes or connection retries run out, then waits for
    /// envelopes still being answered.
    pub async fn start(&self) -> Result<()> {
        let mut in_flight = JoinSet::new();
        let mut failures = 0_u32;

        loop {
            let delay = match self.run_session(failures, &mut in_flight).await {
                Ok(SessionEnd::Closed) => break,
                Ok(SessionEnd::Dropped(error)) => {
                    info!(
                        event_name = "ingress.slack.session_dropped",
                        error = %error,
                        "socket mode session dropped, reconnecting"
                    );
                    failures = 0;
                    self.reconnect_policy.backoff(0)
                }
                Err(transport_error) => {
                    warn!(
                        event_name = "ingress.slack.transport_failed",
                        attempt = failures,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "socket mode transport failed"
                    );
                    if failures >= self.reconnect_policy.max_retries {
                        warn!(
                            max_retries = self.reconnect_policy.max_retries,
                            "socket mode retries exhausted; continuing process without crash"
                        );
                        break;
                    }
                    failures += 1;
                    self.reconnect_policy.backoff(failures - 1)
                }
            };

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        while in_flight.join_next().await.is_some() {}
        Ok(())
    }

    async fn run_session(&self, attempt: u32, in_flight: &mut JoinSet<()>) -> Result<SessionEnd, TransportError> {
        info!(attempt, "opening socket mode transport connection");
        self.transport.connect().await?;
        info!(attempt, "socket mode transport connected");

        loop {
            let envelope = match self.transport.next_envelope().await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    info!(attempt, "socket mode transport stream closed");
                    self.disconnect_quietly().await;
                    return Ok(SessionEnd::Closed);
                }
                Err(error) => {
                    self.disconnect_quietly().await;
                    return Ok(SessionEnd::Dropped(error));
                }
            };
            let (channel_id, thread_id) = envelope.event.reply_target().unwrap_or(("unknown", None));

            info!(
                event_name = "ingress.slack.envelope_received",
                envelope_id = %envelope.envelope_id,
                event_type = ?envelope.event.event_type(),
                correlation_id = %envelope.envelope_id,
                channel_id,
                thread_id = thread_id.unwrap_or("unknown"),
                "received slack envelope"
            );

            if let Err(error) = self.transport.acknowledge(&envelope.envelope_id).await {
                warn!(
                    event_name = "ingress.slack.ack_sent",
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    error = %error,
                    "failed to acknowledge slack envelope"
                );
            }

            while in_flight.try_join_next().is_some() {}
            let context = EventContext {
                correlation_id: envelope.envelope_id.clone(),
                bot_user_id: self.bot_user_id.clone(),
                ..EventContext::default()
            };
            in_flight.spawn(handle_envelope(self.dispatcher.clone(), self.surface.clone(), envelope, context));
        }
    }

    async fn disconnect_quietly(&self) {
        if let Err(error) = self.transport.disconnect().await {
            debug!(error = %error, "socket mode disconnect failed");
        }
    }
}

async fn handle_envelope(
    dispatcher: Arc<EventDispatcher>,
    surface: Arc<dyn MessagingSurface>,
    envelope: SlackEnvelope,
    context: EventContext,
) {
    let result = match dispatcher.dispatch(&envelope, &context).await {
        Ok(result) => result,
        Err(error) => {
            warn!(
                envelope_id = %envelope.envelope_id,
                correlation_id = %context.correlation_id,
                error = %error,
                "event dispatch failed; continuing socket loop"
            );
            return;
        }
    };
    if !matches!(result, HandlerResult::Responded(_)) {
        return;
    }

    if let Err(error) = deliver(surface.as_ref(), &envelope.event, &result).await {
        warn!(
            event_name = "ingress.slack.reply_failed",
            correlation_id = %context.correlation_id,
            error = %error,
            "failed to post handler reply"
        );
    }
}
