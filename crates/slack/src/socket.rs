use std::{collections::BTreeMap, sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use mockops_core::config::RetryConfig;

use crate::commands::SlashCommandPayload;
use crate::events::{
    BlockActionEvent, EventContext, EventDispatcher, HandlerResult, ReactionAddedEvent, Reply,
    ReplyTarget, SlackEnvelope, SlackEvent,
};
use crate::web::{MessagePublisher, SlackWebClient};

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
    /// The server ended the session (Slack `disconnect` frame or websocket close).
    #[error("transport closed by server: {0}")]
    Closed(String),
}

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

impl From<&RetryConfig> for ReconnectPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_attempts,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
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

#[async_trait]
pub trait SocketTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError>;
    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

struct SessionEnd {
    connected: bool,
    error: TransportError,
}

/// Where the runner is in its connect/reconnect cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting { attempt: u32 },
    Connected,
    Reconnecting { failures: u32 },
    Stopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting { .. } => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting { .. } => "reconnecting",
            Self::Stopped => "stopped",
        }
    }
}

/// Sequential Socket Mode consumer: each envelope is acknowledged, dispatched and its
/// reply delivered before the next one is read.
pub struct SocketModeRunner {
    transport: Arc<dyn SocketTransport>,
    dispatcher: EventDispatcher,
    publisher: Arc<dyn MessagePublisher>,
    reconnect_policy: ReconnectPolicy,
    state: watch::Sender<SessionState>,
}

impl SocketModeRunner {
    pub fn new(
        transport: Arc<dyn SocketTransport>,
        dispatcher: EventDispatcher,
        publisher: Arc<dyn MessagePublisher>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self { transport, dispatcher, publisher, reconnect_policy, state }
    }

    /// Receiver that tracks the session state for readiness reporting.
    pub fn session_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SessionState) {
        self.state.send_replace(next);
    }

    pub async fn start(&self) -> Result<()> {
        let mut failures = 0_u32;
        loop {
            let end = match self.connect_and_pump(failures).await {
                Ok(()) => {
                    self.set_state(SessionState::Stopped);
                    return Ok(());
                }
                Err(end) => end,
            };
            if end.connected {
                failures = 0;
            }

            if let TransportError::Closed(reason) = &end.error {
                info!(
                    event_name = "ingress.slack.session_closed",
                    reason = %reason,
                    "socket mode session closed by server; reconnecting"
                );
                self.set_state(SessionState::Reconnecting { failures });
                tokio::time::sleep(self.reconnect_policy.backoff(0)).await;
                continue;
            }

            warn!(
                attempt = failures,
                max_retries = self.reconnect_policy.max_retries,
                error = %end.error,
                "socket mode transport failed"
            );
            if failures >= self.reconnect_policy.max_retries {
                warn!(
                    max_retries = self.reconnect_policy.max_retries,
                    "socket mode retries exhausted; continuing process without crash"
                );
                self.set_state(SessionState::Stopped);
                return Ok(());
            }

            self.set_state(SessionState::Reconnecting { failures: failures + 1 });
            let delay = self.reconnect_policy.backoff(failures);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            failures += 1;
        }
    }

    async fn connect_and_pump(&self, attempt: u32) -> Result<(), SessionEnd> {
        info!(attempt, "opening socket mode transport connection");
        self.set_state(SessionState::Connecting { attempt });
        self.transport
            .connect()
            .await
            .map_err(|error| SessionEnd { connected: false, error })?;
        info!(attempt, "socket mode transport connected");
        self.set_state(SessionState::Connected);

        loop {
            let envelope = self
                .transport
                .next_envelope()
                .await
                .map_err(|error| SessionEnd { connected: true, error })?;
            let Some(envelope) = envelope else {
                info!(attempt, "socket mode transport stream closed");
                return self
                    .transport
                    .disconnect()
                    .await
                    .map_err(|error| SessionEnd { connected: true, error });
            };
            self.process(&envelope).await;
        }
    }

    async fn process(&self, envelope: &SlackEnvelope) {
        let (channel_id, message_ts) = envelope.event.location();
        let channel_id = channel_id.unwrap_or("unknown");
        let message_ts = message_ts.unwrap_or("unknown");

        info!(
            event_name = "ingress.slack.envelope_received",
            envelope_id = %envelope.envelope_id,
            event_type = ?envelope.event.event_type(),
            correlation_id = %envelope.envelope_id,
            channel_id,
            message_ts,
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
        } else {
            debug!(
                event_name = "ingress.slack.ack_sent",
                envelope_id = %envelope.envelope_id,
                correlation_id = %envelope.envelope_id,
                "acknowledged slack envelope"
            );
        }

        let context = EventContext { correlation_id: envelope.envelope_id.clone() };
        match self.dispatcher.dispatch(envelope, &context).await {
            Ok(HandlerResult::Responded(reply)) => self.deliver(&reply, &context).await,
            Ok(result) => {
                debug!(
                    correlation_id = %context.correlation_id,
                    result = ?result,
                    "envelope handled without reply"
                );
            }
            Err(error) => {
                warn!(
                    envelope_id = %envelope.envelope_id,
                    correlation_id = %envelope.envelope_id,
                    channel_id,
                    message_ts,
                    error = %error,
                    "event dispatch failed; continuing socket loop"
                );
            }
        }
    }

    async fn deliver(&self, reply: &Reply, context: &EventContext) {
        let outcome = match &reply.target {
            ReplyTarget::Thread { channel_id, thread_ts } => {
                self.publisher.post_message(channel_id, Some(thread_ts), &reply.message).await
            }
            ReplyTarget::Replace { channel_id, message_ts } => {
                self.publisher.update_message(channel_id, message_ts, &reply.message).await
            }
            ReplyTarget::Channel { channel_id } => {
                self.publisher.post_message(channel_id, None, &reply.message).await
            }
        };

        match outcome {
            Ok(posted) => debug!(
                event_name = "egress.slack.reply_sent",
                correlation_id = %context.correlation_id,
                channel_id = %posted.channel_id,
                ts = %posted.ts,
                "reply delivered"
            ),
            Err(error) => warn!(
                event_name = "egress.slack.reply_failed",
                correlation_id = %context.correlation_id,
                error = %error,
                "could not deliver reply"
            ),
        }
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Socket Mode over a real websocket. Each `connect` asks `apps.connections.open` for a
/// fresh URL.
pub struct WebSocketTransport {
    client: Arc<SlackWebClient>,
    stream: Mutex<Option<WsStream>>,
}

impl WebSocketTransport {
    pub fn new(client: Arc<SlackWebClient>) -> Self {
        Self { client, stream: Mutex::new(None) }
    }

    async fn read_envelope(stream: &mut WsStream) -> Result<SlackEnvelope, TransportError> {
        loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
                None => return Err(TransportError::Closed("websocket stream ended".to_owned())),
            };

            let text = match message {
                Message::Text(text) => text.to_string(),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(
                            event_name = "slack.socket.frame_undecodable",
                            error = %error,
                            "skipping binary socket frame that is not utf-8"
                        );
                        continue;
                    }
                },
                Message::Close(frame) => {
                    let reason = frame
                        .map(|frame| frame.reason.to_string())
                        .unwrap_or_else(|| "close frame".to_owned());
                    return Err(TransportError::Closed(reason));
                }
                _ => continue,
            };

            if let Some(envelope) = envelope_from_text(&text)? {
                return Ok(envelope);
            }
        }
    }
}

/// `Ok(None)` means keep reading. A frame that does not parse is logged and skipped so
/// one bad payload never ends the session.
fn envelope_from_text(text: &str) -> Result<Option<SlackEnvelope>, TransportError> {
    match parse_socket_frame(text) {
        Ok(SocketFrame::Envelope(envelope)) => Ok(Some(envelope)),
        Ok(SocketFrame::Hello) => {
            debug!("socket mode hello received");
            Ok(None)
        }
        Ok(SocketFrame::Disconnect { reason }) => Err(TransportError::Closed(reason)),
        Ok(SocketFrame::Ignored) => {
            debug!("ignoring socket frame without envelope");
            Ok(None)
        }
        Err(error) => {
            warn!(
                event_name = "slack.socket.frame_unparseable",
                error = %error,
                "skipping socket frame that could not be parsed"
            );
            Ok(None)
        }
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self
            .client
            .open_socket_url()
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;
        *self.stream.lock().await = Some(stream);
        Ok(())
    }

    async fn next_envelope(&self) -> Result<Option<SlackEnvelope>, TransportError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::Receive("socket is not connected".to_owned()));
        };

        let outcome = Self::read_envelope(stream).await;
        if outcome.is_err() {
            *guard = None;
        }
        outcome.map(Some)
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let mut guard = self.stream.lock().await;
        let Some(stream) = guard.as_mut() else {
            return Err(TransportError::Acknowledge("socket is not connected".to_owned()));
        };
        let ack = json!({ "envelope_id": envelope_id }).to_string();
        stream
            .send(Message::text(ack))
            .await
            .map_err(|error| TransportError::Acknowledge(error.to_string()))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.lock().await.take() else {
            return Ok(());
        };
        stream.close(None).await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    Hello,
    Disconnect { reason: String },
    Envelope(SlackEnvelope),
    Ignored,
}

/// Decodes one Socket Mode text frame. Payloads that do not match a supported event
/// still yield an envelope (as `Unsupported`) so they get acknowledged.
pub fn parse_socket_frame(text: &str) -> Result<SocketFrame, TransportError> {
    let frame: Value = serde_json::from_str(text)
        .map_err(|error| TransportError::Receive(format!("invalid socket frame: {error}")))?;
    let frame_type = frame.get("type").and_then(Value::as_str).unwrap_or_default();

    match frame_type {
        "hello" => return Ok(SocketFrame::Hello),
        "disconnect" => {
            let reason =
                frame.get("reason").and_then(Value::as_str).unwrap_or("unspecified").to_owned();
            return Ok(SocketFrame::Disconnect { reason });
        }
        _ => {}
    }

    let Some(envelope_id) = frame.get("envelope_id").and_then(Value::as_str) else {
        return Ok(SocketFrame::Ignored);
    };
    let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
    let event = match frame_type {
        "events_api" => events_api_event(payload),
        "interactive" => interactive_event(payload),
        "slash_commands" => slash_command_event(payload),
        other => SlackEvent::Unsupported { event_type: other.to_owned() },
    };

    Ok(SocketFrame::Envelope(SlackEnvelope { envelope_id: envelope_id.to_owned(), event }))
}

#[derive(Deserialize)]
struct EventCallback {
    event: ApiEvent,
}

#[derive(Deserialize)]
struct ApiEvent {
    #[serde(rename = "type")]
    event_type: String,
    /// A user id on `reaction_added`, a full user object on `user_change`.
    #[serde(default)]
    user: Option<Value>,
    #[serde(default)]
    reaction: Option<String>,
    #[serde(default)]
    item: Option<ReactionItem>,
    #[serde(default)]
    item_user: Option<String>,
}

#[derive(Deserialize)]
struct ReactionItem {
    #[serde(rename = "type")]
    item_type: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
}

fn events_api_event(payload: Value) -> SlackEvent {
    let Ok(callback) = serde_json::from_value::<EventCallback>(payload) else {
        return SlackEvent::Unsupported { event_type: "events_api".to_owned() };
    };
    let event = callback.event;
    let unsupported = || SlackEvent::Unsupported { event_type: format!("events_api:{}", event.event_type) };

    if event.event_type == "user_change" {
        return match event.user.as_ref().and_then(|user| user.get("id")).and_then(Value::as_str) {
            Some(user_id) => SlackEvent::UserChanged { user_id: user_id.to_owned() },
            None => unsupported(),
        };
    }
    if event.event_type != "reaction_added" {
        return unsupported();
    }
    let user = event.user.as_ref().and_then(Value::as_str);
    match (&event.item, user, &event.reaction) {
        (Some(item), Some(user), Some(reaction)) if item.item_type == "message" => {
            match (&item.channel, &item.ts) {
                (Some(channel), Some(ts)) => SlackEvent::ReactionAdded(ReactionAddedEvent {
                    channel_id: channel.clone(),
                    message_ts: ts.clone(),
                    reactor_user_id: user.to_owned(),
                    reaction: reaction.clone(),
                    item_user_id: event.item_user.clone(),
                }),
                _ => unsupported(),
            }
        }
        _ => unsupported(),
    }
}

#[derive(Deserialize)]
struct InteractivePayload {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    user: Option<IdRef>,
    #[serde(default)]
    channel: Option<IdRef>,
    #[serde(default)]
    container: Option<ActionContainer>,
    #[serde(default)]
    message: Option<ContainerMessage>,
    #[serde(default)]
    actions: Vec<ApiAction>,
    #[serde(default)]
    state: Option<ApiState>,
}

#[derive(Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Deserialize)]
struct ActionContainer {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    message_ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Deserialize)]
struct ContainerMessage {
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

#[derive(Deserialize)]
struct ApiAction {
    action_id: String,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct ApiState {
    #[serde(default)]
    values: BTreeMap<String, BTreeMap<String, ApiStateValue>>,
}

#[derive(Deserialize)]
struct ApiStateValue {
    #[serde(default)]
    value: Option<String>,
}

fn interactive_event(payload: Value) -> SlackEvent {
    let Ok(payload) = serde_json::from_value::<InteractivePayload>(payload) else {
        return SlackEvent::Unsupported { event_type: "interactive".to_owned() };
    };
    if payload.kind != "block_actions" {
        return SlackEvent::Unsupported { event_type: format!("interactive:{}", payload.kind) };
    }

    let container = payload.container.unwrap_or(ActionContainer {
        channel_id: None,
        message_ts: None,
        thread_ts: None,
    });
    let channel_id = payload.channel.map(|channel| channel.id).or(container.channel_id);
    let (message_ts, message_thread_ts) = match payload.message {
        Some(message) => (message.ts, message.thread_ts),
        None => (None, None),
    };
    let message_ts = container.message_ts.or(message_ts);
    let action = payload.actions.into_iter().next();

    let (Some(user), Some(channel_id), Some(message_ts), Some(action)) =
        (payload.user, channel_id, message_ts, action)
    else {
        return SlackEvent::Unsupported { event_type: "interactive:block_actions".to_owned() };
    };

    let state = payload
        .state
        .map(|state| {
            state
                .values
                .into_iter()
                .map(|(block_id, actions)| {
                    let actions = actions
                        .into_iter()
                        .filter_map(|(action_id, input)| input.value.map(|value| (action_id, value)))
                        .collect();
                    (block_id, actions)
                })
                .collect()
        })
        .unwrap_or_default();

    SlackEvent::BlockAction(BlockActionEvent {
        channel_id,
        message_ts,
        thread_ts: container.thread_ts.or(message_thread_ts),
        user_id: user.id,
        action_id: action.action_id,
        value: action.value,
        state,
    })
}

#[derive(Deserialize)]
struct ApiSlashCommand {
    command: String,
    #[serde(default)]
    text: String,
    channel_id: String,
    user_id: String,
    #[serde(default)]
    trigger_id: String,
}

fn slash_command_event(payload: Value) -> SlackEvent {
    match serde_json::from_value::<ApiSlashCommand>(payload) {
        Ok(command) => SlackEvent::SlashCommand(SlashCommandPayload {
            command: command.command,
            text: command.text,
            channel_id: command.channel_id,
            user_id: command.user_id,
            trigger_id: command.trigger_id,
        }),
        Err(_) => SlackEvent::Unsupported { event_type: "slash_commands".to_owned() },
    }
}
