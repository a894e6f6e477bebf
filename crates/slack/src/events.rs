use std::{collections::BTreeMap, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    blocks::MessageTemplate,
    commands::{parse_ticket_command, CommandParseError, SlashCommandPayload},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    SlashCommand(SlashCommandPayload),
    ReactionAdded(ReactionAddedEvent),
    BlockAction(BlockActionEvent),
    /// A workspace member edited their profile.
    UserChanged { user_id: String },
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::ReactionAdded(_) => SlackEventType::ReactionAdded,
            Self::BlockAction(_) => SlackEventType::BlockAction,
            Self::UserChanged { .. } => SlackEventType::UserChanged,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }

    /// Channel and message the event points at, for log correlation.
    pub fn location(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Self::SlashCommand(payload) => (Some(payload.channel_id.as_str()), None),
            Self::ReactionAdded(event) => {
                (Some(event.channel_id.as_str()), Some(event.message_ts.as_str()))
            }
            Self::BlockAction(event) => {
                (Some(event.channel_id.as_str()), Some(event.message_ts.as_str()))
            }
            Self::UserChanged { .. } | Self::Unsupported { .. } => (None, None),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    SlashCommand,
    ReactionAdded,
    BlockAction,
    UserChanged,
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionAddedEvent {
    pub channel_id: String,
    pub message_ts: String,
    pub reactor_user_id: String,
    pub reaction: String,
    pub item_user_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockActionEvent {
    pub channel_id: String,
    pub message_ts: String,
    pub thread_ts: Option<String>,
    pub user_id: String,
    pub action_id: String,
    pub value: Option<String>,
    /// `state.values` flattened to block id -> action id -> submitted text.
    pub state: BTreeMap<String, BTreeMap<String, String>>,
}

impl BlockActionEvent {
    pub fn input_value(&self, block_id: &str, action_id: &str) -> Option<&str> {
        self.state.get(block_id).and_then(|actions| actions.get(action_id)).map(String::as_str)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

/// Where a handler's response should land.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyTarget {
    Thread { channel_id: String, thread_ts: String },
    Replace { channel_id: String, message_ts: String },
    Channel { channel_id: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub target: ReplyTarget,
    pub message: MessageTemplate,
}

impl Reply {
    pub fn in_thread(
        channel_id: impl Into<String>,
        thread_ts: impl Into<String>,
        message: MessageTemplate,
    ) -> Self {
        Self {
            target: ReplyTarget::Thread { channel_id: channel_id.into(), thread_ts: thread_ts.into() },
            message,
        }
    }

    pub fn replacing(
        channel_id: impl Into<String>,
        message_ts: impl Into<String>,
        message: MessageTemplate,
    ) -> Self {
        Self {
            target: ReplyTarget::Replace {
                channel_id: channel_id.into(),
                message_ts: message_ts.into(),
            },
            message,
        }
    }

    pub fn in_channel(channel_id: impl Into<String>, message: MessageTemplate) -> Self {
        Self { target: ReplyTarget::Channel { channel_id: channel_id.into() }, message }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(Reply),
    Processed,
    Ignored,
}

impl From<Option<Reply>> for HandlerResult {
    fn from(reply: Option<Reply>) -> Self {
        match reply {
            Some(reply) => Self::Responded(reply),
            None => Self::Processed,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error("reaction handler failure: {0}")]
    Reaction(String),
    #[error("block action handler failure: {0}")]
    BlockAction(String),
    #[error("command handler failure: {0}")]
    Command(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Routes envelopes to the handler registered for their event type.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<SlackEventType, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.handlers.insert(handler.event_type(), Arc::new(handler));
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope, ctx).await.map_err(DispatchError::from)
    }
}

/// Registers the reaction, block action and slash command handlers against one service.
pub fn ticket_dispatcher<S>(service: Arc<S>) -> EventDispatcher
where
    S: ReactionService + BlockActionService + CommandService + ProfileService + 'static,
{
    let mut dispatcher = EventDispatcher::new();
    dispatcher.register(ReactionAddedHandler::new(service.clone()));
    dispatcher.register(BlockActionHandler::new(service.clone()));
    dispatcher.register(SlashCommandHandler::new(service.clone()));
    dispatcher.register(UserChangedHandler::new(service));
    dispatcher
}

#[async_trait]
pub trait ReactionService: Send + Sync {
    async fn handle_reaction(
        &self,
        event: &ReactionAddedEvent,
        ctx: &EventContext,
    ) -> Result<Option<Reply>, EventHandlerError>;
}

pub struct ReactionAddedHandler<S> {
    service: Arc<S>,
}

impl<S> ReactionAddedHandler<S>
where
    S: ReactionService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for ReactionAddedHandler<S>
where
    S: ReactionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::ReactionAdded
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::ReactionAdded(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        Ok(self.service.handle_reaction(event, ctx).await?.into())
    }
}

#[async_trait]
pub trait BlockActionService: Send + Sync {
    async fn handle_block_action(
        &self,
        event: &BlockActionEvent,
        ctx: &EventContext,
    ) -> Result<Option<Reply>, EventHandlerError>;
}

pub struct BlockActionHandler<S> {
    service: Arc<S>,
}

impl<S> BlockActionHandler<S>
where
    S: BlockActionService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for BlockActionHandler<S>
where
    S: BlockActionService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::BlockAction
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::BlockAction(event) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        Ok(self.service.handle_block_action(event, ctx).await?.into())
    }
}

#[async_trait]
pub trait CommandService: Send + Sync {
    async fn handle_command(
        &self,
        command: crate::commands::TicketCommand,
        payload: &SlashCommandPayload,
        ctx: &EventContext,
    ) -> Result<Reply, EventHandlerError>;
}

pub struct SlashCommandHandler<S> {
    service: Arc<S>,
}

impl<S> SlashCommandHandler<S>
where
    S: CommandService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for SlashCommandHandler<S>
where
    S: CommandService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let command = parse_ticket_command(payload)?;
        let reply = self.service.handle_command(command, payload, ctx).await?;
        Ok(HandlerResult::Responded(reply))
    }
}

#[async_trait]
pub trait ProfileService: Send + Sync {
    async fn profile_changed(&self, user_id: &str, ctx: &EventContext);
}

pub struct UserChangedHandler<S> {
    service: Arc<S>,
}

impl<S> UserChangedHandler<S>
where
    S: ProfileService,
{
    pub fn new(service: Arc<S>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl<S> EventHandler for UserChangedHandler<S>
where
    S: ProfileService + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::UserChanged
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::UserChanged { user_id } = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        self.service.profile_changed(user_id, ctx).await;
        Ok(HandlerResult::Processed)
    }
}

pub fn normalize_reaction_token(reaction: &str) -> String {
    reaction.trim().trim_matches(':').to_ascii_lowercase()
}
