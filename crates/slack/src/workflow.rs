//! Reaction-driven ticket workflow.
//!
//! Turns `reaction_added`, summary form `block_actions` and `/ticket` commands into
//! [`TicketTracker`] calls and renders every outcome, including lifecycle errors, as a
//! reply for the thread. Nothing here returns a lifecycle error to the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use mockops_core::chat::ChatHistory;
use mockops_core::classifier::MessageClassifier;
use mockops_core::config::TrackerConfig;
use mockops_core::domain::message::{MessageTs, ThreadRef};
use mockops_core::domain::ticket::{Ticket, TicketKey, TicketStatus};
use mockops_core::errors::TicketError;
use mockops_core::text::truncate_chars;
use mockops_core::tracker::{TicketAction, TicketTracker};

use crate::blocks::{
    self, error_message, notice_message, MessageTemplate, LIST_MAX_ROWS, SUMMARY_BLOCK_ID,
    SUMMARY_CANCEL_ACTION, SUMMARY_INPUT_ID, SUMMARY_MAX_CHARS, SUMMARY_SUBMIT_ACTION,
};
use crate::commands::{SlashCommandPayload, TicketCommand, TICKET_COMMAND};
use crate::events::{
    normalize_reaction_token, BlockActionEvent, BlockActionService, CommandService,
    EventContext, EventHandlerError, ProfileService, ReactionAddedEvent, ReactionService, Reply,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReactionKind {
    Create,
    Review,
    Close,
    Comment,
}

impl ReactionKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Review => "review",
            Self::Close => "close",
            Self::Comment => "comment",
        }
    }
}

pub struct TicketWorkflow {
    tracker: Arc<TicketTracker>,
    classifier: MessageClassifier,
    config: TrackerConfig,
}

impl TicketWorkflow {
    pub fn new(
        tracker: Arc<TicketTracker>,
        history: Arc<dyn ChatHistory>,
        config: TrackerConfig,
    ) -> Self {
        Self { tracker, classifier: MessageClassifier::new(history), config }
    }

    pub fn tracker(&self) -> &Arc<TicketTracker> {
        &self.tracker
    }

    pub fn reaction_kind(&self, reaction: &str) -> Option<ReactionKind> {
        let reaction = normalize_reaction_token(reaction);
        let names = &self.config.reactions;
        [
            (&names.create, ReactionKind::Create),
            (&names.review, ReactionKind::Review),
            (&names.close, ReactionKind::Close),
            (&names.comment, ReactionKind::Comment),
        ]
        .into_iter()
        .find(|(name, _)| normalize_reaction_token(name) == reaction)
        .map(|(_, kind)| kind)
    }

    fn browse_url(&self, ticket: &Ticket) -> String {
        self.config.browse_url(&ticket.key.0)
    }

    async fn reacted_by_bot(&self, user_id: &str) -> bool {
        match self.tracker.directory().bot_user_id().await {
            Ok(bot_user_id) => bot_user_id == user_id,
            Err(_) => false,
        }
    }

    async fn create(&self, thread: &ThreadRef, actor: &str, title_source: &str) -> MessageTemplate {
        match self.tracker.create(thread, actor, title_source).await {
            Ok(ticket) => blocks::ticket_created_message(
                &ticket,
                &self.browse_url(&ticket),
                &self.config.reactions,
            ),
            Err(error) => self.render_error(&error, None),
        }
    }

    async fn transition(
        &self,
        thread: &ThreadRef,
        action: TicketAction,
        actor: &str,
        summary: Option<String>,
        ctx: &EventContext,
    ) -> MessageTemplate {
        match self.tracker.apply(action, thread, actor, summary).await {
            Ok(ticket) => blocks::ticket_transition_message(&ticket, &self.browse_url(&ticket)),
            Err(error) => self.render_error(&error, Some(ctx)),
        }
    }

    async fn request_summary(
        &self,
        thread: &ThreadRef,
        action: TicketAction,
        ctx: &EventContext,
    ) -> MessageTemplate {
        match self.tracker.preflight(thread, action).await {
            Ok(ticket) => blocks::summary_form_message(&ticket, action, &form_value(action, thread)),
            Err(error) => self.render_error(&error, Some(ctx)),
        }
    }

    async fn capture_comments(
        &self,
        thread: &ThreadRef,
        upto: &MessageTs,
        actor: &str,
        ctx: &EventContext,
    ) -> MessageTemplate {
        match self.tracker.add_comments(thread, upto, actor).await {
            Ok(batch) if batch.added.is_empty() => notice_message(
                "ticket.comments.none.v1",
                &format!(":information_source: No new replies to add to {}.", batch.ticket.key),
            ),
            Ok(batch) => blocks::comments_added_message(
                &batch.ticket,
                &batch.added,
                &self.browse_url(&batch.ticket),
            ),
            Err(error) => self.render_error(&error, Some(ctx)),
        }
    }

    /// Lifecycle errors become friendly notices; anything else gets the generic error card.
    fn render_error(&self, error: &TicketError, ctx: Option<&EventContext>) -> MessageTemplate {
        let reactions = &self.config.reactions;
        let text = match error {
            TicketError::NotFound => format!(
                ":mag: No ticket found for this thread. Create one with the :{}: reaction on \
                 the thread's first message first.",
                reactions.create
            ),
            TicketError::AlreadyExists { key } => format!(
                ":exclamation: Ticket <{}|{key}> already exists for this thread.",
                self.config.browse_url(&key.0)
            ),
            TicketError::InvalidTransition { key, from: TicketStatus::Closed, .. } => {
                format!(":lock: {key} is already closed.")
            }
            TicketError::InvalidTransition { key, from, to } if from == to => {
                format!(":hourglass_flowing_sand: {key} is already {}.", from.label())
            }
            TicketError::InvalidTransition { key, from, to } => format!(
                ":no_entry: {key} cannot move from {} to {}.",
                from.label(),
                to.label()
            ),
            TicketError::Conflict { key } => format!(
                ":twisted_rightwards_arrows: {key} was updated by someone else at the same \
                 moment. React again to retry."
            ),
            other => {
                let correlation_id = ctx
                    .map(|ctx| ctx.correlation_id.as_str())
                    .unwrap_or("unknown-correlation-id");
                warn!(
                    event_name = "workflow.ticket.operation_failed",
                    correlation_id,
                    error = %other,
                    "ticket operation failed"
                );
                return error_message(other.user_message(), correlation_id);
            }
        };
        notice_message("ticket.error.notice.v1", &text)
    }
}

#[async_trait]
impl ProfileService for TicketWorkflow {
    async fn profile_changed(&self, user_id: &str, ctx: &EventContext) {
        let evicted = self.tracker.directory().invalidate(user_id);
        debug!(
            event_name = "workflow.directory.invalidated",
            correlation_id = %ctx.correlation_id,
            user_id,
            evicted,
            "profile change dropped cached display name"
        );
    }
}

#[async_trait]
impl ReactionService for TicketWorkflow {
    async fn handle_reaction(
        &self,
        event: &ReactionAddedEvent,
        ctx: &EventContext,
    ) -> Result<Option<Reply>, EventHandlerError> {
        let Some(kind) = self.reaction_kind(&event.reaction) else {
            debug!(reaction = %event.reaction, "reaction is not a ticket action");
            return Ok(None);
        };
        if self.reacted_by_bot(&event.reactor_user_id).await {
            debug!(reaction = %event.reaction, "ignoring reaction added by the bot");
            return Ok(None);
        }

        let ts = MessageTs::from(event.message_ts.as_str());
        let classification = self.classifier.classify(&event.channel_id, &ts).await;
        let thread =
            ThreadRef::new(event.channel_id.clone(), classification.kind.thread_ts(&ts).clone());
        let actor = event.reactor_user_id.as_str();

        info!(
            event_name = "workflow.ticket.reaction_received",
            correlation_id = %ctx.correlation_id,
            action = kind.as_str(),
            channel_id = %thread.channel_id,
            thread_id = %thread.thread_ts,
            message_ts = %ts,
            is_root = classification.kind.is_root(),
            actor,
            "ticket reaction received"
        );

        let message = match kind {
            ReactionKind::Create if !classification.kind.is_root() => notice_message(
                "ticket.create.reply_rejected.v1",
                ":point_up: Tickets can only be created from the first message of a thread.",
            ),
            ReactionKind::Create => {
                let title_source =
                    classification.message.as_ref().map(|message| message.text.as_str()).unwrap_or("");
                self.create(&thread, actor, title_source).await
            }
            ReactionKind::Review | ReactionKind::Close => {
                let action = if kind == ReactionKind::Review {
                    TicketAction::Review
                } else {
                    TicketAction::Close
                };
                if self.config.summary_form {
                    self.request_summary(&thread, action, ctx).await
                } else {
                    self.transition(&thread, action, actor, None, ctx).await
                }
            }
            ReactionKind::Comment if classification.kind.is_root() => notice_message(
                "ticket.comments.root_rejected.v1",
                &format!(
                    ":point_down: React with :{}: on a reply to capture comments; the thread's \
                     first message is the ticket itself.",
                    self.config.reactions.comment
                ),
            ),
            ReactionKind::Comment => self.capture_comments(&thread, &ts, actor, ctx).await,
        };

        Ok(Some(Reply::in_thread(thread.channel_id.clone(), thread.thread_ts.to_string(), message)))
    }
}

#[async_trait]
impl BlockActionService for TicketWorkflow {
    async fn handle_block_action(
        &self,
        event: &BlockActionEvent,
        ctx: &EventContext,
    ) -> Result<Option<Reply>, EventHandlerError> {
        let submitted = match event.action_id.as_str() {
            SUMMARY_SUBMIT_ACTION => true,
            SUMMARY_CANCEL_ACTION => false,
            _ => return Ok(None),
        };
        let Some((action, thread)) = event.value.as_deref().and_then(parse_form_value) else {
            return Err(EventHandlerError::BlockAction(format!(
                "malformed summary form value on `{}`",
                event.action_id
            )));
        };

        info!(
            event_name = "workflow.ticket.summary_form",
            correlation_id = %ctx.correlation_id,
            action = action.as_str(),
            submitted,
            thread_id = %thread.thread_ts,
            actor = %event.user_id,
            "summary form action received"
        );

        if !submitted {
            return Ok(Some(Reply::replacing(
                event.channel_id.clone(),
                event.message_ts.clone(),
                blocks::form_cancelled_message(action),
            )));
        }

        let summary = event
            .input_value(SUMMARY_BLOCK_ID, SUMMARY_INPUT_ID)
            .map(str::trim)
            .filter(|summary| !summary.is_empty())
            .map(|summary| truncate_chars(summary, SUMMARY_MAX_CHARS));
        let Some(summary) = summary else {
            return Ok(Some(Reply::in_thread(
                thread.channel_id.clone(),
                thread.thread_ts.to_string(),
                notice_message(
                    "ticket.summary.missing.v1",
                    ":warning: Please enter a summary before submitting.",
                ),
            )));
        };

        let message = self.transition(&thread, action, &event.user_id, Some(summary), ctx).await;
        Ok(Some(Reply::replacing(event.channel_id.clone(), event.message_ts.clone(), message)))
    }
}

#[async_trait]
impl CommandService for TicketWorkflow {
    async fn handle_command(
        &self,
        command: TicketCommand,
        payload: &SlashCommandPayload,
        ctx: &EventContext,
    ) -> Result<Reply, EventHandlerError> {
        info!(
            event_name = "workflow.ticket.command",
            correlation_id = %ctx.correlation_id,
            channel_id = %payload.channel_id,
            actor = %payload.user_id,
            command = ?command,
            "ticket command received"
        );

        let message = match command {
            TicketCommand::Export { key } => match self.tracker.transcript(&key).await {
                Ok(transcript) => {
                    let thread = transcript.ticket.thread.clone();
                    let message = blocks::thread_transcript_message(
                        &transcript,
                        &self.browse_url(&transcript.ticket),
                    );
                    return Ok(Reply::in_thread(
                        thread.channel_id,
                        thread.thread_ts.to_string(),
                        message,
                    ));
                }
                Err(TicketError::NotFound) => missing_key_message(&key),
                Err(error) => self.render_error(&error, Some(ctx)),
            },
            TicketCommand::Show { key } => match self.tracker.find_by_key(&key).await {
                Ok(Some(ticket)) => blocks::ticket_detail_message(&ticket, &self.browse_url(&ticket)),
                Ok(None) => missing_key_message(&key),
                Err(error) => self.render_error(&error, Some(ctx)),
            },
            TicketCommand::List { status } => match self.tracker.list(status, LIST_MAX_ROWS).await {
                Ok(tickets) => {
                    blocks::ticket_list_message(&tickets, status, |ticket| self.browse_url(ticket))
                }
                Err(error) => self.render_error(&error, Some(ctx)),
            },
            TicketCommand::Help => blocks::help_message(TICKET_COMMAND, &self.config.reactions),
            TicketCommand::Invalid { reason } => notice_message(
                "ticket.command.invalid.v1",
                &format!(":warning: {reason}. Try `{TICKET_COMMAND} help`."),
            ),
        };
        Ok(Reply::in_channel(payload.channel_id.clone(), message))
    }
}

fn missing_key_message(key: &TicketKey) -> MessageTemplate {
    notice_message("ticket.show.missing.v1", &format!(":mag: No ticket with key {key}."))
}

/// Button value carried by the summary form: `<action>|<channel>|<thread_ts>`.
pub fn form_value(action: TicketAction, thread: &ThreadRef) -> String {
    format!("{}|{}|{}", action.as_str(), thread.channel_id, thread.thread_ts)
}

pub fn parse_form_value(value: &str) -> Option<(TicketAction, ThreadRef)> {
    let mut parts = value.splitn(3, '|');
    let action = parts.next()?.parse::<TicketAction>().ok()?;
    let channel_id = parts.next().filter(|part| !part.is_empty())?;
    let thread_ts = parts.next().filter(|part| !part.is_empty())?;
    Some((action, ThreadRef::new(channel_id, thread_ts)))
}
