//! Ticket lifecycle: create, review, close and comment capture for a chat thread.

pub mod store;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::audit::{
    AuditEvent, AuditOutcome, AuditSink, TracingAuditSink, TICKET_ACTION_REJECTED, TICKET_CLOSED,
    TICKET_COMMENTS_ADDED, TICKET_CREATED, TICKET_REVIEWED,
};
use crate::chat::ChatHistory;
use crate::directory::UserDirectory;
use crate::domain::message::{MessageTs, ThreadRef};
use crate::domain::ticket::{Comment, StatusChange, Ticket, TicketKey, TicketStatus};
use crate::errors::{DomainError, TicketError};
use crate::keys::{RandomKeyGenerator, TicketKeyGenerator};
use crate::text::{clean_message_text, ticket_title};

use self::store::{StoreError, TicketStore};

pub const DEFAULT_TITLE_MAX_CHARS: usize = 100;
pub const DEFAULT_MAX_KEY_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerSettings {
    pub title_max_chars: usize,
    pub max_key_attempts: u32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            title_max_chars: DEFAULT_TITLE_MAX_CHARS,
            max_key_attempts: DEFAULT_MAX_KEY_ATTEMPTS,
        }
    }
}

/// Status changes that can be requested on an existing ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TicketAction {
    Review,
    Close,
}

impl TicketAction {
    pub fn target_status(&self) -> TicketStatus {
        match self {
            Self::Review => TicketStatus::InReview,
            Self::Close => TicketStatus::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Review => "review",
            Self::Close => "close",
        }
    }

    fn audit_event(&self) -> &'static str {
        match self {
            Self::Review => TICKET_REVIEWED,
            Self::Close => TICKET_CLOSED,
        }
    }
}

impl fmt::Display for TicketAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketAction {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "review" => Ok(Self::Review),
            "close" => Ok(Self::Close),
            other => Err(DomainError::InvariantViolation(format!("unknown ticket action `{other}`"))),
        }
    }
}

/// Result of a comment capture. `added` is empty when nothing new was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentBatch {
    pub ticket: Ticket,
    pub added: Vec<Comment>,
}

/// One message of an exported thread, markup already cleaned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub author_name: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub text: String,
}

/// Every message of a ticket's thread, root first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadTranscript {
    pub ticket: Ticket,
    pub entries: Vec<TranscriptEntry>,
}

pub const EMPTY_MESSAGE_TEXT: &str = "[No text content]";

pub struct TicketTracker {
    store: Arc<dyn TicketStore>,
    history: Arc<dyn ChatHistory>,
    directory: Arc<UserDirectory>,
    keys: Arc<dyn TicketKeyGenerator>,
    audit: Arc<dyn AuditSink>,
    settings: TrackerSettings,
}

impl TicketTracker {
    pub fn new(
        store: Arc<dyn TicketStore>,
        history: Arc<dyn ChatHistory>,
        directory: Arc<UserDirectory>,
    ) -> Self {
        Self {
            store,
            history,
            directory,
            keys: Arc::new(RandomKeyGenerator::default()),
            audit: Arc::new(TracingAuditSink),
            settings: TrackerSettings::default(),
        }
    }

    pub fn with_keys(mut self, keys: Arc<dyn TicketKeyGenerator>) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_settings(mut self, settings: TrackerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn directory(&self) -> &Arc<UserDirectory> {
        &self.directory
    }

    pub async fn create(
        &self,
        thread: &ThreadRef,
        actor: &str,
        title_source: &str,
    ) -> Result<Ticket, TicketError> {
        if let Some(existing) = self.store.find_by_thread(thread).await? {
            return Err(self.already_exists(thread, existing.key, actor));
        }

        let title =
            ticket_title(title_source, &self.directory, self.settings.title_max_chars).await;
        let attempts = self.settings.max_key_attempts.max(1);
        for attempt in 1..=attempts {
            let key = self.keys.next_key();
            if self.store.find_by_key(&key).await?.is_some() {
                warn!(
                    event_name = "tracker.ticket.key_collision",
                    ticket_key = %key,
                    attempt,
                    "ticket key already taken"
                );
                continue;
            }

            let ticket = Ticket::open(key, thread.clone(), title.clone(), actor, Utc::now());
            match self.store.insert(&ticket).await {
                Ok(()) => {
                    info!(
                        event_name = "tracker.ticket.created",
                        ticket_key = %ticket.key,
                        channel_id = %thread.channel_id,
                        thread_id = %thread.thread_ts,
                        actor,
                        "ticket created"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            Some(ticket.key.clone()),
                            thread.clone(),
                            TICKET_CREATED,
                            actor,
                            AuditOutcome::Success,
                        )
                        .with_metadata("title", ticket.title.clone()),
                    );
                    return Ok(ticket);
                }
                Err(StoreError::DuplicateKey(key)) => {
                    warn!(
                        event_name = "tracker.ticket.key_collision",
                        ticket_key = %key,
                        attempt,
                        "ticket key lost to a concurrent insert"
                    );
                }
                Err(StoreError::ThreadAlreadyBound { .. }) => {
                    let existing = self.store.find_by_thread(thread).await?;
                    return match existing {
                        Some(existing) => Err(self.already_exists(thread, existing.key, actor)),
                        None => Err(StoreError::Backend(
                            "thread binding exists without a ticket".to_owned(),
                        )
                        .into()),
                    };
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(TicketError::KeyExhausted { attempts })
    }

    pub async fn review(
        &self,
        thread: &ThreadRef,
        actor: &str,
        summary: Option<String>,
    ) -> Result<Ticket, TicketError> {
        self.transition(thread, TicketAction::Review, actor, summary).await
    }

    pub async fn close(
        &self,
        thread: &ThreadRef,
        actor: &str,
        summary: Option<String>,
    ) -> Result<Ticket, TicketError> {
        self.transition(thread, TicketAction::Close, actor, summary).await
    }

    pub async fn apply(
        &self,
        action: TicketAction,
        thread: &ThreadRef,
        actor: &str,
        summary: Option<String>,
    ) -> Result<Ticket, TicketError> {
        self.transition(thread, action, actor, summary).await
    }

    /// Read-only check that `action` would currently succeed.
    pub async fn preflight(
        &self,
        thread: &ThreadRef,
        action: TicketAction,
    ) -> Result<Ticket, TicketError> {
        let ticket = self.store.find_by_thread(thread).await?.ok_or(TicketError::NotFound)?;
        let to = action.target_status();
        if !ticket.can_transition_to(to) {
            return Err(TicketError::InvalidTransition { key: ticket.key, from: ticket.status, to });
        }
        Ok(ticket)
    }

    async fn transition(
        &self,
        thread: &ThreadRef,
        action: TicketAction,
        actor: &str,
        summary: Option<String>,
    ) -> Result<Ticket, TicketError> {
        let Some(mut ticket) = self.store.find_by_thread(thread).await? else {
            return Err(self.reject(thread, None, actor, action.as_str(), TicketError::NotFound));
        };

        let from = ticket.status;
        let change = StatusChange::new(actor, Utc::now(), summary);
        let applied = match action {
            TicketAction::Review => ticket.mark_in_review(change),
            TicketAction::Close => ticket.close(change),
        };
        if applied.is_err() {
            let key = ticket.key.clone();
            let error = TicketError::InvalidTransition { key, from, to: action.target_status() };
            return Err(self.reject(thread, Some(&ticket.key), actor, action.as_str(), error));
        }

        ticket.revision += 1;
        self.save(&ticket).await?;

        info!(
            event_name = "tracker.ticket.transitioned",
            ticket_key = %ticket.key,
            thread_id = %thread.thread_ts,
            action = action.as_str(),
            from = from.as_str(),
            to = ticket.status.as_str(),
            actor,
            "ticket status changed"
        );
        let mut event = AuditEvent::new(
            Some(ticket.key.clone()),
            thread.clone(),
            action.audit_event(),
            actor,
            AuditOutcome::Success,
        )
        .with_metadata("from", from.label())
        .with_metadata("to", ticket.status.label());
        let summary = match action {
            TicketAction::Review => ticket.review.as_ref(),
            TicketAction::Close => ticket.closure.as_ref(),
        }
        .and_then(|change| change.summary.clone());
        if let Some(summary) = summary {
            event = event.with_metadata("summary", summary);
        }
        self.audit.emit(event);

        Ok(ticket)
    }

    /// Captures thread replies after the high-water mark up to and including `upto`.
    pub async fn add_comments(
        &self,
        thread: &ThreadRef,
        upto: &MessageTs,
        actor: &str,
    ) -> Result<CommentBatch, TicketError> {
        let Some(mut ticket) = self.store.find_by_thread(thread).await? else {
            return Err(self.reject(thread, None, actor, "comment", TicketError::NotFound));
        };

        let bot_user_id = match self.directory.bot_user_id().await {
            Ok(id) => Some(id),
            Err(error) => {
                warn!(
                    event_name = "tracker.comments.bot_id_unavailable",
                    ticket_key = %ticket.key,
                    error = %error,
                    "could not resolve bot user id; filtering on bot_id only"
                );
                None
            }
        };

        let messages = self.history.fetch_thread(&thread.channel_id, &thread.thread_ts).await?;
        let mut added = Vec::new();
        for message in messages {
            if message.ts == thread.thread_ts
                || message.ts > *upto
                || !ticket.is_uncaptured(&message.ts)
                || message.authored_by_bot(bot_user_id.as_deref())
            {
                continue;
            }

            let author_id = message.user_id.clone().unwrap_or_else(|| "unknown".to_owned());
            let author_name = self.directory.display_name(&author_id).await;
            let text = clean_message_text(&message.text, &self.directory).await;
            added.push(Comment {
                author_id,
                author_name,
                text,
                posted_at: message.ts.to_datetime(),
                source_ts: message.ts,
            });
        }

        if added.is_empty() {
            info!(
                event_name = "tracker.comments.none_new",
                ticket_key = %ticket.key,
                thread_id = %thread.thread_ts,
                upto = %upto,
                "no new replies to capture"
            );
            return Ok(CommentBatch { ticket, added });
        }

        ticket.append_comments(added.clone(), upto.clone());
        ticket.revision += 1;
        self.save(&ticket).await?;

        info!(
            event_name = "tracker.comments.added",
            ticket_key = %ticket.key,
            thread_id = %thread.thread_ts,
            added = added.len(),
            actor,
            "thread replies captured as comments"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(ticket.key.clone()),
                thread.clone(),
                TICKET_COMMENTS_ADDED,
                actor,
                AuditOutcome::Success,
            )
            .with_metadata("count", added.len().to_string())
            .with_metadata("upto", upto.to_string()),
        );

        Ok(CommentBatch { ticket, added })
    }

    /// Reads the whole thread behind `key` for export. Bot messages are kept.
    pub async fn transcript(&self, key: &TicketKey) -> Result<ThreadTranscript, TicketError> {
        let ticket = self.store.find_by_key(key).await?.ok_or(TicketError::NotFound)?;
        let mut messages =
            self.history.fetch_thread(&ticket.thread.channel_id, &ticket.thread.thread_ts).await?;
        messages.sort_by(|left, right| left.ts.cmp(&right.ts));

        let mut entries = Vec::with_capacity(messages.len());
        for message in messages {
            let author_name = match (&message.user_id, &message.bot_id) {
                (Some(user_id), _) => self.directory.display_name(user_id).await,
                (None, Some(bot_id)) => format!("Bot {bot_id}"),
                (None, None) => "Unknown User".to_owned(),
            };
            let text = clean_message_text(&message.text, &self.directory).await;
            entries.push(TranscriptEntry {
                author_name,
                posted_at: message.ts.to_datetime(),
                text: if text.is_empty() { EMPTY_MESSAGE_TEXT.to_owned() } else { text },
            });
        }

        info!(
            event_name = "tracker.ticket.transcript_read",
            ticket_key = %ticket.key,
            thread_id = %ticket.thread.thread_ts,
            messages = entries.len(),
            "thread transcript assembled"
        );
        Ok(ThreadTranscript { ticket, entries })
    }

    pub async fn find_by_thread(&self, thread: &ThreadRef) -> Result<Option<Ticket>, TicketError> {
        Ok(self.store.find_by_thread(thread).await?)
    }

    pub async fn find_by_key(&self, key: &TicketKey) -> Result<Option<Ticket>, TicketError> {
        Ok(self.store.find_by_key(key).await?)
    }

    pub async fn list(
        &self,
        status: Option<TicketStatus>,
        limit: usize,
    ) -> Result<Vec<Ticket>, TicketError> {
        Ok(self.store.list(status, limit).await?)
    }

    async fn save(&self, ticket: &Ticket) -> Result<(), TicketError> {
        if self.store.update(ticket).await? {
            return Ok(());
        }

        warn!(
            event_name = "tracker.ticket.conflict",
            ticket_key = %ticket.key,
            revision = ticket.revision,
            "ticket changed underneath this update"
        );
        Err(TicketError::Conflict { key: ticket.key.clone() })
    }

    fn already_exists(&self, thread: &ThreadRef, key: TicketKey, actor: &str) -> TicketError {
        let scoped = key.clone();
        self.reject(thread, Some(&scoped), actor, "create", TicketError::AlreadyExists { key })
    }

    fn reject(
        &self,
        thread: &ThreadRef,
        key: Option<&TicketKey>,
        actor: &str,
        action: &str,
        error: TicketError,
    ) -> TicketError {
        info!(
            event_name = "tracker.ticket.rejected",
            ticket_key = key.map(|key| key.0.as_str()).unwrap_or("-"),
            thread_id = %thread.thread_ts,
            action,
            reason = %error,
            "ticket action rejected"
        );
        self.audit.emit(
            AuditEvent::new(
                key.cloned(),
                thread.clone(),
                TICKET_ACTION_REJECTED,
                actor,
                AuditOutcome::Rejected,
            )
            .with_metadata("action", action)
            .with_metadata("reason", error.to_string()),
        );
        error
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::store::{StoreError, TicketStore};
    use super::{TicketAction, TicketTracker};
    use crate::audit::{InMemoryAuditSink, TICKET_ACTION_REJECTED, TICKET_CREATED};
    use crate::chat::InMemoryChat;
    use crate::directory::UserDirectory;
    use crate::domain::message::{MessageTs, ThreadRef, UserProfile};
    use crate::domain::ticket::{Ticket, TicketKey, TicketStatus};
    use crate::errors::TicketError;
    use crate::keys::SequenceKeyGenerator;

    #[derive(Default)]
    struct MapStore {
        tickets: Mutex<HashMap<TicketKey, Ticket>>,
        stale_updates: bool,
    }

    impl MapStore {
        fn tickets(&self) -> std::sync::MutexGuard<'_, HashMap<TicketKey, Ticket>> {
            self.tickets.lock().expect("store lock")
        }
    }

    #[async_trait]
    impl TicketStore for MapStore {
        async fn find_by_thread(&self, thread: &ThreadRef) -> Result<Option<Ticket>, StoreError> {
            Ok(self.tickets().values().find(|ticket| &ticket.thread == thread).cloned())
        }

        async fn find_by_key(&self, key: &TicketKey) -> Result<Option<Ticket>, StoreError> {
            Ok(self.tickets().get(key).cloned())
        }

        async fn list(
            &self,
            status: Option<TicketStatus>,
            limit: usize,
        ) -> Result<Vec<Ticket>, StoreError> {
            Ok(self
                .tickets()
                .values()
                .filter(|ticket| status.map_or(true, |status| ticket.status == status))
                .take(limit)
                .cloned()
                .collect())
        }

        async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError> {
            let mut tickets = self.tickets();
            if tickets.contains_key(&ticket.key) {
                return Err(StoreError::DuplicateKey(ticket.key.clone()));
            }
            tickets.insert(ticket.key.clone(), ticket.clone());
            Ok(())
        }

        async fn update(&self, ticket: &Ticket) -> Result<bool, StoreError> {
            if self.stale_updates {
                return Ok(false);
            }
            let mut tickets = self.tickets();
            match tickets.get(&ticket.key) {
                Some(stored) if stored.revision + 1 == ticket.revision => {
                    tickets.insert(ticket.key.clone(), ticket.clone());
                    Ok(true)
                }
                _ => Ok(false),
            }
        }
    }

    struct Harness {
        tracker: TicketTracker,
        chat: Arc<InMemoryChat>,
        audit: InMemoryAuditSink,
    }

    fn harness_with(store: MapStore, keys: Vec<&str>) -> Harness {
        let chat = Arc::new(InMemoryChat::new("UBOT"));
        chat.add_user(UserProfile {
            id: "U2".to_owned(),
            name: Some("bob".to_owned()),
            real_name: Some("Bob Stone".to_owned()),
            display_name: None,
        });
        chat.post_root("C1", "1000.000000", "U1", "Printer <@U2> is on fire");
        let directory = Arc::new(UserDirectory::new(chat.clone(), 16));
        let audit = InMemoryAuditSink::default();
        let tracker = TicketTracker::new(Arc::new(store), chat.clone(), directory)
            .with_keys(Arc::new(SequenceKeyGenerator::new(keys)))
            .with_audit(Arc::new(audit.clone()));
        Harness { tracker, chat, audit }
    }

    fn harness() -> Harness {
        harness_with(MapStore::default(), vec!["MOCK-OPS-111111"])
    }

    fn thread() -> ThreadRef {
        ThreadRef::new("C1", "1000.000000")
    }

    #[tokio::test]
    async fn create_twice_yields_one_ticket() {
        let h = harness();
        let ticket = h.tracker.create(&thread(), "U1", "Printer <@U2> is on fire").await.expect("create");
        assert_eq!(ticket.key.0, "MOCK-OPS-111111");
        assert_eq!(ticket.status, TicketStatus::Open);
        assert_eq!(ticket.title, "Printer @Bob Stone is on fire");

        let second = h.tracker.create(&thread(), "U1", "again").await;
        assert_eq!(second, Err(TicketError::AlreadyExists { key: ticket.key.clone() }));
        assert_eq!(h.tracker.list(None, 10).await.expect("list").len(), 1);
        assert_eq!(h.audit.event_types(), vec![TICKET_CREATED, TICKET_ACTION_REJECTED]);
    }

    #[tokio::test]
    async fn key_collisions_are_retried() {
        let h = harness_with(MapStore::default(), vec!["K-1", "K-1", "K-2"]);
        h.tracker.create(&ThreadRef::new("C1", "1.0"), "U1", "first").await.expect("first");
        let second = h.tracker.create(&ThreadRef::new("C1", "2.0"), "U1", "second").await.expect("second");
        assert_eq!(second.key.0, "K-2");
    }

    #[tokio::test]
    async fn key_allocation_gives_up_after_bounded_attempts() {
        let h = harness_with(MapStore::default(), vec!["K-1"]);
        h.tracker.create(&ThreadRef::new("C1", "1.0"), "U1", "first").await.expect("first");
        let error = h.tracker.create(&ThreadRef::new("C1", "2.0"), "U1", "second").await;
        assert_eq!(error, Err(TicketError::KeyExhausted { attempts: 5 }));
    }

    #[tokio::test]
    async fn review_then_close_then_close_again() {
        let h = harness();
        h.tracker.create(&thread(), "U1", "title").await.expect("create");

        let reviewed =
            h.tracker.review(&thread(), "U2", Some("looks good".to_owned())).await.expect("review");
        assert_eq!(reviewed.status, TicketStatus::InReview);
        assert_eq!(reviewed.revision, 1);

        let closed = h.tracker.close(&thread(), "U3", Some("done".to_owned())).await.expect("close");
        assert_eq!(closed.status, TicketStatus::Closed);
        assert_eq!(closed.closure.as_ref().and_then(|c| c.summary.as_deref()), Some("done"));

        let again = h.tracker.close(&thread(), "U3", None).await;
        assert!(matches!(
            again,
            Err(TicketError::InvalidTransition { from: TicketStatus::Closed, to: TicketStatus::Closed, .. })
        ));
        let stored = h.tracker.find_by_thread(&thread()).await.expect("find").expect("ticket");
        assert_eq!(stored.status, TicketStatus::Closed);
        assert_eq!(stored.revision, 2);
    }

    #[tokio::test]
    async fn review_without_ticket_is_not_found() {
        let h = harness();
        assert_eq!(h.tracker.review(&thread(), "U1", None).await, Err(TicketError::NotFound));
        assert_eq!(h.tracker.preflight(&thread(), TicketAction::Close).await, Err(TicketError::NotFound));
    }

    #[tokio::test]
    async fn preflight_matches_mutation_outcome_without_writing() {
        let h = harness();
        h.tracker.create(&thread(), "U1", "title").await.expect("create");
        h.tracker.preflight(&thread(), TicketAction::Review).await.expect("review allowed");
        h.tracker.review(&thread(), "U1", None).await.expect("review");

        let error = h.tracker.preflight(&thread(), TicketAction::Review).await;
        assert!(matches!(error, Err(TicketError::InvalidTransition { .. })));
        let stored = h.tracker.find_by_thread(&thread()).await.expect("find").expect("ticket");
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn stale_revision_surfaces_conflict() {
        let store = MapStore { stale_updates: true, ..MapStore::default() };
        let h = harness_with(store, vec!["K-1"]);
        h.tracker.create(&thread(), "U1", "title").await.expect("create");
        let error = h.tracker.close(&thread(), "U1", None).await;
        assert_eq!(error, Err(TicketError::Conflict { key: TicketKey("K-1".to_owned()) }));
    }

    #[tokio::test]
    async fn comments_capture_window_and_replay_is_idempotent() {
        let h = harness();
        h.tracker.create(&thread(), "U1", "title").await.expect("create");
        h.chat.post_reply("C1", "1000.000000", "1001.000000", "U2", "first reply");
        h.chat.post_reply("C1", "1000.000000", "1002.000000", "UBOT", "bot noise");
        h.chat.post_reply("C1", "1000.000000", "1003.000000", "U2", "third   reply");
        h.chat.post_reply("C1", "1000.000000", "1004.000000", "U2", "after the reaction");

        let upto = MessageTs::from("1003.000000");
        let batch = h.tracker.add_comments(&thread(), &upto, "U2").await.expect("comments");
        let texts: Vec<&str> = batch.added.iter().map(|comment| comment.text.as_str()).collect();
        assert_eq!(texts, vec!["first reply", "third reply"]);
        assert_eq!(batch.added[0].author_name, "Bob Stone");
        assert_eq!(batch.ticket.last_comment_ts, Some(upto.clone()));

        let replay = h.tracker.add_comments(&thread(), &upto, "U2").await.expect("replay");
        assert!(replay.added.is_empty());
        assert_eq!(replay.ticket.comments.len(), 2);

        let later = h
            .tracker
            .add_comments(&thread(), &MessageTs::from("1004.000000"), "U2")
            .await
            .expect("later");
        assert_eq!(later.added.len(), 1);
        assert_eq!(later.ticket.comments.len(), 3);
    }

    #[tokio::test]
    async fn comments_without_ticket_record_nothing() {
        let h = harness();
        h.chat.post_reply("C1", "1000.000000", "1001.000000", "U2", "reply");
        let error = h.tracker.add_comments(&thread(), &MessageTs::from("1001.000000"), "U2").await;
        assert_eq!(error, Err(TicketError::NotFound));
        assert!(h.tracker.find_by_thread(&thread()).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn comments_on_closed_ticket_are_still_captured() {
        let h = harness();
        h.tracker.create(&thread(), "U1", "title").await.expect("create");
        h.tracker.close(&thread(), "U1", None).await.expect("close");
        h.chat.post_reply("C1", "1000.000000", "1001.000000", "U2", "post-mortem note");

        let batch = h
            .tracker
            .add_comments(&thread(), &MessageTs::from("1001.000000"), "U2")
            .await
            .expect("comments");
        assert_eq!(batch.added.len(), 1);
        assert_eq!(batch.ticket.status, TicketStatus::Closed);
    }

    #[tokio::test]
    async fn transcript_lists_whole_thread_with_clean_text() {
        let h = harness();
        let ticket = h.tracker.create(&thread(), "U1", "title").await.expect("create");
        h.chat.post_reply("C1", "1000.000000", "1002.000000", "UBOT", "<@U2> captured");
        h.chat.post_reply("C1", "1000.000000", "1001.000000", "U2", "  ");

        let transcript = h.tracker.transcript(&ticket.key).await.expect("transcript");

        let lines: Vec<(&str, &str)> = transcript
            .entries
            .iter()
            .map(|entry| (entry.author_name.as_str(), entry.text.as_str()))
            .collect();
        assert_eq!(
            lines,
            vec![
                ("User U1", "Printer @Bob Stone is on fire"),
                ("Bob Stone", "[No text content]"),
                ("User UBOT", "@Bob Stone captured"),
            ]
        );
        assert!(transcript.entries[0].posted_at.is_some());
    }

    #[tokio::test]
    async fn transcript_for_unknown_key_is_not_found() {
        let h = harness();
        let missing = h.tracker.transcript(&TicketKey("MOCK-OPS-000000".to_owned())).await;
        assert_eq!(missing, Err(TicketError::NotFound));
    }

    #[test]
    fn actions_parse_from_button_values() {
        assert_eq!("review".parse::<TicketAction>().expect("review"), TicketAction::Review);
        assert_eq!("close".parse::<TicketAction>().expect("close"), TicketAction::Close);
        assert!("reopen".parse::<TicketAction>().is_err());
    }
}
