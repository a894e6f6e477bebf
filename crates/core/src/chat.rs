//! Read-side view of the chat backend used by the lifecycle manager.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::message::{ChatMessage, MessageTs, UserProfile};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("chat backend is not configured")]
    Unavailable,
    #[error("rate limited by chat backend (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },
    #[error("{method} failed: {error}")]
    Api { method: String, error: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl ChatError {
    pub fn api(method: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Api { method: method.into(), error: error.into() }
    }
}

#[async_trait]
pub trait ChatHistory: Send + Sync {
    /// Looks up a single message by its timestamp. `Ok(None)` means the backend
    /// answered but did not return that message.
    async fn fetch_message(
        &self,
        channel_id: &str,
        ts: &MessageTs,
    ) -> Result<Option<ChatMessage>, ChatError>;

    /// Every message in the thread rooted at `root_ts`, root first.
    async fn fetch_thread(
        &self,
        channel_id: &str,
        root_ts: &MessageTs,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, ChatError>;

    async fn bot_user_id(&self) -> Result<String, ChatError>;
}

/// Backend used when no Slack client is configured. Every call fails safe.
#[derive(Clone, Debug, Default)]
pub struct DisconnectedChat;

#[async_trait]
impl ChatHistory for DisconnectedChat {
    async fn fetch_message(
        &self,
        _channel_id: &str,
        _ts: &MessageTs,
    ) -> Result<Option<ChatMessage>, ChatError> {
        Err(ChatError::Unavailable)
    }

    async fn fetch_thread(
        &self,
        _channel_id: &str,
        _root_ts: &MessageTs,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        Err(ChatError::Unavailable)
    }

    async fn fetch_user(&self, _user_id: &str) -> Result<Option<UserProfile>, ChatError> {
        Err(ChatError::Unavailable)
    }

    async fn bot_user_id(&self) -> Result<String, ChatError> {
        Err(ChatError::Unavailable)
    }
}

/// In-process chat backend holding channel messages and user profiles.
///
/// Backs the lifecycle tests in every crate.
#[derive(Default)]
pub struct InMemoryChat {
    state: Mutex<InMemoryChatState>,
}

#[derive(Default)]
struct InMemoryChatState {
    messages: HashMap<String, Vec<ChatMessage>>,
    users: HashMap<String, UserProfile>,
    bot_user_id: Option<String>,
    failure: Option<ChatError>,
    user_lookups: usize,
}

impl InMemoryChat {
    pub fn new(bot_user_id: impl Into<String>) -> Self {
        let chat = Self::default();
        chat.with_state(|state| state.bot_user_id = Some(bot_user_id.into()));
        chat
    }

    fn with_state<T>(&self, apply: impl FnOnce(&mut InMemoryChatState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => apply(&mut *state),
            Err(poisoned) => apply(&mut *poisoned.into_inner()),
        }
    }

    pub fn post(&self, channel_id: &str, message: ChatMessage) {
        self.with_state(|state| {
            let channel = state.messages.entry(channel_id.to_owned()).or_default();
            channel.push(message);
            channel.sort_by(|left, right| left.ts.cmp(&right.ts));
        });
    }

    pub fn post_root(&self, channel_id: &str, ts: &str, user_id: &str, text: &str) {
        self.post(
            channel_id,
            ChatMessage {
                ts: MessageTs::from(ts),
                thread_ts: None,
                user_id: Some(user_id.to_owned()),
                bot_id: None,
                text: text.to_owned(),
            },
        );
    }

    pub fn post_reply(&self, channel_id: &str, root_ts: &str, ts: &str, user_id: &str, text: &str) {
        self.post(
            channel_id,
            ChatMessage {
                ts: MessageTs::from(ts),
                thread_ts: Some(MessageTs::from(root_ts)),
                user_id: Some(user_id.to_owned()),
                bot_id: None,
                text: text.to_owned(),
            },
        );
    }

    pub fn add_user(&self, profile: UserProfile) {
        self.with_state(|state| {
            state.users.insert(profile.id.clone(), profile);
        });
    }

    /// Makes every subsequent call fail with `error` until cleared with `None`.
    pub fn set_failure(&self, error: Option<ChatError>) {
        self.with_state(|state| state.failure = error);
    }

    pub fn user_lookups(&self) -> usize {
        self.with_state(|state| state.user_lookups)
    }

    fn check(&self) -> Result<(), ChatError> {
        self.with_state(|state| match &state.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        })
    }
}

#[async_trait]
impl ChatHistory for InMemoryChat {
    async fn fetch_message(
        &self,
        channel_id: &str,
        ts: &MessageTs,
    ) -> Result<Option<ChatMessage>, ChatError> {
        self.check()?;
        Ok(self.with_state(|state| {
            state
                .messages
                .get(channel_id)
                .and_then(|messages| messages.iter().find(|message| &message.ts == ts))
                .cloned()
        }))
    }

    async fn fetch_thread(
        &self,
        channel_id: &str,
        root_ts: &MessageTs,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        self.check()?;
        Ok(self.with_state(|state| {
            state
                .messages
                .get(channel_id)
                .map(|messages| {
                    messages
                        .iter()
                        .filter(|message| {
                            &message.ts == root_ts || message.thread_ts.as_ref() == Some(root_ts)
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn fetch_user(&self, user_id: &str) -> Result<Option<UserProfile>, ChatError> {
        self.check()?;
        Ok(self.with_state(|state| {
            state.user_lookups += 1;
            state.users.get(user_id).cloned()
        }))
    }

    async fn bot_user_id(&self) -> Result<String, ChatError> {
        self.check()?;
        self.with_state(|state| state.bot_user_id.clone())
            .ok_or_else(|| ChatError::api("auth.test", "not_authed"))
    }
}
