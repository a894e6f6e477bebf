use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::warn;

use crate::chat::{ChatError, ChatHistory};

pub const DEFAULT_USER_CACHE_CAPACITY: usize = 256;

/// Resolves user ids to display names and remembers the bot's own user id.
///
/// Only successful lookups are cached; a failed lookup returns `User <id>` and is
/// retried on the next call.
pub struct UserDirectory {
    history: Arc<dyn ChatHistory>,
    names: Mutex<LruCache<String, String>>,
    bot_user_id: Mutex<Option<String>>,
}

impl UserDirectory {
    pub fn new(history: Arc<dyn ChatHistory>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            history,
            names: Mutex::new(LruCache::new(capacity)),
            bot_user_id: Mutex::new(None),
        }
    }

    pub fn fallback_name(user_id: &str) -> String {
        format!("User {user_id}")
    }

    pub async fn display_name(&self, user_id: &str) -> String {
        if let Some(name) = self.with_names(|names| names.get(user_id).cloned()) {
            return name;
        }

        match self.history.fetch_user(user_id).await {
            Ok(Some(profile)) => match profile.preferred_name() {
                Some(name) => {
                    let name = name.to_owned();
                    self.with_names(|names| names.put(user_id.to_owned(), name.clone()));
                    name
                }
                None => Self::fallback_name(user_id),
            },
            Ok(None) => Self::fallback_name(user_id),
            Err(error) => {
                warn!(
                    event_name = "tracker.directory.lookup_failed",
                    user_id,
                    error = %error,
                    "user lookup failed; using fallback name"
                );
                Self::fallback_name(user_id)
            }
        }
    }

    /// Drops one cached name so the next lookup goes back to Slack.
    pub fn invalidate(&self, user_id: &str) -> bool {
        self.with_names(|names| names.pop(user_id).is_some())
    }

    /// The bot's own user id, resolved once and then served from memory.
    pub async fn bot_user_id(&self) -> Result<String, ChatError> {
        if let Some(id) = self.with_bot_id(|cached| cached.clone()) {
            return Ok(id);
        }

        let id = self.history.bot_user_id().await?;
        self.with_bot_id(|cached| *cached = Some(id.clone()));
        Ok(id)
    }

    fn with_names<T>(&self, apply: impl FnOnce(&mut LruCache<String, String>) -> T) -> T {
        match self.names.lock() {
            Ok(mut names) => apply(&mut *names),
            Err(poisoned) => apply(&mut *poisoned.into_inner()),
        }
    }

    fn with_bot_id<T>(&self, apply: impl FnOnce(&mut Option<String>) -> T) -> T {
        match self.bot_user_id.lock() {
            Ok(mut cached) => apply(&mut *cached),
            Err(poisoned) => apply(&mut *poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::UserDirectory;
    use crate::chat::{ChatError, InMemoryChat};
    use crate::domain::message::UserProfile;

    fn profile(id: &str, display: Option<&str>, real: Option<&str>) -> UserProfile {
        UserProfile {
            id: id.to_owned(),
            name: Some(id.to_lowercase()),
            real_name: real.map(str::to_owned),
            display_name: display.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn resolves_display_name_then_serves_from_cache() {
        let chat = Arc::new(InMemoryChat::new("UBOT"));
        chat.add_user(profile("U1", Some("jane"), Some("Jane Doe")));
        let directory = UserDirectory::new(chat.clone(), 8);

        assert_eq!(directory.display_name("U1").await, "jane");
        assert_eq!(directory.display_name("U1").await, "jane");
        assert_eq!(chat.user_lookups(), 1);
    }

    #[tokio::test]
    async fn failed_lookup_falls_back_and_is_not_cached() {
        let chat = Arc::new(InMemoryChat::new("UBOT"));
        chat.add_user(profile("U1", None, Some("Jane Doe")));
        chat.set_failure(Some(ChatError::Transport("timeout".to_owned())));
        let directory = UserDirectory::new(chat.clone(), 8);

        assert_eq!(directory.display_name("U1").await, "User U1");

        chat.set_failure(None);
        assert_eq!(directory.display_name("U1").await, "Jane Doe");
        assert!(directory.invalidate("U1"));
    }

    #[tokio::test]
    async fn unknown_user_gets_fallback_name() {
        let directory = UserDirectory::new(Arc::new(InMemoryChat::new("UBOT")), 8);
        assert_eq!(directory.display_name("U404").await, "User U404");
    }

    #[tokio::test]
    async fn capacity_bounds_the_cache() {
        let chat = Arc::new(InMemoryChat::new("UBOT"));
        for id in ["U1", "U2", "U3"] {
            chat.add_user(profile(id, Some(id), None));
        }
        let directory = UserDirectory::new(chat.clone(), 2);
        for id in ["U1", "U2", "U3"] {
            directory.display_name(id).await;
        }

        directory.display_name("U1").await;
        assert_eq!(chat.user_lookups(), 4);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_lookup() {
        let chat = Arc::new(InMemoryChat::new("UBOT"));
        chat.add_user(profile("U1", Some("jane"), None));
        let directory = UserDirectory::new(chat.clone(), 8);

        directory.display_name("U1").await;
        chat.add_user(profile("U1", Some("jane.d"), None));
        assert_eq!(directory.display_name("U1").await, "jane");

        assert!(directory.invalidate("U1"));
        assert_eq!(directory.display_name("U1").await, "jane.d");
        assert!(!directory.invalidate("U9"));
    }

    #[tokio::test]
    async fn bot_user_id_is_resolved_once() {
        let chat = Arc::new(InMemoryChat::new("UBOT"));
        let directory = UserDirectory::new(chat.clone(), 8);

        assert_eq!(directory.bot_user_id().await.as_deref(), Ok("UBOT"));
        chat.set_failure(Some(ChatError::Unavailable));
        assert_eq!(directory.bot_user_id().await.as_deref(), Ok("UBOT"));
    }
}
