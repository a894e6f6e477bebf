use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Slack message timestamp (`"1700000000.000100"`).
///
/// Ordering is numeric: whole seconds first, then the fractional part right-padded to
/// nine digits. Two timestamps that only differ in trailing zeros still compare as
/// distinct (string tie-break) so `Ord` stays consistent with `Eq`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageTs(pub String);

impl MessageTs {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn sort_key(&self) -> Option<(u64, u32)> {
        let raw = self.0.trim();
        let (seconds, fraction) = match raw.split_once('.') {
            Some((seconds, fraction)) => (seconds, fraction),
            None => (raw, ""),
        };
        if seconds.is_empty() || !fraction.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        let seconds = seconds.parse::<u64>().ok()?;

        let mut nanos = 0_u32;
        for (index, digit) in fraction.bytes().take(9).enumerate() {
            nanos += u32::from(digit - b'0') * 10_u32.pow(8 - index as u32);
        }
        Some((seconds, nanos))
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let (seconds, nanos) = self.sort_key()?;
        let seconds = i64::try_from(seconds).ok()?;
        Utc.timestamp_opt(seconds, nanos).single()
    }
}

impl fmt::Display for MessageTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageTs {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl PartialOrd for MessageTs {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageTs {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.sort_key(), other.sort_key()) {
            (Some(left), Some(right)) => left.cmp(&right).then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

/// A channel plus the timestamp of the thread's root message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadRef {
    pub channel_id: String,
    pub thread_ts: MessageTs,
}

impl ThreadRef {
    pub fn new(channel_id: impl Into<String>, thread_ts: impl Into<MessageTs>) -> Self {
        Self { channel_id: channel_id.into(), thread_ts: thread_ts.into() }
    }
}

impl From<String> for MessageTs {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A message as read back from the chat backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub ts: MessageTs,
    pub thread_ts: Option<MessageTs>,
    pub user_id: Option<String>,
    pub bot_id: Option<String>,
    pub text: String,
}

impl ChatMessage {
    /// Root when there is no thread pointer or it points at the message itself.
    pub fn is_thread_root(&self) -> bool {
        match &self.thread_ts {
            None => true,
            Some(thread_ts) => thread_ts == &self.ts,
        }
    }

    pub fn authored_by_bot(&self, bot_user_id: Option<&str>) -> bool {
        if self.bot_id.is_some() {
            return true;
        }
        match (self.user_id.as_deref(), bot_user_id) {
            (Some(author), Some(bot)) => author == bot,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: Option<String>,
    pub real_name: Option<String>,
    pub display_name: Option<String>,
}

impl UserProfile {
    pub fn preferred_name(&self) -> Option<&str> {
        [&self.display_name, &self.real_name, &self.name]
            .into_iter()
            .filter_map(|value| value.as_deref())
            .map(str::trim)
            .find(|value| !value.is_empty())
    }
}
