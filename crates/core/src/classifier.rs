use std::sync::Arc;

use tracing::{debug, warn};

use crate::chat::{ChatError, ChatHistory};
use crate::domain::message::{ChatMessage, MessageTs};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Root,
    Reply { root_ts: MessageTs },
}

impl MessageKind {
    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }

    /// Timestamp of the thread the message belongs to.
    pub fn thread_ts<'a>(&'a self, message_ts: &'a MessageTs) -> &'a MessageTs {
        match self {
            Self::Root => message_ts,
            Self::Reply { root_ts } => root_ts,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassificationSource {
    /// The message itself was found and its thread pointer decided.
    Message,
    /// The message was not found directly; the thread listing decided.
    Thread,
    /// Neither lookup resolved the message. Treated as a root.
    FailOpen,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub kind: MessageKind,
    /// The resolved message, when a lookup returned it.
    pub message: Option<ChatMessage>,
    pub source: ClassificationSource,
}

impl Classification {
    fn fail_open() -> Self {
        Self { kind: MessageKind::Root, message: None, source: ClassificationSource::FailOpen }
    }
}

pub struct MessageClassifier {
    history: Arc<dyn ChatHistory>,
}

impl MessageClassifier {
    pub fn new(history: Arc<dyn ChatHistory>) -> Self {
        Self { history }
    }

    pub async fn classify(&self, channel_id: &str, ts: &MessageTs) -> Classification {
        match self.try_classify(channel_id, ts).await {
            Ok(Some(classification)) => {
                debug!(
                    event_name = "tracker.classify.resolved",
                    channel_id,
                    message_ts = %ts,
                    root = classification.kind.is_root(),
                    source = ?classification.source,
                    "classified message"
                );
                classification
            }
            Ok(None) => {
                warn!(
                    event_name = "tracker.classify.unresolved",
                    channel_id,
                    message_ts = %ts,
                    "message not found by any lookup; treating as thread root"
                );
                Classification::fail_open()
            }
            Err(error) => {
                warn!(
                    event_name = "tracker.classify.failed",
                    channel_id,
                    message_ts = %ts,
                    error = %error,
                    "classification lookup failed; treating as thread root"
                );
                Classification::fail_open()
            }
        }
    }

    async fn try_classify(
        &self,
        channel_id: &str,
        ts: &MessageTs,
    ) -> Result<Option<Classification>, ChatError> {
        if let Some(message) = self.history.fetch_message(channel_id, ts).await? {
            let kind = match &message.thread_ts {
                Some(thread_ts) if thread_ts != &message.ts => {
                    MessageKind::Reply { root_ts: thread_ts.clone() }
                }
                _ => MessageKind::Root,
            };
            return Ok(Some(Classification {
                kind,
                message: Some(message),
                source: ClassificationSource::Message,
            }));
        }

        let thread = self.history.fetch_thread(channel_id, ts).await?;
        let Some(first) = thread.first() else {
            return Ok(None);
        };

        let kind = if &first.ts != ts {
            MessageKind::Reply { root_ts: first.ts.clone() }
        } else {
            MessageKind::Root
        };
        let message = thread.iter().find(|message| &message.ts == ts).cloned();
        Ok(Some(Classification { kind, message, source: ClassificationSource::Thread }))
    }
}
