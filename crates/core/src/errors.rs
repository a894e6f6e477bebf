use thiserror::Error;

use crate::chat::ChatError;
use crate::domain::ticket::{TicketKey, TicketStatus};
use crate::tracker::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid ticket transition from {from:?} to {to:?}")]
    InvalidTicketTransition { from: TicketStatus, to: TicketStatus },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Outcome of a lifecycle operation that did not go through.
///
/// These are rendered back into the thread as chat messages; none of them is fatal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TicketError {
    #[error("no ticket is bound to this thread")]
    NotFound,
    #[error("ticket {key} already exists for this thread")]
    AlreadyExists { key: TicketKey },
    #[error("ticket {key} cannot move from {from} to {to}")]
    InvalidTransition { key: TicketKey, from: TicketStatus, to: TicketStatus },
    #[error("ticket {key} was modified concurrently")]
    Conflict { key: TicketKey },
    #[error("could not allocate a free ticket key after {attempts} attempts")]
    KeyExhausted { attempts: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl TicketError {
    /// Chat-safe wording for failures that are not a lifecycle rule. Internal details stay in logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Store(_) => "The ticket store is temporarily unavailable. Please retry shortly.",
            Self::Chat(_) => "Slack could not be reached while updating the ticket. Please retry shortly.",
            Self::KeyExhausted { .. } => "Could not allocate a ticket key. Please try again.",
            Self::Conflict { .. } => "The ticket changed while it was being updated. Please try again.",
            Self::NotFound | Self::AlreadyExists { .. } | Self::InvalidTransition { .. } => {
                "The request could not be processed. Check the thread and try again."
            }
        }
    }
}
