use async_trait::async_trait;
use thiserror::Error;

use crate::domain::message::ThreadRef;
use crate::domain::ticket::{Ticket, TicketKey, TicketStatus};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("ticket key {0} is already taken")]
    DuplicateKey(TicketKey),
    #[error("thread {channel_id}/{thread_ts} is already bound to a ticket")]
    ThreadAlreadyBound { channel_id: String, thread_ts: String },
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("stored ticket could not be decoded: {0}")]
    Decode(String),
}

/// Persistence for tickets and their thread bindings.
///
/// `insert` writes the ticket and its binding together or not at all. `update` is a
/// compare-and-set: it only applies when the stored revision equals
/// `ticket.revision - 1` and returns `false` otherwise.
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn find_by_thread(&self, thread: &ThreadRef) -> Result<Option<Ticket>, StoreError>;

    async fn find_by_key(&self, key: &TicketKey) -> Result<Option<Ticket>, StoreError>;

    /// Newest first.
    async fn list(
        &self,
        status: Option<TicketStatus>,
        limit: usize,
    ) -> Result<Vec<Ticket>, StoreError>;

    async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError>;

    async fn update(&self, ticket: &Ticket) -> Result<bool, StoreError>;
}
