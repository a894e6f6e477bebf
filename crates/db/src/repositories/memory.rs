use std::collections::HashMap;

use tokio::sync::RwLock;

use mockops_core::domain::message::ThreadRef;
use mockops_core::domain::ticket::{Ticket, TicketKey, TicketStatus};
use mockops_core::tracker::store::{StoreError, TicketStore};

#[derive(Default)]
struct TicketTables {
    tickets: HashMap<String, Ticket>,
    bindings: HashMap<ThreadRef, TicketKey>,
}

/// Ticket store kept in process memory. Tickets and bindings share one lock so an
/// insert is all-or-nothing.
#[derive(Default)]
pub struct InMemoryTicketStore {
    tables: RwLock<TicketTables>,
}

#[async_trait::async_trait]
impl TicketStore for InMemoryTicketStore {
    async fn find_by_thread(&self, thread: &ThreadRef) -> Result<Option<Ticket>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.bindings.get(thread).and_then(|key| tables.tickets.get(&key.0)).cloned())
    }

    async fn find_by_key(&self, key: &TicketKey) -> Result<Option<Ticket>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.tickets.get(&key.0).cloned())
    }

    async fn list(
        &self,
        status: Option<TicketStatus>,
        limit: usize,
    ) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.read().await;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .values()
            .filter(|ticket| status.map_or(true, |status| ticket.status == status))
            .cloned()
            .collect();
        tickets.sort_by(|left, right| {
            right.created_at.cmp(&left.created_at).then_with(|| right.key.0.cmp(&left.key.0))
        });
        tickets.truncate(limit);
        Ok(tickets)
    }

    async fn insert(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.tickets.contains_key(&ticket.key.0) {
            return Err(StoreError::DuplicateKey(ticket.key.clone()));
        }
        if tables.bindings.contains_key(&ticket.thread) {
            return Err(StoreError::ThreadAlreadyBound {
                channel_id: ticket.thread.channel_id.clone(),
                thread_ts: ticket.thread.thread_ts.to_string(),
            });
        }

        let binding = ticket.binding();
        tables.bindings.insert(binding.thread, binding.ticket_key);
        tables.tickets.insert(ticket.key.0.clone(), ticket.clone());
        Ok(())
    }

    async fn update(&self, ticket: &Ticket) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let current = match tables.tickets.get(&ticket.key.0) {
            Some(stored) => stored.revision,
            None => return Ok(false),
        };
        if ticket.revision.checked_sub(1) != Some(current) {
            return Ok(false);
        }

        tables.tickets.insert(ticket.key.0.clone(), ticket.clone());
        Ok(true)
    }
}
