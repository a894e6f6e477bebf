//! Slack surface for the mock ticket tracker
//!
//! - **Socket Mode** (`socket`): websocket loop with reconnection, frame parsing and reply delivery
//! - **Web API** (`web`): `conversations.*`, `users.info`, `chat.*` calls with retry handling
//! - **Events** (`events`): envelope types, reply targets and the event dispatcher
//! - **Workflow** (`workflow`): reaction, form and `/ticket` handling on top of the tracker
//! - **Slash Commands** (`commands`): `/ticket show|list|help` parsing
//! - **Block Kit** (`blocks`): message templates for ticket cards, forms and notices
//!
//! # Architecture
//!
//! ```text
//! Socket Mode → EventDispatcher → TicketWorkflow → TicketTracker
//!                                       ↓
//!                   MessagePublisher ← Reply (Block Kit)
//! ```

pub mod blocks;
pub mod commands;
pub mod events;
pub mod socket;
pub mod web;
pub mod workflow;

pub use events::{ticket_dispatcher, EventDispatcher, Reply, ReplyTarget};
pub use socket::{ReconnectPolicy, SessionState, SocketModeRunner, WebSocketTransport};
pub use web::{MessagePublisher, RetryPolicy, SlackWebClient};
pub use workflow::TicketWorkflow;
