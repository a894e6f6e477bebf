pub mod audit;
pub mod chat;
pub mod classifier;
pub mod config;
pub mod directory;
pub mod domain;
pub mod errors;
pub mod keys;
pub mod text;
pub mod tracker;

pub use chat::{ChatError, ChatHistory};
pub use classifier::{Classification, MessageClassifier, MessageKind};
pub use directory::UserDirectory;
pub use domain::message::{ChatMessage, MessageTs, ThreadRef, UserProfile};
pub use domain::ticket::{Comment, StatusChange, Ticket, TicketKey, TicketStatus};
pub use errors::{DomainError, TicketError};
pub use tracker::store::{StoreError, TicketStore};
pub use tracker::{
    CommentBatch, ThreadTranscript, TicketAction, TicketTracker, TrackerSettings, TranscriptEntry,
};
