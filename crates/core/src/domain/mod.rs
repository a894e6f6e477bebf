pub mod message;
pub mod ticket;
