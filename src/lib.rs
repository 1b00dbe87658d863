//! Ticket desk core: tickets with cascading delete and shared attachments,
//! merges, trigger actions, access control and ticket search on SQLite.

pub mod access;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod merge;
pub mod models;
pub mod notify;
pub mod perform;
pub mod selector;
pub mod store;
pub mod ticket;

pub use db::Database;
pub use error::TicketError;
