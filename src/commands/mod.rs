pub mod access;
pub mod comment;
pub mod create;
pub mod delete;
pub mod directory;
pub mod ingest;
pub mod init;
pub mod links;
pub mod list;
pub mod merge;
pub mod search;
pub mod show;
pub mod state;
pub mod tag;
pub mod trigger;
