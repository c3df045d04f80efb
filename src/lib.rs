//! DCV sync: daily encrypted-attachment ingestion from mail into storage.

pub mod config;
pub mod error;
pub mod launcher;
pub mod pipeline;
pub mod session;
