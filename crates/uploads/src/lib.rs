//! Resumable chunked uploads with import coordination.
//!
//! This crate implements the client side of moving large content files
//! to a remote server and importing them into a repository. It has no
//! transport of its own: the embedding application provides an
//! [`UploadServer`] implementation and drives everything through
//! [`UploadManager`].
//!
//! # Pipeline
//!
//! 1. **Create** - register the file with the server and write a local record
//! 2. **Transfer** - send chunks from the persisted offset, checkpointing each one
//! 3. **Import** - ask the server to import the finished upload
//! 4. **Clean up** - delete the session once nothing is left to track

pub mod config;
pub mod engine;
pub mod error;
pub mod import;
pub mod manager;
pub mod server;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export primary types for convenience.
pub use config::{ConfigError, UploadManagerConfig};
pub use engine::ChunkTransferEngine;
pub use error::UploadError;
pub use import::ImportCoordinator;
pub use manager::UploadManager;
pub use server::{ServerFuture, UploadServer};
pub use types::{BatchReport, ImportResult, OutcomeKind, SessionOutcome, TransferResult, UploadEvent};

pub use repoload_protocol::{FileMetadata, ImportResponse, RepoContext, ServerError};
pub use repoload_transfer::{
    NoProgress, ProgressSink, SessionState, SessionView, TransferProgress, UploadSession,
};
