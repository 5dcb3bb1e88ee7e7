//! Error types for the collection sync node

use shared::{PlayerId, ProcessId};
use thiserror::Error;

/// Failures surfaced to the caller of the sync engine.
///
/// Only the primary counter update can fail outright. Persistence failures are
/// reported after the counter and the local event have already taken effect.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("production amount must be positive")]
    InvalidArgument,

    #[error("progression for player {0} is not loaded")]
    NotLoaded(PlayerId),

    #[error("failed to persist progression: {0}")]
    PersistenceFailure(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding failed: {0}")]
    Codec(#[from] bincode::Error),
}

/// Failures of the cross-process session directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("session directory timed out")]
    Timeout,

    #[error("session directory transport failed: {0}")]
    Transport(String),
}

/// Failures of the inter-process channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no address known for {0}")]
    UnknownProcess(ProcessId),

    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("packet encoding failed: {0}")]
    Codec(#[from] bincode::Error),
}
