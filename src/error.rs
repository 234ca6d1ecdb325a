//! Error types for shardwarden
//!
//! One taxonomy covering the lease table, the stream API, worker
//! supervision, and coordinator lifecycle errors.

use thiserror::Error;

/// Primary error type for all shardwarden operations
#[derive(Debug, Error)]
pub enum WardenError {
    // ========== Table Errors ==========
    /// Key/value table request failed
    #[error("table operation failed: {message}")]
    TableError { message: String },

    /// A conditional write was rejected by the table
    #[error("conditional check rejected for {key}")]
    ConditionRejected { key: String },

    /// Table does not exist
    #[error("table not found: {table}")]
    TableNotFound { table: String },

    /// Creating or describing the backing table failed during bootstrap
    #[error("bootstrap failed: {reason}")]
    BootstrapFailed { reason: String },

    // ========== Stream Errors ==========
    /// Stream API request failed
    #[error("stream operation failed for {stream}: {message}")]
    StreamError { stream: String, message: String },

    // ========== Lease Errors ==========
    /// The shard lease was claimed or renewed past this holder
    #[error("lease lost for shard {shard_id} at counter {counter}")]
    LeaseLost { shard_id: String, counter: u64 },

    /// A lease row came back without a required attribute
    #[error("malformed lease row for {shard_id}: {reason}")]
    MalformedLease { shard_id: String, reason: String },

    // ========== Supervisor Errors ==========
    /// Spawning the worker process failed
    #[error("failed to spawn worker for shard {shard_id}: {reason}")]
    SpawnFailed { shard_id: String, reason: String },

    /// Worker options could not be encoded or decoded
    #[error("invalid worker options: {reason}")]
    InvalidOptions { reason: String },

    // ========== Runtime Errors ==========
    /// Reset latch is set, no new work is accepted
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl WardenError {
    /// Returns true if this error is transient and the calling loop
    /// should log it and continue.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WardenError::TableError { .. } | WardenError::StreamError { .. }
        )
    }

    /// Returns true for the fatal bootstrap path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WardenError::BootstrapFailed { .. })
    }
}

/// Result type alias for shardwarden operations
pub type Result<T> = std::result::Result<T, WardenError>;
