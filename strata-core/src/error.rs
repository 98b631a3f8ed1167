//! Error types for Strata operations
//!
//! A missing key is never an error here: lookups return `Option` and a miss
//! simply sends the query on to the next tier.

use crate::Timestamp;
use thiserror::Error;

/// Persistent partition errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open partition {partition}: {reason}")]
    PartitionOpen { partition: String, reason: String },

    #[error("Read failed for key {key}: {reason}")]
    Read { key: String, reason: String },

    #[error("Write failed for key {key}: {reason}")]
    Write { key: String, reason: String },

    #[error("Commit failed: {reason}")]
    Commit { reason: String },

    #[error("Corrupt value under key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Publish/subscribe channel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("No response to request {request_id} within {waited_ms}ms")]
    Timeout { request_id: u32, waited_ms: u64 },

    #[error("Edge channel busy: no request slot freed within {waited_ms}ms")]
    Busy { waited_ms: u64 },

    #[error("Edge channel closed")]
    Closed,
}

/// Inbound message schema violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Invalid JSON: {reason}")]
    InvalidJson { reason: String },

    #[error("Required field missing or mistyped: {field}")]
    MissingField { field: String },

    #[error("Unknown action: {action}")]
    UnknownAction { action: String },

    #[error("Invalid range: end {end} precedes start {start}")]
    InvalidRange { start: Timestamp, end: Timestamp },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Strata errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrataError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Strata operations.
pub type StrataResult<T> = Result<T, StrataError>;

// =============================================================================
// TESTS
// =============================================================================
