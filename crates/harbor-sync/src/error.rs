//! # Sync Error Types
//!
//! Error types for queueing, push, pull and configuration.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Sequencing     │  │   Transport     │  │     Precondition        │ │
//! │  │  (local bugs)   │  │   (remote)      │  │                         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidEntity  │  │  Transport      │  │  PendingOperations      │ │
//! │  │  QueueConflict  │  │  MalformedResp. │  │  UnknownTable           │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │    Database     │  │  Configuration  │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  DatabaseError  │  │  InvalidConfig  │  │  Cancelled              │ │
//! │  │  Serialization  │  │  InvalidUrl     │  │  ChannelError           │ │
//! │  │                 │  │  ConfigLoad/Save│  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transport and server failures during push/pull are normally *recorded*
//! in [`PushResult`](crate::PushResult) / [`PullResult`](crate::PullResult)
//! rather than returned; the call itself still succeeds.

use harbor_core::{CoalesceError, OperationKind, ValidationError};
use harbor_db::DbError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Sequencing Errors
    // =========================================================================
    /// The entity has no usable identity, or its table isn't registered.
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    /// The new mutation cannot be merged with what is already queued.
    #[error("Queue conflict for {table}/{item_id}: {source}")]
    QueueConflict {
        table: String,
        item_id: String,
        #[source]
        source: CoalesceError,
    },

    // =========================================================================
    // Precondition Errors
    // =========================================================================
    /// Tables still have unpushed operations.
    #[error("Pending operations for tables: {}", tables.join(", "))]
    PendingOperations { tables: Vec<String> },

    /// Table was never registered with the context.
    #[error("Table not registered: {0}")]
    UnknownTable(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Request could not be completed (connect, timeout, TLS, body read).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote answered with something we can't interpret.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    // =========================================================================
    // Database Errors
    // =========================================================================
    /// Local store failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Failed to serialize or deserialize an entity.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Invalid remote URL.
    #[error("Invalid remote URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The caller's cancel signal fired.
    #[error("Operation cancelled")]
    Cancelled,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Internal engine error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Builds a `QueueConflict` for a rejected mutation.
    pub fn queue_conflict(
        table: impl Into<String>,
        item_id: impl Into<String>,
        source: CoalesceError,
    ) -> Self {
        SyncError::QueueConflict {
            table: table.into(),
            item_id: item_id.into(),
            source,
        }
    }

    /// The (queued, incoming) kinds of a `QueueConflict`.
    pub fn conflicting_kinds(&self) -> Option<(OperationKind, OperationKind)> {
        match self {
            SyncError::QueueConflict { source, .. } => Some(source.kinds()),
            _ => None,
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::InvalidEntity(msg) => SyncError::InvalidEntity(msg),
            DbError::Serialization(msg) => SyncError::SerializationFailed(msg),
            DbError::UniqueViolation { value, .. } => {
                SyncError::InvalidEntity(format!("{} already exists locally", value))
            }
            // Callers that know the key attach it via `queue_conflict`
            DbError::Coalesce(source) => SyncError::QueueConflict {
                table: String::new(),
                item_id: String::new(),
                source,
            },
            other => SyncError::DatabaseError(other.to_string()),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::InvalidEntity(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::MalformedResponse(err.to_string())
        } else {
            SyncError::Transport(err.to_string())
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if retrying the same call later may succeed.
    ///
    /// ## Retryable Errors
    /// - Transport failures (network issues, timeouts)
    /// - Pending operations (push first, then pull again)
    ///
    /// ## Non-Retryable Errors
    /// - Sequencing errors (the local call order is wrong)
    /// - Configuration errors
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::PendingOperations { .. }
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the caller issued local mutations in an impossible order.
    pub fn is_sequencing_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidEntity(_) | SyncError::QueueConflict { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert!(SyncError::Transport("connection reset".into()).is_retryable());
        assert!(SyncError::PendingOperations {
            tables: vec!["todo".into()]
        }
        .is_retryable());

        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(SyncError::InvalidUrl("ftp://x".into()).is_config_error());

        let conflict = SyncError::queue_conflict("todo", "1", CoalesceError::DuplicateDelete);
        assert!(conflict.is_sequencing_error());
        assert!(!conflict.is_retryable());
        assert_eq!(
            conflict.conflicting_kinds(),
            Some((OperationKind::Delete, OperationKind::Delete))
        );
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::PendingOperations {
            tables: vec!["todo".into(), "tag".into()],
        };
        assert_eq!(err.to_string(), "Pending operations for tables: todo, tag");

        let err = SyncError::queue_conflict("todo", "abc-123", CoalesceError::DuplicateCreate);
        assert!(err.to_string().contains("todo/abc-123"));
    }

    #[test]
    fn test_db_errors_keep_their_category() {
        let err: SyncError = DbError::InvalidEntity("id is required".into()).into();
        assert!(err.is_sequencing_error());

        let err: SyncError = DbError::Coalesce(CoalesceError::DuplicateCreate).into();
        assert!(matches!(err, SyncError::QueueConflict { .. }));

        let err: SyncError = DbError::PoolExhausted.into();
        assert!(matches!(err, SyncError::DatabaseError(_)));
    }
}
