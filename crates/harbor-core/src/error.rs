//! # Error Types
//!
//! Domain-specific error types for harbor-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  harbor-core errors (this file)                                        │
//! │  ├── CoreError        - General domain errors                          │
//! │  ├── ValidationError  - Identity / parameter validation failures       │
//! │  └── CoalesceError    - Impossible local edit sequences                │
//! │                                                                         │
//! │  harbor-db errors (separate crate)                                     │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  harbor-sync errors (separate crate)                                   │
//! │  └── SyncError        - What callers of push/pull/enqueue see          │
//! │                                                                         │
//! │  Flow: ValidationError/CoalesceError → DbError → SyncError → Caller    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::OperationKind;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The entity cannot be tracked (missing or malformed identity).
    #[error("Invalid entity: {0}")]
    InvalidEntity(String),

    /// An entity payload could not be converted to or from JSON.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Local edit sequence cannot be coalesced.
    #[error(transparent)]
    Coalesce(#[from] CoalesceError),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::InvalidPayload(err.to_string())
    }
}

// =============================================================================
// Coalesce Error
// =============================================================================

/// A local mutation that cannot be merged into the operation already queued
/// for the same entity.
///
/// ## When This Occurs
/// ```text
/// existing   incoming   error
/// ────────   ────────   ──────────────────────────────
/// Add        Add        DuplicateCreate
/// Replace    Add        CreateAfterUpdate
/// Delete     Replace    UpdateAfterDelete
/// Delete     Delete     DuplicateDelete
/// ```
///
/// These are caller sequencing bugs, never network conditions: they are
/// raised at enqueue time and must not be retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoalesceError {
    #[error("entity is already queued for creation")]
    DuplicateCreate,

    #[error("cannot create an entity that has a pending update")]
    CreateAfterUpdate,

    #[error("cannot update an entity that has a pending delete")]
    UpdateAfterDelete,

    #[error("entity is already queued for deletion")]
    DuplicateDelete,
}

impl CoalesceError {
    /// Returns the (existing, incoming) kind pair that produced this error.
    pub fn kinds(&self) -> (OperationKind, OperationKind) {
        match self {
            CoalesceError::DuplicateCreate => (OperationKind::Add, OperationKind::Add),
            CoalesceError::CreateAfterUpdate => (OperationKind::Replace, OperationKind::Add),
            CoalesceError::UpdateAfterDelete => (OperationKind::Delete, OperationKind::Replace),
            CoalesceError::DuplicateDelete => (OperationKind::Delete, OperationKind::Delete),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (e.g., bad characters in an id, unparseable timestamp).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
