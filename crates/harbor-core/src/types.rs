//! # Domain Types
//!
//! Records that flow between the queue manager, the local store and the
//! push/pull engines.
//!
//! ## Queued Operation Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    QueuedOperation Lifecycle                            │
//! │                                                                         │
//! │  local mutation ──► (coalesce) ──► Pending ──push 2xx──► row removed   │
//! │                         │             │                                 │
//! │                         │             ├──push error────► Failed         │
//! │                         │             │                   │             │
//! │                         │             │      next push ◄──┘             │
//! │                         │             │                                 │
//! │                         │             └──server wins───► Completed      │
//! │                         │                                 │             │
//! │                         │                       purge_completed()       │
//! │                         ▼                                               │
//! │                   Add + Delete ──► row removed (net no-op)             │
//! │                                                                         │
//! │  INVARIANT: at most one non-Completed row per (table_name, item_id)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Operation Kind
// =============================================================================

/// The net effect a queued operation has on the remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create on the remote (POST).
    Add,
    /// Delete on the remote (conditional DELETE).
    Delete,
    /// Replace on the remote (conditional PUT).
    Replace,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Add => write!(f, "add"),
            OperationKind::Delete => write!(f, "delete"),
            OperationKind::Replace => write!(f, "replace"),
        }
    }
}

// =============================================================================
// Operation State
// =============================================================================

/// Where a queued operation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Waiting for the next push.
    #[default]
    Pending,
    /// Settled without being sent again (server won a conflict).
    Completed,
    /// Last push attempt failed; retried by the next push.
    Failed,
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationState::Pending => write!(f, "pending"),
            OperationState::Completed => write!(f, "completed"),
            OperationState::Failed => write!(f, "failed"),
        }
    }
}

// =============================================================================
// Local Mutation
// =============================================================================

/// A locally committed change, as handed to the queue manager.
///
/// `item` is the serialized entity as it stands after the change (for a
/// delete: as it stood before). `original` is the serialized entity before
/// the change, when the caller knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMutation {
    pub kind: OperationKind,
    pub table_name: String,
    pub item_id: String,
    pub item: String,
    pub original: Option<String>,
    pub entity_version: Option<String>,
}

// =============================================================================
// Queued Operation
// =============================================================================

/// One row of the operations queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct QueuedOperation {
    /// UUID v4, never reused.
    pub id: String,
    pub kind: OperationKind,
    pub state: OperationState,
    /// Coalescing key, part 1.
    pub table_name: String,
    /// Coalescing key, part 2.
    pub item_id: String,
    /// Entity before the first queued mutation, when known.
    pub original_payload: Option<String>,
    /// Entity to send. Always `None` for deletes.
    pub payload: Option<String>,
    /// Sent as `If-Match` on replace and delete.
    pub entity_version: Option<String>,
    /// Assigned when the key is first queued; preserved across coalescing.
    pub sequence: i64,
    /// Incremented every time the row absorbs another local mutation.
    pub attempt_version: i64,
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_status_code: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueuedOperation {
    /// Builds a fresh Pending row for a key that has nothing queued.
    pub fn from_mutation(mutation: &LocalMutation, sequence: i64, now: DateTime<Utc>) -> Self {
        let payload = match mutation.kind {
            OperationKind::Delete => None,
            OperationKind::Add | OperationKind::Replace => Some(mutation.item.clone()),
        };

        QueuedOperation {
            id: Uuid::new_v4().to_string(),
            kind: mutation.kind,
            state: OperationState::Pending,
            table_name: mutation.table_name.clone(),
            item_id: mutation.item_id.clone(),
            original_payload: mutation.original.clone(),
            payload,
            entity_version: mutation.entity_version.clone(),
            sequence,
            attempt_version: 0,
            last_attempt: None,
            last_status_code: None,
            last_error: None,
            created_at: now,
        }
    }

    /// True for Pending and Failed rows.
    pub fn is_open(&self) -> bool {
        self.state != OperationState::Completed
    }

    /// Parses the payload to send, if any.
    pub fn payload_value(&self) -> CoreResult<Option<Value>> {
        self.payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(CoreError::from)
    }
}

// =============================================================================
// Delta Token
// =============================================================================

/// Persisted pull watermark for one (table, query) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaToken {
    pub key: String,
    pub watermark: DateTime<Utc>,
}

impl DeltaToken {
    /// Builds the storage key for a table and named query.
    ///
    /// ```rust
    /// use harbor_core::DeltaToken;
    /// assert_eq!(DeltaToken::key_for("todo", "all"), "dt.todo.all");
    /// ```
    pub fn key_for(table_name: &str, query_id: &str) -> String {
        format!("dt.{}.{}", table_name, query_id)
    }

    /// Prefix shared by every token of a table.
    pub fn table_prefix(table_name: &str) -> String {
        format!("dt.{}.", table_name)
    }
}

/// Converts a watermark to its stored form (microseconds since the epoch).
pub fn watermark_to_micros(watermark: &DateTime<Utc>) -> i64 {
    watermark.timestamp_micros()
}

/// Converts a stored watermark back to a timestamp.
pub fn watermark_from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

// =============================================================================
// Unit Tests
// =============================================================================
