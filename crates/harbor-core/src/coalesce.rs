//! # Coalescing
//!
//! The queue only ever expresses the *net* effect of local edits since the
//! last successful push. When a second edit arrives for an entity that is
//! already queued, the two are merged here.
//!
//! ## Transition Table
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   existing \ incoming │ Add              │ Replace          │ Delete    │
//! │  ─────────────────────┼──────────────────┼──────────────────┼────────── │
//! │   (none)              │ create Add       │ create Replace   │ create    │
//! │                       │                  │                  │ Delete    │
//! │   Add                 │ ✗ duplicate      │ Add, new payload │ remove    │
//! │                       │   create         │                  │ row       │
//! │   Replace             │ ✗ create after   │ Replace, new     │ Delete    │
//! │                       │   update         │ payload          │           │
//! │   Delete              │ Replace, new     │ ✗ update after   │ ✗ dup     │
//! │                       │ payload          │   delete         │ delete    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Add + Delete collapses to nothing: the server never saw the entity, so
//! there is nothing to send.

use chrono::{DateTime, Utc};

use crate::error::CoalesceError;
use crate::types::{LocalMutation, OperationKind, OperationState, QueuedOperation};

// =============================================================================
// Kind Transitions
// =============================================================================

/// Outcome of merging an incoming kind into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindTransition {
    /// Nothing queued for the key; create a row of this kind.
    Create(OperationKind),
    /// Keep the row, now with this kind.
    Update(OperationKind),
    /// Drop the row.
    Remove,
}

/// Applies the transition table to a pair of kinds.
pub fn coalesce_kinds(
    existing: Option<OperationKind>,
    incoming: OperationKind,
) -> Result<KindTransition, CoalesceError> {
    use OperationKind::*;

    let existing = match existing {
        None => return Ok(KindTransition::Create(incoming)),
        Some(kind) => kind,
    };

    match (existing, incoming) {
        (Add, Add) => Err(CoalesceError::DuplicateCreate),
        (Add, Replace) => Ok(KindTransition::Update(Add)),
        (Add, Delete) => Ok(KindTransition::Remove),

        (Replace, Add) => Err(CoalesceError::CreateAfterUpdate),
        (Replace, Replace) => Ok(KindTransition::Update(Replace)),
        (Replace, Delete) => Ok(KindTransition::Update(Delete)),

        (Delete, Add) => Ok(KindTransition::Update(Replace)),
        (Delete, Replace) => Err(CoalesceError::UpdateAfterDelete),
        (Delete, Delete) => Err(CoalesceError::DuplicateDelete),
    }
}

// =============================================================================
// Row Plans
// =============================================================================

/// What the store has to do to the queue for one local mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum CoalescePlan {
    /// Insert a new row.
    Insert(QueuedOperation),
    /// Overwrite the existing row (same id and sequence).
    Update(QueuedOperation),
    /// Delete the existing row.
    Remove { id: String },
}

/// Merges `mutation` into the open row for its key, if there is one.
///
/// `existing` must be the non-Completed row for the same
/// `(table_name, item_id)`. `next_sequence` is only used when a new row is
/// created.
pub fn coalesce(
    existing: Option<&QueuedOperation>,
    mutation: &LocalMutation,
    next_sequence: i64,
    now: DateTime<Utc>,
) -> Result<CoalescePlan, CoalesceError> {
    let transition = coalesce_kinds(existing.map(|op| op.kind), mutation.kind)?;

    let plan = match (transition, existing) {
        (KindTransition::Create(_), _) | (_, None) => {
            CoalescePlan::Insert(QueuedOperation::from_mutation(mutation, next_sequence, now))
        }
        (KindTransition::Remove, Some(op)) => CoalescePlan::Remove { id: op.id.clone() },
        (KindTransition::Update(kind), Some(op)) => {
            let mut merged = op.clone();
            merged.kind = kind;
            merged.payload = match kind {
                OperationKind::Delete => None,
                OperationKind::Add | OperationKind::Replace => Some(mutation.item.clone()),
            };
            // The server still holds the version it last handed out.
            merged.entity_version = op
                .entity_version
                .clone()
                .or_else(|| mutation.entity_version.clone());
            merged.attempt_version = op.attempt_version + 1;
            // A merged row is new work, whatever the last push said.
            merged.state = OperationState::Pending;
            CoalescePlan::Update(merged)
        }
    };

    Ok(plan)
}

// =============================================================================
// Unit Tests
// =============================================================================
