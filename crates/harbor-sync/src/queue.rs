//! # Queue Manager
//!
//! Records local mutations: the entity row and its queued operation are
//! written in one transaction, coalescing with whatever is already queued
//! for the same `(table, id)`.
//!
//! ## Coalescing
//! ```text
//! existing \ incoming │ Add                 │ Replace             │ Delete
//! ────────────────────┼─────────────────────┼─────────────────────┼──────────────────
//! (none)              │ create Add          │ create Replace      │ create Delete
//! Add                 │ QueueConflict       │ Add, new payload    │ row removed
//! Replace             │ QueueConflict       │ Replace, new payload│ becomes Delete
//! Delete              │ Replace, new payload│ QueueConflict       │ QueueConflict
//! ```
//!
//! A conflict means the caller issued mutations in an impossible order.
//! Nothing is written and the error is not retryable.

use harbor_core::{EntityMetadata, LocalMutation, OperationKind, SyncEntity};
use harbor_db::{Database, DbError, EnqueueOutcome};
use serde_json::Value;
use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Front door for local mutations.
#[derive(Debug, Clone)]
pub struct QueueManager {
    db: Database,
}

impl QueueManager {
    pub fn new(db: Database) -> Self {
        QueueManager { db }
    }

    /// Records a mutation of a typed entity.
    ///
    /// For a delete, `entity` is the item as it stood before deletion.
    pub async fn enqueue<T: SyncEntity>(
        &self,
        kind: OperationKind,
        entity: &T,
        original: Option<&T>,
    ) -> SyncResult<EnqueueOutcome> {
        let meta = EntityMetadata::of(entity)?;
        let item = serde_json::to_string(entity)?;
        let original = original.map(serde_json::to_string).transpose()?;

        let mutation = LocalMutation {
            kind,
            table_name: T::TABLE.to_string(),
            item_id: meta.id,
            item,
            original,
            entity_version: meta.version,
        };

        self.record(mutation).await
    }

    /// Records a mutation of an untyped JSON entity.
    pub async fn enqueue_json(
        &self,
        kind: OperationKind,
        table: &str,
        item: &Value,
    ) -> SyncResult<EnqueueOutcome> {
        let meta = EntityMetadata::from_json(item)?;

        let mutation = LocalMutation {
            kind,
            table_name: table.to_string(),
            item_id: meta.id,
            item: serde_json::to_string(item)?,
            original: None,
            entity_version: meta.version,
        };

        self.record(mutation).await
    }

    async fn record(&self, mutation: LocalMutation) -> SyncResult<EnqueueOutcome> {
        let outcome = self
            .db
            .record_local_mutation(&mutation)
            .await
            .map_err(|e| match e {
                DbError::Coalesce(source) => {
                    SyncError::queue_conflict(&mutation.table_name, &mutation.item_id, source)
                }
                other => SyncError::from(other),
            })?;

        debug!(
            table = %mutation.table_name,
            item_id = %mutation.item_id,
            kind = %mutation.kind,
            outcome = outcome_name(&outcome),
            "Local mutation queued"
        );

        Ok(outcome)
    }
}

fn outcome_name(outcome: &EnqueueOutcome) -> &'static str {
    match outcome {
        EnqueueOutcome::Created(_) => "created",
        EnqueueOutcome::Coalesced(_) => "coalesced",
        EnqueueOutcome::Removed { .. } => "removed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::{CoalesceError, OperationState};
    use harbor_db::DbConfig;
    use serde_json::json;

    async fn manager() -> (Database, QueueManager) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        (db.clone(), QueueManager::new(db))
    }

    #[tokio::test]
    async fn test_add_then_replace_keeps_add_with_new_payload() {
        let (db, queue) = manager().await;

        queue
            .enqueue_json(OperationKind::Add, "todo", &json!({ "id": "1", "title": "v0" }))
            .await
            .unwrap();
        let outcome = queue
            .enqueue_json(OperationKind::Replace, "todo", &json!({ "id": "1", "title": "v1" }))
            .await
            .unwrap();

        let op = outcome.operation().unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Coalesced(_)));
        assert_eq!(op.kind, OperationKind::Add);
        assert_eq!(op.state, OperationState::Pending);
        assert_eq!(op.payload_value().unwrap().unwrap()["title"], "v1");

        assert_eq!(db.operations().count_open(&[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_then_delete_leaves_nothing() {
        let (db, queue) = manager().await;
        let item = json!({ "id": "1", "title": "v0" });

        queue.enqueue_json(OperationKind::Add, "todo", &item).await.unwrap();
        let outcome = queue
            .enqueue_json(OperationKind::Delete, "todo", &item)
            .await
            .unwrap();

        assert!(matches!(outcome, EnqueueOutcome::Removed { .. }));
        assert_eq!(db.operations().count_open(&[]).await.unwrap(), 0);
        assert!(db.entities().get("todo", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_delete_is_a_queue_conflict() {
        let (db, queue) = manager().await;
        let item = json!({ "id": "1", "version": "v3" });

        queue.enqueue_json(OperationKind::Delete, "todo", &item).await.unwrap();
        let err = queue
            .enqueue_json(OperationKind::Delete, "todo", &item)
            .await
            .unwrap_err();

        match err {
            SyncError::QueueConflict {
                table,
                item_id,
                source,
            } => {
                assert_eq!(table, "todo");
                assert_eq!(item_id, "1");
                assert_eq!(source, CoalesceError::DuplicateDelete);
            }
            other => panic!("expected QueueConflict, got {:?}", other),
        }

        let ops = db.operations().list_open(&[]).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].entity_version.as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn test_entity_without_identity_is_rejected() {
        let (db, queue) = manager().await;

        let err = queue
            .enqueue_json(OperationKind::Add, "todo", &json!({ "title": "nameless" }))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidEntity(_)));

        let err = queue
            .enqueue_json(OperationKind::Add, "todo", &json!({ "id": "" }))
            .await
            .unwrap_err();
        assert!(err.is_sequencing_error());

        assert_eq!(db.operations().count_open(&[]).await.unwrap(), 0);
    }
}
