//! # Cross-Table Transactions
//!
//! Operations that must change an entity row together with its queue row or
//! its delta token. Each method is one SQLite transaction.
//!
//! ```text
//! record_local_mutation   entity write  + queue coalesce
//! complete_push           server echo   + queue row removed
//! settle_with_server      server entity + queue row Completed
//! apply_remote_row        pulled row    + watermark advance
//! purge_table             entities      + delta tokens (+ queue rows)
//! ```

use harbor_core::{EntityMetadata, LocalMutation, OperationKind, QueuedOperation};
use serde_json::Value;
use sqlx::SqliteConnection;
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::operations::EnqueueOutcome;
use crate::repository::{delta_token, entity, operations};

// =============================================================================
// Outcomes
// =============================================================================

/// How a push success or server-wins resolution landed on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// The row sent is settled (removed, or marked Completed).
    Settled,
    /// The row absorbed a newer local edit while the request was in flight.
    /// It stays queued, now carrying the server's version.
    Rebased,
    /// The row no longer exists.
    Vanished,
}

/// What applying one pulled row did to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteRowOutcome {
    Inserted,
    Replaced,
    Deleted,
    /// Tombstone for a row that doesn't exist locally.
    Skipped,
}

/// Rows removed by [`Database::purge_table`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub entities: u64,
    pub operations: u64,
    pub delta_tokens: u64,
}

// =============================================================================
// Transactions
// =============================================================================

impl Database {
    /// Writes a local mutation to the entity table and queues it, atomically.
    ///
    /// ## Entity Write
    /// - Add → insert (fails if the id already exists locally)
    /// - Replace → full document overwrite
    /// - Delete → row removed
    pub async fn record_local_mutation(&self, mutation: &LocalMutation) -> DbResult<EnqueueOutcome> {
        let mut tx = self.pool().begin().await?;

        let outcome = operations::enqueue(&mut tx, mutation).await?;

        match mutation.kind {
            OperationKind::Add => {
                let document: Value = serde_json::from_str(&mutation.item)?;
                entity::insert(&mut tx, &mutation.table_name, &document).await?;
            }
            OperationKind::Replace => {
                let document: Value = serde_json::from_str(&mutation.item)?;
                entity::upsert(&mut tx, &mutation.table_name, &document).await?;
            }
            OperationKind::Delete => {
                entity::delete(&mut tx, &mutation.table_name, &mutation.item_id).await?;
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Applies a successful push: the server's canonical item replaces the
    /// local copy and the queue row is removed.
    ///
    /// `server_item` is the response body (absent for deletes or empty
    /// responses). `server_version` is the ETag, used when the body carries
    /// no `version`.
    pub async fn complete_push(
        &self,
        sent: &QueuedOperation,
        server_item: Option<&Value>,
        server_version: Option<&str>,
    ) -> DbResult<Settlement> {
        // The body's version wins over the ETag header
        let server_version = server_item
            .and_then(|item| EntityMetadata::from_json(item).ok())
            .and_then(|meta| meta.version)
            .or_else(|| server_version.map(str::to_string));

        let mut tx = self.pool().begin().await?;

        let current = match operations::fetch(&mut tx, &sent.id).await? {
            Some(row) => row,
            None if sent.kind == OperationKind::Add => {
                // Add + Delete collapsed the row while the create was in
                // flight, so the server now has an entity the user deleted.
                if let Some(recreated) =
                    operations::fetch_open(&mut tx, &sent.table_name, &sent.item_id).await?
                {
                    // Re-created since then: that row now updates
                    // the server's copy instead of deleting it.
                    rebase(&mut tx, recreated, sent.kind, server_version.as_deref()).await?;
                    tx.commit().await?;
                    debug!(
                        operation_id = %sent.id,
                        item_id = %sent.item_id,
                        "Entity re-created while its create was in flight; rebased"
                    );
                    return Ok(Settlement::Rebased);
                }

                let follow_up = LocalMutation {
                    kind: OperationKind::Delete,
                    table_name: sent.table_name.clone(),
                    item_id: sent.item_id.clone(),
                    item: sent.payload.clone().unwrap_or_else(|| "{}".to_string()),
                    original: None,
                    entity_version: server_version,
                };
                operations::enqueue(&mut tx, &follow_up).await?;
                tx.commit().await?;
                warn!(
                    operation_id = %sent.id,
                    item_id = %sent.item_id,
                    "Entity deleted locally while its create was in flight; delete queued"
                );
                return Ok(Settlement::Rebased);
            }
            None => {
                warn!(operation_id = %sent.id, "Pushed operation vanished from queue");
                return Ok(Settlement::Vanished);
            }
        };

        if current.attempt_version != sent.attempt_version {
            rebase(&mut tx, current, sent.kind, server_version.as_deref()).await?;
            tx.commit().await?;
            return Ok(Settlement::Rebased);
        }

        match sent.kind {
            OperationKind::Delete => {
                entity::delete(&mut tx, &sent.table_name, &sent.item_id).await?;
            }
            OperationKind::Add | OperationKind::Replace => match server_item {
                Some(item) if item.is_object() => {
                    let mut item = item.clone();
                    stamp_version(&mut item, server_version.as_deref());
                    entity::merge_remote(&mut tx, &sent.table_name, &item).await?;
                }
                _ => {
                    if let Some(version) = server_version.as_deref() {
                        entity::set_version(&mut tx, &sent.table_name, &sent.item_id, Some(version))
                            .await?;
                    }
                }
            },
        }

        operations::remove(&mut tx, &sent.id).await?;
        tx.commit().await?;

        debug!(operation_id = %sent.id, "Push settled");
        Ok(Settlement::Settled)
    }

    /// Resolves a conflict in the server's favour: the local row becomes the
    /// server entity (or disappears if the server returned a tombstone) and
    /// the queue row is marked Completed without being resent.
    ///
    /// A missing body, or one that is not the conflicting entity (an error
    /// document, another id), fails with `InvalidEntity` and changes nothing.
    pub async fn settle_with_server(
        &self,
        sent: &QueuedOperation,
        server_item: Option<&Value>,
    ) -> DbResult<Settlement> {
        let (item, meta) = match server_item {
            Some(item) => match EntityMetadata::from_json(item) {
                Ok(meta) if meta.id == sent.item_id => (item, meta),
                Ok(meta) => {
                    return Err(DbError::InvalidEntity(format!(
                        "conflict response describes {}, not {}",
                        meta.id, sent.item_id
                    )))
                }
                Err(e) => {
                    return Err(DbError::InvalidEntity(format!(
                        "conflict response is not an entity: {}",
                        e
                    )))
                }
            },
            None => {
                return Err(DbError::InvalidEntity(
                    "conflict response carried no server entity".to_string(),
                ))
            }
        };
        let server_version = if meta.deleted { None } else { meta.version.clone() };

        let mut tx = self.pool().begin().await?;

        let current = match operations::fetch(&mut tx, &sent.id).await? {
            Some(row) => row,
            None => return Ok(Settlement::Vanished),
        };

        if current.attempt_version != sent.attempt_version {
            rebase(&mut tx, current, sent.kind, server_version.as_deref()).await?;
            tx.commit().await?;
            return Ok(Settlement::Rebased);
        }

        if meta.deleted {
            entity::delete(&mut tx, &sent.table_name, &sent.item_id).await?;
        } else {
            entity::merge_remote(&mut tx, &sent.table_name, item).await?;
        }

        operations::mark_completed(&mut tx, &sent.id).await?;
        tx.commit().await?;

        debug!(operation_id = %sent.id, "Conflict settled in favour of server");
        Ok(Settlement::Settled)
    }

    /// Applies one pulled row and, if it carries an `updatedAt`, raises the
    /// watermark under `token_key` in the same transaction.
    ///
    /// ## Decision Table
    /// ```text
    /// remote tombstoned │ local exists │ action
    /// ──────────────────┼──────────────┼────────────────────────────
    /// yes               │ yes          │ delete local         Deleted
    /// yes               │ no           │ nothing              Skipped
    /// no                │ no           │ insert               Inserted
    /// no                │ yes          │ merge into local     Replaced
    /// ```
    pub async fn apply_remote_row(
        &self,
        table_name: &str,
        row: &Value,
        token_key: &str,
    ) -> DbResult<RemoteRowOutcome> {
        let meta = EntityMetadata::from_json(row)?;
        let mut tx = self.pool().begin().await?;

        let exists = entity::fetch(&mut tx, table_name, &meta.id).await?.is_some();

        let outcome = match (meta.deleted, exists) {
            (true, true) => {
                entity::delete(&mut tx, table_name, &meta.id).await?;
                RemoteRowOutcome::Deleted
            }
            (true, false) => RemoteRowOutcome::Skipped,
            (false, false) => {
                entity::upsert(&mut tx, table_name, row).await?;
                RemoteRowOutcome::Inserted
            }
            (false, true) => {
                entity::merge_remote(&mut tx, table_name, row).await?;
                RemoteRowOutcome::Replaced
            }
        };

        if let Some(updated_at) = meta.updated_at {
            delta_token::advance(&mut tx, token_key, updated_at).await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    /// Removes every local row and delta token of a table; with
    /// `discard_operations`, its queued operations too.
    pub async fn purge_table(
        &self,
        table_name: &str,
        discard_operations: bool,
    ) -> DbResult<PurgeSummary> {
        let mut tx = self.pool().begin().await?;

        let summary = PurgeSummary {
            entities: entity::delete_table(&mut tx, table_name).await?,
            delta_tokens: delta_token::reset_table(&mut tx, table_name).await?,
            operations: if discard_operations {
                operations::delete_table(&mut tx, table_name).await?
            } else {
                0
            },
        };

        tx.commit().await?;
        Ok(summary)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Carries a server version onto a row that changed while its earlier
/// revision was in flight, so the next push sends the right `If-Match`.
async fn rebase(
    conn: &mut SqliteConnection,
    mut row: QueuedOperation,
    sent_kind: OperationKind,
    server_version: Option<&str>,
) -> DbResult<()> {
    match (sent_kind, row.kind) {
        // The server now has the entity: a pending create becomes an update.
        (OperationKind::Add, OperationKind::Add) | (OperationKind::Replace, OperationKind::Add) => {
            row.kind = OperationKind::Replace;
        }
        // The server deleted it: re-creating it locally is a create again.
        (OperationKind::Delete, OperationKind::Replace) => {
            row.kind = OperationKind::Add;
        }
        _ => {}
    }

    row.entity_version = match row.kind {
        OperationKind::Add => None,
        _ => server_version.map(str::to_string).or(row.entity_version),
    };

    debug!(
        operation_id = %row.id,
        kind = %row.kind,
        "Rebased operation onto server version"
    );

    operations::update(conn, &row).await?;

    if row.kind != OperationKind::Delete {
        entity::set_version(conn, &row.table_name, &row.item_id, row.entity_version.as_deref())
            .await?;
    }

    Ok(())
}

fn stamp_version(item: &mut Value, version: Option<&str>) {
    if let (Some(fields), Some(version)) = (item.as_object_mut(), version) {
        fields
            .entry(harbor_core::VERSION_FIELD)
            .or_insert_with(|| Value::String(version.to_string()));
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbConfig;
    use serde_json::json;

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn mutation(kind: OperationKind, body: Value) -> LocalMutation {
        LocalMutation {
            kind,
            table_name: "todo".to_string(),
            item_id: body["id"].as_str().unwrap_or_default().to_string(),
            item: body.to_string(),
            original: None,
            entity_version: body["version"].as_str().map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_local_mutation_writes_entity_and_queue_together() {
        let db = db().await;

        db.record_local_mutation(&mutation(OperationKind::Add, json!({ "id": "1", "t": "a" })))
            .await
            .unwrap();

        assert!(db.entities().get("todo", "1").await.unwrap().is_some());
        assert_eq!(db.operations().count_open(&[]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_entity_untouched() {
        let db = db().await;

        db.record_local_mutation(&mutation(OperationKind::Delete, json!({ "id": "1" })))
            .await
            .unwrap();
        let err = db
            .record_local_mutation(&mutation(OperationKind::Replace, json!({ "id": "1", "t": "b" })))
            .await
            .unwrap_err();

        assert!(err.is_coalesce());
        assert!(db.entities().get("todo", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_push_applies_server_version() {
        let db = db().await;

        let outcome = db
            .record_local_mutation(&mutation(OperationKind::Add, json!({ "id": "1", "v": 0 })))
            .await
            .unwrap();
        let sent = outcome.operation().unwrap().clone();

        let settled = db
            .complete_push(&sent, Some(&json!({ "id": "1", "v": 0, "version": "srv1" })), None)
            .await
            .unwrap();

        assert_eq!(settled, Settlement::Settled);
        assert_eq!(db.operations().count_open(&[]).await.unwrap(), 0);
        let stored = db.entities().get("todo", "1").await.unwrap().unwrap();
        assert_eq!(stored.version.as_deref(), Some("srv1"));
    }

    #[tokio::test]
    async fn test_complete_push_rebases_row_edited_in_flight() {
        let db = db().await;

        let outcome = db
            .record_local_mutation(&mutation(OperationKind::Add, json!({ "id": "1", "v": 0 })))
            .await
            .unwrap();
        let sent = outcome.operation().unwrap().clone();

        // Edit lands while the create is on the wire
        db.record_local_mutation(&mutation(OperationKind::Replace, json!({ "id": "1", "v": 1 })))
            .await
            .unwrap();

        let settled = db
            .complete_push(&sent, Some(&json!({ "id": "1", "v": 0, "version": "srv1" })), None)
            .await
            .unwrap();
        assert_eq!(settled, Settlement::Rebased);

        let row = db.operations().get(&sent.id).await.unwrap().unwrap();
        assert_eq!(row.kind, OperationKind::Replace);
        assert_eq!(row.entity_version.as_deref(), Some("srv1"));

        let stored = db.entities().get("todo", "1").await.unwrap().unwrap();
        assert_eq!(stored.data["v"], 1);
    }

    #[tokio::test]
    async fn test_settle_with_server_marks_completed() {
        let db = db().await;

        let outcome = db
            .record_local_mutation(&mutation(
                OperationKind::Replace,
                json!({ "id": "1", "t": "mine", "version": "v1" }),
            ))
            .await
            .unwrap();
        let sent = outcome.operation().unwrap().clone();

        db.settle_with_server(&sent, Some(&json!({ "id": "1", "t": "theirs", "version": "v2" })))
            .await
            .unwrap();

        let row = db.operations().get(&sent.id).await.unwrap().unwrap();
        assert!(!row.is_open());
        let stored = db.entities().get("todo", "1").await.unwrap().unwrap();
        assert_eq!(stored.data["t"], "theirs");
        assert_eq!(db.operations().purge_completed().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_complete_push_queues_delete_when_create_was_undone() {
        let db = db().await;

        let outcome = db
            .record_local_mutation(&mutation(OperationKind::Add, json!({ "id": "1", "v": 0 })))
            .await
            .unwrap();
        let sent = outcome.operation().unwrap().clone();
        db.record_local_mutation(&mutation(OperationKind::Delete, json!({ "id": "1" })))
            .await
            .unwrap();

        let settled = db
            .complete_push(&sent, Some(&json!({ "id": "1", "version": "srv1" })), None)
            .await
            .unwrap();
        assert_eq!(settled, Settlement::Rebased);

        let open = db.operations().list_open(&[]).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, OperationKind::Delete);
        assert_eq!(open[0].entity_version.as_deref(), Some("srv1"));
        assert!(db.entities().get("todo", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_push_keeps_entity_recreated_in_flight() {
        let db = db().await;

        let outcome = db
            .record_local_mutation(&mutation(OperationKind::Add, json!({ "id": "1", "v": 0 })))
            .await
            .unwrap();
        let sent = outcome.operation().unwrap().clone();

        // Deleted and created again while the first create is on the wire
        db.record_local_mutation(&mutation(OperationKind::Delete, json!({ "id": "1" })))
            .await
            .unwrap();
        db.record_local_mutation(&mutation(OperationKind::Add, json!({ "id": "1", "v": 2 })))
            .await
            .unwrap();

        let settled = db
            .complete_push(&sent, Some(&json!({ "id": "1", "version": "srv1" })), None)
            .await
            .unwrap();
        assert_eq!(settled, Settlement::Rebased);

        let open = db.operations().list_open(&[]).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].kind, OperationKind::Replace);
        assert_eq!(open[0].entity_version.as_deref(), Some("srv1"));
        assert!(open[0].payload.as_deref().unwrap().contains("\"v\":2"));

        let stored = db.entities().get("todo", "1").await.unwrap().unwrap();
        assert_eq!(stored.data["v"], 2);
        assert_eq!(stored.version.as_deref(), Some("srv1"));
    }

    #[tokio::test]
    async fn test_settle_with_server_applies_tombstone() {
        let db = db().await;

        let outcome = db
            .record_local_mutation(&mutation(
                OperationKind::Replace,
                json!({ "id": "1", "t": "mine", "version": "v1" }),
            ))
            .await
            .unwrap();
        let sent = outcome.operation().unwrap().clone();

        let settled = db
            .settle_with_server(&sent, Some(&json!({ "id": "1", "deleted": true, "version": "v2" })))
            .await
            .unwrap();

        assert_eq!(settled, Settlement::Settled);
        assert!(db.entities().get("todo", "1").await.unwrap().is_none());
        assert_eq!(db.operations().count_open(&[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_settle_with_server_rejects_non_entity_bodies() {
        let db = db().await;

        let outcome = db
            .record_local_mutation(&mutation(
                OperationKind::Replace,
                json!({ "id": "1", "t": "mine", "version": "v1" }),
            ))
            .await
            .unwrap();
        let sent = outcome.operation().unwrap().clone();

        let error_document = json!({ "message": "precondition failed" });
        let other_entity = json!({ "id": "2", "t": "theirs" });
        for body in [None, Some(&error_document), Some(&other_entity)] {
            let err = db.settle_with_server(&sent, body).await.unwrap_err();
            assert!(matches!(err, DbError::InvalidEntity(_)));
        }

        // Local row and queue row are untouched
        let stored = db.entities().get("todo", "1").await.unwrap().unwrap();
        assert_eq!(stored.data["t"], "mine");
        let row = db.operations().get(&sent.id).await.unwrap().unwrap();
        assert!(row.is_open());
    }

    #[tokio::test]
    async fn test_apply_remote_row_decision_table() {
        let db = db().await;
        let key = "dt.todo.all";

        let inserted = db
            .apply_remote_row("todo", &json!({ "id": "1", "updatedAt": "2024-01-01T00:00:00Z" }), key)
            .await
            .unwrap();
        let replaced = db
            .apply_remote_row("todo", &json!({ "id": "1", "updatedAt": "2024-01-02T00:00:00Z" }), key)
            .await
            .unwrap();
        let deleted = db
            .apply_remote_row(
                "todo",
                &json!({ "id": "1", "deleted": true, "updatedAt": "2024-01-03T00:00:00Z" }),
                key,
            )
            .await
            .unwrap();
        let skipped = db
            .apply_remote_row("todo", &json!({ "id": "2", "deleted": true }), key)
            .await
            .unwrap();

        assert_eq!(inserted, RemoteRowOutcome::Inserted);
        assert_eq!(replaced, RemoteRowOutcome::Replaced);
        assert_eq!(deleted, RemoteRowOutcome::Deleted);
        assert_eq!(skipped, RemoteRowOutcome::Skipped);

        let watermark = db.delta_tokens().get(key).await.unwrap().unwrap();
        assert_eq!(watermark.to_rfc3339(), "2024-01-03T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_purge_table() {
        let db = db().await;

        db.record_local_mutation(&mutation(OperationKind::Add, json!({ "id": "1" })))
            .await
            .unwrap();
        db.apply_remote_row("todo", &json!({ "id": "2", "updatedAt": "2024-01-01T00:00:00Z" }), "dt.todo.all")
            .await
            .unwrap();

        let summary = db.purge_table("todo", true).await.unwrap();
        assert_eq!(
            summary,
            PurgeSummary {
                entities: 2,
                operations: 1,
                delta_tokens: 1
            }
        );
        assert_eq!(db.entities().count("todo").await.unwrap(), 0);
    }
}
