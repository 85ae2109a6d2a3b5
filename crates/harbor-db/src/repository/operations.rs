//! # Operations Queue Repository
//!
//! Stores one row per net local mutation awaiting push.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL MUTATION (e.g., replace todo "1")                               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. SELECT open row FOR (table_name, item_id)                   │   │
//! │  │  2. coalesce(existing, mutation)   ← harbor-core, pure          │   │
//! │  │  3. INSERT / UPDATE / DELETE the queue row                      │   │
//! │  │  4. write the entity row (record_local_mutation only)           │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← queue and entity change together or not at all              │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • ≤ 1 open row per key (coalescing + partial UNIQUE index)            │
//! │  • sequence assigned once per key, from a counter that never resets    │
//! │  • a push result only lands on the row revision it was sent for        │
//! │    (attempt_version guard)                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use harbor_core::{coalesce, CoalescePlan, LocalMutation, OperationState, QueuedOperation};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;

const OPERATION_COLUMNS: &str = "id, kind, state, table_name, item_id, original_payload, payload, \
     entity_version, sequence, attempt_version, last_attempt, last_status_code, last_error, \
     created_at";

const SEQUENCE_COUNTER: &str = "operations_queue.sequence";

// =============================================================================
// Enqueue Outcome
// =============================================================================

/// What happened to the queue for one local mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// A new row was queued.
    Created(QueuedOperation),
    /// The mutation was merged into the existing row.
    Coalesced(QueuedOperation),
    /// The mutation cancelled the queued one (Add then Delete).
    Removed { id: String },
}

impl EnqueueOutcome {
    /// The row now in the queue, if any.
    pub fn operation(&self) -> Option<&QueuedOperation> {
        match self {
            EnqueueOutcome::Created(op) | EnqueueOutcome::Coalesced(op) => Some(op),
            EnqueueOutcome::Removed { .. } => None,
        }
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for the operations queue.
#[derive(Debug, Clone)]
pub struct OperationQueueRepository {
    pool: SqlitePool,
}

impl OperationQueueRepository {
    /// Creates a new OperationQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        OperationQueueRepository { pool }
    }

    /// Queues a local mutation, coalescing with any open row for its key.
    ///
    /// Does not touch the entity row; see `Database::record_local_mutation`
    /// for the variant that does both in one transaction.
    pub async fn enqueue(&self, mutation: &LocalMutation) -> DbResult<EnqueueOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = enqueue(&mut tx, mutation).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Gets a row by id, whatever its state.
    pub async fn get(&self, id: &str) -> DbResult<Option<QueuedOperation>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, id).await
    }

    /// Gets the open (non-Completed) row for an entity, if any.
    pub async fn find_open(
        &self,
        table_name: &str,
        item_id: &str,
    ) -> DbResult<Option<QueuedOperation>> {
        let mut conn = self.pool.acquire().await?;
        fetch_open(&mut conn, table_name, item_id).await
    }

    /// Lists open rows in `tables` (all tables when empty), oldest sequence first.
    pub async fn list_open(&self, tables: &[String]) -> DbResult<Vec<QueuedOperation>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM operations_queue WHERE state != 'completed'",
            OPERATION_COLUMNS
        ));
        push_table_filter(&mut query, tables);
        query.push(" ORDER BY sequence ASC");

        let rows = query
            .build_query_as::<QueuedOperation>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Counts open rows in `tables` (all tables when empty).
    pub async fn count_open(&self, tables: &[String]) -> DbResult<i64> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM operations_queue WHERE state != 'completed'",
        );
        push_table_filter(&mut query, tables);

        let count: i64 = query.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    /// Distinct tables in `tables` (all when empty) that have open rows.
    pub async fn tables_with_open(&self, tables: &[String]) -> DbResult<Vec<String>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT DISTINCT table_name FROM operations_queue WHERE state != 'completed'",
        );
        push_table_filter(&mut query, tables);
        query.push(" ORDER BY table_name ASC");

        let names: Vec<String> = query.build_query_scalar().fetch_all(&self.pool).await?;
        Ok(names)
    }

    /// Records a failed push attempt.
    ///
    /// Only lands if the row is still at `attempt_version`; a row that
    /// absorbed a newer local edit meanwhile is fresh work and stays Pending.
    /// Returns true when the row was updated.
    pub async fn record_failure(
        &self,
        op: &QueuedOperation,
        status_code: Option<u16>,
        error: &str,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE operations_queue SET
                state = ?3,
                last_attempt = ?4,
                last_status_code = ?5,
                last_error = ?6
            WHERE id = ?1 AND attempt_version = ?2
            "#,
        )
        .bind(&op.id)
        .bind(op.attempt_version)
        .bind(OperationState::Failed)
        .bind(Utc::now())
        .bind(status_code.map(i64::from))
        .bind(error)
        .execute(&self.pool)
        .await?;

        debug!(
            operation_id = %op.id,
            status = ?status_code,
            "Recorded push failure"
        );

        Ok(result.rows_affected() > 0)
    }

    /// Deletes Completed rows. Returns how many were removed.
    pub async fn purge_completed(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM operations_queue WHERE state = 'completed'")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn push_table_filter(query: &mut QueryBuilder<'_, Sqlite>, tables: &[String]) {
    if tables.is_empty() {
        return;
    }

    query.push(" AND table_name IN (");
    let mut separated = query.separated(", ");
    for table in tables {
        separated.push_bind(table.clone());
    }
    separated.push_unseparated(")");
}

// =============================================================================
// Connection-Scoped Operations
// =============================================================================

/// Coalesces `mutation` into the queue on an open transaction.
pub(crate) async fn enqueue(
    conn: &mut SqliteConnection,
    mutation: &LocalMutation,
) -> DbResult<EnqueueOutcome> {
    let existing = fetch_open(conn, &mutation.table_name, &mutation.item_id).await?;

    let next_sequence = match existing {
        Some(_) => 0,
        None => next_sequence(conn).await?,
    };

    let plan = coalesce(existing.as_ref(), mutation, next_sequence, Utc::now())?;

    let outcome = match plan {
        CoalescePlan::Insert(op) => {
            insert(conn, &op).await?;
            EnqueueOutcome::Created(op)
        }
        CoalescePlan::Update(op) => {
            update(conn, &op).await?;
            EnqueueOutcome::Coalesced(op)
        }
        CoalescePlan::Remove { id } => {
            remove(conn, &id).await?;
            EnqueueOutcome::Removed { id }
        }
    };

    debug!(
        table = %mutation.table_name,
        item_id = %mutation.item_id,
        kind = %mutation.kind,
        outcome = ?outcome_label(&outcome),
        "Queued local mutation"
    );

    Ok(outcome)
}

fn outcome_label(outcome: &EnqueueOutcome) -> &'static str {
    match outcome {
        EnqueueOutcome::Created(_) => "created",
        EnqueueOutcome::Coalesced(_) => "coalesced",
        EnqueueOutcome::Removed { .. } => "removed",
    }
}

pub(crate) async fn fetch(
    conn: &mut SqliteConnection,
    id: &str,
) -> DbResult<Option<QueuedOperation>> {
    let row = sqlx::query_as::<_, QueuedOperation>(&format!(
        "SELECT {} FROM operations_queue WHERE id = ?1",
        OPERATION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

pub(crate) async fn fetch_open(
    conn: &mut SqliteConnection,
    table_name: &str,
    item_id: &str,
) -> DbResult<Option<QueuedOperation>> {
    let row = sqlx::query_as::<_, QueuedOperation>(&format!(
        "SELECT {} FROM operations_queue \
         WHERE table_name = ?1 AND item_id = ?2 AND state != 'completed'",
        OPERATION_COLUMNS
    ))
    .bind(table_name)
    .bind(item_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row)
}

async fn next_sequence(conn: &mut SqliteConnection) -> DbResult<i64> {
    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO sync_counters (name, value) VALUES (?1, 1)
        ON CONFLICT (name) DO UPDATE SET value = value + 1
        RETURNING value
        "#,
    )
    .bind(SEQUENCE_COUNTER)
    .fetch_one(&mut *conn)
    .await?;

    Ok(value)
}

async fn insert(conn: &mut SqliteConnection, op: &QueuedOperation) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO operations_queue (
            id, kind, state, table_name, item_id, original_payload, payload,
            entity_version, sequence, attempt_version, last_attempt,
            last_status_code, last_error, created_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5, ?6, ?7,
            ?8, ?9, ?10, ?11,
            ?12, ?13, ?14
        )
        "#,
    )
    .bind(&op.id)
    .bind(op.kind)
    .bind(op.state)
    .bind(&op.table_name)
    .bind(&op.item_id)
    .bind(&op.original_payload)
    .bind(&op.payload)
    .bind(&op.entity_version)
    .bind(op.sequence)
    .bind(op.attempt_version)
    .bind(op.last_attempt)
    .bind(op.last_status_code)
    .bind(&op.last_error)
    .bind(op.created_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Overwrites the mutable columns of an existing row.
pub(crate) async fn update(conn: &mut SqliteConnection, op: &QueuedOperation) -> DbResult<()> {
    sqlx::query(
        r#"
        UPDATE operations_queue SET
            kind = ?2,
            state = ?3,
            payload = ?4,
            entity_version = ?5,
            attempt_version = ?6
        WHERE id = ?1
        "#,
    )
    .bind(&op.id)
    .bind(op.kind)
    .bind(op.state)
    .bind(&op.payload)
    .bind(&op.entity_version)
    .bind(op.attempt_version)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn remove(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM operations_queue WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn mark_completed(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    sqlx::query("UPDATE operations_queue SET state = ?2, last_attempt = ?3 WHERE id = ?1")
        .bind(id)
        .bind(OperationState::Completed)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

    Ok(())
}

pub(crate) async fn delete_table(conn: &mut SqliteConnection, table_name: &str) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM operations_queue WHERE table_name = ?1")
        .bind(table_name)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================
