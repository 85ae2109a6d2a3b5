//! # Entity Repository
//!
//! Local copies of synchronized rows. Every entity type shares the
//! `entities` table; the row is stored as its JSON document, with the
//! metadata the engine needs (`version`, `updatedAt`) extracted into columns.
//!
//! ## Merge Semantics
//! ```text
//! local  { "id": "1", "title": "old", "_draft": true }
//! remote { "id": "1", "title": "new", "version": "v2" }
//!                      │
//!                      ▼   merge_documents(local, remote)
//! result { "id": "1", "title": "new", "_draft": true, "version": "v2" }
//! ```
//! Fields the server sends overwrite local values; fields only the client
//! knows about survive.

use chrono::{DateTime, Utc};
use harbor_core::{watermark_from_micros, watermark_to_micros, EntityMetadata};
use serde_json::Value;
use sqlx::{FromRow, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

// =============================================================================
// Row Types
// =============================================================================

/// A locally stored entity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub table_name: String,
    pub id: String,
    pub data: Value,
    pub version: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, FromRow)]
struct EntityRow {
    table_name: String,
    id: String,
    data: String,
    version: Option<String>,
    updated_at: Option<i64>,
}

impl TryFrom<EntityRow> for StoredEntity {
    type Error = DbError;

    fn try_from(row: EntityRow) -> DbResult<Self> {
        Ok(StoredEntity {
            data: serde_json::from_str(&row.data)?,
            table_name: row.table_name,
            id: row.id,
            version: row.version,
            updated_at: row.updated_at.and_then(watermark_from_micros),
        })
    }
}

/// Overlays `remote` onto `local`, keeping local-only object fields.
pub fn merge_documents(local: &mut Value, remote: &Value) {
    match (local.as_object_mut(), remote.as_object()) {
        (Some(local_fields), Some(remote_fields)) => {
            for (key, value) in remote_fields {
                local_fields.insert(key.clone(), value.clone());
            }
        }
        _ => *local = remote.clone(),
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for local entity rows.
#[derive(Debug, Clone)]
pub struct EntityRepository {
    pool: SqlitePool,
}

impl EntityRepository {
    /// Creates a new EntityRepository.
    pub fn new(pool: SqlitePool) -> Self {
        EntityRepository { pool }
    }

    /// Looks up one entity by identity.
    pub async fn get(&self, table_name: &str, id: &str) -> DbResult<Option<StoredEntity>> {
        let mut conn = self.pool.acquire().await?;
        fetch(&mut conn, table_name, id).await
    }

    /// Lists all local rows of a table, ordered by id.
    pub async fn list(&self, table_name: &str) -> DbResult<Vec<StoredEntity>> {
        let rows = sqlx::query_as::<_, EntityRow>(
            r#"
            SELECT table_name, id, data, version, updated_at
            FROM entities
            WHERE table_name = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredEntity::try_from).collect()
    }

    /// Counts local rows of a table.
    pub async fn count(&self, table_name: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities WHERE table_name = ?1")
            .bind(table_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Connection-Scoped Operations
// =============================================================================
// Used inside the cross-table transactions in `transactions.rs`.

pub(crate) async fn fetch(
    conn: &mut SqliteConnection,
    table_name: &str,
    id: &str,
) -> DbResult<Option<StoredEntity>> {
    let row = sqlx::query_as::<_, EntityRow>(
        r#"
        SELECT table_name, id, data, version, updated_at
        FROM entities
        WHERE table_name = ?1 AND id = ?2
        "#,
    )
    .bind(table_name)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(StoredEntity::try_from).transpose()
}

/// Inserts a new row. Fails with `UniqueViolation` if the id is taken.
pub(crate) async fn insert(
    conn: &mut SqliteConnection,
    table_name: &str,
    document: &Value,
) -> DbResult<EntityMetadata> {
    let meta = EntityMetadata::from_json(document)?;
    let data = serde_json::to_string(document)?;

    sqlx::query(
        r#"
        INSERT INTO entities (table_name, id, data, version, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(table_name)
    .bind(&meta.id)
    .bind(data)
    .bind(&meta.version)
    .bind(meta.updated_at.as_ref().map(watermark_to_micros))
    .execute(&mut *conn)
    .await
    .map_err(|e| match DbError::from(e) {
        DbError::UniqueViolation { field, .. } => DbError::UniqueViolation {
            field,
            value: format!("{}/{}", table_name, meta.id),
        },
        other => other,
    })?;

    debug!(table = %table_name, id = %meta.id, "Inserted entity");
    Ok(meta)
}

/// Writes the full document, inserting or overwriting.
pub(crate) async fn upsert(
    conn: &mut SqliteConnection,
    table_name: &str,
    document: &Value,
) -> DbResult<EntityMetadata> {
    let meta = EntityMetadata::from_json(document)?;
    let data = serde_json::to_string(document)?;

    sqlx::query(
        r#"
        INSERT INTO entities (table_name, id, data, version, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (table_name, id) DO UPDATE SET
            data = excluded.data,
            version = excluded.version,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(table_name)
    .bind(&meta.id)
    .bind(data)
    .bind(&meta.version)
    .bind(meta.updated_at.as_ref().map(watermark_to_micros))
    .execute(&mut *conn)
    .await?;

    Ok(meta)
}

/// Merges a server document into the local row (inserting if absent).
///
/// Returns true when a local row existed.
pub(crate) async fn merge_remote(
    conn: &mut SqliteConnection,
    table_name: &str,
    remote: &Value,
) -> DbResult<bool> {
    let meta = EntityMetadata::from_json(remote)?;

    match fetch(conn, table_name, &meta.id).await? {
        Some(local) => {
            let mut merged = local.data;
            merge_documents(&mut merged, remote);
            upsert(conn, table_name, &merged).await?;
            Ok(true)
        }
        None => {
            upsert(conn, table_name, remote).await?;
            Ok(false)
        }
    }
}

/// Sets only the version column and the document's `version` field.
pub(crate) async fn set_version(
    conn: &mut SqliteConnection,
    table_name: &str,
    id: &str,
    version: Option<&str>,
) -> DbResult<()> {
    if let Some(mut local) = fetch(conn, table_name, id).await? {
        if let Some(fields) = local.data.as_object_mut() {
            fields.insert(
                harbor_core::VERSION_FIELD.to_string(),
                version.map_or(Value::Null, |v| Value::String(v.to_string())),
            );
        }
        upsert(conn, table_name, &local.data).await?;
    }
    Ok(())
}

/// Deletes one row. Returns true if it existed.
pub(crate) async fn delete(
    conn: &mut SqliteConnection,
    table_name: &str,
    id: &str,
) -> DbResult<bool> {
    let result = sqlx::query("DELETE FROM entities WHERE table_name = ?1 AND id = ?2")
        .bind(table_name)
        .bind(id)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Deletes every row of a table.
pub(crate) async fn delete_table(conn: &mut SqliteConnection, table_name: &str) -> DbResult<u64> {
    let result = sqlx::query("DELETE FROM entities WHERE table_name = ?1")
        .bind(table_name)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_local_only_fields() {
        let mut local = json!({ "id": "1", "title": "old", "_draft": true });
        merge_documents(&mut local, &json!({ "id": "1", "title": "new", "version": "v2" }));

        assert_eq!(local["title"], "new");
        assert_eq!(local["_draft"], true);
        assert_eq!(local["version"], "v2");
    }

    #[test]
    fn test_merge_replaces_non_objects() {
        let mut local = json!("scalar");
        merge_documents(&mut local, &json!({ "id": "1" }));
        assert_eq!(local, json!({ "id": "1" }));
    }
}
