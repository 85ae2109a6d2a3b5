//! # Delta Token Repository
//!
//! Persisted pull watermarks, one per (table, query).
//!
//! ## Monotonic Advance
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  advance("dt.todo.all", candidate)                                     │
//! │                                                                         │
//! │  INSERT ... ON CONFLICT(id) DO UPDATE                                  │
//! │      SET watermark = excluded.watermark                                │
//! │      WHERE excluded.watermark > delta_tokens.watermark                 │
//! │                                                                         │
//! │  no row yet         → row created          (rows_affected = 1)         │
//! │  candidate > stored → watermark raised     (rows_affected = 1)         │
//! │  candidate ≤ stored → untouched            (rows_affected = 0)         │
//! │                                                                         │
//! │  One statement: no read-modify-write window, never regresses.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use harbor_core::{watermark_from_micros, watermark_to_micros, DeltaToken};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for delta tokens.
#[derive(Debug, Clone)]
pub struct DeltaTokenRepository {
    pool: SqlitePool,
}

impl DeltaTokenRepository {
    /// Creates a new DeltaTokenRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeltaTokenRepository { pool }
    }

    /// Returns the watermark for `key`, if one was ever recorded.
    pub async fn get(&self, key: &str) -> DbResult<Option<DateTime<Utc>>> {
        let micros: Option<i64> =
            sqlx::query_scalar("SELECT watermark FROM delta_tokens WHERE id = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        micros.map(decode).transpose()
    }

    /// Raises the watermark for `key` to `candidate` if it is newer.
    ///
    /// Returns true when the stored watermark changed.
    pub async fn advance(&self, key: &str, candidate: DateTime<Utc>) -> DbResult<bool> {
        let mut conn = self.pool.acquire().await?;
        advance(&mut conn, key, candidate).await
    }

    /// Forgets the watermark for `key`; the next pull starts from scratch.
    pub async fn reset(&self, key: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM delta_tokens WHERE id = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Forgets every watermark recorded for `table_name`.
    pub async fn reset_table(&self, table_name: &str) -> DbResult<u64> {
        let mut conn = self.pool.acquire().await?;
        reset_table(&mut conn, table_name).await
    }

    /// Lists all tokens, ordered by key.
    pub async fn list(&self) -> DbResult<Vec<DeltaToken>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT id, watermark FROM delta_tokens ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(key, micros)| {
                Ok(DeltaToken {
                    key,
                    watermark: decode(micros)?,
                })
            })
            .collect()
    }
}

fn decode(micros: i64) -> DbResult<DateTime<Utc>> {
    watermark_from_micros(micros)
        .ok_or_else(|| DbError::Internal(format!("watermark out of range: {}", micros)))
}

// =============================================================================
// Connection-Scoped Operations
// =============================================================================

pub(crate) async fn advance(
    conn: &mut SqliteConnection,
    key: &str,
    candidate: DateTime<Utc>,
) -> DbResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO delta_tokens (id, watermark)
        VALUES (?1, ?2)
        ON CONFLICT (id) DO UPDATE SET
            watermark = excluded.watermark
        WHERE excluded.watermark > delta_tokens.watermark
        "#,
    )
    .bind(key)
    .bind(watermark_to_micros(&candidate))
    .execute(&mut *conn)
    .await?;

    let advanced = result.rows_affected() > 0;
    if advanced {
        debug!(key = %key, watermark = %candidate, "Delta token advanced");
    }
    Ok(advanced)
}

pub(crate) async fn reset_table(conn: &mut SqliteConnection, table_name: &str) -> DbResult<u64> {
    // Prefix match without LIKE: table names may contain '_'
    let prefix = DeltaToken::table_prefix(table_name);
    let result = sqlx::query("DELETE FROM delta_tokens WHERE substr(id, 1, length(?1)) = ?1")
        .bind(prefix)
        .execute(&mut *conn)
        .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Unit Tests
// =============================================================================
