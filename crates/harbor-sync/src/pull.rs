//! # Pull Engine
//!
//! Fetches remote changes newer than each query's watermark and applies
//! them through the store writer.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  queries grouped by table ──► Semaphore(parallelism) + JoinSet         │
//! │                                                                         │
//! │  per table (sequential):                                               │
//! │    watermark = delta_tokens.get("dt.{table}.{query_id}")               │
//! │    GET ?$filter=(caller) and (updatedAt ge watermark)                  │
//! │        &$orderby=updatedAt asc&$top=page_size&__includedeleted=true     │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │    page ──► StoreWriter.apply_page ──► (reply) ──► GET nextLink ──► …  │
//! │                                                                         │
//! │  A table's failure is recorded in its TablePullResult; the others      │
//! │  keep going.                                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `ge` comparison re-fetches rows sitting exactly on the watermark.
//! Re-applying them is harmless; skipping them could lose a change that
//! shares its timestamp with one already seen.

use harbor_core::{DeltaToken, MAX_PARALLELISM, UPDATED_AT_FIELD};
use harbor_db::Database;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelSignal;
use crate::error::{SyncError, SyncResult};
use crate::query::{updated_since, OrderBy, QueryCompiler, QueryDescription};
use crate::remote::{Page, RemoteRequest, RemoteService};
use crate::writer::StoreWriterHandle;

// =============================================================================
// Queries & Results
// =============================================================================

/// One delta query against a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullQuery {
    pub table: String,
    /// Names the watermark; distinct queries on a table track progress apart.
    pub query_id: String,
    /// Extra filter expressions, ANDed with the watermark filter.
    pub filters: Vec<String>,
    /// Tie-breakers after `updatedAt asc`.
    pub order: Vec<OrderBy>,
    /// Rows per page; the context default when `None`.
    pub page_size: Option<u32>,
}

impl PullQuery {
    /// Pulls the whole table under the given query id.
    pub fn new(table: impl Into<String>, query_id: impl Into<String>) -> Self {
        PullQuery {
            table: table.into(),
            query_id: query_id.into(),
            filters: Vec::new(),
            order: Vec::new(),
            page_size: None,
        }
    }

    pub fn filter(mut self, clause: impl Into<String>) -> Self {
        self.filters.push(clause.into());
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order.push(order);
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn token_key(&self) -> String {
        DeltaToken::key_for(&self.table, &self.query_id)
    }
}

/// What one table's pull did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TablePullResult {
    pub additions: usize,
    pub replacements: usize,
    pub deletions: usize,
    pub skipped: usize,
    pub pages: usize,
    /// Set when the table stopped early.
    pub error: Option<String>,
}

impl TablePullResult {
    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of one pull call, per table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullResult {
    pub tables: BTreeMap<String, TablePullResult>,
}

impl PullResult {
    pub fn is_successful(&self) -> bool {
        self.tables.values().all(TablePullResult::is_successful)
    }

    pub fn table(&self, name: &str) -> Option<&TablePullResult> {
        self.tables.get(name)
    }

    /// Rows inserted, replaced or deleted across all tables.
    pub fn total_changes(&self) -> usize {
        self.tables
            .values()
            .map(|t| t.additions + t.replacements + t.deletions)
            .sum()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// One pull run. Created per call, under the sync lock.
pub struct PullEngine {
    db: Database,
    fetcher: Arc<TableFetcher>,
}

struct TableFetcher {
    db: Database,
    remote: Arc<dyn RemoteService>,
    compiler: Arc<dyn QueryCompiler>,
    writer: StoreWriterHandle,
    default_page_size: u32,
}

impl PullEngine {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteService>,
        compiler: Arc<dyn QueryCompiler>,
        writer: StoreWriterHandle,
        default_page_size: u32,
    ) -> Self {
        PullEngine {
            fetcher: Arc::new(TableFetcher {
                db: db.clone(),
                remote,
                compiler,
                writer,
                default_page_size,
            }),
            db,
        }
    }

    /// Runs `queries`, at most `parallelism` tables at a time.
    ///
    /// Fails with `PendingOperations` (fetching nothing) while any table in
    /// scope has unpushed operations.
    pub async fn run(
        &self,
        queries: Vec<PullQuery>,
        parallelism: usize,
        cancel: CancelSignal,
    ) -> SyncResult<PullResult> {
        if parallelism == 0 || parallelism > MAX_PARALLELISM {
            return Err(SyncError::InvalidConfig(format!(
                "parallelism must be between 1 and {}, got {}",
                MAX_PARALLELISM, parallelism
            )));
        }

        let mut by_table: BTreeMap<String, Vec<PullQuery>> = BTreeMap::new();
        for query in queries {
            by_table.entry(query.table.clone()).or_default().push(query);
        }

        let tables: Vec<String> = by_table.keys().cloned().collect();
        if tables.is_empty() {
            return Ok(PullResult::default());
        }

        let dirty = self.db.operations().tables_with_open(&tables).await?;
        if !dirty.is_empty() {
            warn!(tables = ?dirty, "Pull refused: pending operations");
            return Err(SyncError::PendingOperations { tables: dirty });
        }

        info!(tables = ?tables, parallelism, "Pull starting");

        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut fetches: JoinSet<(String, TablePullResult)> = JoinSet::new();

        for (table, queries) in by_table {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| SyncError::Internal("pull semaphore closed".into()))?;

            let fetcher = Arc::clone(&self.fetcher);
            let cancel = cancel.clone();
            fetches.spawn(async move {
                let _permit = permit;
                let result = fetcher.pull_table(&table, &queries, &cancel).await;
                (table, result)
            });
        }

        let mut result = PullResult::default();
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((table, table_result)) => {
                    result.tables.insert(table, table_result);
                }
                Err(e) => {
                    error!(?e, "Pull task panicked");
                    return Err(SyncError::Internal(format!("pull task failed: {}", e)));
                }
            }
        }

        info!(
            changes = result.total_changes(),
            successful = result.is_successful(),
            "Pull finished"
        );

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(result)
    }
}

// =============================================================================
// Per-Table Fetch
// =============================================================================

impl TableFetcher {
    async fn pull_table(
        &self,
        table: &str,
        queries: &[PullQuery],
        cancel: &CancelSignal,
    ) -> TablePullResult {
        let mut result = TablePullResult::default();

        for query in queries {
            if let Err(e) = self.pull_query(query, cancel, &mut result).await {
                warn!(table = %table, query_id = %query.query_id, error = %e, "Table pull failed");
                result.error = Some(e.to_string());
                break;
            }
        }

        debug!(
            table = %table,
            additions = result.additions,
            replacements = result.replacements,
            deletions = result.deletions,
            pages = result.pages,
            "Table pulled"
        );
        result
    }

    async fn pull_query(
        &self,
        query: &PullQuery,
        cancel: &CancelSignal,
        result: &mut TablePullResult,
    ) -> SyncResult<()> {
        let token_key = query.token_key();
        let watermark = self.db.delta_tokens().get(&token_key).await?;

        let mut description = QueryDescription::new(&query.table);
        description.filters = query.filters.clone();
        if let Some(ref watermark) = watermark {
            description.filters.push(updated_since(watermark));
        }
        description.order_by = std::iter::once(OrderBy::asc(UPDATED_AT_FIELD))
            .chain(query.order.iter().cloned())
            .collect();
        description.top = Some(query.page_size.unwrap_or(self.default_page_size));
        description.include_deleted = true;

        let mut request = RemoteRequest::query(&query.table, self.compiler.compile(&description));

        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let response = self.remote.send(request).await?;
            if !response.is_success() {
                return Err(SyncError::Transport(format!(
                    "HTTP {} fetching {}",
                    response.status, query.table
                )));
            }

            let page = Page::from_body(response.body.as_ref())?;
            let outcome = self
                .writer
                .apply_page(&query.table, page.items, &token_key)
                .await?;

            result.pages += 1;
            result.additions += outcome.additions;
            result.replacements += outcome.replacements;
            result.deletions += outcome.deletions;
            result.skipped += outcome.skipped;

            match page.next_link {
                Some(link) => request = RemoteRequest::next_page(&query.table, link),
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let query = PullQuery::new("todo", "mine")
            .filter("owner eq 'me'")
            .page_size(10);

        assert_eq!(query.token_key(), "dt.todo.mine");
        assert_eq!(query.filters, vec!["owner eq 'me'".to_string()]);
        assert_eq!(query.page_size, Some(10));
    }

    #[test]
    fn test_result_success_is_per_table() {
        let mut result = PullResult::default();
        result.tables.insert(
            "todo".into(),
            TablePullResult {
                additions: 2,
                deletions: 1,
                ..Default::default()
            },
        );
        assert!(result.is_successful());
        assert_eq!(result.total_changes(), 3);

        result.tables.insert(
            "tag".into(),
            TablePullResult {
                error: Some("HTTP 500".into()),
                ..Default::default()
            },
        );
        assert!(!result.is_successful());
        assert!(result.table("todo").unwrap().is_successful());
    }
}
