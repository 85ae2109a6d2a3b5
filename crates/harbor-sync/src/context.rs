//! # Sync Context
//!
//! The application's entry point: registers tables, records local changes,
//! and runs push, pull and purge against one store and one remote.
//!
//! ## Usage
//! ```rust,ignore
//! let db = Database::new(DbConfig::new("app.db")).await?;
//! let remote = Arc::new(HttpRemoteService::new("https://api.example.com", timeout)?);
//!
//! let mut ctx = SyncContext::new(db, remote).with_conflict_policy(ConflictPolicy::ServerWins);
//! ctx.register_table::<TodoItem>(TableOptions::default())?;
//!
//! ctx.insert_item(&item).await?;
//! let pushed = ctx.push(&[], 4, CancelSignal::never()).await?;
//! let pulled = ctx.pull(vec![PullQuery::new("todo", "all")], 2, CancelSignal::never()).await?;
//! ```

use harbor_core::validation::validate_table_name;
use harbor_core::{DeltaToken, OperationKind, QueuedOperation, SyncEntity};
use harbor_db::{Database, EnqueueOutcome};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

use crate::cancel::CancelSignal;
use crate::config::HarborConfig;
use crate::conflict::ConflictPolicy;
use crate::error::{SyncError, SyncResult};
use crate::http::HttpRemoteService;
use crate::lock::SyncLock;
use crate::pull::{PullEngine, PullQuery, PullResult};
use crate::push::{PushEngine, PushResult};
use crate::query::{ODataQueryCompiler, QueryCompiler};
use crate::queue::QueueManager;
use crate::remote::RemoteService;
use crate::writer::StoreWriter;

// =============================================================================
// Table Registry
// =============================================================================

/// Per-table settings, fixed at registration.
#[derive(Debug, Clone, Default)]
pub struct TableOptions {
    /// Overrides the context-wide conflict policy for this table.
    pub conflict_policy: Option<ConflictPolicy>,
    /// Default page size for pulls of this table.
    pub page_size: Option<u32>,
}

impl TableOptions {
    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = Some(policy);
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }
}

// =============================================================================
// Context
// =============================================================================

/// One local store synchronized with one remote service.
pub struct SyncContext {
    db: Database,
    remote: Arc<dyn RemoteService>,
    compiler: Arc<dyn QueryCompiler>,
    queue: QueueManager,
    lock: SyncLock,
    config: HarborConfig,
    conflict_policy: Option<ConflictPolicy>,
    tables: BTreeMap<String, TableOptions>,
}

impl SyncContext {
    /// Creates a context with default settings and the OData compiler.
    pub fn new(db: Database, remote: Arc<dyn RemoteService>) -> Self {
        SyncContext {
            queue: QueueManager::new(db.clone()),
            db,
            remote,
            compiler: Arc::new(ODataQueryCompiler),
            lock: SyncLock::new("harbor.sync"),
            config: HarborConfig::default(),
            conflict_policy: None,
            tables: BTreeMap::new(),
        }
    }

    /// Opens the configured store and HTTP remote.
    pub async fn open(config: HarborConfig) -> SyncResult<Self> {
        config.validate()?;

        let db = Database::new(config.store.db_config()).await?;
        let remote = Arc::new(HttpRemoteService::from_settings(&config.remote)?);

        info!(
            database = %config.store.database_path.display(),
            remote = ?config.remote_url(),
            "Sync context opened"
        );
        Ok(Self::new(db, remote).with_config(config))
    }

    pub fn with_config(mut self, config: HarborConfig) -> Self {
        self.config = config;
        self
    }

    /// Context-wide conflict policy. Without one, conflicts are left Failed.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = Some(policy);
        self
    }

    pub fn with_query_compiler(mut self, compiler: Arc<dyn QueryCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &HarborConfig {
        &self.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers `T`'s table. Registering the same table again replaces
    /// its options.
    pub fn register_table<T: SyncEntity>(&mut self, options: TableOptions) -> SyncResult<()> {
        validate_table_name(T::TABLE).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;
        self.tables.insert(T::TABLE.to_string(), options);
        Ok(())
    }

    pub fn is_registered(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn registered_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn ensure_registered(&self, table: &str) -> SyncResult<()> {
        if self.is_registered(table) {
            Ok(())
        } else {
            Err(SyncError::UnknownTable(table.to_string()))
        }
    }

    /// Validates `tables`, expanding an empty list to every registered table.
    fn scope(&self, tables: &[&str]) -> SyncResult<Vec<String>> {
        if tables.is_empty() {
            return Ok(self.registered_tables());
        }
        tables
            .iter()
            .map(|table| {
                self.ensure_registered(table)?;
                Ok(table.to_string())
            })
            .collect()
    }

    // =========================================================================
    // Local Mutations
    // =========================================================================

    /// Records a mutation of `entity` in the queue (and the local store).
    pub async fn enqueue<T: SyncEntity>(
        &self,
        kind: OperationKind,
        entity: &T,
    ) -> SyncResult<EnqueueOutcome> {
        self.ensure_registered(T::TABLE)?;
        let original = match kind {
            OperationKind::Add => None,
            OperationKind::Replace | OperationKind::Delete => self.get_item::<T>(entity.id()).await?,
        };
        self.queue.enqueue(kind, entity, original.as_ref()).await
    }

    /// Creates `entity` locally and queues its creation.
    pub async fn insert_item<T: SyncEntity>(&self, entity: &T) -> SyncResult<EnqueueOutcome> {
        self.enqueue(OperationKind::Add, entity).await
    }

    /// Overwrites `entity` locally and queues the replacement.
    pub async fn replace_item<T: SyncEntity>(&self, entity: &T) -> SyncResult<EnqueueOutcome> {
        self.enqueue(OperationKind::Replace, entity).await
    }

    /// Deletes `entity` locally and queues the deletion.
    pub async fn delete_item<T: SyncEntity>(&self, entity: &T) -> SyncResult<EnqueueOutcome> {
        self.enqueue(OperationKind::Delete, entity).await
    }

    /// Reads one local entity.
    pub async fn get_item<T: SyncEntity>(&self, id: &str) -> SyncResult<Option<T>> {
        self.db
            .entities()
            .get(T::TABLE, id)
            .await?
            .map(|stored| serde_json::from_value(stored.data).map_err(SyncError::from))
            .transpose()
    }

    /// Reads every local entity of `T`'s table.
    pub async fn list_items<T: SyncEntity>(&self) -> SyncResult<Vec<T>> {
        self.db
            .entities()
            .list(T::TABLE)
            .await?
            .into_iter()
            .map(|stored| serde_json::from_value(stored.data).map_err(SyncError::from))
            .collect()
    }

    // =========================================================================
    // Queue Inspection
    // =========================================================================

    /// Open operations for `tables` (all registered tables when empty).
    pub async fn pending_operations(&self, tables: &[&str]) -> SyncResult<Vec<QueuedOperation>> {
        let scope = self.scope(tables)?;
        Ok(self.db.operations().list_open(&scope).await?)
    }

    pub async fn pending_operations_count(&self, tables: &[&str]) -> SyncResult<i64> {
        let scope = self.scope(tables)?;
        Ok(self.db.operations().count_open(&scope).await?)
    }

    // =========================================================================
    // Push / Pull
    // =========================================================================

    /// Pushes open operations for `tables` (all registered tables when empty).
    pub async fn push(
        &self,
        tables: &[&str],
        max_parallelism: usize,
        cancel: CancelSignal,
    ) -> SyncResult<PushResult> {
        let scope = self.scope(tables)?;
        if scope.is_empty() {
            return Ok(PushResult::default());
        }

        let _guard = self.lock.acquire("push").await;

        let table_policies: HashMap<String, ConflictPolicy> = self
            .tables
            .iter()
            .filter_map(|(name, options)| {
                options
                    .conflict_policy
                    .clone()
                    .map(|policy| (name.clone(), policy))
            })
            .collect();

        let writer = StoreWriter::spawn(self.db.clone(), self.config.pull.writer_queue_capacity);
        let engine = PushEngine::new(
            self.db.clone(),
            Arc::clone(&self.remote),
            writer.handle(),
            self.conflict_policy.clone(),
            table_policies,
        );

        let result = engine.run(&scope, max_parallelism, cancel).await;
        drop(engine);
        writer.finish().await?;
        result
    }

    /// Pushes everything with the configured parallelism.
    pub async fn push_all(&self) -> SyncResult<PushResult> {
        self.push(&[], self.config.push.max_parallelism, CancelSignal::never())
            .await
    }

    /// Runs delta `queries`, at most `parallelism` tables at a time.
    pub async fn pull(
        &self,
        queries: Vec<PullQuery>,
        parallelism: usize,
        cancel: CancelSignal,
    ) -> SyncResult<PullResult> {
        let queries = queries
            .into_iter()
            .map(|mut query| {
                let options = self
                    .tables
                    .get(&query.table)
                    .ok_or_else(|| SyncError::UnknownTable(query.table.clone()))?;
                if query.page_size.is_none() {
                    query.page_size = options.page_size;
                }
                Ok(query)
            })
            .collect::<SyncResult<Vec<_>>>()?;

        let _guard = self.lock.acquire("pull").await;

        let writer = StoreWriter::spawn(self.db.clone(), self.config.pull.writer_queue_capacity);
        let engine = PullEngine::new(
            self.db.clone(),
            Arc::clone(&self.remote),
            Arc::clone(&self.compiler),
            writer.handle(),
            self.config.pull.page_size,
        );

        let result = engine.run(queries, parallelism, cancel).await;
        drop(engine);
        writer.finish().await?;
        result
    }

    /// Pulls every registered table under the query id `"all"`.
    pub async fn pull_all(&self) -> SyncResult<PullResult> {
        let queries = self
            .tables
            .keys()
            .map(|table| PullQuery::new(table.clone(), "all"))
            .collect();
        self.pull(queries, self.config.pull.parallelism, CancelSignal::never())
            .await
    }

    // =========================================================================
    // Purge & Tokens
    // =========================================================================

    /// Drops every local row and delta token of `table`.
    ///
    /// Refuses with `PendingOperations` while the table has open operations,
    /// unless `discard_pending` is set, in which case they are dropped too.
    /// Returns the number of entities removed.
    pub async fn purge(&self, table: &str, discard_pending: bool) -> SyncResult<u64> {
        self.ensure_registered(table)?;
        let _guard = self.lock.acquire("purge").await;

        if !discard_pending {
            let scope = vec![table.to_string()];
            if self.db.operations().count_open(&scope).await? > 0 {
                return Err(SyncError::PendingOperations { tables: scope });
            }
        }

        let summary = self.db.purge_table(table, discard_pending).await?;
        info!(
            table = %table,
            entities = summary.entities,
            operations = summary.operations,
            delta_tokens = summary.delta_tokens,
            "Table purged"
        );
        Ok(summary.entities)
    }

    /// Removes Completed queue rows left by server-wins resolutions.
    pub async fn purge_completed(&self) -> SyncResult<u64> {
        let _guard = self.lock.acquire("purge").await;
        Ok(self.db.operations().purge_completed().await?)
    }

    /// Forgets one query's watermark; its next pull starts from scratch.
    pub async fn reset_delta_token(&self, table: &str, query_id: &str) -> SyncResult<bool> {
        let _guard = self.lock.acquire("reset").await;
        Ok(self
            .db
            .delta_tokens()
            .reset(&DeltaToken::key_for(table, query_id))
            .await?)
    }
}
