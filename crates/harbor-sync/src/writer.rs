//! # Store Writer
//!
//! The single task that applies push and pull results to the local store.
//!
//! ## Fan-In
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  push worker 1 ──┐                                                     │
//! │  push worker 2 ──┤      bounded mpsc            ┌────────────────┐     │
//! │  pull table A  ──┼────► [req][req][req] ───────►│  StoreWriter   │     │
//! │  pull table B  ──┘      (capacity N,            │  run() loop    │     │
//! │        ▲                 back-pressure)         └───────┬────────┘     │
//! │        │                                                │              │
//! │        └──────────── oneshot reply ◄────────────────────┘              │
//! │                                                                         │
//! │  Each request is one SQLite transaction. A sender awaits its reply     │
//! │  before doing anything that depends on the write (e.g. fetching the   │
//! │  next page), so per-table page order is preserved end to end.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use harbor_core::{EntityMetadata, QueuedOperation};
use harbor_db::{Database, RemoteRowOutcome, Settlement};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Requests
// =============================================================================

/// Counts from applying one page of pulled rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageOutcome {
    pub additions: usize,
    pub replacements: usize,
    pub deletions: usize,
    /// Rows without a usable identity, and tombstones for unknown rows.
    pub skipped: usize,
}

enum WriteRequest {
    CompletePush {
        sent: QueuedOperation,
        server_item: Option<Value>,
        server_version: Option<String>,
        reply: oneshot::Sender<SyncResult<Settlement>>,
    },
    SettleWithServer {
        sent: QueuedOperation,
        server_item: Option<Value>,
        reply: oneshot::Sender<SyncResult<Settlement>>,
    },
    RecordFailure {
        sent: QueuedOperation,
        status_code: Option<u16>,
        message: String,
        reply: oneshot::Sender<SyncResult<bool>>,
    },
    ApplyPage {
        table: String,
        rows: Vec<Value>,
        token_key: String,
        reply: oneshot::Sender<SyncResult<PageOutcome>>,
    },
}

// =============================================================================
// Store Writer
// =============================================================================

/// Owns every store write made on behalf of push and pull.
pub struct StoreWriter {
    /// Database connection.
    db: Database,

    /// Receiver for write requests.
    request_rx: mpsc::Receiver<WriteRequest>,

    /// Shutdown receiver.
    shutdown_rx: mpsc::Receiver<()>,
}

/// Handle for submitting writes to the store writer.
#[derive(Clone)]
pub struct StoreWriterHandle {
    /// Sender for write requests.
    request_tx: mpsc::Sender<WriteRequest>,

    /// Shutdown sender.
    shutdown_tx: mpsc::Sender<()>,
}

impl StoreWriterHandle {
    async fn submit<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<SyncResult<T>>) -> WriteRequest,
    ) -> SyncResult<T> {
        let (reply, rx) = oneshot::channel();
        self.request_tx
            .send(build(reply))
            .await
            .map_err(|_| SyncError::ChannelError("Store writer channel closed".into()))?;

        rx.await
            .map_err(|_| SyncError::ChannelError("Store writer dropped the reply".into()))?
    }

    /// Settles a successful push. See [`Database::complete_push`].
    pub async fn complete_push(
        &self,
        sent: QueuedOperation,
        server_item: Option<Value>,
        server_version: Option<String>,
    ) -> SyncResult<Settlement> {
        self.submit(|reply| WriteRequest::CompletePush {
            sent,
            server_item,
            server_version,
            reply,
        })
        .await
    }

    /// Adopts the server's item after a conflict. See [`Database::settle_with_server`].
    pub async fn settle_with_server(
        &self,
        sent: QueuedOperation,
        server_item: Option<Value>,
    ) -> SyncResult<Settlement> {
        self.submit(|reply| WriteRequest::SettleWithServer {
            sent,
            server_item,
            reply,
        })
        .await
    }

    /// Marks an operation Failed, unless it changed since it was sent.
    pub async fn record_failure(
        &self,
        sent: QueuedOperation,
        status_code: Option<u16>,
        message: String,
    ) -> SyncResult<bool> {
        self.submit(|reply| WriteRequest::RecordFailure {
            sent,
            status_code,
            message,
            reply,
        })
        .await
    }

    /// Applies a page of pulled rows in order, advancing `token_key`.
    pub async fn apply_page(
        &self,
        table: &str,
        rows: Vec<Value>,
        token_key: &str,
    ) -> SyncResult<PageOutcome> {
        self.submit(|reply| WriteRequest::ApplyPage {
            table: table.to_string(),
            rows,
            token_key: token_key.to_string(),
            reply,
        })
        .await
    }

    /// Triggers graceful shutdown.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Shutdown channel closed".into()))
    }
}

impl StoreWriter {
    /// Creates a new store writer and returns a handle.
    ///
    /// `capacity` bounds the request channel; senders wait when it is full.
    pub fn new(db: Database, capacity: usize) -> (Self, StoreWriterHandle) {
        let (request_tx, request_rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let writer = StoreWriter {
            db,
            request_rx,
            shutdown_rx,
        };

        let handle = StoreWriterHandle {
            request_tx,
            shutdown_tx,
        };

        (writer, handle)
    }

    /// Creates a writer and spawns its loop on the current runtime.
    pub fn spawn(db: Database, capacity: usize) -> WriterTask {
        let (writer, handle) = Self::new(db, capacity);
        let join = tokio::spawn(writer.run());
        WriterTask { handle, join }
    }

    /// Runs the writer loop until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        debug!("Store writer starting");

        loop {
            tokio::select! {
                Some(request) = self.request_rx.recv() => {
                    self.handle(request).await;
                }

                _ = self.shutdown_rx.recv() => {
                    // Anything already queued still gets written
                    while let Ok(request) = self.request_rx.try_recv() {
                        self.handle(request).await;
                    }
                    break;
                }

                else => break,
            }
        }

        debug!("Store writer stopped");
    }

    async fn handle(&self, request: WriteRequest) {
        // A dropped receiver means the requester gave up; the write stands.
        match request {
            WriteRequest::CompletePush {
                sent,
                server_item,
                server_version,
                reply,
            } => {
                let result = self
                    .db
                    .complete_push(&sent, server_item.as_ref(), server_version.as_deref())
                    .await
                    .map_err(SyncError::from);
                log_failure("complete_push", &result);
                let _ = reply.send(result);
            }
            WriteRequest::SettleWithServer {
                sent,
                server_item,
                reply,
            } => {
                let result = self
                    .db
                    .settle_with_server(&sent, server_item.as_ref())
                    .await
                    .map_err(SyncError::from);
                log_failure("settle_with_server", &result);
                let _ = reply.send(result);
            }
            WriteRequest::RecordFailure {
                sent,
                status_code,
                message,
                reply,
            } => {
                let result = self
                    .db
                    .operations()
                    .record_failure(&sent, status_code, &message)
                    .await
                    .map_err(SyncError::from);
                log_failure("record_failure", &result);
                let _ = reply.send(result);
            }
            WriteRequest::ApplyPage {
                table,
                rows,
                token_key,
                reply,
            } => {
                let result = self.apply_page(&table, &rows, &token_key).await;
                log_failure("apply_page", &result);
                let _ = reply.send(result);
            }
        }
    }

    async fn apply_page(
        &self,
        table: &str,
        rows: &[Value],
        token_key: &str,
    ) -> SyncResult<PageOutcome> {
        let mut outcome = PageOutcome::default();

        for row in rows {
            if let Err(e) = EntityMetadata::from_json(row) {
                warn!(table = %table, error = %e, "Skipping pulled row without usable metadata");
                outcome.skipped += 1;
                continue;
            }

            match self.db.apply_remote_row(table, row, token_key).await? {
                RemoteRowOutcome::Inserted => outcome.additions += 1,
                RemoteRowOutcome::Replaced => outcome.replacements += 1,
                RemoteRowOutcome::Deleted => outcome.deletions += 1,
                RemoteRowOutcome::Skipped => outcome.skipped += 1,
            }
        }

        debug!(
            table = %table,
            rows = rows.len(),
            additions = outcome.additions,
            replacements = outcome.replacements,
            deletions = outcome.deletions,
            "Page applied"
        );
        Ok(outcome)
    }
}

fn log_failure<T>(what: &str, result: &SyncResult<T>) {
    if let Err(e) = result {
        error!(?e, request = what, "Store writer request failed");
    }
}

// =============================================================================
// Spawned Writer
// =============================================================================

/// A running writer: its handle plus the task to join on shutdown.
pub struct WriterTask {
    handle: StoreWriterHandle,
    join: JoinHandle<()>,
}

impl WriterTask {
    pub fn handle(&self) -> StoreWriterHandle {
        self.handle.clone()
    }

    /// Stops the writer after pending writes and waits for it to exit.
    pub async fn finish(self) -> SyncResult<()> {
        // A closed shutdown channel means the loop already exited
        let _ = self.handle.shutdown().await;
        drop(self.handle);

        self.join.await.map_err(|e| {
            error!(?e, "Store writer task failed");
            SyncError::Internal(format!("store writer task failed: {}", e))
        })?;

        info!("Store writer finished");
        Ok(())
    }
}
