//! # Push Engine
//!
//! Sends queued operations to the remote service and settles the answers.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  list_open(tables)  ──► [op1][op2][op3]...   (sequence order)          │
//! │                            │                                            │
//! │             ┌──────────────┴─────────────┐   Semaphore(max_parallelism)│
//! │             ▼              ▼             ▼   JoinSet of workers         │
//! │         worker         worker        worker                             │
//! │             │              │             │                              │
//! │     Add → POST     Replace → PUT   Delete → DELETE   (If-Match)         │
//! │             │                                                           │
//! │     2xx ───────► StoreWriter.complete_push   → completed               │
//! │     409/412 ───► conflict policy (see conflict.rs)                     │
//! │     other ─────► StoreWriter.record_failure  → failed_operations       │
//! │                                                                         │
//! │  Cancel: no new dispatch; in-flight workers finish; Err(Cancelled).    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The queue holds at most one open row per `(table, id)`, so two workers
//! never touch the same entity.

use harbor_core::{OperationKind, QueuedOperation, MAX_PARALLELISM};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelSignal;
use crate::conflict::{ConflictContext, ConflictPolicy, ConflictResolution};
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteRequest, RemoteResponse, RemoteService};
use crate::writer::StoreWriterHandle;
use harbor_db::Database;

// =============================================================================
// Results
// =============================================================================

/// Why one operation did not go through.
#[derive(Debug, Clone, PartialEq)]
pub struct PushFailure {
    /// HTTP status, absent for transport errors and invalid payloads.
    pub status_code: Option<u16>,
    pub message: String,
    /// Server's copy of the entity, when a conflict response carried one.
    pub server_item: Option<Value>,
}

/// Outcome of one push call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushResult {
    /// Operations settled: pushed, or resolved in the server's favour.
    pub completed_count: usize,
    /// Failed operations by operation id.
    pub failed_operations: BTreeMap<String, PushFailure>,
}

impl PushResult {
    pub fn is_successful(&self) -> bool {
        self.failed_operations.is_empty()
    }

    /// Operations that were dispatched.
    pub fn dispatched(&self) -> usize {
        self.completed_count + self.failed_operations.len()
    }
}

enum OpOutcome {
    Completed,
    Failed(String, PushFailure),
}

// =============================================================================
// Engine
// =============================================================================

/// One push run. Created per call, under the sync lock.
pub struct PushEngine {
    db: Database,
    worker: Arc<PushWorker>,
}

struct PushWorker {
    remote: Arc<dyn RemoteService>,
    writer: StoreWriterHandle,
    default_policy: Option<ConflictPolicy>,
    table_policies: HashMap<String, ConflictPolicy>,
}

impl PushEngine {
    pub fn new(
        db: Database,
        remote: Arc<dyn RemoteService>,
        writer: StoreWriterHandle,
        default_policy: Option<ConflictPolicy>,
        table_policies: HashMap<String, ConflictPolicy>,
    ) -> Self {
        PushEngine {
            db,
            worker: Arc::new(PushWorker {
                remote,
                writer,
                default_policy,
                table_policies,
            }),
        }
    }

    /// Pushes every open operation of `tables` (all tables when empty).
    pub async fn run(
        &self,
        tables: &[String],
        max_parallelism: usize,
        mut cancel: CancelSignal,
    ) -> SyncResult<PushResult> {
        if max_parallelism == 0 || max_parallelism > MAX_PARALLELISM {
            return Err(SyncError::InvalidConfig(format!(
                "max_parallelism must be between 1 and {}, got {}",
                MAX_PARALLELISM, max_parallelism
            )));
        }

        let operations = self.db.operations().list_open(tables).await?;
        info!(
            operations = operations.len(),
            max_parallelism, "Push starting"
        );

        let semaphore = Arc::new(Semaphore::new(max_parallelism));
        let mut workers: JoinSet<OpOutcome> = JoinSet::new();
        let mut cancelled = false;

        for op in operations {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => permit
                    .map_err(|_| SyncError::Internal("push semaphore closed".into()))?,
            };

            let worker = Arc::clone(&self.worker);
            workers.spawn(async move {
                let _permit = permit;
                worker.push_one(op).await
            });
        }

        let mut result = PushResult::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(OpOutcome::Completed) => result.completed_count += 1,
                Ok(OpOutcome::Failed(id, failure)) => {
                    result.failed_operations.insert(id, failure);
                }
                Err(e) => {
                    error!(?e, "Push worker panicked");
                    return Err(SyncError::Internal(format!("push worker failed: {}", e)));
                }
            }
        }

        info!(
            completed = result.completed_count,
            failed = result.failed_operations.len(),
            cancelled,
            "Push finished"
        );

        if cancelled {
            return Err(SyncError::Cancelled);
        }
        Ok(result)
    }
}

// =============================================================================
// Worker
// =============================================================================

impl PushWorker {
    fn policy_for(&self, table: &str) -> Option<&ConflictPolicy> {
        self.table_policies
            .get(table)
            .or(self.default_policy.as_ref())
    }

    async fn push_one(&self, op: QueuedOperation) -> OpOutcome {
        debug!(
            operation_id = %op.id,
            table = %op.table_name,
            item_id = %op.item_id,
            kind = %op.kind,
            "Pushing operation"
        );

        let request = match build_request(&op, false) {
            Ok(request) => request,
            Err(message) => return self.fail(op, None, message, None).await,
        };

        let mut response = self.remote.send(request).await;
        let mut may_resolve = true;

        loop {
            let answer = match response {
                Ok(answer) => answer,
                Err(e) => return self.fail(op, None, e.to_string(), None).await,
            };

            if answer.is_success() {
                return self.settle(op, answer).await;
            }

            if answer.is_conflict() && may_resolve {
                if let Some(policy) = self.policy_for(&op.table_name) {
                    let resolution = policy.resolve(&ConflictContext {
                        operation: &op,
                        status: answer.status,
                        server_item: answer.body.as_ref(),
                    });
                    debug!(
                        operation_id = %op.id,
                        status = answer.status,
                        ?resolution,
                        "Conflict resolved"
                    );

                    match resolution {
                        ConflictResolution::KeepLocal => {
                            let forced = match build_request(&op, true) {
                                Ok(request) => request,
                                Err(message) => return self.fail(op, None, message, None).await,
                            };
                            response = self.remote.send(forced).await;
                            may_resolve = false;
                            continue;
                        }
                        ConflictResolution::AcceptRemote => {
                            return self.accept_server(op, answer.status, answer.body).await;
                        }
                        ConflictResolution::Fail => {}
                    }
                }
            }

            let message = failure_message(&answer);
            return self
                .fail(op, Some(answer.status), message, answer.body)
                .await;
        }
    }

    async fn settle(&self, op: QueuedOperation, answer: RemoteResponse) -> OpOutcome {
        let id = op.id.clone();
        let version = answer.version();
        let body = answer.body.filter(Value::is_object);

        match self.writer.complete_push(op, body, version).await {
            Ok(settlement) => {
                debug!(operation_id = %id, ?settlement, "Operation pushed");
                OpOutcome::Completed
            }
            Err(e) => OpOutcome::Failed(
                id,
                PushFailure {
                    status_code: Some(answer.status),
                    message: format!("pushed, but the local store rejected the result: {}", e),
                    server_item: None,
                },
            ),
        }
    }

    async fn accept_server(
        &self,
        op: QueuedOperation,
        status: u16,
        server_item: Option<Value>,
    ) -> OpOutcome {
        let id = op.id.clone();
        match self
            .writer
            .settle_with_server(op.clone(), server_item.clone())
            .await
        {
            Ok(settlement) => {
                debug!(operation_id = %id, ?settlement, "Server version adopted");
                OpOutcome::Completed
            }
            Err(e) => {
                let message = format!("could not adopt server version: {}", e);
                self.fail(op, Some(status), message, server_item).await
            }
        }
    }

    async fn fail(
        &self,
        op: QueuedOperation,
        status_code: Option<u16>,
        message: String,
        server_item: Option<Value>,
    ) -> OpOutcome {
        let id = op.id.clone();
        warn!(
            operation_id = %id,
            table = %op.table_name,
            item_id = %op.item_id,
            status = ?status_code,
            error = %message,
            "Push failed"
        );

        if let Err(e) = self
            .writer
            .record_failure(op, status_code, message.clone())
            .await
        {
            error!(operation_id = %id, ?e, "Could not record push failure");
        }

        OpOutcome::Failed(
            id,
            PushFailure {
                status_code,
                message,
                server_item,
            },
        )
    }
}

/// Builds the request for `op`. `force` drops `If-Match` and sends an Add
/// as a replace, overriding whatever the server holds.
fn build_request(op: &QueuedOperation, force: bool) -> Result<RemoteRequest, String> {
    let if_match = if force { None } else { op.entity_version.clone() };

    match op.kind {
        OperationKind::Delete => Ok(RemoteRequest::delete(&op.table_name, &op.item_id, if_match)),
        OperationKind::Add | OperationKind::Replace => {
            let body = op
                .payload_value()
                .map_err(|e| format!("invalid payload: {}", e))?
                .ok_or_else(|| "missing payload".to_string())?;

            Ok(match (op.kind, force) {
                (OperationKind::Add, false) => RemoteRequest::create(&op.table_name, body),
                _ => RemoteRequest::replace(&op.table_name, &op.item_id, body, if_match),
            })
        }
    }
}

fn failure_message(answer: &RemoteResponse) -> String {
    let detail = answer.body.as_ref().and_then(|body| {
        ["message", "error"]
            .iter()
            .find_map(|field| body.get(field).and_then(Value::as_str))
    });

    match detail {
        Some(detail) => format!("HTTP {}: {}", answer.status, detail),
        None => format!("HTTP {}", answer.status),
    }
}
