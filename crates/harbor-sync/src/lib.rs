//! # harbor-sync: Push/Pull Engine for Harbor
//!
//! Keeps a local SQLite store and a remote table service in step for an
//! application that must keep working offline.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Sync Architecture                              │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                      SyncContext (façade)                        │  │
//! │  │                                                                  │  │
//! │  │  register_table · insert/replace/delete_item · push · pull ·    │  │
//! │  │  purge · pending_operations                                     │  │
//! │  └───────┬───────────────────────┬──────────────────────┬───────────┘  │
//! │          │                       │                      │              │
//! │          ▼                       ▼                      ▼              │
//! │  ┌────────────────┐  ┌──────────────────────┐  ┌──────────────────┐    │
//! │  │ QueueManager   │  │ PushEngine           │  │ PullEngine       │    │
//! │  │                │  │                      │  │                  │    │
//! │  │ entity + queue │  │ Semaphore + JoinSet  │  │ per-table pages  │    │
//! │  │ row in one tx  │  │ conflict policies    │  │ delta tokens     │    │
//! │  └────────────────┘  └──────────┬───────────┘  └────────┬─────────┘    │
//! │                                 │                       │              │
//! │                                 ▼                       ▼              │
//! │                       ┌───────────────────────────────────────┐        │
//! │                       │ StoreWriter (single writer task)      │        │
//! │                       └───────────────────────────────────────┘        │
//! │                                                                         │
//! │  Push, pull and purge are serialized by the context's SyncLock.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`context`] - `SyncContext` façade and table registry
//! - [`queue`] - Local mutation recording and coalescing
//! - [`push`] - Push engine and `PushResult`
//! - [`pull`] - Pull engine, `PullQuery` and `PullResult`
//! - [`writer`] - Single-writer actor for push/pull store writes
//! - [`conflict`] - Conflict policies
//! - [`remote`] - `RemoteService` trait and request/response types
//! - [`http`] - `reqwest` implementation of `RemoteService`
//! - [`query`] - Query compiler (OData)
//! - [`cancel`] - Cancellation signal
//! - [`lock`] - Synchronization lock
//! - [`config`] - TOML/env configuration
//! - [`error`] - Sync error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cancel;
pub mod config;
pub mod conflict;
pub mod context;
pub mod error;
pub mod http;
pub mod lock;
pub mod pull;
pub mod push;
pub mod query;
pub mod queue;
pub mod remote;
pub mod writer;

// =============================================================================
// Re-exports
// =============================================================================

pub use cancel::{CancelHandle, CancelSignal};
pub use config::{HarborConfig, PullSettings, PushSettings, RemoteSettings, StoreSettings};
pub use conflict::{ConflictContext, ConflictPolicy, ConflictResolution};
pub use context::{SyncContext, TableOptions};
pub use error::{SyncError, SyncResult};
pub use http::HttpRemoteService;
pub use lock::SyncLock;
pub use pull::{PullQuery, PullResult, TablePullResult};
pub use push::{PushFailure, PushResult};
pub use query::{ODataQueryCompiler, OrderBy, QueryCompiler, QueryDescription, SortDirection};
pub use queue::QueueManager;
pub use remote::{Page, RemoteMethod, RemoteRequest, RemoteResponse, RemoteService};
pub use writer::{PageOutcome, StoreWriter, StoreWriterHandle};

// Types callers need alongside the context
pub use harbor_core::{OperationKind, OperationState, QueuedOperation, SyncEntity};
pub use harbor_db::{Database, DbConfig, EnqueueOutcome};
