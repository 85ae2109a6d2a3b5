//! # harbor-db: Local Store for Harbor
//!
//! SQLite persistence for the offline sync engine, using sqlx for async
//! access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Harbor Data Flow                                 │
//! │                                                                         │
//! │  App: ctx.replace_item(&todo)       Engine: push / pull                │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     harbor-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐  ┌────────────────┐  ┌──────────────────┐  │   │
//! │  │   │   Database    │  │  Repositories  │  │  Transactions    │  │   │
//! │  │   │   (pool.rs)   │  │  entity        │  │  local mutation  │  │   │
//! │  │   │               │  │  operations    │  │  push settlement │  │   │
//! │  │   │ SqlitePool    │◄─│  delta_token   │  │  pulled rows     │  │   │
//! │  │   │ Migrations    │  │                │  │  purge           │  │   │
//! │  │   └───────────────┘  └────────────────┘  └──────────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harbor_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/harbor.db")).await?;
//!
//! let pending = db.operations().count_open(&[]).await?;
//! let watermark = db.delta_tokens().get("dt.todo.all").await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod transactions;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use transactions::{PurgeSummary, RemoteRowOutcome, Settlement};

pub use repository::delta_token::DeltaTokenRepository;
pub use repository::entity::{merge_documents, EntityRepository, StoredEntity};
pub use repository::operations::{EnqueueOutcome, OperationQueueRepository};
