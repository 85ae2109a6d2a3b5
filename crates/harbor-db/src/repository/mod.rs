//! # Repository Module
//!
//! Single-table access for the local store.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  Sync engine                                                           │
//! │       │                                                                 │
//! │       │  db.operations().list_open(&tables)                            │
//! │       ▼                                                                 │
//! │  OperationQueueRepository                                              │
//! │  ├── enqueue(&self, mutation)                                          │
//! │  ├── list_open(&self, tables)                                          │
//! │  ├── record_failure(&self, op, status, error)                          │
//! │  └── purge_completed(&self)                                            │
//! │       │                                                                 │
//! │       │  SQL Query                                                      │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Each module also exposes connection-scoped functions (crate-private)  │
//! │  so `transactions.rs` can compose several tables in one transaction.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`EntityRepository`](entity::EntityRepository) - Local entity rows
//! - [`OperationQueueRepository`](operations::OperationQueueRepository) - Queued mutations
//! - [`DeltaTokenRepository`](delta_token::DeltaTokenRepository) - Pull watermarks

pub mod delta_token;
pub mod entity;
pub mod operations;
