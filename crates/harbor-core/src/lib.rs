//! # harbor-core: Pure Synchronization Logic
//!
//! Everything the offline sync engine decides without touching a disk or a
//! socket lives here: what a queued operation is, how two local edits to the
//! same entity collapse into one, and how identity/version/timestamp are read
//! off an entity.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Harbor Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    harbor-sync (engine)                         │   │
//! │  │    QueueManager ──► PushEngine ──► PullEngine ──► StoreWriter   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    harbor-db (SQLite)                           │   │
//! │  │          entities, operations queue, delta tokens               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ harbor-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │ coalesce  │  │  entity   │  │ validation│  │   │
//! │  │   │ Queued-   │  │ state     │  │ metadata  │  │ ids,      │  │   │
//! │  │   │ Operation │  │ machine   │  │ resolver  │  │ tables    │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Queued operations, delta tokens, local mutations
//! - [`coalesce`] - Merging a new local edit into an already queued one
//! - [`entity`] - The [`SyncEntity`] trait and JSON metadata extraction
//! - [`validation`] - Identity and parameter checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use harbor_core::coalesce::{coalesce_kinds, KindTransition};
//! use harbor_core::OperationKind;
//!
//! // A pending create followed by an update is still a create
//! let t = coalesce_kinds(Some(OperationKind::Add), OperationKind::Replace).unwrap();
//! assert_eq!(t, KindTransition::Update(OperationKind::Add));
//!
//! // Deleting twice before a push is a caller bug
//! assert!(coalesce_kinds(Some(OperationKind::Delete), OperationKind::Delete).is_err());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod coalesce;
pub mod entity;
pub mod error;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use coalesce::{coalesce, CoalescePlan};
pub use entity::{EntityMetadata, SyncEntity};
pub use error::{CoalesceError, CoreError, ValidationError};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Upper bound for push workers and concurrently pulled tables.
///
/// The remote service is shared across workers; more than a handful of
/// concurrent requests against one backend buys nothing for an offline client.
pub const MAX_PARALLELISM: usize = 8;

/// Longest entity id accepted by the queue.
pub const MAX_ENTITY_ID_LEN: usize = 128;

/// Longest table name accepted by the queue and the delta token store.
pub const MAX_TABLE_NAME_LEN: usize = 64;

/// JSON field carrying the entity identity.
pub const ID_FIELD: &str = "id";

/// JSON field carrying the last-modified timestamp (RFC 3339).
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// JSON field carrying the opaque concurrency version.
pub const VERSION_FIELD: &str = "version";

/// JSON field carrying the tombstone flag.
pub const DELETED_FIELD: &str = "deleted";
