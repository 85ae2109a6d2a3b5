//! # Conflict Resolution
//!
//! What push does when the server answers 409/412 to a queued operation.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Conflict Resolution Strategy                         │
//! │                                                                         │
//! │  no policy      → record Failed, keep the row for the caller           │
//! │                                                                         │
//! │  ClientWins     → resend without If-Match (an Add goes out as a PUT);  │
//! │                   that answer is classified once more, no re-resolve   │
//! │                                                                         │
//! │  ServerWins     → local row := server item (deleted if absent or      │
//! │                   tombstoned), operation marked Completed              │
//! │                                                                         │
//! │  Custom(f)      → f(&ConflictContext) picks one of the two above      │
//! │                   (or Fail) per operation                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use harbor_core::QueuedOperation;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// What to do about one conflicting operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Overwrite the server with the local version.
    KeepLocal,
    /// Adopt the server's version locally.
    AcceptRemote,
    /// Leave the operation Failed.
    Fail,
}

/// Everything a custom resolver gets to look at.
#[derive(Debug)]
pub struct ConflictContext<'a> {
    pub operation: &'a QueuedOperation,
    /// 409 or 412.
    pub status: u16,
    /// The server's current item, when the response carried one.
    pub server_item: Option<&'a Value>,
}

type ResolverFn = dyn Fn(&ConflictContext<'_>) -> ConflictResolution + Send + Sync;

/// Pluggable conflict policy, configured per context.
#[derive(Clone)]
pub enum ConflictPolicy {
    ClientWins,
    ServerWins,
    Custom(Arc<ResolverFn>),
}

impl ConflictPolicy {
    /// Wraps a closure as a custom policy.
    pub fn custom<F>(resolver: F) -> Self
    where
        F: Fn(&ConflictContext<'_>) -> ConflictResolution + Send + Sync + 'static,
    {
        ConflictPolicy::Custom(Arc::new(resolver))
    }

    pub fn resolve(&self, context: &ConflictContext<'_>) -> ConflictResolution {
        match self {
            ConflictPolicy::ClientWins => ConflictResolution::KeepLocal,
            ConflictPolicy::ServerWins => ConflictResolution::AcceptRemote,
            ConflictPolicy::Custom(resolver) => resolver(context),
        }
    }
}

impl fmt::Debug for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::ClientWins => write!(f, "ClientWins"),
            ConflictPolicy::ServerWins => write!(f, "ServerWins"),
            ConflictPolicy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
