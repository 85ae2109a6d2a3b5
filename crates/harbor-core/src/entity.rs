//! # Entity Metadata
//!
//! Identity, last-modified timestamp, opaque version and tombstone flag are
//! all the engine needs to know about an entity. Typed entities expose them
//! through [`SyncEntity`]; rows arriving from the remote as raw JSON go
//! through [`EntityMetadata::from_json`].
//!
//! ## Wire Shape
//! ```text
//! {
//!   "id":        "a1b2",                        ← identity (required)
//!   "updatedAt": "2024-05-01T12:00:00.123456Z", ← drives the delta token
//!   "version":   "AAAAAAAAB9E=",                ← sent back as If-Match
//!   "deleted":   false,                         ← tombstone
//!   ...                                          ← entity fields
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::ValidationError;
use crate::validation::{validate_entity_id, ValidationResult};
use crate::{DELETED_FIELD, ID_FIELD, UPDATED_AT_FIELD, VERSION_FIELD};

// =============================================================================
// SyncEntity Trait
// =============================================================================

/// An entity type that can be tracked by the operations queue.
///
/// Implemented once per table; the table name is fixed at compile time.
///
/// ## Example
/// ```rust
/// use chrono::{DateTime, Utc};
/// use harbor_core::SyncEntity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct TodoItem {
///     id: String,
///     title: String,
///     updated_at: Option<DateTime<Utc>>,
///     version: Option<String>,
///     #[serde(default)]
///     deleted: bool,
/// }
///
/// impl SyncEntity for TodoItem {
///     const TABLE: &'static str = "todoitem";
///
///     fn id(&self) -> &str { &self.id }
///     fn updated_at(&self) -> Option<DateTime<Utc>> { self.updated_at }
///     fn version(&self) -> Option<&str> { self.version.as_deref() }
///     fn is_deleted(&self) -> bool { self.deleted }
/// }
/// ```
pub trait SyncEntity: Serialize + DeserializeOwned + Send + Sync {
    /// Remote table name.
    const TABLE: &'static str;

    fn id(&self) -> &str;

    fn updated_at(&self) -> Option<DateTime<Utc>>;

    fn version(&self) -> Option<&str>;

    fn is_deleted(&self) -> bool {
        false
    }
}

// =============================================================================
// Entity Metadata
// =============================================================================

/// The sync-relevant fields of one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    pub id: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub deleted: bool,
}

impl EntityMetadata {
    /// Reads metadata off a typed entity, validating its identity.
    pub fn of<T: SyncEntity>(entity: &T) -> ValidationResult<Self> {
        validate_entity_id(entity.id())?;

        Ok(EntityMetadata {
            id: entity.id().to_string(),
            updated_at: entity.updated_at(),
            version: entity.version().map(str::to_string),
            deleted: entity.is_deleted(),
        })
    }

    /// Reads metadata off a JSON object.
    ///
    /// A numeric `id` is accepted and rendered as a string. A missing
    /// `updatedAt`/`version` is `None`; a present but malformed one is an error.
    pub fn from_json(value: &Value) -> ValidationResult<Self> {
        let object = value.as_object().ok_or_else(|| ValidationError::InvalidFormat {
            field: "entity".to_string(),
            reason: "must be a JSON object".to_string(),
        })?;

        let id = match object.get(ID_FIELD) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Null) | None => {
                return Err(ValidationError::Required {
                    field: ID_FIELD.to_string(),
                })
            }
            Some(_) => {
                return Err(ValidationError::InvalidFormat {
                    field: ID_FIELD.to_string(),
                    reason: "must be a string".to_string(),
                })
            }
        };
        validate_entity_id(&id)?;

        let updated_at = match object.get(UPDATED_AT_FIELD) {
            Some(Value::String(s)) => Some(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|e| ValidationError::InvalidFormat {
                        field: UPDATED_AT_FIELD.to_string(),
                        reason: e.to_string(),
                    })?
                    .with_timezone(&Utc),
            ),
            Some(Value::Null) | None => None,
            Some(_) => {
                return Err(ValidationError::InvalidFormat {
                    field: UPDATED_AT_FIELD.to_string(),
                    reason: "must be an RFC 3339 string".to_string(),
                })
            }
        };

        let version = match object.get(VERSION_FIELD) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let deleted = object
            .get(DELETED_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(EntityMetadata {
            id,
            updated_at,
            version,
            deleted,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
