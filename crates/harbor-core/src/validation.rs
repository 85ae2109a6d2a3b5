//! # Validation Module
//!
//! Checks applied before anything reaches the queue or the wire.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Queue manager (harbor-sync)                                  │
//! │  └── THIS MODULE: entity ids, table names, parallelism bounds          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  └── Partial UNIQUE index on open (table_name, item_id)                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use harbor_core::validation::{validate_entity_id, validate_parallelism};
//!
//! validate_entity_id("todo-42").unwrap();
//! assert!(validate_parallelism("max_parallelism", 9).is_err());
//! ```

use crate::error::ValidationError;
use crate::{MAX_ENTITY_ID_LEN, MAX_PARALLELISM, MAX_TABLE_NAME_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Identifiers
// =============================================================================

/// Validates an entity id.
///
/// ## Rules
/// - Must not be empty
/// - At most 128 characters
/// - First character alphanumeric, the rest alphanumeric or `_ . | : -`
///
/// ## Example
/// ```rust
/// use harbor_core::validation::validate_entity_id;
///
/// assert!(validate_entity_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_entity_id("").is_err());
/// assert!(validate_entity_id("has space").is_err());
/// ```
pub fn validate_entity_id(id: &str) -> ValidationResult<()> {
    if id.is_empty() {
        return Err(ValidationError::Required {
            field: "id".to_string(),
        });
    }

    if id.chars().count() > MAX_ENTITY_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "id".to_string(),
            max: MAX_ENTITY_ID_LEN,
        });
    }

    let mut chars = id.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '|' | ':' | '-'));

    if !first_ok || !rest_ok {
        return Err(ValidationError::InvalidFormat {
            field: "id".to_string(),
            reason: "must start with a letter or digit and contain only letters, digits, '_', '.', '|', ':' or '-'".to_string(),
        });
    }

    Ok(())
}

/// Validates a table name.
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - Starts with a letter, then letters, digits or `_`
///
/// Table names end up in URL paths and delta token keys, so they are kept
/// to a conservative character set.
pub fn validate_table_name(name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "table_name".to_string(),
        });
    }

    if name.len() > MAX_TABLE_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "table_name".to_string(),
            max: MAX_TABLE_NAME_LEN,
        });
    }

    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !first_ok || !rest_ok {
        return Err(ValidationError::InvalidFormat {
            field: "table_name".to_string(),
            reason: "must start with a letter and contain only letters, digits or '_'".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a worker/table parallelism bound (1 to 8).
pub fn validate_parallelism(field: &str, value: usize) -> ValidationResult<()> {
    if value == 0 || value > MAX_PARALLELISM {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 1,
            max: MAX_PARALLELISM as i64,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
