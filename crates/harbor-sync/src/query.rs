//! # Query Compiler
//!
//! Turns a [`QueryDescription`] into the query string sent with a pull GET.
//!
//! ## OData Output
//! ```text
//! QueryDescription {
//!     filters:  ["complete eq false", "updatedAt ge 2024-05-01T10:00:00.000000Z"],
//!     order_by: [updatedAt asc],
//!     top:      50,
//!     include_deleted: true,
//! }
//!         │
//!         ▼  ODataQueryCompiler
//! $filter=(complete eq false) and (updatedAt ge 2024-05-01T10:00:00.000000Z)
//! &$orderby=updatedAt asc&$top=50&__includedeleted=true
//! (form-urlencoded)
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use harbor_core::UPDATED_AT_FIELD;

// =============================================================================
// Query Description
// =============================================================================

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One `$orderby` term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        OrderBy {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Backend-neutral description of one table query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDescription {
    pub table: String,
    /// Filter expressions, ANDed together.
    pub filters: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub skip: Option<u64>,
    pub top: Option<u32>,
    /// Ask for tombstoned rows too.
    pub include_deleted: bool,
}

impl QueryDescription {
    pub fn new(table: impl Into<String>) -> Self {
        QueryDescription {
            table: table.into(),
            ..Default::default()
        }
    }
}

/// Filter clause selecting rows modified at or after `watermark`.
pub fn updated_since(watermark: &DateTime<Utc>) -> String {
    format!(
        "{} ge {}",
        UPDATED_AT_FIELD,
        watermark.to_rfc3339_opts(SecondsFormat::Micros, true)
    )
}

// =============================================================================
// Compiler
// =============================================================================

/// Renders a query description for a particular backend.
pub trait QueryCompiler: Send + Sync {
    fn compile(&self, query: &QueryDescription) -> String;
}

/// OData-style compiler understood by table services.
#[derive(Debug, Clone, Copy, Default)]
pub struct ODataQueryCompiler;

impl QueryCompiler for ODataQueryCompiler {
    fn compile(&self, query: &QueryDescription) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());

        if !query.filters.is_empty() {
            let filter = query
                .filters
                .iter()
                .map(|clause| format!("({})", clause))
                .collect::<Vec<_>>()
                .join(" and ");
            serializer.append_pair("$filter", &filter);
        }

        if !query.order_by.is_empty() {
            let order = query
                .order_by
                .iter()
                .map(|term| match term.direction {
                    SortDirection::Ascending => format!("{} asc", term.field),
                    SortDirection::Descending => format!("{} desc", term.field),
                })
                .collect::<Vec<_>>()
                .join(",");
            serializer.append_pair("$orderby", &order);
        }

        if let Some(skip) = query.skip {
            serializer.append_pair("$skip", &skip.to_string());
        }

        if let Some(top) = query.top {
            serializer.append_pair("$top", &top.to_string());
        }

        if query.include_deleted {
            serializer.append_pair("__includedeleted", "true");
        }

        serializer.finish()
    }
}
