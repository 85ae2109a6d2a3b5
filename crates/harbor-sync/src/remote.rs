//! # Remote Service
//!
//! The seam between the engines and whatever backend holds the canonical
//! tables. Push and pull only ever talk to a `dyn RemoteService`.
//!
//! ## Request Shapes
//! ```text
//! ┌──────────────┬────────┬────────────────────────┬──────────────────────┐
//! │ Operation    │ Method │ Target                 │ Headers / body       │
//! ├──────────────┼────────┼────────────────────────┼──────────────────────┤
//! │ create       │ POST   │ table                  │ body = entity        │
//! │ replace      │ PUT    │ table / item_id        │ If-Match, body       │
//! │ delete       │ DELETE │ table / item_id        │ If-Match             │
//! │ query page   │ GET    │ table ? query          │                      │
//! │ next page    │ GET    │ next_link (absolute)   │                      │
//! └──────────────┴────────┴────────────────────────┴──────────────────────┘
//! ```
//!
//! Transport failures are `Err(SyncError::Transport)`. Any HTTP status,
//! including 4xx/5xx, is an `Ok(RemoteResponse)` for the caller to classify.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Request / Response
// =============================================================================

/// HTTP-style verb of a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl std::fmt::Display for RemoteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteMethod::Get => write!(f, "GET"),
            RemoteMethod::Post => write!(f, "POST"),
            RemoteMethod::Put => write!(f, "PUT"),
            RemoteMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// One request to the remote table service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    pub method: RemoteMethod,
    pub table: String,
    pub item_id: Option<String>,
    pub body: Option<Value>,
    /// Sent as `If-Match` when present.
    pub if_match: Option<String>,
    /// Encoded query string, without the leading `?`.
    pub query: Option<String>,
    /// Absolute continuation URL; replaces table + query when set.
    pub next_link: Option<String>,
}

impl RemoteRequest {
    fn new(method: RemoteMethod, table: &str) -> Self {
        RemoteRequest {
            method,
            table: table.to_string(),
            item_id: None,
            body: None,
            if_match: None,
            query: None,
            next_link: None,
        }
    }

    /// POST a new entity.
    pub fn create(table: &str, body: Value) -> Self {
        RemoteRequest {
            body: Some(body),
            ..Self::new(RemoteMethod::Post, table)
        }
    }

    /// PUT a full entity, conditional on `if_match` when given.
    pub fn replace(table: &str, item_id: &str, body: Value, if_match: Option<String>) -> Self {
        RemoteRequest {
            item_id: Some(item_id.to_string()),
            body: Some(body),
            if_match,
            ..Self::new(RemoteMethod::Put, table)
        }
    }

    /// DELETE an entity, conditional on `if_match` when given.
    pub fn delete(table: &str, item_id: &str, if_match: Option<String>) -> Self {
        RemoteRequest {
            item_id: Some(item_id.to_string()),
            if_match,
            ..Self::new(RemoteMethod::Delete, table)
        }
    }

    /// GET the first page of a query.
    pub fn query(table: &str, query: String) -> Self {
        RemoteRequest {
            query: Some(query),
            ..Self::new(RemoteMethod::Get, table)
        }
    }

    /// GET a continuation page.
    pub fn next_page(table: &str, next_link: String) -> Self {
        RemoteRequest {
            next_link: Some(next_link),
            ..Self::new(RemoteMethod::Get, table)
        }
    }
}

/// Raw answer from the remote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub body: Option<Value>,
}

impl RemoteResponse {
    /// A response with a status and JSON body.
    pub fn new(status: u16, body: Option<Value>) -> Self {
        RemoteResponse {
            status,
            etag: None,
            body,
        }
    }

    /// Attaches an ETag.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 409 Conflict or 412 Precondition Failed.
    pub fn is_conflict(&self) -> bool {
        self.status == 409 || self.status == 412
    }

    /// ETag as a stored version. Strong tags lose their quotes; weak tags
    /// are kept whole so a later If-Match stays weak.
    pub fn version(&self) -> Option<String> {
        self.etag.as_deref().map(|tag| {
            if tag.starts_with("W/") {
                tag.to_string()
            } else {
                tag.trim_matches('"').to_string()
            }
        })
    }
}

// =============================================================================
// Pages
// =============================================================================

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_link: Option<String>,
}

impl Page {
    /// Parses a page body: a bare JSON array, or `{ "items": [...], "nextLink": "..." }`.
    pub fn from_body(body: Option<&Value>) -> SyncResult<Self> {
        match body {
            None | Some(Value::Null) => Ok(Page::default()),
            Some(Value::Array(items)) => Ok(Page {
                items: items.clone(),
                next_link: None,
            }),
            Some(Value::Object(fields)) => {
                let items = match fields.get("items") {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => {
                        return Err(SyncError::MalformedResponse(format!(
                            "page items must be an array, got {}",
                            json_kind(other)
                        )))
                    }
                };

                let next_link = match fields.get("nextLink") {
                    Some(Value::String(link)) if !link.is_empty() => Some(link.clone()),
                    Some(Value::String(_)) | Some(Value::Null) | None => None,
                    Some(other) => {
                        return Err(SyncError::MalformedResponse(format!(
                            "nextLink must be a string, got {}",
                            json_kind(other)
                        )))
                    }
                };

                Ok(Page { items, next_link })
            }
            Some(other) => Err(SyncError::MalformedResponse(format!(
                "page must be an array or object, got {}",
                json_kind(other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Service Trait
// =============================================================================

/// A backend holding the canonical tables.
///
/// Shared across push workers and pulled tables, so implementations must be
/// safe to call concurrently.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn send(&self, request: RemoteRequest) -> SyncResult<RemoteResponse>;
}
