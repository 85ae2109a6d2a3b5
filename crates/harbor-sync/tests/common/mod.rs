//! Shared test utilities for the harbor-sync integration tests.
//!
//! This module provides:
//! - `MockRemote`: an in-memory table service that records every request
//! - `TodoItem` / `Tag`: sample entities
//! - context setup helpers

#![allow(dead_code)]

pub mod mock_remote;

pub use mock_remote::*;

use chrono::{DateTime, TimeZone, Utc};
use harbor_sync::{Database, DbConfig, SyncContext, SyncEntity, TableOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// =============================================================================
// Sample Entities
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted: bool,
}

impl TodoItem {
    pub fn new(id: &str, title: &str) -> Self {
        TodoItem {
            id: id.to_string(),
            title: title.to_string(),
            complete: false,
            version: None,
            updated_at: None,
            deleted: false,
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }
}

impl SyncEntity for TodoItem {
    const TABLE: &'static str = "todo";

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SyncEntity for Tag {
    const TABLE: &'static str = "tag";

    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

// =============================================================================
// Setup Helpers
// =============================================================================

/// Surfaces engine logs when run with `RUST_LOG=harbor_sync=debug`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A context over an in-memory store with `todo` and `tag` registered.
pub async fn setup() -> (SyncContext, Arc<MockRemote>) {
    setup_with(|ctx| ctx).await
}

/// Like [`setup`], letting the test adjust the context before registration.
pub async fn setup_with(
    configure: impl FnOnce(SyncContext) -> SyncContext,
) -> (SyncContext, Arc<MockRemote>) {
    init_tracing();

    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let remote = Arc::new(MockRemote::new());

    let mut ctx = configure(SyncContext::new(db, remote.clone()));
    if !ctx.is_registered(TodoItem::TABLE) {
        ctx.register_table::<TodoItem>(TableOptions::default()).unwrap();
    }
    if !ctx.is_registered(Tag::TABLE) {
        ctx.register_table::<Tag>(TableOptions::default()).unwrap();
    }

    (ctx, remote)
}

/// 2024-01-01T00:00:00Z plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_704_067_200 + secs, 0).unwrap()
}

/// RFC 3339 form of [`at`].
pub fn stamp(secs: i64) -> String {
    at(secs).to_rfc3339()
}
