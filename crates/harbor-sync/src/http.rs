//! # HTTP Remote Service
//!
//! [`RemoteService`] over a table-per-resource HTTP API, using `reqwest`.
//!
//! ## URL Layout
//! ```text
//! base = https://api.example.com/mobile
//!
//! POST   https://api.example.com/mobile/tables/todo
//! PUT    https://api.example.com/mobile/tables/todo/42      If-Match: "v7"
//! DELETE https://api.example.com/mobile/tables/todo/42      If-Match: "v7"
//! GET    https://api.example.com/mobile/tables/todo?$filter=...
//! GET    <nextLink, used verbatim>
//! ```

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, ETAG, IF_MATCH};
use reqwest::Method;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::RemoteSettings;
use crate::error::{SyncError, SyncResult};
use crate::remote::{RemoteMethod, RemoteRequest, RemoteResponse, RemoteService};

/// Remote table service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRemoteService {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpRemoteService {
    /// Builds a client for `base_url` with the given request timeout.
    pub fn new(base_url: &str, timeout: std::time::Duration) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!(
                "{} cannot be used as a base URL",
                base_url
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(HttpRemoteService { client, base_url })
    }

    /// Builds a client from the `[remote]` config section.
    pub fn from_settings(settings: &RemoteSettings) -> SyncResult<Self> {
        let base = settings
            .base_url
            .as_deref()
            .ok_or_else(|| SyncError::InvalidConfig("remote.base_url is not set".into()))?;
        Self::new(base, settings.timeout())
    }

    /// Resolves the absolute URL a request is sent to.
    pub fn url_for(&self, request: &RemoteRequest) -> SyncResult<Url> {
        if let Some(ref link) = request.next_link {
            return Ok(Url::parse(link)?);
        }

        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SyncError::InvalidUrl(self.base_url.to_string()))?;
            segments.pop_if_empty().push("tables").push(&request.table);
            if let Some(ref id) = request.item_id {
                segments.push(id);
            }
        }

        match request.query.as_deref() {
            Some(query) if !query.is_empty() => url.set_query(Some(query)),
            _ => url.set_query(None),
        }

        Ok(url)
    }
}

fn method_of(method: RemoteMethod) -> Method {
    match method {
        RemoteMethod::Get => Method::GET,
        RemoteMethod::Post => Method::POST,
        RemoteMethod::Put => Method::PUT,
        RemoteMethod::Delete => Method::DELETE,
    }
}

/// Quotes a bare version as an entity tag.
fn entity_tag(version: &str) -> String {
    if version.starts_with('"') || version.starts_with("W/") {
        version.to_string()
    } else {
        format!("\"{}\"", version)
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn send(&self, request: RemoteRequest) -> SyncResult<RemoteResponse> {
        let url = self.url_for(&request)?;
        debug!(method = %request.method, url = %url, "Sending remote request");

        let mut builder = self
            .client
            .request(method_of(request.method), url)
            .header(ACCEPT, "application/json");

        if let Some(ref version) = request.if_match {
            let value = HeaderValue::from_str(&entity_tag(version))
                .map_err(|_| SyncError::InvalidEntity(format!("invalid version: {}", version)))?;
            builder = builder.header(IF_MATCH, value);
        }

        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            None
        } else {
            match serde_json::from_str::<Value>(&text) {
                Ok(value) => Some(value),
                Err(e) if status.is_success() => {
                    return Err(SyncError::MalformedResponse(format!(
                        "{} returned invalid JSON: {}",
                        status, e
                    )))
                }
                // Error pages are often HTML; the status is what matters
                Err(_) => None,
            }
        };

        debug!(status = status.as_u16(), "Remote response received");

        Ok(RemoteResponse {
            status: status.as_u16(),
            etag,
            body,
        })
    }
}
