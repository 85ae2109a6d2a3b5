//! Mock RemoteService for testing.
//!
//! Behaves like a small table server (versions, `If-Match`, tombstones) and
//! records every request for assertions. Responses can be scripted per
//! item or per table, and query pages are scripted per table.

use async_trait::async_trait;
use harbor_sync::{
    CancelHandle, Database, RemoteMethod, RemoteRequest, RemoteResponse, RemoteService,
    SyncError, SyncResult,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A scripted answer: a response, or a transport failure.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(RemoteResponse),
    TransportError(String),
}

/// A recorded GET for a continuation page, with what the store held then.
#[derive(Debug, Clone)]
pub struct NextPageCall {
    pub table: String,
    pub next_link: String,
    /// Local entity count of the table when the request arrived.
    pub local_rows: i64,
}

#[derive(Default)]
struct State {
    /// table -> id -> item
    tables: HashMap<String, BTreeMap<String, Value>>,
    /// (method, item id) -> scripted answers, consumed in order
    item_scripts: HashMap<(RemoteMethod, String), VecDeque<Scripted>>,
    /// table -> scripted GET answers, consumed in order
    pages: HashMap<String, VecDeque<Scripted>>,
    requests: Vec<RemoteRequest>,
    next_page_calls: Vec<NextPageCall>,
    version_counter: u64,
    cancel_after: Option<(usize, CancelHandle)>,
}

/// In-memory table service that records all calls.
///
/// # Example
/// ```rust,ignore
/// let remote = MockRemote::new();
/// remote.script(RemoteMethod::Put, "1", Scripted::Respond(RemoteResponse::new(500, None)));
///
/// // Use in tests...
///
/// assert_eq!(remote.requests().len(), 1);
/// ```
pub struct MockRemote {
    state: Mutex<State>,
    delay: Mutex<Option<Duration>>,
    observer: Mutex<Option<Database>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        MockRemote {
            state: Mutex::new(State::default()),
            delay: Mutex::new(None),
            observer: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Holds every request for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Records the local row count on each continuation page request.
    pub fn observe(&self, db: Database) {
        *self.observer.lock().unwrap() = Some(db);
    }

    /// Fires `handle` once `requests` requests have been received.
    pub fn cancel_after(&self, requests: usize, handle: CancelHandle) {
        self.state.lock().unwrap().cancel_after = Some((requests, handle));
    }

    /// Scripts the next answer for `method` on `item_id`.
    pub fn script(&self, method: RemoteMethod, item_id: &str, answer: Scripted) {
        self.state
            .lock()
            .unwrap()
            .item_scripts
            .entry((method, item_id.to_string()))
            .or_default()
            .push_back(answer);
    }

    /// Scripts the next GET answer for `table` as a page body.
    pub fn push_page(&self, table: &str, body: Value) {
        self.push_page_answer(table, Scripted::Respond(RemoteResponse::new(200, Some(body))));
    }

    pub fn push_page_answer(&self, table: &str, answer: Scripted) {
        self.state
            .lock()
            .unwrap()
            .pages
            .entry(table.to_string())
            .or_default()
            .push_back(answer);
    }

    /// Puts an item on the server as-is.
    pub fn seed(&self, table: &str, item: Value) {
        let id = item["id"].as_str().unwrap().to_string();
        self.state
            .lock()
            .unwrap()
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id, item);
    }

    // =========================================================================
    // Assertions
    // =========================================================================

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_with(&self, method: RemoteMethod) -> Vec<RemoteRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }

    pub fn next_page_calls(&self) -> Vec<NextPageCall> {
        self.state.lock().unwrap().next_page_calls.clone()
    }

    pub fn server_item(&self, table: &str, id: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Highest number of requests that were being served at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Server Behaviour
    // =========================================================================

    fn answer(&self, request: &RemoteRequest) -> Scripted {
        let mut state = self.state.lock().unwrap();

        if request.method == RemoteMethod::Get {
            return state
                .pages
                .get_mut(&request.table)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Scripted::Respond(RemoteResponse::new(200, Some(json!([])))));
        }

        let item_id = request
            .item_id
            .clone()
            .or_else(|| {
                request
                    .body
                    .as_ref()
                    .and_then(|b| b["id"].as_str().map(str::to_string))
            })
            .unwrap_or_default();

        if let Some(answer) = state
            .item_scripts
            .get_mut(&(request.method, item_id.clone()))
            .and_then(VecDeque::pop_front)
        {
            return answer;
        }

        Scripted::Respond(state.serve(request, &item_id))
    }
}

impl State {
    fn next_version(&mut self) -> String {
        self.version_counter += 1;
        format!("srv{}", self.version_counter)
    }

    fn serve(&mut self, request: &RemoteRequest, item_id: &str) -> RemoteResponse {
        let version = self.next_version();
        let now = chrono::Utc::now().to_rfc3339();
        let rows = self.tables.entry(request.table.clone()).or_default();
        let current = rows
            .get(item_id)
            .filter(|item| !item["deleted"].as_bool().unwrap_or(false))
            .cloned();

        let precondition_failed = |current: &Option<Value>| match (&request.if_match, current) {
            (Some(expected), Some(item)) => item["version"].as_str() != Some(expected.as_str()),
            (Some(_), None) => true,
            (None, _) => false,
        };

        match request.method {
            RemoteMethod::Post => {
                if let Some(existing) = current {
                    return RemoteResponse::new(409, Some(existing));
                }
                let mut item = request.body.clone().unwrap_or_else(|| json!({}));
                item["version"] = json!(version);
                item["updatedAt"] = json!(now);
                rows.insert(item_id.to_string(), item.clone());
                RemoteResponse::new(201, Some(item)).with_etag(format!("\"{}\"", version))
            }
            RemoteMethod::Put => {
                if precondition_failed(&current) {
                    return RemoteResponse::new(412, current);
                }
                let mut item = request.body.clone().unwrap_or_else(|| json!({}));
                item["version"] = json!(version);
                item["updatedAt"] = json!(now);
                rows.insert(item_id.to_string(), item.clone());
                RemoteResponse::new(200, Some(item)).with_etag(format!("\"{}\"", version))
            }
            RemoteMethod::Delete => {
                if current.is_none() {
                    return RemoteResponse::new(404, None);
                }
                if precondition_failed(&current) {
                    return RemoteResponse::new(412, current);
                }
                if let Some(item) = rows.get_mut(item_id) {
                    item["deleted"] = json!(true);
                    item["version"] = json!(version);
                    item["updatedAt"] = json!(now);
                }
                RemoteResponse::new(204, None)
            }
            RemoteMethod::Get => RemoteResponse::new(405, None),
        }
    }
}

#[async_trait]
impl RemoteService for MockRemote {
    async fn send(&self, request: RemoteRequest) -> SyncResult<RemoteResponse> {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if let Some(link) = request.next_link.clone() {
            let observer = self.observer.lock().unwrap().clone();
            let local_rows = match observer {
                Some(db) => db.entities().count(&request.table).await.unwrap(),
                None => -1,
            };
            self.state.lock().unwrap().next_page_calls.push(NextPageCall {
                table: request.table.clone(),
                next_link: link,
                local_rows,
            });
        }

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let answer = self.answer(&request);

        {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request);
            let received = state.requests.len();
            if let Some((after, handle)) = state.cancel_after.as_ref() {
                if received >= *after {
                    handle.cancel();
                }
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match answer {
            Scripted::Respond(response) => Ok(response),
            Scripted::TransportError(message) => Err(SyncError::Transport(message)),
        }
    }
}
