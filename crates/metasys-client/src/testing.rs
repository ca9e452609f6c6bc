//! Test utilities for metasys-client
//!
//! [`MockUpstream`] serves the subset of the Metasys API the importer uses,
//! on an ephemeral local port, and records what clients sent so tests can
//! assert on headers and call counts.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::client::SUBSCRIBE_HEADER;
use crate::streaming::LAST_EVENT_ID_HEADER;
use crate::{MetasysClient, Result};

/// Capacity of the per-server frame fan-out
const FRAME_BUFFER: usize = 256;

/// A request to `objects/{id}/attributes/presentValue`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentValueRequest {
    pub object_id: String,
    /// `METASYS-SUBSCRIBE` header, if sent
    pub subscription_id: Option<String>,
}

/// Shared state behind the mock routes
#[derive(Debug)]
struct MockState {
    token_ttl_secs: AtomicI64,
    fail_logon: AtomicBool,
    fail_refresh: AtomicBool,
    /// Status returned by the stream route instead of streaming
    stream_status: Mutex<Option<u16>>,

    logon_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    stream_connections: AtomicUsize,
    issued_tokens: AtomicUsize,

    stream_authorizations: Mutex<Vec<Option<String>>>,
    last_event_ids: Mutex<Vec<Option<String>>>,
    present_value_requests: Mutex<Vec<PresentValueRequest>>,

    present_values: Mutex<HashMap<String, Value>>,
    trend_samples: Mutex<HashMap<String, Vec<(DateTime<Utc>, Value)>>>,

    /// `Some(raw)` writes to every open stream, `None` ends them
    frames: broadcast::Sender<Option<String>>,
}

impl MockState {
    fn new() -> Self {
        let (frames, _) = broadcast::channel(FRAME_BUFFER);
        Self {
            token_ttl_secs: AtomicI64::new(3600),
            fail_logon: AtomicBool::new(false),
            fail_refresh: AtomicBool::new(false),
            stream_status: Mutex::new(None),
            logon_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            stream_connections: AtomicUsize::new(0),
            issued_tokens: AtomicUsize::new(0),
            stream_authorizations: Mutex::new(Vec::new()),
            last_event_ids: Mutex::new(Vec::new()),
            present_value_requests: Mutex::new(Vec::new()),
            present_values: Mutex::new(HashMap::new()),
            trend_samples: Mutex::new(HashMap::new()),
            frames,
        }
    }

    fn issue_token(&self) -> Value {
        let n = self.issued_tokens.fetch_add(1, Ordering::SeqCst) + 1;
        let ttl = chrono::Duration::seconds(self.token_ttl_secs.load(Ordering::SeqCst));
        json!({
            "accessToken": format!("token-{}", n),
            "expires": (Utc::now() + ttl).to_rfc3339(),
        })
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

async fn login(State(state): State<Arc<MockState>>, Json(_body): Json<Value>) -> Response {
    state.logon_calls.fetch_add(1, Ordering::SeqCst);
    if state.fail_logon.load(Ordering::SeqCst) {
        return error_body(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    Json(state.issue_token()).into_response()
}

async fn refresh_token(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if header_value(&headers, header::AUTHORIZATION.as_str()).is_none() {
        return error_body(StatusCode::UNAUTHORIZED, "Missing token");
    }
    if state.fail_refresh.load(Ordering::SeqCst) {
        return error_body(StatusCode::INTERNAL_SERVER_ERROR, "Refresh unavailable");
    }
    Json(state.issue_token()).into_response()
}

async fn stream(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state
        .stream_authorizations
        .lock()
        .push(header_value(&headers, header::AUTHORIZATION.as_str()));
    state
        .last_event_ids
        .lock()
        .push(header_value(&headers, LAST_EVENT_ID_HEADER));

    if let Some(status) = *state.stream_status.lock() {
        state.stream_connections.fetch_add(1, Ordering::SeqCst);
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, "stream unavailable").into_response();
    }

    // Subscribe before counting so frames pushed after a connection is
    // observed are never lost
    let rx = state.frames.subscribe();
    state.stream_connections.fetch_add(1, Ordering::SeqCst);

    let body = BroadcastStream::new(rx)
        .filter_map(|r| r.ok())
        .take_while(|frame| frame.is_some())
        .map(|frame| Ok::<_, Infallible>(Bytes::from(frame.unwrap_or_default())));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn present_value(
    State(state): State<Arc<MockState>>,
    Path(object_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.present_value_requests.lock().push(PresentValueRequest {
        object_id: object_id.clone(),
        subscription_id: header_value(&headers, SUBSCRIBE_HEADER),
    });

    match state.present_values.lock().get(&object_id) {
        Some(value) => Json(json!({ "item": { "presentValue": value } })).into_response(),
        None => error_body(StatusCode::NOT_FOUND, &format!("Object {} not found", object_id)),
    }
}

async fn trend_samples(
    State(state): State<Arc<MockState>>,
    Path(object_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !params.contains_key("startTime") || !params.contains_key("endTime") {
        return error_body(StatusCode::BAD_REQUEST, "startTime and endTime are required");
    }

    match state.trend_samples.lock().get(&object_id) {
        Some(samples) => {
            let items: Vec<Value> = samples
                .iter()
                .map(|(timestamp, value)| {
                    json!({
                        "timestamp": timestamp.to_rfc3339(),
                        "value": { "value": value, "units": "unitEnumSet.degF" },
                    })
                })
                .collect();
            Json(json!({ "items": items })).into_response()
        }
        None => error_body(StatusCode::NOT_FOUND, &format!("Object {} not found", object_id)),
    }
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/api/v4/login", post(login))
        .route("/api/v4/refreshToken", get(refresh_token))
        .route("/api/v4/stream", get(stream))
        .route(
            "/api/v4/objects/{id}/attributes/presentValue",
            get(present_value),
        )
        .route(
            "/api/v4/objects/{id}/trendedAttributes/presentValue/samples",
            get(trend_samples),
        )
        .with_state(state)
}

/// An in-process upstream that shuts down when dropped
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub client: MetasysClient,
    state: Arc<MockState>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockUpstream {
    /// Start the mock on an ephemeral port
    pub async fn start() -> Result<Self> {
        Self::start_with_timeout(Duration::from_secs(5), Duration::from_secs(2)).await
    }

    /// Start the mock with custom client timeouts
    pub async fn start_with_timeout(timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(MockState::new());
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let app = router(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        let client = MetasysClient::with_config(
            &format!("http://{}/api/v4/", addr),
            timeout,
            connect_timeout,
        )?;

        Ok(Self {
            addr,
            client,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// API base URL, ending in `/api/v4/`
    pub fn base_url(&self) -> String {
        format!("http://{}/api/v4/", self.addr)
    }

    /// Get a reference to the client
    pub fn client(&self) -> &MetasysClient {
        &self.client
    }

    // =========================================================================
    // Behaviour
    // =========================================================================

    /// Lifetime of tokens issued from now on
    pub fn set_token_ttl(&self, ttl: Duration) {
        self.state
            .token_ttl_secs
            .store(ttl.as_secs() as i64, Ordering::SeqCst);
    }

    /// Make `POST login` answer 401
    pub fn fail_logon(&self, fail: bool) {
        self.state.fail_logon.store(fail, Ordering::SeqCst);
    }

    /// Make `GET refreshToken` answer 500
    pub fn fail_refresh(&self, fail: bool) {
        self.state.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Answer stream requests with `status` instead of streaming
    pub fn set_stream_status(&self, status: Option<u16>) {
        *self.state.stream_status.lock() = status;
    }

    /// Make an object known with the given present value
    pub fn set_present_value(&self, object_id: &str, value: Value) {
        self.state
            .present_values
            .lock()
            .insert(object_id.to_string(), value);
    }

    /// Trend samples returned for an object
    pub fn set_trend_samples(&self, object_id: &str, samples: Vec<(DateTime<Utc>, Value)>) {
        self.state
            .trend_samples
            .lock()
            .insert(object_id.to_string(), samples);
    }

    // =========================================================================
    // Stream
    // =========================================================================

    /// Write raw bytes to every open stream, returning how many received them
    pub fn push_raw(&self, raw: impl Into<String>) -> usize {
        self.state.frames.send(Some(raw.into())).unwrap_or(0)
    }

    /// Write one frame to every open stream
    pub fn push_frame(&self, id: Option<&str>, event: &str, data: &str) -> usize {
        let mut raw = String::new();
        if let Some(id) = id {
            raw.push_str(&format!("id: {}\n", id));
        }
        raw.push_str(&format!("event: {}\n", event));
        for line in data.lines() {
            raw.push_str(&format!("data: {}\n", line));
        }
        raw.push('\n');
        self.push_raw(raw)
    }

    /// End every open stream from the server side
    pub fn hang_up(&self) {
        let _ = self.state.frames.send(None);
    }

    // =========================================================================
    // Recorded requests
    // =========================================================================

    pub fn logon_calls(&self) -> usize {
        self.state.logon_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn stream_connections(&self) -> usize {
        self.state.stream_connections.load(Ordering::SeqCst)
    }

    /// `Authorization` header of each stream request, in order
    pub fn stream_authorizations(&self) -> Vec<Option<String>> {
        self.state.stream_authorizations.lock().clone()
    }

    /// `Last-Event-ID` header of each stream request, in order
    pub fn last_event_ids(&self) -> Vec<Option<String>> {
        self.state.last_event_ids.lock().clone()
    }

    pub fn present_value_requests(&self) -> Vec<PresentValueRequest> {
        self.state.present_value_requests.lock().clone()
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        self.hang_up();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}
