//! Streaming connection to the push-stream endpoint

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use metasys_core::{Frame, Token};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, StatusCode};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::parser::SseParser;
use super::types::{ConnectionState, SessionEnd, StreamError, StreamResult};

/// Header carrying the resume cursor on reconnect
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Default connection timeout for the stream request
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// TCP keepalive so dead peers are noticed even between heartbeats
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// Resolves once the session's cancel flag is set or its sender is gone
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Owner of one push-stream connection at a time
///
/// The client is shared (`Arc`) between the task running
/// [`open_stream`](Self::open_stream) and whoever needs to check liveness
/// or [`close`](Self::close) the connection. Each `open_stream` call is one
/// network session; the state machine restarts from `Connecting` on every
/// call.
///
/// ```text
/// Idle → Connecting → Open → Closed
///            │          │
///            └──────────┴──→ Failed
/// ```
#[derive(Debug)]
pub struct StreamingClient {
    http: Client,
    state: RwLock<ConnectionState>,
    /// Unix millis of the last received frame, 0 if none
    last_event_received_ms: AtomicI64,
    /// Last `retry` hint from the server in millis, 0 if none
    retry_hint_ms: AtomicU64,
    /// Sessions started so far; the latest one owns `cancel`
    sessions: AtomicU64,
    /// Cancel signal of the running session, tagged with its number
    cancel: Mutex<Option<(u64, watch::Sender<bool>)>>,
}

impl StreamingClient {
    /// Create a client with default connection settings
    ///
    /// No overall request timeout is set: the stream response is expected to
    /// stay open indefinitely.
    pub fn new() -> StreamResult<Self> {
        let http = Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .build()?;
        Ok(Self::with_http_client(http))
    }

    /// Create a client around an existing HTTP client
    pub fn with_http_client(http: Client) -> Self {
        Self {
            http,
            state: RwLock::new(ConnectionState::Idle),
            last_event_received_ms: AtomicI64::new(0),
            retry_hint_ms: AtomicU64::new(0),
            sessions: AtomicU64::new(0),
            cancel: Mutex::new(None),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// When the last frame arrived
    pub fn last_event_received_at(&self) -> Option<DateTime<Utc>> {
        match self.last_event_received_ms.load(Ordering::Acquire) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    /// Overwrite the liveness timestamp
    pub fn set_last_event_received_at(&self, at: DateTime<Utc>) {
        self.last_event_received_ms
            .store(at.timestamp_millis(), Ordering::Release);
    }

    /// Record that something arrived now
    pub fn mark_event_received(&self) {
        self.set_last_event_received_at(Utc::now());
    }

    /// Whether a frame arrived less than `threshold` ago
    pub fn has_received_messages_recently(&self, threshold: Duration) -> bool {
        let Some(last) = self.last_event_received_at() else {
            return false;
        };
        match (Utc::now() - last).to_std() {
            Ok(elapsed) => elapsed < threshold,
            // Timestamp in the future (clock step): treat as fresh
            Err(_) => true,
        }
    }

    /// Reconnect delay the server asked for via `retry:`
    pub fn retry_hint(&self) -> Option<Duration> {
        match self.retry_hint_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Open the stream and deliver frames to `listener` until the session ends
    ///
    /// Every received frame refreshes the liveness timestamp. Frames that
    /// carry nothing but a comment (keepalives) are not handed to the
    /// listener. A line that fails to parse is logged and skipped.
    ///
    /// Returns how the session ended; errors leave the client `Failed`.
    pub async fn open_stream<F>(
        &self,
        url: &Url,
        token: &Token,
        resume_cursor: Option<&str>,
        mut listener: F,
    ) -> StreamResult<SessionEnd>
    where
        F: FnMut(Frame) + Send,
    {
        if token.is_expired() {
            return Err(StreamError::TokenExpired(token.expires_at));
        }

        let (session, mut cancel_rx) = self.begin_session();

        let mut request = self
            .http
            .get(url.clone())
            .bearer_auth(&token.access_token)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(cursor) = resume_cursor {
            request = request.header(LAST_EVENT_ID_HEADER, cursor);
        }

        debug!(%url, resume_cursor, "Connecting to push stream");

        let response = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => {
                debug!("Stream closed while connecting");
                return Ok(SessionEnd::Cancelled);
            }
            result = request.send() => match result {
                Ok(response) => response,
                Err(e) => {
                    self.fail(session);
                    return Err(e.into());
                }
            },
        };

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!("Push stream returned 204, nothing to stream");
            self.finish(session, ConnectionState::Closed);
            return Ok(SessionEnd::NoContent);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            self.fail(session);
            return Err(StreamError::Server {
                status: status.as_u16(),
                message,
            });
        }

        self.transition(session, ConnectionState::Connecting, ConnectionState::Open);
        // A fresh connection is the liveness baseline
        self.mark_event_received();
        info!(%url, "Push stream open");

        let mut bytes = Box::pin(response.bytes_stream());
        let mut parser = SseParser::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => {
                    if parser.reset() {
                        debug!("Discarding partial frame on close");
                    }
                    return Ok(SessionEnd::Cancelled);
                }
                chunk = bytes.next() => chunk,
            };

            match chunk {
                Some(Ok(chunk)) => {
                    for result in parser.feed(chunk) {
                        if *cancel_rx.borrow() {
                            return Ok(SessionEnd::Cancelled);
                        }
                        match result {
                            Ok(frame) => {
                                self.mark_event_received();
                                if let Some(ms) = frame.retry {
                                    self.retry_hint_ms.store(ms, Ordering::Relaxed);
                                }
                                if frame.is_comment_only() {
                                    trace!("Stream keepalive");
                                    continue;
                                }
                                listener(frame);
                            }
                            Err(e) => {
                                warn!(error = %e, "Skipping malformed stream line");
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    self.fail(session);
                    return Err(e.into());
                }
                None => {
                    if parser.reset() {
                        warn!("Discarding partial frame at end of stream");
                    }
                    info!("Push stream ended by server");
                    self.finish(session, ConnectionState::Closed);
                    return Ok(SessionEnd::EndOfStream);
                }
            }
        }
    }

    /// Close the running session, if any
    ///
    /// Safe to call from any task and any number of times. The read loop
    /// stops before delivering another frame.
    pub fn close(&self) {
        if let Some((_, tx)) = self.cancel.lock().take() {
            let _ = tx.send(true);
        }

        let mut state = self.state.write();
        match *state {
            ConnectionState::Idle | ConnectionState::Connecting | ConnectionState::Open => {
                *state = ConnectionState::Closed;
                info!("Push stream closed");
            }
            ConnectionState::Closed | ConnectionState::Failed => {}
        }
    }

    /// Install a new session as the running one
    ///
    /// Replacing the sender cancels any session still running.
    fn begin_session(&self) -> (u64, watch::Receiver<bool>) {
        let session = self.sessions.fetch_add(1, Ordering::AcqRel) + 1;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let mut cancel = self.cancel.lock();
        *cancel = Some((session, cancel_tx));
        *self.state.write() = ConnectionState::Connecting;
        (session, cancel_rx)
    }

    /// Move `from` → `to`; no-op if a concurrent close or a newer session got there first
    fn transition(&self, session: u64, from: ConnectionState, to: ConnectionState) {
        let cancel = self.cancel.lock();
        if !matches!(*cancel, Some((current, _)) if current == session) {
            return;
        }
        let mut state = self.state.write();
        if *state == from {
            *state = to;
        }
    }

    /// End `session` in `to`
    ///
    /// A session that was superseded leaves the slot and the state of its
    /// successor alone.
    fn finish(&self, session: u64, to: ConnectionState) {
        let mut cancel = self.cancel.lock();
        if !matches!(*cancel, Some((current, _)) if current == session) {
            return;
        }
        cancel.take();
        let mut state = self.state.write();
        if matches!(*state, ConnectionState::Connecting | ConnectionState::Open) {
            *state = to;
        }
    }

    fn fail(&self, session: u64) {
        self.finish(session, ConnectionState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_client_is_idle() {
        let client = StreamingClient::new().unwrap();
        assert_eq!(client.state(), ConnectionState::Idle);
        assert!(client.last_event_received_at().is_none());
        assert!(client.retry_hint().is_none());
    }

    #[test]
    fn test_liveness_after_mark() {
        let client = StreamingClient::new().unwrap();
        assert!(!client.has_received_messages_recently(Duration::from_secs(5)));

        client.set_last_event_received_at(Utc::now());
        assert!(client.has_received_messages_recently(Duration::from_secs(5)));
    }

    #[test]
    fn test_liveness_expires_after_threshold() {
        let client = StreamingClient::new().unwrap();
        client.set_last_event_received_at(Utc::now() - chrono::Duration::seconds(6));

        assert!(!client.has_received_messages_recently(Duration::from_secs(5)));
        assert!(client.has_received_messages_recently(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_liveness_elapses_in_real_time() {
        let client = StreamingClient::new().unwrap();
        client.mark_event_received();
        assert!(client.has_received_messages_recently(Duration::from_millis(200)));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!client.has_received_messages_recently(Duration::from_millis(200)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let client = StreamingClient::new().unwrap();
        client.close();
        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_superseded_session_leaves_successor_running() {
        let client = StreamingClient::new().unwrap();
        let (first, first_rx) = client.begin_session();
        let (second, second_rx) = client.begin_session();
        assert_ne!(first, second);
        // Installing the second session cancelled the first
        assert!(first_rx.has_changed().is_err());

        client.transition(second, ConnectionState::Connecting, ConnectionState::Open);
        client.fail(first);
        client.finish(first, ConnectionState::Closed);

        assert_eq!(client.state(), ConnectionState::Open);
        assert!(!*second_rx.borrow());

        client.close();
        assert!(*second_rx.borrow());
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_current_session_end_clears_slot() {
        let client = StreamingClient::new().unwrap();
        let (session, _rx) = client.begin_session();

        client.fail(session);

        assert_eq!(client.state(), ConnectionState::Failed);
        assert!(client.cancel.lock().is_none());
    }

    #[tokio::test]
    async fn test_expired_token_is_refused() {
        let client = StreamingClient::new().unwrap();
        let url = Url::parse("http://127.0.0.1:9/api/v4/stream").unwrap();
        let token = Token::new("t", Utc::now() - chrono::Duration::seconds(1));

        let result = client.open_stream(&url, &token, None, |_| {}).await;
        assert!(matches!(result, Err(StreamError::TokenExpired(_))));
        assert_eq!(client.state(), ConnectionState::Idle);
    }
}
