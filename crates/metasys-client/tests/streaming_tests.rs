//! Push-stream tests against the mock upstream

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metasys_client::mapper::to_stream_event;
use metasys_client::testing::{wait_for, MockUpstream};
use metasys_client::{ConnectionState, SessionEnd, StreamError, StreamingClient};
use metasys_core::{Credentials, Frame, StreamEvent, Token};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

const WAIT: Duration = Duration::from_secs(5);

struct Session {
    upstream: MockUpstream,
    stream: Arc<StreamingClient>,
    token: Token,
    frames: Arc<Mutex<Vec<Frame>>>,
}

async fn setup() -> Session {
    let upstream = MockUpstream::start().await.unwrap();
    let token = upstream
        .client
        .logon(&Credentials::new("importer", "secret"))
        .await
        .unwrap();
    Session {
        upstream,
        stream: Arc::new(StreamingClient::new().unwrap()),
        token,
        frames: Arc::new(Mutex::new(Vec::new())),
    }
}

/// Run `open_stream` in the background, collecting frames
fn spawn_reader(
    session: &Session,
    cursor: Option<&str>,
) -> tokio::task::JoinHandle<Result<SessionEnd, StreamError>> {
    let stream = session.stream.clone();
    let url = session.upstream.client.stream_url().unwrap();
    let token = session.token.clone();
    let frames = session.frames.clone();
    let cursor = cursor.map(str::to_string);

    tokio::spawn(async move {
        stream
            .open_stream(&url, &token, cursor.as_deref(), move |frame| {
                frames.lock().push(frame)
            })
            .await
    })
}

async fn wait_connected(session: &Session, connections: usize) {
    let upstream = &session.upstream;
    let stream = session.stream.clone();
    assert!(
        wait_for(
            || {
                let stream = stream.clone();
                async move { stream.state() == ConnectionState::Open }
            },
            WAIT
        )
        .await
    );
    assert!(wait_for(|| async move { upstream.stream_connections() >= connections }, WAIT).await);
}

#[tokio::test]
async fn test_frames_delivered_in_order() {
    let session = setup().await;
    let reader = spawn_reader(&session, None);
    wait_connected(&session, 1).await;

    session.upstream.push_frame(Some("1"), "hello", "\"sub-1\"");
    session
        .upstream
        .push_frame(Some("2"), "heartbeat", "\"2024-05-01T12:00:00Z\"");
    session.upstream.push_frame(
        Some("3"),
        "object.values.update",
        r#"{"item":{"id":"a1","itemReference":"r1","presentValue":1}}"#,
    );

    let frames = &session.frames;
    assert!(wait_for(|| async move { frames.lock().len() == 3 }, WAIT).await);

    let ids: Vec<_> = frames
        .lock()
        .iter()
        .map(|f| f.id.clone().unwrap_or_default())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);

    let events: Vec<_> = frames.lock().iter().map(to_stream_event).collect();
    assert!(matches!(events[0], StreamEvent::SubscriptionOpened { .. }));
    assert!(matches!(events[1], StreamEvent::Heartbeat { .. }));
    assert!(matches!(events[2], StreamEvent::ObservedValue { .. }));

    session.stream.close();
    assert_eq!(reader.await.unwrap().unwrap(), SessionEnd::Cancelled);
}

#[tokio::test]
async fn test_request_headers() {
    let session = setup().await;
    let reader = spawn_reader(&session, Some("41"));
    wait_connected(&session, 1).await;

    assert_eq!(
        session.upstream.stream_authorizations(),
        vec![Some(format!("Bearer {}", session.token.access_token))]
    );
    assert_eq!(session.upstream.last_event_ids(), vec![Some("41".to_string())]);

    session.stream.close();
    reader.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_no_resume_cursor_on_first_connect() {
    let session = setup().await;
    let reader = spawn_reader(&session, None);
    wait_connected(&session, 1).await;

    assert_eq!(session.upstream.last_event_ids(), vec![None]);

    session.stream.close();
    reader.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_open_resets_liveness_baseline() {
    let session = setup().await;
    session
        .stream
        .set_last_event_received_at(Utc::now() - chrono::Duration::minutes(10));

    let reader = spawn_reader(&session, None);
    wait_connected(&session, 1).await;

    assert!(session
        .stream
        .has_received_messages_recently(Duration::from_secs(5)));

    session.stream.close();
    reader.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_no_content_closes() {
    let session = setup().await;
    session.upstream.set_stream_status(Some(204));

    let end = spawn_reader(&session, None).await.unwrap().unwrap();

    assert_eq!(end, SessionEnd::NoContent);
    assert_eq!(session.stream.state(), ConnectionState::Closed);
    assert!(session.frames.lock().is_empty());
}

#[tokio::test]
async fn test_server_error_fails() {
    let session = setup().await;
    session.upstream.set_stream_status(Some(500));

    let result = spawn_reader(&session, None).await.unwrap();

    assert!(matches!(
        result,
        Err(StreamError::Server { status: 500, .. })
    ));
    assert_eq!(session.stream.state(), ConnectionState::Failed);

    // Failed is sticky across close()
    session.stream.close();
    assert_eq!(session.stream.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_server_hang_up_ends_session() {
    let session = setup().await;
    let reader = spawn_reader(&session, None);
    wait_connected(&session, 1).await;

    session.upstream.push_frame(Some("1"), "heartbeat", "\"x\"");
    // A partial frame at end of stream is dropped
    session.upstream.push_raw("event: hello\ndata: \"half");
    let frames = &session.frames;
    assert!(wait_for(|| async move { frames.lock().len() == 1 }, WAIT).await);
    session.upstream.hang_up();

    assert_eq!(reader.await.unwrap().unwrap(), SessionEnd::EndOfStream);
    assert_eq!(session.stream.state(), ConnectionState::Closed);
    assert_eq!(session.frames.lock().len(), 1);
}

#[tokio::test]
async fn test_close_is_idempotent_and_stops_delivery() {
    let session = setup().await;
    let reader = spawn_reader(&session, None);
    wait_connected(&session, 1).await;

    session.stream.close();
    session.stream.close();
    assert_eq!(reader.await.unwrap().unwrap(), SessionEnd::Cancelled);
    assert_eq!(session.stream.state(), ConnectionState::Closed);

    session.upstream.push_frame(Some("9"), "heartbeat", "\"x\"");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.frames.lock().is_empty());
}

#[tokio::test]
async fn test_comment_frames_update_liveness_only() {
    let session = setup().await;
    let reader = spawn_reader(&session, None);
    wait_connected(&session, 1).await;

    session
        .stream
        .set_last_event_received_at(Utc::now() - chrono::Duration::minutes(10));
    session.upstream.push_raw(": keepalive\n\n");

    let stream = session.stream.clone();
    assert!(
        wait_for(
            || {
                let stream = stream.clone();
                async move { stream.has_received_messages_recently(Duration::from_secs(5)) }
            },
            WAIT
        )
        .await
    );
    assert!(session.frames.lock().is_empty());

    session.stream.close();
    reader.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unknown_fields_do_not_break_stream() {
    let session = setup().await;
    let reader = spawn_reader(&session, None);
    wait_connected(&session, 1).await;

    session.upstream.push_frame(Some("1"), "heartbeat", "\"a\"");
    session.upstream.push_raw("retry: soon\nevent: bogus-frame\n\n");
    session.upstream.push_frame(Some("2"), "heartbeat", "\"b\"");

    let frames = &session.frames;
    assert!(wait_for(|| async move { frames.lock().len() == 3 }, WAIT).await);
    assert_eq!(frames.lock()[2].id.as_deref(), Some("2"));
    assert_eq!(session.stream.state(), ConnectionState::Open);

    session.stream.close();
    reader.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_retry_hint_recorded() {
    let session = setup().await;
    let reader = spawn_reader(&session, None);
    wait_connected(&session, 1).await;

    session.upstream.push_raw("retry: 1500\n\n");
    let stream = session.stream.clone();
    assert!(
        wait_for(
            || {
                let stream = stream.clone();
                async move { stream.retry_hint().is_some() }
            },
            WAIT
        )
        .await
    );
    assert_eq!(session.stream.retry_hint(), Some(Duration::from_millis(1500)));

    session.stream.close();
    reader.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_expired_token_leaves_state_unchanged() {
    let session = setup().await;
    let url = session.upstream.client.stream_url().unwrap();
    let expired = Token::new("stale", Utc::now() - chrono::Duration::seconds(5));

    let result = session.stream.open_stream(&url, &expired, None, |_| {}).await;

    assert!(matches!(result, Err(StreamError::TokenExpired(_))));
    assert_eq!(session.stream.state(), ConnectionState::Idle);
    assert_eq!(session.upstream.stream_connections(), 0);
}

#[tokio::test]
async fn test_connection_error_fails() {
    let session = setup().await;
    let url = session.upstream.client.stream_url().unwrap();
    let token = session.token.clone();
    let stream = session.stream.clone();
    session.upstream.shutdown().await;

    let result = stream.open_stream(&url, &token, None, |_| {}).await;

    assert!(matches!(result, Err(StreamError::Connection(_))));
    assert_eq!(stream.state(), ConnectionState::Failed);
}
