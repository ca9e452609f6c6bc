//! Integration tests for metasys-client
//!
//! These tests run the client against the in-process mock upstream so the
//! request shapes stay in sync with what the importer relies on.

use chrono::{TimeZone, Utc};
use metasys_client::testing::MockUpstream;
use metasys_client::{MetasysClientError, SUBSCRIBE_HEADER};
use metasys_core::{AuthApi, Credentials, IngestError, PresentValue, SubscriptionApi};
use pretty_assertions::assert_eq;
use serde_json::json;

fn credentials() -> Credentials {
    Credentials::new("importer", "secret")
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_logon_returns_token() {
    let upstream = MockUpstream::start().await.unwrap();

    let token = tokio_test::assert_ok!(upstream.client.logon(&credentials()).await);

    assert_eq!(token.access_token, "token-1");
    assert!(!token.is_expired());
    assert!(token.remaining().as_secs() > 3500);
    assert_eq!(upstream.logon_calls(), 1);
}

#[tokio::test]
async fn test_logon_rejected() {
    let upstream = MockUpstream::start().await.unwrap();
    upstream.fail_logon(true);

    let result = upstream.client.logon(&credentials()).await;
    assert!(matches!(result, Err(MetasysClientError::Unauthorized(_))));

    // Through the trait the failure is a logon failure
    let result = AuthApi::logon(&upstream.client, &credentials()).await;
    assert!(matches!(result, Err(IngestError::LogonFailed(_))));
}

#[tokio::test]
async fn test_refresh_token_issues_new_token() {
    let upstream = MockUpstream::start().await.unwrap();
    let first = upstream.client.logon(&credentials()).await.unwrap();

    let second = upstream.client.refresh_token(&first).await.unwrap();

    assert_ne!(first.access_token, second.access_token);
    assert_eq!(upstream.refresh_calls(), 1);
}

#[tokio::test]
async fn test_refresh_failure_maps_to_refresh_error() {
    let upstream = MockUpstream::start().await.unwrap();
    let token = upstream.client.logon(&credentials()).await.unwrap();
    upstream.fail_refresh(true);

    let result = AuthApi::refresh(&upstream.client, &token).await;
    assert!(matches!(result, Err(IngestError::TokenRefreshFailed(_))));
}

#[tokio::test]
async fn test_token_ttl_is_honoured() {
    let upstream = MockUpstream::start().await.unwrap();
    upstream.set_token_ttl(std::time::Duration::from_secs(90));

    let token = upstream.client.logon(&credentials()).await.unwrap();
    let remaining = token.remaining().as_secs();
    assert!((85..=90).contains(&remaining), "remaining {}", remaining);
}

// =============================================================================
// Objects
// =============================================================================

#[tokio::test]
async fn test_subscribe_sends_subscription_header() {
    let upstream = MockUpstream::start().await.unwrap();
    upstream.set_present_value("a1", json!(72.5));
    let token = upstream.client.logon(&credentials()).await.unwrap();

    let value = upstream
        .client
        .subscribe_present_value(&token, "a1", "sub-9")
        .await
        .unwrap();

    assert_eq!(value.as_f64(), Some(72.5));
    let requests = upstream.present_value_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].object_id, "a1");
    assert_eq!(requests[0].subscription_id.as_deref(), Some("sub-9"));
    assert_eq!(SUBSCRIBE_HEADER, "METASYS-SUBSCRIBE");
}

#[tokio::test]
async fn test_read_present_value_without_subscription() {
    let upstream = MockUpstream::start().await.unwrap();
    upstream.set_present_value("a2", json!("occupied"));
    let token = upstream.client.logon(&credentials()).await.unwrap();

    let value = upstream
        .client
        .read_present_value(&token, "a2")
        .await
        .unwrap();

    assert_eq!(value, PresentValue::Text("occupied".into()));
    assert_eq!(upstream.present_value_requests()[0].subscription_id, None);
}

#[tokio::test]
async fn test_subscribe_unknown_object() {
    let upstream = MockUpstream::start().await.unwrap();
    let token = upstream.client.logon(&credentials()).await.unwrap();

    let result = upstream
        .client
        .subscribe_present_value(&token, "missing", "sub-1")
        .await;
    assert!(matches!(result, Err(MetasysClientError::ObjectNotFound(_))));

    let result = SubscriptionApi::subscribe(&upstream.client, &token, "missing", "sub-1").await;
    assert!(matches!(result, Err(IngestError::Upstream(_))));
}

#[tokio::test]
async fn test_trend_samples() {
    let upstream = MockUpstream::start().await.unwrap();
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let t1 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 15, 0).unwrap();
    upstream.set_trend_samples("a1", vec![(t0, json!(70.1)), (t1, json!(70.4))]);
    let token = upstream.client.logon(&credentials()).await.unwrap();

    let samples = upstream
        .client
        .trend_samples(&token, "a1", t0, t1)
        .await
        .unwrap();

    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].timestamp, t0);
    assert_eq!(samples[1].value.as_f64(), Some(70.4));
}

#[tokio::test]
async fn test_connection_refused() {
    let upstream = MockUpstream::start().await.unwrap();
    let base_url = upstream.base_url();
    upstream.shutdown().await;

    let client = metasys_client::MetasysClient::new(&base_url).unwrap();
    let result = client.logon(&credentials()).await;
    assert!(matches!(result, Err(MetasysClientError::HttpError(_))));
}
