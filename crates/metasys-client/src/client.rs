//! Metasys HTTP Client implementation

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use metasys_core::{
    AuthApi, Credentials, IngestResult, PresentValue, SubscriptionApi, Token, TrendSample,
};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use crate::error::{MetasysClientError, Result};
use crate::types::*;

/// Header attaching a request to an open stream subscription
pub const SUBSCRIBE_HEADER: &str = "METASYS-SUBSCRIBE";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Encode an object id for use as a single path segment.
fn encode_path_segment(id: &str) -> String {
    id.replace('/', "%2F")
}

/// Parse a base URL, making sure it ends with `/` so relative joins keep
/// the API prefix (`https://host/api/v4/` + `login`).
fn parse_base_url(base_url: &str) -> Result<Url> {
    if base_url.ends_with('/') {
        Ok(Url::parse(base_url)?)
    } else {
        Ok(Url::parse(&format!("{}/", base_url))?)
    }
}

/// Metasys REST API client
///
/// Covers the request/response calls: logon, token refresh, subscribe and
/// trend reads. The push stream itself is handled by
/// [`StreamingClient`](crate::StreamingClient), which needs an HTTP client
/// without an overall request timeout.
#[derive(Debug, Clone)]
pub struct MetasysClient {
    client: Client,
    base_url: Url,
}

impl MetasysClient {
    /// Create a new Metasys client
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://adx.example.com/api/v4/")
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(base_url, DEFAULT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a new Metasys client with custom timeouts
    pub fn with_config(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        let base_url = parse_base_url(base_url)?;

        Ok(Self { client, base_url })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// URL of the push-stream endpoint
    pub fn stream_url(&self) -> Result<Url> {
        Ok(self.base_url.join("stream")?)
    }

    /// Get a reference to the underlying HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.client
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Log on and obtain a bearer token
    #[instrument(skip(self, credentials), fields(username = %credentials.username))]
    pub async fn logon(&self, credentials: &Credentials) -> Result<Token> {
        let url = self.base_url.join("login")?;
        debug!("Logging on at {}", url);

        let response = self
            .client
            .post(url)
            .json(&LogonRequest {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            })
            .send()
            .await?;

        self.handle_response::<TokenResponse>(response)
            .await
            .map(Token::from)
    }

    /// Exchange a valid token for a fresh one
    #[instrument(skip(self, token))]
    pub async fn refresh_token(&self, token: &Token) -> Result<Token> {
        let url = self.base_url.join("refreshToken")?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        self.handle_response::<TokenResponse>(response)
            .await
            .map(Token::from)
    }

    // =========================================================================
    // Objects
    // =========================================================================

    fn present_value_url(&self, object_id: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!(
            "objects/{}/attributes/presentValue",
            encode_path_segment(object_id)
        ))?)
    }

    /// Attach an object to a stream subscription
    ///
    /// The response carries the object's current present value; later
    /// changes arrive on the stream as `object.values.update` frames.
    #[instrument(skip(self, token))]
    pub async fn subscribe_present_value(
        &self,
        token: &Token,
        object_id: &str,
        subscription_id: &str,
    ) -> Result<PresentValue> {
        let url = self.present_value_url(object_id)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&token.access_token)
            .header(SUBSCRIBE_HEADER, subscription_id)
            .send()
            .await?;

        self.handle_response::<ItemResponse>(response)
            .await
            .map(|r| r.present_value())
    }

    /// Read an object's present value without subscribing
    #[instrument(skip(self, token))]
    pub async fn read_present_value(&self, token: &Token, object_id: &str) -> Result<PresentValue> {
        let url = self.present_value_url(object_id)?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        self.handle_response::<ItemResponse>(response)
            .await
            .map(|r| r.present_value())
    }

    /// Trended present value samples for an object in `[start, end]`
    #[instrument(skip(self, token))]
    pub async fn trend_samples(
        &self,
        token: &Token,
        object_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TrendSample>> {
        let mut url = self.base_url.join(&format!(
            "objects/{}/trendedAttributes/presentValue/samples",
            encode_path_segment(object_id)
        ))?;
        url.query_pairs_mut()
            .append_pair("startTime", &start.to_rfc3339_opts(SecondsFormat::Secs, true))
            .append_pair("endTime", &end.to_rfc3339_opts(SecondsFormat::Secs, true));

        let response = self
            .client
            .get(url)
            .bearer_auth(&token.access_token)
            .send()
            .await?;

        self.handle_response::<TrendSamplesResponse>(response)
            .await
            .map(|r| r.items.into_iter().map(TrendSample::from).collect())
    }

    // =========================================================================
    // Helper Methods
    // =========================================================================

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| MetasysClientError::ParseError(e.to_string()))
        } else {
            Err(self.extract_error_from_status(response, status).await)
        }
    }

    async fn extract_error_from_status(
        &self,
        response: reqwest::Response,
        status: StatusCode,
    ) -> MetasysClientError {
        let message = match response.json::<ErrorResponse>().await {
            Ok(err) if !err.message.is_empty() => err.message,
            _ => format!("HTTP {}", status),
        };

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                MetasysClientError::Unauthorized(message)
            }
            StatusCode::NOT_FOUND => MetasysClientError::ObjectNotFound(message),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                MetasysClientError::Timeout
            }
            _ => MetasysClientError::server_error(status.as_u16(), message),
        }
    }
}

#[async_trait]
impl AuthApi for MetasysClient {
    async fn logon(&self, credentials: &Credentials) -> IngestResult<Token> {
        MetasysClient::logon(self, credentials)
            .await
            .map_err(MetasysClientError::into_logon_error)
    }

    async fn refresh(&self, token: &Token) -> IngestResult<Token> {
        self.refresh_token(token)
            .await
            .map_err(MetasysClientError::into_refresh_error)
    }
}

#[async_trait]
impl SubscriptionApi for MetasysClient {
    async fn subscribe(
        &self,
        token: &Token,
        object_id: &str,
        subscription_id: &str,
    ) -> IngestResult<PresentValue> {
        self.subscribe_present_value(token, object_id, subscription_id)
            .await
            .map_err(MetasysClientError::into_upstream_error)
    }

    async fn trend_samples(
        &self,
        token: &Token,
        object_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> IngestResult<Vec<TrendSample>> {
        MetasysClient::trend_samples(self, token, object_id, start, end)
            .await
            .map_err(MetasysClientError::into_upstream_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = MetasysClient::new("https://adx.example.com/api/v4");
        assert!(client.is_ok());
    }

    #[test]
    fn test_base_url_keeps_api_prefix() {
        let client = MetasysClient::new("https://adx.example.com/api/v4").unwrap();
        assert_eq!(
            client.stream_url().unwrap().as_str(),
            "https://adx.example.com/api/v4/stream"
        );
        assert_eq!(
            client.present_value_url("a1/b2").unwrap().as_str(),
            "https://adx.example.com/api/v4/objects/a1%2Fb2/attributes/presentValue"
        );
    }

    #[test]
    fn test_invalid_url() {
        let client = MetasysClient::new("not a url");
        assert!(matches!(client, Err(MetasysClientError::InvalidUrl(_))));
    }
}
