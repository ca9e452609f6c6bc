//! Wire types for the Metasys REST API

use chrono::{DateTime, Utc};
use metasys_core::{PresentValue, Token, TrendSample};
use serde::{Deserialize, Serialize};

/// Body of `POST login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogonRequest {
    pub username: String,
    pub password: String,
}

/// Response of `POST login` and `GET refreshToken`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub expires: DateTime<Utc>,
}

impl From<TokenResponse> for Token {
    fn from(response: TokenResponse) -> Self {
        Token::new(response.access_token, response.expires)
    }
}

/// Response of `GET objects/{id}/attributes/presentValue`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResponse {
    #[serde(default)]
    pub item: serde_json::Value,
}

impl ItemResponse {
    pub fn present_value(&self) -> PresentValue {
        crate::mapper::present_value_from_item(&self.item)
    }
}

/// Response of `GET objects/{id}/trendedAttributes/presentValue/samples`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrendSamplesResponse {
    #[serde(default)]
    pub items: Vec<TrendSampleItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendSampleItem {
    pub timestamp: DateTime<Utc>,
    /// `{"value": <number|string>, "units": ...}`
    #[serde(default)]
    pub value: serde_json::Value,
}

impl From<TrendSampleItem> for TrendSample {
    fn from(item: TrendSampleItem) -> Self {
        let value = match item.value.get("value") {
            Some(inner) => PresentValue::from_json(inner),
            None => PresentValue::from_json(&item.value),
        };
        TrendSample {
            timestamp: item.timestamp,
            value,
        }
    }
}

/// Error body returned by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(default)]
    pub message: String,
}
