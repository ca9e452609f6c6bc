//! Typed stream events decoded from push-stream frames

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::frame::Frame;

/// Frame metadata carried verbatim into every decoded event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    /// Frame id (used as the resume cursor)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Declared event name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Raw data payload, kept even when decoding it failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl From<&Frame> for FrameHeader {
    fn from(frame: &Frame) -> Self {
        Self {
            id: frame.id.clone(),
            name: frame.event.clone(),
            comment: frame.comment.clone(),
            data: frame.data.clone(),
        }
    }
}

/// A present value whose wire type is preserved
///
/// Numbers stay numbers (including the integer/float distinction of the
/// literal) and strings stay strings. Anything else, or an absent field,
/// is `Missing`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PresentValue {
    Numeric(serde_json::Number),
    Text(String),
    #[default]
    Missing,
}

impl PresentValue {
    /// Convert a JSON value without coercing between number and text
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => Self::Numeric(n.clone()),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            _ => Self::Missing,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Numeric(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Numeric(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }
}

impl fmt::Display for PresentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{:?}", s),
            Self::Missing => f.write_str("<missing>"),
        }
    }
}

/// A decoded push-stream event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Liveness signal; `timestamp` is `None` when the payload was absent or unparsable
    Heartbeat {
        header: FrameHeader,
        timestamp: Option<DateTime<Utc>>,
    },
    /// A point reading
    ObservedValue {
        header: FrameHeader,
        object_id: Option<String>,
        item_reference: Option<String>,
        value: PresentValue,
    },
    /// The server (re)established a stream subscription
    SubscriptionOpened {
        header: FrameHeader,
        subscription_id: Option<String>,
    },
    /// Anything not recognized; kept for audit
    Unknown { header: FrameHeader },
}

impl StreamEvent {
    pub fn header(&self) -> &FrameHeader {
        match self {
            Self::Heartbeat { header, .. }
            | Self::ObservedValue { header, .. }
            | Self::SubscriptionOpened { header, .. }
            | Self::Unknown { header } => header,
        }
    }

    /// Short variant name for logs and metric tags
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat { .. } => "heartbeat",
            Self::ObservedValue { .. } => "observed_value",
            Self::SubscriptionOpened { .. } => "subscription_opened",
            Self::Unknown { .. } => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_present_value_keeps_wire_type() {
        assert_eq!(PresentValue::from_json(&json!(1)).as_i64(), Some(1));
        assert_eq!(PresentValue::from_json(&json!(21.5)).as_f64(), Some(21.5));
        assert_eq!(
            PresentValue::from_json(&json!("1")),
            PresentValue::Text("1".into())
        );
        assert!(PresentValue::from_json(&json!(true)).is_missing());
        assert!(PresentValue::from_json(&json!(null)).is_missing());
    }

    #[test]
    fn test_present_value_serializes_untagged() {
        let numeric = PresentValue::from_json(&json!(3));
        assert_eq!(serde_json::to_value(&numeric).unwrap(), json!(3));
        assert_eq!(
            serde_json::to_value(PresentValue::Text("on".into())).unwrap(),
            json!("on")
        );
        assert_eq!(
            serde_json::to_value(PresentValue::Missing).unwrap(),
            json!(null)
        );
    }

    #[test]
    fn test_header_from_frame() {
        let frame = Frame::new("heartbeat", "\"x\"").with_id("7");
        let header = FrameHeader::from(&frame);
        assert_eq!(header.id.as_deref(), Some("7"));
        assert_eq!(header.name.as_deref(), Some("heartbeat"));
        assert_eq!(header.data.as_deref(), Some("\"x\""));
        assert!(header.comment.is_none());
    }
}
