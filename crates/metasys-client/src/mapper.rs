//! Frame → [`StreamEvent`] decoding
//!
//! Decoding never fails. Payloads that don't parse, and fields that are
//! absent, come out as `None`/[`PresentValue::Missing`]; the raw frame data is
//! always carried through in the event's [`FrameHeader`].

use chrono::{DateTime, Utc};
use metasys_core::{Frame, FrameHeader, PresentValue, StreamEvent};
use serde_json::Value;
use tracing::debug;

/// Event name of the periodic liveness frame
pub const HEARTBEAT_EVENT: &str = "heartbeat";
/// Event name of a present value change
pub const VALUE_UPDATE_EVENT: &str = "object.values.update";
/// Event name confirming the stream subscription
pub const HELLO_EVENT: &str = "hello";

/// Decode a raw frame into a typed event
pub fn to_stream_event(frame: &Frame) -> StreamEvent {
    let header = FrameHeader::from(frame);

    match frame.event.as_deref() {
        Some(HEARTBEAT_EVENT) => {
            let timestamp = frame.data.as_deref().and_then(parse_heartbeat_timestamp);
            StreamEvent::Heartbeat { header, timestamp }
        }
        Some(VALUE_UPDATE_EVENT) => {
            let item = frame
                .data
                .as_deref()
                .and_then(|data| serde_json::from_str::<Value>(data).ok())
                .and_then(|payload| payload.get("item").cloned())
                .unwrap_or(Value::Null);

            StreamEvent::ObservedValue {
                header,
                object_id: string_field(&item, "id"),
                item_reference: string_field(&item, "itemReference"),
                value: present_value_from_item(&item),
            }
        }
        Some(HELLO_EVENT) => StreamEvent::SubscriptionOpened {
            subscription_id: frame.data.as_deref().and_then(unquote),
            header,
        },
        _ => StreamEvent::Unknown { header },
    }
}

/// Type-preserving `presentValue` of an `item` object
pub fn present_value_from_item(item: &Value) -> PresentValue {
    item.get("presentValue")
        .map(PresentValue::from_json)
        .unwrap_or(PresentValue::Missing)
}

fn string_field(item: &Value, key: &str) -> Option<String> {
    item.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Strip JSON string quoting if present; `None` for blank payloads
fn unquote(data: &str) -> Option<String> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<String>(trimmed) {
        Ok(s) => Some(s),
        Err(_) => Some(trimmed.trim_matches('"').to_string()),
    }
}

fn parse_heartbeat_timestamp(data: &str) -> Option<DateTime<Utc>> {
    let raw = unquote(data)?;
    match DateTime::parse_from_rfc3339(&raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(e) => {
            debug!(payload = %raw, error = %e, "Unparsable heartbeat timestamp");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn heartbeat(data: Option<&str>) -> Frame {
        Frame {
            id: Some("42".into()),
            event: Some(HEARTBEAT_EVENT.into()),
            data: data.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_heartbeat_with_instant() {
        let event = to_stream_event(&heartbeat(Some("\"2024-05-01T12:30:00Z\"")));

        match event {
            StreamEvent::Heartbeat { header, timestamp } => {
                assert_eq!(
                    timestamp,
                    Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap())
                );
                assert_eq!(header.id.as_deref(), Some("42"));
                assert_eq!(header.name.as_deref(), Some("heartbeat"));
                assert_eq!(header.comment, None);
            }
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_with_unparsable_payload() {
        let event = to_stream_event(&heartbeat(Some("\"unparsable:Z\"")));

        match event {
            StreamEvent::Heartbeat { header, timestamp } => {
                assert_eq!(timestamp, None);
                assert_eq!(header.data.as_deref(), Some("\"unparsable:Z\""));
            }
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_heartbeat_without_payload() {
        let event = to_stream_event(&heartbeat(None));

        match event {
            StreamEvent::Heartbeat { header, timestamp } => {
                assert_eq!(timestamp, None);
                assert_eq!(header.data, None);
            }
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_observed_value_numeric() {
        let frame = Frame::new(
            VALUE_UPDATE_EVENT,
            r#"{"item":{"id":"a1","itemReference":"site:NAE/VAV-1.ZN-T","presentValue":1}}"#,
        );

        match to_stream_event(&frame) {
            StreamEvent::ObservedValue {
                object_id,
                item_reference,
                value,
                ..
            } => {
                assert_eq!(object_id.as_deref(), Some("a1"));
                assert_eq!(item_reference.as_deref(), Some("site:NAE/VAV-1.ZN-T"));
                assert_eq!(value.as_i64(), Some(1));
                assert!(matches!(value, PresentValue::Numeric(_)));
            }
            other => panic!("expected observed value, got {:?}", other),
        }
    }

    #[test]
    fn test_observed_value_text() {
        let frame = Frame::new(
            VALUE_UPDATE_EVENT,
            r#"{"item":{"id":"a1","itemReference":"r","presentValue":"bacnetChanged"}}"#,
        );

        match to_stream_event(&frame) {
            StreamEvent::ObservedValue { value, .. } => {
                assert_eq!(value, PresentValue::Text("bacnetChanged".into()));
            }
            other => panic!("expected observed value, got {:?}", other),
        }
    }

    #[test]
    fn test_observed_value_missing_fields() {
        let frame = Frame::new(VALUE_UPDATE_EVENT, r#"{"item":{"id":"a1"}}"#);

        match to_stream_event(&frame) {
            StreamEvent::ObservedValue {
                object_id,
                item_reference,
                value,
                ..
            } => {
                assert_eq!(object_id.as_deref(), Some("a1"));
                assert_eq!(item_reference, None);
                assert!(value.is_missing());
            }
            other => panic!("expected observed value, got {:?}", other),
        }
    }

    #[test]
    fn test_observed_value_garbage_payload() {
        let frame = Frame::new(VALUE_UPDATE_EVENT, "{not json");

        match to_stream_event(&frame) {
            StreamEvent::ObservedValue {
                header,
                object_id,
                value,
                ..
            } => {
                assert_eq!(object_id, None);
                assert!(value.is_missing());
                assert_eq!(header.data.as_deref(), Some("{not json"));
            }
            other => panic!("expected observed value, got {:?}", other),
        }
    }

    #[test]
    fn test_hello_subscription_id() {
        let event = to_stream_event(&Frame::new(HELLO_EVENT, "\"sub-123\""));
        assert_eq!(
            event,
            StreamEvent::SubscriptionOpened {
                header: FrameHeader {
                    id: None,
                    name: Some("hello".into()),
                    comment: None,
                    data: Some("\"sub-123\"".into()),
                },
                subscription_id: Some("sub-123".into()),
            }
        );

        match to_stream_event(&Frame::new(HELLO_EVENT, "sub-raw")) {
            StreamEvent::SubscriptionOpened {
                subscription_id, ..
            } => assert_eq!(subscription_id.as_deref(), Some("sub-raw")),
            other => panic!("expected subscription opened, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_kept() {
        let event = to_stream_event(&Frame::new("alarm.update", "{\"x\":1}"));
        assert_eq!(event.kind(), "unknown");
        assert_eq!(event.header().data.as_deref(), Some("{\"x\":1}"));

        let unnamed = to_stream_event(&Frame {
            data: Some("orphan".into()),
            ..Default::default()
        });
        assert_eq!(unnamed.kind(), "unknown");
    }
}
