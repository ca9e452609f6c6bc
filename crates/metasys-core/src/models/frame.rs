//! Raw push-stream frames

use serde::{Deserialize, Serialize};

/// One frame of the push stream, as delimited by a blank line
///
/// Every field is optional on the wire. Multiple `data` lines are joined with
/// `\n`; `comment` holds the last comment line seen inside the frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Reconnection delay hint in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Frame {
    /// Frame with an event name and data payload
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: Some(data.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// True when nothing but a comment was received (a keepalive)
    pub fn is_comment_only(&self) -> bool {
        self.id.is_none() && self.event.is_none() && self.data.is_none() && self.retry.is_none()
    }

    /// True when no field at all was set
    pub fn is_empty(&self) -> bool {
        self.is_comment_only() && self.comment.is_none()
    }
}
