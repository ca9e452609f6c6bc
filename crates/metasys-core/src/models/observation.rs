//! Observations handed to downstream sinks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::PresentValue;

/// Where an observed value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationOrigin {
    /// Live update on the push stream
    Stream,
    /// Present value returned by a subscribe/read call
    PresentValueRead,
    /// Sample fetched from the trend history
    Trend,
}

impl ObservationOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::PresentValueRead => "present_value_read",
            Self::Trend => "trend",
        }
    }
}

/// A sensor known to the mapping repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedSensor {
    /// Downstream sensor identifier
    pub sensor_id: String,
    /// Upstream object id (GUID), used for subscribe and trend calls
    pub object_id: String,
    /// Upstream item reference (e.g. `site:NAE-1/Field Bus.VAV-1.ZN-T`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_reference: Option<String>,
}

impl MappedSensor {
    pub fn new(sensor_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            object_id: object_id.into(),
            item_reference: None,
        }
    }

    pub fn with_item_reference(mut self, reference: impl Into<String>) -> Self {
        self.item_reference = Some(reference.into());
        self
    }
}

/// A typed reading for a mapped sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub sensor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_reference: Option<String>,
    pub value: PresentValue,
    pub observed_at: DateTime<Utc>,
    pub origin: ObservationOrigin,
}

impl Observation {
    /// Observation for `sensor` stamped with the current time
    pub fn for_sensor(sensor: &MappedSensor, value: PresentValue, origin: ObservationOrigin) -> Self {
        Self {
            sensor_id: sensor.sensor_id.clone(),
            object_id: Some(sensor.object_id.clone()),
            item_reference: sensor.item_reference.clone(),
            value,
            observed_at: Utc::now(),
            origin,
        }
    }

    pub fn at(mut self, observed_at: DateTime<Utc>) -> Self {
        self.observed_at = observed_at;
        self
    }
}

/// One sample from the trend history of an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSample {
    pub timestamp: DateTime<Utc>,
    pub value: PresentValue,
}
