//! Per-sensor audit trail
//!
//! The trail keeps, for every sensor id it has seen, the latest event of each
//! [`AuditCategory`]. It is a current-state ledger: recording an event of a
//! category overwrites the previous event of that category, nothing is
//! appended. Sensor entries are created lazily on first reference, seeded with
//! an `Initialized` event, and never evicted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Pseudo sensor id for stream-level events (heartbeats, subscription, unknown frames)
pub const STREAM_SENSOR_ID: &str = "Stream";

/// Pseudo sensor id for logon and token refresh events
pub const LOGON_SENSOR_ID: &str = "Logon";

/// Dimension under which the latest event for a sensor is retained
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AuditCategory {
    Initialized,
    Created,
    Subscribed,
    ObservedTrend,
    ObservedStream,
    ObservedPresentValue,
    Failed,
}

impl AuditCategory {
    pub const ALL: [AuditCategory; 7] = [
        Self::Initialized,
        Self::Created,
        Self::Subscribed,
        Self::ObservedTrend,
        Self::ObservedStream,
        Self::ObservedPresentValue,
        Self::Failed,
    ];
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub sensor_id: String,
    pub category: AuditCategory,
    pub detail: String,
}

impl AuditEvent {
    pub fn new(
        sensor_id: impl Into<String>,
        category: AuditCategory,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            sensor_id: sensor_id.into(),
            category,
            detail: detail.into(),
        }
    }
}

/// Latest event per category for one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditState {
    pub sensor_id: String,
    pub events: BTreeMap<AuditCategory, AuditEvent>,
}

impl AuditState {
    fn seeded(sensor_id: &str) -> Self {
        let mut events = BTreeMap::new();
        events.insert(
            AuditCategory::Initialized,
            AuditEvent::new(sensor_id, AuditCategory::Initialized, "initialized"),
        );
        Self {
            sensor_id: sensor_id.to_string(),
            events,
        }
    }

    pub fn get(&self, category: AuditCategory) -> Option<&AuditEvent> {
        self.events.get(&category)
    }

    pub fn contains(&self, category: AuditCategory) -> bool {
        self.events.contains_key(&category)
    }

    /// Most recent event across all categories
    pub fn latest(&self) -> Option<&AuditEvent> {
        self.events.values().max_by_key(|e| e.timestamp)
    }
}

/// Concurrent per-sensor audit ledger
#[derive(Debug, Default)]
pub struct AuditTrail {
    states: DashMap<String, AuditState>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `event` in the slot for its category, seeding the sensor on first use
    pub fn record_event(&self, event: AuditEvent) {
        let mut state = self
            .states
            .entry(event.sensor_id.clone())
            .or_insert_with(|| AuditState::seeded(&event.sensor_id));
        state.events.insert(event.category, event);
    }

    /// Record an event of `category` for `sensor_id`
    pub fn record(&self, sensor_id: &str, category: AuditCategory, detail: impl Into<String>) {
        self.record_event(AuditEvent::new(sensor_id, category, detail));
    }

    pub fn record_created(&self, sensor_id: &str, detail: impl Into<String>) {
        self.record(sensor_id, AuditCategory::Created, detail);
    }

    pub fn record_subscribed(&self, sensor_id: &str, detail: impl Into<String>) {
        self.record(sensor_id, AuditCategory::Subscribed, detail);
    }

    pub fn record_observed_trend(&self, sensor_id: &str, detail: impl Into<String>) {
        self.record(sensor_id, AuditCategory::ObservedTrend, detail);
    }

    pub fn record_observed_stream(&self, sensor_id: &str, detail: impl Into<String>) {
        self.record(sensor_id, AuditCategory::ObservedStream, detail);
    }

    pub fn record_observed_present_value(&self, sensor_id: &str, detail: impl Into<String>) {
        self.record(sensor_id, AuditCategory::ObservedPresentValue, detail);
    }

    pub fn record_failed(&self, sensor_id: &str, detail: impl Into<String>) {
        self.record(sensor_id, AuditCategory::Failed, detail);
    }

    /// State for one sensor, `None` if it was never referenced
    pub fn get_state(&self, sensor_id: &str) -> Option<AuditState> {
        self.states.get(sensor_id).map(|s| s.value().clone())
    }

    /// Snapshot of all sensor states, ordered by sensor id
    pub fn get_all(&self) -> BTreeMap<String, AuditState> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_unknown_sensor_is_absent() {
        let trail = AuditTrail::new();
        assert!(trail.get_state("never-seen").is_none());
        assert!(trail.is_empty());
    }

    #[test]
    fn test_first_record_seeds_initialized() {
        let trail = AuditTrail::new();

        for category in AuditCategory::ALL {
            let sensor = format!("sensor-{}", category);
            trail.record(&sensor, category, "detail");

            let state = trail.get_state(&sensor).unwrap();
            assert!(state.contains(AuditCategory::Initialized));
            assert!(state.contains(category));
        }
    }

    #[test]
    fn test_latest_event_per_category_wins() {
        let trail = AuditTrail::new();
        trail.record_failed("s1", "first");
        trail.record_failed("s1", "second");
        trail.record_subscribed("s1", "sub-1");

        let state = trail.get_state("s1").unwrap();
        assert_eq!(state.events.len(), 3);
        assert_eq!(state.get(AuditCategory::Failed).unwrap().detail, "second");
        assert_eq!(state.get(AuditCategory::Subscribed).unwrap().detail, "sub-1");
    }

    #[test]
    fn test_recorded_event_round_trips() {
        let trail = AuditTrail::new();
        let event = AuditEvent::new("ahu-1", AuditCategory::ObservedTrend, "21.5 @ 12:00");
        trail.record_event(event.clone());

        let state = trail.get_state("ahu-1").unwrap();
        assert_eq!(state.get(AuditCategory::ObservedTrend), Some(&event));
    }

    #[test]
    fn test_initialized_is_not_reseeded() {
        let trail = AuditTrail::new();
        trail.record_created("s1", "created");
        let seeded = trail
            .get_state("s1")
            .unwrap()
            .get(AuditCategory::Initialized)
            .cloned()
            .unwrap();

        trail.record_failed("s1", "later");
        let again = trail.get_state("s1").unwrap();
        assert_eq!(again.get(AuditCategory::Initialized), Some(&seeded));
    }

    #[test]
    fn test_get_all_snapshot() {
        let trail = AuditTrail::new();
        trail.record_created("b", "x");
        trail.record_created("a", "y");

        let all = trail.get_all();
        assert_eq!(all.keys().cloned().collect::<Vec<_>>(), vec!["a", "b"]);

        // Later writes don't leak into the snapshot
        trail.record_failed("a", "z");
        assert!(!all["a"].contains(AuditCategory::Failed));
    }

    #[test]
    fn test_concurrent_writers_seed_once() {
        let trail = Arc::new(AuditTrail::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let trail = trail.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        trail.record_observed_stream("shared", format!("{}-{}", i, j));
                        trail.record_observed_stream(&format!("own-{}", i), "x");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(trail.len(), 9);
        let shared = trail.get_state("shared").unwrap();
        assert_eq!(shared.events.len(), 2);
    }

    #[test]
    fn test_state_serializes_category_keys() {
        let trail = AuditTrail::new();
        trail.record_created("s1", "created");
        let json = serde_json::to_value(trail.get_state("s1").unwrap()).unwrap();
        assert!(json["events"]["Initialized"].is_object());
        assert_eq!(json["events"]["Created"]["detail"], "created");
    }
}
