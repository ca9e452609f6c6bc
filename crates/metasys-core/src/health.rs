//! Process health counters
//!
//! A `HealthState` is constructed once at startup and handed (as an `Arc`) to
//! every component that reports into it.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

#[derive(Debug, Default)]
pub struct HealthState {
    frames_received: AtomicU64,
    observations_published: AtomicU64,
    sensors_unmapped: AtomicU64,
    unknown_events: AtomicU64,
    logon_failures: AtomicU64,
    subscribe_failures: AtomicU64,
    reconnects: AtomicU64,
    /// Unix millis of the last heartbeat, 0 if none
    last_heartbeat_ms: AtomicI64,
}

/// Point-in-time copy of the health counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub frames_received: u64,
    pub observations_published: u64,
    pub sensors_unmapped: u64,
    pub unknown_events: u64,
    pub logon_failures: u64,
    pub subscribe_failures: u64,
    pub reconnects: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observation_published(&self) {
        self.observations_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sensor_unmapped(&self) {
        self.sensors_unmapped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_event(&self) {
        self.unknown_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn logon_failed(&self) {
        self.logon_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_failed(&self) {
        self.subscribe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnected(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat(&self, at: DateTime<Utc>) {
        self.last_heartbeat_ms
            .store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        match self.last_heartbeat_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            frames_received: self.frames_received(),
            observations_published: self.observations_published.load(Ordering::Relaxed),
            sensors_unmapped: self.sensors_unmapped.load(Ordering::Relaxed),
            unknown_events: self.unknown_events.load(Ordering::Relaxed),
            logon_failures: self.logon_failures.load(Ordering::Relaxed),
            subscribe_failures: self.subscribe_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            last_heartbeat: self.last_heartbeat(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let health = HealthState::new();
        health.frame_received();
        health.frame_received();
        health.sensor_unmapped();
        health.logon_failed();

        let snap = health.snapshot();
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.sensors_unmapped, 1);
        assert_eq!(snap.logon_failures, 1);
        assert_eq!(snap.observations_published, 0);
        assert!(snap.last_heartbeat.is_none());
    }

    #[test]
    fn test_heartbeat_millis_precision() {
        let health = HealthState::new();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        health.heartbeat(at);
        assert_eq!(health.last_heartbeat(), Some(at));
    }
}
