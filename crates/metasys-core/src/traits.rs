//! Traits for the importer's collaborators
//!
//! The upstream API is split in two seams: [`AuthApi`] for the token lifecycle
//! and [`SubscriptionApi`] for the per-object calls. The remaining traits are
//! the external collaborators the importer forwards to: sensor mapping,
//! observation distribution and metrics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::IngestResult;
use crate::models::{Credentials, MappedSensor, Observation, PresentValue, Token, TrendSample};

/// Logon and token refresh against the upstream API
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Log on with credentials; fails with `IngestError::LogonFailed`
    async fn logon(&self, credentials: &Credentials) -> IngestResult<Token>;

    /// Exchange a still-valid token for a fresh one; fails with
    /// `IngestError::TokenRefreshFailed`
    async fn refresh(&self, token: &Token) -> IngestResult<Token>;
}

/// Per-object upstream calls
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    /// Attach `object_id` to the stream subscription and return its current present value
    async fn subscribe(
        &self,
        token: &Token,
        object_id: &str,
        subscription_id: &str,
    ) -> IngestResult<PresentValue>;

    /// Trended present value samples in `[start, end]`
    async fn trend_samples(
        &self,
        token: &Token,
        object_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> IngestResult<Vec<TrendSample>>;
}

/// Sensor identity mapping, populated out of band
pub trait SensorRepository: Send + Sync {
    /// Resolve an item reference or object id to a mapped sensor
    fn lookup(&self, reference: &str) -> Option<MappedSensor>;

    /// All mapped sensors (the set the importer subscribes)
    fn sensors(&self) -> Vec<MappedSensor>;
}

/// Downstream observation distribution
///
/// `publish` must return quickly; implementations hand the observation off
/// rather than performing I/O inline. Delivery guarantees are the sink's
/// responsibility.
pub trait ObservationSink: Send + Sync {
    fn publish(&self, observation: Observation);
}

/// Metrics collaborator
pub trait MetricsSink: Send + Sync {
    fn record(&self, name: &str, value: f64, tags: &[(&str, &str)]);

    /// Record a counter increment of one
    fn increment(&self, name: &str, tags: &[(&str, &str)]) {
        self.record(name, 1.0, tags);
    }
}
