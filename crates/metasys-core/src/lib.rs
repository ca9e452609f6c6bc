//! metasys-core - Core types and traits for Metasys stream ingestion
//!
//! This crate provides the domain model shared by the streaming client and the
//! importer (tokens, push-stream frames, typed stream events, observations),
//! the per-sensor audit trail, the process health state, and the traits the
//! importer uses to talk to its external collaborators.

pub mod audit;
pub mod error;
pub mod health;
pub mod models;
pub mod sensors;
pub mod sinks;
pub mod traits;

pub use audit::{AuditCategory, AuditEvent, AuditState, AuditTrail};
pub use error::{IngestError, IngestResult};
pub use health::{HealthSnapshot, HealthState};
pub use models::*;
pub use sensors::InMemorySensorRepository;
pub use sinks::{ChannelObservationSink, InMemoryMetrics, NoopMetrics, TracingMetrics};
pub use traits::{AuthApi, MetricsSink, ObservationSink, SensorRepository, SubscriptionApi};
