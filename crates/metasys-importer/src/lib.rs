//! metasys-importer - Push-stream ingestion for Metasys sensors
//!
//! [`StreamImporter`] keeps a bearer token fresh, holds the push stream
//! open, subscribes the mapped sensors and forwards their values to an
//! [`ObservationSink`](metasys_core::ObservationSink). Every step is recorded
//! in a per-sensor [`AuditTrail`](metasys_core::AuditTrail).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use metasys_client::MetasysClient;
//! use metasys_core::{
//!     ChannelObservationSink, Credentials, InMemorySensorRepository, MappedSensor, TracingMetrics,
//! };
//! use metasys_importer::{Collaborators, ImporterConfig, StreamImporter};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Arc::new(MetasysClient::new("https://adx.example.com/api/v4/")?);
//! let sensors = Arc::new(InMemorySensorRepository::from_sensors([
//!     MappedSensor::new("zone-1-temp", "a1b2c3").with_item_reference("site:NAE-1/VAV-1.ZN-T"),
//! ]));
//! let (sink, mut observations) = ChannelObservationSink::new();
//!
//! let importer = StreamImporter::new(
//!     ImporterConfig::default(),
//!     Credentials::new("user", "secret"),
//!     client.stream_url()?,
//!     Collaborators::from_client(client, sensors, Arc::new(sink), Arc::new(TracingMetrics)),
//! )?;
//! importer.start().await?;
//!
//! while let Some(observation) = observations.recv().await {
//!     println!("{} = {}", observation.sensor_id, observation.value);
//! }
//! # Ok(())
//! # }
//! ```

mod backoff;
pub mod config;
mod error;
mod importer;
pub mod metrics;
pub mod testing;
mod timer;
mod token;

pub use backoff::Backoff;
pub use config::ImporterConfig;
pub use error::{ImporterError, ImporterResult};
pub use importer::{Collaborators, StreamImporter};
pub use timer::{TimerFuture, TimerSlot};
pub use token::TokenManager;
