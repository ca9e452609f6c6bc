//! Metric names emitted by the importer

/// An observation was handed to the sink
pub const OBSERVATION_PUBLISHED: &str = "metasys.observation.published";
/// A value update referenced no mapped sensor
pub const SENSOR_UNMAPPED: &str = "metasys.sensor.unmapped";
/// Logon or token refresh failed
pub const LOGON_FAILURE: &str = "metasys.logon.failure";
/// A subscribe call for one sensor failed
pub const SUBSCRIBE_FAILURE: &str = "metasys.subscribe.failure";
/// The stream session ended and will be reopened
pub const STREAM_RECONNECT: &str = "metasys.stream.reconnect";
/// The liveness watchdog closed a stalled stream
pub const STREAM_STALLED: &str = "metasys.stream.stalled";
/// A trend read for one sensor failed
pub const TREND_FAILURE: &str = "metasys.trend.failure";
