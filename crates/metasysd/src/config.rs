//! Daemon configuration file
//!
//! ```toml
//! [upstream]
//! base_url = "https://adx.example.com/api/v4/"
//! username = "importer"
//! password = "secret"
//!
//! [importer]
//! token_safety_margin_ms = 60000
//! trend_poll_interval_ms = 900000
//!
//! [[sensors]]
//! sensor_id = "zone-1-temp"
//! object_id = "a1b2c3"
//! item_reference = "site:NAE-1/Field Bus.VAV-1.ZN-T"
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use metasys_core::{Credentials, MappedSensor};
use metasys_importer::ImporterConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DaemonConfig {
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub importer: ImporterConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub sensors: Vec<MappedSensor>,
}

#[derive(Clone, Deserialize)]
pub struct UpstreamConfig {
    /// REST root, e.g. `https://host/api/v4/`
    pub base_url: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl UpstreamConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Periodic health and audit summary in the log
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// 0 disables the report
    #[serde(default = "default_report_interval_ms")]
    pub interval_ms: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_report_interval_ms(),
        }
    }
}

fn default_report_interval_ms() -> u64 {
    300_000
}

impl ReportConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_ms > 0).then(|| Duration::from_millis(self.interval_ms))
    }
}

impl DaemonConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            bail!("upstream.base_url must not be empty");
        }
        if self.upstream.username.is_empty() {
            bail!("upstream.username must not be empty");
        }
        self.importer
            .validate()
            .map_err(|e| anyhow::anyhow!("importer: {}", e))?;

        for sensor in &self.sensors {
            if sensor.sensor_id.is_empty() || sensor.object_id.is_empty() {
                bail!("every sensor needs a sensor_id and an object_id: {:?}", sensor);
            }
        }
        if self.sensors.is_empty() {
            tracing::warn!("No sensors configured, every value update will be unmapped");
        }
        Ok(())
    }
}
