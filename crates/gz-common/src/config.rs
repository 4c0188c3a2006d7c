//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Monitor configuration model, file loading and validation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

/// Smallest and largest forecast horizon accepted by the forecast resource.
pub const FORECAST_HOURS_RANGE: std::ops::RangeInclusive<u32> = 6..=48;

fn default_base_url() -> Url {
    Url::parse("http://127.0.0.1:8000").expect("valid default base url")
}

fn default_stream_path() -> String {
    "/ws/live".to_owned()
}

fn default_reconnect_delay() -> Duration {
    Duration::from_millis(3000)
}

fn default_history_capacity() -> usize {
    120
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_recommendations() -> usize {
    8
}

fn default_forecast_hours() -> u32 {
    24
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_listen() -> SocketAddr {
    "127.0.0.1:9899"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object for the live monitor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub recommendations: RecommendationConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "GZ_MONITOR_CONFIG";

    /// Load configuration from disk, respecting the `GZ_MONITOR_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(None, candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    ///
    /// Precedence: `explicit` (must exist), then `GZ_MONITOR_CONFIG`, then the
    /// first existing candidate.
    pub fn load_with_source<P: AsRef<Path>>(
        explicit: Option<&Path>,
        candidates: &[P],
    ) -> Result<LoadedAppConfig> {
        if let Some(path) = explicit {
            let config = Self::from_path(path)?;
            return Ok(LoadedAppConfig {
                config,
                source: path.to_path_buf(),
            });
        }

        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Parse and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.endpoint.validate()?;
        if self.stream.reconnect_delay.is_zero() {
            return Err(anyhow!("stream.reconnect_delay_ms must be greater than zero"));
        }
        if self.history.capacity == 0 {
            return Err(anyhow!("history.capacity must be at least 1"));
        }
        if self.history.sample_interval.is_zero() {
            return Err(anyhow!("history.sample_interval_secs must be greater than zero"));
        }
        if self.recommendations.max_items == 0 {
            return Err(anyhow!("recommendations.max_items must be at least 1"));
        }
        if !FORECAST_HOURS_RANGE.contains(&self.fetch.forecast_hours) {
            return Err(anyhow!(
                "fetch.forecast_hours must be within {}..={} (got {})",
                FORECAST_HOURS_RANGE.start(),
                FORECAST_HOURS_RANGE.end(),
                self.fetch.forecast_hours
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Location of the backend serving the live stream and the REST resources.
///
/// The stream URL is derived from the same base so a single `base_url`
/// (`baseUrl` is accepted as well) points the monitor at one deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_base_url", alias = "baseUrl")]
    pub base_url: Url,
    #[serde(default = "default_stream_path")]
    pub stream_path: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            stream_path: default_stream_path(),
        }
    }
}

impl EndpointConfig {
    /// Build an endpoint from a bare base URL, keeping the default stream path.
    pub fn from_base(base_url: Url) -> Self {
        Self {
            base_url,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.base_url.scheme() {
            "http" | "https" | "ws" | "wss" => {}
            other => return Err(anyhow!("endpoint.base_url has unsupported scheme '{other}'")),
        }
        if self.base_url.cannot_be_a_base() {
            return Err(anyhow!("endpoint.base_url {} is not a base url", self.base_url));
        }
        Ok(())
    }

    /// WebSocket URL of the live stream, `ws`/`wss` chosen from the base scheme.
    pub fn stream_url(&self) -> Result<Url> {
        let mut url = self.join(&self.stream_path)?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| anyhow!("cannot derive stream url from {}", self.base_url))?;
        Ok(url)
    }

    /// HTTP URL of a REST resource below the base.
    pub fn resource_url(&self, path: &str) -> Result<Url> {
        let mut url = self.join(path)?;
        let scheme = match url.scheme() {
            "wss" | "https" => "https",
            _ => "http",
        };
        url.set_scheme(scheme)
            .map_err(|()| anyhow!("cannot derive resource url from {}", self.base_url))?;
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid path '{path}' for base {}", self.base_url))
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Fixed delay between a lost connection and the next attempt.
    #[serde(default = "default_reconnect_delay", rename = "reconnect_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub reconnect_delay: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
    /// Nominal spacing between readings, used to integrate kW into kWh.
    #[serde(default = "default_sample_interval", rename = "sample_interval_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub sample_interval: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
            sample_interval: default_sample_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationConfig {
    #[serde(default = "default_max_recommendations")]
    pub max_items: usize,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_recommendations(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_forecast_hours")]
    pub forecast_hours: u32,
    /// Zero disables periodic polling; resources are then fetched once and on demand.
    #[serde(default = "default_poll_interval", rename = "poll_interval_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
    /// Zero disables the per-request timeout.
    #[serde(default = "default_request_timeout", rename = "request_timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
}

impl FetchConfig {
    pub fn poll_every(&self) -> Option<Duration> {
        (!self.poll_interval.is_zero()).then_some(self.poll_interval)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (!self.request_timeout.is_zero()).then_some(self.request_timeout)
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            forecast_hours: default_forecast_hours(),
            poll_interval: default_poll_interval(),
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
