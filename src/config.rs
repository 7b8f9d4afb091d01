use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::models::TIME_KEY;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Shortest pass interval accepted.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);
/// Longest pass interval accepted (one day).
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub aggregator: AggregatorConfig,
    pub recorder: RecorderConfig,
    pub digitizer: DigitizerConfig,
    pub correlator: CorrelatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub endpoints: Vec<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Keys fetched per request during scans. Scans page until exhausted, so this never caps results.
    pub page_size: u32,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["localhost:2379".to_string()],
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            page_size: 1000,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub interval_secs: f64,
    /// Run the collectors of one pass concurrently instead of in order.
    pub concurrent: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60.0,
            concurrent: false,
        }
    }
}

impl AggregatorConfig {
    /// Checked pass interval; see [`validate_interval`].
    pub fn interval(&self) -> anyhow::Result<Duration> {
        validate_interval(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    pub prefix: String,
    pub staleness_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "/mon/dr".to_string(),
            staleness_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DigitizerConfig {
    pub enabled: bool,
    pub prefix: String,
    pub staleness_secs: u64,
}

impl Default for DigitizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "/mon/snap/".to_string(),
            staleness_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    pub enabled: bool,
    pub host_prefix: String,
    pub hosts: u32,
    pub pipelines: u32,
    pub staleness_secs: u64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host_prefix: "lxdlwagpu".to_string(),
            hosts: 8,
            pipelines: 4,
            staleness_secs: 120,
        }
    }
}

impl AppConfig {
    /// Loads `path`, else `CONFIG_FILE`, else `config.toml`. Only the implicit
    /// `config.toml` may be absent, in which case the defaults apply.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("CONFIG_FILE").map(Into::into));
        let path = match explicit {
            Some(p) => p,
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    let config = Self::default();
                    config.validate()?;
                    return Ok(config);
                }
                default.to_path_buf()
            }
        };
        let s = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {}: {}", path.display(), e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.store.endpoints.is_empty(),
            "store.endpoints must list at least one endpoint"
        );
        anyhow::ensure!(
            self.store.page_size > 0,
            "store.page_size must be > 0, got {}",
            self.store.page_size
        );
        anyhow::ensure!(
            self.store.request_timeout_secs > 0,
            "store.request_timeout_secs must be > 0, got {}",
            self.store.request_timeout_secs
        );
        anyhow::ensure!(
            self.store.username.is_some() == self.store.password.is_some(),
            "store.username and store.password must be set together"
        );
        validate_interval(self.aggregator.interval_secs)?;
        anyhow::ensure!(
            !self.recorder.prefix.is_empty(),
            "recorder.prefix must be non-empty"
        );
        anyhow::ensure!(
            self.recorder.staleness_secs > 0,
            "recorder.staleness_secs must be > 0, got {}",
            self.recorder.staleness_secs
        );
        anyhow::ensure!(
            !self.digitizer.prefix.is_empty(),
            "digitizer.prefix must be non-empty"
        );
        anyhow::ensure!(
            self.digitizer.staleness_secs > 0,
            "digitizer.staleness_secs must be > 0, got {}",
            self.digitizer.staleness_secs
        );
        anyhow::ensure!(
            !self.correlator.host_prefix.is_empty(),
            "correlator.host_prefix must be non-empty"
        );
        anyhow::ensure!(
            self.correlator.hosts > 0 && self.correlator.pipelines > 0,
            "correlator.hosts and correlator.pipelines must be > 0, got {} x {}",
            self.correlator.hosts,
            self.correlator.pipelines
        );
        anyhow::ensure!(
            self.correlator.staleness_secs > 0,
            "correlator.staleness_secs must be > 0, got {}",
            self.correlator.staleness_secs
        );
        Ok(())
    }
}

/// Converts `secs` to a pass interval between [`MIN_INTERVAL`] and [`MAX_INTERVAL`].
pub fn validate_interval(secs: f64) -> anyhow::Result<Duration> {
    anyhow::ensure!(
        secs.is_finite() && secs > 0.0,
        "aggregator.interval_secs must be > 0, got {}",
        secs
    );
    let interval = Duration::try_from_secs_f64(secs)
        .map_err(|e| anyhow::anyhow!("aggregator.interval_secs {secs} out of range: {e}"))?;
    anyhow::ensure!(
        (MIN_INTERVAL..=MAX_INTERVAL).contains(&interval),
        "aggregator.interval_secs must be between {} and {}, got {}",
        MIN_INTERVAL.as_secs_f64(),
        MAX_INTERVAL.as_secs_f64(),
        secs
    );
    Ok(interval)
}

/// Rejects a collector whose fields would collide with the reserved `time` key or its tag.
pub fn validate_output_fields(
    collector: &str,
    tag_name: &str,
    fields: &[String],
) -> anyhow::Result<()> {
    anyhow::ensure!(
        tag_name != TIME_KEY,
        "{collector}: tag name `{tag_name}` collides with the reserved `{TIME_KEY}` key"
    );
    for field in fields {
        anyhow::ensure!(
            field != TIME_KEY && field != tag_name,
            "{collector}: field `{field}` collides with reserved output key"
        );
    }
    Ok(())
}
