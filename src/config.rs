use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "breathe.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no video source configured")]
    NoSource,
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    OpticalFlow,
    Intensity,
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Variant::OpticalFlow => f.write_str("optical_flow"),
            Variant::Intensity => f.write_str("intensity"),
        }
    }
}

impl std::str::FromStr for Variant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "optical_flow" | "optical-flow" | "flow" => Ok(Variant::OpticalFlow),
            "intensity" => Ok(Variant::Intensity),
            other => Err(format!("unknown variant: {other}")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Video file path, or a camera index such as "0".
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default = "default_fps")]
    pub default_fps: f64,
}

fn default_fps() -> f64 {
    30.0
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: None,
            default_fps: default_fps(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RegionConfig {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

fn default_grid_step() -> i32 {
    5
}

fn default_win_size() -> i32 {
    15
}

fn default_max_level() -> i32 {
    2
}

fn default_max_iterations() -> i32 {
    10
}

fn default_epsilon() -> f64 {
    0.03
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    #[serde(default = "default_grid_step")]
    pub grid_step: i32,
    #[serde(default = "default_win_size")]
    pub win_size: i32,
    #[serde(default = "default_max_level")]
    pub max_level: i32,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: i32,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            grid_step: default_grid_step(),
            win_size: default_win_size(),
            max_level: default_max_level(),
            max_iterations: default_max_iterations(),
            epsilon: default_epsilon(),
        }
    }
}

fn default_variant() -> Variant {
    Variant::OpticalFlow
}

fn default_window_secs() -> f64 {
    5.0
}

fn default_min_hz() -> f64 {
    1.0
}

fn default_max_hz() -> f64 {
    4.0
}

fn default_recompute_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_variant")]
    pub variant: Variant,
    #[serde(default = "default_window_secs")]
    pub window_secs: f64,
    #[serde(default = "default_min_hz")]
    pub min_hz: f64,
    #[serde(default = "default_max_hz")]
    pub max_hz: f64,
    #[serde(default = "default_recompute_interval_ms")]
    pub recompute_interval_ms: u64,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            variant: default_variant(),
            window_secs: default_window_secs(),
            min_hz: default_min_hz(),
            max_hz: default_max_hz(),
            recompute_interval_ms: default_recompute_interval_ms(),
            tracking: TrackingConfig::default(),
        }
    }
}

fn default_alert_enabled() -> bool {
    true
}

fn default_tone_hz() -> u32 {
    1000
}

fn default_tone_ms() -> u64 {
    100
}

fn default_refractory_ms() -> u64 {
    300
}

fn default_min_prominence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_alert_enabled")]
    pub enabled: bool,
    #[serde(default = "default_tone_hz")]
    pub tone_hz: u32,
    #[serde(default = "default_tone_ms")]
    pub tone_ms: u64,
    #[serde(default = "default_refractory_ms")]
    pub refractory_ms: u64,
    #[serde(default = "default_min_prominence")]
    pub min_prominence: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: default_alert_enabled(),
            tone_hz: default_tone_hz(),
            tone_ms: default_tone_ms(),
            refractory_ms: default_refractory_ms(),
            min_prominence: default_min_prominence(),
        }
    }
}

fn default_display_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_display_enabled")]
    pub enabled: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: default_display_enabled(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub plot_path: Option<PathBuf>,
    #[serde(default)]
    pub samples_csv: Option<PathBuf>,
    #[serde(default)]
    pub summary_json: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    /// Skips interactive selection when set.
    #[serde(default)]
    pub region: Option<RegionConfig>,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Loads `breathe.toml` from the working directory, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::load_from(DEFAULT_CONFIG_PATH) {
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = DEFAULT_CONFIG_PATH, "no config file, using defaults");
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Checks the values that would otherwise surface as NaN or empty
    /// windows deep inside the pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.uri.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::NoSource);
        }
        if !(self.source.default_fps.is_finite() && self.source.default_fps > 0.0) {
            return Err(ConfigError::Invalid("source.default_fps must be positive".into()));
        }

        let analytics = &self.analytics;
        if !(analytics.window_secs > 0.0) {
            return Err(ConfigError::Invalid("analytics.window_secs must be positive".into()));
        }
        if !(analytics.min_hz >= 0.0 && analytics.min_hz < analytics.max_hz) {
            return Err(ConfigError::Invalid(
                "analytics.min_hz must be below analytics.max_hz".into(),
            ));
        }
        if analytics.recompute_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "analytics.recompute_interval_ms must be non-zero".into(),
            ));
        }

        let tracking = &analytics.tracking;
        if tracking.grid_step <= 0 || tracking.win_size <= 0 || tracking.max_level < 0 {
            return Err(ConfigError::Invalid(
                "tracking grid_step and win_size must be positive".into(),
            ));
        }

        if let Some(region) = &self.region {
            if region.width <= 0 || region.height <= 0 {
                return Err(ConfigError::Invalid("region must have a non-zero size".into()));
            }
        }

        Ok(())
    }
}
