//! Engine configuration loading and validation
//!
//! Configuration is static for the lifetime of a stream attachment. It is
//! loaded once from TOML following this priority order:
//! 1. Explicit path (command-line argument)
//! 2. `EDGECLOCK_CONFIG` environment variable
//! 3. `<config_dir>/edgeclock/config.toml`
//! 4. Compiled defaults
//!
//! A missing file is never fatal: the loader logs a warning and falls back
//! to defaults. A file that exists but does not parse is an error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "EDGECLOCK_CONFIG";

/// Complete configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Calibration engine tuning
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Calibration and seek tuning
///
/// All durations named `*_sec` are stream/epoch seconds, `*_ms` are timer
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Assumed end-to-end broadcast delay behind wall-clock time
    pub latency_sec: f64,

    /// Guard band subtracted from the seekable end before seeking
    pub edge_slack_sec: f64,

    /// Distance from the live edge that still counts as "at the edge"
    pub near_live_slack_sec: f64,

    /// Minimum distance kept from the buffered frontier when seeking
    pub edge_backoff_sec: f64,

    /// Seekable end exceeding buffered end by more than this is treated as
    /// an over-reporting backend, and the buffered end is used instead
    pub seekable_anomaly_sec: f64,

    /// Delay before re-checking playback after landing on the window end
    pub end_recheck_ms: u64,

    /// Period of the automatic Edge-Snap probe while uncalibrated
    pub probe_interval_ms: u64,

    /// Playback lock release delays
    pub lock: LockConfig,

    /// Live-PLL drift corrector tuning
    pub pll: PllConfig,

    /// Buffered-vs-seekable skew fallback estimator tuning
    pub skew: SkewConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latency_sec: 20.0,
            edge_slack_sec: 3.0,
            near_live_slack_sec: 5.0,
            edge_backoff_sec: 0.75,
            seekable_anomaly_sec: 120.0,
            end_recheck_ms: 250,
            probe_interval_ms: 1000,
            lock: LockConfig::default(),
            pll: PllConfig::default(),
            skew: SkewConfig::default(),
        }
    }
}

/// Unlock delays applied after playback settles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Delay after a `seeked` event before calibration resumes
    pub seeked_unlock_ms: u64,

    /// Delay after a `playing` event before calibration resumes
    pub playing_unlock_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            seeked_unlock_ms: 1500,
            playing_unlock_ms: 250,
        }
    }
}

/// Live-PLL tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PllConfig {
    /// Errors at or below this magnitude are noise
    pub hys_sec: f64,

    /// Consecutive ticks past hysteresis required before a correction fires
    pub consec_n: u32,

    /// Loop gain applied to the error
    pub alpha: f64,

    /// Maximum correction rate (seconds of offset per second of wall time)
    pub max_rate_per_sec: f64,

    /// Errors above this magnitude are discarded as outliers
    pub outlier_e_sec: f64,

    /// Tick period
    pub interval_ms: u64,
}

impl Default for PllConfig {
    fn default() -> Self {
        Self {
            hys_sec: 2.5,
            consec_n: 5,
            alpha: 0.02,
            max_rate_per_sec: 0.5 / 60.0,
            outlier_e_sec: 4000.0,
            interval_ms: 1000,
        }
    }
}

impl PllConfig {
    /// Largest correction allowed on a single tick
    pub fn max_step_sec(&self) -> f64 {
        self.max_rate_per_sec * (self.interval_ms as f64 / 1000.0)
    }
}

/// Skew fallback tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkewConfig {
    /// Lower bound of the observed seekable-ahead-of-buffered anomaly band
    pub lead_band_min_sec: f64,

    /// Upper bound of the anomaly band
    pub lead_band_max_sec: f64,

    /// Lead samples required before a fallback is adopted
    pub ring_len: usize,

    /// Lifetime of an adopted fallback
    pub fallback_ttl_ms: i64,
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self {
            lead_band_min_sec: 3000.0,
            lead_band_max_sec: 4200.0,
            ring_len: 5,
            fallback_ttl_ms: 180_000,
        }
    }
}

impl EngineConfig {
    /// Validate all tuning values
    ///
    /// # Errors
    /// Returns `Error::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        non_negative("latency_sec", self.latency_sec)?;
        non_negative("edge_slack_sec", self.edge_slack_sec)?;
        non_negative("near_live_slack_sec", self.near_live_slack_sec)?;
        non_negative("edge_backoff_sec", self.edge_backoff_sec)?;
        non_negative("seekable_anomaly_sec", self.seekable_anomaly_sec)?;
        non_zero("probe_interval_ms", self.probe_interval_ms)?;

        non_negative("pll.hys_sec", self.pll.hys_sec)?;
        if self.pll.consec_n < 1 {
            return Err(Error::Config("pll.consec_n must be at least 1".to_string()));
        }
        if !(self.pll.alpha > 0.0 && self.pll.alpha <= 1.0) {
            return Err(Error::Config(format!(
                "pll.alpha must be in (0, 1], got {}",
                self.pll.alpha
            )));
        }
        if !(self.pll.max_rate_per_sec.is_finite() && self.pll.max_rate_per_sec > 0.0) {
            return Err(Error::Config(format!(
                "pll.max_rate_per_sec must be positive, got {}",
                self.pll.max_rate_per_sec
            )));
        }
        non_negative("pll.outlier_e_sec", self.pll.outlier_e_sec)?;
        if self.pll.outlier_e_sec <= self.pll.hys_sec {
            return Err(Error::Config(
                "pll.outlier_e_sec must exceed pll.hys_sec".to_string(),
            ));
        }
        non_zero("pll.interval_ms", self.pll.interval_ms)?;

        non_negative("skew.lead_band_min_sec", self.skew.lead_band_min_sec)?;
        non_negative("skew.lead_band_max_sec", self.skew.lead_band_max_sec)?;
        if self.skew.lead_band_min_sec > self.skew.lead_band_max_sec {
            return Err(Error::Config("skew lead band is empty".to_string()));
        }
        if self.skew.ring_len < 1 {
            return Err(Error::Config("skew.ring_len must be at least 1".to_string()));
        }
        if self.skew.fallback_ttl_ms <= 0 {
            return Err(Error::Config(
                "skew.fallback_ttl_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn non_negative(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} must be a finite non-negative number, got {}",
            field, value
        )))
    }
}

fn non_zero(field: &str, value: u64) -> Result<()> {
    if value == 0 {
        Err(Error::Config(format!("{} must be non-zero", field)))
    } else {
        Ok(())
    }
}

/// Default configuration file path for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("edgeclock").join("config.toml"))
}

/// Resolve which configuration file to read, if any
///
/// Returns `None` when neither an explicit path, the environment variable,
/// nor the platform default file is available.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|p| p.exists())
}

/// Parse configuration from TOML text and validate it
pub fn parse_config(text: &str) -> Result<TomlConfig> {
    let config: TomlConfig = toml::from_str(text)?;
    config.engine.validate()?;
    Ok(config)
}

/// Load configuration following the priority order
///
/// # Errors
/// Fails only when a file exists but cannot be read, parsed or validated.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = resolve_config_path(cli_arg) else {
        info!("No config file found, using compiled defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let text = std::fs::read_to_string(&path)?;
    let config = parse_config(&text)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
