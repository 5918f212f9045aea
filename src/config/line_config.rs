//! Line Configuration - speed factor, stage timing and transport as TOML values
//!
//! Every struct implements `Default` with the values from [`super::defaults`],
//! so a missing file (or a missing section) behaves exactly like the
//! built-in line.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "ASSEMBLY_LINE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "assembly_line.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one assembly line process.
///
/// Load with `LineConfig::load()` which searches:
/// 1. `$ASSEMBLY_LINE_CONFIG` env var
/// 2. `./assembly_line.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineConfig {
    /// N means the line runs N times faster than the real one
    #[serde(default = "default_speed_up_factor")]
    pub speed_up_factor: f64,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Message bus endpoint and exchange names
    #[serde(default)]
    pub transport: TransportConfig,

    /// Per-stage wait table
    #[serde(default)]
    pub stages: StageTimingConfig,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            speed_up_factor: defaults::SPEED_UP_FACTOR,
            log_json: false,
            transport: TransportConfig::default(),
            stages: StageTimingConfig::default(),
        }
    }
}

impl LineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$ASSEMBLY_LINE_CONFIG` environment variable
    /// 2. `./assembly_line.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded line config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded line config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate the whole config, collecting every problem.
    ///
    /// Rules:
    /// - Speed-up factor must be positive and finite
    /// - Stage base and jitter must be finite and non-negative
    /// - Jitter must not exceed base (a wait can never go negative)
    /// - Host must be `HOST:PORT`, exchange names non-empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if !self.speed_up_factor.is_finite() || self.speed_up_factor <= 0.0 {
            errors.push(format!(
                "speed_up_factor must be a positive finite number, got {}",
                self.speed_up_factor
            ));
        }

        for (name, timing) in self.stages.named() {
            Self::check_stage(name, timing, &mut errors);
        }

        let t = &self.transport;
        if parse_host_port(&t.host).is_none() {
            errors.push(format!(
                "transport.host must be HOST:PORT, got '{}'",
                t.host
            ));
        }
        if t.order_exchange.trim().is_empty() {
            errors.push("transport.order_exchange must not be empty".to_string());
        }
        if t.report_exchange.trim().is_empty() {
            errors.push("transport.report_exchange must not be empty".to_string());
        }
        if t.connect_timeout_secs == 0 {
            errors.push("transport.connect_timeout_secs must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_stage(name: &str, timing: &StageTiming, errors: &mut Vec<String>) {
        if !timing.base_ms.is_finite() || !timing.jitter_ms.is_finite() {
            errors.push(format!(
                "stages.{name}: values must be finite (got base_ms={}, jitter_ms={})",
                timing.base_ms, timing.jitter_ms
            ));
            return;
        }
        if timing.base_ms < 0.0 || timing.jitter_ms < 0.0 {
            errors.push(format!("stages.{name}: base_ms and jitter_ms must be >= 0"));
        }
        if timing.jitter_ms > timing.base_ms {
            errors.push(format!(
                "stages.{name}: jitter_ms ({:.1}) must not exceed base_ms ({:.1})",
                timing.jitter_ms, timing.base_ms
            ));
        }
    }
}

/// Split `HOST:PORT` into its parts.
pub fn parse_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() {
        return None;
    }
    port.parse().ok().map(|p| (host, p))
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Broker endpoint (HOST:PORT)
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_order_exchange")]
    pub order_exchange: String,

    #[serde(default = "default_report_exchange")]
    pub report_exchange: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Reconnect budget; 0 disables reconnecting
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            order_exchange: default_order_exchange(),
            report_exchange: default_report_exchange(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

fn default_speed_up_factor() -> f64 {
    defaults::SPEED_UP_FACTOR
}
fn default_host() -> String {
    defaults::BROKER_HOST.to_string()
}
fn default_order_exchange() -> String {
    defaults::ORDER_EXCHANGE.to_string()
}
fn default_report_exchange() -> String {
    defaults::REPORT_EXCHANGE.to_string()
}
fn default_connect_timeout_secs() -> u64 {
    defaults::CONNECT_TIMEOUT_SECS
}
fn default_max_reconnect_attempts() -> u32 {
    defaults::MAX_RECONNECT_ATTEMPTS
}

// ============================================================================
// Stage Timing
// ============================================================================

/// Base wait and jitter range of one stage, in real-world milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub base_ms: f64,
    pub jitter_ms: f64,
}

impl StageTiming {
    pub const fn new(base_ms: f64, jitter_ms: f64) -> Self {
        Self { base_ms, jitter_ms }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTimingConfig {
    #[serde(default = "default_first_barrier")]
    pub first_barrier: StageTiming,

    #[serde(default = "default_second_barrier")]
    pub second_barrier: StageTiming,

    #[serde(default = "default_third_barrier")]
    pub third_barrier: StageTiming,

    #[serde(default = "default_fourth_barrier")]
    pub fourth_barrier: StageTiming,
}

impl StageTimingConfig {
    /// Timings in line order, paired with their config key.
    pub fn named(&self) -> [(&'static str, &StageTiming); 4] {
        [
            ("first_barrier", &self.first_barrier),
            ("second_barrier", &self.second_barrier),
            ("third_barrier", &self.third_barrier),
            ("fourth_barrier", &self.fourth_barrier),
        ]
    }
}

impl Default for StageTimingConfig {
    fn default() -> Self {
        Self {
            first_barrier: default_first_barrier(),
            second_barrier: default_second_barrier(),
            third_barrier: default_third_barrier(),
            fourth_barrier: default_fourth_barrier(),
        }
    }
}

fn default_first_barrier() -> StageTiming {
    StageTiming::new(defaults::FIRST_BARRIER_BASE_MS, defaults::FIRST_BARRIER_JITTER_MS)
}
fn default_second_barrier() -> StageTiming {
    StageTiming::new(defaults::SECOND_BARRIER_BASE_MS, defaults::SECOND_BARRIER_JITTER_MS)
}
fn default_third_barrier() -> StageTiming {
    StageTiming::new(defaults::THIRD_BARRIER_BASE_MS, defaults::THIRD_BARRIER_JITTER_MS)
}
fn default_fourth_barrier() -> StageTiming {
    StageTiming::new(defaults::FOURTH_BARRIER_BASE_MS, defaults::FOURTH_BARRIER_JITTER_MS)
}
