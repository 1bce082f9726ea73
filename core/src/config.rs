use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Main configuration structure for the AIOps engine.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub analyzer: AnalyzerConfig,

    #[serde(default)]
    pub rca: RcaConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the file is missing.
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(
                    "Failed to load config from {:?}: {}. Using defaults.",
                    path.as_ref(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Get the default configuration as a TOML string.
    pub fn default_toml() -> Result<String> {
        let config = Self::default();
        toml::to_string_pretty(&config).context("Failed to serialize default config")
    }

    /// Validate the configuration for obvious misconfiguration.
    pub fn validate(&self) -> Result<()> {
        match self.storage.backend.as_str() {
            "memory" => {}
            other => anyhow::bail!("Invalid storage backend: {}", other),
        }

        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }

        if self.server.rate_limit_enabled && self.server.rate_limit_rpm == 0 {
            anyhow::bail!("rate_limit_rpm must be greater than 0 when rate limiting is enabled");
        }

        if self.analyzer.latency_multiplier <= 0.0 {
            anyhow::bail!("analyzer.latency_multiplier must be positive");
        }

        if !(0.0..=1.0).contains(&self.analyzer.error_rate_threshold) {
            anyhow::bail!("analyzer.error_rate_threshold must be between 0 and 1");
        }

        if self.engine.tick_interval_ms == 0 {
            anyhow::bail!("engine.tick_interval_ms must be greater than 0");
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("Invalid log level: {}", other),
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("Failed to parse config")?;
        Ok(config)
    }
}

/// Runtime server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub verbose: bool,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub rate_limit_enabled: bool,

    #[serde(default = "default_rate_limit_rpm")]
    pub rate_limit_rpm: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            verbose: false,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            rate_limit_enabled: false,
            rate_limit_rpm: default_rate_limit_rpm(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
        }
    }
}

/// Scheduler tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
        }
    }
}

/// Anomaly analyzer thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_latency_multiplier")]
    pub latency_multiplier: f64,

    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_threshold: f64,

    #[serde(default = "default_min_samples_for_baseline")]
    pub min_samples_for_baseline: usize,

    #[serde(default = "default_analysis_window_minutes")]
    pub analysis_window_minutes: i64,

    #[serde(default = "default_baseline_window_minutes")]
    pub baseline_window_minutes: i64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            latency_multiplier: default_latency_multiplier(),
            error_rate_threshold: default_error_rate_threshold(),
            min_samples_for_baseline: default_min_samples_for_baseline(),
            analysis_window_minutes: default_analysis_window_minutes(),
            baseline_window_minutes: default_baseline_window_minutes(),
        }
    }
}

/// RCA engine tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RcaConfig {
    #[serde(default = "default_correlation_window_minutes")]
    pub correlation_window_minutes: i64,

    #[serde(default = "default_incident_ttl_minutes")]
    pub incident_ttl_minutes: i64,
}

impl Default for RcaConfig {
    fn default() -> Self {
        Self {
            correlation_window_minutes: default_correlation_window_minutes(),
            incident_ttl_minutes: default_incident_ttl_minutes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub include_modules: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            include_modules: false,
        }
    }
}

// Default providers ---------------------------------------------------------

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_rate_limit_rpm() -> u32 {
    1000
}

fn default_storage_backend() -> String {
    "memory".to_string()
}

fn default_tick_interval() -> u64 {
    30_000
}

fn default_latency_multiplier() -> f64 {
    3.0
}

fn default_error_rate_threshold() -> f64 {
    0.2
}

fn default_min_samples_for_baseline() -> usize {
    10
}

fn default_analysis_window_minutes() -> i64 {
    5
}

fn default_baseline_window_minutes() -> i64 {
    60
}

fn default_correlation_window_minutes() -> i64 {
    5
}

fn default_incident_ttl_minutes() -> i64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

// Tests ---------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, "memory");
        assert_eq!(config.analyzer.latency_multiplier, 3.0);
        assert_eq!(config.rca.incident_ttl_minutes, 30);
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_storage_backend() {
        let mut config = Config::default();
        config.storage.backend = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bad_error_rate_threshold() {
        let mut config = Config::default();
        config.analyzer.error_rate_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_tick_interval() {
        let mut config = Config::default();
        config.engine.tick_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 3000

            [analyzer]
            latency_multiplier = 5.0

            [logging]
            level = "debug"
        "#;

        let config = Config::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.analyzer.latency_multiplier, 5.0);
        assert_eq!(config.logging.level, "debug");
    }
}
