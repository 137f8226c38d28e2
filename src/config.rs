//! Configuration loading: a TOML file (default `edge.toml`), with every
//! field overridable by an environment variable of the same name
//! upper-cased. A `.env` file is read first via `dotenvy` so local
//! development does not need a real environment export.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

fn default_baud() -> u32 {
  115_200
}
fn default_timeout_sec() -> f64 {
  0.3
}
fn default_discovery_timeout_sec() -> f64 {
  0.08
}
fn default_inter_frame_delay_ms() -> u64 {
  15
}
fn default_poll_interval_sec() -> f64 {
  2.0
}
fn default_per_device_refresh_sec() -> f64 {
  1.0
}
fn default_max_poll_devices() -> usize {
  20
}
fn default_offline_backoff_sec() -> f64 {
  5.0
}
fn default_offline_backoff_max_sec() -> f64 {
  60.0
}
fn default_unit_id_scan_min() -> u8 {
  1
}
fn default_unit_id_scan_max() -> u8 {
  10
}
fn default_device_timeout_sec() -> f64 {
  30.0
}
fn default_debounce_window_sec() -> f64 {
  60.0
}

/// Every enumerated option from the external-interfaces configuration
/// table (§6.5), loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub serial_port: String,
  #[serde(default = "default_baud")]
  pub baud: u32,
  #[serde(default = "default_timeout_sec")]
  pub timeout_sec: f64,
  #[serde(default = "default_discovery_timeout_sec")]
  pub discovery_timeout_sec: f64,
  #[serde(default = "default_inter_frame_delay_ms")]
  pub inter_frame_delay_ms: u64,
  #[serde(default = "default_poll_interval_sec")]
  pub poll_interval_sec: f64,
  #[serde(default = "default_per_device_refresh_sec")]
  pub per_device_refresh_sec: f64,
  #[serde(default = "default_max_poll_devices")]
  pub max_poll_devices: usize,
  #[serde(default = "default_offline_backoff_sec")]
  pub offline_backoff_sec: f64,
  #[serde(default = "default_offline_backoff_max_sec")]
  pub offline_backoff_max_sec: f64,
  #[serde(default = "default_unit_id_scan_min")]
  pub unit_id_scan_min: u8,
  #[serde(default = "default_unit_id_scan_max")]
  pub unit_id_scan_max: u8,
  #[serde(default = "default_device_timeout_sec")]
  pub device_timeout_sec: f64,
  #[serde(default = "default_debounce_window_sec")]
  pub debounce_window_sec: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file {path}: {source}")]
  Read { path: String, #[source] source: std::io::Error },
  #[error("failed to parse config file {path}: {source}")]
  Parse { path: String, #[source] source: toml::de::Error },
  #[error("failed to parse environment override {var}={value}: {source}")]
  EnvOverride { var: String, value: String, source: std::num::ParseFloatError },
  #[error("invalid configuration: {0}")]
  Invalid(String),
}

impl Config {
  /// Loads `.env` (if present), reads `path` as TOML, then applies any
  /// environment variable overrides whose name is the field name
  /// upper-cased (`MODBUS_PORT` is not a field name — the override key
  /// for `serial_port` is `SERIAL_PORT`, matching the original's
  /// `os.getenv("SERIAL_PORT", ...)` convention field-for-field).
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let _ = dotenvy::dotenv();
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: path.display().to_string(), source })?;
    let mut config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })?;
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
  }

  fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var("SERIAL_PORT") {
      self.serial_port = value;
    }
    if let Some(value) = env_f64("TIMEOUT_SEC")? {
      self.timeout_sec = value;
    }
    if let Some(value) = env_f64("DISCOVERY_TIMEOUT_SEC")? {
      self.discovery_timeout_sec = value;
    }
    if let Some(value) = env_f64("PER_DEVICE_REFRESH_SEC")? {
      self.per_device_refresh_sec = value;
    }
    if let Some(value) = env_f64("DEVICE_TIMEOUT_SEC")? {
      self.device_timeout_sec = value;
    }
    if let Some(value) = env_f64("DEBOUNCE_WINDOW_SEC")? {
      self.debounce_window_sec = value;
    }
    if let Ok(value) = std::env::var("BAUD") {
      if let Ok(parsed) = value.parse() {
        self.baud = parsed;
      }
    }
    Ok(())
  }

  /// Missing serial port or an inverted/out-of-range scan window is a
  /// hard error; a non-standard baud rate is only a warning, per §6.5.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.serial_port.trim().is_empty() {
      return Err(ConfigError::Invalid("serial_port is required".into()));
    }
    if self.unit_id_scan_min < 1 || self.unit_id_scan_max > 247 || self.unit_id_scan_min > self.unit_id_scan_max {
      return Err(ConfigError::Invalid(format!(
        "unit_id_scan range [{}, {}] invalid, must satisfy 1 <= min <= max <= 247",
        self.unit_id_scan_min, self.unit_id_scan_max
      )));
    }
    if !matches!(self.baud, 9600 | 19200 | 38400 | 57600 | 115_200) {
      log::warn!("non-standard baud rate {}; proceeding anyway", self.baud);
    }
    Ok(())
  }
}

fn env_f64(name: &str) -> Result<Option<f64>, ConfigError> {
  match std::env::var(name) {
    Ok(value) => value.parse().map(Some).map_err(|source| ConfigError::EnvOverride { var: name.to_string(), value, source }),
    Err(_) => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn validate_rejects_empty_serial_port() {
    let config = Config {
      serial_port: String::new(),
      baud: 115_200,
      timeout_sec: 0.3,
      discovery_timeout_sec: 0.08,
      inter_frame_delay_ms: 15,
      poll_interval_sec: 2.0,
      per_device_refresh_sec: 1.0,
      max_poll_devices: 20,
      offline_backoff_sec: 5.0,
      offline_backoff_max_sec: 60.0,
      unit_id_scan_min: 1,
      unit_id_scan_max: 10,
      device_timeout_sec: 30.0,
      debounce_window_sec: 60.0,
    };
    assert!(config.validate().is_err());
  }

  #[test]
  fn validate_rejects_inverted_scan_range() {
    let mut config = base_config();
    config.unit_id_scan_min = 10;
    config.unit_id_scan_max = 1;
    assert!(config.validate().is_err());
  }

  #[test]
  fn validate_accepts_defaults() {
    assert!(base_config().validate().is_ok());
  }

  fn base_config() -> Config {
    Config {
      serial_port: "/dev/ttyUSB0".into(),
      baud: 115_200,
      timeout_sec: 0.3,
      discovery_timeout_sec: 0.08,
      inter_frame_delay_ms: 15,
      poll_interval_sec: 2.0,
      per_device_refresh_sec: 1.0,
      max_poll_devices: 20,
      offline_backoff_sec: 5.0,
      offline_backoff_max_sec: 60.0,
      unit_id_scan_min: 1,
      unit_id_scan_max: 10,
      device_timeout_sec: 30.0,
      debounce_window_sec: 60.0,
    }
  }

  #[test]
  fn load_reads_toml_and_rejects_a_missing_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("edge.toml");
    std::fs::write(&path, "serial_port = \"/dev/ttyUSB3\"\nbaud = 9600\n")?;

    let config = Config::load(&path)?;
    assert_eq!(config.serial_port, "/dev/ttyUSB3");
    assert_eq!(config.baud, 9600);
    assert_eq!(config.timeout_sec, default_timeout_sec());

    assert!(matches!(Config::load(dir.path().join("missing.toml")), Err(ConfigError::Read { .. })));
    Ok(())
  }
}
