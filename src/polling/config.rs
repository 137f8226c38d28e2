use std::time::Duration;

/// Polling scheduler tuning, mirroring the options table in the external
/// configuration (§6.5).
#[derive(Debug, Clone)]
pub struct PollingConfig {
  pub per_device_refresh: Duration,
  pub min_tick: Duration,
  pub baseline_timeout: Duration,
  pub backoff_base: Duration,
  pub backoff_cap: Duration,
  pub max_poll_devices: usize,
  /// Diagnostics are fetched roughly every `diagnostic_cadence_ticks`
  /// ticks per device — ~10s worth of ticks per device, per §4.11.
  pub diagnostic_cadence_ticks: u32,
}

impl Default for PollingConfig {
  fn default() -> Self {
    PollingConfig {
      per_device_refresh: Duration::from_secs_f64(1.0),
      min_tick: Duration::from_secs_f64(0.2),
      baseline_timeout: Duration::from_secs_f64(0.3),
      backoff_base: Duration::from_secs_f64(5.0),
      backoff_cap: Duration::from_secs_f64(60.0),
      max_poll_devices: 20,
      diagnostic_cadence_ticks: 10,
    }
  }
}
