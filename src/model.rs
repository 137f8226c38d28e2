//! Shared data model: the typed shapes that flow from the register
//! normalizer through the event bus to the uplink dispatcher and the
//! alert engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::UnitId;

/// One decoded telemetry sample for a single unit at a single instant.
/// `channels` holds only the fields the device's capability set makes
/// meaningful — e.g. a load-only unit never has a `tilt_x` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
  pub unit_id: UnitId,
  pub alias: Option<String>,
  pub timestamp: DateTime<Utc>,
  pub channels: BTreeMap<String, f64>,
}

impl TelemetryFrame {
  pub fn new(unit_id: UnitId, alias: Option<String>, timestamp: DateTime<Utc>) -> Self {
    TelemetryFrame { unit_id, alias, timestamp, channels: BTreeMap::new() }
  }

  pub fn insert(&mut self, channel: impl Into<String>, value: f64) {
    self.channels.insert(channel.into(), value);
  }
}

/// A logical channel derived from (UnitId, capability, field): the unit
/// that persistence and uplink code address by a stable string, not by
/// raw register address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
  pub sensor_id: String,
  pub unit_id: UnitId,
  pub channel: String,
  pub physical_unit: String,
  pub alarm_lo: Option<f64>,
  pub alarm_hi: Option<f64>,
  pub enabled: bool,
}

impl SensorDescriptor {
  pub fn new(unit_id: UnitId, channel: impl Into<String>, physical_unit: impl Into<String>) -> Self {
    let channel = channel.into();
    let sensor_id = format!("unit{}_{}", unit_id.value(), channel);
    SensorDescriptor {
      sensor_id,
      unit_id,
      channel,
      physical_unit: physical_unit.into(),
      alarm_lo: None,
      alarm_hi: None,
      enabled: true,
    }
  }
}

/// Quality tag attached to every stored/published measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quality {
  Ok,
  Warn,
  Alarm,
  ErrorComms,
}

/// One row per channel per sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
  pub timestamp: DateTime<Utc>,
  pub sensor_id: String,
  pub channel: String,
  pub value: f64,
  pub physical_unit: String,
  pub quality: Quality,
  pub sent_upstream: bool,
}

/// Severity of an [`Alert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertLevel {
  Info,
  Warn,
  Alarm,
  Critical,
}

/// A well-known alert condition code. This crate emits only the three
/// codes the alert engine knows how to raise; the type stays an enum
/// (rather than a free string) so persistence/uplink can match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertCode {
  ThresholdExceededHi,
  ThresholdExceededLo,
  DeviceOffline,
}

impl AlertCode {
  pub fn as_str(self) -> &'static str {
    match self {
      AlertCode::ThresholdExceededHi => "THRESHOLD_EXCEEDED_HI",
      AlertCode::ThresholdExceededLo => "THRESHOLD_EXCEEDED_LO",
      AlertCode::DeviceOffline => "DEVICE_OFFLINE",
    }
  }
}

/// Anything that wants to see every measurement as it is produced by a
/// successful poll — the alert engine and the uplink dispatcher both
/// implement this so the polling scheduler can fan out a single
/// `Measurement` without depending on either concretely.
pub trait MeasurementObserver: Send + Sync {
  fn observe_measurement(&self, sensor: &SensorDescriptor, measurement: &Measurement);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
  pub id: Option<i64>,
  pub timestamp: DateTime<Utc>,
  pub sensor_id: Option<String>,
  pub rig_id: Option<String>,
  pub level: AlertLevel,
  pub code: AlertCode,
  pub message: String,
  pub acknowledged: bool,
}
