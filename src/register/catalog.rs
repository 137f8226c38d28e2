//! Pure derivation of a device's logical sensor channels from its
//! capability set, per the design-notes redesign of the original's
//! ad-hoc, scattered sensor registration ("a `SensorCatalog` derived
//! purely from `DeviceIdentity.capabilities` via a pure function").
//!
//! The channel list mirrors exactly what [`super::frame`]'s read
//! strategies decode for the same capability combination — a sensor
//! with no matching channel here never gets a descriptor, and the
//! polling scheduler never emits a channel with no descriptor here.

use enumflags2::BitFlags;

use crate::identity::{Capability, DeviceIdentity, UnitId};
use crate::model::SensorDescriptor;

/// Physical unit string for a channel name, shared by the polling
/// scheduler (labelling dispatched measurements) and the catalog
/// (labelling registered sensors).
pub fn physical_unit_for(channel: &str) -> &'static str {
  match channel {
    "tilt_x" | "tilt_y" | "wind_direction" => "deg",
    "temperature" => "degC",
    "acceleration_x" | "acceleration_y" | "acceleration_z" => "g",
    "accel_x_min" | "accel_x_max" | "accel_x_avg" | "accel_y_min" | "accel_y_max" | "accel_y_avg" | "accel_z_min" | "accel_z_max" | "accel_z_avg" => "mg",
    "gyro_x" | "gyro_y" | "gyro_z" => "deg/s",
    "wind_speed" | "wind_speed_min" | "wind_speed_max" | "wind_speed_avg" => "m/s",
    "load" => "kg",
    "sample_count" | "quality_flags" => "count",
    _ => "",
  }
}

const MPU_CHANNELS: &[&str] =
  &["tilt_x", "tilt_y", "temperature", "acceleration_x", "acceleration_y", "acceleration_z", "gyro_x", "gyro_y", "gyro_z", "sample_count", "quality_flags"];

const WIND_CHANNELS: &[&str] = &["wind_speed", "wind_direction", "wind_speed_min", "wind_speed_max", "wind_speed_avg"];

const ACCEL_STAT_CHANNELS: &[&str] =
  &["accel_x_min", "accel_x_max", "accel_x_avg", "accel_y_min", "accel_y_max", "accel_y_avg", "accel_z_min", "accel_z_max", "accel_z_avg"];

/// Returns the channel names a device with `caps` produces, in the same
/// shape the polling scheduler's read strategies (§4.6) decode.
fn channels_for(caps: BitFlags<Capability>) -> Vec<&'static str> {
  let has_mpu = caps.contains(Capability::Mpu6050);
  let has_wind = caps.contains(Capability::Wind);
  let has_load = caps.contains(Capability::Load);

  let mut channels = Vec::new();
  match (has_mpu, has_wind, has_load) {
    (true, true, _) => {
      channels.extend_from_slice(MPU_CHANNELS);
      channels.push("load");
      channels.extend_from_slice(WIND_CHANNELS);
      channels.extend_from_slice(ACCEL_STAT_CHANNELS);
    }
    (true, false, with_load) => {
      channels.extend_from_slice(MPU_CHANNELS);
      if with_load {
        channels.push("load");
      }
    }
    (false, true, _) => {
      channels.push("sample_count");
      channels.extend_from_slice(WIND_CHANNELS);
    }
    (false, false, true) => {
      channels.push("sample_count");
      channels.push("load");
    }
    (false, false, false) => {}
  }
  channels
}

/// Derives the full set of [`SensorDescriptor`]s for `identity`, with no
/// alarm bounds set — thresholds are assigned separately (an
/// administrative concern this crate does not specify a config surface
/// for; see the open question in `DESIGN.md`).
pub fn derive_sensors(identity: &DeviceIdentity) -> Vec<SensorDescriptor> {
  channels_for(identity.capabilities)
    .into_iter()
    .map(|channel| SensorDescriptor::new(identity.unit_id, channel, physical_unit_for(channel)))
    .collect()
}

/// Convenience overload for callers that only have the unit id and
/// capability set at hand (e.g. a `DiagnosticEvent`, which carries its
/// own partial identity).
pub fn derive_sensors_for(unit_id: UnitId, caps: BitFlags<Capability>) -> Vec<SensorDescriptor> {
  channels_for(caps).into_iter().map(|channel| SensorDescriptor::new(unit_id, channel, physical_unit_for(channel))).collect()
}
