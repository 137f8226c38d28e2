use chrono::{DateTime, Utc};
use enumflags2::{bitflags, BitFlags};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::frame::ErrorKind;

/// Address of one slave on the bus, always in `[1, 247]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(u8);

impl UnitId {
  pub const MIN: u8 = 1;
  pub const MAX: u8 = 247;

  pub fn new(value: u8) -> Result<Self, ErrorKind> {
    if (Self::MIN..=Self::MAX).contains(&value) {
      Ok(UnitId(value))
    } else {
      Err(ErrorKind::InvalidArgument(format!("unit id {value} outside [{}, {}]", Self::MIN, Self::MAX)))
    }
  }

  pub fn value(self) -> u8 {
    self.0
  }
}

impl std::fmt::Display for UnitId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Capability bits decoded out of the 0x0005 holding register.
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
  Rs485 = 0b0000_0001,
  Mpu6050 = 0b0000_0010,
  Identify = 0b0000_0100,
  Wind = 0b0000_1000,
  Load = 0b0001_0000,
}

/// Status bits decoded out of the 0x0008 holding register.
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusFlag {
  Ok = 0b0000_0001,
  MpuReady = 0b0000_0010,
  CfgDirty = 0b0000_0100,
}

/// Error bits decoded out of the 0x0009 holding register.
#[bitflags]
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorFlag {
  MpuComm = 0b0000_0001,
  Eeprom = 0b0000_0010,
  Range = 0b0000_0100,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
  pub unit_id: UnitId,
  pub vendor_id: u16,
  pub product_id: u16,
  /// Derived, non-authoritative two-ASCII-char decode of `vendor_id`.
  pub vendor_str: Option<String>,
  /// Derived, non-authoritative two-ASCII-char decode of `product_id`.
  pub product_str: Option<String>,
  pub hw_version: (u8, u8),
  pub fw_version: (u8, u8),
  pub capabilities: BitFlags<Capability>,
  pub alias: String,
  pub uptime_seconds: u32,
  pub status: BitFlags<StatusFlag>,
  pub errors: BitFlags<ErrorFlag>,
  pub last_identify_text: Option<String>,
}

impl DeviceIdentity {
  pub fn new(unit_id: UnitId, vendor_id: u16, product_id: u16) -> Self {
    DeviceIdentity {
      unit_id,
      vendor_id,
      product_id,
      vendor_str: decode_ascii_code(vendor_id),
      product_str: decode_ascii_code(product_id),
      hw_version: (0, 0),
      fw_version: (0, 0),
      capabilities: BitFlags::empty(),
      alias: String::new(),
      uptime_seconds: 0,
      status: BitFlags::empty(),
      errors: BitFlags::empty(),
      last_identify_text: None,
    }
  }
}

/// Decodes a 16-bit register as two big-endian ASCII characters, if both
/// bytes are printable. Mirrors `decode_vendor_product` in the original.
pub fn decode_ascii_code(code: u16) -> Option<String> {
  let hi = (code >> 8) as u8;
  let lo = (code & 0xFF) as u8;
  if hi.is_ascii_graphic() && lo.is_ascii_graphic() {
    Some(format!("{}{}", hi as char, lo as char))
  } else {
    None
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
  Unknown,
  Online,
  Degraded,
  Offline,
}

/// Liveness and adaptive-scheduling state for one unit. `next_allowed_poll`
/// and `adaptive_timeout` drive the polling scheduler (§4.6); they are not
/// serialized with the rest of the cache since they are monotonic-clock
/// scoped to one process run.
#[derive(Debug, Clone)]
pub struct DeviceState {
  pub lifecycle: Lifecycle,
  pub last_seen: Option<DateTime<Utc>>,
  pub consecutive_error_count: u32,
  pub next_allowed_poll: Option<Instant>,
  pub adaptive_timeout: std::time::Duration,
}

impl DeviceState {
  pub fn new(baseline_timeout: std::time::Duration) -> Self {
    DeviceState {
      lifecycle: Lifecycle::Unknown,
      last_seen: None,
      consecutive_error_count: 0,
      next_allowed_poll: None,
      adaptive_timeout: baseline_timeout,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use test_case::test_case;

  #[test_case(1 => true; "minimum valid unit id")]
  #[test_case(247 => true; "maximum valid unit id")]
  #[test_case(0 => false; "zero is broadcast, not a unit id")]
  #[test_case(248 => false; "one past the maximum is rejected")]
  #[test_case(255 => false; "top of the u8 range is rejected")]
  fn unit_id_boundary_validation(raw: u8) -> bool {
    UnitId::new(raw).is_ok()
  }

  #[test]
  fn decode_ascii_code_requires_both_bytes_printable() {
    assert_eq!(decode_ascii_code(0x4C6F), Some("Lo".to_string()));
    assert_eq!(decode_ascii_code(0x0001), None);
  }
}
