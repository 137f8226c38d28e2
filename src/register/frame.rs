//! Assembles the raw register windows the polling scheduler reads (§4.6)
//! into named channel values, using the field-level decoders in
//! [`super::decode`]. One function per read strategy.

use super::decode;

pub type Channels = Vec<(&'static str, f64)>;

/// Load-only strategy: 4 input registers at 0x0009
/// (sample-count lo/hi, quality_flags, load).
pub fn decode_load_only(regs: &[u16]) -> Channels {
  assert!(regs.len() >= 4, "load-only window requires 4 registers");
  let samples = decode::sample_count(regs[0], regs[1]);
  vec![("sample_count", samples as f64), ("load", decode::load_kg(regs[3]))]
}

/// Wind-only (no MPU) strategy: 9 input registers at 0x0009
/// (sample-count + 2 wind-now + 3 wind-stats + 1 reserved).
pub fn decode_wind_only(regs: &[u16]) -> Channels {
  assert!(regs.len() >= 9, "wind-only window requires 9 registers");
  let samples = decode::sample_count(regs[0], regs[1]);
  vec![
    ("sample_count", samples as f64),
    ("wind_speed", decode::wind_speed_ms(regs[4])),
    ("wind_direction", decode::wind_direction_degrees(regs[5]) as f64),
    ("wind_speed_min", decode::wind_speed_ms(regs[6])),
    ("wind_speed_max", decode::wind_speed_ms(regs[7])),
    ("wind_speed_avg", decode::wind_speed_ms(regs[8])),
  ]
}

/// MPU block only, read at 0x0000: tilt_x, tilt_y, temperature,
/// acceleration x/y/z, gyro x/y/z (9 registers), optionally followed by
/// load (1 more register) when the device also has the Load capability.
pub fn decode_mpu_block(regs: &[u16], with_load: bool) -> Channels {
  let needed = if with_load { 13 } else { 12 };
  assert!(regs.len() >= needed, "mpu window requires {needed} registers");

  let mut channels = vec![
    ("tilt_x", decode::tilt_degrees(regs[0])),
    ("tilt_y", decode::tilt_degrees(regs[1])),
    ("temperature", decode::temperature_celsius(regs[2])),
    ("acceleration_x", decode::acceleration_g(regs[3])),
    ("acceleration_y", decode::acceleration_g(regs[4])),
    ("acceleration_z", decode::acceleration_g(regs[5])),
    ("gyro_x", decode::gyro_dps(regs[6])),
    ("gyro_y", decode::gyro_dps(regs[7])),
    ("gyro_z", decode::gyro_dps(regs[8])),
    ("sample_count", decode::sample_count(regs[9], regs[10]) as f64),
    ("quality_flags", regs[11] as f64),
  ];
  if with_load {
    channels.push(("load", decode::load_kg(regs[12])));
  }
  channels
}

/// MPU-and-wind strategy: the full 27-register window at 0x0000 (MPU +
/// load + wind + wind-stats + accel-stats).
pub fn decode_mpu_and_wind(regs: &[u16]) -> Channels {
  assert!(regs.len() >= 27, "full window requires 27 registers");
  let mut channels = decode_mpu_block(&regs[0..13], true);
  channels.extend([
    ("wind_speed", decode::wind_speed_ms(regs[13])),
    ("wind_direction", decode::wind_direction_degrees(regs[14]) as f64),
    ("wind_speed_min", decode::wind_speed_ms(regs[15])),
    ("wind_speed_max", decode::wind_speed_ms(regs[16])),
    ("wind_speed_avg", decode::wind_speed_ms(regs[17])),
    ("accel_x_min", decode::acceleration_milli_g(regs[18])),
    ("accel_x_max", decode::acceleration_milli_g(regs[19])),
    ("accel_x_avg", decode::acceleration_milli_g(regs[20])),
    ("accel_y_min", decode::acceleration_milli_g(regs[21])),
    ("accel_y_max", decode::acceleration_milli_g(regs[22])),
    ("accel_y_avg", decode::acceleration_milli_g(regs[23])),
    ("accel_z_min", decode::acceleration_milli_g(regs[24])),
    ("accel_z_max", decode::acceleration_milli_g(regs[25])),
    ("accel_z_avg", decode::acceleration_milli_g(regs[26])),
  ]);
  channels
}
