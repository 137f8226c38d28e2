use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, warn};

use crate::bus::BusArbiter;
use crate::events::{DiagnosticEvent, Event, EventBus};
use crate::frame::ErrorKind;
use crate::identity::{Capability, IdentityCache, UnitId};
use crate::model::{Measurement, MeasurementObserver, Quality, SensorDescriptor, TelemetryFrame};
use crate::register::frame as register_frame;

use super::config::PollingConfig;

const MPU_BLOCK_ADDR: u16 = 0x0000;
const NON_MPU_WINDOW_ADDR: u16 = 0x0009;
const QUALITY_FLAGS_ADDR: u16 = 0x000B;
const MODBUS_DIAGNOSTICS_ADDR: u16 = 0x0020;
const IDENTITY_BLOCK_ADDR: u16 = 0x0000;
const IDENTITY_BLOCK_LEN: u16 = 10;

/// The four read-window shapes §4.6 selects by capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadStrategy {
  LoadOnly,
  WindOnly,
  MpuOnly { with_load: bool },
  MpuAndWind,
  /// No telemetry-bearing capability; the tick is a no-op liveness probe.
  None,
}

fn choose_strategy(caps: enumflags2::BitFlags<Capability>) -> ReadStrategy {
  let has_mpu = caps.contains(Capability::Mpu6050);
  let has_wind = caps.contains(Capability::Wind);
  let has_load = caps.contains(Capability::Load);

  match (has_mpu, has_wind, has_load) {
    (true, true, _) => ReadStrategy::MpuAndWind,
    (true, false, with_load) => ReadStrategy::MpuOnly { with_load },
    (false, true, _) => ReadStrategy::WindOnly,
    (false, false, true) => ReadStrategy::LoadOnly,
    (false, false, false) => ReadStrategy::None,
  }
}

/// Round-robin poller. Runs a dedicated worker thread once [`start`] is
/// called; [`stop`] signals it and joins with a bounded wait.
///
/// [`start`]: PollingScheduler::start
/// [`stop`]: PollingScheduler::stop
pub struct PollingScheduler {
  arbiter: Arc<BusArbiter>,
  cache: Arc<IdentityCache>,
  events: Arc<EventBus>,
  observers: Vec<Arc<dyn MeasurementObserver>>,
  config: PollingConfig,
  unit_ids: Mutex<Vec<UnitId>>,
  cursor: AtomicUsize,
  stop_flag: Arc<AtomicBool>,
  worker: Mutex<Option<JoinHandle<()>>>,
  tick_counts: Mutex<HashMap<UnitId, u32>>,
}

impl PollingScheduler {
  pub fn new(
    arbiter: Arc<BusArbiter>,
    cache: Arc<IdentityCache>,
    events: Arc<EventBus>,
    observers: Vec<Arc<dyn MeasurementObserver>>,
    config: PollingConfig,
  ) -> Self {
    PollingScheduler {
      arbiter,
      cache,
      events,
      observers,
      config,
      unit_ids: Mutex::new(Vec::new()),
      cursor: AtomicUsize::new(0),
      stop_flag: Arc::new(AtomicBool::new(false)),
      worker: Mutex::new(None),
      tick_counts: Mutex::new(HashMap::new()),
    }
  }

  /// Records the enrolled unit list and spawns the tick-loop worker.
  /// Re-entrant start (calling while already running) is a no-op that
  /// logs a warning, per §4.6.
  pub fn start(self: &Arc<Self>, unit_ids: Vec<UnitId>) {
    let mut guard = self.worker.lock().unwrap();
    if guard.is_some() {
      warn!("polling scheduler already running; start() ignored");
      return;
    }

    let capped: Vec<UnitId> = unit_ids.into_iter().take(self.config.max_poll_devices).collect();
    *self.unit_ids.lock().unwrap() = capped;
    self.cursor.store(0, Ordering::Relaxed);
    self.stop_flag.store(false, Ordering::Release);

    let scheduler = Arc::clone(self);
    *guard = Some(std::thread::spawn(move || scheduler.run()));
  }

  pub fn stop(&self) {
    self.stop_flag.store(true, Ordering::Release);
    let handle = self.worker.lock().unwrap().take();
    if let Some(handle) = handle {
      let _ = handle.join();
    }
  }

  fn run(&self) {
    while !self.stop_flag.load(Ordering::Acquire) {
      let tick_started = Instant::now();
      let unit_count = self.unit_ids.lock().unwrap().len();
      let tick_target = self.tick_target(unit_count);

      if let Some(unit_id) = self.next_unit() {
        if !self.arbiter.is_suspended() {
          self.poll_one(unit_id);
        }
      }

      let elapsed = tick_started.elapsed();
      if elapsed < tick_target {
        std::thread::sleep(tick_target - elapsed);
      }
    }
  }

  fn tick_target(&self, unit_count: usize) -> Duration {
    let share = self.config.per_device_refresh.div_f64(unit_count.max(1) as f64);
    share.max(self.config.min_tick)
  }

  fn next_unit(&self) -> Option<UnitId> {
    let unit_ids = self.unit_ids.lock().unwrap();
    if unit_ids.is_empty() {
      return None;
    }
    let index = self.cursor.fetch_add(1, Ordering::Relaxed) % unit_ids.len();
    let unit_id = unit_ids[index];

    if let Some((_, state)) = self.cache.get(unit_id) {
      if let Some(next_allowed) = state.next_allowed_poll {
        if Instant::now() < next_allowed {
          return None;
        }
      }
    }
    Some(unit_id)
  }

  fn poll_one(&self, unit_id: UnitId) {
    let identity = match self.cache.get(unit_id) {
      Some((identity, _)) => identity,
      None => {
        warn!("polling: unit {unit_id} has no cached identity, skipping tick");
        return;
      }
    };

    let timeout_override = self.cache.get(unit_id).and_then(|(_, state)| {
      (state.adaptive_timeout > self.config.baseline_timeout).then_some(state.adaptive_timeout)
    });

    match self.read_telemetry(unit_id, &identity.capabilities, timeout_override) {
      Ok(channels) => {
        self.cache.note_success(unit_id);
        self.dispatch_telemetry(unit_id, identity.alias.clone(), channels);
        self.maybe_emit_diagnostic(unit_id);
      }
      Err(err) => {
        debug!("polling: unit {unit_id} failed: {err}");
        self.cache.note_failure(unit_id);
      }
    }
  }

  fn read_telemetry(
    &self,
    unit_id: UnitId,
    caps: &enumflags2::BitFlags<Capability>,
    timeout_override: Option<Duration>,
  ) -> Result<Vec<(&'static str, f64)>, ErrorKind> {
    let txn = self.arbiter.exclusive_transaction(timeout_override);
    match choose_strategy(*caps) {
      ReadStrategy::LoadOnly => {
        let regs = txn.read_input_registers(unit_id, NON_MPU_WINDOW_ADDR, 4)?;
        Ok(register_frame::decode_load_only(&regs))
      }
      ReadStrategy::WindOnly => {
        let regs = txn.read_input_registers(unit_id, NON_MPU_WINDOW_ADDR, 9)?;
        Ok(register_frame::decode_wind_only(&regs))
      }
      ReadStrategy::MpuOnly { with_load } => {
        let count = if with_load { 13 } else { 12 };
        let regs = txn.read_input_registers(unit_id, MPU_BLOCK_ADDR, count)?;
        Ok(register_frame::decode_mpu_block(&regs, with_load))
      }
      ReadStrategy::MpuAndWind => {
        let regs = txn.read_input_registers(unit_id, MPU_BLOCK_ADDR, 27)?;
        Ok(register_frame::decode_mpu_and_wind(&regs))
      }
      ReadStrategy::None => Ok(Vec::new()),
    }
  }

  fn dispatch_telemetry(&self, unit_id: UnitId, alias: String, channels: Vec<(&'static str, f64)>) {
    let now = Utc::now();
    let mut telemetry = TelemetryFrame::new(unit_id, Some(alias).filter(|a| !a.is_empty()), now);
    for (channel, value) in &channels {
      telemetry.insert(*channel, *value);
    }

    for (channel, value) in channels {
      let sensor = SensorDescriptor::new(unit_id, channel, crate::register::physical_unit_for(channel));
      let measurement = Measurement {
        timestamp: now,
        sensor_id: sensor.sensor_id.clone(),
        channel: channel.to_string(),
        value,
        physical_unit: sensor.physical_unit.clone(),
        quality: Quality::Ok,
        sent_upstream: false,
      };
      for observer in &self.observers {
        observer.observe_measurement(&sensor, &measurement);
      }
    }

    self.events.publish(Event::Telemetry(telemetry));
  }

  /// Fetches and publishes a `DiagnosticEvent` roughly every
  /// `diagnostic_cadence_ticks * N` ticks per device, per §4.11. Any of
  /// the three reads failing suppresses the event for this tick without
  /// affecting polling lifecycle.
  fn maybe_emit_diagnostic(&self, unit_id: UnitId) {
    let due = {
      let mut counts = self.tick_counts.lock().unwrap();
      let entry = counts.entry(unit_id).or_insert(0);
      *entry += 1;
      if *entry >= self.config.diagnostic_cadence_ticks {
        *entry = 0;
        true
      } else {
        false
      }
    };
    if !due {
      return;
    }

    match self.read_diagnostic(unit_id) {
      Ok(event) => self.events.publish(Event::Diagnostic(event)),
      Err(err) => warn!("diagnostics: unit {unit_id} read failed, suppressing this tick: {err}"),
    }
  }

  fn read_diagnostic(&self, unit_id: UnitId) -> Result<DiagnosticEvent, ErrorKind> {
    let txn = self.arbiter.exclusive_transaction(None);
    let identity_block = txn.read_holding_registers(unit_id, IDENTITY_BLOCK_ADDR, IDENTITY_BLOCK_LEN)?;
    let _modbus_diag = txn.read_holding_registers(unit_id, MODBUS_DIAGNOSTICS_ADDR, 6)?;
    let quality = txn.read_input_registers(unit_id, QUALITY_FLAGS_ADDR, 1)?;
    drop(txn);

    let mut identity = crate::identity::DeviceIdentity::new(unit_id, identity_block[0], identity_block[1]);
    identity.hw_version = crate::register::decode::version(identity_block[2]);
    identity.fw_version = crate::register::decode::version(identity_block[3]);
    identity.capabilities = enumflags2::BitFlags::from_bits_truncate(identity_block[5]);
    identity.uptime_seconds = crate::register::decode::sample_count(identity_block[6], identity_block[7]);
    identity.status = enumflags2::BitFlags::from_bits_truncate(identity_block[8]);
    identity.errors = enumflags2::BitFlags::from_bits_truncate(identity_block[9]);

    Ok(DiagnosticEvent {
      unit_id,
      identity,
      modbus_stats: self.arbiter.stats(),
      quality_flags: quality[0],
      observed_at: Utc::now(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn strategy_prefers_mpu_and_wind_when_both_present() {
    let caps = Capability::Mpu6050 | Capability::Wind;
    assert_eq!(choose_strategy(caps), ReadStrategy::MpuAndWind);
  }

  #[test]
  fn strategy_is_load_only_when_only_load_present() {
    let caps = enumflags2::BitFlags::from(Capability::Load);
    assert_eq!(choose_strategy(caps), ReadStrategy::LoadOnly);
  }

  #[test]
  fn strategy_mpu_only_tracks_load_bit() {
    let caps = Capability::Mpu6050 | Capability::Load;
    assert_eq!(choose_strategy(caps), ReadStrategy::MpuOnly { with_load: true });
  }

  #[test]
  fn tick_target_respects_floor() {
    let config = PollingConfig { per_device_refresh: Duration::from_millis(100), min_tick: Duration::from_millis(200), ..Default::default() };
    let scheduler_target = config.per_device_refresh.div_f64(5.0).max(config.min_tick);
    assert_eq!(scheduler_target, Duration::from_millis(200));
  }
}
