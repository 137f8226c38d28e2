use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use crate::events::{Event, EventBus};
use crate::identity::{IdentityCache, UnitId};
use crate::model::{Alert, AlertCode, AlertLevel, Measurement, MeasurementObserver, SensorDescriptor};
use crate::uplink::{IotUplinkSink, PersistenceSink};

type AlertKey = (String, AlertCode);

fn device_offline_key(unit_id: UnitId) -> AlertKey {
  (format!("device_{}", unit_id.value()), AlertCode::DeviceOffline)
}

/// Threshold evaluation with debounce, plus periodic device-liveness
/// evaluation. Both paths share one active-alerts cache and one
/// debounce clock, each behind the engine's own mutex (§5).
pub struct AlertEngine {
  persistence: Arc<dyn PersistenceSink>,
  uplink: Arc<dyn IotUplinkSink>,
  events: Arc<EventBus>,
  cache: Arc<IdentityCache>,
  debounce_window: Duration,
  device_timeout: Duration,
  thresholds: Mutex<HashMap<String, (Option<f64>, Option<f64>)>>,
  active_alerts: Mutex<HashMap<AlertKey, Alert>>,
  last_emitted: Mutex<HashMap<AlertKey, chrono::DateTime<Utc>>>,
  stop_flag: Arc<AtomicBool>,
  liveness_worker: Mutex<Option<JoinHandle<()>>>,
}

impl AlertEngine {
  pub fn new(
    persistence: Arc<dyn PersistenceSink>,
    uplink: Arc<dyn IotUplinkSink>,
    events: Arc<EventBus>,
    cache: Arc<IdentityCache>,
    debounce_window: Duration,
    device_timeout: Duration,
  ) -> Self {
    AlertEngine {
      persistence,
      uplink,
      events,
      cache,
      debounce_window,
      device_timeout,
      thresholds: Mutex::new(HashMap::new()),
      active_alerts: Mutex::new(HashMap::new()),
      last_emitted: Mutex::new(HashMap::new()),
      stop_flag: Arc::new(AtomicBool::new(false)),
      liveness_worker: Mutex::new(None),
    }
  }

  /// Registers (or clears) the alarm bounds for a sensor. Called once a
  /// sensor's configuration is known; a sensor with no registered
  /// thresholds never produces a threshold alert.
  pub fn register_sensor(&self, sensor: &SensorDescriptor) {
    self.thresholds.lock().unwrap().insert(sensor.sensor_id.clone(), (sensor.alarm_lo, sensor.alarm_hi));
  }

  /// Rebuilds the active-alerts cache from the persistence sink's
  /// unacknowledged alerts at startup. `DEVICE_OFFLINE` alerts recover
  /// their unit id from the stored message text, mirroring the
  /// original's own recovery strategy for the same gap in its schema.
  pub fn rebuild_from_store(&self) {
    let unacked = self.persistence.unacknowledged_alerts();
    let mut active = self.active_alerts.lock().unwrap();
    for alert in unacked {
      let key = match alert.code {
        AlertCode::DeviceOffline => match extract_unit_id(&alert.message) {
          Some(unit_id) => device_offline_key(unit_id),
          None => {
            warn!("alert rebuild: could not recover unit id from '{}'", alert.message);
            continue;
          }
        },
        _ => match &alert.sensor_id {
          Some(sensor_id) => (sensor_id.clone(), alert.code),
          None => continue,
        },
      };
      active.insert(key, alert);
    }
    info!("alert engine: rebuilt {} active alert(s) from store", active.len());
  }

  fn emit_if_not_debounced(&self, key: AlertKey, level: AlertLevel, sensor_id: Option<String>, device_id: Option<String>, message: String) {
    let now = Utc::now();
    let mut last_emitted = self.last_emitted.lock().unwrap();
    if let Some(previous) = last_emitted.get(&key) {
      if now.signed_duration_since(*previous).to_std().unwrap_or(Duration::ZERO) < self.debounce_window {
        return;
      }
    }

    let alert = Alert { id: None, timestamp: now, sensor_id, rig_id: None, level, code: key.1, message, acknowledged: false };
    let id = self.persistence.insert_alert(&alert);
    let mut stored = alert;
    stored.id = Some(id);

    last_emitted.insert(key.clone(), now);
    self.active_alerts.lock().unwrap().insert(key, stored.clone());
    self.uplink.publish_alert(&stored, device_id.as_deref(), stored.sensor_id.as_deref());
    self.events.publish(Event::Alert(stored));
  }

  fn auto_acknowledge(&self, key: &AlertKey, device_id: Option<String>, reason: &str) {
    let mut active = self.active_alerts.lock().unwrap();
    if let Some(mut alert) = active.remove(key) {
      if let Some(id) = alert.id {
        self.persistence.acknowledge_alert(id);
        alert.acknowledged = true;
        self.uplink.publish_alert(&alert, device_id.as_deref(), alert.sensor_id.as_deref());
        self.events.publish(Event::AlertAcknowledged { alert_id: id, auto: true, reason: Some(reason.to_string()) });
      }
    }
  }

  /// Called once per `Measurement` by the polling scheduler.
  fn evaluate_threshold(&self, sensor: &SensorDescriptor, measurement: &Measurement) {
    let (lo, hi) = match self.thresholds.lock().unwrap().get(&sensor.sensor_id) {
      Some(bounds) => *bounds,
      None => return,
    };
    if lo.is_none() && hi.is_none() {
      return;
    }

    let lo_bound = lo.unwrap_or(f64::NEG_INFINITY);
    let hi_bound = hi.unwrap_or(f64::INFINITY);

    let device_id = format!("unit{}", sensor.unit_id.value());

    if (lo_bound..=hi_bound).contains(&measurement.value) {
      let reason = format!("back in range (value {:.3})", measurement.value);
      self.auto_acknowledge(&(sensor.sensor_id.clone(), AlertCode::ThresholdExceededLo), Some(device_id.clone()), &reason);
      self.auto_acknowledge(&(sensor.sensor_id.clone(), AlertCode::ThresholdExceededHi), Some(device_id), &reason);
      return;
    }

    let (code, message) = if measurement.value < lo_bound {
      (AlertCode::ThresholdExceededLo, format!("{} below low threshold {:.3} (value {:.3})", sensor.sensor_id, lo_bound, measurement.value))
    } else {
      (AlertCode::ThresholdExceededHi, format!("{} above high threshold {:.3} (value {:.3})", sensor.sensor_id, hi_bound, measurement.value))
    };

    self.emit_if_not_debounced((sensor.sensor_id.clone(), code), AlertLevel::Alarm, Some(sensor.sensor_id.clone()), Some(device_id), message);
  }

  /// Evaluates liveness for every currently enrolled unit. Intended to
  /// be called roughly every 10s by a dedicated worker thread.
  pub fn check_liveness(&self, unit_ids: &[UnitId]) {
    let now = Utc::now();
    for &unit_id in unit_ids {
      let Some((_, state)) = self.cache.get(unit_id) else { continue };
      let key = device_offline_key(unit_id);
      let device_id = format!("unit{}", unit_id.value());

      let elapsed = state.last_seen.map(|last_seen| now.signed_duration_since(last_seen)).and_then(|d| d.to_std().ok());

      match elapsed {
        Some(elapsed) if elapsed <= self.device_timeout => {
          self.auto_acknowledge(&key, Some(device_id), "device back online");
        }
        _ => {
          let message = format!("unit {} offline (no successful poll within timeout)", unit_id.value());
          self.emit_if_not_debounced(key, AlertLevel::Warn, None, Some(device_id), message);
        }
      }
    }
  }

  /// Auto-acknowledges and purges every active alert for a unit that is
  /// administratively removed from polling.
  pub fn remove_device(&self, unit_id: UnitId) {
    let device_id = format!("unit{}", unit_id.value());
    let keys: Vec<AlertKey> = self.active_alerts.lock().unwrap().keys().filter(|(id, _)| id == &format!("device_{}", unit_id.value()) || id.starts_with(&format!("unit{}_", unit_id.value()))).cloned().collect();
    for key in keys {
      self.auto_acknowledge(&key, Some(device_id.clone()), "device removed");
    }
  }

  pub fn start_liveness_worker(self: &Arc<Self>, interval: Duration, unit_ids_source: Arc<Mutex<Vec<UnitId>>>) {
    let mut guard = self.liveness_worker.lock().unwrap();
    if guard.is_some() {
      warn!("liveness worker already running; start ignored");
      return;
    }
    self.stop_flag.store(false, Ordering::Release);

    let engine = Arc::clone(self);
    *guard = Some(std::thread::spawn(move || {
      while !engine.stop_flag.load(Ordering::Acquire) {
        let units = unit_ids_source.lock().unwrap().clone();
        engine.check_liveness(&units);
        std::thread::sleep(interval);
      }
    }));
  }

  pub fn stop(&self) {
    self.stop_flag.store(true, Ordering::Release);
    if let Some(handle) = self.liveness_worker.lock().unwrap().take() {
      let _ = handle.join();
    }
  }
}

impl MeasurementObserver for AlertEngine {
  fn observe_measurement(&self, sensor: &SensorDescriptor, measurement: &Measurement) {
    self.evaluate_threshold(sensor, measurement);
  }
}

/// Recovers a unit id from a `DEVICE_OFFLINE` alert message of the shape
/// produced by [`AlertEngine::check_liveness`] ("unit N offline ...").
fn extract_unit_id(message: &str) -> Option<UnitId> {
  let rest = message.strip_prefix("unit ")?;
  let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
  UnitId::new(digits.parse().ok()?).ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicI64;

  struct MockPersistence {
    next_id: AtomicI64,
    acknowledged: Mutex<Vec<i64>>,
  }

  impl MockPersistence {
    fn new() -> Self {
      MockPersistence { next_id: AtomicI64::new(1), acknowledged: Mutex::new(Vec::new()) }
    }
  }

  impl PersistenceSink for MockPersistence {
    fn upsert_device(&self, _identity: &crate::identity::DeviceIdentity, _rig_id: Option<&str>, _enabled: bool) {}
    fn upsert_sensor(&self, _sensor: &SensorDescriptor) {}
    fn insert_measurement(&self, _measurement: &Measurement) -> i64 {
      0
    }
    fn mark_sent_upstream(&self, _ids: &[i64]) {}
    fn insert_alert(&self, _alert: &Alert) -> i64 {
      self.next_id.fetch_add(1, Ordering::Relaxed)
    }
    fn acknowledge_alert(&self, alert_id: i64) {
      self.acknowledged.lock().unwrap().push(alert_id);
    }
    fn unacknowledged_alerts(&self) -> Vec<Alert> {
      Vec::new()
    }
    fn update_device_last_seen(&self, _unit_id: UnitId) {}
  }

  #[derive(Default)]
  struct MockUplink {
    published: Mutex<Vec<Alert>>,
  }

  impl crate::uplink::IotUplinkSink for MockUplink {
    fn publish_measurement(
      &self,
      _device_id: &str,
      _sensor_id: &str,
      _sensor_type: &str,
      _value: f64,
      _unit: &str,
      _timestamp: chrono::DateTime<Utc>,
      _quality: crate::model::Quality,
      _extra: Option<serde_json::Value>,
    ) {
    }
    fn publish_alert(&self, alert: &Alert, _device_id: Option<&str>, _sensor_id: Option<&str>) {
      self.published.lock().unwrap().push(alert.clone());
    }
    fn publish_device_attributes(&self, _device_name: &str, _attributes: serde_json::Value, _force: bool) {}
    fn publish_active_sensors_list(&self, _devices_info: serde_json::Value) {}
  }

  fn engine() -> (Arc<AlertEngine>, Arc<MockPersistence>) {
    let (engine, persistence, _uplink) = engine_with_uplink();
    (engine, persistence)
  }

  fn engine_with_uplink() -> (Arc<AlertEngine>, Arc<MockPersistence>, Arc<MockUplink>) {
    let (engine, persistence, uplink, _events) = engine_with_events();
    (engine, persistence, uplink)
  }

  fn engine_with_events() -> (Arc<AlertEngine>, Arc<MockPersistence>, Arc<MockUplink>, Arc<EventBus>) {
    let persistence = Arc::new(MockPersistence::new());
    let uplink = Arc::new(MockUplink::default());
    let events = Arc::new(EventBus::new(64));
    let cache = Arc::new(IdentityCache::new(Duration::from_millis(300), Duration::from_secs(5), Duration::from_secs(60)));
    let engine = Arc::new(AlertEngine::new(persistence.clone(), uplink.clone(), events.clone(), cache, Duration::from_secs(60), Duration::from_secs(30)));
    (engine, persistence, uplink, events)
  }

  fn sensor_with_bounds(lo: Option<f64>, hi: Option<f64>) -> SensorDescriptor {
    let mut sensor = SensorDescriptor::new(UnitId::new(2).unwrap(), "load", "kg");
    sensor.alarm_lo = lo;
    sensor.alarm_hi = hi;
    sensor
  }

  fn measurement(value: f64, sensor_id: &str) -> Measurement {
    Measurement { timestamp: Utc::now(), sensor_id: sensor_id.to_string(), channel: "load".into(), value, physical_unit: "kg".into(), quality: crate::model::Quality::Ok, sent_upstream: false }
  }

  #[test]
  fn in_range_measurement_produces_no_alert() {
    let (engine, _persistence) = engine();
    let sensor = sensor_with_bounds(Some(0.0), Some(100.0));
    engine.register_sensor(&sensor);
    engine.observe_measurement(&sensor, &measurement(50.0, &sensor.sensor_id));
    assert!(engine.active_alerts.lock().unwrap().is_empty());
  }

  #[test]
  fn above_high_threshold_emits_alarm_once_within_debounce() {
    let (engine, persistence) = engine();
    let sensor = sensor_with_bounds(Some(0.0), Some(100.0));
    engine.register_sensor(&sensor);
    engine.observe_measurement(&sensor, &measurement(150.0, &sensor.sensor_id));
    engine.observe_measurement(&sensor, &measurement(160.0, &sensor.sensor_id));
    assert_eq!(engine.active_alerts.lock().unwrap().len(), 1);
    assert!(persistence.acknowledged.lock().unwrap().is_empty());
  }

  #[test]
  fn returning_to_range_auto_acknowledges() {
    let (engine, persistence) = engine();
    let sensor = sensor_with_bounds(Some(0.0), Some(100.0));
    engine.register_sensor(&sensor);
    engine.observe_measurement(&sensor, &measurement(150.0, &sensor.sensor_id));
    engine.observe_measurement(&sensor, &measurement(50.0, &sensor.sensor_id));
    assert!(engine.active_alerts.lock().unwrap().is_empty());
    assert_eq!(persistence.acknowledged.lock().unwrap().len(), 1);
  }

  #[test]
  fn auto_ack_reason_mentions_the_value_that_came_back_in_range() {
    // Scenario S4: UNIT_2_TILT_X, alarm_hi=5.0 -> 6.2 alarms, 4.9 auto-acks
    // with a reason mentioning the recovering value.
    let (engine, _persistence, _uplink, events) = engine_with_events();
    let sub = events.subscribe();
    let sensor = sensor_with_bounds(None, Some(5.0));
    engine.register_sensor(&sensor);

    engine.observe_measurement(&sensor, &measurement(6.2, &sensor.sensor_id));
    assert!(matches!(sub.try_recv(), Some(Event::Alert(_))));

    engine.observe_measurement(&sensor, &measurement(4.9, &sensor.sensor_id));
    let event = sub.try_recv().expect("auto-ack event");
    match event {
      Event::AlertAcknowledged { auto, reason, .. } => {
        assert!(auto);
        let reason = reason.expect("reason present");
        assert!(reason.contains("4.9"), "reason '{reason}' does not mention the recovering value");
      }
      other => panic!("expected AlertAcknowledged, got {other:?}"),
    }
  }

  #[test]
  fn sensor_without_bounds_never_alerts() {
    let (engine, _persistence) = engine();
    let sensor = sensor_with_bounds(None, None);
    engine.register_sensor(&sensor);
    engine.observe_measurement(&sensor, &measurement(1.0e9, &sensor.sensor_id));
    assert!(engine.active_alerts.lock().unwrap().is_empty());
  }

  #[test]
  fn threshold_violation_is_relayed_to_the_uplink_sink() {
    let (engine, _persistence, uplink) = engine_with_uplink();
    let sensor = sensor_with_bounds(Some(0.0), Some(100.0));
    engine.register_sensor(&sensor);
    engine.observe_measurement(&sensor, &measurement(150.0, &sensor.sensor_id));
    let published = uplink.published.lock().unwrap();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].code, AlertCode::ThresholdExceededHi);
  }

  #[test]
  fn device_gone_quiet_raises_offline_then_recovers_on_next_liveness_tick() {
    // Scenario S6: unit 5 enrolled, stops responding, last_seen ages
    // past device_timeout_sec -> one DEVICE_OFFLINE WARN alert; a
    // subsequent successful poll before the next liveness tick clears it.
    let (engine, _persistence, uplink) = engine_with_uplink();
    let unit_id = UnitId::new(5).unwrap();
    engine.cache.upsert_identity(unit_id, crate::identity::DeviceIdentity::new(unit_id, 0x4C6F, 0x0000));

    // Simulate last_seen far enough in the past to exceed device_timeout (30s).
    engine.cache.backdate_last_seen(unit_id, Utc::now() - chrono::Duration::seconds(31));

    engine.check_liveness(&[unit_id]);
    {
      let published = uplink.published.lock().unwrap();
      assert_eq!(published.len(), 1);
      assert_eq!(published[0].code, AlertCode::DeviceOffline);
      assert_eq!(published[0].level, AlertLevel::Warn);
      assert!(!published[0].acknowledged);
    }
    assert_eq!(engine.active_alerts.lock().unwrap().len(), 1);

    // Device comes back: a successful poll stamps last_seen to now.
    engine.cache.note_success(unit_id);
    engine.check_liveness(&[unit_id]);

    let published = uplink.published.lock().unwrap();
    assert_eq!(published.len(), 2);
    assert!(published[1].acknowledged);
    assert!(engine.active_alerts.lock().unwrap().is_empty());
  }

  #[test]
  fn auto_acknowledgement_is_relayed_to_the_uplink_sink() {
    let (engine, _persistence, uplink) = engine_with_uplink();
    let sensor = sensor_with_bounds(Some(0.0), Some(100.0));
    engine.register_sensor(&sensor);
    engine.observe_measurement(&sensor, &measurement(150.0, &sensor.sensor_id));
    engine.observe_measurement(&sensor, &measurement(50.0, &sensor.sensor_id));
    let published = uplink.published.lock().unwrap();
    assert_eq!(published.len(), 2);
    assert!(published[1].acknowledged);
  }
}
