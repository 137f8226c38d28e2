use crate::identity::{DeviceIdentity, UnitId};
use crate::model::{Alert, Measurement, SensorDescriptor};

/// Local durable storage. The core makes no assumption about the
/// backing store beyond durability of inserts and at-least-once
/// retrieval semantics for `unacknowledged_alerts`. A concrete
/// `rusqlite`-backed implementation ships behind the `sqlite` feature.
pub trait PersistenceSink: Send + Sync {
  fn upsert_device(&self, identity: &DeviceIdentity, rig_id: Option<&str>, enabled: bool);
  fn upsert_sensor(&self, sensor: &SensorDescriptor);
  /// Returns the store-assigned id of the inserted row.
  fn insert_measurement(&self, measurement: &Measurement) -> i64;
  fn mark_sent_upstream(&self, ids: &[i64]);
  /// Returns the store-assigned id of the inserted row.
  fn insert_alert(&self, alert: &Alert) -> i64;
  fn acknowledge_alert(&self, alert_id: i64);
  fn unacknowledged_alerts(&self) -> Vec<Alert>;
  fn update_device_last_seen(&self, unit_id: UnitId);
}

/// Northbound publication to the IoT platform. Implementations are
/// expected to buffer internally and never block the caller; a
/// `rumqttc`-backed implementation ships behind the `mqtt` feature.
pub trait IotUplinkSink: Send + Sync {
  #[allow(clippy::too_many_arguments)]
  fn publish_measurement(
    &self,
    device_id: &str,
    sensor_id: &str,
    sensor_type: &str,
    value: f64,
    unit: &str,
    timestamp: chrono::DateTime<chrono::Utc>,
    quality: crate::model::Quality,
    extra: Option<serde_json::Value>,
  );

  fn publish_alert(&self, alert: &Alert, device_id: Option<&str>, sensor_id: Option<&str>);

  fn publish_device_attributes(&self, device_name: &str, attributes: serde_json::Value, force: bool);

  fn publish_active_sensors_list(&self, devices_info: serde_json::Value);

  /// Optional inbound command handling; sinks with no remote-command
  /// surface return `Err` for every method.
  fn on_remote_command(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, String> {
    let _ = params;
    Err(format!("no remote command handler for '{method}'"))
  }
}
