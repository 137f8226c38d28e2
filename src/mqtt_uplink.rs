//! Reference [`IotUplinkSink`] implementation over MQTT, grounded in the
//! original edge agent's topic scheme
//! (`edge/{device_id}/{sensor_type}/measurements`, `edge/{device_id}/alerts`)
//! and JSON payload shapes. Uses `rumqttc`'s blocking client to match
//! this crate's thread-per-worker concurrency model rather than async.
//!
//! Degrades to a local bounded buffer (drop oldest) when the broker is
//! unreachable — publication never blocks the polling tick, mirroring
//! the original's "disabled if misconfigured, never blocks polling"
//! posture.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rumqttc::{Client, MqttOptions, QoS};
use serde_json::{json, Value};

use crate::model::{Alert, Quality};
use crate::uplink::IotUplinkSink;

const BUFFER_CAPACITY: usize = 512;

fn quality_str(quality: Quality) -> &'static str {
  match quality {
    Quality::Ok => "OK",
    Quality::Warn => "WARN",
    Quality::Alarm => "ALARM",
    Quality::ErrorComms => "ERROR_COMMS",
  }
}

struct BufferedMessage {
  topic: String,
  payload: Value,
}

pub struct MqttUplink {
  client: Mutex<Client>,
  buffer: Mutex<VecDeque<BufferedMessage>>,
}

impl MqttUplink {
  pub fn connect(broker_host: &str, broker_port: u16, client_id: &str) -> Self {
    let mut options = MqttOptions::new(client_id, broker_host, broker_port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, mut connection) = Client::new(options, 16);
    std::thread::spawn(move || {
      for notification in connection.iter() {
        if let Err(e) = notification {
          debug!("mqtt connection event loop error: {e}");
        }
      }
    });

    MqttUplink { client: Mutex::new(client), buffer: Mutex::new(VecDeque::new()) }
  }

  fn publish_or_buffer(&self, topic: String, payload: Value) {
    let result = {
      let client = self.client.lock().unwrap();
      client.publish(&topic, QoS::AtLeastOnce, false, payload.to_string().into_bytes())
    };
    if let Err(e) = result {
      warn!("mqtt publish to {topic} failed, buffering locally: {e}");
      let mut buffer = self.buffer.lock().unwrap();
      if buffer.len() >= BUFFER_CAPACITY {
        buffer.pop_front();
      }
      buffer.push_back(BufferedMessage { topic, payload });
    }
  }

  /// Retries every buffered message once; callers may call this
  /// periodically (e.g. from the liveness tick) to drain the backlog
  /// once the broker becomes reachable again.
  pub fn drain_buffer(&self) {
    let pending: Vec<BufferedMessage> = self.buffer.lock().unwrap().drain(..).collect();
    for message in pending {
      self.publish_or_buffer(message.topic, message.payload);
    }
  }
}

fn alert_timestamp(timestamp: DateTime<Utc>) -> String {
  timestamp.to_rfc3339()
}

impl IotUplinkSink for MqttUplink {
  fn publish_measurement(
    &self,
    device_id: &str,
    sensor_id: &str,
    sensor_type: &str,
    value: f64,
    unit: &str,
    timestamp: DateTime<Utc>,
    quality: Quality,
    extra: Option<Value>,
  ) {
    let topic = format!("edge/{device_id}/{sensor_type}/measurements");
    let mut payload = json!({
      "sensor_id": sensor_id,
      "value": value,
      "unit": unit,
      "timestamp": timestamp.to_rfc3339(),
      "quality": quality_str(quality),
    });
    if let Some(extra) = extra {
      if let (Value::Object(base), Value::Object(extra)) = (&mut payload, extra) {
        base.extend(extra);
      }
    }
    self.publish_or_buffer(topic, payload);
  }

  fn publish_alert(&self, alert: &Alert, device_id: Option<&str>, sensor_id: Option<&str>) {
    let device_id = device_id.unwrap_or("unknown");
    let topic = format!("edge/{device_id}/alerts");
    let payload = json!({
      "alert_id": alert.id,
      "level": format!("{:?}", alert.level).to_uppercase(),
      "code": alert.code.as_str(),
      "message": alert.message,
      "device_id": device_id,
      "sensor_id": sensor_id,
      "timestamp": alert_timestamp(alert.timestamp),
      "acknowledged": alert.acknowledged,
    });
    self.publish_or_buffer(topic, payload);
  }

  fn publish_device_attributes(&self, device_name: &str, attributes: Value, force: bool) {
    let topic = format!("edge/{device_name}/attributes");
    let payload = json!({ "attributes": attributes, "force": force });
    self.publish_or_buffer(topic, payload);
  }

  fn publish_active_sensors_list(&self, devices_info: Value) {
    self.publish_or_buffer("edge/active_sensors".to_string(), devices_info);
  }
}
