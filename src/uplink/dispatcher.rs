use std::sync::Arc;

use log::warn;
use serde_json::json;

use crate::model::{Measurement, MeasurementObserver, SensorDescriptor};

use super::sinks::{IotUplinkSink, PersistenceSink};

/// Fans a single measurement out to the persistence sink and the IoT
/// uplink sink. Runs synchronously inside the polling tick's success
/// path (§4.9); neither sink is expected to block for long — the
/// persistence sink is local and fast, the uplink sink buffers
/// internally.
pub struct UplinkDispatcher {
  persistence: Arc<dyn PersistenceSink>,
  uplink: Arc<dyn IotUplinkSink>,
}

impl UplinkDispatcher {
  pub fn new(persistence: Arc<dyn PersistenceSink>, uplink: Arc<dyn IotUplinkSink>) -> Self {
    UplinkDispatcher { persistence, uplink }
  }
}

impl MeasurementObserver for UplinkDispatcher {
  fn observe_measurement(&self, sensor: &SensorDescriptor, measurement: &Measurement) {
    self.persistence.upsert_sensor(sensor);
    let id = self.persistence.insert_measurement(measurement);
    self.persistence.update_device_last_seen(sensor.unit_id);

    self.uplink.publish_measurement(
      &format!("unit{}", sensor.unit_id.value()),
      &sensor.sensor_id,
      &sensor.channel,
      measurement.value,
      &measurement.physical_unit,
      measurement.timestamp,
      measurement.quality,
      Some(json!({ "store_id": id })),
    );
    if id < 0 {
      warn!("uplink: persistence sink returned a negative row id for {}", sensor.sensor_id);
    } else {
      self.persistence.mark_sent_upstream(&[id]);
    }
  }
}
