//! Reference [`PersistenceSink`] implementation backed by an embedded
//! SQLite database, grounded in the three-table schema
//! (`sensors`, `measurements`, `alerts`) the original edge agent used.
//! This is not the contract — [`PersistenceSink`] is — it exists so the
//! supervisor binary can run standalone without an external DB service.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use log::error;
use rusqlite::{params, Connection};

use crate::identity::{DeviceIdentity, UnitId};
use crate::model::{Alert, AlertCode, AlertLevel, Measurement, Quality, SensorDescriptor};
use crate::uplink::PersistenceSink;

pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  pub fn open(path: impl AsRef<Path>) -> rusqlite::Result<Self> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
      "
      CREATE TABLE IF NOT EXISTS devices (
        unit_id INTEGER PRIMARY KEY,
        rig_id TEXT,
        vendor_id INTEGER NOT NULL,
        product_id INTEGER NOT NULL,
        alias TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_seen TEXT
      );
      CREATE TABLE IF NOT EXISTS sensors (
        sensor_id TEXT PRIMARY KEY,
        unit_id INTEGER NOT NULL,
        channel TEXT NOT NULL,
        physical_unit TEXT NOT NULL,
        alarm_lo REAL,
        alarm_hi REAL,
        enabled INTEGER NOT NULL DEFAULT 1
      );
      CREATE TABLE IF NOT EXISTS measurements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        sensor_id TEXT NOT NULL,
        channel TEXT NOT NULL,
        value REAL NOT NULL,
        physical_unit TEXT NOT NULL,
        quality TEXT NOT NULL,
        sent_upstream INTEGER NOT NULL DEFAULT 0
      );
      CREATE TABLE IF NOT EXISTS alerts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT NOT NULL,
        sensor_id TEXT,
        rig_id TEXT,
        level TEXT NOT NULL,
        code TEXT NOT NULL,
        message TEXT NOT NULL,
        acknowledged INTEGER NOT NULL DEFAULT 0
      );
      ",
    )?;
    Ok(SqliteStore { conn: Mutex::new(conn) })
  }

  pub fn open_in_memory() -> rusqlite::Result<Self> {
    let conn = Connection::open_in_memory()?;
    let store = SqliteStore { conn: Mutex::new(conn) };
    store.conn.lock().unwrap().execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(store)
  }
}

fn quality_str(quality: Quality) -> &'static str {
  match quality {
    Quality::Ok => "OK",
    Quality::Warn => "WARN",
    Quality::Alarm => "ALARM",
    Quality::ErrorComms => "ERROR_COMMS",
  }
}

fn level_str(level: AlertLevel) -> &'static str {
  match level {
    AlertLevel::Info => "INFO",
    AlertLevel::Warn => "WARN",
    AlertLevel::Alarm => "ALARM",
    AlertLevel::Critical => "CRITICAL",
  }
}

fn parse_level(s: &str) -> AlertLevel {
  match s {
    "INFO" => AlertLevel::Info,
    "ALARM" => AlertLevel::Alarm,
    "CRITICAL" => AlertLevel::Critical,
    _ => AlertLevel::Warn,
  }
}

fn parse_code(s: &str) -> AlertCode {
  match s {
    "THRESHOLD_EXCEEDED_LO" => AlertCode::ThresholdExceededLo,
    "DEVICE_OFFLINE" => AlertCode::DeviceOffline,
    _ => AlertCode::ThresholdExceededHi,
  }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
  DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc.timestamp_opt(0, 0).unwrap())
}

impl PersistenceSink for SqliteStore {
  fn upsert_device(&self, identity: &DeviceIdentity, rig_id: Option<&str>, enabled: bool) {
    let conn = self.conn.lock().unwrap();
    let result = conn.execute(
      "INSERT INTO devices (unit_id, rig_id, vendor_id, product_id, alias, enabled) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
       ON CONFLICT(unit_id) DO UPDATE SET rig_id = excluded.rig_id, vendor_id = excluded.vendor_id,
         product_id = excluded.product_id, alias = excluded.alias, enabled = excluded.enabled",
      params![identity.unit_id.value(), rig_id, identity.vendor_id, identity.product_id, identity.alias, enabled],
    );
    if let Err(e) = result {
      error!("sqlite: upsert_device failed for unit {}: {e}", identity.unit_id);
    }
  }

  fn upsert_sensor(&self, sensor: &SensorDescriptor) {
    let conn = self.conn.lock().unwrap();
    let result = conn.execute(
      "INSERT INTO sensors (sensor_id, unit_id, channel, physical_unit, alarm_lo, alarm_hi, enabled) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
       ON CONFLICT(sensor_id) DO UPDATE SET alarm_lo = excluded.alarm_lo, alarm_hi = excluded.alarm_hi, enabled = excluded.enabled",
      params![sensor.sensor_id, sensor.unit_id.value(), sensor.channel, sensor.physical_unit, sensor.alarm_lo, sensor.alarm_hi, sensor.enabled],
    );
    if let Err(e) = result {
      error!("sqlite: upsert_sensor failed for {}: {e}", sensor.sensor_id);
    }
  }

  fn insert_measurement(&self, measurement: &Measurement) -> i64 {
    let conn = self.conn.lock().unwrap();
    let result = conn.execute(
      "INSERT INTO measurements (timestamp, sensor_id, channel, value, physical_unit, quality, sent_upstream) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![
        measurement.timestamp.to_rfc3339(),
        measurement.sensor_id,
        measurement.channel,
        measurement.value,
        measurement.physical_unit,
        quality_str(measurement.quality),
        measurement.sent_upstream,
      ],
    );
    match result {
      Ok(_) => conn.last_insert_rowid(),
      Err(e) => {
        error!("sqlite: insert_measurement failed for {}: {e}", measurement.sensor_id);
        -1
      }
    }
  }

  fn mark_sent_upstream(&self, ids: &[i64]) {
    let conn = self.conn.lock().unwrap();
    for id in ids {
      if let Err(e) = conn.execute("UPDATE measurements SET sent_upstream = 1 WHERE id = ?1", params![id]) {
        error!("sqlite: mark_sent_upstream failed for id {id}: {e}");
      }
    }
  }

  fn insert_alert(&self, alert: &Alert) -> i64 {
    let conn = self.conn.lock().unwrap();
    let result = conn.execute(
      "INSERT INTO alerts (timestamp, sensor_id, rig_id, level, code, message, acknowledged) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
      params![alert.timestamp.to_rfc3339(), alert.sensor_id, alert.rig_id, level_str(alert.level), alert.code.as_str(), alert.message, alert.acknowledged],
    );
    match result {
      Ok(_) => conn.last_insert_rowid(),
      Err(e) => {
        error!("sqlite: insert_alert failed: {e}");
        -1
      }
    }
  }

  fn acknowledge_alert(&self, alert_id: i64) {
    let conn = self.conn.lock().unwrap();
    if let Err(e) = conn.execute("UPDATE alerts SET acknowledged = 1 WHERE id = ?1", params![alert_id]) {
      error!("sqlite: acknowledge_alert failed for id {alert_id}: {e}");
    }
  }

  fn unacknowledged_alerts(&self) -> Vec<Alert> {
    let conn = self.conn.lock().unwrap();
    let mut stmt = match conn.prepare("SELECT id, timestamp, sensor_id, rig_id, level, code, message, acknowledged FROM alerts WHERE acknowledged = 0") {
      Ok(stmt) => stmt,
      Err(e) => {
        error!("sqlite: unacknowledged_alerts prepare failed: {e}");
        return Vec::new();
      }
    };
    let rows = stmt.query_map([], |row| {
      Ok(Alert {
        id: Some(row.get(0)?),
        timestamp: parse_timestamp(&row.get::<_, String>(1)?),
        sensor_id: row.get(2)?,
        rig_id: row.get(3)?,
        level: parse_level(&row.get::<_, String>(4)?),
        code: parse_code(&row.get::<_, String>(5)?),
        message: row.get(6)?,
        acknowledged: row.get(7)?,
      })
    });
    match rows {
      Ok(rows) => rows.filter_map(Result::ok).collect(),
      Err(e) => {
        error!("sqlite: unacknowledged_alerts query failed: {e}");
        Vec::new()
      }
    }
  }

  fn update_device_last_seen(&self, unit_id: UnitId) {
    let conn = self.conn.lock().unwrap();
    let now = Utc::now().to_rfc3339();
    if let Err(e) = conn.execute("UPDATE devices SET last_seen = ?1 WHERE unit_id = ?2", params![now, unit_id.value()]) {
      error!("sqlite: update_device_last_seen failed for unit {unit_id}: {e}");
    }
  }
}
