use chrono::{DateTime, Utc};

use crate::bus::ModbusStats;
use crate::identity::{DeviceIdentity, UnitId};
use crate::model::{Alert, TelemetryFrame};

/// Everything the internal event bus carries. Subscribers match on this
/// to observe discovery progress, telemetry, diagnostics, and alerts
/// without coupling to the components that produce them.
#[derive(Debug, Clone)]
pub enum Event {
  DiscoveryProgress { current: usize, total: usize, unit_id: UnitId },
  /// Emitted the moment a probed unit responds, ahead of
  /// `DiscoveryComplete` — distinct from the progress tick so observers
  /// can react to a hit without diffing two `DiscoveryProgress` events.
  DeviceFound { unit_id: UnitId, identity: DeviceIdentity },
  DiscoveryComplete { devices: Vec<UnitId> },
  Telemetry(TelemetryFrame),
  Diagnostic(DiagnosticEvent),
  Alert(Alert),
  AlertAcknowledged { alert_id: i64, auto: bool, reason: Option<String> },
}

/// Best-effort observability snapshot taken roughly once per device per
/// ~10s of polling (§4.11). A failed read of any of its three
/// constituent reads suppresses the whole event for that tick rather
/// than publishing a partial one.
#[derive(Debug, Clone)]
pub struct DiagnosticEvent {
  pub unit_id: UnitId,
  pub identity: DeviceIdentity,
  pub modbus_stats: ModbusStats,
  pub quality_flags: u16,
  pub observed_at: DateTime<Utc>,
}
