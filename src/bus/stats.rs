use std::sync::atomic::{AtomicU64, Ordering};

/// Master-side transaction counters, local to this process. Distinct
/// from the slave-side diagnostics block at holding registers
/// 0x0020-0x0025, which the diagnostics reader fetches separately.
#[derive(Debug, Default)]
pub struct ModbusStatsCounters {
  rx_ok: AtomicU64,
  crc_errors: AtomicU64,
  exceptions: AtomicU64,
  tx_ok: AtomicU64,
  timeouts: AtomicU64,
}

/// A point-in-time snapshot of [`ModbusStatsCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModbusStats {
  pub rx_ok: u64,
  pub crc_errors: u64,
  pub exceptions: u64,
  pub tx_ok: u64,
  pub timeouts: u64,
}

impl ModbusStatsCounters {
  pub fn record_tx(&self) {
    self.tx_ok.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_rx_ok(&self) {
    self.rx_ok.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_crc_error(&self) {
    self.crc_errors.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_exception(&self) {
    self.exceptions.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_timeout(&self) {
    self.timeouts.fetch_add(1, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> ModbusStats {
    ModbusStats {
      rx_ok: self.rx_ok.load(Ordering::Relaxed),
      crc_errors: self.crc_errors.load(Ordering::Relaxed),
      exceptions: self.exceptions.load(Ordering::Relaxed),
      tx_ok: self.tx_ok.load(Ordering::Relaxed),
      timeouts: self.timeouts.load(Ordering::Relaxed),
    }
  }
}
