use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};

use crate::frame::{self, ErrorKind, Request, Response, Transport};

use super::stats::{ModbusStats, ModbusStatsCounters};
use super::transaction::ExclusiveTransaction;

/// Serializes every Modbus transaction on the single serial channel.
///
/// This is the only component that touches the transport; discovery, the
/// poller, and the command surface all submit through
/// [`BusArbiter::exclusive_transaction`]. The hard invariant — zero or
/// one request on the wire at any instant — is enforced by holding
/// `transport` locked from frame-emit to frame-parse, even on error and
/// panic unwind paths (the lock is released by the guard's `Drop`).
pub struct BusArbiter {
  transport: Mutex<Box<dyn Transport>>,
  baseline_timeout: Duration,
  stats: ModbusStatsCounters,
  /// Set for the duration of an exclusive transaction so the poller can
  /// check it at a tick boundary and skip its own submission instead of
  /// contending for the lock.
  suspended: AtomicBool,
}

impl BusArbiter {
  pub fn new(transport: Box<dyn Transport>, baseline_timeout: Duration) -> Self {
    BusArbiter { transport: Mutex::new(transport), baseline_timeout, stats: ModbusStatsCounters::default(), suspended: AtomicBool::new(false) }
  }

  pub fn stats(&self) -> ModbusStats {
    self.stats.snapshot()
  }

  pub fn is_suspended(&self) -> bool {
    self.suspended.load(Ordering::Acquire)
  }

  /// Opens a scoped exclusive-transaction: pauses the poller for the
  /// scope's lifetime, optionally overrides the timeout, ensures the
  /// channel is open (reconnecting on demand), and restores prior state
  /// on every exit path via `Drop`.
  pub fn exclusive_transaction(&self, timeout_override: Option<Duration>) -> ExclusiveTransaction<'_> {
    self.suspended.store(true, Ordering::Release);
    ExclusiveTransaction::new(self, timeout_override.unwrap_or(self.baseline_timeout))
  }

  /// Sends `request` to `unit` and decodes the reply, retrying once at
  /// this layer on `Timeout` for read-only requests (writes never
  /// retry). One reconnect attempt is made on `ChannelClosed` before the
  /// error is surfaced.
  pub(crate) fn transact(&self, unit: u8, request: &Request, timeout: Duration) -> Result<Response, ErrorKind> {
    self.transact_with_retry(unit, request, timeout, true)
  }

  /// Like [`BusArbiter::transact`] but never retries on `Timeout`, even
  /// for an otherwise-retryable read. Used by the discovery engine's
  /// per-unit probe (§4.5 step 2: "without automatic retry") so a silent
  /// unit costs exactly one timeout, not two.
  pub(crate) fn transact_no_retry(&self, unit: u8, request: &Request, timeout: Duration) -> Result<Response, ErrorKind> {
    self.transact_with_retry(unit, request, timeout, false)
  }

  fn transact_with_retry(&self, unit: u8, request: &Request, timeout: Duration, allow_retry: bool) -> Result<Response, ErrorKind> {
    let retryable = allow_retry
      && matches!(
        request,
        Request::ReadHoldingRegisters { .. } | Request::ReadInputRegisters { .. } | Request::ReportSlaveId | Request::Identify
      );

    match self.transact_once(unit, request, timeout) {
      Ok(response) => Ok(response),
      Err(ErrorKind::Timeout) if retryable => {
        debug!("unit {unit}: retrying {:#04x} once after timeout", request.function_code());
        self.transact_once(unit, request, timeout)
      }
      Err(err) => Err(err),
    }
  }

  fn transact_once(&self, unit: u8, request: &Request, timeout: Duration) -> Result<Response, ErrorKind> {
    let frame = frame::encode_request(unit, request);
    let mut transport = self.transport.lock().unwrap();

    let raw = match transport.transact(&frame, timeout) {
      Ok(raw) => raw,
      Err(ErrorKind::ChannelClosed(reason)) => {
        warn!("channel closed ({reason}), attempting one reconnect");
        transport.reconnect()?;
        transport.transact(&frame, timeout)?
      }
      Err(ErrorKind::Timeout) => {
        self.stats.record_timeout();
        return Err(ErrorKind::Timeout);
      }
      Err(err) => return Err(err),
    };

    self.stats.record_tx();
    match frame::decode_response(request, &raw) {
      Ok(response) => {
        self.stats.record_rx_ok();
        Ok(response)
      }
      Err(ErrorKind::CrcMismatch) => {
        self.stats.record_crc_error();
        Err(ErrorKind::CrcMismatch)
      }
      Err(ErrorKind::ModbusException(code)) => {
        self.stats.record_exception();
        Err(ErrorKind::ModbusException(code))
      }
      Err(err) => Err(err),
    }
  }

  pub(crate) fn clear_suspended(&self) {
    self.suspended.store(false, Ordering::Release);
  }
}
