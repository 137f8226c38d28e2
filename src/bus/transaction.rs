use std::time::Duration;

use crate::frame::{ErrorKind, Request, Response};
use crate::identity::UnitId;

use super::arbiter::BusArbiter;

/// A scoped handle granting exclusive use of the bus for one or more
/// transactions. Pauses the poller for its lifetime (via
/// [`BusArbiter::is_suspended`], checked at the poller's tick boundary)
/// and restores that state on every exit path — success, error, or
/// unwind — because the restore lives in `Drop`.
pub struct ExclusiveTransaction<'a> {
  arbiter: &'a BusArbiter,
  timeout: Duration,
}

impl<'a> ExclusiveTransaction<'a> {
  pub(super) fn new(arbiter: &'a BusArbiter, timeout: Duration) -> Self {
    ExclusiveTransaction { arbiter, timeout }
  }

  pub fn read_holding_registers(&self, unit: UnitId, address: u16, count: u16) -> Result<Vec<u16>, ErrorKind> {
    let request = Request::ReadHoldingRegisters { address, count };
    match self.arbiter.transact(unit.value(), &request, self.timeout)? {
      Response::Registers(values) => Ok(values),
      other => Err(unexpected_shape(&request, other)),
    }
  }

  /// Like [`Self::read_holding_registers`] but disables the arbiter's
  /// usual retry-once-on-timeout behavior. Used for the discovery
  /// engine's per-unit probe, where a retry would double the cost of
  /// every silent unit in the scan range.
  pub fn read_holding_registers_no_retry(&self, unit: UnitId, address: u16, count: u16) -> Result<Vec<u16>, ErrorKind> {
    let request = Request::ReadHoldingRegisters { address, count };
    match self.arbiter.transact_no_retry(unit.value(), &request, self.timeout)? {
      Response::Registers(values) => Ok(values),
      other => Err(unexpected_shape(&request, other)),
    }
  }

  pub fn read_input_registers(&self, unit: UnitId, address: u16, count: u16) -> Result<Vec<u16>, ErrorKind> {
    let request = Request::ReadInputRegisters { address, count };
    match self.arbiter.transact(unit.value(), &request, self.timeout)? {
      Response::Registers(values) => Ok(values),
      other => Err(unexpected_shape(&request, other)),
    }
  }

  pub fn write_single_register(&self, unit: UnitId, address: u16, value: u16) -> Result<(), ErrorKind> {
    let request = Request::WriteSingleRegister { address, value };
    self.arbiter.transact(unit.value(), &request, self.timeout)?;
    Ok(())
  }

  pub fn write_multiple_registers(&self, unit: UnitId, address: u16, values: Vec<u16>) -> Result<(), ErrorKind> {
    let request = Request::WriteMultipleRegisters { address, values };
    self.arbiter.transact(unit.value(), &request, self.timeout)?;
    Ok(())
  }

  pub fn report_slave_id(&self, unit: UnitId) -> Result<Vec<u8>, ErrorKind> {
    let request = Request::ReportSlaveId;
    match self.arbiter.transact(unit.value(), &request, self.timeout)? {
      Response::SlaveId { payload } => Ok(payload),
      other => Err(unexpected_shape(&request, other)),
    }
  }

  /// Custom function 0x41: Identify-blink-and-info.
  pub fn identify(&self, unit: UnitId) -> Result<(u8, u8, Vec<u8>), ErrorKind> {
    let request = Request::Identify;
    match self.arbiter.transact(unit.value(), &request, self.timeout)? {
      Response::Identify { slave_id, run_indicator, info } => Ok((slave_id, run_indicator, info)),
      other => Err(unexpected_shape(&request, other)),
    }
  }

  /// Escape hatch for function codes not modeled as first-class
  /// variants; no third-party library internals are touched to reach it.
  pub fn raw(&self, unit: UnitId, function: u8, payload: Vec<u8>) -> Result<Response, ErrorKind> {
    let request = Request::Raw { function, payload };
    self.arbiter.transact(unit.value(), &request, self.timeout)
  }
}

fn unexpected_shape(request: &Request, response: Response) -> ErrorKind {
  ErrorKind::UnexpectedFunction { expected: request.function_code(), received: response_function_hint(&response) }
}

fn response_function_hint(response: &Response) -> u8 {
  match response {
    Response::Raw { function, .. } => *function,
    _ => 0,
  }
}

impl Drop for ExclusiveTransaction<'_> {
  fn drop(&mut self) {
    self.arbiter.clear_suspended();
  }
}
