//! Modbus RTU function codes and the request/response PDU shapes this
//! supervisor speaks as master.

/// Function codes implemented on the master side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
  ReadHoldingRegisters = 0x03,
  ReadInputRegisters = 0x04,
  WriteSingleRegister = 0x06,
  WriteMultipleRegisters = 0x10,
  ReportSlaveId = 0x11,
  Identify = 0x41,
}

impl FunctionCode {
  pub fn code(self) -> u8 {
    self as u8
  }
}

/// Bit set on the function-code byte of an exception response.
pub const EXCEPTION_BIT: u8 = 0x80;

/// A master-side request, one PDU's worth of intent before framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
  ReadHoldingRegisters { address: u16, count: u16 },
  ReadInputRegisters { address: u16, count: u16 },
  WriteSingleRegister { address: u16, value: u16 },
  WriteMultipleRegisters { address: u16, values: Vec<u16> },
  ReportSlaveId,
  /// Custom 0x41 Identify-blink-and-info. Carries no request payload.
  Identify,
  /// Escape hatch for function codes this crate does not model as a
  /// first-class variant; the caller is responsible for interpreting
  /// the response payload.
  Raw { function: u8, payload: Vec<u8> },
}

impl Request {
  pub fn function_code(&self) -> u8 {
    match self {
      Request::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters.code(),
      Request::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters.code(),
      Request::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister.code(),
      Request::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters.code(),
      Request::ReportSlaveId => FunctionCode::ReportSlaveId.code(),
      Request::Identify => FunctionCode::Identify.code(),
      Request::Raw { function, .. } => *function,
    }
  }
}

/// A decoded master-side response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
  /// Holding/input register read: one entry per 16-bit register, in
  /// address order.
  Registers(Vec<u16>),
  WriteSingleAck { address: u16, value: u16 },
  WriteMultipleAck { address: u16, count: u16 },
  SlaveId { payload: Vec<u8> },
  /// Custom 0x41 response. `slave_id` and `run_indicator` are always
  /// present; `info` is whatever ASCII payload followed them.
  Identify { slave_id: u8, run_indicator: u8, info: Vec<u8> },
  Raw { function: u8, payload: Vec<u8> },
}
