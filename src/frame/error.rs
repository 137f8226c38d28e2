use thiserror::Error;

/// Errors surfaced by the frame codec and, by extension, the bus arbiter.
///
/// These are the only failure modes a caller needs to reason about; they do
/// not distinguish "serial port gone" from "slave absent" — that
/// distinction is [`ErrorKind::ChannelClosed`] vs. [`ErrorKind::Timeout`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
  #[error("no response within timeout")]
  Timeout,

  #[error("CRC mismatch in response frame")]
  CrcMismatch,

  #[error("response frame shorter than minimum valid length")]
  ShortFrame,

  #[error("response function code {received:#04x} does not match request {expected:#04x}")]
  UnexpectedFunction { expected: u8, received: u8 },

  #[error("response payload length {received} did not match the expected {expected}")]
  UnexpectedLength { expected: usize, received: usize },

  #[error("slave returned Modbus exception code {0:#04x}")]
  ModbusException(u8),

  #[error("serial channel unavailable: {0}")]
  ChannelClosed(String),

  #[error("invalid argument: {0}")]
  InvalidArgument(String),

  #[error("operation rejected: bus is busy with a conflicting transaction")]
  Busy,
}

pub type Result<T> = std::result::Result<T, ErrorKind>;
