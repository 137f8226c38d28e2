//! Encodes [`Request`]s into Modbus RTU frames and decodes raw frames back
//! into [`Response`]s. Pure byte-level logic; knows nothing about the
//! serial port or inter-frame timing — that belongs to [`super::transport`].

use byteorder::{BigEndian, ByteOrder};

use super::crc;
use super::error::ErrorKind;
use super::pdu::{Request, Response, EXCEPTION_BIT};

/// Builds the full on-wire frame (unit + PDU + CRC16) for `request`.
pub fn encode_request(unit: u8, request: &Request) -> Vec<u8> {
  let mut frame = Vec::with_capacity(8);
  frame.push(unit);
  frame.push(request.function_code());

  match request {
    Request::ReadHoldingRegisters { address, count } | Request::ReadInputRegisters { address, count } => {
      push_u16(&mut frame, *address);
      push_u16(&mut frame, *count);
    }
    Request::WriteSingleRegister { address, value } => {
      push_u16(&mut frame, *address);
      push_u16(&mut frame, *value);
    }
    Request::WriteMultipleRegisters { address, values } => {
      push_u16(&mut frame, *address);
      push_u16(&mut frame, values.len() as u16);
      frame.push((values.len() * 2) as u8);
      for value in values {
        push_u16(&mut frame, *value);
      }
    }
    Request::ReportSlaveId | Request::Identify => {}
    Request::Raw { payload, .. } => frame.extend_from_slice(payload),
  }

  crc::push_crc(&mut frame);
  frame
}

fn push_u16(frame: &mut Vec<u8>, value: u16) {
  let mut buf = [0u8; 2];
  BigEndian::write_u16(&mut buf, value);
  frame.extend_from_slice(&buf);
}

/// Minimum valid frame length: unit + function + CRC16.
const MIN_FRAME_LEN: usize = 4;

/// Parses a raw on-wire frame into a [`Response`], given the `request`
/// that produced it (needed to know how to interpret the payload and to
/// validate the echoed function code).
pub fn decode_response(request: &Request, raw: &[u8]) -> Result<Response, ErrorKind> {
  if raw.len() < MIN_FRAME_LEN {
    return Err(ErrorKind::ShortFrame);
  }
  if !crc::verify(raw) {
    return Err(ErrorKind::CrcMismatch);
  }

  let body = &raw[..raw.len() - 2];
  let received_func = body[1];
  let payload = &body[2..];

  if received_func & EXCEPTION_BIT != 0 {
    if payload.is_empty() {
      return Err(ErrorKind::ShortFrame);
    }
    return Err(ErrorKind::ModbusException(payload[0]));
  }

  let expected_func = request.function_code();
  if received_func != expected_func {
    return Err(ErrorKind::UnexpectedFunction { expected: expected_func, received: received_func });
  }

  match request {
    Request::ReadHoldingRegisters { count, .. } | Request::ReadInputRegisters { count, .. } => {
      decode_registers(payload, *count as usize)
    }
    Request::WriteSingleRegister { .. } => {
      if payload.len() != 4 {
        return Err(ErrorKind::UnexpectedLength { expected: 4, received: payload.len() });
      }
      Ok(Response::WriteSingleAck { address: BigEndian::read_u16(&payload[0..2]), value: BigEndian::read_u16(&payload[2..4]) })
    }
    Request::WriteMultipleRegisters { .. } => {
      if payload.len() != 4 {
        return Err(ErrorKind::UnexpectedLength { expected: 4, received: payload.len() });
      }
      Ok(Response::WriteMultipleAck { address: BigEndian::read_u16(&payload[0..2]), count: BigEndian::read_u16(&payload[2..4]) })
    }
    Request::ReportSlaveId => Ok(Response::SlaveId { payload: payload.to_vec() }),
    Request::Identify => decode_identify(payload),
    Request::Raw { .. } => Ok(Response::Raw { function: received_func, payload: payload.to_vec() }),
  }
}

fn decode_registers(payload: &[u8], expected_count: usize) -> Result<Response, ErrorKind> {
  if payload.is_empty() {
    return Err(ErrorKind::ShortFrame);
  }
  let byte_count = payload[0] as usize;
  let rest = &payload[1..];
  if byte_count != rest.len() || byte_count % 2 != 0 {
    return Err(ErrorKind::UnexpectedLength { expected: expected_count * 2, received: rest.len() });
  }
  let received_count = byte_count / 2;
  if received_count != expected_count {
    return Err(ErrorKind::UnexpectedLength { expected: expected_count, received: received_count });
  }
  let registers = rest.chunks_exact(2).map(BigEndian::read_u16).collect();
  Ok(Response::Registers(registers))
}

/// Handles the dual on-wire shape of the 0x41 response: the firmware
/// sometimes prefixes a byte-count byte, sometimes does not. The shape is
/// selected by checking whether the first byte equals the length of
/// everything that follows it.
fn decode_identify(payload: &[u8]) -> Result<Response, ErrorKind> {
  if payload.len() < 2 {
    return Err(ErrorKind::ShortFrame);
  }
  let body: &[u8] = if payload[0] as usize == payload.len() - 1 { &payload[1..] } else { payload };
  if body.len() < 2 {
    return Err(ErrorKind::ShortFrame);
  }
  Ok(Response::Identify { slave_id: body[0], run_indicator: body[1], info: body[2..].to_vec() })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encode_read_holding_matches_textbook_frame() {
    let request = Request::ReadHoldingRegisters { address: 0x0000, count: 0x000A };
    let frame = encode_request(0x01, &request);
    assert_eq!(&frame[..6], &[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]);
    assert_eq!(&frame[6..], &[0xC5, 0xCD]);
  }

  #[test]
  fn decode_registers_round_trip() {
    let request = Request::ReadInputRegisters { address: 0x0000, count: 2 };
    let mut raw = vec![0x02, 0x04, 0x04, 0x00, 0x64, 0xFF, 0x9C];
    crc::push_crc(&mut raw);
    let response = decode_response(&request, &raw).unwrap();
    assert_eq!(response, Response::Registers(vec![0x0064, 0xFF9C]));
  }

  #[test]
  fn decode_rejects_short_count() {
    let request = Request::ReadInputRegisters { address: 0x0000, count: 3 };
    let mut raw = vec![0x02, 0x04, 0x04, 0x00, 0x64, 0xFF, 0x9C];
    crc::push_crc(&mut raw);
    let err = decode_response(&request, &raw).unwrap_err();
    assert_eq!(err, ErrorKind::UnexpectedLength { expected: 3, received: 2 });
  }

  #[test]
  fn decode_surfaces_modbus_exception() {
    let request = Request::ReadHoldingRegisters { address: 0x0000, count: 1 };
    let mut raw = vec![0x02, 0x83, 0x02];
    crc::push_crc(&mut raw);
    let err = decode_response(&request, &raw).unwrap_err();
    assert_eq!(err, ErrorKind::ModbusException(0x02));
  }

  #[test]
  fn decode_identify_with_leading_byte_count() {
    let info = b"ACME-INC";
    let mut payload = vec![(2 + info.len()) as u8, 0x02, 0x01];
    payload.extend_from_slice(info);
    let mut raw = vec![0x02, 0x41];
    raw.extend_from_slice(&payload);
    crc::push_crc(&mut raw);
    let response = decode_response(&Request::Identify, &raw).unwrap();
    assert_eq!(response, Response::Identify { slave_id: 0x02, run_indicator: 0x01, info: info.to_vec() });
  }

  #[test]
  fn decode_identify_without_leading_byte_count() {
    let info = b"ACME";
    let mut payload = vec![0x02, 0x00];
    payload.extend_from_slice(info);
    let mut raw = vec![0x02, 0x41];
    raw.extend_from_slice(&payload);
    crc::push_crc(&mut raw);
    let response = decode_response(&Request::Identify, &raw).unwrap();
    assert_eq!(response, Response::Identify { slave_id: 0x02, run_indicator: 0x00, info: info.to_vec() });
  }

  #[test]
  fn decode_rejects_crc_mismatch() {
    let request = Request::ReadHoldingRegisters { address: 0x0000, count: 1 };
    let mut raw = vec![0x02, 0x03, 0x02, 0x00, 0x01];
    crc::push_crc(&mut raw);
    raw[raw.len() - 1] ^= 0xFF;
    assert_eq!(decode_response(&request, &raw).unwrap_err(), ErrorKind::CrcMismatch);
  }
}
