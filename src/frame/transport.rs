//! The raw byte-level I/O boundary: flushing stale input before a
//! transmission and enforcing inter-frame silence afterward. The bus
//! arbiter is the only component that talks to a [`Transport`]; the frame
//! codec above stays byte-pure and knows nothing about ports or timing.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace};

use super::error::ErrorKind;

/// A half-duplex channel capable of sending one frame and waiting for its
/// reply. Implemented by [`SerialTransport`] for real hardware and by
/// `MockTransport` (test-only) for the test suite in §8.
pub trait Transport: Send {
  /// Sends `frame` and blocks for a reply for up to `timeout`, returning
  /// the raw bytes received. Implementations are responsible for
  /// recognising a complete Modbus RTU frame (there is no explicit
  /// length prefix; this is framed by inter-character timing on real
  /// hardware, approximated here by read-until-silence).
  fn transact(&mut self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, ErrorKind>;

  /// Re-establishes the underlying channel. Called by the bus arbiter
  /// after a `ChannelClosed` error, once, before surfacing the failure.
  fn reconnect(&mut self) -> Result<(), ErrorKind>;
}

/// Blocking RS-485 serial transport built on `serialport`.
pub struct SerialTransport {
  port_name: String,
  baud_rate: u32,
  inter_frame_silence: Duration,
  port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
  pub fn new(port_name: impl Into<String>, baud_rate: u32, inter_frame_silence: Duration) -> Self {
    SerialTransport { port_name: port_name.into(), baud_rate, inter_frame_silence, port: None }
  }

  fn open(&self) -> Result<Box<dyn serialport::SerialPort>, ErrorKind> {
    serialport::new(&self.port_name, self.baud_rate)
      .timeout(Duration::from_millis(50))
      .open()
      .map_err(|e| ErrorKind::ChannelClosed(e.to_string()))
  }

  fn ensure_open(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>, ErrorKind> {
    if self.port.is_none() {
      self.port = Some(self.open()?);
    }
    Ok(self.port.as_mut().unwrap())
  }
}

impl Transport for SerialTransport {
  fn transact(&mut self, frame: &[u8], timeout: Duration) -> Result<Vec<u8>, ErrorKind> {
    let port = self.ensure_open()?;
    port.set_timeout(timeout).map_err(|e| ErrorKind::ChannelClosed(e.to_string()))?;

    if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
      debug!("failed to flush input buffer before transmit: {e}");
    }

    port.write_all(frame).map_err(|e| ErrorKind::ChannelClosed(e.to_string()))?;
    port.flush().map_err(|e| ErrorKind::ChannelClosed(e.to_string()))?;

    let response = read_until_silence(port.as_mut(), timeout)?;

    std::thread::sleep(self.inter_frame_silence);
    trace!("observed {:?} inter-frame silence", self.inter_frame_silence);
    Ok(response)
  }

  fn reconnect(&mut self) -> Result<(), ErrorKind> {
    self.port = None;
    self.port = Some(self.open()?);
    Ok(())
  }
}

/// Reads bytes until `timeout` elapses without a new one arriving, or
/// until the overall deadline passes. There is no explicit frame
/// delimiter on the wire; inter-character silence is the framing signal,
/// mirroring how the original polls `serial.read()` in a loop until a
/// read returns nothing new.
fn read_until_silence(port: &mut dyn serialport::SerialPort, deadline: Duration) -> Result<Vec<u8>, ErrorKind> {
  let started = Instant::now();
  let mut buf = [0u8; 256];
  let mut out = Vec::new();

  loop {
    match port.read(&mut buf) {
      Ok(0) => break,
      Ok(n) => out.extend_from_slice(&buf[..n]),
      Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
      Err(e) => return Err(ErrorKind::ChannelClosed(e.to_string())),
    }
    if started.elapsed() >= deadline {
      break;
    }
  }

  if out.is_empty() {
    return Err(ErrorKind::Timeout);
  }
  Ok(out)
}
