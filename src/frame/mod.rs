//! Modbus RTU PDU encode/decode, CRC16, and the raw serial transport
//! boundary. Pure framing logic lives here; bus arbitration (§4.2 in the
//! design notes) is a separate concern built on top, in [`crate::bus`].

pub mod codec;
pub mod crc;
mod error;
pub mod pdu;
pub mod transport;

pub use codec::{decode_response, encode_request};
pub use error::{ErrorKind, Result};
pub use pdu::{FunctionCode, Request, Response};
pub use transport::{SerialTransport, Transport};
