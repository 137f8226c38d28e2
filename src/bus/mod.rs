//! Serializes every Modbus transaction on the single half-duplex serial
//! channel. The [`BusArbiter`] is the only component holding the
//! transport; everyone else — discovery, the poller, the command
//! surface — submits through a scoped [`ExclusiveTransaction`].

mod arbiter;
mod stats;
mod transaction;

pub use arbiter::BusArbiter;
pub use stats::ModbusStats;
pub use transaction::ExclusiveTransaction;
