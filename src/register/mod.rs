//! Pure register <-> physical-value transforms. Nothing in this module
//! touches the bus; it operates on register arrays already read by the
//! arbiter, or produces register arrays for the command surface to write.

pub mod catalog;
pub mod decode;
pub mod encode;
pub mod frame;

pub use catalog::{derive_sensors, derive_sensors_for, physical_unit_for};
pub use encode::{pack_alias, ALIAS_MAX_LEN};
