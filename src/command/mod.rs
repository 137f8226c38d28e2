//! Stateful device commands: identify, alias write, Unit-ID change, and
//! EEPROM commit.

mod surface;

pub use surface::{CommandSurface, IdentifyResult};
