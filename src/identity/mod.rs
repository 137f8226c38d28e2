//! Per-unit identity, liveness, and alias state. The [`IdentityCache`] is
//! the sole owner of both [`DeviceIdentity`] and [`DeviceState`]; every
//! other component mutates them only through it.

mod cache;
mod types;

pub use cache::IdentityCache;
pub use types::{decode_ascii_code, Capability, DeviceIdentity, DeviceState, ErrorFlag, Lifecycle, StatusFlag, UnitId};
