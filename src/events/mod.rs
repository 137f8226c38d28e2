//! Internal publish/subscribe bus for telemetry, diagnostics, alerts,
//! and discovery progress.

mod bus;
mod types;

pub use bus::{EventBus, Subscription};
pub use types::{DiagnosticEvent, Event};
