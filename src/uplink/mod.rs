//! Collaborator contracts for local persistence and northbound IoT
//! publication, plus the dispatcher that fans a poll result out to both.

mod dispatcher;
mod sinks;

pub use dispatcher::UplinkDispatcher;
pub use sinks::{IotUplinkSink, PersistenceSink};
