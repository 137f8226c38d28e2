//! Core coordination layer for a Modbus RTU edge supervisor.
//!
//! This crate implements the concurrent machinery that turns a single
//! half-duplex RS-485 serial channel into a fleet supervisor: bus
//! arbitration, slave discovery, round-robin polling with adaptive
//! backoff, register normalization, identity/liveness tracking, threshold
//! alerting, and a small set of device commands (identify, alias write,
//! Unit-ID change, EEPROM commit).
//!
//! Persistence and northbound (IoT) publication are external
//! collaborators. This crate only depends on the [`uplink::PersistenceSink`]
//! and [`uplink::IotUplinkSink`] traits; concrete implementations live
//! behind the `sqlite` and `mqtt` feature flags.

pub mod frame;
pub mod bus;
pub mod register;
pub mod model;
pub mod identity;
pub mod discovery;
pub mod polling;
pub mod alert;
pub mod command;
pub mod uplink;
pub mod events;
pub mod config;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;

#[cfg(feature = "mqtt")]
pub mod mqtt_uplink;

pub use model::{Alert as AlertRecord, AlertLevel, Measurement, Quality, SensorDescriptor, TelemetryFrame};
pub use identity::{Capability, DeviceIdentity, DeviceState, Lifecycle, UnitId};
pub use frame::ErrorKind;
