//! Threshold alerting with debounce and auto-acknowledgement, plus
//! device-liveness (offline) detection.

mod engine;

pub use engine::AlertEngine;
