//! Operational concerns: logging setup.

pub mod telemetry;
