//! Admissions application lifecycle, payment reconciliation, and the HTTP surface that fronts them.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
