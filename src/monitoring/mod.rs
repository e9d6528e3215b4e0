#![forbid(unsafe_code)]

//! Prometheus metrics.

pub mod metrics;
