#![forbid(unsafe_code)]

//! Canonical chain-hash agreement over the pub/sub transport.

pub mod coordinator;
pub mod messages;
