#![forbid(unsafe_code)]

//! Persistence primitives.

pub mod kv;
