#![forbid(unsafe_code)]

//! Core protocol primitives.

pub mod chain;
pub mod config;
pub mod consensus;
pub mod security;
pub mod storage;
pub mod tx;
pub mod types;
