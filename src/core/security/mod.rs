#![forbid(unsafe_code)]

//! Key material and the local account index.

pub mod accounts;
pub mod keystore;
