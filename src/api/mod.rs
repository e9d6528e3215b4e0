#![forbid(unsafe_code)]

//! External HTTP interface.

pub mod http;
