#![forbid(unsafe_code)]

//! Blocks, the bundled genesis and the node's hash-linked chain.

pub mod block;
pub mod genesis;
pub mod ledger;
pub mod merkle;
