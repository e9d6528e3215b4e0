#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Networking: the pub/sub capability, its libp2p gossipsub backend and the
//! persisted peer identity.

pub mod p2p;
pub mod p2p_identity;
pub mod pubsub;
