#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! The content-addressed image store: fixed-size chunking, a Merkle
//! manifest, and the on-demand chunk fetch protocol.

pub mod protocol;
pub mod store;
