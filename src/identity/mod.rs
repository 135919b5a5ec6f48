#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Self-sovereign identity: the public `Claim`, the node's own
//! `LocalIdentity`, routing records, and the DHT-backed registry operations.

pub mod claim;
pub mod registry;
