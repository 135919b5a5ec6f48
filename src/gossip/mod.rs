#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Epidemic broadcast: Plumtree tree-shaped gossip over HyParView's active
//! view, with a bounded-fanout fallback for small or still-converging
//! networks.

pub mod fanout;
pub mod plumtree;
