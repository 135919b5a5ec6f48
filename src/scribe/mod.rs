#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Scribe: DHT-rendezvous topic multicast trees, plus hashtag-based topic
//! extraction from post text.

pub mod protocol;
pub mod topics;
