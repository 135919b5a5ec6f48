#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! HyParView partial-view overlay: bounded active/passive views with
//! shuffle and failure repair.

pub mod hyparview;
