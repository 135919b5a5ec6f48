// Copyright (c) 2026 Ember
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Ember - an ephemeral, identity-gated peer-to-peer social network.
//!
//! This crate provides:
//! - A VDF-gated handle claim, published and resolved through a Kademlia DHT
//! - HyParView partial views with Plumtree epidemic broadcast (bounded-fanout
//!   gossip as the small-network fallback) for post dissemination
//! - Scribe multicast trees for topic subscriptions and the Mixer's
//!   origin-hiding relay topics
//! - An in-memory Ephemeral Store with carrier-based retention and
//!   trust-accelerated attestation instead of a persisted ledger
//! - Content-addressed image chunking and on-demand reconstruction
//! - Encrypted P2P transport (libp2p Noise + Yamux) carrying one
//!   request-response wire protocol for every protocol layer above
//! - Monitoring via Prometheus metrics and structured JSON logging

/// Node configuration loading (TOML file plus `EMBER_*` environment overrides).
pub mod config;
/// Deterministic types, wire codec, VDF seam, security, and persistence.
pub mod core;
/// Kademlia-style distributed hash table for handle and routing records.
pub mod dht;
/// In-memory ephemeral post store: retention, scoring, and the seen filter.
pub mod ephemeral;
/// Epidemic broadcast: Plumtree tree-optimized gossip and its bounded-fanout fallback.
pub mod gossip;
/// Handle claims, the VDF-gated identity, and DHT-backed identity resolution.
pub mod identity;
/// Content-addressed image chunking, storage, and on-demand reconstruction.
pub mod image;
/// Cover-traffic relay mixing for origin-hiding post publication.
pub mod mixer;
/// Observability (metrics, structured logging helpers).
pub mod monitoring;
/// The assembled node: wires every protocol component over one swarm.
pub mod node;
/// HyParView partial-view membership overlay.
pub mod overlay;
/// Post creation, dissemination, and the attestation-gated receipt pipeline.
pub mod posts;
/// Scribe multicast trees over the DHT, used for topics and mixer relays.
pub mod scribe;
/// P2P transport: the libp2p swarm and the peer-ref addressing seam.
pub mod transport;
