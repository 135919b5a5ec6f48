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

//! The node's Prometheus registry: transport-level counters plus gauges for
//! DHT routing table occupancy, gossip dedup activity, ephemeral store size,
//! and image fetch progress.

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric failed to construct or register.
    #[error("prometheus")]
    Prom,
}

/// Metrics container, cheaply `Clone`able (every field is itself a cheap
/// `Clone` handle into the shared registry).
#[derive(Clone)]
pub struct Metrics {
    /// Registry every metric below is registered against.
    pub registry: Registry,

    /// Connected transport peers.
    pub peers_connected: IntGauge,
    /// Peers banned for misbehavior.
    pub peers_banned_total: IntCounter,
    /// Messages dropped by the rate limiter.
    pub rate_limited_total: IntCounter,
    /// Messages dropped for failing decode.
    pub invalid_msg_total: IntCounter,
    /// Messages dropped as already-seen duplicates.
    pub replay_dropped_total: IntCounter,

    /// Entries currently held in the DHT routing table.
    pub dht_routing_table_size: IntGauge,
    /// Completed `store` operations.
    pub dht_store_total: IntCounter,
    /// Completed `get` operations that found a value.
    pub dht_get_hit_total: IntCounter,
    /// Completed `get` operations that found nothing.
    pub dht_get_miss_total: IntCounter,

    /// Current HyParView active-view size.
    pub overlay_active_view_size: IntGauge,
    /// Current HyParView passive-view size.
    pub overlay_passive_view_size: IntGauge,

    /// Plumtree/fanout broadcasts originated locally.
    pub gossip_broadcast_total: IntCounter,
    /// Gossip deliveries that were already-seen duplicates (dedup hits).
    pub gossip_dedup_hit_total: IntCounter,
    /// `GRAFT` messages sent in response to a missing `IHAVE` advert.
    pub gossip_graft_total: IntCounter,

    /// Posts accepted into the Ephemeral Store.
    pub posts_accepted_total: IntCounter,
    /// Posts discarded for failing verification.
    pub posts_rejected_total: IntCounter,
    /// Posts promoted via attestation trust instead of full verification.
    pub posts_trust_promoted_total: IntCounter,
    /// Current Ephemeral Store post count.
    pub ephemeral_store_size: IntGauge,
    /// Posts evicted by `gc_tick`.
    pub ephemeral_evicted_total: IntCounter,

    /// Image chunk fetch requests sent.
    pub image_fetch_requests_total: IntCounter,
    /// Image chunks received and verified.
    pub image_chunks_received_total: IntCounter,
    /// Image chunks discarded for a hash mismatch.
    pub image_chunk_mismatch_total: IntCounter,

    /// Posts relayed through a mixer relay topic.
    pub mixer_relayed_total: IntCounter,
    /// Cover-traffic `noise` messages emitted.
    pub mixer_cover_traffic_total: IntCounter,
}

macro_rules! new_counter {
    ($name:expr, $help:expr) => {
        IntCounter::new($name, $help).map_err(|_| MetricsError::Prom)?
    };
}

macro_rules! new_gauge {
    ($name:expr, $help:expr) => {
        IntGauge::new($name, $help).map_err(|_| MetricsError::Prom)?
    };
}

impl Metrics {
    /// Create and register every metric against a fresh registry.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers_connected = new_gauge!("ember_peers_connected", "Connected transport peers");
        let peers_banned_total = new_counter!("ember_peers_banned_total", "Peers banned for misbehavior");
        let rate_limited_total = new_counter!("ember_rate_limited_total", "Messages dropped by the rate limiter");
        let invalid_msg_total = new_counter!("ember_invalid_msg_total", "Messages dropped for failing decode");
        let replay_dropped_total = new_counter!("ember_replay_dropped_total", "Messages dropped as already-seen duplicates");

        let dht_routing_table_size = new_gauge!("ember_dht_routing_table_size", "Entries held in the DHT routing table");
        let dht_store_total = new_counter!("ember_dht_store_total", "Completed DHT store operations");
        let dht_get_hit_total = new_counter!("ember_dht_get_hit_total", "DHT get operations that found a value");
        let dht_get_miss_total = new_counter!("ember_dht_get_miss_total", "DHT get operations that found nothing");

        let overlay_active_view_size = new_gauge!("ember_overlay_active_view_size", "HyParView active-view size");
        let overlay_passive_view_size = new_gauge!("ember_overlay_passive_view_size", "HyParView passive-view size");

        let gossip_broadcast_total = new_counter!("ember_gossip_broadcast_total", "Broadcasts originated locally");
        let gossip_dedup_hit_total = new_counter!("ember_gossip_dedup_hit_total", "Gossip deliveries that were duplicates");
        let gossip_graft_total = new_counter!("ember_gossip_graft_total", "GRAFT messages sent");

        let posts_accepted_total = new_counter!("ember_posts_accepted_total", "Posts accepted into the Ephemeral Store");
        let posts_rejected_total = new_counter!("ember_posts_rejected_total", "Posts discarded for failing verification");
        let posts_trust_promoted_total = new_counter!("ember_posts_trust_promoted_total", "Posts promoted via attestation trust");
        let ephemeral_store_size = new_gauge!("ember_ephemeral_store_size", "Current Ephemeral Store post count");
        let ephemeral_evicted_total = new_counter!("ember_ephemeral_evicted_total", "Posts evicted by gc_tick");

        let image_fetch_requests_total = new_counter!("ember_image_fetch_requests_total", "Image chunk fetch requests sent");
        let image_chunks_received_total = new_counter!("ember_image_chunks_received_total", "Image chunks received and verified");
        let image_chunk_mismatch_total = new_counter!("ember_image_chunk_mismatch_total", "Image chunks discarded for a hash mismatch");

        let mixer_relayed_total = new_counter!("ember_mixer_relayed_total", "Posts relayed through a mixer relay topic");
        let mixer_cover_traffic_total = new_counter!("ember_mixer_cover_traffic_total", "Cover-traffic noise messages emitted");

        for m in [&peers_connected, &dht_routing_table_size, &overlay_active_view_size, &overlay_passive_view_size, &ephemeral_store_size] {
            registry.register(Box::new(m.clone())).map_err(|_| MetricsError::Prom)?;
        }
        for m in [
            &peers_banned_total,
            &rate_limited_total,
            &invalid_msg_total,
            &replay_dropped_total,
            &dht_store_total,
            &dht_get_hit_total,
            &dht_get_miss_total,
            &gossip_broadcast_total,
            &gossip_dedup_hit_total,
            &gossip_graft_total,
            &posts_accepted_total,
            &posts_rejected_total,
            &posts_trust_promoted_total,
            &ephemeral_evicted_total,
            &image_fetch_requests_total,
            &image_chunks_received_total,
            &image_chunk_mismatch_total,
            &mixer_relayed_total,
            &mixer_cover_traffic_total,
        ] {
            registry.register(Box::new(m.clone())).map_err(|_| MetricsError::Prom)?;
        }

        Ok(Self {
            registry,
            peers_connected,
            peers_banned_total,
            rate_limited_total,
            invalid_msg_total,
            replay_dropped_total,
            dht_routing_table_size,
            dht_store_total,
            dht_get_hit_total,
            dht_get_miss_total,
            overlay_active_view_size,
            overlay_passive_view_size,
            gossip_broadcast_total,
            gossip_dedup_hit_total,
            gossip_graft_total,
            posts_accepted_total,
            posts_rejected_total,
            posts_trust_promoted_total,
            ephemeral_store_size,
            ephemeral_evicted_total,
            image_fetch_requests_total,
            image_chunks_received_total,
            image_chunk_mismatch_total,
            mixer_relayed_total,
            mixer_cover_traffic_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_registers_every_metric_without_name_collision() {
        let metrics = Metrics::new().expect("metrics construct");
        assert!(!metrics.registry.gather().is_empty());
    }
}
