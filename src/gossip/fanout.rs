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

//! Bounded-fanout epidemic gossip, the fallback dissemination path used
//! while the HyParView active view is still too small (≤ 2 peers) for
//! Plumtree's tree optimization to converge.

use std::sync::{Arc, Mutex};

use bloom::{BloomFilter, ASMS};
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::core::wire::WireMessage;
use crate::gossip::plumtree::PlumtreeMsg;
use crate::identity::registry::ActiveView;
use crate::transport::sink::PeerSink;

/// Peers selected per hop.
pub const FANOUT: usize = 3;
/// Default hop budget for a freshly originated fallback broadcast.
pub const DEFAULT_TTL: u32 = 6;
/// Expected live message population sized into the bloom filter.
const BLOOM_EXPECTED_ITEMS: u32 = 10_000;
/// Target false-positive rate for the dedup filter.
const BLOOM_FALSE_POSITIVE_RATE: f32 = 0.01;

/// Bounded-fanout gossip fallback.
pub struct FanoutGossip {
    self_ref: String,
    active: Arc<dyn ActiveView>,
    sink: Arc<dyn PeerSink>,
    seen: Mutex<BloomFilter>,
    deliver_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

impl FanoutGossip {
    /// Construct a new fallback gossip component delivering first-seen
    /// payloads to `deliver_tx` as `(id, payload)`.
    pub fn new(
        self_ref: String,
        active: Arc<dyn ActiveView>,
        sink: Arc<dyn PeerSink>,
        deliver_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    ) -> Self {
        Self {
            self_ref,
            active,
            sink,
            seen: Mutex::new(BloomFilter::with_rate(
                BLOOM_FALSE_POSITIVE_RATE,
                BLOOM_EXPECTED_ITEMS,
            )),
            deliver_tx,
        }
    }

    fn mark_seen(&self, id: &str) -> bool {
        let mut seen = self.seen.lock().expect("lock");
        if seen.contains(&id) {
            false
        } else {
            seen.insert(&id);
            true
        }
    }

    fn random_sample(&self, exclude: Option<&str>) -> Vec<String> {
        let mut candidates: Vec<String> = self
            .active
            .active_peer_refs()
            .into_iter()
            .filter(|p| Some(p.as_str()) != exclude && p != &self.self_ref)
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(FANOUT);
        candidates
    }

    /// Originate a fallback broadcast with the default hop budget.
    pub fn broadcast(&self, id: String, payload: Vec<u8>) {
        if !self.mark_seen(&id) {
            return;
        }
        self.flood(id, payload, DEFAULT_TTL, None);
    }

    fn flood(&self, id: String, payload: Vec<u8>, ttl: u32, exclude: Option<&str>) {
        if ttl == 0 {
            return;
        }
        for peer in self.random_sample(exclude) {
            self.sink.send(
                &peer,
                WireMessage::Plumtree(PlumtreeMsg::Gossip {
                    id: id.clone(),
                    payload: payload.clone(),
                    ttl,
                }),
            );
        }
    }

    /// Handle an inbound fallback `GOSSIP` (one carrying a non-zero `ttl`).
    /// First-seen payloads are delivered upward and re-flooded with a
    /// decremented hop budget; duplicates and exhausted hops are dropped.
    pub fn handle_gossip(&self, sender: &str, id: String, payload: Vec<u8>, ttl: u32) {
        if !self.mark_seen(&id) {
            return;
        }
        let _ = self.deliver_tx.send((id.clone(), payload.clone()));
        if ttl > 1 {
            self.flood(id, payload, ttl - 1, Some(sender));
        }
    }

    /// Whether an id has already been observed by this fallback layer.
    pub fn has_seen(&self, id: &str) -> bool {
        self.seen.lock().expect("lock").contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sink::RecordingSink;

    struct FixedActive(Vec<String>);
    impl ActiveView for FixedActive {
        fn active_peer_refs(&self) -> Vec<String> {
            self.0.clone()
        }
    }

    fn make(active: Vec<String>) -> (FanoutGossip, Arc<RecordingSink>, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let fg = FanoutGossip::new("self".into(), Arc::new(FixedActive(active)), sink.clone(), tx);
        (fg, sink, rx)
    }

    #[test]
    fn broadcast_floods_up_to_fanout_peers() {
        let (fg, sink, _rx) = make(vec!["a".into(), "b".into(), "c".into(), "d".into(), "e".into()]);
        fg.broadcast("m1".into(), vec![1]);
        let sent = sink.drain();
        assert_eq!(sent.len(), FANOUT);
    }

    #[test]
    fn duplicate_is_dropped() {
        let (fg, sink, mut rx) = make(vec!["a".into()]);
        fg.handle_gossip("a", "m1".into(), vec![1], 3);
        sink.drain();
        fg.handle_gossip("a", "m1".into(), vec![1], 3);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn exhausted_ttl_stops_forwarding() {
        let (fg, sink, _rx) = make(vec!["a".into(), "b".into()]);
        fg.handle_gossip("z", "m1".into(), vec![1], 1);
        assert!(sink.drain().is_empty());
    }
}
