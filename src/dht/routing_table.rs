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

//! 160-bucket XOR-distance routing table. Each bucket holds at most `K = 20`
//! entries; insertion into a full bucket requires pinging the
//! least-recently-seen entry first (handled by [`crate::dht::node`], which
//! owns the RPC client — this module only holds the data structure).

use crate::core::types::NodeId;

/// Bucket capacity.
pub const K: usize = 20;
/// Number of buckets (one per bit of the 160-bit id space).
pub const NUM_BUCKETS: usize = 160;

/// A single known peer, as tracked by the routing table.
#[derive(Clone, Debug)]
pub struct RoutingEntry {
    /// The peer's routing id.
    pub node_id: NodeId,
    /// Transport-level reference (wire peer id) used to actually reach it.
    pub peer_ref: String,
    /// Milliseconds since UNIX epoch of the last successful contact.
    pub last_seen: u64,
    /// Last observed round-trip time in milliseconds, if known.
    pub rtt_ms: Option<u32>,
    /// Consecutive RPC failures since the last success.
    pub failures: u32,
}

/// Outcome of attempting to insert a candidate into a full bucket.
pub enum InsertOutcome {
    /// The candidate was added (bucket had room, or was already present and was refreshed).
    Inserted,
    /// The bucket is full; the caller must PING `to_probe` and retry with
    /// [`RoutingTable::resolve_full_bucket`] once the outcome is known.
    BucketFull {
        /// The least-recently-seen entry that must be probed.
        to_probe: RoutingEntry,
    },
}

/// The routing table itself. Single-writer: only the DHT component's task
/// mutates it; other tasks read through a shared snapshot (see `node.rs`).
pub struct RoutingTable {
    self_id: NodeId,
    buckets: Vec<Vec<RoutingEntry>>,
}

impl RoutingTable {
    /// Construct an empty table centered on `self_id`.
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            buckets: (0..NUM_BUCKETS).map(|_| Vec::new()).collect(),
        }
    }

    /// This node's own id.
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    fn bucket_index(&self, id: &NodeId) -> Option<usize> {
        self.self_id.bucket_index(id)
    }

    /// Insert or refresh a candidate entry. Bucket-full candidates are
    /// returned as [`InsertOutcome::BucketFull`] for the caller to resolve.
    pub fn insert(&mut self, candidate: RoutingEntry) -> InsertOutcome {
        let Some(idx) = self.bucket_index(&candidate.node_id) else {
            // Distance zero means it's us; never route to ourselves.
            return InsertOutcome::Inserted;
        };
        let bucket = &mut self.buckets[idx];

        if let Some(pos) = bucket.iter().position(|e| e.node_id == candidate.node_id) {
            bucket.remove(pos);
            bucket.push(candidate);
            return InsertOutcome::Inserted;
        }

        if bucket.len() < K {
            bucket.push(candidate);
            return InsertOutcome::Inserted;
        }

        InsertOutcome::BucketFull {
            to_probe: bucket[0].clone(),
        }
    }

    /// Resolve a pending bucket-full decision: if the probed entry is alive,
    /// drop the candidate; otherwise evict it and append the candidate.
    pub fn resolve_full_bucket(&mut self, candidate: RoutingEntry, probe_alive: bool) {
        let Some(idx) = self.bucket_index(&candidate.node_id) else {
            return;
        };
        let bucket = &mut self.buckets[idx];
        if probe_alive {
            return;
        }
        if !bucket.is_empty() {
            bucket.remove(0);
        }
        if bucket.len() < K {
            bucket.push(candidate);
        }
    }

    /// Record an RPC failure against a known entry (bumps `failures`; does
    /// not evict — eviction only happens via the bucket-full probe path).
    pub fn record_failure(&mut self, node_id: &NodeId) {
        if let Some(idx) = self.bucket_index(node_id) {
            if let Some(e) = self.buckets[idx].iter_mut().find(|e| &e.node_id == node_id) {
                e.failures += 1;
            }
        }
    }

    /// Record a successful contact, resetting `failures` and refreshing
    /// `last_seen`/`rtt_ms`.
    pub fn record_success(&mut self, node_id: &NodeId, now_ms: u64, rtt_ms: Option<u32>) {
        if let Some(idx) = self.bucket_index(node_id) {
            if let Some(e) = self.buckets[idx].iter_mut().find(|e| &e.node_id == node_id) {
                e.failures = 0;
                e.last_seen = now_ms;
                if rtt_ms.is_some() {
                    e.rtt_ms = rtt_ms;
                }
            }
        }
    }

    /// Remove an entry entirely (used when a probe confirms death outside
    /// the bucket-full path, e.g. an explicit disconnect).
    pub fn remove(&mut self, node_id: &NodeId) {
        if let Some(idx) = self.bucket_index(node_id) {
            self.buckets[idx].retain(|e| &e.node_id != node_id);
        }
    }

    /// The `count` entries closest to `target` by XOR distance, across all
    /// buckets. Ties broken lexicographically on the distance bytes.
    pub fn closest(&self, target: &NodeId, count: usize) -> Vec<RoutingEntry> {
        let mut all: Vec<RoutingEntry> = self.buckets.iter().flatten().cloned().collect();
        all.sort_by_key(|e| e.node_id.distance(target));
        all.truncate(count);
        all
    }

    /// Total number of entries across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    /// Whether the table holds no entries at all (used by
    /// `verify_own_identity`'s bootstrap-alone special case).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every bucket's current size (for invariant checks and metrics).
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.buckets.iter().map(Vec::len).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte0: u8) -> NodeId {
        let mut b = [0u8; 20];
        b[0] = byte0;
        NodeId::from_bytes(b)
    }

    fn entry(n: NodeId) -> RoutingEntry {
        RoutingEntry {
            node_id: n,
            peer_ref: "peer".into(),
            last_seen: 0,
            rtt_ms: None,
            failures: 0,
        }
    }

    #[test]
    fn no_duplicates_and_bucket_cap() {
        let mut table = RoutingTable::new(id(0));
        for i in 1..=25u8 {
            let n = id(i);
            table.insert(entry(n));
        }
        // All land in the same bucket (bit 0 of first byte differs for all of them
        // only if their high bit matches self's bucket index consistently) —
        // the invariant we actually assert is the general one: no bucket exceeds K.
        for size in table.bucket_sizes() {
            assert!(size <= K);
        }
    }

    #[test]
    fn closest_orders_by_xor_distance() {
        let mut table = RoutingTable::new(id(0));
        table.insert(entry(id(1)));
        table.insert(entry(id(2)));
        table.insert(entry(id(255)));
        let closest = table.closest(&id(0), 1);
        assert_eq!(closest[0].node_id, id(1));
    }
}
