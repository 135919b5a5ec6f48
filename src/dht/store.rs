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

//! The local KV store backing `STORE`/`FIND_VALUE`, with the server-side
//! safeguards named in the specification: size caps, per-sender rate
//! limiting, and capacity-triggered eviction of the oldest entries.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use gcra::{GcraState, RateLimit};
use lru_time_cache::LruCache;

use crate::core::types::NodeId;
use crate::dht::rpc::StoreMeta;

/// Maximum accepted key length in bytes.
pub const MAX_KEY_LEN: usize = 256;
/// Maximum accepted value length in bytes.
pub const MAX_VALUE_LEN: usize = 64 * 1024;
/// STOREs allowed per sender per minute.
pub const STORE_RATE_PER_MIN: u32 = 100;
/// Local storage entry cap before eviction kicks in.
pub const MAX_ENTRIES: usize = 10_000;
/// Number of oldest entries dropped once the cap is exceeded.
pub const EVICT_BATCH: usize = 5_000;

/// Reasons a `STORE` can be rejected server-side.
#[derive(Debug, PartialEq, Eq)]
pub enum StoreRejection {
    /// Key exceeded [`MAX_KEY_LEN`].
    KeyTooLarge,
    /// Value exceeded [`MAX_VALUE_LEN`].
    ValueTooLarge,
    /// Sender exceeded [`STORE_RATE_PER_MIN`].
    RateLimited,
}

struct Entry {
    value: Vec<u8>,
    meta: StoreMeta,
    inserted_at: u64,
}

/// Local KV store with STORE safeguards.
pub struct LocalStore {
    entries: HashMap<Vec<u8>, Entry>,
    insertion_order: VecDeque<Vec<u8>>,
    rate_limiter: LruCache<NodeId, GcraState>,
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            rate_limiter: LruCache::with_expiry_duration(Duration::from_secs(600)),
        }
    }

    /// Attempt to serve a remote `STORE` request from `sender` at time `now_ms`.
    pub fn try_store_remote(
        &mut self,
        sender: NodeId,
        key: Vec<u8>,
        value: Vec<u8>,
        meta: StoreMeta,
        now_ms: u64,
    ) -> Result<(), StoreRejection> {
        if key.len() > MAX_KEY_LEN {
            return Err(StoreRejection::KeyTooLarge);
        }
        if value.len() > MAX_VALUE_LEN {
            return Err(StoreRejection::ValueTooLarge);
        }
        let limit = RateLimit::new(STORE_RATE_PER_MIN, Duration::from_secs(60));
        let state = self.rate_limiter.entry(sender).or_insert_with(GcraState::default);
        if state.check_and_modify(&limit, 1).is_err() {
            return Err(StoreRejection::RateLimited);
        }
        self.put(key, value, meta, now_ms);
        Ok(())
    }

    /// Unconditional local write, used for the node's own `store(key, value)`
    /// call (which always writes locally regardless of remote safeguards).
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>, meta: StoreMeta, now_ms: u64) {
        if !self.entries.contains_key(&key) {
            self.insertion_order.push_back(key.clone());
        }
        self.entries.insert(
            key,
            Entry {
                value,
                meta,
                inserted_at: now_ms,
            },
        );
        self.evict_if_over_capacity();
    }

    fn evict_if_over_capacity(&mut self) {
        if self.entries.len() <= MAX_ENTRIES {
            return;
        }
        for _ in 0..EVICT_BATCH {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    /// Read a value, if present.
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.entries.get(key).map(|e| e.value.as_slice())
    }

    /// Read the metadata a value was stored with.
    pub fn get_meta(&self, key: &[u8]) -> Option<&StoreMeta> {
        self.entries.get(key).map(|e| &e.meta)
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries past their TTL, per `meta.refresh`-bearing records that
    /// carry an expiry elsewhere (the DHT itself is TTL-agnostic; callers
    /// like the Identity Registry re-store to refresh). Exposed for the
    /// reaper loop to drop entries whose `inserted_at` exceeds `max_age_ms`.
    pub fn reap_older_than(&mut self, now_ms: u64, max_age_ms: u64) {
        let expired: Vec<Vec<u8>> = self
            .entries
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.inserted_at) > max_age_ms)
            .map(|(k, _)| k.clone())
            .collect();
        for k in expired {
            self.entries.remove(&k);
            if let Some(pos) = self.insertion_order.iter().position(|x| x == &k) {
                self.insertion_order.remove(pos);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(n: u8) -> NodeId {
        let mut b = [0u8; 20];
        b[0] = n;
        NodeId::from_bytes(b)
    }

    #[test]
    fn rejects_oversized_key_and_value() {
        let mut store = LocalStore::new();
        let big_key = vec![0u8; MAX_KEY_LEN + 1];
        assert_eq!(
            store.try_store_remote(sender(1), big_key, vec![1], StoreMeta::default(), 0),
            Err(StoreRejection::KeyTooLarge)
        );
        let big_val = vec![0u8; MAX_VALUE_LEN + 1];
        assert_eq!(
            store.try_store_remote(sender(1), vec![1], big_val, StoreMeta::default(), 0),
            Err(StoreRejection::ValueTooLarge)
        );
    }

    #[test]
    fn rate_limits_excess_stores_per_sender() {
        let mut store = LocalStore::new();
        let s = sender(2);
        let mut rejected = 0;
        for i in 0..110u32 {
            if store
                .try_store_remote(s, format!("k{i}").into_bytes(), vec![1], StoreMeta::default(), 0)
                .is_err()
            {
                rejected += 1;
            }
        }
        assert!(rejected >= 10, "expected the 101st+ store to be rate limited");
    }

    #[test]
    fn evicts_oldest_batch_over_capacity() {
        let mut store = LocalStore::new();
        for i in 0..(MAX_ENTRIES + 10) {
            store.put(format!("k{i}").into_bytes(), vec![1], StoreMeta::default(), i as u64);
        }
        assert!(store.len() <= MAX_ENTRIES);
        assert!(store.get(b"k0").is_none(), "oldest entries should be evicted");
    }
}
