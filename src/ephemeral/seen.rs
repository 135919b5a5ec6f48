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

//! The hierarchical seen-message filter: three bloom-filter tiers aged at
//! 1 hour, 24 hours, and 7 days, reseeded once more than half their tracked
//! timestamps have aged out of the tier's window.

use std::collections::HashMap;
use std::sync::Mutex;

use bloom::{BloomFilter, ASMS};

use crate::core::types::now_ms;
use crate::posts::engine::SeenFilter as SeenFilterTrait;

const ONE_HOUR_MS: u64 = 3_600_000;
const ONE_DAY_MS: u64 = 24 * ONE_HOUR_MS;
const SEVEN_DAYS_MS: u64 = 7 * ONE_DAY_MS;
const FALSE_POSITIVE_RATE: f32 = 0.01;
const MIN_CAPACITY: u32 = 1024;

struct Tier {
    window_ms: u64,
    filter: BloomFilter,
    entries: HashMap<String, u64>,
}

impl Tier {
    fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            filter: BloomFilter::with_rate(FALSE_POSITIVE_RATE, MIN_CAPACITY),
            entries: HashMap::new(),
        }
    }

    fn add(&mut self, id: &str, now: u64) {
        self.entries.insert(id.to_string(), now);
        self.filter.insert(&id);
        self.maybe_reseed(now);
    }

    fn has(&self, id: &str) -> bool {
        self.filter.contains(&id)
    }

    /// When more than half of tracked timestamps have aged out of this
    /// tier's window, rebuild the filter from the surviving live ids.
    fn maybe_reseed(&mut self, now: u64) {
        let total = self.entries.len();
        if total == 0 {
            return;
        }
        let aged_out = self
            .entries
            .values()
            .filter(|t| now.saturating_sub(**t) > self.window_ms)
            .count();
        if aged_out * 2 <= total {
            return;
        }
        self.entries.retain(|_, t| now.saturating_sub(*t) <= self.window_ms);
        let capacity = (self.entries.len() as u32).max(MIN_CAPACITY);
        let mut fresh = BloomFilter::with_rate(FALSE_POSITIVE_RATE, capacity);
        for id in self.entries.keys() {
            fresh.insert(&id);
        }
        self.filter = fresh;
    }
}

/// The hierarchical seen-message filter.
pub struct SeenStore {
    tiers: Mutex<[Tier; 3]>,
}

impl Default for SeenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SeenStore {
    /// Construct a fresh filter across all three tiers.
    pub fn new() -> Self {
        Self {
            tiers: Mutex::new([
                Tier::new(ONE_HOUR_MS),
                Tier::new(ONE_DAY_MS),
                Tier::new(SEVEN_DAYS_MS),
            ]),
        }
    }
}

impl SeenFilterTrait for SeenStore {
    fn has(&self, id: &str) -> bool {
        self.tiers.lock().expect("lock").iter().any(|t| t.has(id))
    }

    fn add(&self, id: &str) {
        let now = now_ms();
        let mut tiers = self.tiers.lock().expect("lock");
        for tier in tiers.iter_mut() {
            tier.add(id, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_has_is_true() {
        let store = SeenStore::new();
        store.add("m1");
        assert!(store.has("m1"));
        assert!(!store.has("m2"));
    }

    #[test]
    fn reseed_does_not_forget_live_ids() {
        let mut tier = Tier::new(1_000);
        tier.add("old", 0);
        for i in 0..10 {
            tier.add(&format!("fresh{i}"), 2_000);
        }
        // "old" aged out (> 1000ms window at t=2000) while the fresh batch
        // pushes aged_out past 50%, triggering a reseed; fresh ids must
        // still be found afterward.
        assert!(tier.has("fresh0"));
    }
}
