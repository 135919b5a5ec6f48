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

//! Per-peer reputation: the specification's `PeerRecord.reputation_score`,
//! generalizing the teacher's integer `PeerScore` (decay-per-minute,
//! threshold-gated) to a floating point scale shared with the attestation
//! trust formula (`ln(1 + reputation) * 10`).
//!
//! Reputation here is local and asymmetric by design: a node tracks its own
//! view of every peer it has dealt with, never learns how those peers view
//! it back, and separately tracks its own standing under [`ReputationTable::SELF_KEY`]
//! in the same table, earned purely through its own honest participation.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::core::state::storage::PersistenceHooks;
use crate::core::types::now_ms;

/// Reputation a peer (or this node itself) starts at, and relaxes back
/// toward after a period without activity.
pub const DEFAULT_REPUTATION: f64 = 100.0;
/// Reputation never climbs above this.
pub const MAX_REPUTATION: f64 = 200.0;
/// Reputation never drops below this.
pub const MIN_REPUTATION: f64 = 0.0;

/// Reward for successfully authoring and publishing a valid, signed post —
/// the only locally-observable evidence of a node's own good participation.
pub const REWARD_VERIFIED_POST: f64 = 5.0;
/// Penalty for tripping the per-peer message-type rate limiter.
pub const PENALTY_RATE_LIMITED: f64 = 10.0;
/// Penalty for a message the transport codec could not decode.
pub const PENALTY_MALFORMED: f64 = 15.0;
/// Penalty for a signature or VDF proof that failed verification.
pub const PENALTY_VERIFICATION_FAILED: f64 = 25.0;

/// Per minute of inactivity, a score relaxes this much back toward
/// `DEFAULT_REPUTATION`, so a single old violation (or a long-idle high
/// score) doesn't follow a peer forever.
const DECAY_PER_MINUTE: f64 = 2.0;

const PERSIST_KEY: &str = "peer/reputation";

#[derive(Clone, Copy)]
struct PeerScoreState {
    score: f64,
    last_touched_ms: u64,
}

/// Tracks this node's local view of every peer's standing.
pub struct ReputationTable {
    peers: Mutex<HashMap<String, PeerScoreState>>,
}

impl ReputationTable {
    /// Key this node records its own participation reputation under, in the
    /// same table as its peers — there is nothing privileged about "self",
    /// it is simply another row a node happens to also maintain.
    pub const SELF_KEY: &'static str = "__self__";

    /// An empty table with no persisted history.
    pub fn new() -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Reload a table previously written by [`ReputationTable::persist`],
    /// per the specification's "surviving reputation is persisted".
    pub fn load(persistence: &dyn PersistenceHooks) -> Self {
        let table = Self::new();
        if let Some(bytes) = persistence.load(PERSIST_KEY) {
            if let Ok(snapshot) = serde_json::from_slice::<HashMap<String, f64>>(&bytes) {
                let now = now_ms();
                let mut peers = table.peers.lock().expect("lock");
                for (peer_ref, score) in snapshot {
                    peers.insert(
                        peer_ref,
                        PeerScoreState {
                            score,
                            last_touched_ms: now,
                        },
                    );
                }
            }
        }
        table
    }

    /// Snapshot every tracked score for persistence across restarts.
    pub fn persist(&self, persistence: &dyn PersistenceHooks) {
        let snapshot: HashMap<String, f64> = {
            let peers = self.peers.lock().expect("lock");
            peers.iter().map(|(k, v)| (k.clone(), v.score)).collect()
        };
        if let Ok(bytes) = serde_json::to_vec(&snapshot) {
            persistence.save(PERSIST_KEY, &bytes);
        }
    }

    fn decay_toward_default(state: &mut PeerScoreState, now: u64) {
        let elapsed_min = now.saturating_sub(state.last_touched_ms) / 60_000;
        if elapsed_min == 0 {
            return;
        }
        let step = DECAY_PER_MINUTE * elapsed_min as f64;
        if state.score > DEFAULT_REPUTATION {
            state.score = (state.score - step).max(DEFAULT_REPUTATION);
        } else if state.score < DEFAULT_REPUTATION {
            state.score = (state.score + step).min(DEFAULT_REPUTATION);
        }
        state.last_touched_ms = now;
    }

    /// This peer's current reputation score, `DEFAULT_REPUTATION` if it has
    /// never been observed.
    pub fn score_of(&self, peer_ref: &str) -> f64 {
        let mut peers = self.peers.lock().expect("lock");
        match peers.get_mut(peer_ref) {
            Some(state) => {
                Self::decay_toward_default(state, now_ms());
                state.score
            }
            None => DEFAULT_REPUTATION,
        }
    }

    fn adjust(&self, peer_ref: &str, delta: f64) {
        let now = now_ms();
        let mut peers = self.peers.lock().expect("lock");
        let state = peers.entry(peer_ref.to_string()).or_insert(PeerScoreState {
            score: DEFAULT_REPUTATION,
            last_touched_ms: now,
        });
        Self::decay_toward_default(state, now);
        state.score = (state.score + delta).clamp(MIN_REPUTATION, MAX_REPUTATION);
        state.last_touched_ms = now;
    }

    /// Reward good behavior attributable to `peer_ref` (or `SELF_KEY`).
    pub fn reward(&self, peer_ref: &str, amount: f64) {
        self.adjust(peer_ref, amount);
    }

    /// Penalize a protocol violation attributed to `peer_ref`.
    pub fn penalize(&self, peer_ref: &str, amount: f64) {
        self.adjust(peer_ref, -amount);
    }
}

impl Default for ReputationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::storage::SledPersistence;

    #[test]
    fn unseen_peer_starts_at_default() {
        let table = ReputationTable::new();
        assert_eq!(table.score_of("peer-a"), DEFAULT_REPUTATION);
    }

    #[test]
    fn penalties_lower_score_and_rewards_raise_it() {
        let table = ReputationTable::new();
        table.penalize("peer-a", PENALTY_RATE_LIMITED);
        table.penalize("peer-a", PENALTY_RATE_LIMITED);
        assert!(table.score_of("peer-a") < DEFAULT_REPUTATION);

        table.reward("peer-b", REWARD_VERIFIED_POST);
        assert!(table.score_of("peer-b") > DEFAULT_REPUTATION);
    }

    #[test]
    fn score_is_clamped_to_bounds() {
        let table = ReputationTable::new();
        for _ in 0..100 {
            table.penalize("peer-a", PENALTY_VERIFICATION_FAILED);
        }
        assert_eq!(table.score_of("peer-a"), MIN_REPUTATION);
        for _ in 0..100 {
            table.reward("peer-b", REWARD_VERIFIED_POST);
        }
        assert_eq!(table.score_of("peer-b"), MAX_REPUTATION);
    }

    #[test]
    fn repeated_rate_limit_violations_trip_scenario_six() {
        // Node K sends enough `new_post` traffic to exceed the per-peer
        // budget; L's view of K's reputation must strictly decrease.
        let table = ReputationTable::new();
        let before = table.score_of("node-k");
        for _ in 0..10 {
            table.penalize("node-k", PENALTY_RATE_LIMITED);
        }
        assert!(table.score_of("node-k") < before);
    }

    #[test]
    fn persists_and_reloads_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledPersistence::open(dir.path().to_str().unwrap()).unwrap();

        let table = ReputationTable::new();
        table.reward("peer-a", REWARD_VERIFIED_POST);
        table.persist(&store);

        let reloaded = ReputationTable::load(&store);
        assert_eq!(reloaded.score_of("peer-a"), table.score_of("peer-a"));
    }
}
