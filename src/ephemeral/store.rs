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

//! The Ephemeral Store: carrier-driven post lifecycle, heat/priority
//! ranking, and memory-pressure eviction.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::{debug, info};

use crate::core::types::{now_ms, ProtocolConfig, TimestampMs};
use crate::posts::engine::PostSink;
use crate::posts::model::Post;
use crate::posts::rating::{Rating, Vote};

const MAX_DEPTH: u8 = 5;

/// A post plus the ephemeral fields the store mutates over its lifetime.
///
/// `carriers` holds only explicit carries added via [`EphemeralStore::toggle_carry`]
/// or a remote `carrier_update`. The author is an implicit carrier for the
/// purposes of the `heat` formula, but does not by itself protect a post
/// from eviction — "no carriers" (the eviction-candidate condition) means no
/// *explicit* carrier remains.
pub struct StoredPost {
    post: Post,
    depth: u8,
    carriers: HashSet<String>,
    replies: HashSet<String>,
    attesters: HashMap<Vec<u8>, TimestampMs>,
    rating: Rating,
}

impl StoredPost {
    /// Explicit carrier handles (excludes the author's implicit carry).
    pub fn carriers(&self) -> &HashSet<String> {
        &self.carriers
    }

    /// Direct reply post ids.
    pub fn replies(&self) -> &HashSet<String> {
        &self.replies
    }

    /// The underlying signed post.
    pub fn post(&self) -> &Post {
        &self.post
    }

    /// `heat = carriers + 2 × replies`, counting the author's implicit carry.
    pub fn heat(&self) -> f64 {
        1.0 + self.carriers.len() as f64 + 2.0 * self.replies.len() as f64
    }

    /// `priority = heat / (age_hours + 1)^1.5`.
    pub fn priority(&self, now: TimestampMs) -> f64 {
        let age_hours = now.saturating_sub(self.post.timestamp) as f64 / 3_600_000.0;
        self.heat() / (age_hours + 1.0).powf(1.5)
    }

    /// Whether any handle other than the author still explicitly carries
    /// this post.
    fn has_explicit_carrier(&self) -> bool {
        !self.carriers.is_empty()
    }
}

/// The Ephemeral Store: a bounded, priority-evicted collection of posts.
pub struct EphemeralStore {
    protocol: ProtocolConfig,
    posts: Mutex<HashMap<String, StoredPost>>,
}

impl EphemeralStore {
    /// Construct an empty store with the given protocol tunables.
    pub fn new(protocol: ProtocolConfig) -> Self {
        Self {
            protocol,
            posts: Mutex::new(HashMap::new()),
        }
    }

    /// Insert a freshly-accepted post. The author is always an implicit
    /// carrier. Posts whose parent chain would exceed `MAX_DEPTH` are
    /// dropped (the invariant `depth ≤ 5` must already hold by the time a
    /// post reaches the store).
    pub fn insert(&self, post: Post) {
        let mut posts = self.posts.lock().expect("lock");
        if posts.contains_key(&post.id) {
            return;
        }

        let depth = match &post.parent_id {
            None => 0,
            Some(parent_id) => match posts.get(parent_id) {
                Some(parent) if parent.depth < MAX_DEPTH => parent.depth + 1,
                Some(_) => {
                    debug!(post_id = %post.id, "dropping post: parent already at max depth");
                    return;
                }
                None => 0,
            },
        };

        let parent_id = post.parent_id.clone();
        let id = post.id.clone();
        posts.insert(
            id.clone(),
            StoredPost {
                post,
                depth,
                carriers: HashSet::new(),
                replies: HashSet::new(),
                attesters: HashMap::new(),
                rating: Rating::new(),
            },
        );

        if let Some(parent_id) = parent_id {
            if let Some(parent) = posts.get_mut(&parent_id) {
                parent.replies.insert(id);
            }
        }

        if posts.len() > self.protocol.max_posts {
            drop(posts);
            self.gc_tick();
        }
    }

    /// Record an attestation's contribution (trust bookkeeping already done
    /// by the Post Engine; the store just remembers who attested and when).
    pub fn record_attester(&self, post_id: &str, attester_pub: Vec<u8>, at: TimestampMs) {
        if let Some(p) = self.posts.lock().expect("lock").get_mut(post_id) {
            p.attesters.insert(attester_pub, at);
        }
    }

    /// Toggle the local handle's carry on a post. Returns `Some(now_carrying)`
    /// if the post exists, `None` otherwise. The caller is responsible for
    /// broadcasting the resulting `carrier_update`.
    pub fn toggle_carry(&self, post_id: &str, local_handle: &str) -> Option<bool> {
        let mut posts = self.posts.lock().expect("lock");
        let post = posts.get_mut(post_id)?;
        let now_carrying = if post.carriers.remove(local_handle) {
            false
        } else {
            post.carriers.insert(local_handle.to_string());
            true
        };
        Some(now_carrying)
    }

    /// Apply a remote carrier_update: `carrying = true` adds `handle`,
    /// `false` removes it.
    pub fn apply_carrier_update(&self, post_id: &str, handle: &str, carrying: bool) {
        if let Some(post) = self.posts.lock().expect("lock").get_mut(post_id) {
            if carrying {
                post.carriers.insert(handle.to_string());
            } else {
                post.carriers.remove(handle);
            }
        }
    }

    /// Cast or update a vote on a post, given the voter's current reputation.
    pub fn vote(&self, post_id: &str, voter_handle: &str, vote: Vote, reputation: f64) {
        if let Some(post) = self.posts.lock().expect("lock").get_mut(post_id) {
            post.rating.vote(voter_handle, vote, reputation);
        }
    }

    /// The posterior rating score for a post, if present.
    pub fn score(&self, post_id: &str) -> Option<f64> {
        self.posts.lock().expect("lock").get(post_id).map(|p| p.rating.score())
    }

    /// Number of posts currently held.
    pub fn len(&self) -> usize {
        self.posts.lock().expect("lock").len()
    }

    /// Whether the store holds no posts.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Posts a peer doesn't already have, for `request_posts` catch-up sync:
    /// every held post whose id is absent from `known_ids`, optionally
    /// restricted to a single topic, highest-priority first, capped at `limit`.
    pub fn posts_for_sync(&self, known_ids: &[String], topic: Option<&str>, limit: usize) -> Vec<Post> {
        let now = now_ms();
        let known: HashSet<&str> = known_ids.iter().map(String::as_str).collect();
        let posts = self.posts.lock().expect("lock");
        let mut candidates: Vec<(&StoredPost, f64)> = posts
            .values()
            .filter(|p| !known.contains(p.post.id.as_str()))
            .filter(|p| match topic {
                Some(t) => crate::scribe::topics::extract_topics(&p.post.content)
                    .iter()
                    .any(|extracted| extracted == t),
                None => true,
            })
            .map(|p| (p, p.priority(now)))
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
        candidates.truncate(limit);
        candidates.into_iter().map(|(p, _)| p.post.clone()).collect()
    }

    /// The `n` highest-priority thread roots (posts with no parent),
    /// highest first.
    pub fn top_heat(&self, n: usize) -> Vec<String> {
        let now = now_ms();
        let posts = self.posts.lock().expect("lock");
        let mut roots: Vec<_> = posts
            .values()
            .filter(|p| p.post.parent_id.is_none())
            .map(|p| (p.post.id.clone(), p.priority(now)))
            .collect();
        roots.sort_by(|a, b| b.1.total_cmp(&a.1));
        roots.truncate(n);
        roots.into_iter().map(|(id, _)| id).collect()
    }

    /// Sweep for zero-carrier posts with no carried descendant, and — if
    /// over `max_posts` — evict the lowest-priority remainder. Explicit
    /// carries, and posts that are ancestors of a post with a live carrier,
    /// are never evicted.
    pub fn gc_tick(&self) {
        let now = now_ms();
        let mut posts = self.posts.lock().expect("lock");

        let retained: HashSet<String> = posts
            .keys()
            .filter(|id| Self::retained_transitively(&posts, id))
            .cloned()
            .collect();

        let zero_carrier_dead: Vec<String> = posts
            .keys()
            .filter(|id| !retained.contains(*id))
            .cloned()
            .collect();
        for id in &zero_carrier_dead {
            posts.remove(id);
        }
        if !zero_carrier_dead.is_empty() {
            info!(count = zero_carrier_dead.len(), "evicted zero-carrier posts");
        }

        if posts.len() <= self.protocol.max_posts {
            return;
        }

        let mut ranked: Vec<(String, f64, bool)> = posts
            .iter()
            .map(|(id, p)| (id.clone(), p.priority(now), p.has_explicit_carrier()))
            .collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

        let over_budget = posts.len() - self.protocol.max_posts;
        let mut evicted = 0;
        for (id, _, has_carrier) in ranked {
            if evicted >= over_budget {
                break;
            }
            if has_carrier {
                continue;
            }
            posts.remove(&id);
            evicted += 1;
        }
        if evicted > 0 {
            info!(count = evicted, "evicted posts under memory pressure");
        }
    }

    /// A post survives GC if it has a live carrier itself, or is a
    /// transitive ancestor of a reply with a live carrier.
    fn retained_transitively(posts: &HashMap<String, StoredPost>, id: &str) -> bool {
        let Some(post) = posts.get(id) else { return false };
        if post.has_explicit_carrier() {
            return true;
        }
        post.replies
            .iter()
            .any(|reply_id| Self::retained_transitively(posts, reply_id))
    }
}

impl PostSink for EphemeralStore {
    fn accept(&self, post: Post) {
        self.insert(post);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SignPub, Signature};
    use crate::core::vdf::VdfProof;

    fn post(id: &str, parent_id: Option<&str>, author: &str, timestamp: TimestampMs) -> Post {
        Post {
            id: id.to_string(),
            content: "hi".into(),
            timestamp,
            parent_id: parent_id.map(str::to_string),
            image_hash: None,
            author_handle: author.to_string(),
            author_pub: SignPub(vec![0u8; 32]),
            vdf_input: vec![],
            vdf_proof: VdfProof(vec![]),
            vdf_iterations: 0,
            signature: Signature(vec![0u8; 64]),
        }
    }

    #[test]
    fn author_is_implicit_carrier() {
        let store = EphemeralStore::new(ProtocolConfig::default());
        store.insert(post("p1", None, "alice", now_ms()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn toggle_carry_adds_and_removes() {
        let store = EphemeralStore::new(ProtocolConfig::default());
        store.insert(post("p1", None, "alice", now_ms()));
        assert_eq!(store.toggle_carry("p1", "bob"), Some(true));
        assert_eq!(store.toggle_carry("p1", "bob"), Some(false));
    }

    #[test]
    fn heat_counts_carriers_and_replies() {
        let store = EphemeralStore::new(ProtocolConfig::default());
        let now = now_ms();
        store.insert(post("root", None, "alice", now));
        store.insert(post("reply1", Some("root"), "bob", now));
        store.toggle_carry("root", "carol");
        let posts = store.posts.lock().unwrap();
        let root = posts.get("root").unwrap();
        // heat = 1 (implicit author) + 1 (explicit carol) + 2*1 (reply1) = 4
        assert_eq!(root.heat(), 4.0);
    }

    #[test]
    fn gc_evicts_zero_carrier_posts_with_no_live_descendant() {
        let mut protocol = ProtocolConfig::default();
        protocol.max_posts = 100;
        let store = EphemeralStore::new(protocol);
        let now = now_ms();
        store.insert(post("root", None, "alice", now));
        // no explicit carrier was ever added -> zero-carrier candidate
        store.gc_tick();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn explicit_carry_on_root_survives_gc() {
        let mut protocol = ProtocolConfig::default();
        protocol.max_posts = 100;
        let store = EphemeralStore::new(protocol);
        let now = now_ms();
        store.insert(post("root", None, "alice", now));
        store.toggle_carry("root", "bob");
        store.gc_tick();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn live_carrier_on_reply_retains_ancestor() {
        let mut protocol = ProtocolConfig::default();
        protocol.max_posts = 100;
        let store = EphemeralStore::new(protocol);
        let now = now_ms();
        store.insert(post("root", None, "alice", now));
        store.insert(post("reply", Some("root"), "bob", now));
        // root itself has no explicit carrier, but its reply does
        store.toggle_carry("reply", "carol");
        store.gc_tick();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn eviction_under_pressure_spares_carried_posts() {
        let mut protocol = ProtocolConfig::default();
        protocol.max_posts = 5;
        let store = EphemeralStore::new(protocol);
        let now = now_ms();
        for i in 0..10 {
            store.insert(post(&format!("p{i}"), None, &format!("author{i}"), now));
        }
        // carry the three oldest-looking ids explicitly so they must survive
        store.toggle_carry("p0", "carrier0");
        store.toggle_carry("p1", "carrier1");
        store.toggle_carry("p2", "carrier2");
        store.gc_tick();
        assert!(store.len() <= 5);
        assert!(store.posts.lock().unwrap().contains_key("p0"));
        assert!(store.posts.lock().unwrap().contains_key("p1"));
        assert!(store.posts.lock().unwrap().contains_key("p2"));
    }

    #[test]
    fn top_heat_orders_by_priority() {
        let store = EphemeralStore::new(ProtocolConfig::default());
        let now = now_ms();
        store.insert(post("cold", None, "alice", now));
        store.insert(post("hot", None, "bob", now));
        store.toggle_carry("hot", "carol");
        store.toggle_carry("hot", "dave");
        let top = store.top_heat(2);
        assert_eq!(top.first().map(String::as_str), Some("hot"));
    }
}
