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

//! Connection- and message-level rate limiting.
//!
//! Two independent limiters guard the swarm: an IP-level connection limiter
//! (caps how often a single address may dial in before it is temporarily
//! blocked) and a per-peer, per-message-type limiter (caps how often an
//! already-connected peer may send `new_post`/`parent_update` traffic, per
//! [`ProtocolConfig::rate_limit_messages`]/[`ProtocolConfig::rate_limit_window_secs`]).

use std::net::IpAddr;
use std::time::{Duration, Instant};

use gcra::GcraState;
pub use gcra::RateLimit;
use lru_time_cache::LruCache;

use crate::core::types::ProtocolConfig;

const CONN_ATTEMPTS_PER_WINDOW: u32 = 10;
const CONN_WINDOW: Duration = Duration::from_secs(60);
const CONN_BLOCK: Duration = Duration::from_secs(5 * 60);

/// Message classes subject to the per-peer limiter. Only these two are named
/// by the per-peer budget; everything else (DHT/overlay/gossip control
/// traffic) is left ungoverned here since it is already bounded structurally
/// (fixed active/passive view sizes, bounded fanout).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LimitedKind {
    /// A freshly authored or relayed post.
    NewPost,
    /// A Scribe parent-update control message.
    ParentUpdate,
}

/// Tracks resource consumption per key, forgetting keys after a period of
/// inactivity.
struct RateLimiter<K> {
    cache: LruCache<K, GcraState>,
}

impl<K: Ord + Clone> RateLimiter<K> {
    fn new(ttl: Duration) -> Self {
        Self {
            cache: LruCache::with_expiry_duration(ttl),
        }
    }

    fn add_at(&mut self, limit: &RateLimit, key: K, cost: u32, at: Instant) -> bool {
        #[allow(clippy::unwrap_or_default)]
        let state = self.cache.entry(key).or_insert_with(GcraState::default);
        state.check_and_modify_at(limit, at, cost).is_ok()
    }
}

/// Combined IP-connection and per-peer-message limiter for the swarm.
pub struct TransportLimits {
    conn_limit: RateLimit,
    conn: RateLimiter<IpAddr>,
    blocked: LruCache<IpAddr, ()>,
    msg_limit: RateLimit,
    msg: RateLimiter<(String, LimitedKind)>,
}

impl TransportLimits {
    /// Build limiters from the node's protocol configuration.
    pub fn new(protocol: &ProtocolConfig) -> Self {
        let msg_window = Duration::from_secs(protocol.rate_limit_window_secs.max(1));
        Self {
            conn_limit: RateLimit::new(CONN_ATTEMPTS_PER_WINDOW, CONN_WINDOW),
            conn: RateLimiter::new(CONN_WINDOW),
            blocked: LruCache::with_expiry_duration(CONN_BLOCK),
            msg_limit: RateLimit::new(protocol.rate_limit_messages, msg_window),
            msg: RateLimiter::new(msg_window),
        }
    }

    /// Record a dial-in attempt from `addr`. Returns `false` if the address
    /// is currently blocked or has just tripped the connection-attempt limit
    /// (which blocks it for [`CONN_BLOCK`]).
    pub fn allow_connection(&mut self, addr: IpAddr) -> bool {
        if self.blocked.get(&addr).is_some() {
            return false;
        }
        let now = Instant::now();
        if self.conn.add_at(&self.conn_limit, addr, 1, now) {
            true
        } else {
            self.blocked.insert(addr, ());
            false
        }
    }

    /// Record one message of `kind` from `peer_ref`. Returns `false` if the
    /// peer has exceeded its per-window message budget for that kind.
    pub fn allow_message(&mut self, peer_ref: &str, kind: LimitedKind) -> bool {
        let now = Instant::now();
        self.msg.add_at(&self.msg_limit, (peer_ref.to_string(), kind), 1, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn config() -> ProtocolConfig {
        let mut p = ProtocolConfig::default();
        p.rate_limit_messages = 3;
        p.rate_limit_window_secs = 60;
        p
    }

    #[test]
    fn blocks_an_address_after_too_many_connection_attempts() {
        let mut limits = TransportLimits::new(&config());
        let addr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        for _ in 0..CONN_ATTEMPTS_PER_WINDOW {
            assert!(limits.allow_connection(addr));
        }
        assert!(!limits.allow_connection(addr));
    }

    #[test]
    fn per_peer_message_budget_is_independent_per_kind() {
        let mut limits = TransportLimits::new(&config());
        for _ in 0..3 {
            assert!(limits.allow_message("peer-a", LimitedKind::NewPost));
        }
        assert!(!limits.allow_message("peer-a", LimitedKind::NewPost));
        // A different kind has its own budget.
        assert!(limits.allow_message("peer-a", LimitedKind::ParentUpdate));
        // A different peer has its own budget too.
        assert!(limits.allow_message("peer-b", LimitedKind::NewPost));
    }
}
