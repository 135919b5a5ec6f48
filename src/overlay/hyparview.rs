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

//! HyParView: bounded active (≤5) and passive (≤30) partial views, with
//! join, failure repair, and periodic shuffle.

use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::wire::WireMessage;
use crate::identity::registry::ActiveView;
use crate::transport::sink::PeerSink;

/// Maximum active-view size.
pub const MAX_ACTIVE: usize = 5;
/// Maximum passive-view size.
pub const MAX_PASSIVE: usize = 30;
/// `FORWARDJOIN` initial TTL (active random walk length).
pub const K_AR: u32 = 6;
/// Shuffle sample size drawn from each view.
pub const SHUFFLE_SAMPLE: usize = 6;
/// Shuffle period.
pub const SHUFFLE_INTERVAL_SECS: u64 = 30;

/// Priority requested on a `NEIGHBOR` message: `high` forces acceptance,
/// `low` may be declined if the recipient's active view is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// May be declined.
    Low,
    /// Must be accepted, evicting another active member if necessary.
    High,
}

/// HyParView wire subtypes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "subtype")]
pub enum HyParViewMsg {
    /// A new node requesting to join via a bootstrap peer.
    #[serde(rename = "JOIN")]
    Join,
    /// Forwarded join walk, decremented at each hop.
    #[serde(rename = "FORWARDJOIN")]
    ForwardJoin {
        /// The node id (wire peer id) that originally joined.
        origin: String,
        /// Remaining hops.
        ttl: u32,
    },
    /// Request to become an active neighbor.
    #[serde(rename = "NEIGHBOR")]
    Neighbor {
        /// Requested priority.
        priority: Priority,
    },
    /// Demote/drop the recipient from the sender's active view.
    #[serde(rename = "DISCONNECT")]
    Disconnect,
    /// Periodic view-mixing sample.
    #[serde(rename = "SHUFFLE")]
    Shuffle {
        /// Sample of peer ids drawn from both views.
        set: Vec<String>,
        /// Remaining hops.
        ttl: u32,
    },
    /// Reply to a `SHUFFLE`, carrying a same-sized sample.
    #[serde(rename = "SHUFFLEREPLY")]
    ShuffleReply {
        /// Sample of peer ids.
        set: Vec<String>,
    },
}

struct Views {
    active: Vec<String>,
    passive: Vec<String>,
}

/// The HyParView overlay component.
pub struct HyParView {
    self_ref: String,
    views: Mutex<Views>,
    sink: Arc<dyn PeerSink>,
}

impl HyParView {
    /// Construct a fresh overlay for `self_ref` (this node's wire peer id).
    pub fn new(self_ref: String, sink: Arc<dyn PeerSink>) -> Self {
        Self {
            self_ref,
            views: Mutex::new(Views {
                active: Vec::new(),
                passive: Vec::new(),
            }),
            sink,
        }
    }

    /// Current active view, snapshot.
    pub fn active_view(&self) -> Vec<String> {
        self.views.lock().expect("lock").active.clone()
    }

    /// Current passive view, snapshot.
    pub fn passive_view(&self) -> Vec<String> {
        self.views.lock().expect("lock").passive.clone()
    }

    fn add_active(&self, views: &mut Views, peer: String) {
        if peer == self.self_ref || views.active.contains(&peer) {
            return;
        }
        if views.active.len() >= MAX_ACTIVE {
            let mut rng = rand::thread_rng();
            let idx = rng.gen_range(0..views.active.len());
            let evicted = views.active.remove(idx);
            self.sink.send(&evicted, WireMessage::HyParView(HyParViewMsg::Disconnect));
            Self::add_passive_inner(views, evicted);
        }
        views.active.push(peer);
    }

    fn add_passive_inner(views: &mut Views, peer: String) {
        if views.passive.contains(&peer) || views.active.contains(&peer) {
            return;
        }
        if views.passive.len() >= MAX_PASSIVE {
            let mut rng = rand::thread_rng();
            let idx = rng.gen_range(0..views.passive.len());
            views.passive.remove(idx);
        }
        views.passive.push(peer);
    }

    fn add_passive(&self, peer: String) {
        let mut views = self.views.lock().expect("lock");
        Self::add_passive_inner(&mut views, peer);
    }

    /// Initiate a join against a bootstrap peer.
    pub fn join(&self, bootstrap: &str) {
        self.sink.send(bootstrap, WireMessage::HyParView(HyParViewMsg::Join));
    }

    /// Handle an inbound `JOIN`: add the sender to our active view and
    /// forward `FORWARDJOIN` to the rest of our active peers.
    pub fn handle_join(&self, sender: &str) {
        let mut views = self.views.lock().expect("lock");
        self.add_active(&mut views, sender.to_string());
        let others: Vec<String> = views
            .active
            .iter()
            .filter(|p| p.as_str() != sender)
            .cloned()
            .collect();
        drop(views);

        for peer in others {
            self.sink.send(
                &peer,
                WireMessage::HyParView(HyParViewMsg::ForwardJoin {
                    origin: sender.to_string(),
                    ttl: K_AR,
                }),
            );
        }
    }

    /// Handle an inbound `FORWARDJOIN`: at `ttl == 0` (or an empty active
    /// view) adopt the origin into our active view (passive if full);
    /// otherwise decrement and forward to one random active peer.
    pub fn handle_forward_join(&self, sender: &str, origin: String, ttl: u32) {
        let _ = sender;
        if ttl == 0 {
            let mut views = self.views.lock().expect("lock");
            if views.active.len() < MAX_ACTIVE {
                self.add_active(&mut views, origin);
            } else {
                Self::add_passive_inner(&mut views, origin);
            }
            return;
        }

        let next = {
            let views = self.views.lock().expect("lock");
            views
                .active
                .iter()
                .filter(|p| p.as_str() != origin)
                .cloned()
                .collect::<Vec<_>>()
                .choose(&mut rand::thread_rng())
                .cloned()
        };

        match next {
            Some(peer) => self.sink.send(
                &peer,
                WireMessage::HyParView(HyParViewMsg::ForwardJoin {
                    origin,
                    ttl: ttl - 1,
                }),
            ),
            None => {
                let mut views = self.views.lock().expect("lock");
                self.add_active(&mut views, origin);
            }
        }
    }

    /// Handle an inbound `NEIGHBOR` request.
    pub fn handle_neighbor(&self, sender: &str, priority: Priority) -> bool {
        let mut views = self.views.lock().expect("lock");
        if priority == Priority::High || views.active.len() < MAX_ACTIVE {
            self.add_active(&mut views, sender.to_string());
            true
        } else {
            false
        }
    }

    /// Handle an inbound `DISCONNECT`: demote the sender to passive.
    pub fn handle_disconnect(&self, sender: &str) {
        let mut views = self.views.lock().expect("lock");
        views.active.retain(|p| p != sender);
        drop(views);
        self.add_passive(sender.to_string());
    }

    /// Failure repair: on detecting `failed` is unreachable, remove it from
    /// the active view and walk the passive set with escalating priority
    /// until one accepts.
    pub fn on_peer_failure(&self, failed: &str) {
        {
            let mut views = self.views.lock().expect("lock");
            views.active.retain(|p| p != failed);
        }
        self.repair();
    }

    fn repair(&self) {
        let candidates = {
            let views = self.views.lock().expect("lock");
            let mut c = views.passive.clone();
            c.shuffle(&mut rand::thread_rng());
            c
        };
        // Escalate from low to high priority as candidates are exhausted;
        // since replies are asynchronous, we optimistically fire a low
        // priority NEIGHBOR to the first candidate and a high priority one
        // to the rest, letting whichever answers first win the slot.
        for (i, peer) in candidates.into_iter().enumerate() {
            let priority = if i == 0 { Priority::Low } else { Priority::High };
            self.sink
                .send(&peer, WireMessage::HyParView(HyParViewMsg::Neighbor { priority }));
        }
    }

    /// Periodic shuffle: sample both views and send to a random active peer.
    pub fn shuffle_tick(&self) {
        let (target, sample) = {
            let views = self.views.lock().expect("lock");
            let Some(target) = views.active.choose(&mut rand::thread_rng()).cloned() else {
                return;
            };
            let mut pool: Vec<String> = views
                .active
                .iter()
                .chain(views.passive.iter())
                .cloned()
                .collect();
            pool.shuffle(&mut rand::thread_rng());
            pool.truncate(SHUFFLE_SAMPLE);
            (target, pool)
        };
        self.sink.send(
            &target,
            WireMessage::HyParView(HyParViewMsg::Shuffle {
                set: sample,
                ttl: K_AR,
            }),
        );
    }

    /// Handle an inbound `SHUFFLE`: at `ttl == 0` reply with a same-sized
    /// sample and merge the received sample into our passive view;
    /// otherwise forward decremented to a random active peer.
    pub fn handle_shuffle(&self, sender: &str, set: Vec<String>, ttl: u32) {
        if ttl == 0 {
            let reply_sample = {
                let views = self.views.lock().expect("lock");
                let mut pool: Vec<String> = views
                    .active
                    .iter()
                    .chain(views.passive.iter())
                    .cloned()
                    .collect();
                pool.shuffle(&mut rand::thread_rng());
                pool.truncate(set.len().max(1));
                pool
            };
            self.sink.send(
                sender,
                WireMessage::HyParView(HyParViewMsg::ShuffleReply { set: reply_sample }),
            );
            for peer in set {
                self.add_passive(peer);
            }
            return;
        }

        let next = {
            let views = self.views.lock().expect("lock");
            views
                .active
                .iter()
                .filter(|p| p.as_str() != sender)
                .cloned()
                .collect::<Vec<_>>()
                .choose(&mut rand::thread_rng())
                .cloned()
        };
        match next {
            Some(peer) => self.sink.send(
                &peer,
                WireMessage::HyParView(HyParViewMsg::Shuffle { set, ttl: ttl - 1 }),
            ),
            None => {
                for peer in set {
                    self.add_passive(peer);
                }
            }
        }
    }

    /// Handle an inbound `SHUFFLEREPLY`: merge the received sample into our
    /// passive view.
    pub fn handle_shuffle_reply(&self, set: Vec<String>) {
        for peer in set {
            self.add_passive(peer);
        }
    }
}

impl ActiveView for HyParView {
    fn active_peer_refs(&self) -> Vec<String> {
        self.active_view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sink::RecordingSink;

    #[test]
    fn join_adds_sender_to_active_and_forwards() {
        let sink = Arc::new(RecordingSink::default());
        let hv = HyParView::new("self".into(), sink.clone());
        // Seed one existing active peer so FORWARDJOIN has somewhere to go.
        {
            let mut views = hv.views.lock().unwrap();
            views.active.push("existing".into());
        }
        hv.handle_join("newcomer");
        assert!(hv.active_view().contains(&"newcomer".to_string()));
        let sent = sink.drain();
        assert!(sent
            .iter()
            .any(|(p, _)| p == "existing"));
    }

    #[test]
    fn active_view_never_exceeds_cap() {
        let sink = Arc::new(RecordingSink::default());
        let hv = HyParView::new("self".into(), sink);
        for i in 0..20 {
            hv.handle_join(&format!("peer{i}"));
        }
        assert!(hv.active_view().len() <= MAX_ACTIVE);
    }

    #[test]
    fn passive_view_never_exceeds_cap() {
        let sink = Arc::new(RecordingSink::default());
        let hv = HyParView::new("self".into(), sink);
        for i in 0..60 {
            hv.add_passive(format!("peer{i}"));
        }
        assert!(hv.passive_view().len() <= MAX_PASSIVE);
    }
}
