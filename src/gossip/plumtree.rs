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

//! Plumtree: epidemic broadcast over HyParView's active view. Maintains an
//! eager-push tree (defaulting to every active peer) and a lazy-push set,
//! optimized at runtime via GRAFT/PRUNE so steady-state traffic flows over a
//! spanning tree while IHAVE announcements repair partitions and races.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::types::now_ms;
use crate::core::wire::{b64, WireMessage};
use crate::identity::registry::ActiveView;
use crate::transport::sink::PeerSink;

/// Delay before announcing a fresh broadcast to lazy peers.
pub const LAZY_DELAY: Duration = Duration::from_millis(100);
/// Delay before pruning a duplicate-forwarding eager peer.
pub const PRUNE_DELAY: Duration = Duration::from_secs(1);
/// How long to wait for a GRAFT'd message before giving up.
pub const MISSING_TIMEOUT: Duration = Duration::from_secs(3);
/// Maximum dedup-history entries retained.
pub const HISTORY_CAP: usize = 10_000;
/// Maximum age of a dedup-history entry.
pub const HISTORY_MAX_AGE_MS: u64 = 3_600_000;

/// Plumtree wire subtypes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "subtype")]
pub enum PlumtreeMsg {
    /// A broadcast payload, opaque to the gossip layer beyond its id.
    #[serde(rename = "GOSSIP")]
    Gossip {
        /// Message id used for deduplication.
        id: String,
        /// Opaque encoded payload (typically an encoded [`WireMessage`]).
        #[serde(with = "b64")]
        payload: Vec<u8>,
        /// Remaining hops; `0` means tree-mode (no hop bound). Only the
        /// bounded-fanout fallback in [`crate::gossip::fanout`] sets this.
        #[serde(default)]
        ttl: u32,
    },
    /// Announcement of known ids, sent to lazy peers.
    #[serde(rename = "IHAVE")]
    IHave {
        /// Ids the sender holds.
        ids: Vec<String>,
    },
    /// Request to re-send a message by id, also grafts the sender to eager.
    #[serde(rename = "GRAFT")]
    Graft {
        /// Requested message id.
        id: String,
    },
    /// Demote the recipient from eager to lazy.
    #[serde(rename = "PRUNE")]
    Prune,
}

struct History {
    seen_at: HashMap<String, u64>,
    order: VecDeque<String>,
}

impl History {
    fn new() -> Self {
        Self {
            seen_at: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.seen_at.contains_key(id)
    }

    fn insert(&mut self, id: String, now: u64) {
        if self.seen_at.contains_key(&id) {
            return;
        }
        self.seen_at.insert(id.clone(), now);
        self.order.push_back(id);
        self.evict(now);
    }

    fn evict(&mut self, now: u64) {
        while let Some(front) = self.order.front() {
            let expired = self
                .seen_at
                .get(front)
                .map(|t| now.saturating_sub(*t) > HISTORY_MAX_AGE_MS)
                .unwrap_or(true);
            if expired {
                let id = self.order.pop_front().unwrap();
                self.seen_at.remove(&id);
            } else {
                break;
            }
        }
        while self.order.len() > HISTORY_CAP {
            if let Some(id) = self.order.pop_front() {
                self.seen_at.remove(&id);
            }
        }
    }
}

struct State {
    eager: HashSet<String>,
    lazy: HashSet<String>,
    history: History,
    /// Ids currently under a GRAFT missing-timeout, so arrival can cancel it.
    awaiting: HashSet<String>,
}

struct Inner {
    self_ref: String,
    active: Arc<dyn ActiveView>,
    sink: Arc<dyn PeerSink>,
    state: Mutex<State>,
    deliver_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

/// The Plumtree gossip component. Cheaply `Clone`able (wraps an `Arc`).
#[derive(Clone)]
pub struct Plumtree {
    inner: Arc<Inner>,
}

impl Plumtree {
    /// Construct a new Plumtree instance. Delivered (first-seen) payloads are
    /// pushed to `deliver_tx` as `(id, payload)` for the owning layer to decode.
    pub fn new(
        self_ref: String,
        active: Arc<dyn ActiveView>,
        sink: Arc<dyn PeerSink>,
        deliver_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                self_ref,
                active,
                sink,
                state: Mutex::new(State {
                    eager: HashSet::new(),
                    lazy: HashSet::new(),
                    history: History::new(),
                    awaiting: HashSet::new(),
                }),
                deliver_tx,
            }),
        }
    }

    /// Active peers not yet classified default to eager, per the
    /// "eager-push set defaults to all active peers" rule.
    fn eager_targets(&self, state: &mut State, exclude: Option<&str>) -> Vec<String> {
        let active: HashSet<String> = self.inner.active.active_peer_refs().into_iter().collect();
        state.lazy.retain(|p| active.contains(p));
        state.eager.retain(|p| active.contains(p));
        active
            .iter()
            .filter(|p| !state.lazy.contains(*p))
            .filter(|p| Some(p.as_str()) != exclude)
            .cloned()
            .collect()
    }

    fn lazy_targets(&self, state: &State) -> Vec<String> {
        state.lazy.iter().cloned().collect()
    }

    /// Originate a brand-new broadcast.
    pub fn broadcast(&self, id: String, payload: Vec<u8>) {
        {
            let mut state = self.inner.state.lock().expect("lock");
            state.history.insert(id.clone(), now_ms());
        }
        self.push_eager(&id, &payload, None);
        self.schedule_lazy_announce(id);
    }

    fn push_eager(&self, id: &str, payload: &[u8], exclude: Option<&str>) {
        let targets = {
            let mut state = self.inner.state.lock().expect("lock");
            self.eager_targets(&mut state, exclude)
        };
        for peer in targets {
            self.inner.sink.send(
                &peer,
                WireMessage::Plumtree(PlumtreeMsg::Gossip {
                    id: id.to_string(),
                    payload: payload.to_vec(),
                    ttl: 0,
                }),
            );
        }
    }

    fn schedule_lazy_announce(&self, id: String) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(LAZY_DELAY).await;
            let targets = {
                let state = this.inner.state.lock().expect("lock");
                this.lazy_targets(&state)
            };
            for peer in targets {
                this.inner.sink.send(
                    &peer,
                    WireMessage::Plumtree(PlumtreeMsg::IHave { ids: vec![id.clone()] }),
                );
            }
        });
    }

    /// Handle an inbound `GOSSIP`.
    pub fn handle_gossip(&self, sender: &str, id: String, payload: Vec<u8>) {
        let first_seen = {
            let mut state = self.inner.state.lock().expect("lock");
            let was_new = !state.history.contains(&id);
            state.history.insert(id.clone(), now_ms());
            state.awaiting.remove(&id);
            was_new
        };

        if first_seen {
            let _ = self.inner.deliver_tx.send((id.clone(), payload.clone()));
            self.push_eager(&id, &payload, Some(sender));
            self.schedule_lazy_announce(id.clone());

            let mut state = self.inner.state.lock().expect("lock");
            if !state.eager.contains(sender) {
                state.lazy.remove(sender);
                state.eager.insert(sender.to_string());
            }
        } else {
            self.schedule_prune(sender.to_string(), id);
        }
    }

    fn schedule_prune(&self, sender: String, id: String) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PRUNE_DELAY).await;
            let should_prune = {
                let state = this.inner.state.lock().expect("lock");
                state.eager.contains(&sender)
            };
            if should_prune {
                this.inner
                    .sink
                    .send(&sender, WireMessage::Plumtree(PlumtreeMsg::Prune));
                let mut state = this.inner.state.lock().expect("lock");
                state.eager.remove(&sender);
                state.lazy.insert(sender.clone());
            }
            debug!(id = %id, peer = %sender, "plumtree duplicate gossip handled");
        });
    }

    /// Handle an inbound `IHAVE`.
    pub fn handle_ihave(&self, sender: &str, ids: Vec<String>) {
        for id in ids {
            let unknown = {
                let mut state = self.inner.state.lock().expect("lock");
                let unknown = !state.history.contains(&id) && !state.awaiting.contains(&id);
                if unknown {
                    state.awaiting.insert(id.clone());
                }
                unknown
            };
            if !unknown {
                continue;
            }
            self.inner
                .sink
                .send(sender, WireMessage::Plumtree(PlumtreeMsg::Graft { id: id.clone() }));

            let this = self.clone();
            let sender = sender.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(MISSING_TIMEOUT).await;
                let mut state = this.inner.state.lock().expect("lock");
                if state.awaiting.remove(&id) {
                    debug!(%id, peer = %sender, "plumtree missing-message timed out, dropping");
                }
            });
        }
    }

    /// Handle an inbound `GRAFT`: promote the sender to eager and, if we
    /// hold the requested payload, re-send it immediately.
    pub fn handle_graft(&self, sender: &str, id: &str, payload: Option<&[u8]>) {
        {
            let mut state = self.inner.state.lock().expect("lock");
            state.lazy.remove(sender);
            state.eager.insert(sender.to_string());
        }
        if let Some(payload) = payload {
            self.inner.sink.send(
                sender,
                WireMessage::Plumtree(PlumtreeMsg::Gossip {
                    id: id.to_string(),
                    payload: payload.to_vec(),
                    ttl: 0,
                }),
            );
        }
    }

    /// Handle an inbound `PRUNE`: demote the sender to lazy.
    pub fn handle_prune(&self, sender: &str) {
        let mut state = self.inner.state.lock().expect("lock");
        state.eager.remove(sender);
        state.lazy.insert(sender.to_string());
    }

    /// Whether a message id has already been seen (used by callers deciding
    /// whether the fanout fallback should also suppress it).
    pub fn has_seen(&self, id: &str) -> bool {
        self.inner.state.lock().expect("lock").history.contains(id)
    }

    /// Current eager-push set size, used to decide whether the active view
    /// is still too small for tree-shaped gossip to converge.
    pub fn eager_len(&self) -> usize {
        self.inner.state.lock().expect("lock").eager.len()
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

    fn make(active: Vec<String>) -> (Plumtree, Arc<RecordingSink>, mpsc::UnboundedReceiver<(String, Vec<u8>)>) {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let pt = Plumtree::new(
            "self".into(),
            Arc::new(FixedActive(active)),
            sink.clone(),
            tx,
        );
        (pt, sink, rx)
    }

    #[test]
    fn broadcast_pushes_eager_to_all_active_peers() {
        let (pt, sink, _rx) = make(vec!["a".into(), "b".into(), "c".into()]);
        pt.broadcast("m1".into(), vec![1, 2, 3]);
        let sent = sink.drain();
        assert_eq!(sent.len(), 3);
    }

    #[tokio::test]
    async fn first_seen_gossip_delivers_and_forwards() {
        let (pt, sink, mut rx) = make(vec!["a".into(), "b".into()]);
        pt.handle_gossip("a", "m1".into(), vec![9]);
        let (id, payload) = rx.recv().await.unwrap();
        assert_eq!(id, "m1");
        assert_eq!(payload, vec![9]);
        let sent = sink.drain();
        assert!(sent.iter().any(|(p, _)| p == "b"));
        assert!(!sent.iter().any(|(p, _)| p == "a"));
    }

    #[test]
    fn duplicate_gossip_does_not_redeliver() {
        let (pt, _sink, mut rx) = make(vec!["a".into()]);
        pt.handle_gossip("a", "m1".into(), vec![1]);
        pt.handle_gossip("a", "m1".into(), vec![1]);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn prune_demotes_sender_to_lazy() {
        let (pt, _sink, _rx) = make(vec!["a".into()]);
        pt.handle_gossip("a", "m1".into(), vec![1]);
        assert!(pt.inner.state.lock().unwrap().eager.contains("a"));
        pt.handle_prune("a");
        let state = pt.inner.state.lock().unwrap();
        assert!(!state.eager.contains("a"));
        assert!(state.lazy.contains("a"));
    }
}
