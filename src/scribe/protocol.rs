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

//! Scribe: a DHT-rendezvous topic multicast tree. The rendezvous node for a
//! topic `T` is `node_id = SHA1(T)`; `JOIN` travels hop-by-hop toward it,
//! each intermediate node either accepting the joiner as a child (if
//! already on the tree and under `max_children`) or forwarding onward.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::types::NodeId;
use crate::core::wire::WireMessage;
use crate::dht::node::DhtNode;
use crate::transport::sink::PeerSink;

/// Maximum children accepted per topic tree node.
pub const MAX_CHILDREN: usize = 16;
/// Per-topic dedup-history cap.
pub const DEDUP_CAP: usize = 1_000;
/// Interval at which a node heartbeats its children.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// A child abandons a silent parent after this long.
pub const TREE_REPAIR_TIMEOUT: Duration = Duration::from_secs(60);

/// Scribe wire subtypes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "subtype")]
pub enum ScribeMsg {
    /// Request to join `topic`'s multicast tree.
    #[serde(rename = "JOIN")]
    Join {
        /// Topic being joined.
        topic: String,
    },
    /// Accept the sender as a child on `topic`.
    #[serde(rename = "JOIN_ACK")]
    JoinAck {
        /// Topic the join was accepted for.
        topic: String,
    },
    /// Decline the sender's join (tree-wide capacity exhausted on this path).
    #[serde(rename = "JOIN_REJECT")]
    JoinReject {
        /// Topic the join was rejected for.
        topic: String,
    },
    /// Leave `topic`'s tree, detaching the sender from the recipient.
    #[serde(rename = "LEAVE")]
    Leave {
        /// Topic being left.
        topic: String,
    },
    /// A multicast payload for `topic`.
    #[serde(rename = "MULTICAST")]
    Multicast {
        /// Target topic.
        topic: String,
        /// Message id, for per-topic deduplication.
        id: String,
        /// Opaque payload.
        #[serde(with = "crate::core::wire::b64")]
        payload: Vec<u8>,
    },
    /// Parent-to-child liveness signal.
    #[serde(rename = "HEARTBEAT")]
    Heartbeat {
        /// Topic the heartbeat covers.
        topic: String,
    },
    /// Notifies children that the path toward the rendezvous broke upstream.
    #[serde(rename = "PARENT_FAILED")]
    ParentFailed {
        /// Affected topic.
        topic: String,
    },
}

struct TopicDedup {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl TopicDedup {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn mark(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > DEDUP_CAP {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}

struct TopicState {
    parent: Option<String>,
    children: Vec<String>,
    subscribed_locally: bool,
    dedup: TopicDedup,
    last_heartbeat_at: u64,
}

impl TopicState {
    fn new() -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            subscribed_locally: false,
            dedup: TopicDedup::new(),
            last_heartbeat_at: crate::core::types::now_ms(),
        }
    }

    fn on_tree(&self) -> bool {
        self.parent.is_some() || !self.children.is_empty() || self.subscribed_locally
    }
}

/// Extract the rendezvous node id for a topic string.
pub fn rendezvous_id(topic: &str) -> NodeId {
    NodeId::sha1_of(topic.as_bytes())
}

/// The Scribe multicast component.
pub struct Scribe {
    self_ref: String,
    self_id: NodeId,
    dht: Arc<DhtNode>,
    sink: Arc<dyn PeerSink>,
    topics: Mutex<HashMap<String, TopicState>>,
    deliver_tx: mpsc::UnboundedSender<(String, String, Vec<u8>)>,
}

impl Scribe {
    /// Construct a new Scribe component. Delivered multicast payloads are
    /// pushed to `deliver_tx` as `(topic, id, payload)`.
    pub fn new(
        self_ref: String,
        self_id: NodeId,
        dht: Arc<DhtNode>,
        sink: Arc<dyn PeerSink>,
        deliver_tx: mpsc::UnboundedSender<(String, String, Vec<u8>)>,
    ) -> Self {
        Self {
            self_ref,
            self_id,
            dht,
            sink,
            topics: Mutex::new(HashMap::new()),
            deliver_tx,
        }
    }

    fn next_hop_toward(&self, target: &NodeId, exclude: Option<&str>) -> Option<String> {
        self.dht
            .closest_peers(target, 5)
            .into_iter()
            .find(|n| Some(n.peer_ref.as_str()) != exclude && n.peer_ref != self.self_ref)
            .map(|n| n.peer_ref)
    }

    fn is_rendezvous_for(&self, topic: &str) -> bool {
        let rid = rendezvous_id(topic);
        // We are the rendezvous if no known peer is closer to it than we are.
        self.dht
            .closest_peers(&rid, 1)
            .first()
            .map(|n| self.self_id.distance(&rid) <= n.node_id.distance(&rid))
            .unwrap_or(true)
    }

    /// Subscribe the local node to `topic`, joining its tree if not already
    /// attached.
    pub async fn subscribe(&self, topic: &str) {
        let already_on_tree = {
            let mut topics = self.topics.lock().expect("lock");
            let state = topics.entry(topic.to_string()).or_insert_with(TopicState::new);
            let was_on_tree = state.on_tree();
            state.subscribed_locally = true;
            was_on_tree
        };
        if !already_on_tree && !self.is_rendezvous_for(topic) {
            self.join_upward(topic);
        }
    }

    fn join_upward(&self, topic: &str) {
        let rid = rendezvous_id(topic);
        if let Some(hop) = self.next_hop_toward(&rid, None) {
            self.sink.send(
                &hop,
                WireMessage::Scribe(ScribeMsg::Join {
                    topic: topic.to_string(),
                }),
            );
        }
    }

    /// Unsubscribe the local node. If no children remain, the tree branch
    /// collapses upward.
    pub fn unsubscribe(&self, topic: &str) {
        let (parent, leaf) = {
            let mut topics = self.topics.lock().expect("lock");
            let Some(state) = topics.get_mut(topic) else {
                return;
            };
            state.subscribed_locally = false;
            (state.parent.clone(), state.children.is_empty())
        };
        if let (Some(parent), true) = (parent, leaf) {
            self.sink.send(
                &parent,
                WireMessage::Scribe(ScribeMsg::Leave {
                    topic: topic.to_string(),
                }),
            );
            self.topics.lock().expect("lock").remove(topic);
        }
    }

    /// Handle an inbound `JOIN`.
    pub fn handle_join(&self, sender: &str, topic: String) {
        let mut topics = self.topics.lock().expect("lock");
        let was_on_tree_before = topics.get(&topic).map(TopicState::on_tree).unwrap_or(false);
        let state = topics.entry(topic.clone()).or_insert_with(TopicState::new);

        if state.children.len() < MAX_CHILDREN {
            if !state.children.iter().any(|c| c == sender) {
                state.children.push(sender.to_string());
            }
            drop(topics);
            self.sink.send(
                sender,
                WireMessage::Scribe(ScribeMsg::JoinAck { topic: topic.clone() }),
            );
            if !was_on_tree_before && !self.is_rendezvous_for(&topic) {
                self.join_upward(&topic);
            }
        } else {
            drop(topics);
            if let Some(hop) = self.next_hop_toward(&rendezvous_id(&topic), Some(sender)) {
                self.sink.send(
                    &hop,
                    WireMessage::Scribe(ScribeMsg::Join { topic }),
                );
            } else {
                self.sink.send(sender, WireMessage::Scribe(ScribeMsg::JoinReject { topic }));
            }
        }
    }

    /// Handle an inbound `JOIN_ACK`: the sender becomes our parent.
    pub fn handle_join_ack(&self, sender: &str, topic: String) {
        let mut topics = self.topics.lock().expect("lock");
        let state = topics.entry(topic).or_insert_with(TopicState::new);
        state.parent = Some(sender.to_string());
        state.last_heartbeat_at = crate::core::types::now_ms();
    }

    /// Handle an inbound `JOIN_REJECT`: give up on this path (caller may
    /// retry by re-subscribing later).
    pub fn handle_join_reject(&self, topic: &str) {
        warn!(%topic, "scribe join rejected along full path");
    }

    /// Handle an inbound `LEAVE`: detach the sender as a child, collapsing
    /// further upward if we become a childless non-subscriber ourselves.
    pub fn handle_leave(&self, sender: &str, topic: &str) {
        let collapse = {
            let mut topics = self.topics.lock().expect("lock");
            let Some(state) = topics.get_mut(topic) else {
                return;
            };
            state.children.retain(|c| c != sender);
            state.children.is_empty() && !state.subscribed_locally && state.parent.is_some()
        };
        if collapse {
            self.unsubscribe(topic);
        }
    }

    /// Originate a multicast on `topic`.
    pub fn multicast(&self, topic: &str, id: String, payload: Vec<u8>) {
        let (parent, children, is_new) = {
            let mut topics = self.topics.lock().expect("lock");
            let state = topics.entry(topic.to_string()).or_insert_with(TopicState::new);
            let is_new = state.dedup.mark(&id);
            (state.parent.clone(), state.children.clone(), is_new)
        };
        if !is_new {
            return;
        }
        self.fanout(&parent, &children, None, topic, &id, &payload);
    }

    fn fanout(
        &self,
        parent: &Option<String>,
        children: &[String],
        exclude: Option<&str>,
        topic: &str,
        id: &str,
        payload: &[u8],
    ) {
        let targets = parent
            .iter()
            .cloned()
            .chain(children.iter().cloned())
            .filter(|p| Some(p.as_str()) != exclude);
        for peer in targets {
            self.sink.send(
                &peer,
                WireMessage::Scribe(ScribeMsg::Multicast {
                    topic: topic.to_string(),
                    id: id.to_string(),
                    payload: payload.to_vec(),
                }),
            );
        }
    }

    /// Handle an inbound `MULTICAST`.
    pub fn handle_multicast(&self, sender: &str, topic: String, id: String, payload: Vec<u8>) {
        let (parent, children, is_new, subscribed) = {
            let mut topics = self.topics.lock().expect("lock");
            let state = topics.entry(topic.clone()).or_insert_with(TopicState::new);
            let is_new = state.dedup.mark(&id);
            (state.parent.clone(), state.children.clone(), is_new, state.subscribed_locally)
        };
        if !is_new {
            return;
        }
        if subscribed {
            let _ = self.deliver_tx.send((topic.clone(), id.clone(), payload.clone()));
        }
        self.fanout(&parent, &children, Some(sender), &topic, &id, &payload);
    }

    /// Send heartbeats to all children on all topics where we have any,
    /// called periodically by the owning runtime.
    pub fn heartbeat_tick(&self) {
        let topics = self.topics.lock().expect("lock");
        for (topic, state) in topics.iter() {
            for child in &state.children {
                self.sink.send(
                    child,
                    WireMessage::Scribe(ScribeMsg::Heartbeat { topic: topic.clone() }),
                );
            }
        }
    }

    /// Handle an inbound `HEARTBEAT` from our parent.
    pub fn handle_heartbeat(&self, topic: &str) {
        if let Some(state) = self.topics.lock().expect("lock").get_mut(topic) {
            state.last_heartbeat_at = crate::core::types::now_ms();
        }
    }

    /// Handle an inbound `PARENT_FAILED`: our parent's own upstream broke;
    /// propagate the notice to our children and re-subscribe upward.
    pub fn handle_parent_failed(&self, topic: &str) {
        let children = {
            let topics = self.topics.lock().expect("lock");
            topics.get(topic).map(|s| s.children.clone()).unwrap_or_default()
        };
        for child in &children {
            self.sink.send(
                child,
                WireMessage::Scribe(ScribeMsg::ParentFailed { topic: topic.to_string() }),
            );
        }
        if !self.is_rendezvous_for(topic) {
            self.join_upward(topic);
        }
    }

    /// Sweep for parents that have gone silent past [`TREE_REPAIR_TIMEOUT`],
    /// abandoning them and notifying children, called periodically.
    pub fn repair_tick(&self, now_ms: u64) {
        let stale: Vec<String> = {
            let topics = self.topics.lock().expect("lock");
            topics
                .iter()
                .filter(|(_, s)| {
                    s.parent.is_some()
                        && now_ms.saturating_sub(s.last_heartbeat_at) > TREE_REPAIR_TIMEOUT.as_millis() as u64
                })
                .map(|(t, _)| t.clone())
                .collect()
        };
        for topic in stale {
            {
                let mut topics = self.topics.lock().expect("lock");
                if let Some(state) = topics.get_mut(&topic) {
                    state.parent = None;
                }
            }
            self.handle_parent_failed(&topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sink::RecordingSink;

    fn make() -> (Scribe, Arc<RecordingSink>, mpsc::UnboundedReceiver<(String, String, Vec<u8>)>) {
        let sink = Arc::new(RecordingSink::default());
        let dht = Arc::new(DhtNode::new(NodeId::from_bytes([0u8; 20]), sink.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let scribe = Scribe::new("self".into(), NodeId::from_bytes([0u8; 20]), dht, sink.clone(), tx);
        (scribe, sink, rx)
    }

    #[test]
    fn rendezvous_id_is_deterministic() {
        assert_eq!(rendezvous_id("#general"), rendezvous_id("#general"));
        assert_ne!(rendezvous_id("#general"), rendezvous_id("#other"));
    }

    #[test]
    fn join_accepts_child_under_capacity() {
        let (scribe, sink, _rx) = make();
        scribe.handle_join("peer1", "#general".into());
        let sent = sink.drain();
        assert!(sent.iter().any(|(p, m)| p == "peer1"
            && matches!(m, WireMessage::Scribe(ScribeMsg::JoinAck { .. }))));
    }

    #[test]
    fn multicast_dedup_prevents_redelivery() {
        let (scribe, _sink, mut rx) = make();
        scribe
            .topics
            .lock()
            .unwrap()
            .entry("#t".into())
            .or_insert_with(TopicState::new)
            .subscribed_locally = true;
        scribe.handle_multicast("a", "#t".into(), "m1".into(), vec![1]);
        assert!(rx.try_recv().is_ok());
        scribe.handle_multicast("a", "#t".into(), "m1".into(), vec![1]);
        assert!(rx.try_recv().is_err());
    }
}
