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

//! Multi-node HyParView simulation: several overlay instances wired through
//! a shared in-memory router instead of a real swarm, driven by popping
//! queued wire messages until the network quiesces.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use ember::core::wire::WireMessage;
use ember::overlay::hyparview::{HyParView, HyParViewMsg, MAX_ACTIVE, MAX_PASSIVE};
use ember::transport::sink::PeerSink;

struct Router {
    outbox: Mutex<VecDeque<(String, String, WireMessage)>>,
}

impl Router {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            outbox: Mutex::new(VecDeque::new()),
        })
    }
}

struct RouterHandle {
    from: String,
    router: Arc<Router>,
}

impl PeerSink for RouterHandle {
    fn send(&self, peer_id: &str, msg: WireMessage) {
        self.router
            .outbox
            .lock()
            .expect("lock")
            .push_back((self.from.clone(), peer_id.to_string(), msg));
    }
}

fn build_network(n: usize) -> (Arc<Router>, HashMap<String, Arc<HyParView>>) {
    let router = Router::new();
    let mut nodes = HashMap::new();
    for i in 0..n {
        let id = format!("node{i}");
        let sink = Arc::new(RouterHandle {
            from: id.clone(),
            router: router.clone(),
        });
        nodes.insert(id.clone(), Arc::new(HyParView::new(id.clone(), sink)));
    }
    (router, nodes)
}

/// Drain and dispatch queued messages until the queue empties or `max_steps`
/// is exceeded (a bound against runaway shuffle/forward-join cycles).
fn pump(router: &Router, nodes: &HashMap<String, Arc<HyParView>>, max_steps: usize) {
    for _ in 0..max_steps {
        let next = router.outbox.lock().expect("lock").pop_front();
        let Some((from, to, msg)) = next else {
            break;
        };
        let Some(node) = nodes.get(&to) else {
            continue;
        };
        if let WireMessage::HyParView(hv) = msg {
            match hv {
                HyParViewMsg::Join => node.handle_join(&from),
                HyParViewMsg::ForwardJoin { origin, ttl } => node.handle_forward_join(&from, origin, ttl),
                HyParViewMsg::Neighbor { priority } => {
                    node.handle_neighbor(&from, priority);
                }
                HyParViewMsg::Disconnect => node.handle_disconnect(&from),
                HyParViewMsg::Shuffle { set, ttl } => node.handle_shuffle(&from, set, ttl),
                HyParViewMsg::ShuffleReply { set } => node.handle_shuffle_reply(set),
            }
        }
    }
}

#[test]
fn network_of_ten_converges_under_view_caps_after_sequential_joins() {
    let (router, nodes) = build_network(10);
    let ids: Vec<String> = (1..10).map(|i| format!("node{i}")).collect();

    for id in &ids {
        nodes[id].join("node0");
        pump(&router, &nodes, 500);
    }

    for node in nodes.values() {
        assert!(node.active_view().len() <= MAX_ACTIVE);
        assert!(node.passive_view().len() <= MAX_PASSIVE);
    }
    // A join storm against a single bootstrap should leave every node with
    // at least one active connection, not stranded as an isolated singleton.
    for node in nodes.values() {
        assert!(!node.active_view().is_empty());
    }
}

#[test]
fn peer_failure_triggers_repair_attempt_toward_passive_candidate() {
    let (router, nodes) = build_network(6);
    for i in 1..6 {
        let id = format!("node{i}");
        nodes[&id].join("node0");
        pump(&router, &nodes, 300);
    }
    router.outbox.lock().expect("lock").clear();

    nodes["node1"].on_peer_failure("node0");

    assert!(!nodes["node1"].active_view().contains(&"node0".to_string()));
    let sent = router.outbox.lock().expect("lock").clone();
    assert!(sent.iter().any(|(from, _, msg)| from == "node1"
        && matches!(msg, WireMessage::HyParView(HyParViewMsg::Neighbor { .. }))));
}
