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

//! Multi-node Plumtree simulation over a chain topology (each node's active
//! view holds only its immediate neighbors), driven through a shared router
//! instead of a real swarm, to exercise eager-push forwarding across hops a
//! single-node unit test can't reach.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use ember::core::wire::WireMessage;
use ember::gossip::plumtree::{Plumtree, PlumtreeMsg};
use ember::identity::registry::ActiveView;
use ember::transport::sink::PeerSink;
use tokio::sync::mpsc;

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

struct FixedActive(Vec<String>);
impl ActiveView for FixedActive {
    fn active_peer_refs(&self) -> Vec<String> {
        self.0.clone()
    }
}

fn chain_neighbors(i: usize, n: usize) -> Vec<String> {
    let mut v = Vec::new();
    if i > 0 {
        v.push(format!("node{}", i - 1));
    }
    if i + 1 < n {
        v.push(format!("node{}", i + 1));
    }
    v
}

fn build_network(
    n: usize,
) -> (
    Arc<Router>,
    HashMap<String, Plumtree>,
    HashMap<String, mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
) {
    let router = Router::new();
    let mut nodes = HashMap::new();
    let mut receivers = HashMap::new();
    for i in 0..n {
        let id = format!("node{i}");
        let sink = Arc::new(RouterHandle {
            from: id.clone(),
            router: router.clone(),
        });
        let active = Arc::new(FixedActive(chain_neighbors(i, n)));
        let (tx, rx) = mpsc::unbounded_channel();
        nodes.insert(id.clone(), Plumtree::new(id.clone(), active, sink, tx));
        receivers.insert(id, rx);
    }
    (router, nodes, receivers)
}

/// Dispatch only the immediate (non-delayed) message kinds — `GOSSIP` eager
/// forwarding is synchronous; `IHAVE`/`GRAFT`/`PRUNE` fire from a delayed
/// task this simulation never awaits, so they never appear in the queue.
fn pump(router: &Router, nodes: &HashMap<String, Plumtree>, max_steps: usize) {
    for _ in 0..max_steps {
        let next = router.outbox.lock().expect("lock").pop_front();
        let Some((from, to, msg)) = next else {
            break;
        };
        let Some(node) = nodes.get(&to) else {
            continue;
        };
        if let WireMessage::Plumtree(pt) = msg {
            match pt {
                PlumtreeMsg::Gossip { id, payload, .. } => node.handle_gossip(&from, id, payload),
                PlumtreeMsg::IHave { ids } => node.handle_ihave(&from, ids),
                PlumtreeMsg::Graft { id } => node.handle_graft(&from, &id, None),
                PlumtreeMsg::Prune => node.handle_prune(&from),
            }
        }
    }
}

#[tokio::test]
async fn broadcast_propagates_across_every_hop_of_a_chain() {
    let n = 5;
    let (router, plumtrees, mut receivers) = build_network(n);

    plumtrees["node0"].broadcast("m1".into(), b"hello".to_vec());
    pump(&router, &plumtrees, 200);

    for i in 1..n {
        let id = format!("node{i}");
        let rx = receivers.get_mut(&id).expect("receiver");
        let (msg_id, payload) = rx.try_recv().expect("message delivered across the chain");
        assert_eq!(msg_id, "m1");
        assert_eq!(payload, b"hello".to_vec());
    }
}

#[tokio::test]
async fn duplicate_arrival_from_a_second_path_is_not_redelivered() {
    // A ring instead of a chain gives every interior node two paths to the
    // same broadcast; Plumtree's history dedup must collapse them to one
    // delivery per node.
    let n = 4;
    let (router, plumtrees, mut receivers) = {
        let router = Router::new();
        let mut nodes = HashMap::new();
        let mut receivers = HashMap::new();
        for i in 0..n {
            let id = format!("node{i}");
            let sink = Arc::new(RouterHandle {
                from: id.clone(),
                router: router.clone(),
            });
            let neighbors = vec![format!("node{}", (i + 1) % n), format!("node{}", (i + n - 1) % n)];
            let active = Arc::new(FixedActive(neighbors));
            let (tx, rx) = mpsc::unbounded_channel();
            nodes.insert(id.clone(), Plumtree::new(id.clone(), active, sink, tx));
            receivers.insert(id, rx);
        }
        (router, nodes, receivers)
    };

    plumtrees["node0"].broadcast("m1".into(), b"ring".to_vec());
    pump(&router, &plumtrees, 200);

    for i in 1..n {
        let id = format!("node{i}");
        let rx = receivers.get_mut(&id).expect("receiver");
        assert!(rx.try_recv().is_ok(), "node {id} should receive exactly one delivery");
        assert!(rx.try_recv().is_err(), "node {id} should not be redelivered via the second path");
    }
}
