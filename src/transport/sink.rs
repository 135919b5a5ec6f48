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

//! The outbound-send seam every protocol component (DHT, HyParView,
//! Plumtree, Scribe, Image Store) depends on instead of the concrete swarm,
//! so those components can be unit-tested without a real libp2p stack.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::core::wire::WireMessage;

/// `send(peer, msg)` is best-effort and non-blocking per the specification:
/// callers never await backpressure here, they drop with a warning instead.
pub trait PeerSink: Send + Sync {
    /// Enqueue `msg` for delivery to `peer_id` (a transport-level wire peer
    /// id, e.g. a libp2p `PeerId` string). Implementations must not block.
    fn send(&self, peer_id: &str, msg: WireMessage);
}

/// An in-memory sink that records sent messages, for unit tests of protocol
/// logic that doesn't need a real swarm.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<VecDeque<(String, WireMessage)>>,
}

impl RecordingSink {
    /// Drain all messages sent so far, oldest first.
    pub fn drain(&self) -> Vec<(String, WireMessage)> {
        self.sent.lock().expect("lock").drain(..).collect()
    }
}

impl PeerSink for RecordingSink {
    fn send(&self, peer_id: &str, msg: WireMessage) {
        self.sent
            .lock()
            .expect("lock")
            .push_back((peer_id.to_string(), msg));
    }
}
