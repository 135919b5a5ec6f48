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

//! The `dht_rpc` wire message and its request/response parameter shapes.

use serde::{Deserialize, Serialize};

use crate::core::types::NodeId;
use crate::core::wire::{b64, RpcId};

/// RPC method discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    /// Liveness check.
    Ping,
    /// Find the `K` closest known nodes to a target id.
    FindNode,
    /// Find a stored value, or the `K` closest nodes if absent.
    FindValue,
    /// Store a value at a key.
    Store,
}

/// Optional metadata accompanying a `STORE`, letting collaborators like the
/// Identity Registry request a higher replication factor.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Re-propagate this value to newly discovered closer nodes.
    #[serde(default)]
    pub propagate: bool,
    /// Refresh semantics: overwrite even if a value already exists locally.
    #[serde(default)]
    pub refresh: bool,
    /// Desired number of remote replicas (defaults to 20, the bucket size,
    /// when unset; the Identity Registry requests 30 for claims).
    #[serde(default)]
    pub replication_factor: Option<u32>,
}

/// Request-side parameters, one variant per [`Method`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "method_params")]
pub enum RpcParams {
    /// `PING` carries no parameters.
    Ping,
    /// `FIND_NODE(target)`.
    FindNode {
        /// Target id to find neighbors of.
        target: NodeId,
    },
    /// `FIND_VALUE(key)`.
    FindValue {
        /// DHT key, as raw bytes (hashed to a 160-bit id by the store).
        #[serde(with = "b64")]
        key: Vec<u8>,
    },
    /// `STORE(key, value)`.
    Store {
        /// DHT key.
        #[serde(with = "b64")]
        key: Vec<u8>,
        /// Value bytes.
        #[serde(with = "b64")]
        value: Vec<u8>,
        /// Storage metadata.
        #[serde(default)]
        meta: StoreMeta,
    },
}

/// A node reference as returned in `FIND_NODE`/`FIND_VALUE` results.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRef {
    /// Routing id.
    pub node_id: NodeId,
    /// Transport-level wire peer id.
    pub peer_ref: String,
}

/// The result payload of a response, when present.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "result_kind")]
pub enum RpcResult {
    /// `PING` ack.
    Pong,
    /// Closest known nodes to the request's target.
    Nodes {
        /// Nodes, closest first.
        nodes: Vec<NodeRef>,
    },
    /// A value was found locally by the responder.
    Value {
        /// The stored bytes.
        #[serde(with = "b64")]
        value: Vec<u8>,
    },
    /// No value was found; closest known nodes are returned instead, as
    /// `FIND_VALUE` degrades to `FIND_NODE` semantics.
    NotFound {
        /// Nodes, closest first.
        nodes: Vec<NodeRef>,
    },
    /// Acknowledges a `STORE`.
    Stored,
    /// The requested `STORE` was rejected (oversized key/value or rate limited).
    StoreRejected {
        /// Human-readable rejection reason, for logging only.
        reason: String,
    },
}

/// A single `dht_rpc` wire message: either a request or, when `is_response`
/// is set, a response correlated by `rpc_id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DhtRpc {
    /// RPC method.
    pub method: Method,
    /// Request parameters (present on both request and, for context, response).
    pub params: RpcParams,
    /// Monotonic id generated by the issuer, echoed in the response.
    pub rpc_id: RpcId,
    /// Sender's routing id.
    pub sender_id: NodeId,
    /// Set on the response leg of the exchange.
    #[serde(default)]
    pub is_response: bool,
    /// Present only when `is_response` is true.
    #[serde(default)]
    pub result: Option<RpcResult>,
}
