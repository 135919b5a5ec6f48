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

//! The inter-peer wire envelope: a single tagged enum carrying every message
//! type named in the external interface, plus the base64/BigInt-string serde
//! helpers the canonical JSON-like form requires.

use serde::{Deserialize, Serialize};

use crate::core::types::TimestampMs;
use crate::dht::rpc::DhtRpc;
use crate::gossip::plumtree::PlumtreeMsg;
use crate::image::protocol::ImageMsg;
use crate::overlay::hyparview::HyParViewMsg;
use crate::posts::model::Post;
use crate::scribe::protocol::ScribeMsg;

/// Base64 (standard, padded) serde helpers for byte-field wire encoding.
pub mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize bytes as a base64 string.
    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(bytes).serialize(s)
    }

    /// Deserialize a base64 string into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Serde helpers for values over 2^53 that must cross the wire as a decimal
/// digit string with a trailing `n` sentinel (BigInt convention), used for the
/// VDF `iterations` field. Internally the value is a native `u128`.
pub mod bigint_n {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a u128 as `"<digits>n"`.
    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        format!("{v}n").serialize(s)
    }

    /// Deserialize a `"<digits>n"` string into a u128.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let s = String::deserialize(d)?;
        let digits = s.strip_suffix('n').unwrap_or(&s);
        digits.parse::<u128>().map_err(serde::de::Error::custom)
    }
}

/// A DHT RPC id, monotonically generated by the issuer.
pub type RpcId = u64;

/// The authentication challenge/response subtype of the handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthChallenge {
    /// 32 random bytes the responder expects signed back.
    #[serde(with = "b64")]
    pub challenge: Vec<u8>,
}

/// Initiator's signed reply to an `auth_challenge`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Signature over the challenge bytes.
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
    /// Claimed handle.
    pub handle: String,
    /// Claimed Ed25519 public key.
    #[serde(with = "b64")]
    pub sign_pub: Vec<u8>,
}

/// Opaque encrypted direct-message envelope. The core only routes this; the
/// payload is meaningless to it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Recipient's `node_id`, hex-encoded.
    pub to_node_id: String,
    /// Opaque ciphertext.
    #[serde(with = "b64")]
    pub payload: Vec<u8>,
}

/// `request_posts` / `posts_response` pair used for catch-up sync between peers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestPosts {
    /// Optional topic filter; absent means "general feed".
    #[serde(default)]
    pub topic: Option<String>,
    /// Ids already known to the requester, so the responder can skip them.
    #[serde(default)]
    pub known_ids: Vec<String>,
}

/// Response to `request_posts`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostsResponse {
    /// Posts the responder is willing to share.
    pub posts: Vec<Post>,
}

/// A carrier toggled on or off a post.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CarrierUpdate {
    /// Target post id.
    pub post_id: String,
    /// Carrier's handle.
    pub handle: String,
    /// Whether the handle now carries the post (`true`) or released it (`false`).
    pub carrying: bool,
}

/// Notification that a post gained a reply, used to keep `replies` and
/// transitive-retention bookkeeping in sync without re-sending the reply body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParentUpdate {
    /// Parent post id.
    pub parent_id: String,
    /// Newly attached reply id.
    pub reply_id: String,
}

/// A signed attestation that another peer independently verified a post.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostAttestation {
    /// Attested post id.
    pub post_id: String,
    /// Attester's handle.
    pub attester_handle: String,
    /// Attester's Ed25519 public key.
    #[serde(with = "b64")]
    pub attester_pub: Vec<u8>,
    /// Attester's reputation at attestation time (drives the trust contribution).
    pub attester_reputation: f64,
    /// Wall-clock timestamp of the attestation.
    pub timestamp: TimestampMs,
    /// Signature over `(post_id, attester_pub, timestamp)`.
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
}

/// Identity claim broadcast announcement (post-registration gossip).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityAnnounce {
    /// Handle being announced.
    pub handle: String,
    /// Ed25519 public key.
    #[serde(with = "b64")]
    pub sign_pub: Vec<u8>,
}

/// Broadcast routing update, mirroring the DHT `routing:<handle>` record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingUpdate {
    /// Handle whose routing record changed.
    pub handle: String,
    /// Hex-encoded node id.
    pub node_id: String,
    /// Current wire peer id (libp2p `PeerId` string form).
    pub wire_peer_id: String,
    /// Timestamp of the update.
    pub timestamp: TimestampMs,
}

/// Periodic liveness signal for a routing record, independent of changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingHeartbeat {
    /// Handle whose record is still alive.
    pub handle: String,
}

/// The full tagged wire envelope. `#[serde(tag = "type")]` gives the exact
/// `{"type": "...", ...}` shape required by the external interface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Kademlia RPC request/response.
    #[serde(rename = "dht_rpc")]
    DhtRpc(DhtRpc),
    /// HyParView overlay control message.
    #[serde(rename = "hyparview")]
    HyParView(HyParViewMsg),
    /// Plumtree gossip control message.
    #[serde(rename = "plumtree")]
    Plumtree(PlumtreeMsg),
    /// Scribe topic multicast control message.
    #[serde(rename = "scribe")]
    Scribe(ScribeMsg),
    /// A freshly authored or forwarded post.
    #[serde(rename = "new_post")]
    NewPost(Post),
    /// Response to `request_posts`.
    #[serde(rename = "posts_response")]
    PostsResponse(PostsResponse),
    /// Request for posts a peer may be missing.
    #[serde(rename = "request_posts")]
    RequestPosts(RequestPosts),
    /// Carrier set change.
    #[serde(rename = "carrier_update")]
    CarrierUpdate(CarrierUpdate),
    /// Reply attached to a parent.
    #[serde(rename = "parent_update")]
    ParentUpdate(ParentUpdate),
    /// Signed post attestation.
    #[serde(rename = "post_attestation")]
    PostAttestation(PostAttestation),
    /// Image metadata/chunk request-response protocol.
    #[serde(rename = "request_image")]
    RequestImage(ImageMsg),
    /// Image metadata/chunk request-response protocol.
    #[serde(rename = "image_response")]
    ImageResponse(ImageMsg),
    /// Image metadata/chunk request-response protocol.
    #[serde(rename = "request_image_chunks")]
    RequestImageChunks(ImageMsg),
    /// Image metadata/chunk request-response protocol.
    #[serde(rename = "chunk_response")]
    ChunkResponse(ImageMsg),
    /// Identity registration announcement.
    #[serde(rename = "identity_announce")]
    IdentityAnnounce(IdentityAnnounce),
    /// Routing record change broadcast.
    #[serde(rename = "routing_update")]
    RoutingUpdate(RoutingUpdate),
    /// Routing record liveness signal.
    #[serde(rename = "routing_heartbeat")]
    RoutingHeartbeat(RoutingHeartbeat),
    /// Handshake challenge.
    #[serde(rename = "auth_challenge")]
    AuthChallenge(AuthChallenge),
    /// Handshake response.
    #[serde(rename = "auth_response")]
    AuthResponse(AuthResponse),
    /// Opaque end-to-end encrypted direct message.
    #[serde(rename = "e2e_dm")]
    E2eDm(EncryptedEnvelope),
    /// Cover traffic; always dropped without processing by the core.
    #[serde(rename = "noise")]
    Noise {
        /// Padding bytes, ignored by every receiver.
        #[serde(with = "b64")]
        padding: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bigint_n_roundtrip() {
        #[derive(Serialize, Deserialize)]
        struct W(#[serde(with = "bigint_n")] u128);
        let w = W(123_456_789_012_345_678u128);
        let j = serde_json::to_string(&w).unwrap();
        assert!(j.ends_with("n\""));
        let back: W = serde_json::from_str(&j).unwrap();
        assert_eq!(back.0, w.0);
    }

    #[test]
    fn noise_message_roundtrips() {
        let msg = WireMessage::Noise {
            padding: vec![1, 2, 3],
        };
        let j = serde_json::to_string(&msg).unwrap();
        assert!(j.contains("\"type\":\"noise\""));
        let _: WireMessage = serde_json::from_str(&j).unwrap();
    }
}
