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

//! Identity Registry: DHT-backed handle/pubkey registration and lookup,
//! author verification, and routing-record maintenance.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::types::{now_ms, NodeId};
use crate::core::vdf::VdfBackend;
use crate::core::wire::WireMessage;
use crate::dht::node::DhtNode;
use crate::dht::rpc::StoreMeta;
use crate::identity::claim::{Claim, IdentityError, LocalIdentity, RoutingRecord};
use crate::transport::sink::PeerSink;

/// Replication factor the registry requests for identity claims, higher than
/// the DHT default since identities must survive churn.
pub const IDENTITY_REPLICATION_FACTOR: u32 = 30;
/// TTL applied to routing/reverse-routing records.
pub const ROUTING_TTL_SECS: u64 = 300;
/// Base backoff for `verify_own_identity` retries.
const VERIFY_BACKOFF_BASE_MS: u64 = 300;
/// Maximum `verify_own_identity` retry attempts.
const VERIFY_MAX_ATTEMPTS: u32 = 5;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// `handle-to-pubkey:<handle>` already exists.
    #[error("handle taken")]
    HandleTaken,
    /// The claim found in the DHT failed signature or VDF verification.
    #[error("claim verification failed")]
    #[allow(dead_code)]
    VerificationFailed,
}

/// Supplies the set of currently-active peers for registry broadcasts
/// (`routing_update`), decoupling this module from HyParView's concrete type.
pub trait ActiveView: Send + Sync {
    /// Wire peer ids currently in the local active view.
    fn active_peer_refs(&self) -> Vec<String>;
}

fn dht_key(prefix: &str, suffix: &str) -> Vec<u8> {
    format!("{prefix}:{suffix}").into_bytes()
}

/// Wraps a value the DHT may return either bare or `{"value": ...}`-wrapped,
/// per the specification's "tolerate both wrapped and unwrapped payloads".
#[derive(serde::Deserialize)]
struct Wrapped<T> {
    value: T,
}

fn decode_tolerant<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Option<T> {
    if let Ok(v) = serde_json::from_slice::<T>(bytes) {
        return Some(v);
    }
    serde_json::from_slice::<Wrapped<T>>(bytes)
        .ok()
        .map(|w| w.value)
}

/// The Identity Registry component.
pub struct IdentityRegistry {
    dht: Arc<DhtNode>,
    vdf: Arc<dyn VdfBackend>,
    sink: Arc<dyn PeerSink>,
}

impl IdentityRegistry {
    /// Construct a registry bound to a DHT component and VDF backend.
    pub fn new(dht: Arc<DhtNode>, vdf: Arc<dyn VdfBackend>, sink: Arc<dyn PeerSink>) -> Self {
        Self { dht, vdf, sink }
    }

    /// Register a brand-new identity: reject if the handle is already taken,
    /// otherwise store both the forward and handle-to-pubkey records.
    pub async fn register(&self, claim: &Claim) -> Result<(), RegistryError> {
        let handle_key = dht_key("handle-to-pubkey", &claim.handle.to_lowercase());
        if self.dht.get(&handle_key).await.is_some() {
            return Err(RegistryError::HandleTaken);
        }

        let meta = StoreMeta {
            propagate: true,
            refresh: false,
            replication_factor: Some(IDENTITY_REPLICATION_FACTOR),
        };

        let claim_bytes = serde_json::to_vec(claim).unwrap_or_default();
        let pubkey_key = dht_key("pubkey", &base64_std(&claim.sign_pub.0));
        self.dht.store(pubkey_key, claim_bytes, meta.clone()).await;

        let sign_pub_b64 = base64_std(&claim.sign_pub.0);
        self.dht
            .store(handle_key, sign_pub_b64.into_bytes(), meta)
            .await;
        Ok(())
    }

    /// Resolve a handle to its verified `Claim`, or `None` if unregistered or
    /// the claim fails verification.
    pub async fn lookup(&self, handle: &str) -> Option<Claim> {
        let handle_key = dht_key("handle-to-pubkey", &handle.to_lowercase());
        let pubkey_b64_bytes = self.dht.get(&handle_key).await?;
        let pubkey_b64 = decode_tolerant::<String>(&pubkey_b64_bytes)
            .or_else(|| String::from_utf8(pubkey_b64_bytes).ok())?;

        let pubkey_key = dht_key("pubkey", &pubkey_b64);
        let claim_bytes = self.dht.get(&pubkey_key).await?;
        let claim = decode_tolerant::<Claim>(&claim_bytes)?;

        claim.verify(self.vdf.as_ref()).ok()?;
        Some(claim)
    }

    /// Verify the node's own identity is resolvable in the DHT, re-publishing
    /// and retrying with exponential backoff if absent.
    pub async fn verify_own_identity(&self, local: &LocalIdentity) -> bool {
        let claim = local.claim();

        if self.dht.routing_table_is_empty() {
            // Bootstrap-alone special case: nothing to verify against yet.
            return true;
        }

        for attempt in 0..VERIFY_MAX_ATTEMPTS {
            if let Some(found) = self.lookup(&claim.handle).await {
                return found.sign_pub == claim.sign_pub;
            }

            if claim.verify(self.vdf.as_ref()).is_err() {
                return false;
            }
            let _ = self.register(claim).await;

            let backoff = VERIFY_BACKOFF_BASE_MS * 2u64.saturating_pow(attempt);
            tokio::time::sleep(Duration::from_millis(backoff)).await;
        }
        false
    }

    /// Verify a post's claimed author binding: the registered public key for
    /// `author_handle` must match `author_pub`.
    pub async fn verify_author(&self, author_handle: &str, author_pub: &[u8]) -> bool {
        match self.lookup(author_handle).await {
            Some(claim) => claim.sign_pub.0 == author_pub,
            None => false,
        }
    }

    /// Update this node's routing record, broadcast the change to active
    /// peers, and maintain the reverse `wire-to-handle` mapping.
    pub async fn update_peer_location(
        &self,
        handle: &str,
        node_id: NodeId,
        wire_peer_id: &str,
        active_view: &dyn ActiveView,
    ) {
        let record = RoutingRecord {
            handle: handle.to_string(),
            node_id,
            wire_peer_id: wire_peer_id.to_string(),
            timestamp: now_ms(),
            ttl_secs: ROUTING_TTL_SECS,
        };
        let meta = StoreMeta {
            propagate: false,
            refresh: true,
            replication_factor: None,
        };

        let routing_key = dht_key("routing", &handle.to_lowercase());
        let record_bytes = serde_json::to_vec(&record).unwrap_or_default();
        self.dht.store(routing_key, record_bytes, meta.clone()).await;

        let reverse_key = dht_key("wire-to-handle", wire_peer_id);
        self.dht
            .store(reverse_key, handle.as_bytes().to_vec(), meta)
            .await;

        let update = crate::core::wire::RoutingUpdate {
            handle: handle.to_string(),
            node_id: node_id.to_hex(),
            wire_peer_id: wire_peer_id.to_string(),
            timestamp: record.timestamp,
        };
        for peer in active_view.active_peer_refs() {
            self.sink
                .send(&peer, WireMessage::RoutingUpdate(update.clone()));
        }
    }

    /// Resolve a handle's current routing record, if any (unverified —
    /// routing records carry no signature by design, only TTL freshness).
    pub async fn resolve_routing(&self, handle: &str) -> Option<RoutingRecord> {
        let routing_key = dht_key("routing", &handle.to_lowercase());
        let bytes = self.dht.get(&routing_key).await?;
        let record = decode_tolerant::<RoutingRecord>(&bytes)?;
        if record.is_expired(now_ms()) {
            None
        } else {
            Some(record)
        }
    }
}

fn base64_std(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    STANDARD.encode(bytes)
}

impl From<IdentityError> for RegistryError {
    fn from(_: IdentityError) -> Self {
        RegistryError::VerificationFailed
    }
}
