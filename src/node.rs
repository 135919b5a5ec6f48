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

//! The `Node` aggregate: assembles every protocol component over a single
//! swarm, persists the node's own identity across restarts, and runs the
//! dispatch loop that routes inbound [`WireMessage`]s to their owning
//! component.
//!
//! Per the concurrency model, this is the one place the whole dependency
//! graph is visible; no component reaches for a global singleton, they are
//! all handed the collaborators they need at construction time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru_time_cache::LruCache;
use rand::RngCore;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::security::keystore::verify_pubkey_bytes;
use crate::core::state::storage::{NullPersistence, PersistenceHooks, SledPersistence, StateError};
use crate::core::types::{now_ms, NodeConfig, NodeId, ProtocolConfig, Signature};
use crate::core::vdf::{TestVdfBackend, VdfBackend};
use crate::core::wire::{AuthChallenge, AuthResponse, CarrierUpdate, WireMessage};
use crate::dht::node::DhtNode;
use crate::dht::rpc::DhtRpc;
use crate::ephemeral::seen::SeenStore;
use crate::ephemeral::store::EphemeralStore;
use crate::gossip::fanout::FanoutGossip;
use crate::gossip::plumtree::{Plumtree, PlumtreeMsg};
use crate::identity::claim::{derive_vdf_input, Claim, IdentityError, PlaintextIdentity};
use crate::identity::registry::IdentityRegistry;
use crate::image::protocol::ImageMsg;
use crate::image::store::{ImageStore, NullImageReadyHook};
use crate::mixer::Mixer;
use crate::monitoring::metrics::Metrics;
use crate::overlay::hyparview::{HyParView, HyParViewMsg};
use crate::posts::engine::{PostEngine, PostError};
use crate::posts::model::{NewPost, Post};
use crate::scribe::protocol::{Scribe, ScribeMsg};
use crate::transport::reputation::ReputationTable;
use crate::transport::swarm::{spawn_swarm, SwarmError, SwarmEventOut, SwarmHandle, SwarmNodeConfig};

/// Claimed VDF iteration count for a freshly-created identity. The
/// specification calls for roughly a 30 s time-locked puzzle; the real VDF
/// backend (pluggable, per [`VdfBackend`]) is what actually enforces that
/// cost, so this constant is only the claim every backend is asked to prove.
const IDENTITY_VDF_ITERATIONS: u128 = 1_000_000_000;

/// How many posts a `posts_response` carries at most, per `request_posts`.
const SYNC_RESPONSE_LIMIT: usize = 100;

/// How long an outbound `auth_challenge` stays valid, per the specification.
const AUTH_CHALLENGE_TTL: Duration = Duration::from_secs(10);

/// File holding this node's own Ember identity secrets, distinct from the
/// transport-level `p2p_identity.key`.
const IDENTITY_FILE: &str = "ember_identity.key";

/// `Node` construction/runtime errors.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Swarm construction failed.
    #[error("swarm: {0}")]
    Swarm(#[from] SwarmError),
    /// Claim or identity secret handling failed.
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),
    /// Persisted state backend failed.
    #[error("storage: {0}")]
    Storage(#[from] StateError),
    /// Reading or writing the identity key file failed.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// The on-disk identity file is not valid JSON in the expected shape.
    #[error("corrupt identity key file")]
    CorruptIdentityFile,
    /// Key material in the identity file did not parse as Ed25519 PKCS#8.
    #[error("invalid key material in identity file")]
    InvalidKeyMaterial,
}

/// On-disk shape of `ember_identity.key`: the public claim plus the secret
/// key material needed to reconstruct a [`PlaintextIdentity`] across
/// restarts. Never transmitted; written with `0600` permissions on Unix.
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    claim: Claim,
    #[serde(with = "crate::core::wire::b64")]
    sign_secret_pkcs8: Vec<u8>,
    #[serde(with = "crate::core::wire::b64")]
    enc_secret: Vec<u8>,
}

fn identity_path(data_dir: &str) -> std::path::PathBuf {
    std::path::Path::new(data_dir).join(IDENTITY_FILE)
}

/// Load this node's Ember identity from `data_dir/ember_identity.key`,
/// generating and persisting a fresh one (complete with its VDF proof) if
/// none exists yet. Exposed for the stand-alone `keygen` binary as well as
/// [`Node::new`].
pub fn load_or_create_ember_identity(
    data_dir: &str,
    handle: &str,
    vdf: &dyn VdfBackend,
) -> Result<PlaintextIdentity, NodeError> {
    std::fs::create_dir_all(data_dir)?;
    let path = identity_path(data_dir);

    if path.exists() {
        let bytes = std::fs::read(&path)?;
        let stored: StoredIdentity = serde_json::from_slice(&bytes).map_err(|_| NodeError::CorruptIdentityFile)?;
        return Ok(PlaintextIdentity::from_parts(
            stored.claim,
            stored.sign_secret_pkcs8,
            stored.enc_secret,
        ));
    }

    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| NodeError::InvalidKeyMaterial)?;
    let sign_keypair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| NodeError::InvalidKeyMaterial)?;
    let sign_pub_bytes = sign_keypair.public_key().as_ref().to_vec();

    let enc_secret_key = x25519_dalek::StaticSecret::random_from_rng(rand::rngs::OsRng);
    let enc_pub = x25519_dalek::PublicKey::from(&enc_secret_key);

    let vdf_input = derive_vdf_input(handle, &sign_pub_bytes);
    info!(handle, "computing identity VDF proof for a new identity");
    let vdf_proof = vdf.compute(&vdf_input, IDENTITY_VDF_ITERATIONS);

    let identity = PlaintextIdentity::new(
        handle.to_string(),
        sign_keypair,
        pkcs8.as_ref().to_vec(),
        enc_pub.to_bytes().to_vec(),
        enc_secret_key.to_bytes().to_vec(),
        vdf_proof,
        IDENTITY_VDF_ITERATIONS,
    );

    let stored = StoredIdentity {
        claim: identity.claim.clone(),
        sign_secret_pkcs8: pkcs8.as_ref().to_vec(),
        enc_secret: enc_secret_key.to_bytes().to_vec(),
    };
    let bytes = serde_json::to_vec(&stored).map_err(|_| NodeError::CorruptIdentityFile)?;
    let tmp = path.with_extension("key.tmp");
    std::fs::write(&tmp, &bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600));
    }
    std::fs::rename(&tmp, &path)?;

    Ok(identity)
}

struct PendingAuth {
    challenge: Vec<u8>,
    issued_at: u64,
}

/// The assembled node: every protocol component wired over a shared swarm.
/// Consumed by [`Node::run`], which owns the dispatch loop for the rest of
/// the process's life.
pub struct Node {
    config: NodeConfig,
    metrics: Arc<Metrics>,
    identity: Arc<PlaintextIdentity>,
    persistence: Arc<dyn PersistenceHooks>,
    sink: Arc<SwarmHandle>,
    dht: Arc<DhtNode>,
    registry: Arc<IdentityRegistry>,
    overlay: Arc<HyParView>,
    plumtree: Plumtree,
    scribe: Arc<Scribe>,
    mixer: Mixer,
    posts: PostEngine,
    images: Arc<ImageStore>,
    ephemeral: Arc<EphemeralStore>,
    reputation: Arc<ReputationTable>,

    inbound_rx: mpsc::UnboundedReceiver<(String, WireMessage)>,
    swarm_events_rx: mpsc::UnboundedReceiver<SwarmEventOut>,
    swarm_task: tokio::task::JoinHandle<()>,
    gossip_deliver_rx: mpsc::UnboundedReceiver<(String, Vec<u8>)>,
    scribe_deliver_rx: mpsc::UnboundedReceiver<(String, String, Vec<u8>)>,

    gossip_payload_cache: Mutex<LruCache<String, Vec<u8>>>,
    auth_pending: Mutex<HashMap<String, PendingAuth>>,
    auth_established: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl Node {
    /// Assemble a node from `config`: load or create its identity, open
    /// persistence, spawn the swarm, and construct every protocol component
    /// over it. Does not join the network yet — call [`Node::run`] for that.
    pub async fn new(config: NodeConfig, metrics: Arc<Metrics>) -> Result<Self, NodeError> {
        let vdf: Arc<dyn VdfBackend> = Arc::new(TestVdfBackend::default());

        let handle = config
            .node
            .handle
            .clone()
            .unwrap_or_else(|| config.node.name.clone());
        let identity = Arc::new(load_or_create_ember_identity(&config.node.data_dir, &handle, vdf.as_ref())?);
        info!(handle = %identity.claim.handle, node_id = %identity.claim.node_id.to_hex(), "identity ready");

        let persistence: Arc<dyn PersistenceHooks> = if config.node.stateless {
            Arc::new(NullPersistence)
        } else {
            Arc::new(SledPersistence::open(&config.node.data_dir)?)
        };
        let reputation = Arc::new(ReputationTable::load(persistence.as_ref()));

        let swarm_cfg = SwarmNodeConfig {
            listen_addr: config.p2p.listen_addr.clone(),
            data_dir: config.node.data_dir.clone(),
            bootstrap: config.p2p.bootstrap.clone(),
        };
        let (swarm_handle, inbound_rx, swarm_events_rx, swarm_task) =
            spawn_swarm(swarm_cfg, config.protocol.clone(), metrics.clone(), reputation.clone())?;
        let sink = Arc::new(swarm_handle);
        let peer_sink: Arc<dyn crate::transport::sink::PeerSink> = sink.clone();

        let self_ref = String::new();
        let self_id = identity.claim.node_id;

        let dht = Arc::new(DhtNode::new(self_id, peer_sink.clone()));
        let registry = Arc::new(IdentityRegistry::new(dht.clone(), vdf.clone(), peer_sink.clone()));
        let overlay = Arc::new(HyParView::new(self_ref.clone(), peer_sink.clone()));
        let active_view: Arc<dyn crate::identity::registry::ActiveView> = overlay.clone();

        let (gossip_deliver_tx, gossip_deliver_rx) = mpsc::unbounded_channel();
        let plumtree = Plumtree::new(self_ref.clone(), active_view.clone(), peer_sink.clone(), gossip_deliver_tx.clone());
        let fanout = FanoutGossip::new(self_ref.clone(), active_view.clone(), peer_sink.clone(), gossip_deliver_tx);

        let (scribe_deliver_tx, scribe_deliver_rx) = mpsc::unbounded_channel();
        let scribe = Arc::new(Scribe::new(self_ref.clone(), self_id, dht.clone(), peer_sink.clone(), scribe_deliver_tx));

        let ephemeral = Arc::new(EphemeralStore::new(config.protocol.clone()));
        let seen = Arc::new(SeenStore::new());

        let posts = PostEngine::new(
            self_ref.clone(),
            identity.clone(),
            registry.clone(),
            vdf.clone(),
            active_view.clone(),
            plumtree.clone(),
            fanout,
            peer_sink.clone(),
            seen.clone(),
            ephemeral.clone(),
            config.protocol.clone(),
            reputation.clone(),
        );

        let mixer = Mixer::new(
            identity.clone(),
            scribe.clone(),
            posts.clone(),
            seen.clone(),
            ephemeral.clone(),
            active_view.clone(),
            peer_sink.clone(),
            config.protocol.clone(),
        );

        let images = Arc::new(ImageStore::new(
            self_ref.clone(),
            active_view.clone(),
            peer_sink.clone(),
            Arc::new(NullImageReadyHook),
        ));

        Ok(Self {
            config,
            metrics,
            identity,
            persistence,
            sink,
            dht,
            registry,
            overlay,
            plumtree,
            scribe,
            mixer,
            posts,
            images,
            ephemeral,
            reputation,
            inbound_rx,
            swarm_events_rx,
            swarm_task,
            gossip_deliver_rx,
            scribe_deliver_rx,
            gossip_payload_cache: Mutex::new(LruCache::with_expiry_duration_and_capacity(
                Duration::from_secs(3600),
                2_000,
            )),
            auth_pending: Mutex::new(HashMap::new()),
            auth_established: Mutex::new(HashMap::new()),
        })
    }

    /// Author and disseminate a new post, optionally routing it through the
    /// mixer's relay topics for origin privacy instead of the direct
    /// Plumtree/fanout path.
    pub fn publish(&self, new_post: NewPost, via_mixer: bool) -> Result<Post, PostError> {
        if via_mixer {
            self.mixer.publish_via_mixer(new_post)
        } else {
            self.posts.create_and_publish(new_post)
        }
    }

    /// This node's own public claim.
    pub fn claim(&self) -> &Claim {
        &self.identity.claim
    }

    fn issue_auth_challenge(&self, peer_ref: &str) {
        let mut challenge = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut challenge);
        self.auth_pending.lock().expect("lock").insert(
            peer_ref.to_string(),
            PendingAuth {
                challenge: challenge.clone(),
                issued_at: now_ms(),
            },
        );
        self.sink.send(peer_ref, WireMessage::AuthChallenge(AuthChallenge { challenge }));
    }

    fn handle_auth_challenge(&self, peer_ref: &str, challenge: AuthChallenge) {
        let Ok(signature) = self.identity.sign(&challenge.challenge) else {
            return;
        };
        self.sink.send(
            peer_ref,
            WireMessage::AuthResponse(AuthResponse {
                signature: signature.0,
                handle: self.identity.claim.handle.clone(),
                sign_pub: self.identity.claim.sign_pub.0.clone(),
            }),
        );
    }

    fn handle_auth_response(&self, peer_ref: &str, resp: AuthResponse) {
        let pending = {
            let mut pending = self.auth_pending.lock().expect("lock");
            pending.remove(peer_ref)
        };
        let Some(pending) = pending else {
            return;
        };
        if now_ms().saturating_sub(pending.issued_at) > AUTH_CHALLENGE_TTL.as_millis() as u64 {
            return;
        }
        let Ok(pk) = <[u8; 32]>::try_from(resp.sign_pub.as_slice()) else {
            return;
        };
        if verify_pubkey_bytes(&pk, &pending.challenge, &Signature(resp.signature)).is_err() {
            return;
        }
        self.auth_established
            .lock()
            .expect("lock")
            .insert(peer_ref.to_string(), (resp.handle, resp.sign_pub));
    }

    fn handle_image_msg(&self, peer_ref: &str, msg: ImageMsg) {
        match msg {
            ImageMsg::RequestImage { hash } => self.images.handle_request_image(peer_ref, &hash),
            ImageMsg::ImageResponse { hash, manifest, chunks } => {
                self.images.handle_image_response(peer_ref, &hash, manifest, chunks)
            }
            ImageMsg::RequestImageChunks { hash, chunk_hashes } => {
                self.images.handle_request_image_chunks(peer_ref, &hash, &chunk_hashes)
            }
            ImageMsg::ChunkResponse { hash, chunks } => self.images.handle_chunk_response(&hash, chunks),
        }
    }

    async fn handle_dht_rpc(&self, peer_ref: &str, rpc: DhtRpc) {
        self.dht.learn_peer(rpc.sender_id, peer_ref.to_string()).await;
        if let Some(response) = self.dht.handle_inbound(peer_ref, rpc) {
            self.sink.send(peer_ref, WireMessage::DhtRpc(response));
        }
    }

    fn handle_hyparview(&self, peer_ref: &str, msg: HyParViewMsg) {
        match msg {
            HyParViewMsg::Join => self.overlay.handle_join(peer_ref),
            HyParViewMsg::ForwardJoin { origin, ttl } => self.overlay.handle_forward_join(peer_ref, origin, ttl),
            HyParViewMsg::Neighbor { priority } => {
                let _ = self.overlay.handle_neighbor(peer_ref, priority);
            }
            HyParViewMsg::Disconnect => self.overlay.handle_disconnect(peer_ref),
            HyParViewMsg::Shuffle { set, ttl } => self.overlay.handle_shuffle(peer_ref, set, ttl),
            HyParViewMsg::ShuffleReply { set } => self.overlay.handle_shuffle_reply(set),
        }
    }

    fn handle_plumtree(&self, peer_ref: &str, msg: PlumtreeMsg) {
        match msg {
            PlumtreeMsg::Gossip { id, payload, .. } => {
                self.gossip_payload_cache.lock().expect("lock").insert(id.clone(), payload.clone());
                self.plumtree.handle_gossip(peer_ref, id, payload);
            }
            PlumtreeMsg::IHave { ids } => self.plumtree.handle_ihave(peer_ref, ids),
            PlumtreeMsg::Graft { id } => {
                let payload = self.gossip_payload_cache.lock().expect("lock").get(&id).cloned();
                self.plumtree.handle_graft(peer_ref, &id, payload.as_deref());
            }
            PlumtreeMsg::Prune => self.plumtree.handle_prune(peer_ref),
        }
    }

    fn handle_scribe(&self, peer_ref: &str, msg: ScribeMsg) {
        match msg {
            ScribeMsg::Join { topic } => self.scribe.handle_join(peer_ref, topic),
            ScribeMsg::JoinAck { topic } => self.scribe.handle_join_ack(peer_ref, topic),
            ScribeMsg::JoinReject { topic } => self.scribe.handle_join_reject(&topic),
            ScribeMsg::Leave { topic } => self.scribe.handle_leave(peer_ref, &topic),
            ScribeMsg::Multicast { topic, id, payload } => self.scribe.handle_multicast(peer_ref, topic, id, payload),
            ScribeMsg::Heartbeat { topic } => self.scribe.handle_heartbeat(&topic),
            ScribeMsg::ParentFailed { topic } => self.scribe.handle_parent_failed(&topic),
        }
    }

    fn handle_carrier_update(&self, update: CarrierUpdate) {
        self.ephemeral.apply_carrier_update(&update.post_id, &update.handle, update.carrying);
    }

    fn handle_request_posts(&self, peer_ref: &str, req: crate::core::wire::RequestPosts) {
        let posts = self.ephemeral.posts_for_sync(&req.known_ids, req.topic.as_deref(), SYNC_RESPONSE_LIMIT);
        self.sink
            .send(peer_ref, WireMessage::PostsResponse(crate::core::wire::PostsResponse { posts }));
    }

    async fn dispatch(&self, peer_ref: String, msg: WireMessage) {
        match msg {
            WireMessage::DhtRpc(rpc) => self.handle_dht_rpc(&peer_ref, rpc).await,
            WireMessage::HyParView(m) => self.handle_hyparview(&peer_ref, m),
            WireMessage::Plumtree(m) => self.handle_plumtree(&peer_ref, m),
            WireMessage::Scribe(m) => self.handle_scribe(&peer_ref, m),
            WireMessage::NewPost(post) => self.posts.handle_incoming_post(post, Some(&peer_ref)),
            WireMessage::RequestPosts(req) => self.handle_request_posts(&peer_ref, req),
            WireMessage::PostsResponse(resp) => {
                for post in resp.posts {
                    self.posts.handle_incoming_post(post, Some(&peer_ref));
                }
            }
            WireMessage::CarrierUpdate(update) => self.handle_carrier_update(update),
            WireMessage::ParentUpdate(update) => {
                debug!(parent_id = %update.parent_id, reply_id = %update.reply_id, "parent_update received (informational)");
            }
            WireMessage::PostAttestation(att) => self.posts.handle_attestation(&peer_ref, att).await,
            WireMessage::RequestImage(m)
            | WireMessage::ImageResponse(m)
            | WireMessage::RequestImageChunks(m)
            | WireMessage::ChunkResponse(m) => self.handle_image_msg(&peer_ref, m),
            WireMessage::IdentityAnnounce(ann) => {
                debug!(handle = %ann.handle, "identity_announce received");
            }
            WireMessage::RoutingUpdate(ru) => {
                debug!(handle = %ru.handle, "routing_update received (DHT remains source of truth)");
            }
            WireMessage::RoutingHeartbeat(rh) => {
                debug!(handle = %rh.handle, "routing_heartbeat received");
            }
            WireMessage::AuthChallenge(c) => self.handle_auth_challenge(&peer_ref, c),
            WireMessage::AuthResponse(r) => self.handle_auth_response(&peer_ref, r),
            WireMessage::E2eDm(env) => {
                debug!(to = %env.to_node_id, bytes = env.payload.len(), "e2e_dm received (opaque to the core)");
            }
            WireMessage::Noise { .. } => {}
        }
    }

    fn handle_swarm_event(&self, event: SwarmEventOut) {
        match event {
            SwarmEventOut::PeerConnected(peer_id) => {
                let peer_ref = peer_id.to_string();
                self.metrics.peers_connected.inc();
                self.overlay.join(&peer_ref);
                self.issue_auth_challenge(&peer_ref);
            }
            SwarmEventOut::PeerDisconnected(peer_id) => {
                let peer_ref = peer_id.to_string();
                self.metrics.peers_connected.dec();
                self.overlay.on_peer_failure(&peer_ref);
                self.auth_pending.lock().expect("lock").remove(&peer_ref);
                self.auth_established.lock().expect("lock").remove(&peer_ref);
            }
        }
    }

    fn handle_gossip_delivery(&self, id: String, payload: Vec<u8>) {
        self.gossip_payload_cache.lock().expect("lock").insert(id, payload.clone());
        match serde_json::from_slice::<Post>(&payload) {
            Ok(post) => self.posts.handle_incoming_post(post, None),
            Err(e) => warn!(?e, "malformed gossip-delivered post payload, dropping"),
        }
    }

    fn handle_scribe_delivery(&self, topic: String, payload: Vec<u8>) {
        if crate::mixer::is_relay_topic(&topic) {
            self.mixer.handle_relay_delivery(&topic, payload);
            return;
        }
        match serde_json::from_slice::<Post>(&payload) {
            Ok(post) => self.posts.handle_incoming_post(post, None),
            Err(e) => warn!(?e, topic, "malformed scribe-delivered post payload, dropping"),
        }
    }

    /// Join the overlay against every configured bootstrap peer. The swarm
    /// itself already dials these addresses; this additionally tells
    /// HyParView they're usable overlay entry points.
    fn bootstrap_overlay(&self) {
        for addr in &self.config.p2p.bootstrap {
            if let Some(peer_ref) = addr.rsplit("/p2p/").next() {
                if !peer_ref.is_empty() && peer_ref != *addr {
                    self.overlay.join(peer_ref);
                }
            }
        }
    }

    /// Run the node until the process is terminated: registers the identity,
    /// joins the overlay, spawns the periodic maintenance tasks, and drives
    /// the inbound dispatch loop.
    pub async fn run(mut self) -> Result<(), NodeError> {
        match self.registry.register(&self.identity.claim).await {
            Ok(()) | Err(crate::identity::registry::RegistryError::HandleTaken) => {}
            Err(e) => warn!(error = ?e, "identity registration failed, continuing unregistered"),
        }
        self.mixer.subscribe_all().await;
        self.bootstrap_overlay();

        let protocol = self.config.protocol.clone();
        let dht_handle = self.dht.clone();
        tokio::spawn(async move {
            let _ = dht_handle;
        });

        let overlay = self.overlay.clone();
        let mut shuffle_timer = tokio::time::interval(Duration::from_secs(60));
        let scribe_for_heartbeat = self.scribe.clone();
        let mut heartbeat_timer = tokio::time::interval(Duration::from_secs(30));
        let ephemeral_for_gc = self.ephemeral.clone();
        let mut gc_timer = tokio::time::interval(Duration::from_secs(protocol.garbage_collect_interval_secs));
        let mut cover_timer = tokio::time::interval(Duration::from_millis(protocol.mix_cover_traffic_interval_ms));
        let mut scribe_repair_timer = tokio::time::interval(Duration::from_secs(30));
        let scribe_for_repair = self.scribe.clone();

        loop {
            tokio::select! {
                Some((peer_ref, msg)) = self.inbound_rx.recv() => {
                    self.dispatch(peer_ref, msg).await;
                }
                Some(event) = self.swarm_events_rx.recv() => {
                    self.handle_swarm_event(event);
                }
                Some((id, payload)) = self.gossip_deliver_rx.recv() => {
                    self.handle_gossip_delivery(id, payload);
                }
                Some((topic, id, payload)) = self.scribe_deliver_rx.recv() => {
                    let _ = id;
                    self.handle_scribe_delivery(topic, payload);
                }
                _ = shuffle_timer.tick() => {
                    overlay.shuffle_tick();
                }
                _ = heartbeat_timer.tick() => {
                    scribe_for_heartbeat.heartbeat_tick();
                }
                _ = scribe_repair_timer.tick() => {
                    scribe_for_repair.repair_tick(now_ms());
                }
                _ = gc_timer.tick() => {
                    ephemeral_for_gc.gc_tick();
                }
                _ = cover_timer.tick() => {
                    self.mixer.cover_traffic_tick();
                }
                else => {
                    warn!("every node channel closed, shutting down");
                    break;
                }
            }
        }

        self.swarm_task.abort();
        self.reputation.persist(self.persistence.as_ref());
        self.persistence.flush()?;
        Ok(())
    }
}
