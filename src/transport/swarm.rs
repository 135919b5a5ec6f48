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

//! The libp2p swarm: TCP + Noise + Yamux transport, `identify` + `ping`
//! housekeeping, and a `request-response`/cbor behaviour carrying every
//! [`WireMessage`] the protocol layers emit.
//!
//! Every protocol module (DHT, HyParView, Plumtree, Scribe, Post Engine,
//! Image Store, Mixer) addresses peers by an opaque peer-ref string via
//! [`crate::transport::sink::PeerSink`]; this module is the only place that
//! knows a peer-ref is really a libp2p [`PeerId`]. Unlike the gossipsub
//! consensus topic it replaces, Ember has no single shared broadcast topic —
//! every message names its own destination peer, so point-to-point
//! request-response is the natural fit. Responses are a bare acknowledgement;
//! nothing in the protocol layer blocks on a reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use libp2p::{
    core::upgrade,
    futures::StreamExt,
    identify, noise, ping,
    request_response::{self, OutboundRequestId, ProtocolSupport},
    swarm::{NetworkBehaviour, Swarm, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, StreamProtocol, Transport,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::wire::WireMessage;
use crate::monitoring::metrics::Metrics;
use crate::transport::identity_key::load_or_create_identity;
use crate::transport::rate::{LimitedKind, TransportLimits};
use crate::transport::reputation::{ReputationTable, PENALTY_MALFORMED, PENALTY_RATE_LIMITED};

/// Bare acknowledgement; the request-response protocol requires a response
/// type even though Ember's protocol traffic is fire-and-forget.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ack;

const PROTOCOL: &str = "/ember/wire/1.0.0";

/// Swarm construction/runtime errors.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Failed to load or create the transport identity.
    #[error("identity: {0}")]
    Identity(#[from] crate::transport::identity_key::IdentityError),
    /// Failed to build the Noise handshake config.
    #[error("noise handshake setup failed")]
    Noise,
    /// `listen_addr` did not parse as a multiaddr.
    #[error("invalid listen address")]
    ListenAddr,
}

/// An event surfaced to the node for bookkeeping (metrics, identity
/// resolution); the wire payload itself arrives via `inbound()`.
#[derive(Clone, Debug)]
pub enum SwarmEventOut {
    /// A peer's connection finished the Noise handshake.
    PeerConnected(PeerId),
    /// A peer's last connection closed.
    PeerDisconnected(PeerId),
}

#[derive(Debug)]
enum OutEvent {
    Wire(request_response::Event<WireMessage, Ack>),
    Identify(identify::Event),
    Ping(ping::Event),
}
impl From<request_response::Event<WireMessage, Ack>> for OutEvent {
    fn from(e: request_response::Event<WireMessage, Ack>) -> Self {
        Self::Wire(e)
    }
}
impl From<identify::Event> for OutEvent {
    fn from(e: identify::Event) -> Self {
        Self::Identify(e)
    }
}
impl From<ping::Event> for OutEvent {
    fn from(e: ping::Event) -> Self {
        Self::Ping(e)
    }
}

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "OutEvent")]
struct Behaviour {
    wire: request_response::cbor::Behaviour<WireMessage, Ack>,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

/// Swarm configuration.
#[derive(Clone, Debug)]
pub struct SwarmNodeConfig {
    /// Listen multiaddr, e.g. `/ip4/0.0.0.0/tcp/4001`.
    pub listen_addr: String,
    /// Data directory holding the persisted transport identity.
    pub data_dir: String,
    /// Bootstrap peers to dial at startup (multiaddrs with a trailing `/p2p/<peer_id>`).
    pub bootstrap: Vec<String>,
}

/// Outbound handle: send a [`WireMessage`] to a peer-ref (the peer's base58
/// [`PeerId`] string).
pub struct SwarmHandle {
    outbound_tx: mpsc::UnboundedSender<(String, WireMessage)>,
}

impl SwarmHandle {
    /// Queue `msg` for delivery to `peer_ref`. Silently dropped if the swarm
    /// task has already exited.
    pub fn send(&self, peer_ref: &str, msg: WireMessage) {
        let _ = self.outbound_tx.send((peer_ref.to_string(), msg));
    }
}

impl crate::transport::sink::PeerSink for SwarmHandle {
    fn send(&self, peer_id: &str, msg: WireMessage) {
        SwarmHandle::send(self, peer_id, msg);
    }
}

/// Spawn the swarm's event loop as a background task. Returns a handle to
/// send messages, a receiver of decoded inbound `(peer_ref, WireMessage)`
/// pairs, a receiver of connection bookkeeping events, and the task's join
/// handle.
pub fn spawn_swarm(
    cfg: SwarmNodeConfig,
    protocol: crate::core::types::ProtocolConfig,
    metrics: Arc<Metrics>,
    reputation: Arc<ReputationTable>,
) -> Result<
    (
        SwarmHandle,
        mpsc::UnboundedReceiver<(String, WireMessage)>,
        mpsc::UnboundedReceiver<SwarmEventOut>,
        tokio::task::JoinHandle<()>,
    ),
    SwarmError,
> {
    let (local_peer_id, id_keys) = load_or_create_identity(&cfg.data_dir)?;

    let noise_keys = noise::Config::new(&id_keys).map_err(|_| SwarmError::Noise)?;
    let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
        .upgrade(upgrade::Version::V1)
        .authenticate(noise_keys)
        .multiplex(yamux::Config::default())
        .boxed();

    let wire = request_response::cbor::Behaviour::<WireMessage, Ack>::new(
        [(StreamProtocol::new(PROTOCOL), ProtocolSupport::Full)],
        request_response::Config::default(),
    );
    let identify = identify::Behaviour::new(identify::Config::new(
        "ember/1.0.0".to_string(),
        id_keys.public(),
    ));
    let ping = ping::Behaviour::new(
        ping::Config::new()
            .with_interval(Duration::from_secs(10))
            .with_timeout(Duration::from_secs(20)),
    );
    let behaviour = Behaviour { wire, identify, ping };

    let mut swarm = Swarm::new(
        transport,
        behaviour,
        local_peer_id,
        libp2p::swarm::Config::with_tokio_executor(),
    );

    let listen: Multiaddr = cfg.listen_addr.parse().map_err(|_| SwarmError::ListenAddr)?;
    swarm.listen_on(listen).map_err(|_| SwarmError::ListenAddr)?;

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<(String, WireMessage)>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<(String, WireMessage)>();
    let (ev_tx, ev_rx) = mpsc::unbounded_channel::<SwarmEventOut>();

    let bootstrap = cfg.bootstrap.clone();
    let join = tokio::spawn(async move {
        for b in bootstrap.iter().map(|x| x.trim()).filter(|x| !x.is_empty()) {
            match b.parse::<Multiaddr>() {
                Ok(ma) => {
                    if let Err(e) = swarm.dial(ma.clone()) {
                        warn!(boot = %b, err = ?e, "dial bootstrap failed");
                    } else {
                        info!(boot = %b, "dialing bootstrap");
                    }
                }
                Err(_) => warn!(boot = %b, "bad bootstrap addr; skipping"),
            }
        }

        info!(%local_peer_id, "swarm started");
        metrics.peers_connected.set(0);

        let mut peers_by_ref: HashMap<String, PeerId> = HashMap::new();
        let mut limits = TransportLimits::new(&protocol);
        let mut pending: HashMap<OutboundRequestId, ()> = HashMap::new();

        loop {
            tokio::select! {
                maybe_msg = out_rx.recv() => {
                    match maybe_msg {
                        Some((peer_ref, msg)) => {
                            match peer_ref.parse::<PeerId>().or_else(|_| {
                                peers_by_ref.get(&peer_ref).copied().ok_or(())
                            }) {
                                Ok(peer_id) => {
                                    let id = swarm.behaviour_mut().wire.send_request(&peer_id, msg);
                                    pending.insert(id, ());
                                }
                                Err(_) => {
                                    warn!(peer_ref, "unknown peer-ref, dropping outbound message");
                                }
                            }
                        }
                        None => {
                            warn!("outbound channel closed; stopping swarm task");
                            break;
                        }
                    }
                }

                ev = swarm.select_next_some() => {
                    match ev {
                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "listening");
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                            if let Some(addr) = endpoint.get_remote_address().iter().find_map(|p| match p {
                                libp2p::multiaddr::Protocol::Ip4(a) => Some(std::net::IpAddr::V4(a)),
                                libp2p::multiaddr::Protocol::Ip6(a) => Some(std::net::IpAddr::V6(a)),
                                _ => None,
                            }) {
                                if !limits.allow_connection(addr) {
                                    warn!(%peer_id, %addr, "connection rate-limited; disconnecting");
                                    let _ = swarm.disconnect_peer_id(peer_id);
                                    continue;
                                }
                            }
                            peers_by_ref.insert(peer_id.to_string(), peer_id);
                            metrics.peers_connected.inc();
                            let _ = ev_tx.send(SwarmEventOut::PeerConnected(peer_id));
                            info!(%peer_id, "peer connected");
                        }

                        SwarmEvent::ConnectionClosed { peer_id, .. } => {
                            peers_by_ref.remove(&peer_id.to_string());
                            metrics.peers_connected.dec();
                            let _ = ev_tx.send(SwarmEventOut::PeerDisconnected(peer_id));
                            info!(%peer_id, "peer disconnected");
                        }

                        SwarmEvent::Behaviour(OutEvent::Wire(request_response::Event::Message { peer, message, .. })) => {
                            match message {
                                request_response::Message::Request { request, channel, .. } => {
                                    let kind = match &request {
                                        WireMessage::NewPost(_) => Some(LimitedKind::NewPost),
                                        WireMessage::ParentUpdate(_) => Some(LimitedKind::ParentUpdate),
                                        _ => None,
                                    };
                                    let peer_ref = peer.to_string();
                                    let allowed = match kind {
                                        Some(k) => limits.allow_message(&peer_ref, k),
                                        None => true,
                                    };
                                    if allowed {
                                        let _ = in_tx.send((peer_ref, request));
                                    } else {
                                        metrics.rate_limited_total.inc();
                                        reputation.penalize(&peer_ref, PENALTY_RATE_LIMITED);
                                    }
                                    let _ = swarm.behaviour_mut().wire.send_response(channel, Ack);
                                }
                                request_response::Message::Response { request_id, .. } => {
                                    pending.remove(&request_id);
                                }
                            }
                        }
                        SwarmEvent::Behaviour(OutEvent::Wire(request_response::Event::OutboundFailure { request_id, error, .. })) => {
                            pending.remove(&request_id);
                            metrics.invalid_msg_total.inc();
                            warn!(?error, "outbound wire request failed");
                        }
                        SwarmEvent::Behaviour(OutEvent::Wire(request_response::Event::InboundFailure { peer, error, .. })) => {
                            metrics.invalid_msg_total.inc();
                            reputation.penalize(&peer.to_string(), PENALTY_MALFORMED);
                            warn!(%peer, ?error, "inbound wire request could not be decoded");
                        }
                        SwarmEvent::Behaviour(OutEvent::Wire(_)) => {}
                        SwarmEvent::Behaviour(OutEvent::Identify(_)) => {}
                        SwarmEvent::Behaviour(OutEvent::Ping(_)) => {}

                        _ => {}
                    }
                }
            }
        }
    });

    Ok((SwarmHandle { outbound_tx: out_tx }, in_rx, ev_rx, join))
}
