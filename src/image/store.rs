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

//! Fixed-size chunking, an un-keyed pairing-tree Merkle root over chunk
//! hashes, and the fetch-from-a-random-sample protocol.
//!
//! The manifest tree is a plain ordered pairing over chunk hashes with no
//! domain separation and no key component, unlike
//! [`crate::core::state::merkle`]'s keyed `(key, value)` state tree — the
//! two don't share a construction, only the general "duplicate the last
//! hash at odd levels" shape.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rand::seq::SliceRandom;
use ring::digest;
use tracing::{debug, warn};

use crate::core::types::now_ms;
use crate::core::wire::WireMessage;
use crate::identity::registry::ActiveView;
use crate::image::protocol::{ChunkData, ChunkMeta, ImageManifest, ImageMsg};
use crate::transport::sink::PeerSink;

/// Fixed chunk size: 64 KiB.
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Number of active peers sampled per fetch round.
pub const FETCH_SAMPLE: usize = 3;
/// Chunks bundled per `chunk_response`, so large images fragment rather
/// than risk exceeding `MAX_MESSAGE_SIZE`.
pub const MAX_CHUNKS_PER_RESPONSE: usize = 16;

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let d = digest::digest(&digest::SHA256, bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(d.as_ref());
    out
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Split `data` into `CHUNK_SIZE` blocks, the last possibly shorter.
pub fn chunk_bytes(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    data.chunks(CHUNK_SIZE).collect()
}

/// The pairing-tree Merkle root over ordered chunk hashes: `H(left || right)`
/// at each level, duplicating the last hash when a level has an odd count.
pub fn merkle_root(chunk_hashes: &[[u8; 32]]) -> [u8; 32] {
    if chunk_hashes.is_empty() {
        return [0u8; 32];
    }
    let mut level: Vec<[u8; 32]> = chunk_hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut i = 0;
        while i < level.len() {
            let left = level[i];
            let right = if i + 1 < level.len() { level[i + 1] } else { level[i] };
            let mut buf = Vec::with_capacity(64);
            buf.extend_from_slice(&left);
            buf.extend_from_slice(&right);
            next.push(sha256(&buf));
            i += 2;
        }
        level = next;
    }
    level[0]
}

/// Decoupling seam: notified once every chunk of a previously-incomplete
/// image has arrived (implemented by whatever renders pending posts, out of
/// this crate's scope).
pub trait ImageReadyHook: Send + Sync {
    /// `hash` is now fully reconstructible locally.
    fn on_image_ready(&self, hash: &str);
}

/// A no-op hook for nodes with no renderer attached.
#[derive(Default)]
pub struct NullImageReadyHook;

impl ImageReadyHook for NullImageReadyHook {
    fn on_image_ready(&self, _hash: &str) {}
}

struct PendingImage {
    manifest: ImageManifest,
    have: HashSet<String>,
}

impl PendingImage {
    fn missing(&self) -> Vec<String> {
        self.manifest
            .chunks
            .iter()
            .map(|c| c.hash.clone())
            .filter(|h| !self.have.contains(h))
            .collect()
    }

    fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

/// The content-addressed image store.
pub struct ImageStore {
    self_ref: String,
    active: Arc<dyn ActiveView>,
    sink: Arc<dyn PeerSink>,
    ready_hook: Arc<dyn ImageReadyHook>,
    manifests: Mutex<std::collections::HashMap<String, PendingImage>>,
    chunks: Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl ImageStore {
    /// Construct a store for `self_ref` (this node's wire peer id).
    pub fn new(
        self_ref: String,
        active: Arc<dyn ActiveView>,
        sink: Arc<dyn PeerSink>,
        ready_hook: Arc<dyn ImageReadyHook>,
    ) -> Self {
        Self {
            self_ref,
            active,
            sink,
            ready_hook,
            manifests: Mutex::new(std::collections::HashMap::new()),
            chunks: Mutex::new(std::collections::HashMap::new()),
        }
    }

    fn random_peers(&self, exclude: Option<&str>) -> Vec<String> {
        let mut peers = self.active.active_peer_refs();
        peers.retain(|p| p != &self.self_ref && Some(p.as_str()) != exclude);
        let mut rng = rand::thread_rng();
        peers.shuffle(&mut rng);
        peers.truncate(FETCH_SAMPLE);
        peers
    }

    /// Chunk and store a freshly-uploaded image locally, returning its
    /// manifest. The manifest's `merkle_root` is the image's content hash.
    pub fn create_image(&self, data: &[u8]) -> ImageManifest {
        let chunk_slices = chunk_bytes(data);
        let hashes: Vec<[u8; 32]> = chunk_slices.iter().map(|c| sha256(c)).collect();
        let root = merkle_root(&hashes);
        let root_hex = hex(&root);

        let mut chunks_meta = Vec::with_capacity(chunk_slices.len());
        let mut have = HashSet::new();
        let mut chunk_store = self.chunks.lock().expect("lock");
        for (slice, h) in chunk_slices.iter().zip(hashes.iter()) {
            let h_hex = hex(h);
            chunk_store.insert(h_hex.clone(), slice.to_vec());
            chunks_meta.push(ChunkMeta {
                hash: h_hex.clone(),
                size: slice.len(),
            });
            have.insert(h_hex);
        }
        drop(chunk_store);

        let manifest = ImageManifest {
            merkle_root: root_hex.clone(),
            chunks: chunks_meta,
            total_size: data.len() as u64,
            created: now_ms(),
        };

        self.manifests.lock().expect("lock").insert(
            root_hex,
            PendingImage {
                manifest: manifest.clone(),
                have,
            },
        );
        manifest
    }

    /// Whether every chunk for `hash` is present locally.
    pub fn is_complete(&self, hash: &str) -> bool {
        self.manifests
            .lock()
            .expect("lock")
            .get(hash)
            .map(PendingImage::is_complete)
            .unwrap_or(false)
    }

    /// Reassemble the full image bytes, if every chunk is present.
    pub fn reconstruct(&self, hash: &str) -> Option<Vec<u8>> {
        let manifests = self.manifests.lock().expect("lock");
        let pending = manifests.get(hash)?;
        if !pending.is_complete() {
            return None;
        }
        let chunk_store = self.chunks.lock().expect("lock");
        let mut out = Vec::with_capacity(pending.manifest.total_size as usize);
        for meta in &pending.manifest.chunks {
            out.extend_from_slice(chunk_store.get(&meta.hash)?);
        }
        Some(out)
    }

    /// Begin (or continue) fetching `hash`: request metadata/chunks from a
    /// random sample of active peers. Called when a post references an
    /// `image_hash` whose chunks aren't all local.
    pub fn ensure_local(&self, hash: &str) {
        if self.is_complete(hash) {
            return;
        }
        for peer in self.random_peers(None) {
            self.sink.send(
                &peer,
                WireMessage::RequestImage(ImageMsg::RequestImage {
                    hash: hash.to_string(),
                }),
            );
        }
    }

    /// Handle an inbound `request_image`: reply with whatever manifest and
    /// chunks we hold locally.
    pub fn handle_request_image(&self, requester: &str, hash: &str) {
        let manifests = self.manifests.lock().expect("lock");
        let chunk_store = self.chunks.lock().expect("lock");
        let (manifest, chunks) = match manifests.get(hash) {
            Some(pending) => {
                let chunks: Vec<ChunkData> = pending
                    .have
                    .iter()
                    .filter_map(|h| chunk_store.get(h).map(|bytes| ChunkData {
                        hash: h.clone(),
                        bytes: bytes.clone(),
                    }))
                    .collect();
                (Some(pending.manifest.clone()), chunks)
            }
            None => (None, Vec::new()),
        };
        drop(chunk_store);
        drop(manifests);

        self.sink.send(
            requester,
            WireMessage::ImageResponse(ImageMsg::ImageResponse {
                hash: hash.to_string(),
                manifest,
                chunks,
            }),
        );
    }

    /// Handle an inbound `image_response`: adopt the manifest if new, store
    /// any chunks it carried, and request the rest if still incomplete.
    pub fn handle_image_response(
        &self,
        from: &str,
        hash: &str,
        manifest: Option<ImageManifest>,
        chunks: Vec<ChunkData>,
    ) {
        if let Some(manifest) = manifest {
            if !self.manifests.lock().expect("lock").contains_key(hash) {
                let hashes: Result<Vec<[u8; 32]>, ()> = manifest
                    .chunks
                    .iter()
                    .map(|c| decode_hex(&c.hash).ok_or(()))
                    .collect();
                let Ok(hashes) = hashes else {
                    warn!(hash, "image manifest has malformed chunk hash, dropping");
                    return;
                };
                if hex(&merkle_root(&hashes)) != manifest.merkle_root {
                    warn!(hash, "image manifest merkle root mismatch, dropping");
                    return;
                }
                self.manifests.lock().expect("lock").insert(
                    hash.to_string(),
                    PendingImage {
                        manifest,
                        have: HashSet::new(),
                    },
                );
            }
        }

        self.absorb_chunks(hash, chunks);

        if self.is_complete(hash) {
            self.ready_hook.on_image_ready(hash);
            return;
        }

        let missing = {
            let manifests = self.manifests.lock().expect("lock");
            manifests.get(hash).map(PendingImage::missing)
        };
        if let Some(missing) = missing {
            if !missing.is_empty() {
                for peer in self.random_peers(Some(from)) {
                    self.sink.send(
                        &peer,
                        WireMessage::RequestImageChunks(ImageMsg::RequestImageChunks {
                            hash: hash.to_string(),
                            chunk_hashes: missing.clone(),
                        }),
                    );
                }
            }
        }
    }

    /// Handle an inbound `request_image_chunks`: reply with whichever
    /// requested chunks we hold, fragmented to `MAX_CHUNKS_PER_RESPONSE`.
    pub fn handle_request_image_chunks(&self, requester: &str, hash: &str, chunk_hashes: &[String]) {
        let chunk_store = self.chunks.lock().expect("lock");
        let found: Vec<ChunkData> = chunk_hashes
            .iter()
            .filter_map(|h| chunk_store.get(h).map(|bytes| ChunkData {
                hash: h.clone(),
                bytes: bytes.clone(),
            }))
            .collect();
        drop(chunk_store);

        for batch in found.chunks(MAX_CHUNKS_PER_RESPONSE) {
            self.sink.send(
                requester,
                WireMessage::ChunkResponse(ImageMsg::ChunkResponse {
                    hash: hash.to_string(),
                    chunks: batch.to_vec(),
                }),
            );
        }
    }

    /// Handle an inbound `chunk_response`.
    pub fn handle_chunk_response(&self, hash: &str, chunks: Vec<ChunkData>) {
        self.absorb_chunks(hash, chunks);
        if self.is_complete(hash) {
            self.ready_hook.on_image_ready(hash);
        }
    }

    /// Verify each chunk's claimed hash and store it if it matches and the
    /// image's manifest expects it; mismatches are discarded.
    fn absorb_chunks(&self, hash: &str, chunks: Vec<ChunkData>) {
        let mut manifests = self.manifests.lock().expect("lock");
        let Some(pending) = manifests.get_mut(hash) else {
            debug!(hash, "chunks arrived for unknown image manifest, dropping");
            return;
        };
        let expected: HashSet<String> = pending.manifest.chunks.iter().map(|c| c.hash.clone()).collect();

        let mut chunk_store = self.chunks.lock().expect("lock");
        for chunk in chunks {
            if !expected.contains(&chunk.hash) {
                continue;
            }
            if hex(&sha256(&chunk.bytes)) != chunk.hash {
                warn!(hash = %chunk.hash, "chunk hash mismatch, discarding");
                continue;
            }
            chunk_store.insert(chunk.hash.clone(), chunk.bytes);
            pending.have.insert(chunk.hash);
        }
    }
}

fn decode_hex(s: &str) -> Option<[u8; 32]> {
    if s.len() != 64 {
        return None;
    }
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
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

    fn store(self_ref: &str, peers: Vec<String>) -> (ImageStore, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let store = ImageStore::new(
            self_ref.to_string(),
            Arc::new(FixedActive(peers)),
            sink.clone(),
            Arc::new(NullImageReadyHook),
        );
        (store, sink)
    }

    #[test]
    fn merkle_root_is_deterministic() {
        let a = sha256(b"chunk-a");
        let b = sha256(b"chunk-b");
        let r1 = merkle_root(&[a, b]);
        let r2 = merkle_root(&[a, b]);
        assert_eq!(r1, r2);
    }

    #[test]
    fn odd_chunk_count_duplicates_last_hash() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        let c = sha256(b"c");
        let with_three = merkle_root(&[a, b, c]);
        let with_duplicated_last = merkle_root(&[a, b, c, c]);
        assert_eq!(with_three, with_duplicated_last);
    }

    #[test]
    fn create_image_is_immediately_complete_and_reconstructs() {
        let (store, _sink) = store("me", vec![]);
        let data = vec![7u8; CHUNK_SIZE * 2 + 100];
        let manifest = store.create_image(&data);
        assert!(store.is_complete(&manifest.merkle_root));
        assert_eq!(store.reconstruct(&manifest.merkle_root), Some(data));
    }

    #[test]
    fn ensure_local_requests_from_active_sample() {
        let (store, sink) = store("me", vec!["p1".into(), "p2".into(), "p3".into(), "p4".into()]);
        store.ensure_local("deadbeef");
        let sent = sink.drain();
        assert!(sent.len() <= FETCH_SAMPLE);
        assert!(sent.iter().all(|(peer, _)| peer != "me"));
    }

    #[test]
    fn mismatched_chunk_hash_is_discarded() {
        let (store, _sink) = store("me", vec![]);
        let real = sha256(b"real-bytes");
        let manifest = ImageManifest {
            merkle_root: hex(&merkle_root(&[real])),
            chunks: vec![ChunkMeta {
                hash: hex(&real),
                size: 10,
            }],
            total_size: 10,
            created: now_ms(),
        };
        store.manifests.lock().unwrap().insert(
            manifest.merkle_root.clone(),
            PendingImage {
                manifest: manifest.clone(),
                have: HashSet::new(),
            },
        );
        store.absorb_chunks(
            &manifest.merkle_root,
            vec![ChunkData {
                hash: hex(&real),
                bytes: b"tampered-bytes".to_vec(),
            }],
        );
        assert!(!store.is_complete(&manifest.merkle_root));
    }
}
