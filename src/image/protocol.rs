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

//! The `request_image` / `image_response` / `request_image_chunks` /
//! `chunk_response` wire protocol.

use serde::{Deserialize, Serialize};

use crate::core::types::TimestampMs;
use crate::core::wire::b64;

/// Metadata for a single chunk within an image's manifest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Hex-encoded `SHA-256(chunk_bytes)`.
    pub hash: String,
    /// Chunk size in bytes (`CHUNK_SIZE` for every chunk but the last).
    pub size: usize,
}

/// An image's manifest: `{merkle_root, chunks, total_size, created}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageManifest {
    /// Hex-encoded Merkle root over the ordered chunk hashes.
    pub merkle_root: String,
    /// Ordered chunk metadata.
    pub chunks: Vec<ChunkMeta>,
    /// Total image size in bytes.
    pub total_size: u64,
    /// Creation timestamp.
    pub created: TimestampMs,
}

/// A chunk's bytes, carried alongside its claimed hash so the receiver can
/// recompute and discard mismatches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkData {
    /// Hex-encoded `SHA-256(bytes)`, as claimed by the sender.
    pub hash: String,
    /// Chunk bytes.
    #[serde(with = "b64")]
    pub bytes: Vec<u8>,
}

/// One leg of the image fetch protocol. The outer [`crate::core::wire::WireMessage`]
/// variant (`request_image`/`image_response`/`request_image_chunks`/`chunk_response`)
/// already disambiguates direction; this `kind` tag mirrors it so the
/// payload is self-describing in isolation (e.g. in logs or tests).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ImageMsg {
    /// `request_image(hash)`: ask for the manifest of the image keyed by
    /// hex-encoded Merkle root `hash`.
    RequestImage {
        /// Hex-encoded Merkle root of the requested image.
        hash: String,
    },
    /// `image_response`: the manifest, if the responder has it, plus every
    /// chunk it already holds locally.
    ImageResponse {
        /// Hex-encoded Merkle root of the image.
        hash: String,
        /// `None` if the responder has no record of this image.
        manifest: Option<ImageManifest>,
        /// Locally-held chunks, possibly a subset of the full manifest.
        chunks: Vec<ChunkData>,
    },
    /// `request_image_chunks(hash, hashes)`: ask for specific missing chunks.
    RequestImageChunks {
        /// Hex-encoded Merkle root of the image.
        hash: String,
        /// Chunk hashes being requested.
        chunk_hashes: Vec<String>,
    },
    /// `chunk_response`: every requested chunk the responder holds.
    ChunkResponse {
        /// Hex-encoded Merkle root of the image.
        hash: String,
        /// Chunks the responder was able to supply.
        chunks: Vec<ChunkData>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_image_roundtrips_through_json() {
        let msg = ImageMsg::RequestImage {
            hash: "abc123".into(),
        };
        let j = serde_json::to_string(&msg).unwrap();
        assert!(j.contains("\"kind\":\"RequestImage\""));
        let _: ImageMsg = serde_json::from_str(&j).unwrap();
    }
}
