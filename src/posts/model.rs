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

//! The `Post` type and its canonical signing bytes.

use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};

use crate::core::security::keystore::verify_pubkey_bytes;
use crate::core::types::{now_ms, Signature, SignPub, TimestampMs};
use crate::core::vdf::VdfProof;
use crate::core::wire::b64;
use crate::identity::claim::IdentityError;

/// The exact field order signed over, per the canonical serialization rule
/// shared with [`crate::identity::claim`] — every cryptographic field except
/// the signature itself.
#[derive(Serialize, Deserialize)]
struct PostSigningView<'a> {
    id: &'a str,
    content: &'a str,
    timestamp: TimestampMs,
    parent_id: Option<&'a str>,
    image_hash: Option<&'a str>,
    #[serde(with = "b64")]
    author_pub: &'a [u8],
    #[serde(with = "b64")]
    vdf_input: &'a [u8],
    #[serde(with = "b64")]
    vdf_proof: &'a [u8],
}

fn canonical_post_bytes(
    id: &str,
    content: &str,
    timestamp: TimestampMs,
    parent_id: Option<&str>,
    image_hash: Option<&str>,
    author_pub: &[u8],
    vdf_input: &[u8],
    vdf_proof: &[u8],
) -> Vec<u8> {
    let view = PostSigningView {
        id,
        content,
        timestamp,
        parent_id,
        image_hash,
        author_pub,
        vdf_input,
        vdf_proof,
    };
    serde_json::to_vec(&view).expect("post signing view is always serializable")
}

/// A single post. `signature` covers every other cryptographic field via
/// [`Post::signing_bytes`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Post {
    /// Unique post id (a UUID-like random string, assigned at creation).
    pub id: String,
    /// Sanitized post body. Bounded by `MAX_POST_SIZE` at creation time.
    pub content: String,
    /// Creation timestamp.
    pub timestamp: TimestampMs,
    /// Parent post id, if this is a reply.
    pub parent_id: Option<String>,
    /// Referenced image's content hash, if any, hex-encoded.
    pub image_hash: Option<String>,
    /// Author's claimed handle (verified out-of-band via the Identity Registry).
    pub author_handle: String,
    /// Author's Ed25519 public key.
    pub author_pub: SignPub,
    /// Per-post VDF input, empty when no per-post proof is attached.
    #[serde(with = "b64")]
    pub vdf_input: Vec<u8>,
    /// Per-post VDF proof, empty when no per-post proof is attached.
    pub vdf_proof: VdfProof,
    /// Claimed VDF iteration count for `vdf_proof`.
    #[serde(with = "crate::core::wire::bigint_n")]
    pub vdf_iterations: u128,
    /// Signature over [`Post::signing_bytes`].
    pub signature: Signature,
}

impl Post {
    /// The bytes the author's signature is computed over.
    pub fn signing_bytes(&self) -> Vec<u8> {
        canonical_post_bytes(
            &self.id,
            &self.content,
            self.timestamp,
            self.parent_id.as_deref(),
            self.image_hash.as_deref(),
            &self.author_pub.0,
            &self.vdf_input,
            &self.vdf_proof.0,
        )
    }

    /// Verify the author's signature over this post (identity binding is a
    /// separate check, performed by the Identity Registry).
    pub fn verify_signature(&self) -> Result<(), IdentityError> {
        let pk = self
            .author_pub
            .as_public_key_bytes()
            .ok_or(IdentityError::InvalidKey)?;
        verify_pubkey_bytes(&pk, &self.signing_bytes(), &self.signature)
            .map_err(|_| IdentityError::BadSignature)
    }
}

/// Freshly authored, unsigned post fields supplied by the caller.
pub struct NewPost {
    /// Sanitized content.
    pub content: String,
    /// Parent post id, if a reply.
    pub parent_id: Option<String>,
    /// Referenced image hash, if any.
    pub image_hash: Option<String>,
}

/// Build and sign a brand-new post using an arbitrary signer closure
/// (typically [`crate::identity::claim::PlaintextIdentity::sign`]), rather
/// than a raw `Ed25519KeyPair`.
pub fn create_post_signed(
    new_post: NewPost,
    author_handle: String,
    author_pub: SignPub,
    sign: impl Fn(&[u8]) -> Result<Signature, IdentityError>,
    vdf_input: Vec<u8>,
    vdf_proof: VdfProof,
    vdf_iterations: u128,
    id: String,
) -> Result<Post, IdentityError> {
    let timestamp = now_ms();
    let signing_bytes = canonical_post_bytes(
        &id,
        &new_post.content,
        timestamp,
        new_post.parent_id.as_deref(),
        new_post.image_hash.as_deref(),
        &author_pub.0,
        &vdf_input,
        &vdf_proof.0,
    );
    let signature = sign(&signing_bytes)?;

    Ok(Post {
        id,
        content: new_post.content,
        timestamp,
        parent_id: new_post.parent_id,
        image_hash: new_post.image_hash,
        author_handle,
        author_pub,
        vdf_input,
        vdf_proof,
        vdf_iterations,
        signature,
    })
}

/// Build and sign a brand-new post, optionally attaching a per-post VDF
/// proof (empty `vdf_input`/`vdf_proof` when none is attached). Exposed for
/// tests and callers that already hold a raw keypair.
pub fn create_post(
    new_post: NewPost,
    author_handle: String,
    sign_keypair: &Ed25519KeyPair,
    vdf_input: Vec<u8>,
    vdf_proof: VdfProof,
    vdf_iterations: u128,
    id: String,
) -> Post {
    let author_pub = sign_keypair.public_key().as_ref().to_vec();
    let timestamp = now_ms();

    let signing_bytes = canonical_post_bytes(
        &id,
        &new_post.content,
        timestamp,
        new_post.parent_id.as_deref(),
        new_post.image_hash.as_deref(),
        &author_pub,
        &vdf_input,
        &vdf_proof.0,
    );
    let sig = sign_keypair.sign(&signing_bytes);

    Post {
        id,
        content: new_post.content,
        timestamp,
        parent_id: new_post.parent_id,
        image_hash: new_post.image_hash,
        author_handle,
        author_pub: SignPub(author_pub),
        vdf_input,
        vdf_proof,
        vdf_iterations,
        signature: Signature(sig.as_ref().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    fn keypair() -> (Ed25519KeyPair, Vec<u8>) {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let kp = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        (kp, pkcs8.as_ref().to_vec())
    }

    #[test]
    fn post_signature_verifies() {
        let (kp, _) = keypair();
        let post = create_post(
            NewPost {
                content: "hello world".into(),
                parent_id: None,
                image_hash: None,
            },
            "alice".into(),
            &kp,
            vec![],
            VdfProof(vec![]),
            0,
            "post-1".into(),
        );
        assert!(post.verify_signature().is_ok());
    }

    #[test]
    fn tampered_content_fails_verification() {
        let (kp, _) = keypair();
        let mut post = create_post(
            NewPost {
                content: "hello world".into(),
                parent_id: None,
                image_hash: None,
            },
            "alice".into(),
            &kp,
            vec![],
            VdfProof(vec![]),
            0,
            "post-1".into(),
        );
        post.content = "tampered".into();
        assert!(post.verify_signature().is_err());
    }

    #[test]
    fn post_roundtrips_through_json() {
        let (kp, _) = keypair();
        let post = create_post(
            NewPost {
                content: "hi".into(),
                parent_id: Some("parent-1".into()),
                image_hash: None,
            },
            "bob".into(),
            &kp,
            vec![],
            VdfProof(vec![]),
            0,
            "post-2".into(),
        );
        let j = serde_json::to_vec(&post).unwrap();
        let back: Post = serde_json::from_slice(&j).unwrap();
        assert!(back.verify_signature().is_ok());
    }
}
