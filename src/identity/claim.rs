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

//! The public `Claim`, the node-private `LocalIdentity`, and `RoutingRecord`.

use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::security::keystore::verify_pubkey_bytes;
use crate::core::security::vault;
use crate::core::types::{now_ms, EncPub, NodeId, Signature, SignPub, TimestampMs};
use crate::core::vdf::{VdfBackend, VdfProof};
use crate::core::wire::{b64, bigint_n};

/// Claim/identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The claim's signature did not verify.
    #[error("bad claim signature")]
    BadSignature,
    /// The claim's VDF proof did not verify.
    #[error("bad vdf proof")]
    BadVdf,
    /// The vault passphrase was wrong or the vault was corrupt.
    #[error("vault open failed")]
    VaultOpen,
    /// Key bytes were not a valid Ed25519 keypair.
    #[error("invalid key material")]
    InvalidKey,
}

/// The signed fields of a `Claim`, in the exact field order used for both
/// signing and verification (the canonical "stable key-ordered JSON-like
/// form" from the specification; byte fields are base64 via `b64`, and the
/// VDF iteration count is the BigInt-with-trailing-`n` string form).
#[derive(Serialize, Deserialize)]
struct ClaimSigningView<'a> {
    handle: &'a str,
    #[serde(with = "b64")]
    sign_pub: &'a [u8],
    #[serde(with = "b64")]
    enc_pub: &'a [u8],
    #[serde(with = "b64")]
    vdf_input: &'a [u8],
    #[serde(with = "b64")]
    vdf_proof: &'a [u8],
    #[serde(with = "bigint_n")]
    vdf_iterations: u128,
    claimed_at: TimestampMs,
}

fn canonical_claim_bytes(
    handle: &str,
    sign_pub: &[u8],
    enc_pub: &[u8],
    vdf_input: &[u8],
    vdf_proof: &[u8],
    vdf_iterations: u128,
    claimed_at: TimestampMs,
) -> Vec<u8> {
    let view = ClaimSigningView {
        handle,
        sign_pub,
        enc_pub,
        vdf_input,
        vdf_proof,
        vdf_iterations,
        claimed_at,
    };
    // Struct field order is fixed at compile time, so this is deterministic
    // across processes without requiring a sorted-map serializer.
    serde_json::to_vec(&view).expect("claim signing view is always serializable")
}

/// A self-sovereign public identity claim, published to the DHT.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claim {
    /// Case-insensitive unique handle.
    pub handle: String,
    /// Ed25519 signing public key.
    pub sign_pub: SignPub,
    /// Curve25519 encryption public key.
    pub enc_pub: EncPub,
    /// Bytes the VDF proof was computed over (derived from handle + sign_pub).
    #[serde(with = "b64")]
    pub vdf_input: Vec<u8>,
    /// VDF proof of the iteration count below.
    pub vdf_proof: VdfProof,
    /// Claimed VDF iteration count.
    #[serde(with = "bigint_n")]
    pub vdf_iterations: u128,
    /// Routing address, `SHA1(sign_pub)`.
    pub node_id: NodeId,
    /// Creation time.
    pub claimed_at: TimestampMs,
    /// Signature over the canonical serialization of every prior field.
    pub signature: Signature,
}

impl Claim {
    /// The bytes the signature is computed over (every field but `signature`
    /// and `node_id`, which is itself derived from `sign_pub`).
    fn signing_bytes(&self) -> Vec<u8> {
        canonical_claim_bytes(
            &self.handle,
            &self.sign_pub.0,
            &self.enc_pub.0,
            &self.vdf_input,
            &self.vdf_proof.0,
            self.vdf_iterations,
            self.claimed_at,
        )
    }

    /// Verify both the signature and the VDF proof.
    pub fn verify(&self, vdf: &dyn VdfBackend) -> Result<(), IdentityError> {
        let pk = self
            .sign_pub
            .as_public_key_bytes()
            .ok_or(IdentityError::InvalidKey)?;
        verify_pubkey_bytes(&pk, &self.signing_bytes(), &self.signature)
            .map_err(|_| IdentityError::BadSignature)?;
        if !vdf.verify(&self.vdf_input, self.vdf_iterations, &self.vdf_proof) {
            return Err(IdentityError::BadVdf);
        }
        if self.sign_pub.node_id() != self.node_id {
            return Err(IdentityError::BadSignature);
        }
        Ok(())
    }
}

/// Derive the VDF input bytes for a prospective handle/sign_pub pair —
/// `vdf_input = handle_lower || 0x00 || sign_pub`.
pub fn derive_vdf_input(handle: &str, sign_pub: &[u8]) -> Vec<u8> {
    let mut out = handle.to_lowercase().into_bytes();
    out.push(0u8);
    out.extend_from_slice(sign_pub);
    out
}

/// A node's own identity: a `Claim` plus the secret keys that produced it.
/// Never serialized over the wire.
pub struct PlaintextIdentity {
    /// The public claim.
    pub claim: Claim,
    /// Ed25519 PKCS#8 secret key bytes.
    sign_secret_pkcs8: Vec<u8>,
    /// Curve25519 secret scalar (opaque to the core beyond DM routing).
    pub enc_secret: Vec<u8>,
}

impl PlaintextIdentity {
    /// Build a fresh `PlaintextIdentity` given a generated Ed25519 keypair,
    /// an X25519 secret, a handle, and a freshly computed VDF proof.
    pub fn new(
        handle: String,
        sign_keypair: Ed25519KeyPair,
        sign_secret_pkcs8: Vec<u8>,
        enc_pub: Vec<u8>,
        enc_secret: Vec<u8>,
        vdf_proof: VdfProof,
        vdf_iterations: u128,
    ) -> Self {
        let sign_pub_bytes = sign_keypair.public_key().as_ref().to_vec();
        let vdf_input = derive_vdf_input(&handle, &sign_pub_bytes);
        let claimed_at = now_ms();
        let node_id = NodeId::sha1_of(&sign_pub_bytes);

        let signing_bytes = canonical_claim_bytes(
            &handle,
            &sign_pub_bytes,
            &enc_pub,
            &vdf_input,
            &vdf_proof.0,
            vdf_iterations,
            claimed_at,
        );
        let sig = sign_keypair.sign(&signing_bytes);

        let claim = Claim {
            handle,
            sign_pub: SignPub(sign_pub_bytes),
            enc_pub: EncPub(enc_pub),
            vdf_input,
            vdf_proof,
            vdf_iterations,
            node_id,
            claimed_at,
            signature: Signature(sig.as_ref().to_vec()),
        };

        Self {
            claim,
            sign_secret_pkcs8,
            enc_secret,
        }
    }

    /// Sign arbitrary bytes with this identity's secret key (used by the post
    /// engine, attestations, and DHT routing-record signing).
    pub fn sign(&self, bytes: &[u8]) -> Result<Signature, IdentityError> {
        let kp = Ed25519KeyPair::from_pkcs8(&self.sign_secret_pkcs8)
            .map_err(|_| IdentityError::InvalidKey)?;
        Ok(Signature(kp.sign(bytes).as_ref().to_vec()))
    }

    /// Reconstruct a `PlaintextIdentity` from a previously published claim
    /// and its secret key material, e.g. when reloading a node's own
    /// identity from disk across restarts.
    pub fn from_parts(claim: Claim, sign_secret_pkcs8: Vec<u8>, enc_secret: Vec<u8>) -> Self {
        Self {
            claim,
            sign_secret_pkcs8,
            enc_secret,
        }
    }

    /// Wrap this identity's secrets in a passphrase-encrypted vault.
    pub fn seal(&self, passphrase: &[u8]) -> Result<VaultedIdentity, IdentityError> {
        let mut plaintext = Vec::with_capacity(self.sign_secret_pkcs8.len() + self.enc_secret.len() + 2);
        plaintext.extend_from_slice(&(self.sign_secret_pkcs8.len() as u16).to_be_bytes());
        plaintext.extend_from_slice(&self.sign_secret_pkcs8);
        plaintext.extend_from_slice(&self.enc_secret);
        let blob = vault::seal(passphrase, &plaintext).map_err(|_| IdentityError::VaultOpen)?;
        Ok(VaultedIdentity {
            claim: self.claim.clone(),
            vault: blob,
        })
    }
}

/// An identity whose secrets are wrapped at rest; must be unlocked with a
/// passphrase to sign anything.
#[derive(Clone)]
pub struct VaultedIdentity {
    /// The public claim (always readable, since it's public anyway).
    pub claim: Claim,
    /// Opaque vault blob wrapping the secret key material.
    pub vault: Vec<u8>,
}

impl VaultedIdentity {
    /// Decrypt the vault, producing a plaintext identity.
    pub fn unlock(&self, passphrase: &[u8]) -> Result<PlaintextIdentity, IdentityError> {
        let plaintext = vault::open(passphrase, &self.vault).map_err(|_| IdentityError::VaultOpen)?;
        if plaintext.len() < 2 {
            return Err(IdentityError::InvalidKey);
        }
        let sign_len = u16::from_be_bytes([plaintext[0], plaintext[1]]) as usize;
        if plaintext.len() < 2 + sign_len {
            return Err(IdentityError::InvalidKey);
        }
        let sign_secret_pkcs8 = plaintext[2..2 + sign_len].to_vec();
        let enc_secret = plaintext[2 + sign_len..].to_vec();
        Ok(PlaintextIdentity {
            claim: self.claim.clone(),
            sign_secret_pkcs8,
            enc_secret,
        })
    }
}

/// Sum type per design note: a node's identity is either held in the clear
/// or vault-wrapped at rest.
pub enum LocalIdentity {
    /// Secrets available in memory.
    Plaintext(PlaintextIdentity),
    /// Secrets only available after `unlock`.
    Vaulted(VaultedIdentity),
}

impl LocalIdentity {
    /// The public claim, regardless of vault state.
    pub fn claim(&self) -> &Claim {
        match self {
            LocalIdentity::Plaintext(p) => &p.claim,
            LocalIdentity::Vaulted(v) => &v.claim,
        }
    }
}

/// A DHT-stored pointer from a handle's routing address to its current wire
/// transport peer id, refreshed periodically and on peer-id change.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingRecord {
    /// Owning handle.
    pub handle: String,
    /// Routing address (`SHA1(sign_pub)`).
    pub node_id: NodeId,
    /// Current libp2p `PeerId`, string form.
    pub wire_peer_id: String,
    /// Timestamp of the last refresh.
    pub timestamp: TimestampMs,
    /// Seconds until this record should be treated as stale.
    pub ttl_secs: u64,
}

impl RoutingRecord {
    /// Whether the record has aged out of its TTL as of `now`.
    pub fn is_expired(&self, now: TimestampMs) -> bool {
        now.saturating_sub(self.timestamp) > self.ttl_secs * 1000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vdf::TestVdfBackend;
    use ring::rand::SystemRandom;

    fn make_identity(handle: &str, vdf: &dyn VdfBackend) -> PlaintextIdentity {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let kp = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let sign_pub = kp.public_key().as_ref().to_vec();
        let vdf_input = derive_vdf_input(handle, &sign_pub);
        let proof = vdf.compute(&vdf_input, 1000);
        PlaintextIdentity::new(
            handle.to_string(),
            kp,
            pkcs8.as_ref().to_vec(),
            vec![1, 2, 3, 4],
            vec![5, 6, 7, 8],
            proof,
            1000,
        )
    }

    #[test]
    fn claim_verifies() {
        let vdf = TestVdfBackend::with_rounds(4);
        let id = make_identity("alice", &vdf);
        assert!(id.claim.verify(&vdf).is_ok());
    }

    #[test]
    fn claim_roundtrips_through_json() {
        let vdf = TestVdfBackend::with_rounds(4);
        let id = make_identity("alice", &vdf);
        let j = serde_json::to_vec(&id.claim).unwrap();
        let back: Claim = serde_json::from_slice(&j).unwrap();
        assert!(back.verify(&vdf).is_ok());
    }

    #[test]
    fn vault_round_trip_signs_after_unlock() {
        let vdf = TestVdfBackend::with_rounds(4);
        let id = make_identity("alice", &vdf);
        let vaulted = id.seal(b"hunter2").unwrap();
        let unlocked = vaulted.unlock(b"hunter2").unwrap();
        let sig = unlocked.sign(b"hello").unwrap();
        let pk = unlocked.claim.sign_pub.as_public_key_bytes().unwrap();
        assert!(verify_pubkey_bytes(&pk, b"hello", &sig).is_ok());
    }
}
