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

//! Background crypto worker: VDF computation and batch signature
//! verification run here, off the single-threaded protocol core, per the
//! design note "task + channel; do not expose promise chains into protocol
//! code." Protocol components send a job and `await` a oneshot reply; they
//! must not hold routing-table or peer-table references across that await.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::core::types::{Signature, SignPub};
use crate::core::vdf::{VdfBackend, VdfProof};

/// A unit of work the crypto worker can perform.
pub enum CryptoJob {
    /// Compute a VDF proof.
    ComputeVdf {
        /// VDF input bytes.
        input: Vec<u8>,
        /// Claimed iteration count.
        iterations: u128,
        /// Reply channel.
        reply: oneshot::Sender<VdfProof>,
    },
    /// Verify a VDF proof.
    VerifyVdf {
        /// VDF input bytes.
        input: Vec<u8>,
        /// Claimed iteration count.
        iterations: u128,
        /// Proof to verify.
        proof: VdfProof,
        /// Reply channel.
        reply: oneshot::Sender<bool>,
    },
    /// Verify a batch of Ed25519 signatures; returns a parallel vector of results.
    VerifyBatch {
        /// `(message, signature, public key)` triples.
        items: Vec<(Vec<u8>, Signature, SignPub)>,
        /// Reply channel.
        reply: oneshot::Sender<Vec<bool>>,
    },
}

/// Handle used by protocol components to submit crypto jobs.
#[derive(Clone)]
pub struct CryptoWorkerHandle {
    tx: mpsc::Sender<CryptoJob>,
}

impl CryptoWorkerHandle {
    /// Request a VDF proof; the background task runs it to completion.
    pub async fn compute_vdf(&self, input: Vec<u8>, iterations: u128) -> Option<VdfProof> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CryptoJob::ComputeVdf {
                input,
                iterations,
                reply,
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Request VDF proof verification.
    pub async fn verify_vdf(&self, input: Vec<u8>, iterations: u128, proof: VdfProof) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(CryptoJob::VerifyVdf {
                input,
                iterations,
                proof,
                reply,
            })
            .await
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Request a batch of Ed25519 signature verifications.
    pub async fn verify_batch(&self, items: Vec<(Vec<u8>, Signature, SignPub)>) -> Vec<bool> {
        let n = items.len();
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(CryptoJob::VerifyBatch { items, reply })
            .await
            .is_err()
        {
            return vec![false; n];
        }
        rx.await.unwrap_or_else(|_| vec![false; n])
    }
}

/// Spawn the crypto worker task, returning a cloneable handle. The task runs
/// until the handle (and all its clones) are dropped.
pub fn spawn(vdf: Arc<dyn VdfBackend>) -> CryptoWorkerHandle {
    let (tx, mut rx) = mpsc::channel::<CryptoJob>(256);

    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            match job {
                CryptoJob::ComputeVdf {
                    input,
                    iterations,
                    reply,
                } => {
                    let vdf = vdf.clone();
                    let proof = tokio::task::spawn_blocking(move || vdf.compute(&input, iterations))
                        .await
                        .unwrap_or(VdfProof(Vec::new()));
                    let _ = reply.send(proof);
                }
                CryptoJob::VerifyVdf {
                    input,
                    iterations,
                    proof,
                    reply,
                } => {
                    let vdf = vdf.clone();
                    let ok = tokio::task::spawn_blocking(move || {
                        vdf.verify(&input, iterations, &proof)
                    })
                    .await
                    .unwrap_or(false);
                    let _ = reply.send(ok);
                }
                CryptoJob::VerifyBatch { items, reply } => {
                    let results = tokio::task::spawn_blocking(move || {
                        items
                            .into_iter()
                            .map(|(msg, sig, pk)| {
                                pk.as_public_key_bytes()
                                    .map(|pk_bytes| {
                                        crate::core::security::keystore::verify_pubkey_bytes(
                                            &pk_bytes, &msg, &sig,
                                        )
                                        .is_ok()
                                    })
                                    .unwrap_or(false)
                            })
                            .collect::<Vec<_>>()
                    })
                    .await
                    .unwrap_or_default();
                    let _ = reply.send(results);
                }
            }
        }
        tracing::debug!("crypto worker channel closed, task exiting");
    });

    CryptoWorkerHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vdf::TestVdfBackend;

    #[tokio::test]
    async fn compute_then_verify_round_trips() {
        let handle = spawn(Arc::new(TestVdfBackend::with_rounds(4)));
        let proof = handle
            .compute_vdf(b"alice".to_vec(), 1000)
            .await
            .expect("worker alive");
        assert!(handle.verify_vdf(b"alice".to_vec(), 1000, proof).await);
    }
}
