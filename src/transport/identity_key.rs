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

//! The transport-layer libp2p identity: separate from the node's Ember
//! signing/encryption identity ([`crate::identity::claim::PlaintextIdentity`]),
//! this is only the Ed25519 keypair libp2p's Noise handshake authenticates
//! connections with.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use libp2p::{identity, PeerId};
use thiserror::Error;

/// Errors loading or creating the transport identity.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Filesystem error reading, writing, or creating the key file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The on-disk key file is not a valid protobuf-encoded keypair.
    #[error("malformed identity key file")]
    Decode,
}

const KEY_FILE: &str = "p2p_identity.key";

/// Load the existing transport keypair from `data_dir/p2p_identity.key`, or
/// generate and persist a fresh one. Returns the derived [`PeerId`] alongside
/// the keypair.
pub fn load_or_create_identity(
    data_dir: impl AsRef<Path>,
) -> Result<(PeerId, identity::Keypair), IdentityError> {
    let dir = data_dir.as_ref();
    fs::create_dir_all(dir)?;

    let path: PathBuf = dir.join(KEY_FILE);

    if path.exists() {
        let bytes = fs::read(&path)?;
        let kp = identity::Keypair::from_protobuf_encoding(&bytes).map_err(|_| IdentityError::Decode)?;
        let peer_id = PeerId::from(kp.public());
        return Ok((peer_id, kp));
    }

    let kp = identity::Keypair::generate_ed25519();
    let bytes = kp.to_protobuf_encoding().map_err(|_| IdentityError::Decode)?;

    let tmp = dir.join(format!("{KEY_FILE}.tmp"));
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(&bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, &path)?;

    let peer_id = PeerId::from(kp.public());
    Ok((peer_id, kp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_then_reloads_the_same_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (peer_id_1, _) = load_or_create_identity(dir.path()).expect("create");
        let (peer_id_2, _) = load_or_create_identity(dir.path()).expect("reload");
        assert_eq!(peer_id_1, peer_id_2);
    }

    #[test]
    fn rejects_a_corrupt_key_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(KEY_FILE), b"not a keypair").unwrap();
        let err = load_or_create_identity(dir.path()).unwrap_err();
        assert!(matches!(err, IdentityError::Decode));
    }
}
