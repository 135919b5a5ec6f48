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

//! At-rest wrapping of an identity's secret key material, reusing the
//! keystore's PBKDF2 + AES-256-GCM encryption format so a `LocalIdentity`
//! can be stored either in the clear (dev/test) or vault-wrapped (per design
//! note: "the registry's local identity type is a sum of {plaintext secrets,
//! vault-wrapped secrets}").

use ring::{
    aead,
    pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use std::num::NonZeroU32;
use thiserror::Error;
use zeroize::Zeroize;

/// Vault errors.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Passphrase did not decrypt the vault (wrong passphrase or corrupt data).
    #[error("wrong passphrase or corrupt vault")]
    Crypto,
    /// Vault bytes were truncated or malformed.
    #[error("malformed vault")]
    Malformed,
}

const VAULT_MAGIC: &[u8] = b"EMBRVLT1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const PBKDF2_ITERS: u32 = 200_000;

fn derive_key(passphrase: &[u8], salt: &[u8; SALT_LEN]) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        NonZeroU32::new(PBKDF2_ITERS).expect("nonzero"),
        salt,
        passphrase,
        &mut out,
    );
    out
}

/// Encrypt `plaintext` (the secret key bytes) under `passphrase`, producing
/// an opaque vault blob: `MAGIC || SALT || NONCE || CIPHERTEXT+TAG`.
pub fn seal(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt).map_err(|_| VaultError::Crypto)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| VaultError::Crypto)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| VaultError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::Crypto)?;
    key.zeroize();

    let mut out = Vec::with_capacity(VAULT_MAGIC.len() + SALT_LEN + NONCE_LEN + in_out.len());
    out.extend_from_slice(VAULT_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Decrypt a vault blob produced by [`seal`].
pub fn open(passphrase: &[u8], blob: &[u8]) -> Result<Vec<u8>, VaultError> {
    let header = VAULT_MAGIC.len() + SALT_LEN + NONCE_LEN;
    if blob.len() < header + 16 || &blob[..VAULT_MAGIC.len()] != VAULT_MAGIC {
        return Err(VaultError::Malformed);
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&blob[VAULT_MAGIC.len()..VAULT_MAGIC.len() + SALT_LEN]);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    nonce_bytes.copy_from_slice(&blob[VAULT_MAGIC.len() + SALT_LEN..header]);
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_key(passphrase, &salt);
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| VaultError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = blob[header..].to_vec();
    let plain = less_safe
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| VaultError::Crypto)?;
    key.zeroize();
    Ok(plain.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let blob = seal(b"correct horse", b"sign_secret_bytes_here").unwrap();
        let plain = open(b"correct horse", &blob).unwrap();
        assert_eq!(plain, b"sign_secret_bytes_here");
    }

    #[test]
    fn wrong_passphrase_fails() {
        let blob = seal(b"correct horse", b"sign_secret_bytes_here").unwrap();
        assert!(open(b"wrong", &blob).is_err());
    }
}
