//! Cryptographic primitives consumed by the session and key layers
//!
//! - AES-256-GCM with a random 12-byte nonce and a detached 16-byte tag
//! - RSA-OAEP (SHA-256) for wrapping session keys during the handshake
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{KmsError, KmsResult};
use aes_gcm::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Nonce, Tag,
};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

const PRIVATE_KEY_FILE: &str = "rsa_private.pem";
const PUBLIC_KEY_FILE: &str = "rsa_public.pem";

/// Output of an AEAD encryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Encrypt `plaintext` under a 256-bit key
pub fn aead_encrypt(plaintext: &[u8], key: &[u8; 32], aad: Option<&[u8]>) -> KmsResult<SealedBox> {
    let cipher = Aes256Gcm::new(&(*key).into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, aad.unwrap_or_default(), &mut buffer)
        .map_err(|e| KmsError::Crypto(format!("Encryption failed: {}", e)))?;

    let mut sealed = SealedBox {
        ciphertext: buffer,
        nonce: [0u8; NONCE_LEN],
        tag: [0u8; TAG_LEN],
    };
    sealed.nonce.copy_from_slice(&nonce);
    sealed.tag.copy_from_slice(&tag);
    Ok(sealed)
}

/// Decrypt and authenticate; a tag mismatch yields `AuthenticationFailed`
pub fn aead_decrypt(
    ciphertext: &[u8],
    nonce: &[u8],
    tag: &[u8],
    key: &[u8; 32],
    aad: Option<&[u8]>,
) -> KmsResult<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(KmsError::InvalidFormat(format!(
            "nonce must be {} bytes, got {}",
            NONCE_LEN,
            nonce.len()
        )));
    }
    if tag.len() != TAG_LEN {
        return Err(KmsError::InvalidFormat(format!(
            "tag must be {} bytes, got {}",
            TAG_LEN,
            tag.len()
        )));
    }

    let cipher = Aes256Gcm::new(&(*key).into());
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            aad.unwrap_or_default(),
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| KmsError::AuthenticationFailed)?;

    Ok(buffer)
}

/// RSA key pair used to receive wrapped session keys
pub struct HandshakeKeyPair {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl HandshakeKeyPair {
    /// Generate a fresh key pair
    pub fn generate(bits: usize) -> KmsResult<Self> {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| KmsError::Crypto(format!("RSA key generation failed: {}", e)))?;
        Self::from_private_key(private_key)
    }

    fn from_private_key(private_key: RsaPrivateKey) -> KmsResult<Self> {
        let public_key_pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KmsError::Crypto(format!("Public key encoding failed: {}", e)))?;
        Ok(Self {
            private_key,
            public_key_pem,
        })
    }

    /// Load `rsa_private.pem` from `dir`, or generate and write a new pair
    pub async fn load_or_create<P: AsRef<Path>>(dir: P, bits: usize) -> KmsResult<Self> {
        let (private_path, public_path) = key_pair_paths(dir.as_ref());

        if fs::try_exists(&private_path).await? && fs::try_exists(&public_path).await? {
            let pem = fs::read_to_string(&private_path).await?;
            let private_key = RsaPrivateKey::from_pkcs8_pem(&pem)
                .map_err(|e| KmsError::InvalidFormat(format!("RSA private key: {}", e)))?;
            info!(path = %private_path.display(), "Loaded handshake key pair");
            return Self::from_private_key(private_key);
        }

        info!(bits = bits, "Generating handshake key pair");
        let pair = Self::generate(bits)?;
        let private_pem = pair
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KmsError::Crypto(format!("Private key encoding failed: {}", e)))?;

        fs::create_dir_all(dir.as_ref()).await?;
        write_private(&private_path, private_pem.as_bytes()).await?;
        fs::write(&public_path, pair.public_key_pem.as_bytes()).await?;
        Ok(pair)
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    /// Unwrap an OAEP/SHA-256 payload
    pub fn unwrap_payload(&self, wrapped: &[u8]) -> KmsResult<Vec<u8>> {
        self.private_key
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|e| KmsError::InvalidFormat(format!("Unable to unwrap payload: {}", e)))
    }

    /// Unwrap a 32-byte session key
    pub fn unwrap_session_key(&self, wrapped: &[u8]) -> KmsResult<[u8; 32]> {
        let bytes = self.unwrap_payload(wrapped)?;
        bytes.try_into().map_err(|b: Vec<u8>| {
            KmsError::InvalidFormat(format!("Session key must be 32 bytes, got {}", b.len()))
        })
    }
}

/// Wrap `data` for the holder of the private key matching `public_key_pem`
pub fn wrap_with_public_key(public_key_pem: &str, data: &[u8]) -> KmsResult<Vec<u8>> {
    let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| KmsError::InvalidFormat(format!("RSA public key: {}", e)))?;
    public_key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), data)
        .map_err(|e| KmsError::Crypto(format!("Wrap failed: {}", e)))
}

fn key_pair_paths(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join(PRIVATE_KEY_FILE), dir.join(PUBLIC_KEY_FILE))
}

#[cfg(unix)]
async fn write_private(path: &Path, bytes: &[u8]) -> KmsResult<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::write(path, bytes).await?;
    fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn write_private(path: &Path, bytes: &[u8]) -> KmsResult<()> {
    fs::write(path, bytes).await?;
    Ok(())
}
