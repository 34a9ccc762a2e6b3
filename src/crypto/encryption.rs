//! Sealed report artifacts. An `.enc` file is the 12-byte AES-GCM nonce
//! followed by the ciphertext of the serialized report and its 16-byte tag.
//! A fresh nonce is drawn for every save, so re-saving the same report
//! never repeats a nonce under one key.

use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use super::keys::KEY_LENGTH;
use super::CryptoError;

const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// One sealed artifact as read from or written to disk.
#[derive(Debug, Clone)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_LENGTH],
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    pub(crate) fn seal(
        key_bytes: &[u8; KEY_LENGTH],
        serialized: &[u8],
    ) -> Result<Self, CryptoError> {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, serialized)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(Self {
            nonce: nonce_bytes,
            ciphertext,
        })
    }

    /// Authenticated open. A wrong secret and a tampered file fail the same way.
    pub(crate) fn open(&self, key_bytes: &[u8; KEY_LENGTH]) -> Result<Vec<u8>, CryptoError> {
        let key = Key::<Aes256Gcm>::from_slice(key_bytes);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(&self.nonce);

        cipher
            .decrypt(nonce, self.ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// On-disk layout of an `.enc` artifact.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(NONCE_LENGTH + self.ciphertext.len());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Parse an `.enc` artifact. Anything shorter than nonce plus tag cannot
    /// be a sealed report.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(CryptoError::CorruptedArtifact);
        }

        let mut nonce = [0u8; NONCE_LENGTH];
        nonce.copy_from_slice(&bytes[..NONCE_LENGTH]);
        let ciphertext = bytes[NONCE_LENGTH..].to_vec();

        Ok(Self { nonce, ciphertext })
    }
}
