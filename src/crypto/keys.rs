use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::encryption::EncryptedData;
use super::CryptoError;

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const KEY_LENGTH: usize = 32; // AES-256

/// Fixed application salt. The key is re-derived from the secret on every
/// run, so nothing but the secret is needed to decrypt later.
const APP_SALT: &[u8] = b"scholarguard_report_store_salt_v1";

/// Artifact encryption key. Zeroed on drop, never persisted.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct StoreKey {
    key_bytes: [u8; KEY_LENGTH],
}

impl StoreKey {
    /// Derive from a user secret using PBKDF2-SHA256 over the fixed salt.
    pub fn derive(secret: &str) -> Self {
        let mut key_bytes = [0u8; KEY_LENGTH];
        pbkdf2_hmac::<Sha256>(secret.as_bytes(), APP_SALT, PBKDF2_ITERATIONS, &mut key_bytes);
        Self { key_bytes }
    }

    /// Seal a serialized report with AES-256-GCM.
    pub fn encrypt(&self, serialized: &[u8]) -> Result<EncryptedData, CryptoError> {
        EncryptedData::seal(&self.key_bytes, serialized)
    }

    pub fn decrypt(&self, sealed: &EncryptedData) -> Result<Vec<u8>, CryptoError> {
        sealed.open(&self.key_bytes)
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key_bytes
    }
}

impl std::fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StoreKey(..)")
    }
}
