//! Content fingerprints for documents and derived text.
//!
//! The fingerprint is the only identifier of document content that may
//! appear in audit records, tracing output or report metadata.

use std::fmt;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Number of hex characters in the short, human-readable form.
pub const SHORT_HASH_LEN: usize = 16;

/// SHA-256 digest of a payload. Immutable once computed.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    digest: [u8; 32],
}

impl Fingerprint {
    /// Full 64-character hex digest (dedup keys, anything needing uniqueness).
    pub fn full_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// First 16 hex characters, used for audit correlation.
    pub fn short(&self) -> String {
        let mut full = self.full_hex();
        full.truncate(SHORT_HASH_LEN);
        full
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.digest
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.short())
    }
}

/// Fingerprint an arbitrary byte payload.
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Fingerprint {
        digest: Sha256::digest(bytes).into(),
    }
}

/// Fingerprint extracted text (UTF-8 bytes).
pub fn fingerprint_text(text: &str) -> Fingerprint {
    fingerprint(text.as_bytes())
}
