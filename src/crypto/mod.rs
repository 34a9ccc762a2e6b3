pub mod keys;
pub mod encryption;
pub mod secure_delete;
mod phi_audit;

pub use keys::*;
pub use encryption::*;
pub use secure_delete::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Could not seal report artifact")]
    EncryptionFailed,

    #[error("Could not open report artifact: wrong session secret or modified file")]
    DecryptionFailed,

    #[error("Encrypted report artifact is truncated")]
    CorruptedArtifact,
}
