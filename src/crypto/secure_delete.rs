// Secure file deletion: multi-pass random overwrite before removing the entry.
// Defeats casual undelete; not a guarantee against media-level forensics.

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use aes_gcm::aead::rand_core::{OsRng, RngCore};

/// Overwrite passes, per DoD 5220.22-M.
pub const OVERWRITE_PASSES: usize = 3;

const CHUNK_SIZE: usize = 64 * 1024;

/// Securely delete a file: overwrite its full length with random bytes
/// `OVERWRITE_PASSES` times, sync each pass to disk, then remove it.
///
/// Returns `Ok(false)` when the file does not exist (idempotent), `Ok(true)`
/// once the file has been overwritten and removed. An overwrite failure is
/// returned as an error and the file is left in place.
pub fn secure_delete_file(path: &Path) -> std::io::Result<bool> {
    if !path.exists() {
        return Ok(false);
    }

    let file_size = fs::metadata(path)?.len();

    if file_size > 0 {
        let mut file = fs::OpenOptions::new().write(true).open(path)?;
        let mut random_buf = vec![0u8; (file_size as usize).min(CHUNK_SIZE)];

        for pass in 0..OVERWRITE_PASSES {
            file.seek(SeekFrom::Start(0))?;
            let mut remaining = file_size;
            while remaining > 0 {
                let chunk = (remaining as usize).min(random_buf.len());
                OsRng.fill_bytes(&mut random_buf[..chunk]);
                file.write_all(&random_buf[..chunk])?;
                remaining -= chunk as u64;
            }
            file.flush()?;
            file.sync_all()?;
            tracing::debug!(path = %path.display(), pass = pass + 1, "Overwrite pass complete");
        }
    }

    fs::remove_file(path)?;
    Ok(true)
}
