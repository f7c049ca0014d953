//! Content fingerprints
//!
//! SHA-256 over the file bytes, streamed in fixed-size chunks so memory use
//! does not grow with file size. Used by the deduplicator to group copies and
//! by the rollback log to detect out-of-band changes before an undo.

use crate::error::{Result, SentinelError};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Bytes read per chunk while hashing
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Compute the hex-encoded SHA-256 fingerprint of a file's contents
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SentinelError::NotFound(path.display().to_string()),
        _ => SentinelError::Validation(format!(
            "Failed to open {} for hashing: {}",
            path.display(),
            e
        )),
    })?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let bytes_read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(SentinelError::Validation(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Fingerprint of an in-memory buffer, same encoding as [`fingerprint_file`]
pub fn fingerprint_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
