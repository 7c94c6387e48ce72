//! Content hashing for duplicate detection.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use xxhash_rust::xxh3::Xxh3;

use crate::error::HashError;

/// Read buffer size for streaming files through the hasher.
const CHUNK_SIZE: usize = 64 * 1024;

/// Computes a 128-bit xxh3 digest of the file contents as lowercase hex.
pub fn content_hash(path: &Path) -> Result<String, HashError> {
    let mut file = File::open(path)?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(format!("{:032x}", hasher.digest128()))
}
