//! Hash utilities for installed-file verification.
//!
//! The reference manifest stores MD5 digests as lowercase hex. Files are
//! hashed in fixed-size chunks so multi-GB packages never load into memory.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Chunk size for streaming hashing (1 MB).
const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Compute the MD5 digest of a file and return it as lowercase hex.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::with_capacity(HASH_CHUNK_SIZE, file);
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    let mut context = md5::Context::new();

    loop {
        let bytes_read = reader
            .read(&mut buf)
            .with_context(|| format!("Failed to read file for hashing: {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        context.consume(&buf[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// Verify a file's digest against an expected hex string.
///
/// Returns Ok(true) on match, Ok(false) on mismatch. Comparison is
/// case-insensitive since manifests in the wild mix hex casing.
pub fn verify_file_hash(path: &Path, expected_hash: &str) -> Result<bool> {
    let actual = compute_file_hash(path)?;
    Ok(actual.eq_ignore_ascii_case(expected_hash))
}
