//! Content digesting for dataset directories.
//!
//! A dataset's digest is a SHA-1 over the contents of its files, read in
//! sorted filename order. The digest depends only on file names and bytes,
//! so repeated computation over an unmodified directory is stable, and any
//! added, removed, or rewritten file changes it.

use crate::error::Result;
use sha1::{Digest, Sha1};
use std::fs;
use std::io::Read;
use std::path::Path;

/// Digest length in bytes (SHA-1).
pub const DIGEST_LEN: usize = 20;

const CHUNK_SIZE: usize = 64 * 1024;

/// Compute the content digest of every regular file directly under `dir`.
///
/// Files are hashed in sorted filename order; subdirectories are ignored.
/// Also returns the number of files hashed.
pub fn digest_dir(dir: impl AsRef<Path>) -> Result<([u8; DIGEST_LEN], usize)> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name());
        }
    }
    names.sort();

    let mut hasher = Sha1::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    for name in &names {
        let mut file = fs::File::open(dir.as_ref().join(name))?;
        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
    }

    Ok((hasher.finalize().into(), names.len()))
}

/// Hex rendering of a digest, for logs and activity text.
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}
