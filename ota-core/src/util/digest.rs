//! Streaming SHA-256 over files.

use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{OtaError, Result};

/// Read size for hashing, compression and copies; keeps memory flat for any file size.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

pub fn hex_digest(hasher: Sha256) -> String {
    hex::encode(hasher.finalize())
}

pub fn sha256_reader(r: &mut dyn Read) -> std::io::Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_digest(hasher))
}

/// Lowercase hex SHA-256 of a file's content.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut f = File::open(path).map_err(|e| OtaError::at(path, e))?;
    sha256_reader(&mut f).map_err(|e| OtaError::at(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sha256_file_matches_known_digest() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("hello");
        std::fs::write(&p, b"hello").unwrap();
        assert_eq!(
            sha256_file(&p).unwrap(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_sha256_file_spanning_chunks() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("big");
        let data = vec![7u8; CHUNK_SIZE + 1000];
        std::fs::write(&p, &data).unwrap();
        assert_eq!(sha256_file(&p).unwrap(), hex::encode(Sha256::digest(&data)));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = sha256_file(Path::new("/nonexistent/ota/file")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ota/file"));
    }
}
