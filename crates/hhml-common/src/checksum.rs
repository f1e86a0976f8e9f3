//! Content hashes for whole provider files
//!
//! The ingestion ledger keys files by the SHA-256 of their bytes, so the same
//! bytes delivered under two names are recognised as one file.

use crate::error::{HhmlError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Hash an in-memory file body
pub fn file_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash a file on disk
pub fn compute_file_checksum(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    compute_checksum(&mut file)
}

/// Hash any readable source
pub fn compute_checksum<R: Read>(reader: &mut R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Verify a file against a previously recorded hash
pub fn verify_file_checksum(path: impl AsRef<Path>, expected: &str) -> Result<bool> {
    let actual = compute_file_checksum(path)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(true)
    } else {
        Err(HhmlError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_file_hash_sha256() {
        assert_eq!(
            file_hash(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_reader_matches_in_memory() {
        let data = vec![7u8; 20_000];
        let mut cursor = Cursor::new(data.clone());
        assert_eq!(compute_checksum(&mut cursor).unwrap(), file_hash(&data));
    }

    #[test]
    fn test_same_bytes_different_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("pp_2023-05-01_CD.xml");
        let b = dir.path().join("renamed.xml");
        for p in [&a, &b] {
            let mut f = std::fs::File::create(p).unwrap();
            f.write_all(b"<PP><RACE/></PP>").unwrap();
        }
        assert_eq!(
            compute_file_checksum(&a).unwrap(),
            compute_file_checksum(&b).unwrap()
        );
    }

    #[test]
    fn test_verify_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.xml");
        std::fs::write(&p, b"abc").unwrap();
        let good = file_hash(b"abc");
        assert!(verify_file_checksum(&p, &good.to_uppercase()).unwrap());
        assert!(matches!(
            verify_file_checksum(&p, "00"),
            Err(HhmlError::ChecksumMismatch { .. })
        ));
    }
}
