// SPDX-License-Identifier: CC-BY-NC-ND-4.0

//! Content digests for update payloads and factory images

use crate::error::Result;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
    /// Base64 encoded digest, as sent to clients.
    pub hash: String,
    pub size: u64,
}

/// Computes the hash and size of a file. Implementations block.
pub trait ContentDigest: Send + Sync + fmt::Debug {
    fn digest(&self, path: &Path) -> Result<FileDigest>;
}

/// SHA-1, base64 encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha1Digest;

impl ContentDigest for Sha1Digest {
    fn digest(&self, path: &Path) -> Result<FileDigest> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut hasher = Sha1::new();
        let mut buf = [0_u8; 64 * 1024];
        let mut size = 0_u64;

        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        Ok(FileDigest {
            hash: STANDARD.encode(hasher.finalize()),
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_known_digest() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let digest = Sha1Digest.digest(file.path()).unwrap();
        assert_eq!(digest.hash, "qZk+NkcGgWq6PiVxeFDCbJzQ2J0=");
        assert_eq!(digest.size, 3);
    }

    #[test]
    fn test_empty_file() {
        let file = NamedTempFile::new().unwrap();
        let digest = Sha1Digest.digest(file.path()).unwrap();
        assert_eq!(digest.hash, "2jmj7l5rSw0yVb/vlWAYkK/YBwk=");
        assert_eq!(digest.size, 0);
    }

    #[test]
    fn test_size_spans_buffer_reads() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&vec![7_u8; 200_000]).unwrap();
        assert_eq!(Sha1Digest.digest(file.path()).unwrap().size, 200_000);
    }

    #[test]
    fn test_missing_file() {
        assert!(Sha1Digest.digest(Path::new("/nonexistent/update.gz")).is_err());
    }
}
