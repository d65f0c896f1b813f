//! Content digests used for freshness checks and blob addressing

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumAlgorithm {
    /// Lower-case hex digest of an in-memory buffer
    pub fn digest(self, data: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
            ChecksumAlgorithm::Sha384 => hex::encode(Sha384::digest(data)),
            ChecksumAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }

    /// Lower-case hex digest of a stream, read in chunks
    pub fn digest_reader<R: Read>(self, reader: R) -> io::Result<String> {
        match self {
            ChecksumAlgorithm::Sha256 => stream::<Sha256, R>(reader),
            ChecksumAlgorithm::Sha384 => stream::<Sha384, R>(reader),
            ChecksumAlgorithm::Sha512 => stream::<Sha512, R>(reader),
        }
    }

    pub fn digest_file(self, path: &Path) -> io::Result<String> {
        self.digest_reader(File::open(path)?)
    }
}

fn stream<D: Digest + io::Write, R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = D::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_lengths() {
        for (algo, hex_len) in [
            (ChecksumAlgorithm::Sha256, 64),
            (ChecksumAlgorithm::Sha384, 96),
            (ChecksumAlgorithm::Sha512, 128),
        ] {
            let digest = algo.digest(b"hello");
            assert_eq!(digest.len(), hex_len);
            assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
            assert_eq!(digest, digest.to_lowercase());
        }
    }

    #[test]
    fn test_known_sha256() {
        assert_eq!(
            ChecksumAlgorithm::Sha256.digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_streaming_matches_buffer() {
        let data = vec![7u8; 200_000];
        let streamed = ChecksumAlgorithm::Sha512
            .digest_reader(std::io::Cursor::new(&data))
            .unwrap();
        assert_eq!(streamed, ChecksumAlgorithm::Sha512.digest(&data));
    }

    #[test]
    fn test_digest_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            ChecksumAlgorithm::Sha256.digest_file(&path).unwrap(),
            ChecksumAlgorithm::Sha256.digest(b"abc")
        );
    }
}
