//! Content-addressed blob storage on disk
//!
//! Blobs live at `<root>/<checksum[0:2]>/<checksum>.blob` and are written
//! through a temp file in the shard directory followed by an atomic rename,
//! so concurrent writers of the same checksum never expose a partial blob.

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

/// Content at or below this size is stored raw
const COMPRESSION_THRESHOLD: usize = 1024;
/// Content above this size gets a stronger compression level
const LARGE_CONTENT: usize = 1024 * 1024;
/// Compressed form must be below this fraction of the original to be kept
const MIN_SAVINGS_RATIO: f64 = 0.9;

const BLOB_EXTENSION: &str = "blob";
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug)]
pub struct EncodedContent {
    pub bytes: Vec<u8>,
    pub compressed: bool,
}

/// Where a blob landed and how it is encoded on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub location: String,
    pub compressed: bool,
    pub stored_size: u64,
}

#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    compression_enabled: bool,
    compression_level: u32,
}

impl ContentStore {
    pub fn new(root: PathBuf, compression_enabled: bool, compression_level: u32) -> Self {
        Self {
            root,
            compression_enabled,
            compression_level: compression_level.min(9),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative location of the blob for `checksum`
    pub fn location_for(checksum: &str) -> String {
        let shard = checksum.get(..2).unwrap_or("00");
        format!("{}/{}.{}", shard, checksum, BLOB_EXTENSION)
    }

    /// Store `content` under `checksum`
    ///
    /// A blob already present is kept; the returned encoding describes the
    /// bytes actually on disk, which may differ from what this store's
    /// settings would produce for a fresh write.
    pub fn write(&self, checksum: &str, content: &[u8]) -> io::Result<StoredBlob> {
        let location = Self::location_for(checksum);
        let target = self.root.join(&location);

        if let Some(compressed) = existing_encoding(&target, content)? {
            let stored_size = fs::metadata(&target)?.len();
            return Ok(StoredBlob {
                location,
                compressed,
                stored_size,
            });
        }

        let encoded = self.encode(content)?;
        let shard_dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&shard_dir)?;

        let mut tmp = NamedTempFile::new_in(&shard_dir)?;
        tmp.write_all(&encoded.bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| e.error)?;

        debug!(
            checksum = %checksum,
            size = encoded.bytes.len(),
            compressed = encoded.compressed,
            "Wrote content blob"
        );
        Ok(StoredBlob {
            location,
            compressed: encoded.compressed,
            stored_size: encoded.bytes.len() as u64,
        })
    }

    pub fn read(&self, location: &str) -> io::Result<Vec<u8>> {
        fs::read(self.resolve(location)?)
    }

    /// Remove a blob; a missing blob is not an error
    pub fn delete(&self, location: &str) -> io::Result<bool> {
        match fs::remove_file(self.resolve(location)?) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Relative locations of every blob on disk
    pub fn list_blobs(&self) -> io::Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut blobs = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file()
                || entry.path().extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION)
            {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&self.root) {
                blobs.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(blobs)
    }

    /// Compress when enabled, worthwhile, and effective
    pub fn encode(&self, content: &[u8]) -> io::Result<EncodedContent> {
        if !self.compression_enabled || content.len() <= COMPRESSION_THRESHOLD {
            return Ok(EncodedContent {
                bytes: content.to_vec(),
                compressed: false,
            });
        }

        let level = if content.len() > LARGE_CONTENT {
            (self.compression_level + 2).min(9)
        } else {
            self.compression_level
        };
        let compressed = compress(content, level)?;

        if (compressed.len() as f64) < content.len() as f64 * MIN_SAVINGS_RATIO {
            Ok(EncodedContent {
                bytes: compressed,
                compressed: true,
            })
        } else {
            Ok(EncodedContent {
                bytes: content.to_vec(),
                compressed: false,
            })
        }
    }

    pub fn decode(bytes: Vec<u8>, compressed: bool) -> io::Result<Vec<u8>> {
        if compressed {
            decompress(&bytes)
        } else {
            Ok(bytes)
        }
    }

    /// Reject locations that would escape the store root
    fn resolve(&self, location: &str) -> io::Result<PathBuf> {
        let relative = Path::new(location);
        let safe = relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if !safe {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid blob location {:?}", location),
            ));
        }
        Ok(self.root.join(relative))
    }
}

/// Encoding of a blob already at `target`, or `None` when it is absent or
/// unusable and must be rewritten
fn existing_encoding(target: &Path, content: &[u8]) -> io::Result<Option<bool>> {
    let stored = match fs::read(target) {
        Ok(stored) => stored,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if stored == content {
        return Ok(Some(false));
    }
    if stored.starts_with(&GZIP_MAGIC) && decompress(&stored).is_ok_and(|raw| raw == content) {
        return Ok(Some(true));
    }
    Ok(None)
}

pub fn compress(data: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(data, Compression::new(level));
    let mut out = Vec::new();
    encoder.read_to_end(&mut out)?;
    Ok(out)
}

pub fn decompress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
