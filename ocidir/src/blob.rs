use crate::error::Result;
use crate::layer::LayerWriter;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Algorithm tag prefixed to every digest referenced from JSON.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Size of each read when hashing a file on disk.
const HASH_CHUNK_SIZE: usize = 8192;

/// Where a blob lives and how big it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    /// Digest of the stored bytes, e.g. "sha256:abcdef…".
    pub digest: String,
    /// Length of the stored file in bytes.
    pub size: u64,
}

impl BlobDescriptor {
    /// The hex portion of the digest, which is also the file name.
    pub fn hex(&self) -> &str {
        hex_from_digest(&self.digest)
    }
}

/// Lowercase hex encoding of a finished SHA-256 state.
pub(crate) fn encode_hex(hash: &[u8]) -> String {
    hash.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `sha256:<hex>` of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("{}{}", DIGEST_PREFIX, encode_hex(&Sha256::digest(data)))
}

/// Extract the hex portion from a digest string like "sha256:abcdef…".
pub fn hex_from_digest(digest: &str) -> &str {
    digest.strip_prefix(DIGEST_PREFIX).unwrap_or(digest)
}

// ---------------------------------------------------------------------------
// HashingWriter
// ---------------------------------------------------------------------------

/// A `Write` adapter that hashes and counts every byte that reaches `inner`.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Consume the adapter, returning the inner writer, the `sha256:<hex>`
    /// digest of everything written and the byte count.
    pub fn into_parts(self) -> (W, String, u64) {
        let digest = format!("{}{}", DIGEST_PREFIX, encode_hex(&self.hasher.finalize()));
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Content-addressed blob directory: `<layout>/blobs/sha256/<hex>`.
///
/// Every file is named by the SHA-256 of its own bytes, so two different
/// contents can never share a name and rewriting identical bytes is a no-op.
/// Writes go through a temporary file in the same directory followed by a
/// rename, so a crash never leaves a partial file at a digest path.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open (creating if needed) the blob directory `dir`.
    pub fn create(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Wrap an existing blob directory without touching the filesystem.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The `blobs/sha256` directory itself.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Return the expected path for a blob with the given digest.
    pub fn blob_path(&self, digest: &str) -> PathBuf {
        self.dir.join(hex_from_digest(digest))
    }

    /// Check whether a blob for `digest` already exists on disk.
    pub fn has_blob(&self, digest: &str) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Persist `data` under its own digest and describe it.
    pub fn write_blob(&self, data: &[u8]) -> Result<BlobDescriptor> {
        let descriptor = BlobDescriptor {
            digest: sha256_digest(data),
            size: data.len() as u64,
        };
        let path = self.blob_path(&descriptor.digest);

        if path.exists() {
            self.assert_same_content(&path, &descriptor.digest)?;
            debug!(digest = %descriptor.digest, "blob already present");
            return Ok(descriptor);
        }

        let mut tmp = self.temp_file()?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)?;

        debug!(digest = %descriptor.digest, size = descriptor.size, "stored blob");
        Ok(descriptor)
    }

    /// Serialize `value` as compact JSON and store it as a blob.
    ///
    /// Struct fields keep their declaration order and maps are emitted in
    /// sorted key order, so equal records always produce equal bytes.
    pub fn write_json<T: Serialize>(&self, value: &T) -> Result<BlobDescriptor> {
        let bytes = serde_json::to_vec(value)?;
        self.write_blob(&bytes)
    }

    /// Read a blob back in full.
    pub fn read_blob(&self, digest: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.blob_path(digest))?)
    }

    /// Start streaming a gzip layer into this store.
    pub fn layer_writer(&self, level: u32) -> Result<LayerWriter> {
        LayerWriter::new(self.temp_file()?, level)
    }

    /// Streaming `sha256:<hex>` digest of a file on disk.
    pub fn digest_of_file(path: &Path) -> Result<String> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; HASH_CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(format!("{}{}", DIGEST_PREFIX, encode_hex(&hasher.finalize())))
    }

    pub(crate) fn temp_file(&self) -> Result<NamedTempFile> {
        Ok(tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.dir)?)
    }

    /// A file already sits at the digest path. Equal content makes the write
    /// a no-op; anything else means the store was corrupted behind our back,
    /// which content addressing rules out.
    pub(crate) fn assert_same_content(&self, path: &Path, digest: &str) -> Result<()> {
        let existing = Self::digest_of_file(path)?;
        if existing != digest {
            unreachable!(
                "blob {} holds content hashing to {}; the store is corrupt",
                path.display(),
                existing
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_path_strips_prefix() {
        let store = BlobStore::new(PathBuf::from("/tmp/layout/blobs/sha256"));
        let p = store.blob_path("sha256:deadbeef");
        assert_eq!(p, PathBuf::from("/tmp/layout/blobs/sha256/deadbeef"));
    }

    #[test]
    fn blob_path_no_prefix() {
        let store = BlobStore::new(PathBuf::from("/tmp/layout/blobs/sha256"));
        let p = store.blob_path("deadbeef");
        assert_eq!(p, PathBuf::from("/tmp/layout/blobs/sha256/deadbeef"));
    }

    #[test]
    fn known_digest() {
        assert_eq!(
            sha256_digest(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn write_blob_is_content_addressed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::create(tmp.path().join("blobs/sha256")).unwrap();

        let desc = store.write_blob(b"hello world").unwrap();
        assert_eq!(desc.digest, sha256_digest(b"hello world"));
        assert_eq!(desc.size, 11);

        let path = store.blob_path(&desc.digest);
        assert_eq!(fs::read(&path).unwrap(), b"hello world");
        assert_eq!(BlobStore::digest_of_file(&path).unwrap(), desc.digest);
    }

    #[test]
    fn write_blob_twice_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::create(tmp.path().join("blobs/sha256")).unwrap();

        let first = store.write_blob(b"same bytes").unwrap();
        let second = store.write_blob(b"same bytes").unwrap();
        assert_eq!(first, second);

        // One blob, no stray temp files.
        assert_eq!(fs::read_dir(store.dir()).unwrap().count(), 1);
    }

    #[test]
    #[should_panic(expected = "store is corrupt")]
    fn write_blob_over_tampered_file_panics() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::create(tmp.path().join("blobs/sha256")).unwrap();

        let path = store.blob_path(&sha256_digest(b"original"));
        fs::write(&path, b"something else").unwrap();
        let _ = store.write_blob(b"original");
    }

    #[test]
    fn write_json_is_compact_and_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::create(tmp.path().join("blobs/sha256")).unwrap();

        let value: serde_json::Value = serde_json::json!({"b": 1, "a": {"z": true, "y": null}});
        let desc = store.write_json(&value).unwrap();
        let bytes = store.read_blob(&desc.digest).unwrap();
        assert_eq!(bytes, br#"{"a":{"y":null,"z":true},"b":1}"#);
    }

    #[test]
    fn hashing_writer_counts_and_hashes() {
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"hello ").unwrap();
        w.write_all(b"world").unwrap();
        let (inner, digest, written) = w.into_parts();
        assert_eq!(inner, b"hello world");
        assert_eq!(written, 11);
        assert_eq!(digest, sha256_digest(b"hello world"));
    }
}
