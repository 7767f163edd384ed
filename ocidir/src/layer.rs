use crate::blob::{encode_hex, BlobDescriptor, BlobStore, HashingWriter, DIGEST_PREFIX};
use crate::error::{OciError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use tempfile::NamedTempFile;
use tracing::debug;

/// Highest gzip effort accepted by [`LayerWriter`].
pub const MAX_COMPRESSION_LEVEL: u32 = 9;

/// A committed layer blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    /// The compressed blob as stored under `blobs/sha256/`.
    pub blob: BlobDescriptor,
    /// Digest of the uncompressed tar stream (the config's `diff_id`).
    pub diff_id: String,
    /// Length of the uncompressed tar stream.
    pub uncompressed_size: u64,
}

/// Streams a tar into a gzip layer blob.
///
/// Bytes written here are hashed as-is for the `diff_id`, compressed, and
/// hashed again on their way into a temporary file inside the blob
/// directory. Nothing is buffered beyond what gzip itself holds. Dropping
/// the writer deletes the temporary file.
pub struct LayerWriter {
    encoder: GzEncoder<HashingWriter<NamedTempFile>>,
    diff_hasher: Sha256,
    uncompressed: u64,
}

impl LayerWriter {
    pub(crate) fn new(tmp: NamedTempFile, level: u32) -> Result<Self> {
        if level > MAX_COMPRESSION_LEVEL {
            return Err(OciError::Layer(format!(
                "compression level {} out of range 0..={}",
                level, MAX_COMPRESSION_LEVEL
            )));
        }
        Ok(Self {
            encoder: GzEncoder::new(HashingWriter::new(tmp), Compression::new(level)),
            diff_hasher: Sha256::new(),
            uncompressed: 0,
        })
    }

    /// Flush the gzip trailer and fsync. The blob is not visible under its
    /// digest until [`PendingLayer::commit`].
    pub fn finish(self) -> Result<PendingLayer> {
        let hashing = self.encoder.finish()?;
        let (tmp, digest, size) = hashing.into_parts();
        tmp.as_file().sync_all()?;

        let diff_id = format!(
            "{}{}",
            DIGEST_PREFIX,
            encode_hex(&self.diff_hasher.finalize())
        );

        Ok(PendingLayer {
            tmp,
            descriptor: LayerDescriptor {
                blob: BlobDescriptor { digest, size },
                diff_id,
                uncompressed_size: self.uncompressed,
            },
        })
    }
}

impl Write for LayerWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.encoder.write(buf)?;
        self.diff_hasher.update(&buf[..n]);
        self.uncompressed += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

/// A fully written layer still sitting under its temporary name.
///
/// Dropping it removes the temporary file, which is what a failed export
/// relies on to leave no orphans behind.
pub struct PendingLayer {
    tmp: NamedTempFile,
    descriptor: LayerDescriptor,
}

impl PendingLayer {
    pub fn descriptor(&self) -> &LayerDescriptor {
        &self.descriptor
    }

    /// Rename the temporary file to its digest path.
    pub fn commit(self, store: &BlobStore) -> Result<LayerDescriptor> {
        let path = store.blob_path(&self.descriptor.blob.digest);

        if path.exists() {
            store.assert_same_content(&path, &self.descriptor.blob.digest)?;
            debug!(digest = %self.descriptor.blob.digest, "layer already present");
            return Ok(self.descriptor);
        }

        self.tmp.persist(&path)?;
        debug!(
            digest = %self.descriptor.blob.digest,
            size = self.descriptor.blob.size,
            "stored layer",
        );
        Ok(self.descriptor)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
