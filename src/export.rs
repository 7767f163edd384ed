//! Layer export: snapshot tar stream → gzip layer blob.
//!
//! The exporter's output is read on the async side in fixed-size chunks and
//! handed over a bounded channel to a blocking task that compresses, hashes
//! and writes. When the writer falls behind the channel fills up and the
//! reader stops pulling from the exporter, so memory stays bounded by
//! `CHUNK_SIZE * CHANNEL_DEPTH` regardless of tree size.

use ocidir::{BlobStore, LayerDescriptor, PendingLayer};
use std::io::{self, Write};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::ostree::SnapshotStore;
use crate::{Error, Result};

/// Bytes requested from the exporter per read.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks allowed in flight between reader and writer.
const CHANNEL_DEPTH: usize = 8;

/// Export `commit` from `store` into a gzip layer inside `blobs`.
///
/// The layer only appears under its digest once the whole stream was
/// written and the exporter reported success. On any failure the exporter
/// is killed and the temporary blob is removed.
pub async fn export_layer(
    store: &dyn SnapshotStore,
    commit: &str,
    blobs: &BlobStore,
    level: u32,
) -> Result<LayerDescriptor> {
    let export_error = |reason: String| Error::Export {
        snapshot: commit.to_string(),
        reason,
    };

    let writer = blobs.layer_writer(level)?;
    let (mut reader, exit) = store.export(commit).await?.split();

    info!(commit, level, "exporting layer");

    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(CHANNEL_DEPTH);
    let consumer = tokio::task::spawn_blocking(move || -> ocidir::Result<PendingLayer> {
        let mut writer = writer;
        while let Some(chunk) = chunk_rx.blocking_recv() {
            writer.write_all(&chunk)?;
        }
        writer.finish()
    });

    let produced = pump(&mut reader, chunk_tx).await;
    drop(reader);

    let consumed = match consumer.await {
        Ok(result) => result.map_err(|e| export_error(e.to_string())),
        Err(e) => Err(export_error(format!("layer writer task failed: {}", e))),
    };

    // The writer's error is the root cause when both sides fail: the reader
    // only sees a closed channel.
    let (streamed, pending) = match (produced, consumed) {
        (_, Err(e)) => {
            exit.abort().await;
            return Err(e);
        }
        (Err(e), Ok(_)) => {
            exit.abort().await;
            return Err(export_error(e.to_string()));
        }
        (Ok(streamed), Ok(pending)) => (streamed, pending),
    };

    exit.finish()
        .await
        .map_err(|e| export_error(e.to_string()))?;

    let blobs = blobs.clone();
    let layer = blocking(move || Ok(pending.commit(&blobs)?)).await?;
    info!(
        digest = %layer.blob.digest,
        diff_id = %layer.diff_id,
        compressed = layer.blob.size,
        uncompressed = streamed,
        "layer written",
    );
    Ok(layer)
}

/// Run synchronous filesystem work on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
}

/// Move chunks from `reader` into `chunk_tx` until end-of-stream. Returns
/// the number of bytes forwarded.
async fn pump<R>(reader: &mut R, chunk_tx: mpsc::Sender<Vec<u8>>) -> io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut total = 0u64;
    loop {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        chunk.truncate(n);
        total += n as u64;

        if chunk_tx.send(chunk).await.is_err() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "layer writer stopped accepting data",
            ));
        }
    }
    debug!(bytes = total, "exporter reached end of stream");
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ostree::{MemoryStore, TreeStream};
    use async_trait::async_trait;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::io::Read;
    use std::time::UNIX_EPOCH;

    fn blob_store() -> (tempfile::TempDir, BlobStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::create(tmp.path().join("blobs/sha256")).unwrap();
        (tmp, store)
    }

    /// Deterministic, poorly compressible bytes spanning many chunks.
    fn sample_tree(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    #[tokio::test]
    async fn multi_chunk_stream_round_trips() {
        let tree = sample_tree(CHUNK_SIZE * 5 + 123);
        let mut store = MemoryStore::new();
        let commit = store.insert("os/x86_64/stable", UNIX_EPOCH, tree.clone());
        let (_tmp, blobs) = blob_store();

        let layer = export_layer(&store, &commit, &blobs, 1).await.unwrap();

        assert_eq!(layer.diff_id, ocidir::sha256_digest(&tree));
        assert_eq!(layer.uncompressed_size, tree.len() as u64);

        let stored = blobs.read_blob(&layer.blob.digest).unwrap();
        assert_eq!(ocidir::sha256_digest(&stored), layer.blob.digest);
        let mut plain = Vec::new();
        GzDecoder::new(&stored[..]).read_to_end(&mut plain).unwrap();
        assert_eq!(plain, tree);
    }

    #[tokio::test]
    async fn empty_stream_still_makes_a_layer() {
        let mut store = MemoryStore::new();
        let commit = store.insert("empty", UNIX_EPOCH, Vec::new());
        let (_tmp, blobs) = blob_store();

        let layer = export_layer(&store, &commit, &blobs, 1).await.unwrap();
        assert_eq!(layer.diff_id, ocidir::sha256_digest(b""));
        assert_ne!(layer.diff_id, layer.blob.digest);
        assert!(blobs.has_blob(&layer.blob.digest));
    }

    #[tokio::test]
    async fn exporter_failure_leaves_no_files() {
        let mut store = MemoryStore::new();
        let commit = store.insert("r", UNIX_EPOCH, sample_tree(CHUNK_SIZE * 2));
        let store = store.fail_exports("exit status: 1");
        let (_tmp, blobs) = blob_store();

        let err = export_layer(&store, &commit, &blobs, 1).await.unwrap_err();
        match err {
            Error::Export { snapshot, reason } => {
                assert_eq!(snapshot, commit);
                assert!(reason.contains("exit status: 1"), "{reason}");
            }
            other => panic!("expected export error, got {other:?}"),
        }
        assert_eq!(fs::read_dir(blobs.dir()).unwrap().count(), 0);
    }

    /// Serves a reader that breaks halfway through.
    struct BrokenStore;

    #[async_trait]
    impl SnapshotStore for BrokenStore {
        async fn resolve_ref(&self, reference: &str) -> Result<String> {
            Ok(reference.to_string())
        }

        async fn load_commit(&self, _checksum: &str) -> Result<crate::ostree::CommitInfo> {
            unimplemented!()
        }

        async fn export(&self, _checksum: &str) -> Result<TreeStream> {
            let reader = tokio_test::io::Builder::new()
                .read(b"first half of a tar")
                .read_error(io::Error::new(io::ErrorKind::UnexpectedEof, "pipe broke"))
                .build();
            Ok(TreeStream::from_reader(Box::new(reader), Ok(())))
        }
    }

    #[tokio::test]
    async fn read_error_mid_stream_aborts() {
        let (_tmp, blobs) = blob_store();

        let err = export_layer(&BrokenStore, "abc", &blobs, 1).await.unwrap_err();
        assert!(err.to_string().contains("pipe broke"), "{err}");
        assert_eq!(fs::read_dir(blobs.dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unknown_commit_is_an_export_error() {
        let store = MemoryStore::new();
        let (_tmp, blobs) = blob_store();
        assert!(matches!(
            export_layer(&store, "nope", &blobs, 1).await,
            Err(Error::Export { .. })
        ));
        assert_eq!(fs::read_dir(blobs.dir()).unwrap().count(), 0);
    }
}
