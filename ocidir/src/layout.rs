use crate::blob::{BlobStore, HashingWriter};
use crate::error::{OciError, Result};
use crate::manifest::{
    is_gzip_layer, Descriptor, ImageConfig, ImageIndex, OciLayout, OciManifest,
    IMAGE_LAYOUT_VERSION,
};
use flate2::read::GzDecoder;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const OCI_LAYOUT_FILE: &str = "oci-layout";
pub const INDEX_FILE: &str = "index.json";

/// An OCI image layout directory:
///
/// ```text
/// <root>/oci-layout
/// <root>/index.json
/// <root>/blobs/sha256/<hex>
/// ```
///
/// `oci-layout` and `index.json` are the only entries that are not content
/// addressed; readers find everything else by following digests from them.
#[derive(Debug, Clone)]
pub struct OciDir {
    root: PathBuf,
    blobs: BlobStore,
}

/// Summary of a successful [`OciDir::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub manifests: usize,
    pub blobs: usize,
}

impl OciDir {
    /// Create the directory skeleton under `root`.
    pub fn create(root: &Path) -> Result<Self> {
        let blobs = BlobStore::create(blobs_dir(root))?;
        Ok(Self {
            root: root.to_path_buf(),
            blobs,
        })
    }

    /// Open an existing layout, refusing directories without a readable
    /// `oci-layout` marker.
    pub fn open(root: &Path) -> Result<Self> {
        let marker = root.join(OCI_LAYOUT_FILE);
        let bytes = fs::read(&marker)
            .map_err(|_| OciError::NotFound(marker.display().to_string()))?;
        let layout: OciLayout = serde_json::from_slice(&bytes)?;
        if layout.image_layout_version != IMAGE_LAYOUT_VERSION {
            return Err(OciError::Layout(format!(
                "unsupported imageLayoutVersion {}",
                layout.image_layout_version
            )));
        }
        Ok(Self {
            root: root.to_path_buf(),
            blobs: BlobStore::new(blobs_dir(root)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Write `index.json`.
    pub fn write_index(&self, index: &ImageIndex) -> Result<()> {
        self.write_fixed(INDEX_FILE, index)
    }

    /// Write the `oci-layout` marker. Readers check this first, so it goes
    /// last.
    pub fn write_layout_marker(&self) -> Result<()> {
        self.write_fixed(OCI_LAYOUT_FILE, &OciLayout::default())
    }

    pub fn read_index(&self) -> Result<ImageIndex> {
        let bytes = fs::read(self.root.join(INDEX_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn read_manifest(&self, descriptor: &Descriptor) -> Result<OciManifest> {
        Ok(serde_json::from_slice(&self.blobs.read_blob(&descriptor.digest)?)?)
    }

    pub fn read_config(&self, descriptor: &Descriptor) -> Result<ImageConfig> {
        Ok(serde_json::from_slice(&self.blobs.read_blob(&descriptor.digest)?)?)
    }

    /// Re-check every blob reachable from `index.json`: it exists, has the
    /// declared size, hashes to its digest, and every gzip layer
    /// decompresses to the config's matching `diff_id`.
    pub fn verify(&self) -> Result<VerifyReport> {
        let index = self.read_index()?;
        let mut report = VerifyReport::default();

        for manifest_desc in &index.manifests {
            self.verify_blob(manifest_desc)?;
            let manifest = self.read_manifest(manifest_desc)?;

            self.verify_blob(&manifest.config)?;
            let config = self.read_config(&manifest.config)?;

            if config.rootfs.diff_ids.len() != manifest.layers.len() {
                return Err(OciError::Layout(format!(
                    "manifest {} has {} layers but its config lists {} diff_ids",
                    manifest_desc.digest,
                    manifest.layers.len(),
                    config.rootfs.diff_ids.len()
                )));
            }

            for (layer, diff_id) in manifest.layers.iter().zip(&config.rootfs.diff_ids) {
                self.verify_blob(layer)?;
                if !is_gzip_layer(&layer.media_type) {
                    return Err(OciError::UnsupportedMediaType(layer.media_type.clone()));
                }
                let actual = self.uncompressed_digest(&layer.digest)?;
                if &actual != diff_id {
                    return Err(OciError::DigestMismatch {
                        path: format!("diff_id of {}", layer.digest),
                        expected: diff_id.clone(),
                        actual,
                    });
                }
            }

            report.manifests += 1;
            report.blobs += 2 + manifest.layers.len();
        }

        info!(
            root = %self.root.display(),
            manifests = report.manifests,
            blobs = report.blobs,
            "layout verified",
        );
        Ok(report)
    }

    fn verify_blob(&self, descriptor: &Descriptor) -> Result<()> {
        let path = self.blobs.blob_path(&descriptor.digest);
        let metadata = fs::metadata(&path)
            .map_err(|_| OciError::NotFound(descriptor.digest.clone()))?;
        if metadata.len() != descriptor.size {
            return Err(OciError::SizeMismatch {
                digest: descriptor.digest.clone(),
                expected: descriptor.size,
                actual: metadata.len(),
            });
        }
        let actual = BlobStore::digest_of_file(&path)?;
        if actual != descriptor.digest {
            return Err(OciError::DigestMismatch {
                path: path.display().to_string(),
                expected: descriptor.digest.clone(),
                actual,
            });
        }
        debug!(digest = %descriptor.digest, "blob ok");
        Ok(())
    }

    fn uncompressed_digest(&self, digest: &str) -> Result<String> {
        let mut decoder = GzDecoder::new(File::open(self.blobs.blob_path(digest))?);
        let mut sink = HashingWriter::new(io::sink());
        io::copy(&mut decoder, &mut sink)?;
        let (_, digest, _) = sink.into_parts();
        Ok(digest)
    }

    /// Atomically replace `root/<name>` with the JSON form of `value`.
    fn write_fixed<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.root)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(name))?;
        debug!(file = name, "wrote layout file");
        Ok(())
    }
}

fn blobs_dir(root: &Path) -> PathBuf {
    root.join("blobs").join("sha256")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{
        Platform, RootFs, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_INDEX,
        MEDIA_TYPE_OCI_LAYER_GZIP, MEDIA_TYPE_OCI_MANIFEST, SCHEMA_VERSION,
    };

    /// Write a minimal one-layer image and return its layout.
    fn sample_layout(root: &Path) -> OciDir {
        let dir = OciDir::create(root).unwrap();

        let mut writer = dir.blobs().layer_writer(1).unwrap();
        writer.write_all(b"tar bytes").unwrap();
        let layer = writer.finish().unwrap().commit(dir.blobs()).unwrap();

        let config = ImageConfig {
            created: "2024-01-01T00:00:00Z".to_string(),
            architecture: "amd64".to_string(),
            os: "linux".to_string(),
            config: serde_json::json!({}),
            rootfs: RootFs::layers(vec![layer.diff_id.clone()]),
            history: vec![],
        };
        let config_blob = dir.blobs().write_json(&config).unwrap();

        let manifest = OciManifest {
            schema_version: SCHEMA_VERSION,
            media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
            config: Descriptor::for_blob(MEDIA_TYPE_OCI_CONFIG, &config_blob),
            layers: vec![Descriptor::for_blob(MEDIA_TYPE_OCI_LAYER_GZIP, &layer.blob)],
            annotations: None,
        };
        let manifest_blob = dir.blobs().write_json(&manifest).unwrap();

        let mut manifest_desc = Descriptor::for_blob(MEDIA_TYPE_OCI_MANIFEST, &manifest_blob);
        manifest_desc.platform = Some(Platform::new("amd64", "linux"));
        dir.write_index(&ImageIndex {
            schema_version: SCHEMA_VERSION,
            media_type: MEDIA_TYPE_OCI_INDEX.to_string(),
            manifests: vec![manifest_desc],
        })
        .unwrap();
        dir.write_layout_marker().unwrap();
        dir
    }

    #[test]
    fn create_builds_skeleton() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = OciDir::create(&tmp.path().join("img")).unwrap();
        assert!(dir.root().join("blobs/sha256").is_dir());
        assert!(!dir.root().join(INDEX_FILE).exists());
    }

    #[test]
    fn open_requires_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("img");
        OciDir::create(&root).unwrap();
        assert!(matches!(OciDir::open(&root), Err(OciError::NotFound(_))));
    }

    #[test]
    fn fixed_files_are_exact() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = sample_layout(&tmp.path().join("img"));
        assert_eq!(
            fs::read(dir.root().join(OCI_LAYOUT_FILE)).unwrap(),
            br#"{"imageLayoutVersion":"1.0.0"}"#
        );
        // Only the two fixed files and the blobs directory at the root.
        assert_eq!(fs::read_dir(dir.root()).unwrap().count(), 3);
    }

    #[test]
    fn verify_sound_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("img");
        sample_layout(&root);

        let report = OciDir::open(&root).unwrap().verify().unwrap();
        assert_eq!(report, VerifyReport { manifests: 1, blobs: 3 });
    }

    #[test]
    fn verify_detects_missing_blob() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = sample_layout(&tmp.path().join("img"));

        let index = dir.read_index().unwrap();
        let manifest = dir.read_manifest(&index.manifests[0]).unwrap();
        fs::remove_file(dir.blobs().blob_path(&manifest.layers[0].digest)).unwrap();

        assert!(matches!(dir.verify(), Err(OciError::NotFound(_))));
    }

    #[test]
    fn verify_detects_size_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = sample_layout(&tmp.path().join("img"));

        let mut index = dir.read_index().unwrap();
        index.manifests[0].size += 1;
        dir.write_index(&index).unwrap();

        assert!(matches!(dir.verify(), Err(OciError::SizeMismatch { .. })));
    }
}
