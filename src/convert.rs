//! The conversion pipeline.
//!
//! Strictly linear: user config → resolve → layer → config → manifest →
//! index → `oci-layout`. The index and marker go last so a half-written
//! destination never looks like a valid image.

use ocidir::layer::MAX_COMPRESSION_LEVEL;
use ocidir::manifest::{ImageConfig, Platform};
use ocidir::{BlobDescriptor, LayerDescriptor, OciDir, OciError};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::arch::{ArchInference, ArchTable};
use crate::assemble::{build_config, build_index, build_manifest, ConfigInputs};
use crate::config::{load_user_config, ConvertOptions, ImageName};
use crate::export::{blocking, export_layer};
use crate::ostree::SnapshotStore;
use crate::{Error, Result};

/// What a finished conversion produced.
#[derive(Debug, Clone)]
pub struct ConversionReport {
    pub dest: PathBuf,
    pub image: ImageName,
    pub commit: String,
    pub platform: Platform,
    /// `Some` when the architecture came from the table default rather
    /// than the reference or an explicit override.
    pub arch_fallback: Option<String>,
    pub layer: LayerDescriptor,
    pub config: BlobDescriptor,
    pub manifest: BlobDescriptor,
}

/// Converts snapshots from one store into OCI image layouts.
pub struct Converter<S> {
    store: S,
    arch_table: ArchTable,
}

impl<S: SnapshotStore> Converter<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            arch_table: ArchTable::default(),
        }
    }

    pub fn with_arch_table(mut self, arch_table: ArchTable) -> Self {
        self.arch_table = arch_table;
        self
    }

    /// Run one conversion into `opts.dest`, which must not exist yet.
    pub async fn convert(&self, opts: &ConvertOptions) -> Result<ConversionReport> {
        if opts.compression > MAX_COMPRESSION_LEVEL {
            return Err(OciError::Layer(format!(
                "compression level {} out of range 0..={}",
                opts.compression, MAX_COMPRESSION_LEVEL
            ))
            .into());
        }
        if opts.dest.as_os_str().is_empty() {
            return Err(Error::InvalidDestination(opts.dest.clone()));
        }

        let config_path = opts.user_config.clone();
        let user_config = blocking(move || load_user_config(config_path.as_deref())).await?;

        let commit = self.store.resolve_ref(&opts.reference).await?;
        let commit_info = self.store.load_commit(&commit).await?;
        info!(reference = %opts.reference, %commit, "resolved snapshot");

        if tokio::fs::symlink_metadata(&opts.dest).await.is_ok() {
            return Err(Error::DestinationExists(opts.dest.clone()));
        }

        let (platform, arch_fallback) = self.platform(opts);

        let dest = opts.dest.clone();
        let dir = blocking(move || Ok(OciDir::create(&dest)?)).await?;
        let layer = export_layer(&self.store, &commit, dir.blobs(), opts.compression).await?;

        let config = build_config(
            &ConfigInputs {
                created: commit_info.timestamp,
                platform: &platform,
                diff_id: &layer.diff_id,
                image: &opts.image,
                reference: &opts.reference,
                commit: &commit,
            },
            user_config,
        );

        let (config_blob, manifest_blob) = {
            let layer = layer.clone();
            let tag = opts.image.tag.clone();
            let platform = platform.clone();
            blocking(move || write_metadata(&dir, &config, &layer, &tag, &platform)).await?
        };

        info!(
            dest = %opts.dest.display(),
            image = %opts.image,
            manifest = %manifest_blob.digest,
            architecture = %platform.architecture,
            "image written",
        );

        Ok(ConversionReport {
            dest: opts.dest.clone(),
            image: opts.image.clone(),
            commit,
            platform,
            arch_fallback,
            layer,
            config: config_blob,
            manifest: manifest_blob,
        })
    }

    fn platform(&self, opts: &ConvertOptions) -> (Platform, Option<String>) {
        if let Some(arch) = &opts.architecture {
            return (Platform::new(arch.clone(), opts.os.clone()), None);
        }

        match self.arch_table.infer(&opts.reference) {
            ArchInference::Matched {
                token,
                architecture,
            } => {
                info!(%token, %architecture, "inferred architecture");
                (Platform::new(architecture, opts.os.clone()), None)
            }
            ArchInference::Fallback { architecture } => {
                warn!(
                    reference = %opts.reference,
                    %architecture,
                    "no known architecture in reference; using default",
                );
                (
                    Platform::new(architecture.clone(), opts.os.clone()),
                    Some(architecture),
                )
            }
        }
    }
}

/// Config, manifest, `index.json`, then `oci-layout`, in that order.
fn write_metadata(
    dir: &OciDir,
    config: &ImageConfig,
    layer: &LayerDescriptor,
    tag: &str,
    platform: &Platform,
) -> Result<(BlobDescriptor, BlobDescriptor)> {
    let config_blob = dir.blobs().write_json(config)?;
    let manifest_blob = dir.blobs().write_json(&build_manifest(&config_blob, layer))?;
    dir.write_index(&build_index(&manifest_blob, tag, platform))?;
    dir.write_layout_marker()?;
    Ok((config_blob, manifest_blob))
}
