use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::blob::BlobDescriptor;

// ---------------------------------------------------------------------------
// Media type constants
// ---------------------------------------------------------------------------

pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const MEDIA_TYPE_OCI_LAYER_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Annotation naming a manifest inside an index (the tag).
pub const ANNOTATION_REF_NAME: &str = "org.opencontainers.image.ref.name";

/// Version written to the `oci-layout` marker.
pub const IMAGE_LAYOUT_VERSION: &str = "1.0.0";

/// Schema version shared by manifests and indexes.
pub const SCHEMA_VERSION: u32 = 2;

/// Returns `true` when `media_type` is a gzip-compressed tar layer.
pub fn is_gzip_layer(media_type: &str) -> bool {
    media_type == MEDIA_TYPE_OCI_LAYER_GZIP
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A content-addressable descriptor used in both manifests and image indexes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,

    pub digest: String,

    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Describe a stored blob under `media_type`.
    pub fn for_blob(media_type: &str, blob: &BlobDescriptor) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: blob.digest.clone(),
            size: blob.size,
            platform: None,
            annotations: None,
        }
    }

    /// The `org.opencontainers.image.ref.name` annotation, if any.
    pub fn ref_name(&self) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_REF_NAME))
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Target platform for a manifest inside an image index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(architecture: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            variant: None,
        }
    }
}

// ---------------------------------------------------------------------------
// OCI Image Manifest
// ---------------------------------------------------------------------------

/// An OCI image manifest (application/vnd.oci.image.manifest.v1+json).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OciManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", default)]
    pub media_type: String,

    pub config: Descriptor,

    pub layers: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Image Index
// ---------------------------------------------------------------------------

/// An OCI image index (application/vnd.oci.image.index.v1+json), stored as
/// `index.json` at the layout root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,

    #[serde(rename = "mediaType", default)]
    pub media_type: String,

    pub manifests: Vec<Descriptor>,
}

impl ImageIndex {
    /// Find the manifest tagged `tag`.
    pub fn find_tag(&self, tag: &str) -> Option<&Descriptor> {
        self.manifests.iter().find(|d| d.ref_name() == Some(tag))
    }
}

// ---------------------------------------------------------------------------
// Image Config
// ---------------------------------------------------------------------------

/// Top-level image configuration blob.
///
/// `config` is whatever runtime configuration the caller supplied; it is
/// carried through without interpretation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageConfig {
    pub created: String,

    pub architecture: String,

    pub os: String,

    #[serde(default)]
    pub config: serde_json::Value,

    pub rootfs: RootFs,

    #[serde(default)]
    pub history: Vec<History>,
}

/// Layer chain of an image config, by uncompressed digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,

    pub diff_ids: Vec<String>,
}

impl RootFs {
    pub fn layers(diff_ids: Vec<String>) -> Self {
        Self {
            fs_type: "layers".to_string(),
            diff_ids,
        }
    }
}

/// One entry of the image build history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct History {
    pub created: String,

    pub created_by: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ---------------------------------------------------------------------------
// oci-layout marker
// ---------------------------------------------------------------------------

/// Contents of the fixed `oci-layout` file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OciLayout {
    #[serde(rename = "imageLayoutVersion")]
    pub image_layout_version: String,
}

impl Default for OciLayout {
    fn default() -> Self {
        Self {
            image_layout_version: IMAGE_LAYOUT_VERSION.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
