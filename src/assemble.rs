//! Image config, manifest and index records.
//!
//! Pure functions: each record is built from the descriptors of what it
//! references and handed back for the caller to store.

use ocidir::manifest::{
    Descriptor, History, ImageConfig, ImageIndex, OciManifest, Platform, RootFs,
    ANNOTATION_REF_NAME, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_INDEX, MEDIA_TYPE_OCI_LAYER_GZIP,
    MEDIA_TYPE_OCI_MANIFEST, SCHEMA_VERSION,
};
use ocidir::{BlobDescriptor, LayerDescriptor};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::SystemTime;

use crate::config::{ImageName, LABELS_KEY};

/// Label carrying the source commit checksum.
pub const LABEL_OSTREE_COMMIT: &str = "ostree.commit";

/// Inputs for [`build_config`] that are not the user's own config.
#[derive(Debug, Clone)]
pub struct ConfigInputs<'a> {
    pub created: SystemTime,
    pub platform: &'a Platform,
    pub diff_id: &'a str,
    pub image: &'a ImageName,
    pub reference: &'a str,
    pub commit: &'a str,
}

/// Build the image config around the user's opaque runtime config.
///
/// The user config lands under `config` untouched apart from two labels:
/// the image's `name:tag` and the source commit.
pub fn build_config(inputs: &ConfigInputs<'_>, mut user_config: Map<String, Value>) -> ImageConfig {
    let labels = user_config
        .entry(LABELS_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    if !labels.is_object() {
        *labels = Value::Object(Map::new());
    }
    if let Value::Object(labels) = labels {
        labels.insert(
            ANNOTATION_REF_NAME.to_string(),
            Value::String(inputs.image.to_string()),
        );
        labels.insert(
            LABEL_OSTREE_COMMIT.to_string(),
            Value::String(inputs.commit.to_string()),
        );
    }

    let created = humantime::format_rfc3339_seconds(inputs.created).to_string();

    ImageConfig {
        created: created.clone(),
        architecture: inputs.platform.architecture.clone(),
        os: inputs.platform.os.clone(),
        config: Value::Object(user_config),
        rootfs: RootFs::layers(vec![inputs.diff_id.to_string()]),
        history: vec![History {
            created,
            created_by: format!("ostree-oci {}", env!("CARGO_PKG_VERSION")),
            comment: Some(format!(
                "converted from {} ({})",
                inputs.reference, inputs.commit
            )),
        }],
    }
}

/// Bind one config and one gzip layer.
pub fn build_manifest(config: &BlobDescriptor, layer: &LayerDescriptor) -> OciManifest {
    OciManifest {
        schema_version: SCHEMA_VERSION,
        media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
        config: Descriptor::for_blob(MEDIA_TYPE_OCI_CONFIG, config),
        layers: vec![Descriptor::for_blob(MEDIA_TYPE_OCI_LAYER_GZIP, &layer.blob)],
        annotations: None,
    }
}

/// Name the manifest under `tag` for `platform`.
pub fn build_index(manifest: &BlobDescriptor, tag: &str, platform: &Platform) -> ImageIndex {
    let mut descriptor = Descriptor::for_blob(MEDIA_TYPE_OCI_MANIFEST, manifest);
    descriptor.platform = Some(platform.clone());
    descriptor.annotations = Some(BTreeMap::from([(
        ANNOTATION_REF_NAME.to_string(),
        tag.to_string(),
    )]));

    ImageIndex {
        schema_version: SCHEMA_VERSION,
        media_type: MEDIA_TYPE_OCI_INDEX.to_string(),
        manifests: vec![descriptor],
    }
}
