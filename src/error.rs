//! Error types for ostree-oci

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using ostree-oci Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a conversion
#[derive(Error, Debug)]
pub enum Error {
    /// The snapshot reference or its commit could not be resolved
    #[error("cannot resolve {reference}: {reason}")]
    Resolution { reference: String, reason: String },

    /// The tree exporter failed, or streaming its output failed
    #[error("failed to export {snapshot}: {reason}")]
    Export { snapshot: String, reason: String },

    /// The user-supplied image configuration is unusable
    #[error("invalid image config {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// The `name:tag` argument is malformed
    #[error("invalid image name {0:?}")]
    ImageName(String),

    /// The destination path cannot hold a layout
    #[error("invalid destination {0:?}")]
    InvalidDestination(PathBuf),

    /// Refusing to write into an existing destination
    #[error("destination {0} already exists")]
    DestinationExists(PathBuf),

    /// Image layout errors
    #[error("OCI layout error: {0}")]
    Layout(#[from] ocidir::OciError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
