/// Errors produced while writing or reading an OCI image layout.
#[derive(Debug, thiserror::Error)]
pub enum OciError {
    #[error("layout error: {0}")]
    Layout(String),

    #[error("layer error: {0}")]
    Layer(String),

    #[error("digest mismatch for {path}: expected {expected}, got {actual}")]
    DigestMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("size mismatch for {digest}: expected {expected} bytes, found {actual}")]
    SizeMismatch {
        digest: String,
        expected: u64,
        actual: u64,
    },

    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<tempfile::PersistError> for OciError {
    fn from(err: tempfile::PersistError) -> Self {
        OciError::Io(err.error)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OciError>;
