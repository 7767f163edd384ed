//! Writing OCI image layouts.
//!
//! Blobs are stored under their own SHA-256, layers are streamed through
//! gzip while both the compressed and the uncompressed bytes are hashed, and
//! `index.json` / `oci-layout` sit at fixed paths so a generic reader can
//! discover the image.

pub mod blob;
pub mod error;
pub mod layer;
pub mod layout;
pub mod manifest;

pub use blob::{sha256_digest, BlobDescriptor, BlobStore};
pub use error::{OciError, Result};
pub use layer::{LayerDescriptor, LayerWriter, PendingLayer};
pub use layout::{OciDir, VerifyReport};
