//! ostree-oci: OSTree commits as OCI image layouts
//!
//! Takes one commit from an OSTree repository and writes it out as an OCI
//! image layout directory with a single gzip layer:
//!
//! ```text
//! dest/oci-layout
//! dest/index.json
//! dest/blobs/sha256/<layer, config, manifest>
//! ```
//!
//! Every blob is named by the SHA-256 of its bytes. The config records the
//! layer's uncompressed digest as its `diff_id`.
//!
//! # Example
//!
//! ```no_run
//! use ostree_oci::{ConvertOptions, Converter, ImageName, OstreeRepo};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let converter = Converter::new(OstreeRepo::new("/srv/repo"));
//!     let opts = ConvertOptions::new(
//!         "exampleos/x86_64/stable",
//!         ImageName::parse("exampleos:stable")?,
//!     )
//!     .compression(3);
//!
//!     let report = converter.convert(&opts).await?;
//!     println!("manifest: {}", report.manifest.digest);
//!     Ok(())
//! }
//! ```

pub mod arch;
pub mod assemble;
pub mod config;
pub mod convert;
pub mod error;
pub mod export;
pub mod ostree;

// Re-exports for convenience
pub use arch::{ArchInference, ArchTable};
pub use config::{ConvertOptions, ImageName};
pub use convert::{ConversionReport, Converter};
pub use error::{Error, Result};
pub use ostree::{MemoryStore, OstreeRepo, SnapshotStore};
