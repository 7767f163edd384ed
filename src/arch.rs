//! Architecture inference from snapshot reference names.
//!
//! OSTree refs conventionally embed the machine architecture
//! (`fedora/39/x86_64/silverblue`). The table is a plain value handed to the
//! converter, so callers can extend or replace it.

/// Ordered `(token, oci_architecture)` pairs plus a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchTable {
    entries: Vec<(String, String)>,
    default: String,
}

/// Outcome of [`ArchTable::infer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchInference {
    /// `token` was found in the reference.
    Matched { token: String, architecture: String },
    /// Nothing matched; `architecture` is the table default.
    Fallback { architecture: String },
}

impl ArchInference {
    pub fn architecture(&self) -> &str {
        match self {
            ArchInference::Matched { architecture, .. } => architecture,
            ArchInference::Fallback { architecture } => architecture,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ArchInference::Fallback { .. })
    }
}

impl Default for ArchTable {
    fn default() -> Self {
        Self::new(
            [
                ("x86_64", "amd64"),
                ("aarch64", "arm64"),
                ("armv7hl", "arm"),
                ("armhfp", "arm"),
                ("ppc64le", "ppc64le"),
                ("s390x", "s390x"),
                ("riscv64", "riscv64"),
                ("i686", "386"),
            ],
            "amd64",
        )
    }
}

impl ArchTable {
    pub fn new<I, K, V>(entries: I, default: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into().to_lowercase(), v.into()))
                .collect(),
            default: default.into(),
        }
    }

    pub fn default_architecture(&self) -> &str {
        &self.default
    }

    /// First entry whose token appears in `reference`, ignoring case.
    pub fn infer(&self, reference: &str) -> ArchInference {
        let haystack = reference.to_lowercase();
        self.entries
            .iter()
            .find(|(token, _)| haystack.contains(token.as_str()))
            .map(|(token, arch)| ArchInference::Matched {
                token: token.clone(),
                architecture: arch.clone(),
            })
            .unwrap_or_else(|| ArchInference::Fallback {
                architecture: self.default.clone(),
            })
    }
}
