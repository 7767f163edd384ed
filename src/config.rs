//! Conversion options, `name:tag` parsing and user config loading.

use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// gzip level used when the caller does not pick one. Layers can be large
/// and conversion is a batch job, so favour speed.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 1;

/// Operating system recorded in the config and index.
pub const DEFAULT_OS: &str = "linux";

/// Key under which OCI image configs carry labels.
pub const LABELS_KEY: &str = "Labels";

/// A parsed `name[:tag]` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageName {
    pub name: String,
    pub tag: String,
}

impl ImageName {
    /// Parse `name:tag`. A missing tag means `latest`.
    ///
    /// The tag colon must come after the last '/', so registry ports such
    /// as `localhost:5000/app` stay part of the name. Every '/'-separated
    /// component of the name must be non-empty, since the last one becomes
    /// the default destination directory.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let last_slash = raw.rfind('/');

        let (name, tag) = match raw.rfind(':') {
            Some(colon_pos) if last_slash.map_or(true, |slash| colon_pos > slash) => {
                (&raw[..colon_pos], &raw[colon_pos + 1..])
            }
            _ => (raw, "latest"),
        };

        if tag.is_empty() || name.split('/').any(str::is_empty) {
            return Err(Error::ImageName(raw.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Final path component of the name, used as the default destination.
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Everything one conversion needs to know.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// OSTree ref or commit checksum to convert.
    pub reference: String,
    pub image: ImageName,
    /// Layout directory to create; must not exist yet.
    pub dest: PathBuf,
    /// gzip level, 0..=9.
    pub compression: u32,
    /// Optional JSON object merged into the image config's `config` field.
    pub user_config: Option<PathBuf>,
    /// Overrides architecture inference when set.
    pub architecture: Option<String>,
    pub os: String,
}

impl ConvertOptions {
    pub fn new(reference: impl Into<String>, image: ImageName) -> Self {
        let dest = PathBuf::from(image.basename());
        Self {
            reference: reference.into(),
            image,
            dest,
            compression: DEFAULT_COMPRESSION_LEVEL,
            user_config: None,
            architecture: None,
            os: DEFAULT_OS.to_string(),
        }
    }

    pub fn dest(mut self, dest: impl Into<PathBuf>) -> Self {
        self.dest = dest.into();
        self
    }

    pub fn compression(mut self, level: u32) -> Self {
        self.compression = level;
        self
    }

    pub fn user_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.user_config = Some(path.into());
        self
    }

    pub fn architecture(mut self, arch: impl Into<String>) -> Self {
        self.architecture = Some(arch.into());
        self
    }
}

/// Load the user's image config file.
///
/// The content is opaque except for two checks: it must be a JSON object,
/// and `Labels`, if present, must be an object too since labels get stamped
/// into it.
pub fn load_user_config(path: Option<&Path>) -> Result<Map<String, Value>> {
    let Some(path) = path else {
        return Ok(Map::new());
    };

    let config_error = |reason: String| Error::Config {
        path: path.to_path_buf(),
        reason,
    };

    let bytes = fs::read(path).map_err(|e| config_error(e.to_string()))?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| config_error(e.to_string()))?;

    let Value::Object(map) = value else {
        return Err(config_error("expected a JSON object".to_string()));
    };

    match map.get(LABELS_KEY) {
        None | Some(Value::Object(_)) | Some(Value::Null) => Ok(map),
        Some(_) => Err(config_error(format!("{} must be an object", LABELS_KEY))),
    }
}
