use std::fs;
use std::path::Path as FsPath;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Media type of an uncompressed OCI layer.
pub const MEDIA_TYPE_IMAGE_LAYER: &str = "application/vnd.oci.image.layer.v1.tar";

/// Replace `regex` by `repl` in every file path of a store path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewrite {
    pub regex: String,
    pub repl: String,
}

/// Ownership and mode override for files whose source path matches `regex`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perm {
    pub regex: String,
    /// Octal representation of the file mode, empty to keep the source mode.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(default)]
    pub uid: u64,
    #[serde(default)]
    pub gid: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uname: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gname: String,
}

/// File capabilities for files whose source path matches `regex`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub regex: String,
    /// Capability names (`CAP_NET_BIND_SERVICE` or `net_bind_service`),
    /// granted as both permitted and inheritable.
    pub capabilities: Vec<String>,
    #[serde(default = "default_effective")]
    pub effective: bool,
}

pub(crate) fn default_effective() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<Rewrite>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub perms: Vec<Perm>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
}

impl PathOptions {
    pub fn is_empty(&self) -> bool {
        self.rewrite.is_none() && self.perms.is_empty() && self.capabilities.is_empty()
    }
}

/// A top-level path of a layer together with the rules applied while
/// archiving it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<PathOptions>,
}

impl Path {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            options: None,
        }
    }
}

/// OCI history entry attached to a layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty_layer: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub digest: String,
    pub size: u64,
    pub diff_ids: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<Path>,
    #[serde(rename = "mediatype")]
    pub media_type: String,
    #[serde(
        rename = "layer-path",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub layer_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<History>,
}

/// Reads a JSON array of layers, as written by the layer commands.
pub fn read_layers_file(path: &FsPath) -> Result<Vec<Layer>> {
    let contents =
        fs::read(path).with_context(|| format!("failed to read layers {}", path.display()))?;
    serde_json::from_slice(&contents)
        .with_context(|| format!("failed to parse layers {}", path.display()))
}

/// Reads and concatenates several layers files, keeping file order.
pub fn read_layers_files(paths: &[impl AsRef<FsPath>]) -> Result<Vec<Layer>> {
    let mut layers = Vec::new();
    for path in paths {
        layers.extend(read_layers_file(path.as_ref())?);
    }
    Ok(layers)
}

/// True when one of `layers` already holds `path` with identical options.
pub fn is_path_in_layers(layers: &[Layer], path: &Path) -> bool {
    layers
        .iter()
        .flat_map(|layer| layer.paths.iter())
        .any(|candidate| candidate == path)
}
