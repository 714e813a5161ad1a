use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::layer::Layer;

pub const IMAGE_VERSION: u32 = 1;

/// The subset of the OCI image configuration carried into the image document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub exposed_ports: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_signal: Option<String>,
}

/// Image document handed to the transport that pushes or loads the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub version: u32,
    #[serde(rename = "image-config")]
    pub image_config: ImageConfig,
    #[serde(default)]
    pub layers: Vec<Layer>,
    pub arch: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created: Option<OffsetDateTime>,
}

pub fn read_image_file(path: &Path) -> Result<Image> {
    let contents =
        fs::read(path).with_context(|| format!("failed to read image {}", path.display()))?;
    let image: Image = serde_json::from_slice(&contents)
        .with_context(|| format!("failed to parse image {}", path.display()))?;
    if image.version != IMAGE_VERSION {
        bail!(
            "unsupported image version {} in {} (expected {IMAGE_VERSION})",
            image.version,
            path.display()
        );
    }
    Ok(image)
}

pub fn read_image_config_file(path: &Path) -> Result<ImageConfig> {
    let contents = fs::read(path)
        .with_context(|| format!("failed to read image configuration {}", path.display()))?;
    serde_json::from_slice(&contents)
        .with_context(|| format!("failed to parse image configuration {}", path.display()))
}
