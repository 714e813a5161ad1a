use std::fs::File;
use std::io::{Read, Write};

use strata_domain::{Image, ImageConfig, Layer, IMAGE_VERSION};
use time::OffsetDateTime;

use crate::config::TarConfig;
use crate::error::BuildError;
use crate::archive::{tar_paths, tar_paths_trace};

/// OCI name of the architecture this binary was built for.
pub fn default_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "arm" => "arm",
        "powerpc64" => "ppc64le",
        "riscv64" => "riscv64",
        "s390x" => "s390x",
        "loongarch64" => "loong64",
        other => other,
    }
}

/// Assembles the image document: the base image layers come first, then
/// `layers` in the given order.
pub fn assemble_image(
    image_config: ImageConfig,
    base: Option<&Image>,
    layers: Vec<Layer>,
    arch: Option<&str>,
    created: Option<OffsetDateTime>,
) -> Image {
    let mut all_layers = base.map(|image| image.layers.clone()).unwrap_or_default();
    all_layers.extend(layers);
    Image {
        version: IMAGE_VERSION,
        image_config,
        layers: all_layers,
        arch: arch.map_or_else(|| default_arch().to_string(), str::to_string),
        created,
    }
}

/// Opens the blob of `layer`: the stored archive when there is one, or a
/// fresh serialization of its paths otherwise.
pub fn layer_blob(layer: &Layer, config: TarConfig) -> Result<Box<dyn Read + Send>, BuildError> {
    if let Some(layer_path) = &layer.layer_path {
        let file = File::open(layer_path).map_err(|err| BuildError::io(layer_path, err))?;
        return Ok(Box::new(file));
    }
    if layer.paths.is_empty() {
        return Err(BuildError::Unsupported {
            path: layer.digest.clone().into(),
            reason: "the layer has neither a layer path nor store paths".to_string(),
        });
    }
    Ok(Box::new(tar_paths(&layer.paths, config)))
}

/// Traces every layer of `image`, in order.
pub fn trace_image(image: &Image, config: TarConfig, out: &mut dyn Write) -> Result<(), BuildError> {
    for layer in &image.layers {
        tar_paths_trace(&layer.paths, config, out)?;
    }
    Ok(())
}
