//! Partitioning of ranked store paths into layers.

use std::path::{Path as FsPath, PathBuf};

use rayon::prelude::*;
use strata_domain::{is_path_in_layers, History, Layer, Path, RuleSet, MEDIA_TYPE_IMAGE_LAYER};
use tracing::{debug, info};

use crate::config::Config;
use crate::digest::Digest;
use crate::error::BuildError;
use crate::archive::{tar_paths_sum, tar_paths_write};

/// Everything that decides which layers get built.
#[derive(Debug, Clone, Default)]
pub struct LayerPlan {
    /// Store paths, most popular first.
    pub paths: Vec<String>,
    /// A store path that must not end up in any layer.
    pub ignore: Option<String>,
    /// Layers of the parent image; their paths are not added again.
    pub parents: Vec<Layer>,
    pub rules: RuleSet,
    pub max_layers: usize,
    pub history: Option<History>,
}

impl LayerPlan {
    pub fn new(paths: Vec<String>, max_layers: usize) -> Self {
        Self {
            paths,
            max_layers,
            ..Self::default()
        }
    }
}

/// Attaches rules to the ranked paths and drops the ignored path, empty
/// paths and paths already shipped by a parent layer.
pub fn get_paths(plan: &LayerPlan) -> Vec<Path> {
    let mut paths = Vec::with_capacity(plan.paths.len());
    for store_path in &plan.paths {
        if store_path.is_empty() || plan.ignore.as_deref() == Some(store_path.as_str()) {
            continue;
        }
        let path = Path {
            path: store_path.clone(),
            options: plan.rules.options_for_path(store_path),
        };
        if is_path_in_layers(&plan.parents, &path) {
            debug!(path = %store_path, "already provided by a parent layer");
            continue;
        }
        paths.push(path);
    }
    paths
}

/// Splits `paths` into at most `max_layers` groups: one path per group for
/// the first `max_layers - 1` paths, everything else in the last group.
pub fn partition(mut paths: Vec<Path>, max_layers: usize) -> Result<Vec<Vec<Path>>, BuildError> {
    if max_layers == 0 {
        return Err(BuildError::InvalidLayerCount(max_layers));
    }
    let singles = paths.len().min(max_layers - 1);
    let tail = paths.split_off(singles);
    let mut groups: Vec<Vec<Path>> = paths.into_iter().map(|path| vec![path]).collect();
    if !tail.is_empty() {
        groups.push(tail);
    }
    Ok(groups)
}

/// Builds layers whose archives are only hashed, never stored.
pub fn new_layers(plan: &LayerPlan, config: &Config) -> Result<Vec<Layer>, BuildError> {
    build_layers(plan, config, |paths| {
        let (digest, size) = tar_paths_sum(paths, config.tar)?;
        Ok((None, digest, size))
    })
}

/// Builds layers and keeps their archives as `<tar_directory>/<hex>.tar`.
pub fn new_layers_non_reproducible(
    plan: &LayerPlan,
    tar_directory: &FsPath,
    config: &Config,
) -> Result<Vec<Layer>, BuildError> {
    build_layers(plan, config, |paths| {
        let (file, digest, size) = tar_paths_write(paths, config.tar, tar_directory)?;
        Ok((Some(file), digest, size))
    })
}

type Serialized = (Option<PathBuf>, Digest, u64);

fn build_layers<F>(plan: &LayerPlan, config: &Config, serialize: F) -> Result<Vec<Layer>, BuildError>
where
    F: Fn(&[Path]) -> Result<Serialized, BuildError> + Sync,
{
    let groups = partition(get_paths(plan), plan.max_layers)?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.layers.jobs)
        .build()?;
    pool.install(|| {
        groups
            .into_par_iter()
            .map(|paths| {
                let (layer_path, digest, size) = serialize(&paths)?;
                info!(
                    digest = %digest,
                    size,
                    paths = paths.len(),
                    "built layer"
                );
                Ok(Layer {
                    digest: digest.to_string(),
                    size,
                    diff_ids: digest.to_string(),
                    paths,
                    media_type: MEDIA_TYPE_IMAGE_LAYER.to_string(),
                    layer_path: layer_path.map(|path| path.display().to_string()),
                    history: plan.history.clone(),
                })
            })
            .collect::<Result<Vec<_>, BuildError>>()
    })
}
