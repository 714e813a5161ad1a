#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

pub mod archive;
pub mod capability;
mod config;
pub mod digest;
mod error;
pub mod graph;
pub mod image;
pub mod layers;
pub mod options;

pub use archive::{tar_paths, tar_paths_sum, tar_paths_trace, tar_paths_write, TarStream};
pub use config::{Config, LayerConfig, TarConfig, CASE_HACK_ENV, LAYER_JOBS_ENV};
pub use digest::{Digest, HashingWriter};
pub use error::BuildError;
pub use image::{assemble_image, default_arch, layer_blob, trace_image};
pub use layers::{get_paths, new_layers, new_layers_non_reproducible, partition, LayerPlan};
