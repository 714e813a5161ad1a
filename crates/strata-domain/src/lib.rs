#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod closure;
pub mod image;
pub mod layer;
pub mod popularity;
pub mod rules;

pub use closure::{read_closure_graph_file, StorePath};
pub use image::{read_image_config_file, read_image_file, Image, ImageConfig, IMAGE_VERSION};
pub use layer::{
    is_path_in_layers, read_layers_file, read_layers_files, Capability, History, Layer, Path,
    PathOptions, Perm, Rewrite, MEDIA_TYPE_IMAGE_LAYER,
};
pub use popularity::{sorted_paths_by_popularity, CycleError};
pub use rules::{
    read_capabilities_file, read_perms_file, read_rewrites_file, CapabilityPath, PermPath,
    RewritePath, RuleSet,
};
