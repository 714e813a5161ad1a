use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use strata_domain::RewritePath;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const STRATA_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\n{all-args}\n";

pub const STRATA_BEFORE_HELP: &str = concat!(
    "strata ",
    env!("CARGO_PKG_VERSION"),
    " – deterministic OCI layers from store closures\n\n",
    "\x1b[1;36mLayers\x1b[0m\n",
    "  layers-from-reproducible-storepaths      Rank a closure and describe its layers by digest only.\n",
    "  layers-from-non-reproducible-storepaths  Same, but keep every layer tarball on disk.\n\n",
    "\x1b[1;36mImages\x1b[0m\n",
    "  image                                    Combine an image config with layer files.\n",
    "  trace                                    Print one JSON line per tar entry of an image.\n",
);

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    propagate_version = false,
    disable_help_subcommand = true,
    before_help = STRATA_BEFORE_HELP,
    help_template = STRATA_HELP_TEMPLATE
)]
pub struct StrataCli {
    #[arg(
        short,
        long,
        help = "Only log warnings and errors",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(
        about = "Write a layers JSON file for store paths whose tarballs are reproducible.",
        override_usage = "strata layers-from-reproducible-storepaths OUTPUT CLOSURE_GRAPH [PARENT_LAYERS...]"
    )]
    LayersFromReproducibleStorepaths(LayersArgs),
    #[command(
        about = "Write a layers JSON file and keep the layer tarballs in --tar-directory.",
        override_usage = "strata layers-from-non-reproducible-storepaths OUTPUT CLOSURE_GRAPH [PARENT_LAYERS...] --tar-directory DIR"
    )]
    LayersFromNonReproducibleStorepaths(NonReproducibleLayersArgs),
    #[command(
        about = "Write an image JSON file from an image configuration and layers files.",
        override_usage = "strata image OUTPUT CONFIG LAYERS... [--from-image IMAGE] [--traces FILE,... --trace-output PATH]"
    )]
    Image(ImageArgs),
    #[command(about = "Trace the tar entries of every layer of an image JSON file.")]
    Trace(TraceArgs),
}

#[derive(Args, Debug)]
pub struct LayersArgs {
    #[arg(value_name = "OUTPUT", help = "Where the layers JSON is written")]
    pub output: PathBuf,
    #[arg(value_name = "CLOSURE_GRAPH", help = "JSON array of {path, references} records")]
    pub closure_graph: PathBuf,
    #[arg(value_name = "PARENT_LAYERS", help = "Layers files whose store paths are skipped")]
    pub parents: Vec<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Store path to leave out of every layer")]
    pub ignore: Option<String>,
    #[arg(
        long = "rewrite",
        value_name = "PATH,REGEX,REPLACEMENT",
        value_parser = parse_rewrite,
        help = "Replace REGEX by REPLACEMENT in the file paths of the tree PATH"
    )]
    pub rewrite: Vec<RewritePath>,
    #[arg(long, value_name = "FILE", help = "JSON file of rewrite rules")]
    pub rewrites: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "JSON file of file permission rules")]
    pub perms: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "JSON file of file capability rules")]
    pub capabilities: Option<PathBuf>,
    #[arg(long, value_name = "N", default_value_t = 1, help = "The maximum number of layers")]
    pub max_layers: usize,
    #[arg(long, value_name = "FILE", help = "JSON history entry attached to every layer")]
    pub history: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct NonReproducibleLayersArgs {
    #[command(flatten)]
    pub layers: LayersArgs,
    #[arg(long, value_name = "DIR", required = true, help = "Directory receiving the layer tarballs")]
    pub tar_directory: PathBuf,
}

#[derive(Args, Debug)]
pub struct ImageArgs {
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,
    #[arg(value_name = "CONFIG", help = "OCI image configuration JSON")]
    pub config: PathBuf,
    #[arg(value_name = "LAYERS", required = true, num_args = 1..)]
    pub layers: Vec<PathBuf>,
    #[arg(long, value_name = "IMAGE", help = "Image JSON whose layers come first")]
    pub from_image: Option<PathBuf>,
    #[arg(long, value_name = "ARCH", help = "OCI architecture (defaults to the host's)")]
    pub arch: Option<String>,
    #[arg(long, value_name = "RFC3339", value_parser = parse_created, help = "Creation date of the image")]
    pub created: Option<OffsetDateTime>,
    #[arg(
        long,
        value_name = "FILE,...",
        value_delimiter = ',',
        help = "Layer trace files to concatenate into --trace-output"
    )]
    pub traces: Vec<PathBuf>,
    #[arg(long, value_name = "PATH", default_value = "trace", help = "Where the image trace is written")]
    pub trace_output: PathBuf,
}

#[derive(Args, Debug)]
pub struct TraceArgs {
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
}

fn parse_rewrite(value: &str) -> Result<RewritePath, String> {
    RewritePath::parse_flag(value).map_err(|err| err.to_string())
}

fn parse_created(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|err| format!("invalid RFC 3339 date: {err}"))
}
