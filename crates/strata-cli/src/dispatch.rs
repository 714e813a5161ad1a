use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use strata_core::{
    assemble_image, new_layers, new_layers_non_reproducible, trace_image, Config, LayerPlan,
};
use strata_domain::{
    read_capabilities_file, read_closure_graph_file, read_image_config_file, read_image_file,
    read_layers_file, read_layers_files, read_perms_file, read_rewrites_file,
    sorted_paths_by_popularity, History, RuleSet,
};
use tracing::info;

use crate::cli::{CommandGroupCli, ImageArgs, LayersArgs, TraceArgs};

pub fn dispatch_command(config: &Config, group: &CommandGroupCli) -> Result<()> {
    match group {
        CommandGroupCli::LayersFromReproducibleStorepaths(args) => layers(config, args, None),
        CommandGroupCli::LayersFromNonReproducibleStorepaths(args) => {
            layers(config, &args.layers, Some(args.tar_directory.as_path()))
        }
        CommandGroupCli::Image(args) => image(args),
        CommandGroupCli::Trace(args) => trace(config, args),
    }
}

fn layers(config: &Config, args: &LayersArgs, tar_directory: Option<&Path>) -> Result<()> {
    let closure = read_closure_graph_file(&args.closure_graph)?;
    let ranked = sorted_paths_by_popularity(&closure)?;
    let plan = layer_plan(args, ranked)?;
    let layers = match tar_directory {
        Some(directory) => new_layers_non_reproducible(&plan, directory, config)?,
        None => new_layers(&plan, config)?,
    };
    write_json(&args.output, &layers)?;
    info!(
        output = %args.output.display(),
        layers = layers.len(),
        "layers have been written"
    );
    Ok(())
}

fn layer_plan(args: &LayersArgs, ranked: Vec<String>) -> Result<LayerPlan> {
    let mut rules = RuleSet::default();
    if let Some(path) = &args.rewrites {
        rules.rewrites = read_rewrites_file(path)?;
    }
    rules.rewrites.extend(args.rewrite.iter().cloned());
    if let Some(path) = &args.perms {
        rules.perms = read_perms_file(path)?;
    }
    if let Some(path) = &args.capabilities {
        rules.capabilities = read_capabilities_file(path)?;
    }
    let history = args.history.as_deref().map(read_history_file).transpose()?;

    Ok(LayerPlan {
        ignore: args.ignore.clone(),
        parents: read_layers_files(&args.parents)?,
        rules,
        history,
        ..LayerPlan::new(ranked, args.max_layers)
    })
}

fn read_history_file(path: &Path) -> Result<History> {
    let contents =
        fs::read(path).with_context(|| format!("failed to read history {}", path.display()))?;
    serde_json::from_slice(&contents)
        .with_context(|| format!("failed to parse history {}", path.display()))
}

fn image(args: &ImageArgs) -> Result<()> {
    info!(config = %args.config.display(), "reading image configuration");
    let image_config = read_image_config_file(&args.config)?;
    let base = args
        .from_image
        .as_deref()
        .map(read_image_file)
        .transpose()?;
    if let (Some(path), Some(base)) = (&args.from_image, &base) {
        info!(
            base = %path.display(),
            layers = base.layers.len(),
            "using base image"
        );
    }

    let mut layers = Vec::new();
    for path in &args.layers {
        let found = read_layers_file(path)?;
        info!(file = %path.display(), layers = found.len(), "adding layers");
        layers.extend(found);
    }

    let image = assemble_image(
        image_config,
        base.as_ref(),
        layers,
        args.arch.as_deref(),
        args.created,
    );
    write_json(&args.output, &image)?;
    info!(output = %args.output.display(), "image has been written");

    if !args.traces.is_empty() {
        concat_traces(&args.traces, &args.trace_output)?;
        info!(output = %args.trace_output.display(), "image trace has been written");
    }
    Ok(())
}

/// Concatenates the layer traces, in order, into one image trace.
fn concat_traces(traces: &[PathBuf], output: &Path) -> Result<()> {
    let file = File::create(output)
        .with_context(|| format!("failed to create trace {}", output.display()))?;
    let mut out = BufWriter::new(file);
    for path in traces {
        let mut source =
            File::open(path).with_context(|| format!("failed to open trace {}", path.display()))?;
        io::copy(&mut source, &mut out)
            .with_context(|| format!("failed to copy trace {}", path.display()))?;
    }
    out.flush()
        .with_context(|| format!("failed to write trace {}", output.display()))
}

fn trace(config: &Config, args: &TraceArgs) -> Result<()> {
    let image = read_image_file(&args.image)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    trace_image(&image, config.tar, &mut out)?;
    out.flush().context("failed to write the trace")?;
    Ok(())
}

/// Writes `value` as tab-indented JSON.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buffer = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buffer, PrettyFormatter::with_indent(b"\t"));
    value
        .serialize(&mut serializer)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    fs::write(path, buffer).with_context(|| format!("failed to write {}", path.display()))
}
