use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use strata_core::Config;

mod cli;
mod dispatch;

use cli::StrataCli;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = StrataCli::parse();
    init_tracing(cli.trace, cli.verbose, cli.quiet);

    let config = Config::from_env().map_err(|err| eyre!("{err:?}"))?;
    dispatch::dispatch_command(&config, &cli.command).map_err(|err| eyre!("{err:?}"))?;
    Ok(())
}

fn init_tracing(trace: bool, verbose: u8, quiet: bool) {
    let level = if trace {
        "trace"
    } else if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    // Logs go to stderr: `trace` writes its records to stdout.
    let filter = format!("strata={level},strata_core={level},strata_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
