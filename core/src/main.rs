use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use stega::{logging, opts::Opts, Cli, Config, StegaError};

#[tokio::main]
async fn main() -> ExitCode {
    let opts = Opts::parse();
    match run(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<StegaError>() {
                // help has already been printed
                Some(kind) if kind.is_dispatch_error() => eprintln!("error: {kind}"),
                _ => eprintln!("error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(opts: Opts) -> Result<()> {
    let config = Config::load(&opts)?;
    logging::init(&config.log_level)?;
    if let Some(path) = &config.source {
        info!(config = %path.display(), "configuration loaded");
    }

    let cli = Cli::builder()
        .loader_options(config.loader_options())
        .build();

    if opts.safe_mode {
        warn!("safe mode enabled - not loading plugins");
    } else {
        for source in &config.autoload {
            if let Err(err) = cli.load_plugin(source).await {
                error!("{err:#}");
            }
        }
    }
    cli.mark_as_ready();

    cli.run_command(opts.args).await
}
