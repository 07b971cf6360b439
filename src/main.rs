use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use hubbridge::Bridge;
use hubbridge::cli::{self, Cli};
use hubbridge::config::{Config, LoadOutcome};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Bridge failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let config = match Config::load_or_create(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?
    {
        LoadOutcome::Loaded(config) => *config,
        LoadOutcome::Created(path) => {
            cli::print_first_run_notice(&path);
            return Ok(());
        }
    };

    hubbridge::logging::init(&config.log);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "hubbridge starting"
    );

    if !args.no_check_update {
        cli::report_updates(&args.release_url).await;
    }

    let bridge = Bridge::new(config).context("building bridge")?;
    bridge.run().await.context("bridge startup failed")?;
    Ok(())
}
