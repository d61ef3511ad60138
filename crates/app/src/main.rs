mod cli;
mod commands;
mod telemetry;

use clap::Parser;
use vision::VisionConfig;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    telemetry::init(cli.verbose)?;
    let config = VisionConfig::try_from(cli.settings)?;
    tracing::debug!(?config, "configuration resolved");
    commands::dispatch(cli.command, &config)
}
