//! KeyNotes CLI entry point.

use clap::Parser;
use keynotes_cli::{init_logging, run, Cli};
use keynotes_core::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_or_default(cli.config.as_deref())?;

    init_logging(&config.logging, cli.verbose);

    run(cli, config).await
}
