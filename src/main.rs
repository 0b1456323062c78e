//! Entry point for the `putaway` binary.

use anyhow::Result;
use clap::Parser;

use putaway_tracker::cli::{self, Cli};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;

    let _guard = putaway_tracker::init_logging(&config.log_dir(), cli.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(cli::execute(cli, config))
}
