#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

use clap::Parser;
use herald::{Cli, Herald, HeraldConfig, config::find_config_file};
use herald_common::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let config_path = find_config_file(cli.config)?;
    let config = HeraldConfig::load(&config_path)?;
    let command = cli.command.into_command()?;

    let herald = Herald::from_config(config).await?;
    herald
        .execute(command, |data| print!("{data}"))
        .await
}
