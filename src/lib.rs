pub mod audio;
pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod logger;
pub mod media;
pub mod pairing;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

use clap::Parser;

use crate::cli::Cli;
use crate::config::Config;

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;
    if let Some(url) = &cli.signaling_url {
        config.signaling.base_url = Some(url.clone());
    }
    logger::init(&config.logging.filter);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(cli::execute(cli.command, config))
}
