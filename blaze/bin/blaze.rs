#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use blaze::{Config, Gateway};
use clap::Parser;

/// SMTP submission gateway with an HTTP API
#[derive(Parser, Debug)]
#[command(name = "blaze")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "BLAZE_CONFIG", default_value = "blaze.ron")]
    config: PathBuf,

    /// Disable TLS on the listener and upstream connections
    #[arg(long)]
    development: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::read(&cli.config)?;
    config.development_mode |= cli.development;
    config.validate()?;

    if cli.check {
        println!("{} is valid", cli.config.display());
        return Ok(());
    }

    blaze_common::logging::init(&config.log);

    Gateway::new(config).run().await
}
