//! # snn - neuron and synapse model compiler
//!
//! Loads models from JSON sources, splits configured neuron/synapse pairs,
//! solves their dynamics through an external oracle and writes the
//! transformed models with their solver artifacts.

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shnn_cli::SnnCli;

fn main() {
    let cli = SnnCli::parse();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(err) = cli.execute() {
        error!("Command failed: {}", err);
        std::process::exit(1);
    }
}
