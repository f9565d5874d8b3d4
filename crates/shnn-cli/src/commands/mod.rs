//! CLI command implementations for snn

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::CliResult;

pub mod init;
pub mod model;

/// snn - neuron and synapse model compiler
#[derive(Parser, Debug)]
#[command(
    name = "snn",
    version,
    about = "Neuron and synapse model compiler",
    long_about = "Analyses neuron and synapse models: solves their dynamics through an external \
                  solver oracle, rewrites kernels and convolutions into solver state, synthesizes \
                  spike updates and splits configured neuron/synapse pairs."
)]
pub struct SnnCli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Options file (defaults to snn.toml in the project directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default options file
    #[command(alias = "new")]
    Init(init::InitCommand),

    /// Model transformation and reports
    Model(model::ModelCommand),
}

impl SnnCli {
    /// Execute the CLI command
    pub fn execute(self) -> CliResult<()> {
        let workspace = match self.workspace {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let config = self.config;

        match self.command {
            Commands::Init(cmd) => cmd.execute(workspace, config),
            Commands::Model(cmd) => cmd.execute(workspace, config),
        }
    }
}
