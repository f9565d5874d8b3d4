//! Options file initialization

use clap::Args;
use std::path::PathBuf;
use tracing::info;

use shnn_compiler::{CompilerOptions, NeuronSynapsePair, PostPorts};

use crate::config::{save_options, OPTIONS_FILE};
use crate::error::{CliError, CliResult};

/// Write a default options file
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Add a neuron/synapse pair, as `neuron:synapse[:post_port]`
    #[arg(long = "pair")]
    pub pairs: Vec<String>,

    /// Suffix the front end appends to model names
    #[arg(long)]
    pub model_suffix: Option<String>,

    /// Write a textual report per transformed model
    #[arg(long)]
    pub reports: bool,

    /// Overwrite an existing options file
    #[arg(long)]
    pub force: bool,
}

/// Parse `neuron:synapse[:post_port]`
pub fn parse_pair(spec: &str) -> CliResult<NeuronSynapsePair> {
    let parts: Vec<&str> = spec.split(':').collect();
    match parts.as_slice() {
        [neuron, synapse] | [neuron, synapse, ""] if !neuron.is_empty() && !synapse.is_empty() => {
            Ok(NeuronSynapsePair {
                neuron: neuron.to_string(),
                synapse: synapse.to_string(),
                post_ports: None,
            })
        }
        [neuron, synapse, port] if !neuron.is_empty() && !synapse.is_empty() => Ok(NeuronSynapsePair {
            neuron: neuron.to_string(),
            synapse: synapse.to_string(),
            post_ports: Some(PostPorts::Single(port.to_string())),
        }),
        _ => Err(CliError::invalid_args(format!(
            "pair '{}' is not neuron:synapse[:post_port]",
            spec
        ))),
    }
}

impl InitCommand {
    pub fn execute(self, workspace: PathBuf, config: Option<PathBuf>) -> CliResult<()> {
        let path = config.unwrap_or_else(|| workspace.join(OPTIONS_FILE));
        if path.exists() && !self.force {
            return Err(CliError::config(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }

        let options = CompilerOptions {
            neuron_synapse_pairs: self
                .pairs
                .iter()
                .map(|p| parse_pair(p))
                .collect::<CliResult<Vec<_>>>()?,
            model_suffix: self.model_suffix.unwrap_or_default(),
            store_reports: self.reports,
            ..CompilerOptions::default()
        };
        save_options(&options, &path)?;

        info!("Options written to {}", path.display());
        Ok(())
    }
}
