//! Model commands: transform a batch, print reports

use clap::{Args, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use shnn_compiler::{
    CommandOracle, CompilationContext, ModelCompiler, OracleError, OracleResult, SolverOracle,
    SolverRequest,
};

use crate::config::load_options;
use crate::error::{CliError, CliResult};
use crate::sources::{load_file, load_models};
use crate::workspace::Workspace;

/// Model-related commands
#[derive(Args, Debug)]
pub struct ModelCommand {
    #[command(subcommand)]
    pub sub: ModelSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum ModelSubcommand {
    /// Split pairs, solve dynamics and rewrite every model
    Transform(ModelTransform),
    /// Print the textual report of models in a source file
    Report(ModelReport),
}

/// Transform a batch of models
#[derive(Args, Debug)]
pub struct ModelTransform {
    /// Model source files or directories (JSON)
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Output directory
    #[arg(short, long, default_value = "target/snn")]
    pub output: PathBuf,

    /// Solver oracle executable; reads a request on stdin, prints results on stdout
    #[arg(long)]
    pub oracle: Option<PathBuf>,

    /// Argument passed to the oracle (repeatable)
    #[arg(long = "oracle-arg", allow_hyphen_values = true)]
    pub oracle_args: Vec<String>,

    /// Write textual reports even if the options do not ask for them
    #[arg(long)]
    pub reports: bool,
}

/// Print model reports
#[derive(Args, Debug)]
pub struct ModelReport {
    /// Model source file (JSON)
    pub input: PathBuf,

    /// Only the model with this name
    #[arg(long)]
    pub name: Option<String>,
}

/// Oracle used when none is configured
struct NoOracle;

impl SolverOracle for NoOracle {
    fn solve(&self, _: &SolverRequest) -> OracleResult {
        Err(OracleError::Failed(
            "no solver oracle configured (pass --oracle)".into(),
        ))
    }
}

impl ModelCommand {
    pub fn execute(self, workspace: PathBuf, config: Option<PathBuf>) -> CliResult<()> {
        match self.sub {
            ModelSubcommand::Transform(cmd) => cmd.execute(workspace, config),
            ModelSubcommand::Report(cmd) => cmd.execute(),
        }
    }
}

impl ModelTransform {
    pub fn execute(self, workspace: PathBuf, config: Option<PathBuf>) -> CliResult<()> {
        let options = load_options(config.as_deref(), &workspace)?;
        let (neurons, synapses) = load_models(&self.inputs)?;
        let total = neurons.len() + synapses.len();
        if total == 0 {
            return Err(CliError::invalid_args("no models found in the given sources"));
        }
        info!(neurons = neurons.len(), synapses = synapses.len(), "loaded models");

        let oracle: Box<dyn SolverOracle> = match &self.oracle {
            Some(program) => Box::new(CommandOracle::new(program).args(self.oracle_args.iter().cloned())),
            None => {
                if !self.oracle_args.is_empty() {
                    return Err(CliError::invalid_args("--oracle-arg given without --oracle"));
                }
                Box::new(NoOracle)
            }
        };

        let mut ctx = CompilationContext::new();
        let compiler = ModelCompiler::new(&options, oracle.as_ref());
        let transformed = compiler.run(neurons, synapses, &mut ctx);

        let output = if self.output.is_absolute() {
            self.output.clone()
        } else {
            workspace.join(&self.output)
        };
        let ws = Workspace::new(output);
        let reports = self.reports || options.store_reports;
        ws.ensure_directories(reports)?;
        for model in transformed.iter() {
            let path = ws.write_model(model)?;
            info!("Wrote {}", path.display());
            if reports {
                ws.write_report(model)?;
            }
        }
        ws.write_artifacts(&ctx)?;

        println!("Transformed {} model(s) into {}", transformed.len(), ws.root.display());
        if let Some(path) = ws.write_failures(ctx.failures())? {
            for failure in ctx.failures() {
                warn!(model = %failure.model, "{}", failure.error);
            }
            warn!("Failures recorded in {}", path.display());
            return Err(CliError::ModelsFailed {
                failed: ctx.failures().len(),
                total,
            });
        }
        Ok(())
    }
}

impl ModelReport {
    pub fn execute(self) -> CliResult<()> {
        let models = load_file(&self.input)?;
        let mut shown = 0;
        for mut model in models {
            if self.name.as_ref().is_some_and(|n| *n != model.name) {
                continue;
            }
            model.update_scope();
            println!("{}", model.to_text());
            shown += 1;
        }
        if shown == 0 {
            if let Some(name) = self.name {
                return Err(CliError::missing_resource(format!(
                    "model '{}' in {}",
                    name,
                    self.input.display()
                )));
            }
        }
        Ok(())
    }
}
