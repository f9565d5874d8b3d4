#![doc = "Model compiler core - analysis and AST-to-AST rewriting of neuron and synapse models.\n\nPublic responsibilities:\n- Name canonicalization between model variables and solver-facing identifiers (`names`)\n- Convolution analysis: kernel/port buffers and delta-kernel factors (`kernels`)\n- Inline-expression flattening into self-contained ODEs (`inline`)\n- Solver bridge: oracle request packaging, two-pass analytic/numeric protocol (`solver`, `oracle`)\n- AST rewriting passes and spike-update synthesis (`rewrite`, `spikes`, `passes`)\n- Neuron/synapse pair splitting (`pairing`)\n- Batch pipeline with per-run context and model-level failure isolation (`pipeline`, `context`)\n\nKey concepts:\n- Kernel buffer: one solver state trajectory per (kernel, port) pair, named `kernel__X__port[__d...]`\n- Delta kernel: an impulse kernel that bypasses the solver and yields a direct spike update\n- Oracle: an external ODE analyzer reached through the `SolverOracle` trait\n\nIntegration points:\n- shnn-ir: Provides the model AST, snippet parser, printer and symbol tables\n- shnn-cli: Loads models and options, runs `ModelCompiler`, writes reports and artifacts\n"]

#![deny(missing_docs)]

use shnn_ir::{IrError, SourcePosition};

/// Symbolic algebra capability for delta-factor isolation
pub mod algebra;
/// Per-run compilation context and per-model artifacts
pub mod context;
/// Inline-expression flattening
pub mod inline;
/// Convolution analysis
pub mod kernels;
/// Solver-facing names
pub mod names;
/// Command-line solver oracle
pub mod oracle;
/// Compiler options
pub mod options;
/// Neuron/synapse pair splitting
pub mod pairing;
/// Pass framework and the standard analysis passes
pub mod passes;
/// Batch pipeline
pub mod pipeline;
/// AST rewriting from solver results
pub mod rewrite;
/// Solver oracle request/response types
pub mod solver;
/// Spike-update synthesis
pub mod spikes;

pub use algebra::{ExpansionAlgebra, SymbolicAlgebra};
pub use context::{CompilationContext, ModelAnalysis, ModelArtifacts, ModelFailure};
pub use options::{CompilerOptions, NeuronSynapsePair, PostPort, PostPorts, PreserveExpressions};
pub use oracle::CommandOracle;
pub use passes::{Pass, PassManager};
pub use pipeline::{ModelCompiler, TransformedModels};
pub use solver::{OracleError, OracleResult, SolverOracle, SolverRequest, SolverResult, SolverResults};

/// Broad class of a compiler error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Problem in the model as written
    User,
    /// Broken transformation invariant
    Internal,
    /// The external solver failed
    Oracle,
}

fn at(position: &Option<SourcePosition>) -> String {
    position.map(|p| format!(" at {}", p)).unwrap_or_default()
}

/// Compiler error type
#[derive(thiserror::Error, Debug)]
pub enum CompilerError {
    /// A model declares a name the compiler reserves
    #[error("{model}: '{name}' is reserved{}", at(.position))]
    ReservedName {
        /// Model
        model: String,
        /// Reserved name
        name: String,
        /// Declaration position
        position: Option<SourcePosition>,
    },

    /// `convolve` names a kernel that is not defined
    #[error("{model}: no kernel '{kernel}' for convolution with '{port}'{}", at(.position))]
    MissingKernelDefinition {
        /// Model
        model: String,
        /// Kernel name as written
        kernel: String,
        /// Port name as written
        port: String,
        /// Call position
        position: Option<SourcePosition>,
    },

    /// `convolve` without exactly two variable arguments
    #[error("{model}: convolve expects a kernel and a port, got ({args}){}", at(.position))]
    MalformedConvolution {
        /// Model
        model: String,
        /// Printed arguments
        args: String,
        /// Call position
        position: Option<SourcePosition>,
    },

    /// Kernel variable without an initial value in the state block
    #[error("{model}: no initial value for '{variable}'{}", at(.position))]
    MissingInitialValue {
        /// Model
        model: String,
        /// Complete variable name
        variable: String,
        /// Kernel position
        position: Option<SourcePosition>,
    },

    /// A synthesized statement refers to an undeclared symbol
    #[error("{model}: cannot resolve '{name}'{}", at(.position))]
    UnresolvedSymbol {
        /// Model
        model: String,
        /// Name
        name: String,
        /// Position
        position: Option<SourcePosition>,
    },

    /// A configured pair names a model that was not loaded
    #[error("no {role} model named '{name}' for neuron/synapse pair")]
    UnknownPairModel {
        /// `neuron` or `synapse`
        role: &'static str,
        /// Name looked up, suffix included
        name: String,
    },

    /// Inline expressions that refer to each other in a loop
    #[error("{model}: inline expressions form a cycle: {}", .cycle.join(" -> "))]
    CyclicInlineExpressions {
        /// Model
        model: String,
        /// Names along the cycle, first repeated at the end
        cycle: Vec<String>,
    },

    /// Snippet parse failure (solver output or synthesized statement)
    #[error(transparent)]
    Parse(#[from] IrError),

    /// More than one result of the same regime for a model
    #[error("{model}: more than one {regime} solver result")]
    MultipleSolvers {
        /// Model
        model: String,
        /// `analytic` or `numeric`
        regime: &'static str,
    },

    /// A solver result lacks an entry the rewriter needs
    #[error("{model}: solver result has no entry for '{name}'")]
    MissingSolverEntry {
        /// Model
        model: String,
        /// Expected entry
        name: String,
    },

    /// The oracle failed for a model
    #[error("{model}: solver oracle failed: {source}")]
    Oracle {
        /// Model
        model: String,
        /// Underlying failure
        #[source]
        source: OracleError,
    },

    /// Generic error
    #[error("{0}")]
    Message(String),
}

impl CompilerError {
    /// Class of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompilerError::MultipleSolvers { .. } | CompilerError::MissingSolverEntry { .. } => {
                ErrorKind::Internal
            }
            CompilerError::Oracle { .. } => ErrorKind::Oracle,
            CompilerError::Message(_) => ErrorKind::Internal,
            _ => ErrorKind::User,
        }
    }
}

/// Result alias for compiler operations
pub type Result<T> = std::result::Result<T, CompilerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_positions() {
        let e = CompilerError::ReservedName {
            model: "iaf".into(),
            name: "__h".into(),
            position: Some(SourcePosition::new(4, 9)),
        };
        assert_eq!(e.to_string(), "iaf: '__h' is reserved at 4:9");
        assert_eq!(e.kind(), ErrorKind::User);

        let e = CompilerError::CyclicInlineExpressions {
            model: "iaf".into(),
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(e.to_string(), "iaf: inline expressions form a cycle: a -> b -> a");
    }

    #[test]
    fn error_kinds() {
        let e = CompilerError::MultipleSolvers { model: "m".into(), regime: "analytic" };
        assert_eq!(e.kind(), ErrorKind::Internal);
        let e = CompilerError::Oracle { model: "m".into(), source: OracleError::Failed("boom".into()) };
        assert_eq!(e.kind(), ErrorKind::Oracle);
        assert!(e.to_string().contains("boom"));
    }
}
