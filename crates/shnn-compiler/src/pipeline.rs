//! Batch pipeline: pair splitting, then per-model analysis.
//!
//! Models are processed one at a time. A model whose analysis fails is
//! recorded in the context and dropped from the output; the batch goes on.

use shnn_ir::Model;
use tracing::{error, info};

use crate::algebra::{ExpansionAlgebra, SymbolicAlgebra};
use crate::context::{CompilationContext, ModelAnalysis};
use crate::options::CompilerOptions;
use crate::pairing::split_pairs;
use crate::passes::PassManager;
use crate::solver::SolverOracle;
use crate::Result;

/// Models after a run, ready for code generation
#[derive(Debug, Clone, Default)]
pub struct TransformedModels {
    /// Neurons, derived pair neurons last
    pub neurons: Vec<Model>,
    /// Synapses, paired ones replaced by their derived synapse
    pub synapses: Vec<Model>,
}

impl TransformedModels {
    /// Every model, neurons first
    pub fn iter(&self) -> impl Iterator<Item = &Model> {
        self.neurons.iter().chain(self.synapses.iter())
    }

    /// Number of models
    pub fn len(&self) -> usize {
        self.neurons.len() + self.synapses.len()
    }

    /// True when no model survived
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives the analysis of a batch of models
pub struct ModelCompiler<'a> {
    options: &'a CompilerOptions,
    oracle: &'a dyn SolverOracle,
    algebra: &'a dyn SymbolicAlgebra,
}

impl<'a> ModelCompiler<'a> {
    /// Compiler using the built-in expansion algebra
    pub fn new(options: &'a CompilerOptions, oracle: &'a dyn SolverOracle) -> Self {
        Self {
            options,
            oracle,
            algebra: &ExpansionAlgebra,
        }
    }

    /// Replace the symbolic algebra used for delta factors
    pub fn with_algebra(mut self, algebra: &'a dyn SymbolicAlgebra) -> Self {
        self.algebra = algebra;
        self
    }

    /// Options of this compiler
    pub fn options(&self) -> &CompilerOptions {
        self.options
    }

    /// Run the standard passes on one model
    pub fn analyze_model(&self, model: &mut Model) -> Result<ModelAnalysis> {
        info!(model = %model.name, synapse = model.is_synapse(), "analysing model");
        model.update_scope();
        let mut analysis = ModelAnalysis::default();
        PassManager::standard(self.options, self.oracle, self.algebra).run(model, &mut analysis)?;
        Ok(analysis)
    }

    /// Split the configured pairs, then analyze every model.
    ///
    /// Artifacts and failures are filed in `ctx` under the model name.
    pub fn run(
        &self,
        neurons: Vec<Model>,
        synapses: Vec<Model>,
        ctx: &mut CompilationContext,
    ) -> TransformedModels {
        let split = split_pairs(&neurons, &synapses, self.options, ctx);
        TransformedModels {
            neurons: self.analyze_all(split.neurons, ctx),
            synapses: self.analyze_all(split.synapses, ctx),
        }
    }

    fn analyze_all(&self, models: Vec<Model>, ctx: &mut CompilationContext) -> Vec<Model> {
        let mut out = Vec::with_capacity(models.len());
        for mut model in models {
            match self.analyze_model(&mut model) {
                Ok(analysis) => {
                    ctx.record(model.name.clone(), analysis.into_artifacts());
                    out.push(model);
                }
                Err(e) => {
                    error!(model = %model.name, kind = ?e.kind(), "model skipped: {}", e);
                    ctx.fail(model.name.clone(), e);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{OracleError, OracleResult, SolverRequest, SolverResult};
    use shnn_ir::ModelBuilder;

    fn exponential_oracle(req: &SolverRequest) -> OracleResult {
        if req.dynamics.iter().any(|d| d.expression.starts_with("broken")) {
            return Err(OracleError::Failed("cannot analyze".into()));
        }
        Ok(vec![SolverResult {
            solver: "analytical".into(),
            state_variables: vec!["x".into()],
            initial_values: [("x".to_string(), "1.0".to_string())].into(),
            update_expressions: [("x".to_string(), "__P__x__x * x".to_string())].into(),
            propagators: [("__P__x__x".to_string(), "exp(-__h)".to_string())].into(),
        }])
    }

    #[test]
    fn failing_models_are_dropped_and_recorded() {
        let good = ModelBuilder::neuron("good")
            .state("x real = 1")
            .ode("x' = -x")
            .build()
            .expect("model builds");
        let bad = ModelBuilder::neuron("bad")
            .state("broken real = 1")
            .ode("broken' = -broken")
            .build()
            .expect("model builds");
        let options = CompilerOptions::default();
        let oracle = exponential_oracle;
        let compiler = ModelCompiler::new(&options, &oracle);
        let mut ctx = CompilationContext::new();

        let out = compiler.run(vec![bad, good], Vec::new(), &mut ctx);
        assert_eq!(out.neurons.len(), 1);
        assert_eq!(out.neurons[0].name, "good");
        assert_eq!(ctx.failures().len(), 1);
        assert_eq!(ctx.failures()[0].model, "bad");
        assert_eq!(ctx.failures()[0].error.kind(), crate::ErrorKind::Oracle);

        let good = &out.neurons[0];
        assert!(good.internals.declares("__h"));
        assert!(good.internals.declares("__P__x__x"));
        assert!(ctx.analytic_solver("good").is_some());
    }
}
