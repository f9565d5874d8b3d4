//! Pass framework and the standard model analysis passes

use shnn_ir::Model;
use tracing::debug;

use crate::algebra::SymbolicAlgebra;
use crate::context::ModelAnalysis;
use crate::inline::flatten_inline_expressions;
use crate::kernels::{collect_delta_factors, collect_kernel_buffers, replace_convolve_calls};
use crate::options::CompilerOptions;
use crate::rewrite;
use crate::solver::{solve, SolverOracle};
use crate::spikes::synthesize_spike_updates;
use crate::Result;

/// A compiler pass over one model
pub trait Pass {
    /// Human-readable pass name
    fn name(&self) -> &'static str;
    /// Execute the pass, mutating the model and its analysis in place
    fn run(&self, model: &mut Model, analysis: &mut ModelAnalysis) -> Result<()>;
}

/// Runs passes in sequence, rebuilding the symbol table after each
#[derive(Default)]
pub struct PassManager<'a> {
    passes: Vec<Box<dyn Pass + 'a>>,
}

impl<'a> PassManager<'a> {
    /// Create an empty pass manager
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// The full analysis of a neuron or synapse, in order
    pub fn standard(
        options: &'a CompilerOptions,
        oracle: &'a dyn SolverOracle,
        algebra: &'a dyn SymbolicAlgebra,
    ) -> Self {
        let symbol = options.timestep_symbol.as_str();
        let mut pm = Self::new();
        pm.add(Box::new(CheckReservedNames { symbol }));
        pm.add(Box::new(AnalyzeConvolutions { algebra }));
        pm.add(Box::new(ReplaceConvolveCalls));
        pm.add(Box::new(FlattenInlineExpressions));
        pm.add(Box::new(SolveDynamics { options, oracle }));
        pm.add(Box::new(CollectNonEquationState));
        pm.add(Box::new(ApplySolverResults));
        pm.add(Box::new(CanonicalizeNames));
        pm.add(Box::new(ResolveKernelAliases));
        pm.add(Box::new(InjectTimestep { symbol }));
        pm.add(Box::new(DeclarePropagators));
        pm.add(Box::new(SynthesizeSpikeUpdates));
        pm
    }

    /// Append a pass to the pipeline
    pub fn add(&mut self, pass: Box<dyn Pass + 'a>) {
        self.passes.push(pass);
    }

    /// Pass names in execution order
    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run all passes in order; the first failure stops the model
    pub fn run(&self, model: &mut Model, analysis: &mut ModelAnalysis) -> Result<()> {
        for p in &self.passes {
            debug!(model = %model.name, pass = p.name(), "running pass");
            p.run(model, analysis)?;
            model.update_scope();
        }
        Ok(())
    }
}

/// Rejects declarations of the reserved timestep symbol
pub struct CheckReservedNames<'a> {
    /// Reserved name
    pub symbol: &'a str,
}

impl Pass for CheckReservedNames<'_> {
    fn name(&self) -> &'static str {
        "check_reserved_names"
    }
    fn run(&self, model: &mut Model, _: &mut ModelAnalysis) -> Result<()> {
        rewrite::check_reserved_names(model, self.symbol)
    }
}

/// Collects kernel buffers and delta-kernel factors
pub struct AnalyzeConvolutions<'a> {
    /// Algebra used to isolate delta terms
    pub algebra: &'a dyn SymbolicAlgebra,
}

impl Pass for AnalyzeConvolutions<'_> {
    fn name(&self) -> &'static str {
        "analyze_convolutions"
    }
    fn run(&self, model: &mut Model, analysis: &mut ModelAnalysis) -> Result<()> {
        analysis.kernel_buffers = collect_kernel_buffers(model)?;
        analysis.delta_factors = collect_delta_factors(model, self.algebra)?;
        Ok(())
    }
}

/// Replaces `convolve` calls by buffer variables
pub struct ReplaceConvolveCalls;

impl Pass for ReplaceConvolveCalls {
    fn name(&self) -> &'static str {
        "replace_convolve_calls"
    }
    fn run(&self, model: &mut Model, _: &mut ModelAnalysis) -> Result<()> {
        replace_convolve_calls(model)
    }
}

/// Substitutes inline expressions into ODEs
pub struct FlattenInlineExpressions;

impl Pass for FlattenInlineExpressions {
    fn name(&self) -> &'static str {
        "flatten_inline_expressions"
    }
    fn run(&self, model: &mut Model, _: &mut ModelAnalysis) -> Result<()> {
        flatten_inline_expressions(model)
    }
}

/// Calls the solver oracle
pub struct SolveDynamics<'a> {
    /// Forwarded oracle options
    pub options: &'a CompilerOptions,
    /// The oracle
    pub oracle: &'a dyn SolverOracle,
}

impl Pass for SolveDynamics<'_> {
    fn name(&self) -> &'static str {
        "solve_dynamics"
    }
    fn run(&self, model: &mut Model, analysis: &mut ModelAnalysis) -> Result<()> {
        analysis.solvers = solve(model, &analysis.kernel_buffers, self.options, self.oracle)?;
        Ok(())
    }
}

/// Records state variables no equation defines
pub struct CollectNonEquationState;

impl Pass for CollectNonEquationState {
    fn name(&self) -> &'static str {
        "collect_non_equation_state"
    }
    fn run(&self, model: &mut Model, analysis: &mut ModelAnalysis) -> Result<()> {
        analysis.non_equations_state_variables = rewrite::collect_non_equation_state_variables(model);
        Ok(())
    }
}

/// Replaces kernels and ODEs by the solver's state
pub struct ApplySolverResults;

impl Pass for ApplySolverResults {
    fn name(&self) -> &'static str {
        "apply_solver_results"
    }
    fn run(&self, model: &mut Model, analysis: &mut ModelAnalysis) -> Result<()> {
        rewrite::apply_solver_results(model, &analysis.solvers)
    }
}

/// Renames references to solver-facing names
pub struct CanonicalizeNames;

impl Pass for CanonicalizeNames {
    fn name(&self) -> &'static str {
        "canonicalize_names"
    }
    fn run(&self, model: &mut Model, analysis: &mut ModelAnalysis) -> Result<()> {
        rewrite::canonicalize_names(model, &analysis.solvers);
        Ok(())
    }
}

/// Resolves inline aliases of kernel buffers
pub struct ResolveKernelAliases;

impl Pass for ResolveKernelAliases {
    fn name(&self) -> &'static str {
        "resolve_kernel_aliases"
    }
    fn run(&self, model: &mut Model, _: &mut ModelAnalysis) -> Result<()> {
        rewrite::resolve_kernel_aliases(model);
        Ok(())
    }
}

/// Declares the timestep internal
pub struct InjectTimestep<'a> {
    /// Timestep name
    pub symbol: &'a str,
}

impl Pass for InjectTimestep<'_> {
    fn name(&self) -> &'static str {
        "inject_timestep"
    }
    fn run(&self, model: &mut Model, _: &mut ModelAnalysis) -> Result<()> {
        rewrite::inject_timestep(model, self.symbol)
    }
}

/// Declares analytic propagators as internals
pub struct DeclarePropagators;

impl Pass for DeclarePropagators {
    fn name(&self) -> &'static str {
        "declare_propagators"
    }
    fn run(&self, model: &mut Model, analysis: &mut ModelAnalysis) -> Result<()> {
        rewrite::declare_propagators(model, &analysis.solvers)
    }
}

/// Builds the spike-update statements
pub struct SynthesizeSpikeUpdates;

impl Pass for SynthesizeSpikeUpdates {
    fn name(&self) -> &'static str {
        "synthesize_spike_updates"
    }
    fn run(&self, model: &mut Model, analysis: &mut ModelAnalysis) -> Result<()> {
        synthesize_spike_updates(model, analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::ExpansionAlgebra;
    use crate::solver::{OracleResult, SolverRequest};
    use crate::CompilerError;
    use shnn_ir::{parse_declaration, ModelBuilder};
    use std::cell::Cell;

    struct DeclareCounter;

    impl Pass for DeclareCounter {
        fn name(&self) -> &'static str {
            "declare_counter"
        }
        fn run(&self, model: &mut Model, _: &mut ModelAnalysis) -> Result<()> {
            model.state.push(parse_declaration("counter integer = 0")?);
            Ok(())
        }
    }

    #[test]
    fn pass_manager_refreshes_scope_after_each_pass() {
        let mut m = ModelBuilder::neuron("n").build().expect("model builds");
        let mut pm = PassManager::new();
        pm.add(Box::new(DeclareCounter));
        pm.run(&mut m, &mut ModelAnalysis::default()).expect("passes run");
        assert!(m.scope().contains("counter"));
    }

    #[test]
    fn standard_pipeline_order() {
        let options = CompilerOptions::default();
        let oracle = |_: &SolverRequest| -> OracleResult { Ok(Vec::new()) };
        let pm = PassManager::standard(&options, &oracle, &ExpansionAlgebra);
        assert_eq!(
            pm.names(),
            vec![
                "check_reserved_names",
                "analyze_convolutions",
                "replace_convolve_calls",
                "flatten_inline_expressions",
                "solve_dynamics",
                "collect_non_equation_state",
                "apply_solver_results",
                "canonicalize_names",
                "resolve_kernel_aliases",
                "inject_timestep",
                "declare_propagators",
                "synthesize_spike_updates",
            ]
        );
    }

    #[test]
    fn reserved_name_stops_before_the_oracle() {
        let options = CompilerOptions::default();
        let calls = Cell::new(0);
        let oracle = |_: &SolverRequest| -> OracleResult {
            calls.set(calls.get() + 1);
            Ok(Vec::new())
        };
        let mut m = ModelBuilder::neuron("n")
            .state("x real = 1")
            .parameter("__h ms = 0.1")
            .ode("x' = -x")
            .build()
            .expect("model builds");
        let pm = PassManager::standard(&options, &oracle, &ExpansionAlgebra);
        let err = pm.run(&mut m, &mut ModelAnalysis::default()).expect_err("reserved");
        assert!(matches!(err, CompilerError::ReservedName { .. }));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn models_without_dynamics_still_get_a_timestep() {
        let options = CompilerOptions::default();
        let oracle = |_: &SolverRequest| -> OracleResult { Ok(Vec::new()) };
        let mut m = ModelBuilder::neuron("counter")
            .state("n integer = 0")
            .update("n += 1")
            .build()
            .expect("model builds");
        let mut analysis = ModelAnalysis::default();
        PassManager::standard(&options, &oracle, &ExpansionAlgebra)
            .run(&mut m, &mut analysis)
            .expect("passes run");
        assert_eq!(m.internals.declarations[0].to_string(), "__h ms = resolution()");
        assert_eq!(analysis.non_equations_state_variables, vec!["n"]);
        assert!(analysis.spike_updates.is_empty());
    }
}
