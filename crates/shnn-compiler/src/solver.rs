//! Solver bridge.
//!
//! Packages a model's ODEs, kernels and parameters into the oracle's request
//! schema, runs the two-pass analytic/numeric protocol and checks the result
//! invariants.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shnn_ir::{Expr, Model, Variable};
use tracing::{debug, warn};

use crate::kernels::KernelBuffer;
use crate::names::{kernel_buffer_name, kernel_buffer_name_with, to_solver_name};
use crate::options::{CompilerOptions, PreserveExpressions};
use crate::{CompilerError, Result};

/// Regime tag of a closed-form result
pub const ANALYTICAL: &str = "analytical";
/// Prefix of numeric regime tags (`numeric`, `numeric_rk45`, ...)
pub const NUMERIC_PREFIX: &str = "numeric";

/// One equation with the initial values of its lower-order terms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicsEntry {
    /// `lhs' = rhs` in solver names
    pub expression: String,
    /// Initial values keyed by solver name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub initial_values: BTreeMap<String, String>,
}

/// Options forwarded to the oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverOptions {
    /// Name the oracle uses for the timestep in propagators
    pub output_timestep_symbol: String,
    /// Always set; stiffness testing is not used
    pub disable_stiffness_check: bool,
    /// Set on the second, numeric-only pass
    pub disable_analytic_solver: bool,
    /// Expressions to keep verbatim
    pub preserve_expressions: PreserveExpressions,
    /// Simplification recipe
    pub simplify_expression: String,
}

/// Input of one oracle call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverRequest {
    /// Equations
    pub dynamics: Vec<DynamicsEntry>,
    /// Parameter values keyed by solver name
    pub parameters: BTreeMap<String, String>,
    /// Options
    pub options: SolverOptions,
}

/// One regime of an oracle response
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SolverResult {
    /// `analytical` or `numeric...`
    pub solver: String,
    /// Canonical state-variable names
    #[serde(default)]
    pub state_variables: Vec<String>,
    /// Initial value per state variable
    #[serde(default)]
    pub initial_values: BTreeMap<String, String>,
    /// Update expression per state variable
    #[serde(default)]
    pub update_expressions: BTreeMap<String, String>,
    /// Propagator coefficients (analytic only)
    #[serde(default)]
    pub propagators: BTreeMap<String, String>,
}

impl SolverResult {
    /// Closed-form regime
    pub fn is_analytic(&self) -> bool {
        self.solver == ANALYTICAL
    }

    /// Numeric regime
    pub fn is_numeric(&self) -> bool {
        self.solver.starts_with(NUMERIC_PREFIX)
    }
}

/// Failure of the external oracle
#[derive(thiserror::Error, Debug)]
pub enum OracleError {
    /// The oracle could not be started or talked to
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The oracle answered with something that is not a result list
    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),

    /// The oracle exited unsuccessfully
    #[error("exited with {status}: {stderr}")]
    Exit {
        /// Exit status as reported by the OS
        status: String,
        /// Captured standard error
        stderr: String,
    },

    /// The oracle rejected the system
    #[error("{0}")]
    Failed(String),
}

/// What an oracle call yields
pub type OracleResult = std::result::Result<Vec<SolverResult>, OracleError>;

/// External ODE analyzer
pub trait SolverOracle {
    /// Analyze a system; one result per regime used
    fn solve(&self, request: &SolverRequest) -> OracleResult;
}

impl<F> SolverOracle for F
where
    F: Fn(&SolverRequest) -> OracleResult,
{
    fn solve(&self, request: &SolverRequest) -> OracleResult {
        self(request)
    }
}

/// The at most one analytic and at most one numeric result of a model.
///
/// Numeric state variables are disjoint from analytic ones.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SolverResults {
    /// Closed-form part
    pub analytic: Option<SolverResult>,
    /// Numerically integrated part
    pub numeric: Option<SolverResult>,
}

impl SolverResults {
    /// Combine both regimes, removing numeric entries the analytic result already covers
    pub fn new(analytic: Option<SolverResult>, numeric: Option<SolverResult>) -> Self {
        let numeric = match (&analytic, numeric) {
            (Some(a), Some(mut n)) => {
                n.state_variables.retain(|sv| !a.state_variables.contains(sv));
                n.initial_values.retain(|k, _| !a.state_variables.contains(k));
                n.update_expressions.retain(|k, _| !a.state_variables.contains(k));
                if n.state_variables.is_empty() {
                    None
                } else {
                    Some(n)
                }
            }
            (_, n) => n,
        };
        Self { analytic, numeric }
    }

    /// Results in order analytic, numeric
    pub fn iter(&self) -> impl Iterator<Item = &SolverResult> {
        self.analytic.iter().chain(self.numeric.iter())
    }

    /// True when the model needed no solver
    pub fn is_empty(&self) -> bool {
        self.analytic.is_none() && self.numeric.is_none()
    }

    /// Every state variable of both regimes
    pub fn state_variables(&self) -> Vec<String> {
        self.iter().flat_map(|r| r.state_variables.iter().cloned()).collect()
    }

    /// Initial value from the first result that has one
    pub fn initial_value(&self, name: &str) -> Option<&str> {
        self.iter().find_map(|r| r.initial_values.get(name)).map(String::as_str)
    }
}

/// Print an expression with solver names
fn solver_text(expr: &Expr) -> String {
    let mut e = expr.clone();
    e.for_each_variable_mut(&mut |v| v.name = to_solver_name(&v.name));
    e.to_string()
}

/// Build the oracle request for a model
pub fn build_request(
    model: &Model,
    kernel_buffers: &[KernelBuffer],
    options: &CompilerOptions,
) -> Result<SolverRequest> {
    let mut dynamics = Vec::new();

    if let Some(eqs) = &model.equations {
        for ode in eqs.odes() {
            let mut initial_values = BTreeMap::new();
            for order in 0..ode.lhs.differential_order {
                let name = Variable::with_order(ode.lhs.name.clone(), order).complete_name();
                if let Some(e) = model.state.find(&name).and_then(|d| d.expression.as_ref()) {
                    initial_values.insert(to_solver_name(&name), solver_text(e));
                }
            }
            dynamics.push(DynamicsEntry {
                expression: format!(
                    "{} = {}",
                    to_solver_name(&ode.lhs.complete_name()),
                    solver_text(&ode.rhs)
                ),
                initial_values,
            });
        }
    }

    for buffer in kernel_buffers.iter().filter(|b| !b.is_delta()) {
        for (kv, kexpr) in buffer.kernel.definitions() {
            let mut rhs = kexpr.clone();
            rhs.for_each_variable_mut(&mut |v| {
                v.name = if buffer.kernel.defines(&v.name) {
                    kernel_buffer_name(&v.name, &buffer.port, 0)
                } else {
                    to_solver_name(&v.name)
                };
            });

            let mut initial_values = BTreeMap::new();
            for order in 0..kv.differential_order {
                let name = Variable::with_order(kv.name.clone(), order).complete_name();
                let iv = model
                    .state
                    .find(&name)
                    .and_then(|d| d.expression.as_ref())
                    .ok_or_else(|| CompilerError::MissingInitialValue {
                        model: model.name.clone(),
                        variable: name.clone(),
                        position: buffer.kernel.position.or(kv.position),
                    })?;
                initial_values.insert(
                    kernel_buffer_name_with(&kv.name, &buffer.port, order, "'"),
                    solver_text(iv),
                );
            }

            dynamics.push(DynamicsEntry {
                expression: format!(
                    "{} = {}",
                    kernel_buffer_name_with(&kv.name, &buffer.port, kv.differential_order, "'"),
                    rhs
                ),
                initial_values,
            });
        }
    }

    let mut parameters = BTreeMap::new();
    for d in &model.parameters.declarations {
        if let Some(e) = &d.expression {
            for v in &d.variables {
                parameters.insert(to_solver_name(&v.complete_name()), solver_text(e));
            }
        }
    }

    Ok(SolverRequest {
        dynamics,
        parameters,
        options: SolverOptions {
            output_timestep_symbol: options.timestep_symbol.clone(),
            disable_stiffness_check: true,
            disable_analytic_solver: false,
            preserve_expressions: options.preserve_expressions.clone(),
            simplify_expression: options.simplify_expression.clone(),
        },
    })
}

fn single(
    model: &Model,
    results: &[SolverResult],
    regime: &'static str,
    matches: fn(&SolverResult) -> bool,
) -> Result<Option<SolverResult>> {
    let mut found = results.iter().filter(|r| matches(r));
    let first = found.next().cloned();
    if found.next().is_some() {
        return Err(CompilerError::MultipleSolvers {
            model: model.name.clone(),
            regime,
        });
    }
    Ok(first)
}

/// Run the oracle on a model.
///
/// The first pass lets the oracle pick a regime per variable. If any part
/// came back numeric, a second pass with the analytic regime disabled
/// yields the numeric result.
pub fn solve(
    model: &Model,
    kernel_buffers: &[KernelBuffer],
    options: &CompilerOptions,
    oracle: &dyn SolverOracle,
) -> Result<SolverResults> {
    let Some(eqs) = &model.equations else {
        return Ok(SolverResults::default());
    };
    if eqs.kernels().next().is_none() && eqs.odes().next().is_none() {
        return Ok(SolverResults::default());
    }

    let mut request = build_request(model, kernel_buffers, options)?;
    debug!(model = %model.name, equations = request.dynamics.len(), "calling solver oracle");
    let oracle_error = |source| CompilerError::Oracle {
        model: model.name.clone(),
        source,
    };

    let first = oracle.solve(&request).map_err(oracle_error)?;
    let analytic = single(model, &first, "analytic", SolverResult::is_analytic)?;

    let numeric = if first.iter().any(SolverResult::is_numeric) {
        warn!(model = %model.name, "no closed form for part of the system; requesting numeric solver");
        request.options.disable_analytic_solver = true;
        let second = oracle.solve(&request).map_err(oracle_error)?;
        single(model, &second, "numeric", SolverResult::is_numeric)?
    } else {
        None
    };

    Ok(SolverResults::new(analytic, numeric))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::collect_kernel_buffers;
    use shnn_ir::ModelBuilder;
    use std::cell::RefCell;

    fn result(solver: &str, svs: &[&str]) -> SolverResult {
        SolverResult {
            solver: solver.to_string(),
            state_variables: svs.iter().map(|s| s.to_string()).collect(),
            initial_values: svs.iter().map(|s| (s.to_string(), "0".to_string())).collect(),
            update_expressions: svs.iter().map(|s| (s.to_string(), format!("{} * 2", s))).collect(),
            propagators: BTreeMap::new(),
        }
    }

    fn alpha_synapse() -> Model {
        ModelBuilder::neuron("iaf")
            .state("V_m mV = -70")
            .state("g_in real = 0")
            .state("g_in' real = e / tau_syn")
            .parameter("tau_syn ms = 2")
            .parameter("tau ms = 10")
            .kernel("g_in'' = -g_in / tau_syn**2 - 2 * g_in' / tau_syn")
            .ode("V_m' = -V_m / tau + convolve(g_in, in_spikes)")
            .spike_input("in_spikes", Some("pA"))
            .build()
            .expect("model builds")
    }

    #[test]
    fn request_names_kernel_buffers_per_port() {
        let m = alpha_synapse();
        let buffers = collect_kernel_buffers(&m).expect("classifies");
        let request = build_request(&m, &buffers, &CompilerOptions::default()).expect("builds");
        let exprs: Vec<&str> = request.dynamics.iter().map(|d| d.expression.as_str()).collect();
        assert_eq!(
            exprs,
            vec![
                "V_m' = -V_m / tau + convolve(g_in, in_spikes)",
                "g_in__X__in_spikes'' = -g_in__X__in_spikes / tau_syn ** 2.0 - 2.0 * g_in__X__in_spikes' / tau_syn",
            ]
        );
        let ivs = &request.dynamics[1].initial_values;
        assert_eq!(ivs["g_in__X__in_spikes"], "0.0");
        assert_eq!(ivs["g_in__X__in_spikes'"], "e / tau_syn");
        assert_eq!(request.dynamics[0].initial_values["V_m"], "-70.0");
        assert_eq!(request.parameters["tau_syn"], "2.0");
        assert_eq!(request.options.output_timestep_symbol, "__h");
        assert!(request.options.disable_stiffness_check);
    }

    #[test]
    fn missing_kernel_initial_value() {
        let m = ModelBuilder::neuron("n")
            .kernel("g' = -g / tau")
            .ode("x' = convolve(g, s)")
            .spike_input("s", None)
            .build()
            .expect("model builds");
        let buffers = collect_kernel_buffers(&m).expect("classifies");
        match build_request(&m, &buffers, &CompilerOptions::default()) {
            Err(CompilerError::MissingInitialValue { variable, .. }) => assert_eq!(variable, "g"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn numeric_regime_triggers_second_pass() {
        let m = alpha_synapse();
        let buffers = collect_kernel_buffers(&m).expect("classifies");
        let calls = RefCell::new(Vec::new());
        let oracle = |req: &SolverRequest| -> OracleResult {
            calls.borrow_mut().push(req.options.disable_analytic_solver);
            if req.options.disable_analytic_solver {
                Ok(vec![result("numeric", &["V_m", "g_in__X__in_spikes", "g_in__X__in_spikes__d"])])
            } else {
                Ok(vec![
                    result("analytical", &["g_in__X__in_spikes", "g_in__X__in_spikes__d"]),
                    result("numeric", &["V_m"]),
                ])
            }
        };
        let results = solve(&m, &buffers, &CompilerOptions::default(), &oracle).expect("solves");
        assert_eq!(*calls.borrow(), vec![false, true]);
        let numeric = results.numeric.as_ref().expect("numeric part");
        assert_eq!(numeric.state_variables, vec!["V_m"]);
        assert!(!numeric.initial_values.contains_key("g_in__X__in_spikes"));
        assert_eq!(results.state_variables().len(), 3);
    }

    #[test]
    fn two_analytic_results_are_rejected() {
        let m = alpha_synapse();
        let buffers = collect_kernel_buffers(&m).expect("classifies");
        let oracle =
            |_: &SolverRequest| -> OracleResult { Ok(vec![result("analytical", &["a"]), result("analytical", &["b"])]) };
        assert!(matches!(
            solve(&m, &buffers, &CompilerOptions::default(), &oracle),
            Err(CompilerError::MultipleSolvers { regime: "analytic", .. })
        ));
    }

    #[test]
    fn two_numeric_results_on_the_second_pass_are_rejected() {
        let m = alpha_synapse();
        let buffers = collect_kernel_buffers(&m).expect("classifies");
        let oracle = |req: &SolverRequest| -> OracleResult {
            if req.options.disable_analytic_solver {
                Ok(vec![result("numeric", &["V_m"]), result("numeric", &["g_in__X__in_spikes"])])
            } else {
                Ok(vec![result("numeric", &["V_m", "g_in__X__in_spikes", "g_in__X__in_spikes__d"])])
            }
        };
        match solve(&m, &buffers, &CompilerOptions::default(), &oracle) {
            Err(CompilerError::MultipleSolvers { model, regime }) => {
                assert_eq!(model, "iaf");
                assert_eq!(regime, "numeric");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn oracle_failure_names_the_model() {
        let m = alpha_synapse();
        let buffers = collect_kernel_buffers(&m).expect("classifies");
        let oracle = |_: &SolverRequest| -> OracleResult { Err(OracleError::Failed("singular system".into())) };
        let err = solve(&m, &buffers, &CompilerOptions::default(), &oracle).expect_err("fails");
        assert_eq!(err.to_string(), "iaf: solver oracle failed: singular system");
    }

    #[test]
    fn models_without_dynamics_skip_the_oracle() {
        let m = ModelBuilder::neuron("n").state("x real = 0").build().expect("model builds");
        let oracle = |_: &SolverRequest| -> OracleResult {
            panic!("oracle must not be called")
        };
        let results = solve(&m, &[], &CompilerOptions::default(), &oracle).expect("solves");
        assert!(results.is_empty());
    }
}
