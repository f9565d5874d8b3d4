//! Scripted oracles shared by the integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;

use shnn_compiler::{OracleResult, SolverRequest, SolverResult};

/// Answers every request with a closed form: each equation of order n yields
/// state variables `x`, `x__d`, ... with the requested initial values and one
/// propagator per variable.
pub fn closed_form(request: &SolverRequest) -> OracleResult {
    let mut result = SolverResult {
        solver: "analytical".into(),
        ..SolverResult::default()
    };
    for entry in &request.dynamics {
        let lhs = entry.expression.split(" = ").next().unwrap_or_default();
        let base = lhs.trim_end_matches('\'');
        let order = lhs.len() - base.len();
        for o in 0..order {
            let name = format!("{}{}", base, "__d".repeat(o));
            let iv = entry
                .initial_values
                .get(&format!("{}{}", base, "'".repeat(o)))
                .cloned()
                .unwrap_or_else(|| "0".to_string());
            let propagator = format!("__P__{}__{}", name, name);
            result.update_expressions.insert(name.clone(), format!("{} * {}", propagator, name));
            result.propagators.insert(propagator, "exp(-__h)".into());
            result.initial_values.insert(name.clone(), iv);
            result.state_variables.push(name);
        }
    }
    Ok(vec![result])
}

/// Keeps every request it sees
#[derive(Default)]
pub struct Recorder {
    pub requests: RefCell<Vec<SolverRequest>>,
}

impl Recorder {
    pub fn closed_form(&self, request: &SolverRequest) -> OracleResult {
        self.requests.borrow_mut().push(request.clone());
        closed_form(request)
    }
}

/// Analytic result with explicit initial values
pub fn analytic(ivs: &[(&str, &str)]) -> SolverResult {
    SolverResult {
        solver: "analytical".into(),
        state_variables: ivs.iter().map(|(n, _)| n.to_string()).collect(),
        initial_values: ivs.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect(),
        update_expressions: BTreeMap::new(),
        propagators: BTreeMap::new(),
    }
}
