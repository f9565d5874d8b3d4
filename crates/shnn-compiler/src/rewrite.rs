//! AST rewriting from solver results.
//!
//! After the oracle has answered, the kernels and ODEs of a model are replaced
//! by the solver's state variables: kernel initial values and definitions go,
//! ODE state keeps its declaration under the canonical name, every new solver
//! variable is declared, and references are renamed throughout.

use std::collections::{BTreeMap, BTreeSet};

use shnn_ir::{
    parse_declaration, parse_expression, Declaration, DeclarationBlock, EquationDecl, Expr, Model,
    SourcePosition, VarSite, Variable,
};

use crate::names::{
    solver_base_name, to_solver_name, to_solver_processed_name, variable_in_solver, DERIVATIVE_MARKER,
    KERNEL_PORT_SEPARATOR,
};
use crate::solver::SolverResults;
use crate::{CompilerError, Result};

fn equation_position(decl: &EquationDecl) -> Option<SourcePosition> {
    match decl {
        EquationDecl::Ode(ode) => ode.position,
        EquationDecl::Kernel(k) => k.position,
        EquationDecl::Inline(i) => i.position,
    }
}

/// Fail if the model declares `symbol` anywhere
pub fn check_reserved_names(model: &Model, symbol: &str) -> Result<()> {
    let reserved = |position: Option<SourcePosition>| CompilerError::ReservedName {
        model: model.name.clone(),
        name: symbol.to_string(),
        position,
    };

    for block in [&model.state, &model.parameters, &model.internals] {
        for d in &block.declarations {
            if let Some(v) = d.variables.iter().find(|v| v.name == symbol) {
                return Err(reserved(v.position.or(d.position)));
            }
        }
    }
    if let Some(eqs) = &model.equations {
        if let Some(d) = eqs.declarations.iter().find(|d| d.defines(symbol)) {
            return Err(reserved(equation_position(d)));
        }
    }
    if let Some(port) = model.input_port(symbol) {
        return Err(reserved(port.position));
    }
    Ok(())
}

/// Complete names of state variables that no ODE or kernel defines
pub fn collect_non_equation_state_variables(model: &Model) -> Vec<String> {
    let defined: BTreeSet<String> = model
        .equations
        .iter()
        .flat_map(|eqs| eqs.declarations.iter())
        .filter(|d| !matches!(d, EquationDecl::Inline(_)))
        .flat_map(EquationDecl::defined_names)
        .collect();
    model
        .state
        .declarations
        .iter()
        .flat_map(|d| d.variables.iter())
        .filter(|v| !defined.contains(&v.name))
        .map(Variable::complete_name)
        .collect()
}

/// Give every co-declared variable its own declaration
fn split_declarations(block: &mut DeclarationBlock) {
    block.declarations = std::mem::take(&mut block.declarations)
        .into_iter()
        .flat_map(|d| {
            if d.variables.len() < 2 {
                return vec![d];
            }
            d.variables
                .iter()
                .map(|v| Declaration {
                    variables: vec![v.clone()],
                    data_type: d.data_type.clone(),
                    expression: d.expression.clone(),
                    position: v.position.or(d.position),
                })
                .collect()
        })
        .collect();
}

/// Replace kernels and ODEs by the solver's state variables.
///
/// Kernel initial values and kernel definitions are removed, ODE state keeps
/// its declaration under the canonical name with the solver's initial value,
/// the ODEs are removed, and every solver state variable not yet declared is
/// added to the state block. Kernel buffers start at 0; what the solver
/// reports as their initial value is the per-spike increment.
pub fn apply_solver_results(model: &mut Model, solvers: &SolverResults) -> Result<()> {
    let Some(eqs) = model.equations.as_mut() else {
        return Ok(());
    };

    let kernel_initial_values: Vec<String> = eqs
        .kernels()
        .flat_map(|k| k.variables.iter())
        .flat_map(|kv| {
            (0..kv.differential_order).map(move |o| Variable::with_order(kv.name.clone(), o).complete_name())
        })
        .collect();
    for name in &kernel_initial_values {
        model.state.remove_variable(name);
    }

    let kernel_names: BTreeSet<String> = eqs
        .remove_kernels()
        .iter()
        .flat_map(|k| k.variables.iter().map(|v| to_solver_name(&v.name)))
        .collect();
    let ode_names: BTreeSet<String> = eqs.remove_odes().into_iter().map(|ode| ode.lhs.name).collect();

    split_declarations(&mut model.state);
    let missing = |name: &str| CompilerError::MissingSolverEntry {
        model: model.name.clone(),
        name: name.to_string(),
    };

    for decl in &mut model.state.declarations {
        let [var] = decl.variables.as_mut_slice() else {
            continue;
        };
        if !ode_names.contains(&var.name) {
            continue;
        }
        let processed = to_solver_processed_name(&var.complete_name());
        let iv = solvers.initial_value(&processed).ok_or_else(|| missing(&processed))?;
        let mut expr = parse_expression(iv)?;
        expr.fill_positions(decl.position);
        var.name = processed;
        var.differential_order = 0;
        decl.expression = Some(expr);
    }

    for result in solvers.iter() {
        for sv in &result.state_variables {
            if model.state.declares(sv) {
                continue;
            }
            let expr = if kernel_names.contains(solver_base_name(sv)) {
                Expr::number(0.0)
            } else {
                let iv = result
                    .initial_values
                    .get(sv)
                    .map(String::as_str)
                    .or_else(|| solvers.initial_value(sv))
                    .ok_or_else(|| missing(sv))?;
                parse_expression(iv)?
            };
            model
                .state
                .push(Declaration::new(Variable::new(sv.clone()), "real", Some(expr)));
        }
    }
    Ok(())
}

/// Rename references to solver-tracked variables to their canonical names
pub fn canonicalize_names(model: &mut Model, solvers: &SolverResults) {
    let state_variables = solvers.state_variables();
    if state_variables.is_empty() {
        return;
    }
    model.visit_variables_mut(&mut |v, _| {
        if v.is_external() {
            return;
        }
        let processed = to_solver_processed_name(&v.complete_name());
        if variable_in_solver(&processed, &state_variables) {
            v.name = processed;
            v.differential_order = 0;
        }
    });
}

/// Point references to kernel-alias inline expressions at the buffer itself.
///
/// An inline such as `I_syn pA = convolve(g, spikes)` has become
/// `I_syn pA = g__X__spikes`; a reference `I_syn'` turns into `g__X__spikes__d`.
pub fn resolve_kernel_aliases(model: &mut Model) {
    let aliases: BTreeMap<String, String> = model
        .equations
        .iter()
        .flat_map(|eqs| eqs.inline_expressions())
        .filter_map(|i| {
            let expr = i.expression.clone().strip_parens();
            let v = expr.as_variable()?;
            v.name
                .contains(KERNEL_PORT_SEPARATOR)
                .then(|| (i.name.clone(), v.name.clone()))
        })
        .collect();
    if aliases.is_empty() {
        return;
    }
    model.visit_variables_mut(&mut |v, site| {
        if site != VarSite::Expression || v.is_external() {
            return;
        }
        if let Some(buffer) = aliases.get(&v.name) {
            v.name = format!("{}{}", buffer, DERIVATIVE_MARKER.repeat(v.differential_order));
            v.differential_order = 0;
        }
    });
}

/// Declare `symbol ms = resolution()` first in the internals block
pub fn inject_timestep(model: &mut Model, symbol: &str) -> Result<()> {
    check_reserved_names(model, symbol)?;
    let decl = parse_declaration(&format!("{} ms = resolution()", symbol))?;
    model.internals.declarations.insert(0, decl);
    Ok(())
}

/// Declare the analytic propagators as `real` internals
pub fn declare_propagators(model: &mut Model, solvers: &SolverResults) -> Result<()> {
    let Some(analytic) = &solvers.analytic else {
        return Ok(());
    };
    for (name, expr) in &analytic.propagators {
        if model.internals.declares(name) {
            continue;
        }
        let expr = parse_expression(expr)?;
        model
            .internals
            .push(Declaration::new(Variable::new(name.clone()), "real", Some(expr)));
    }
    Ok(())
}
