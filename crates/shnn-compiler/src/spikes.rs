//! Spike-update synthesis.
//!
//! Each incoming spike adds the solver-reported increment to every kernel
//! buffer of its port, and delta-kernel convolutions add their factor to the
//! ODE state one order below the equation. The statements are built as text,
//! parsed and checked against the model's symbol table right away.

use std::collections::BTreeSet;

use shnn_ir::{parse_assignment, parse_expression, Assignment, Model, Variable};

use crate::context::ModelAnalysis;
use crate::names::{kernel_buffer_name, kernel_order_in_solver, to_solver_name, to_solver_processed_name};
use crate::pairing::PAIR_VARIABLE_SEPARATOR;
use crate::{CompilerError, Result};

fn is_literal(text: &str, forms: &[&str]) -> bool {
    forms.contains(&text.trim())
}

fn is_zero(text: &str) -> bool {
    is_literal(text, &["0", "0.", "0.0"])
}

fn is_one(text: &str) -> bool {
    is_literal(text, &["1", "1.", "1.0"])
}

/// Data type of the port a buffer is convolved with
fn port_type(model: &Model, port: &Variable) -> Option<String> {
    if port.is_post_port {
        if let Some(pairing) = model.neuron_pairing() {
            let original = port
                .name
                .split_once(PAIR_VARIABLE_SEPARATOR)
                .map_or(port.name.as_str(), |(name, _)| name);
            if let Some(data_type) = pairing.port_types.get(original) {
                return data_type.clone();
            }
        }
    }
    model
        .scope()
        .resolve(&port.complete_name())
        .and_then(|s| s.data_type.clone())
}

/// Every variable of the statement outside `skip` must resolve
fn check_resolves(model: &Model, assignment: &Assignment, skip: &BTreeSet<String>) -> Result<()> {
    let scope = model.scope();
    let unresolved = std::iter::once(&assignment.lhs)
        .chain(assignment.rhs.variables())
        .find(|v| !skip.contains(&v.complete_name()) && !scope.contains(&v.complete_name()));
    match unresolved {
        Some(v) => Err(CompilerError::UnresolvedSymbol {
            model: model.name.clone(),
            name: v.complete_name(),
            position: v.position,
        }),
        None => Ok(()),
    }
}

/// Build `spike_updates` and `post_spike_updates` for a model.
///
/// Updates whose port does not resolve in the model (a port of the paired
/// synapse) go to `post_spike_updates`, keyed by kernel variable.
pub fn synthesize_spike_updates(model: &Model, analysis: &mut ModelAnalysis) -> Result<()> {
    let solver_variables = analysis.solvers.state_variables();
    let missing = |name: String| CompilerError::MissingSolverEntry {
        model: model.name.clone(),
        name,
    };

    for buffer in analysis.kernel_buffers.iter().filter(|b| !b.is_delta()) {
        let port = &buffer.port;
        let port_name = port.complete_name();
        let divisor = port_type(model, port).filter(|t| !is_one(t) && t != "real");
        let deferred = !model.scope().contains(&port_name);
        // Units in the divisor are not model symbols.
        let mut skip = BTreeSet::from([port_name.clone()]);
        if let Some(data_type) = &divisor {
            skip.extend(parse_expression(data_type)?.variables().iter().map(|v| v.complete_name()));
        }

        let mut seen = BTreeSet::new();
        for kernel_var in &buffer.kernel.variables {
            if !seen.insert(kernel_var.name.as_str()) {
                continue;
            }
            let order = kernel_order_in_solver(&to_solver_name(&kernel_var.name), &solver_variables)
                .ok_or_else(|| missing(kernel_buffer_name(&kernel_var.name, port, 0)))?;

            for o in 0..order {
                let buffer_name = kernel_buffer_name(&kernel_var.name, port, o);
                let increment = analysis
                    .solvers
                    .initial_value(&buffer_name)
                    .ok_or_else(|| missing(buffer_name.clone()))?;
                if is_zero(increment) {
                    continue;
                }

                let mut text = format!("{} += ", buffer_name);
                if port.is_post_port {
                    text.push_str("1.0");
                } else {
                    text.push_str(&format!("({})", port_name));
                }
                if !is_one(increment) {
                    text.push_str(&format!(" * ({})", parse_expression(increment)?));
                }
                if let Some(data_type) = &divisor {
                    text.push_str(&format!(" / ({})", data_type));
                }

                let assignment = parse_assignment(&text)?;
                check_resolves(model, &assignment, &skip)?;
                if deferred {
                    analysis
                        .post_spike_updates
                        .entry(kernel_var.name.clone())
                        .or_default()
                        .push(assignment);
                } else {
                    analysis.spike_updates.push(assignment);
                }
            }
        }
    }

    for delta in analysis.delta_factors.values() {
        let below = Variable::with_order(
            delta.target.name.clone(),
            delta.target.differential_order.saturating_sub(1),
        )
        .complete_name();
        let processed = to_solver_processed_name(&below);
        let target = if model.scope().contains(&processed) {
            processed
        } else {
            below
        };

        let port_name = delta.port.complete_name();
        let text = if delta.factor.as_number() == Some(1.0) {
            format!("{} += {}", target, port_name)
        } else {
            format!("{} += ({}) * {}", target, delta.factor, port_name)
        };
        let assignment = parse_assignment(&text)?;
        check_resolves(model, &assignment, &BTreeSet::from([port_name]))?;
        analysis.spike_updates.push(assignment);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{DeltaFactor, KernelBuffer};
    use crate::solver::{SolverResult, SolverResults};
    use shnn_ir::{parse_kernel, Expr, ModelBuilder, NeuronPairing, Pairing};
    use std::collections::BTreeMap;

    fn results(ivs: &[(&str, &str)]) -> SolverResults {
        SolverResults::new(
            Some(SolverResult {
                solver: "analytical".into(),
                state_variables: ivs.iter().map(|(n, _)| n.to_string()).collect(),
                initial_values: ivs.iter().map(|(n, v)| (n.to_string(), v.to_string())).collect(),
                ..SolverResult::default()
            }),
            None,
        )
    }

    fn buffer(kernel: &str, port: &str) -> KernelBuffer {
        KernelBuffer {
            kernel: parse_kernel(kernel).expect("parses"),
            port: Variable::new(port),
        }
    }

    fn printed(updates: &[Assignment]) -> Vec<String> {
        updates.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn unit_increment_needs_no_factor() {
        let m = ModelBuilder::synapse("syn")
            .state("alpha__X__spikes real = 0")
            .spike_input("spikes", None)
            .build()
            .expect("model builds");
        let mut analysis = ModelAnalysis {
            kernel_buffers: vec![buffer("alpha' = -alpha / tau", "spikes")],
            solvers: results(&[("alpha__X__spikes", "1")]),
            ..ModelAnalysis::default()
        };
        synthesize_spike_updates(&m, &mut analysis).expect("synthesizes");
        assert_eq!(printed(&analysis.spike_updates), vec!["alpha__X__spikes += (spikes)"]);
        assert!(analysis.post_spike_updates.is_empty());
    }

    #[test]
    fn factors_types_and_zero_skipping() {
        let m = ModelBuilder::neuron("iaf")
            .state("g__X__in__spikes real = 0")
            .state("g__X__in__spikes__d real = 0")
            .parameter("tau_syn ms = 2")
            .spike_input("in__spikes", Some("pA"))
            .build()
            .expect("model builds");
        let mut analysis = ModelAnalysis {
            kernel_buffers: vec![buffer("g'' = -g / tau_syn**2, g' = g", "in__spikes")],
            solvers: results(&[("g__X__in__spikes", "0."), ("g__X__in__spikes__d", "e / tau_syn")]),
            ..ModelAnalysis::default()
        };
        synthesize_spike_updates(&m, &mut analysis).expect("synthesizes");
        assert_eq!(
            printed(&analysis.spike_updates),
            vec!["g__X__in__spikes__d += (in__spikes) * (e / tau_syn) / (pA)"]
        );
    }

    #[test]
    fn post_ports_are_unit_pulses_and_deferred() {
        let mut m = ModelBuilder::neuron("iaf__with_stdp")
            .state("k__for_stdp__X__post_spikes__for_stdp real = 0")
            .build()
            .expect("model builds");
        m.pairing = Some(Pairing::Neuron(NeuronPairing {
            synapse: "stdp__with_iaf".into(),
            port_types: BTreeMap::from([("post_spikes".to_string(), Some("pA".to_string()))]),
            ..NeuronPairing::default()
        }));
        let mut port = Variable::new("post_spikes__for_stdp");
        port.is_post_port = true;
        let mut analysis = ModelAnalysis {
            kernel_buffers: vec![KernelBuffer {
                kernel: parse_kernel("k__for_stdp = exp(-t / tau)").expect("parses"),
                port,
            }],
            solvers: results(&[("k__for_stdp__X__post_spikes__for_stdp", "1")]),
            ..ModelAnalysis::default()
        };
        synthesize_spike_updates(&m, &mut analysis).expect("synthesizes");
        assert!(analysis.spike_updates.is_empty());
        assert_eq!(
            printed(&analysis.post_spike_updates["k__for_stdp"]),
            vec!["k__for_stdp__X__post_spikes__for_stdp += 1.0 / (pA)"]
        );
    }

    #[test]
    fn delta_updates_target_one_order_below() {
        let m = ModelBuilder::neuron("iaf")
            .state("V_m mV = 0")
            .parameter("C_m pF = 250")
            .spike_input("spikes", Some("pA"))
            .spike_input("other", Some("pA"))
            .build()
            .expect("model builds");
        let mut factors = crate::kernels::DeltaFactors::new();
        factors.insert(
            ("V_m'".into(), "spikes".into()),
            DeltaFactor {
                target: Variable::with_order("V_m", 1),
                port: Variable::new("spikes"),
                factor: Expr::number(1.0),
            },
        );
        factors.insert(
            ("V_m'".into(), "other".into()),
            DeltaFactor {
                target: Variable::with_order("V_m", 1),
                port: Variable::new("other"),
                factor: parse_expression("1 / C_m").expect("parses"),
            },
        );
        let mut analysis = ModelAnalysis {
            delta_factors: factors,
            ..ModelAnalysis::default()
        };
        synthesize_spike_updates(&m, &mut analysis).expect("synthesizes");
        assert_eq!(
            printed(&analysis.spike_updates),
            vec!["V_m += (1.0 / C_m) * other", "V_m += spikes"]
        );
    }

    #[test]
    fn unresolved_targets_are_reported() {
        let m = ModelBuilder::neuron("n")
            .spike_input("spikes", None)
            .build()
            .expect("model builds");
        let mut analysis = ModelAnalysis {
            kernel_buffers: vec![buffer("g' = -g", "spikes")],
            solvers: results(&[("g__X__spikes", "1")]),
            ..ModelAnalysis::default()
        };
        match synthesize_spike_updates(&m, &mut analysis) {
            Err(CompilerError::UnresolvedSymbol { name, .. }) => assert_eq!(name, "g__X__spikes"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_buffer_in_solver_is_internal() {
        let m = ModelBuilder::neuron("n")
            .spike_input("spikes", None)
            .build()
            .expect("model builds");
        let mut analysis = ModelAnalysis {
            kernel_buffers: vec![buffer("g' = -g", "spikes")],
            solvers: results(&[("V_m", "0")]),
            ..ModelAnalysis::default()
        };
        assert!(matches!(
            synthesize_spike_updates(&m, &mut analysis),
            Err(CompilerError::MissingSolverEntry { .. })
        ));
    }
}
