//! Neuron/synapse pair splitting.
//!
//! Synapse state whose dynamics are driven by postsynaptic spikes alone is
//! moved into the paired neuron, so it is integrated once per neuron rather
//! than once per synapse. The synapse keeps reading it through external
//! references. Both halves are renamed `a__with_b` and linked through
//! `Model::pairing`; the input models are never mutated.

use std::collections::{BTreeSet, VecDeque};

use shnn_ir::symbols::PREDEFINED;
use shnn_ir::{
    Assignment, EquationDecl, Expr, Model, ModelKind, NeuronPairing, Pairing, Stmt, VarSite,
    VariableScope,
};
use tracing::{debug, error, info, warn};

use crate::context::CompilationContext;
use crate::kernels::CONVOLVE;
use crate::options::CompilerOptions;
use crate::pipeline::TransformedModels;
use crate::CompilerError;

/// Joins a moved variable name and the synapse it came from
pub const PAIR_VARIABLE_SEPARATOR: &str = "__for_";
/// Joins the names of the two halves of a pair
pub const PAIR_MODEL_SEPARATOR: &str = "__with_";

/// How the variables of a synapse split between the two models
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairPartition {
    /// Base names declared in the synapse's state block
    pub all_variables: BTreeSet<String>,
    /// Inline expressions convolving with an input port
    pub convolution_variables: BTreeSet<String>,
    /// Assigned in the presynaptic handler; never moved
    pub strictly_synaptic: BTreeSet<String>,
    /// Inline expressions convolving with a port that is not postsynaptic; never moved
    pub convolved_with_other_ports: BTreeSet<String>,
    /// Names that move to the neuron
    pub to_move: BTreeSet<String>,
}

impl PairPartition {
    /// Partition `synapse` for pairing with `neuron` (full model names)
    pub fn new(neuron: &Model, synapse: &Model, options: &CompilerOptions) -> Self {
        let all_variables = synapse.state.base_names();

        let mut convolution_variables = BTreeSet::new();
        let mut convolved_with_other_ports = BTreeSet::new();
        for inline in synapse.equations.iter().flat_map(|eqs| eqs.inline_expressions()) {
            for call in inline.expression.calls_to(CONVOLVE) {
                let Some(port) = convolved_port(synapse, call) else {
                    continue;
                };
                convolution_variables.insert(inline.name.clone());
                if !options.is_post_port(&port, &neuron.name, &synapse.name) {
                    convolved_with_other_ports.insert(inline.name.clone());
                }
            }
        }

        let strictly_synaptic: BTreeSet<String> = synapse
            .pre_receive
            .as_ref()
            .map(|b| b.assigned_variables())
            .unwrap_or_default()
            .into_iter()
            .collect();

        let to_move = all_variables
            .union(&convolution_variables)
            .filter(|n| !strictly_synaptic.contains(*n) && !convolved_with_other_ports.contains(*n))
            .cloned()
            .collect();

        Self {
            all_variables,
            convolution_variables,
            strictly_synaptic,
            convolved_with_other_ports,
            to_move,
        }
    }
}

/// Input port a `convolve` call reads, second argument first
fn convolved_port(synapse: &Model, call: &Expr) -> Option<String> {
    let args = call.call_args(CONVOLVE)?;
    args.iter().rev().find_map(|arg| {
        let arg = arg.clone().strip_parens();
        arg.as_variable()
            .filter(|v| synapse.input_port(&v.name).is_some())
            .map(|v| v.name.clone())
    })
}

fn defining_expressions<'m>(model: &'m Model, name: &str) -> Vec<&'m Expr> {
    let mut out = Vec::new();
    if let Some(eqs) = &model.equations {
        out.extend(
            eqs.declarations
                .iter()
                .filter(|d| d.defines(name))
                .flat_map(|d| d.expressions()),
        );
    }
    for block in [&model.state, &model.parameters, &model.internals] {
        out.extend(
            block
                .declarations
                .iter()
                .filter(|d| d.declares_base(name))
                .filter_map(|d| d.expression.as_ref()),
        );
    }
    out
}

/// Names reachable from `seeds` through defining expressions, in discovery order.
///
/// Names in `exclude` are followed but not reported; predefined names are
/// neither.
pub fn dependency_closure(
    model: &Model,
    seeds: impl IntoIterator<Item = String>,
    exclude: &BTreeSet<String>,
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut queue: VecDeque<String> = seeds.into_iter().collect();
    let mut found = Vec::new();
    while let Some(name) = queue.pop_front() {
        if PREDEFINED.contains(&name.as_str()) || !seen.insert(name.clone()) {
            continue;
        }
        if !exclude.contains(&name) {
            found.push(name.clone());
        }
        for expr in defining_expressions(model, &name) {
            for v in expr.variables() {
                if !v.is_external() && !seen.contains(&v.name) {
                    queue.push_back(v.name.clone());
                }
            }
        }
    }
    found
}

/// True if a local variable called `name` is read or assigned anywhere in the model
fn is_referenced(model: &Model, name: &str) -> bool {
    let mut found = false;
    model.visit_variables(&mut |v, site| {
        if matches!(site, VarSite::Expression | VarSite::AssignmentTarget)
            && !v.is_external()
            && v.name == name
        {
            found = true;
        }
    });
    found
}

fn mark_post_ports(model: &mut Model, options: &CompilerOptions, neuron: &str, synapse: &str) {
    model.visit_variables_mut(&mut |v, _| {
        if options.is_post_port(&v.name, neuron, synapse) {
            v.is_post_port = true;
        }
    });
}

fn stage_equations(staged: &mut Model, decls: Vec<EquationDecl>) {
    if !decls.is_empty() {
        staged.equations_mut().declarations.extend(decls);
    }
}

/// Split one pair. Returns the derived neuron and synapse.
pub fn split_pair(neuron: &Model, synapse: &Model, options: &CompilerOptions) -> (Model, Model) {
    let partition = PairPartition::new(neuron, synapse, options);
    let suffix = format!("{}{}", PAIR_VARIABLE_SEPARATOR, synapse.name);
    let neuron_name = format!("{}{}{}", neuron.name, PAIR_MODEL_SEPARATOR, synapse.name);
    let synapse_name = format!("{}{}{}", synapse.name, PAIR_MODEL_SEPARATOR, neuron.name);

    info!(
        neuron = %neuron.name,
        synapse = %synapse.name,
        to_move = ?partition.to_move,
        "splitting neuron/synapse pair"
    );
    debug!(
        all = ?partition.all_variables,
        convolutions = ?partition.convolution_variables,
        strictly_synaptic = ?partition.strictly_synaptic,
        other_ports = ?partition.convolved_with_other_ports,
        "pair partition"
    );

    let mut new_neuron = neuron.clone();
    let mut new_synapse = synapse.clone();
    // Material on its way to the neuron; renamed before it is merged.
    let mut staged = Model::new(neuron_name.clone(), ModelKind::Neuron);

    for name in &partition.to_move {
        staged.state.declarations.extend(new_synapse.state.remove_base(name));
        if let Some(eqs) = &mut new_synapse.equations {
            let taken = eqs.take_defining(name);
            stage_equations(&mut staged, taken);
        }
    }

    let mut moved_spike_updates: Vec<Assignment> = Vec::new();
    if let Some(post) = &mut new_synapse.post_receive {
        let (moved, kept): (Vec<Stmt>, Vec<Stmt>) = std::mem::take(&mut post.stmts)
            .into_iter()
            .partition(|s| matches!(s, Stmt::Assign(a) if partition.to_move.contains(&a.lhs.name)));
        post.stmts = kept;
        moved_spike_updates.extend(moved.into_iter().filter_map(|s| match s {
            Stmt::Assign(a) => Some(a),
            _ => None,
        }));
    }

    let seeds: Vec<String> = partition
        .to_move
        .iter()
        .cloned()
        .chain(
            moved_spike_updates
                .iter()
                .flat_map(|a| a.rhs.variables())
                .map(|v| v.name.clone()),
        )
        .collect();
    let recursive_vars_used = dependency_closure(synapse, seeds, &partition.to_move);
    debug!(dependencies = ?recursive_vars_used, "dependency closure");

    let remaining_state = new_synapse.state.base_names();
    let dependencies: Vec<String> = recursive_vars_used
        .iter()
        .filter(|name| {
            if remaining_state.contains(*name) {
                warn!(
                    synapse = %synapse.name,
                    variable = %name,
                    "moved dynamics read synapse state that stays in the synapse"
                );
                false
            } else {
                if partition.convolved_with_other_ports.contains(*name) {
                    warn!(
                        synapse = %synapse.name,
                        variable = %name,
                        "moved dynamics read a convolution with a port that is not postsynaptic; it moves to the neuron"
                    );
                }
                true
            }
        })
        .cloned()
        .collect();

    new_synapse.visit_variables_mut(&mut |v, _| {
        if !v.is_external() && partition.to_move.contains(&v.name) {
            v.name.push_str(&suffix);
            v.scope = VariableScope::External {
                model: neuron_name.clone(),
            };
        }
    });

    // Dependencies still read by the synapse are copied, the rest moved.
    for name in &dependencies {
        let copy = is_referenced(&new_synapse, name);
        if let Some(eqs) = &mut new_synapse.equations {
            let decls = if copy {
                eqs.declarations.iter().filter(|d| d.defines(name)).cloned().collect()
            } else {
                eqs.take_defining(name)
            };
            stage_equations(&mut staged, decls);
        }
        for (from, to) in [
            (&mut new_synapse.parameters, &mut staged.parameters),
            (&mut new_synapse.internals, &mut staged.internals),
        ] {
            let decls = if copy {
                from.declarations.iter().filter(|d| d.declares_base(name)).cloned().collect()
            } else {
                from.remove_base(name)
            };
            to.declarations.extend(decls);
        }
        debug!(dependency = %name, copy, "dependency staged");
    }

    staged.pairing = Some(Pairing::Neuron(NeuronPairing {
        moved_spike_updates,
        ..NeuronPairing::default()
    }));
    for model in [&mut new_synapse, &mut staged, &mut new_neuron] {
        mark_post_ports(model, options, &neuron.name, &synapse.name);
    }

    let renamed: BTreeSet<&str> = partition
        .to_move
        .iter()
        .chain(dependencies.iter())
        .map(String::as_str)
        .collect();
    let needs_suffix =
        |name: &str| renamed.contains(name) && !PREDEFINED.contains(&name) && !name.ends_with(&suffix);
    staged.visit_variables_mut(&mut |v, _| {
        if needs_suffix(&v.name) {
            v.name.push_str(&suffix);
        }
    });
    if let Some(eqs) = &mut staged.equations {
        for inline in eqs.inline_expressions_mut() {
            if needs_suffix(&inline.name) {
                inline.name.push_str(&suffix);
            }
        }
    }

    new_neuron.state.declarations.append(&mut staged.state.declarations);
    new_neuron.parameters.declarations.append(&mut staged.parameters.declarations);
    new_neuron.internals.declarations.append(&mut staged.internals.declarations);
    if let Some(mut eqs) = staged.equations.take() {
        new_neuron.equations_mut().declarations.append(&mut eqs.declarations);
    }
    let moved_spike_updates = match staged.pairing.take() {
        Some(Pairing::Neuron(p)) => p.moved_spike_updates,
        _ => Vec::new(),
    };

    new_neuron.pairing = Some(Pairing::Neuron(NeuronPairing {
        synapse: synapse_name.clone(),
        transferred_variables: partition
            .to_move
            .iter()
            .map(|name| format!("{}{}", name, suffix))
            .collect(),
        moved_spike_updates,
        recursive_vars_used,
        port_types: synapse
            .input_ports
            .iter()
            .map(|p| (p.name.clone(), p.data_type.clone()))
            .collect(),
    }));
    new_synapse.pairing = Some(Pairing::Synapse {
        neuron: neuron_name.clone(),
    });
    new_neuron.name = neuron_name;
    new_synapse.name = synapse_name;
    new_neuron.update_scope();
    new_synapse.update_scope();
    (new_neuron, new_synapse)
}

/// Split every configured pair.
///
/// Derived neurons are appended after the input neurons. A paired synapse
/// is replaced in place by its derived synapse; when several pairs share a
/// synapse the last one wins. Pairs naming an unknown model are recorded in
/// `ctx` and skipped.
pub fn split_pairs(
    neurons: &[Model],
    synapses: &[Model],
    options: &CompilerOptions,
    ctx: &mut CompilationContext,
) -> TransformedModels {
    let mut out = TransformedModels {
        neurons: neurons.to_vec(),
        synapses: synapses.to_vec(),
    };
    let mut replaced = BTreeSet::new();

    for pair in &options.neuron_synapse_pairs {
        let neuron_name = format!("{}{}", pair.neuron, options.model_suffix);
        let synapse_name = format!("{}{}", pair.synapse, options.model_suffix);

        let Some(neuron) = neurons.iter().find(|m| m.name == neuron_name) else {
            error!(neuron = %neuron_name, "neuron/synapse pair names an unknown neuron");
            ctx.fail(
                neuron_name.clone(),
                CompilerError::UnknownPairModel {
                    role: "neuron",
                    name: neuron_name,
                },
            );
            continue;
        };
        let Some(index) = synapses.iter().position(|m| m.name == synapse_name) else {
            error!(synapse = %synapse_name, "neuron/synapse pair names an unknown synapse");
            ctx.fail(
                synapse_name.clone(),
                CompilerError::UnknownPairModel {
                    role: "synapse",
                    name: synapse_name,
                },
            );
            continue;
        };

        let (new_neuron, new_synapse) = split_pair(neuron, &synapses[index], options);
        if !replaced.insert(index) {
            warn!(
                synapse = %synapse_name,
                kept = %new_synapse.name,
                "synapse paired more than once; earlier derived synapse discarded"
            );
        }
        out.neurons.push(new_neuron);
        if let Some(slot) = out.synapses.get_mut(index) {
            *slot = new_synapse;
        }
    }
    out
}
