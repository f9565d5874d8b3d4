//! Convolution analysis.
//!
//! Finds every `convolve(kernel, port)` in the equations block, normalizes the
//! argument order, groups the calls into kernel buffers (one per kernel/port
//! pair) and extracts the factors of delta-kernel convolutions.

use std::collections::BTreeMap;

use serde::Serialize;
use shnn_ir::{Expr, ExprKind, Kernel, Model, Variable};
use tracing::warn;

use crate::algebra::SymbolicAlgebra;
use crate::names::kernel_buffer_name;
use crate::{CompilerError, Result};

/// Name of the convolution operator
pub const CONVOLVE: &str = "convolve";
/// Name of the Dirac impulse function
pub const DELTA: &str = "delta";

/// A kernel convolved with one input port
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KernelBuffer {
    /// The kernel as declared
    pub kernel: Kernel,
    /// The port it is convolved with
    pub port: Variable,
}

impl KernelBuffer {
    /// True when the kernel is an impulse and bypasses the solver
    pub fn is_delta(&self) -> bool {
        is_delta_kernel(&self.kernel)
    }
}

/// Factor of a delta-kernel convolution in an ODE right-hand side
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeltaFactor {
    /// Differentiated left-hand side of the ODE
    pub target: Variable,
    /// Port the delta kernel is convolved with
    pub port: Variable,
    /// Everything multiplying the convolution, summed over terms
    pub factor: Expr,
}

/// Delta factors keyed by `(ode lhs, port)` complete names
pub type DeltaFactors = BTreeMap<(String, String), DeltaFactor>;

fn unparen(mut e: &Expr) -> &Expr {
    while let ExprKind::Paren(inner) = &e.kind {
        e = inner;
    }
    e
}

/// True for single-variable kernels defined as `delta(...)` or `X * delta(...)`
pub fn is_delta_kernel(kernel: &Kernel) -> bool {
    if kernel.variables.len() != 1 {
        return false;
    }
    let Some(expr) = kernel.expressions.first() else {
        return false;
    };
    let expr = unparen(expr);
    if expr.is_call_to(DELTA) {
        return true;
    }
    match &expr.kind {
        ExprKind::Binary { op: shnn_ir::BinaryOp::Mul, lhs, rhs } => {
            unparen(lhs).is_call_to(DELTA) || unparen(rhs).is_call_to(DELTA)
        }
        _ => false,
    }
}

/// A classified convolution: the kernel variable, the port, and the kernel
#[derive(Debug, Clone)]
pub struct Convolution<'m> {
    /// Kernel argument as written
    pub kernel_var: Variable,
    /// Port argument as written
    pub port: Variable,
    /// Kernel declaration
    pub kernel: &'m Kernel,
}

/// Resolve a `convolve` call to `(kernel, port)`, whatever the argument order
pub fn classify<'m>(model: &'m Model, call: &Expr) -> Result<Convolution<'m>> {
    let args = call.call_args(CONVOLVE).unwrap_or(&[]);
    let vars: Vec<&Variable> = args.iter().filter_map(|a| unparen(a).as_variable()).collect();
    let (first, second) = match (args.len(), vars.as_slice()) {
        (2, [a, b]) => (*a, *b),
        _ => {
            return Err(CompilerError::MalformedConvolution {
                model: model.name.clone(),
                args: args.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                position: call.position,
            })
        }
    };
    let (kernel_var, port) = if model.scope().is_input_port(&first.name) {
        (second, first)
    } else {
        (first, second)
    };
    let kernel = model
        .equations
        .as_ref()
        .and_then(|eqs| eqs.kernel(&kernel_var.name))
        .ok_or_else(|| CompilerError::MissingKernelDefinition {
            model: model.name.clone(),
            kernel: kernel_var.complete_name(),
            port: port.complete_name(),
            position: call.position.or(kernel_var.position),
        })?;
    Ok(Convolution {
        kernel_var: kernel_var.clone(),
        port: port.clone(),
        kernel,
    })
}

fn convolve_calls(model: &Model) -> Vec<&Expr> {
    model
        .equations
        .iter()
        .flat_map(|eqs| eqs.declarations.iter())
        .flat_map(|d| d.expressions())
        .flat_map(|e| e.calls_to(CONVOLVE))
        .collect()
}

/// Every distinct (kernel, port) pair, in order of first use
pub fn collect_kernel_buffers(model: &Model) -> Result<Vec<KernelBuffer>> {
    let mut buffers: Vec<KernelBuffer> = Vec::new();
    for call in convolve_calls(model) {
        let conv = classify(model, call)?;
        let seen = buffers.iter().any(|b| {
            b.kernel.variables == conv.kernel.variables
                && b.port.complete_name() == conv.port.complete_name()
        });
        if !seen {
            buffers.push(KernelBuffer {
                kernel: conv.kernel.clone(),
                port: conv.port,
            });
        }
    }
    Ok(buffers)
}

/// Factors multiplying delta-kernel convolutions in each ODE.
///
/// The right-hand side is expanded, the additive terms containing the
/// convolution are isolated, the convolution is replaced by 1 in each and
/// the remainders are summed.
pub fn collect_delta_factors(model: &Model, algebra: &dyn SymbolicAlgebra) -> Result<DeltaFactors> {
    let mut factors = DeltaFactors::new();
    let Some(eqs) = &model.equations else {
        return Ok(factors);
    };
    for ode in eqs.odes() {
        for call in ode.rhs.calls_to(CONVOLVE) {
            let conv = classify(model, call)?;
            if !is_delta_kernel(conv.kernel) {
                continue;
            }
            let terms = algebra.isolate_additive_terms_containing(&ode.rhs, call);
            if terms.is_empty() {
                warn!(
                    model = %model.name,
                    ode = %ode.lhs,
                    "no additive term contains {}; delta convolution ignored",
                    call
                );
                continue;
            }
            let needle = call.to_string();
            let mut sum: Option<Expr> = None;
            for mut term in terms {
                term.walk_mut(&mut |e| {
                    if e.is_call_to(CONVOLVE) && e.to_string() == needle {
                        *e = Expr::number(1.0);
                    }
                });
                let term = algebra.expand(&term);
                sum = Some(match sum {
                    Some(s) => Expr::binary(shnn_ir::BinaryOp::Add, s, term),
                    None => term,
                });
            }
            let factor = sum.map(|s| algebra.expand(&s)).unwrap_or_else(|| Expr::number(0.0));
            factors.insert(
                (ode.lhs.complete_name(), conv.port.complete_name()),
                DeltaFactor {
                    target: ode.lhs.clone(),
                    port: conv.port,
                    factor,
                },
            );
        }
    }
    Ok(factors)
}

/// Replace every `convolve` call by its buffer variable, or by `0` for delta kernels
pub fn replace_convolve_calls(model: &mut Model) -> Result<()> {
    let mut replacements: BTreeMap<String, Expr> = BTreeMap::new();
    for call in convolve_calls(model) {
        let conv = classify(model, call)?;
        let replacement = if is_delta_kernel(conv.kernel) {
            let mut zero = Expr::number(0.0);
            zero.position = call.position;
            zero
        } else {
            let name = kernel_buffer_name(
                &conv.kernel_var.name,
                &conv.port,
                conv.kernel_var.differential_order.saturating_sub(1),
            );
            let mut var = Variable::new(name);
            var.position = call.position;
            Expr::from(var)
        };
        replacements.insert(call.to_string(), replacement);
    }
    if replacements.is_empty() {
        return Ok(());
    }
    if let Some(eqs) = &mut model.equations {
        for d in &mut eqs.declarations {
            for e in d.expressions_mut() {
                e.walk_mut(&mut |node| {
                    if node.is_call_to(CONVOLVE) {
                        if let Some(r) = replacements.get(&node.to_string()) {
                            *node = r.clone();
                        }
                    }
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::ExpansionAlgebra;
    use shnn_ir::ModelBuilder;

    fn iaf() -> Model {
        ModelBuilder::neuron("iaf")
            .state("V_m mV = -70")
            .state("g_ex real = 0")
            .state("g_ex' real = 1")
            .parameter("tau ms = 10")
            .parameter("C_m pF = 250")
            .kernel("g_ex'' = -g_ex / tau**2 - 2 * g_ex' / tau")
            .kernel("I_delta = delta(t)")
            .ode("V_m' = -V_m / tau + convolve(g_ex, ex_spikes) / C_m + convolve(I_delta, in_spikes) / C_m")
            .spike_input("ex_spikes", Some("pA"))
            .spike_input("in_spikes", Some("pA"))
            .build()
            .expect("model builds")
    }

    #[test]
    fn delta_kernels() {
        let m = iaf();
        let eqs = m.equations.as_ref().expect("equations");
        assert!(is_delta_kernel(eqs.kernel("I_delta").expect("kernel")));
        assert!(!is_delta_kernel(eqs.kernel("g_ex").expect("kernel")));
        let scaled = shnn_ir::parse_kernel("k = (2.5 * delta(t))").expect("parses");
        assert!(is_delta_kernel(&scaled));
    }

    #[test]
    fn buffers_normalize_argument_order() {
        let m = ModelBuilder::neuron("n")
            .kernel("g = exp(-t / tau)")
            .inline("I pA = convolve(g, spikes) + convolve(spikes, g)")
            .spike_input("spikes", None)
            .build()
            .expect("model builds");
        let buffers = collect_kernel_buffers(&m).expect("classifies");
        assert_eq!(buffers.len(), 1);
        assert_eq!(buffers[0].port.name, "spikes");
        assert_eq!(buffers[0].kernel.variables[0].name, "g");
    }

    #[test]
    fn missing_kernel_is_reported() {
        let m = ModelBuilder::neuron("n")
            .inline("I pA = convolve(h, spikes)")
            .spike_input("spikes", None)
            .build()
            .expect("model builds");
        match collect_kernel_buffers(&m) {
            Err(CompilerError::MissingKernelDefinition { kernel, port, .. }) => {
                assert_eq!((kernel.as_str(), port.as_str()), ("h", "spikes"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn malformed_convolution() {
        let m = ModelBuilder::neuron("n")
            .inline("I pA = convolve(g)")
            .build()
            .expect("model builds");
        assert!(matches!(
            collect_kernel_buffers(&m),
            Err(CompilerError::MalformedConvolution { .. })
        ));
    }

    #[test]
    fn delta_factor_divides_out_the_convolution() {
        let m = iaf();
        let factors = collect_delta_factors(&m, &ExpansionAlgebra).expect("analyzes");
        assert_eq!(factors.len(), 1);
        let f = &factors[&("V_m'".to_string(), "in_spikes".to_string())];
        assert_eq!(f.factor.to_string(), "1.0 / C_m");
        assert_eq!(f.target.complete_name(), "V_m'");
    }

    #[test]
    fn convolve_calls_become_buffers() {
        let mut m = iaf();
        replace_convolve_calls(&mut m).expect("replaces");
        let eqs = m.equations.as_ref().expect("equations");
        let rhs = eqs.odes().next().expect("ode").rhs.to_string();
        assert_eq!(rhs, "-V_m / tau + g_ex__X__ex_spikes / C_m + 0.0 / C_m");
    }
}
