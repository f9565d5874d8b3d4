//! Solver-facing names.
//!
//! The oracle cannot take `'` or `$` in identifiers, and every kernel needs one
//! state trajectory per port it is convolved with. These helpers encode both
//! into plain identifiers (`g__X__spikes__d`) and decode them again.

use shnn_ir::Variable;

/// Separator between kernel and port in a buffer name
pub const KERNEL_PORT_SEPARATOR: &str = "__X__";
/// Encoding of one derivative order
pub const DERIVATIVE_MARKER: &str = "__d";
/// Encoding of `$`
pub const DOLLAR_MARKER: &str = "__DOLLAR";

/// Replace `$` and derivative ticks, e.g. `g'` -> `g__d`
pub fn to_solver_processed_name(name: &str) -> String {
    name.replace('$', DOLLAR_MARKER).replace('\'', DERIVATIVE_MARKER)
}

/// Replace `$` only; ticks stay, as the oracle request expects them on left-hand sides
pub fn to_solver_name(name: &str) -> String {
    name.replace('$', DOLLAR_MARKER)
}

/// Canonical name of a kernel variable convolved with a port, at a derivative order
pub fn kernel_buffer_name(kernel: &str, port: &Variable, order: usize) -> String {
    kernel_buffer_name_with(kernel, port, order, DERIVATIVE_MARKER)
}

/// As `kernel_buffer_name` with a custom derivative marker (`'` for oracle equations)
pub fn kernel_buffer_name_with(kernel: &str, port: &Variable, order: usize, marker: &str) -> String {
    let mut name = format!(
        "{}{}{}",
        to_solver_name(kernel),
        KERNEL_PORT_SEPARATOR,
        to_solver_processed_name(&port.complete_name())
    );
    for _ in 0..order {
        name.push_str(marker);
    }
    name
}

/// Split a buffer name back into `(kernel, port, order)`.
///
/// Returns `None` for names that are not kernel buffers.
pub fn parse_kernel_buffer_name(name: &str) -> Option<(String, String, usize)> {
    let (kernel, rest) = name.split_once(KERNEL_PORT_SEPARATOR)?;
    let (port, order) = strip_derivative_markers(rest);
    if kernel.is_empty() || port.is_empty() {
        return None;
    }
    Some((kernel.to_string(), port.to_string(), order))
}

/// Split trailing derivative markers off a name: `in__dend__d` -> (`in__dend`, 1)
fn strip_derivative_markers(name: &str) -> (&str, usize) {
    let mut base = name;
    let mut order = 0;
    while let Some(stripped) = base.strip_suffix(DERIVATIVE_MARKER) {
        base = stripped;
        order += 1;
    }
    (base, order)
}

/// Part of a solver name before the kernel/port separator
pub fn solver_base_name(solver_name: &str) -> &str {
    solver_name
        .split(KERNEL_PORT_SEPARATOR)
        .next()
        .unwrap_or(solver_name)
}

/// True if the solver variable belongs to the given model variable
pub fn variable_in_solver(name: &str, solver_variables: &[String]) -> bool {
    solver_variables.iter().any(|sv| solver_base_name(sv) == name)
}

/// Derivative order the solver tracks for a kernel variable.
///
/// A kernel of order n shows up as buffers with zero up to n-1 trailing
/// derivative markers; the result is the largest marker count plus one.
/// Markers inside the kernel or port name do not count.
pub fn kernel_order_in_solver(kernel_var: &str, solver_variables: &[String]) -> Option<usize> {
    solver_variables
        .iter()
        .filter_map(|sv| match sv.split_once(KERNEL_PORT_SEPARATOR) {
            Some((kernel, port)) => (kernel == kernel_var).then(|| strip_derivative_markers(port).1),
            None => {
                let (base, order) = strip_derivative_markers(sv);
                (base == kernel_var).then_some(order)
            }
        })
        .map(|order| order + 1)
        .max()
}
