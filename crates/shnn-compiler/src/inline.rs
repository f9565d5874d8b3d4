//! Inline-expression flattening.
//!
//! Every inline definition is rewritten so it no longer mentions another
//! inline expression, then the flattened definitions are substituted into the
//! ODE right-hand sides. Substitution works on the tree: only variable nodes
//! with the exact inline name are replaced, wrapped in parentheses.

use std::collections::BTreeMap;

use shnn_ir::{EquationDecl, Expr, ExprKind, Model, SourcePosition};

use crate::{CompilerError, Result};

struct Definition {
    expr: Expr,
    position: Option<SourcePosition>,
}

/// Replace references to `defs` inside `expr`
fn substitute(expr: &mut Expr, defs: &BTreeMap<String, Definition>) {
    expr.walk_mut(&mut |node| {
        let replacement = match &node.kind {
            ExprKind::Variable(v) if v.differential_order == 0 && !v.is_external() => {
                defs.get(&v.name).map(|d| {
                    let mut e = Expr::paren(d.expr.clone());
                    e.fill_positions(v.position.or(d.position));
                    e
                })
            }
            _ => None,
        };
        if let Some(r) = replacement {
            *node = r;
        }
    });
}

fn inline_refs<'e>(expr: &'e Expr, names: &BTreeMap<String, Vec<String>>) -> Vec<&'e str> {
    expr.variables()
        .into_iter()
        .filter(|v| v.differential_order == 0 && !v.is_external() && names.contains_key(&v.name))
        .map(|v| v.name.as_str())
        .collect()
}

/// Post-order over the inline dependency graph; a back edge is a cycle
fn topological_order(model: &Model, deps: &BTreeMap<String, Vec<String>>, roots: &[String]) -> Result<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Active,
        Done,
    }

    fn visit(
        name: &str,
        deps: &BTreeMap<String, Vec<String>>,
        marks: &mut BTreeMap<String, Mark>,
        path: &mut Vec<String>,
        order: &mut Vec<String>,
    ) -> std::result::Result<(), Vec<String>> {
        match marks.get(name) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Active) => {
                let start = path.iter().position(|p| p == name).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(name.to_string());
                return Err(cycle);
            }
            None => {}
        }
        marks.insert(name.to_string(), Mark::Active);
        path.push(name.to_string());
        for dep in deps.get(name).into_iter().flatten() {
            visit(dep, deps, marks, path, order)?;
        }
        path.pop();
        marks.insert(name.to_string(), Mark::Done);
        order.push(name.to_string());
        Ok(())
    }

    let mut marks = BTreeMap::new();
    let mut order = Vec::new();
    for root in roots {
        let mut path = Vec::new();
        visit(root, deps, &mut marks, &mut path, &mut order).map_err(|cycle| {
            CompilerError::CyclicInlineExpressions {
                model: model.name.clone(),
                cycle,
            }
        })?;
    }
    Ok(order)
}

/// Flatten inline expressions into each other and into the ODEs
pub fn flatten_inline_expressions(model: &mut Model) -> Result<()> {
    let Some(eqs) = &model.equations else {
        return Ok(());
    };
    let names: Vec<String> = eqs.inline_expressions().map(|i| i.name.clone()).collect();
    if names.is_empty() {
        return Ok(());
    }

    let mut deps: BTreeMap<String, Vec<String>> = names.iter().map(|n| (n.clone(), Vec::new())).collect();
    for i in eqs.inline_expressions() {
        let refs: Vec<String> = inline_refs(&i.expression, &deps).into_iter().map(str::to_string).collect();
        deps.insert(i.name.clone(), refs);
    }
    let order = topological_order(model, &deps, &names)?;

    let mut flat: BTreeMap<String, Definition> = BTreeMap::new();
    for name in &order {
        if let Some(i) = eqs.inline_expression(name) {
            let mut expr = i.expression.clone();
            substitute(&mut expr, &flat);
            flat.insert(name.clone(), Definition { expr, position: i.position });
        }
    }

    let eqs = model.equations_mut();
    for d in &mut eqs.declarations {
        match d {
            EquationDecl::Inline(i) => {
                if let Some(def) = flat.get(&i.name) {
                    i.expression = def.expr.clone();
                }
            }
            EquationDecl::Ode(ode) => {
                substitute(&mut ode.rhs, &flat);
            }
            EquationDecl::Kernel(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shnn_ir::ModelBuilder;

    fn model() -> Model {
        ModelBuilder::neuron("n")
            .state("V_m mV = 0")
            .inline("I_total pA = I_syn + I_e")
            .inline("I_syn pA = g * (V_m - E)")
            .ode("V_m' = -V_m / tau + I_total / C_m")
            .build()
            .expect("model builds")
    }

    #[test]
    fn flattens_transitively() {
        let mut m = model();
        flatten_inline_expressions(&mut m).expect("acyclic");
        let eqs = m.equations.as_ref().expect("equations");
        assert_eq!(
            eqs.inline_expression("I_total").expect("inline").expression.to_string(),
            "(g * (V_m - E)) + I_e"
        );
        let rhs = eqs.odes().next().expect("ode").rhs.to_string();
        assert_eq!(rhs, "-V_m / tau + ((g * (V_m - E)) + I_e) / C_m");
    }

    #[test]
    fn second_run_changes_nothing() {
        let mut m = model();
        flatten_inline_expressions(&mut m).expect("acyclic");
        let once = m.to_text();
        flatten_inline_expressions(&mut m).expect("acyclic");
        assert_eq!(m.to_text(), once);
    }

    #[test]
    fn does_not_match_inside_longer_names() {
        let mut m = ModelBuilder::neuron("n")
            .inline("V real = 1")
            .ode("V_m' = V_m + V")
            .build()
            .expect("model builds");
        flatten_inline_expressions(&mut m).expect("acyclic");
        let rhs = m.equations.as_ref().expect("equations").odes().next().expect("ode").rhs.to_string();
        assert_eq!(rhs, "V_m + (1.0)");
    }

    #[test]
    fn cycles_are_errors() {
        let mut m = ModelBuilder::neuron("n")
            .inline("a real = b + 1")
            .inline("b real = c")
            .inline("c real = a")
            .build()
            .expect("model builds");
        match flatten_inline_expressions(&mut m) {
            Err(CompilerError::CyclicInlineExpressions { cycle, .. }) => {
                assert_eq!(cycle, vec!["a", "b", "c", "a"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn substituted_nodes_take_the_reference_position() {
        let mut m = ModelBuilder::neuron("n")
            .inline("I real = x")
            .ode("y' = I")
            .build()
            .expect("model builds");
        let at = SourcePosition::new(7, 12);
        if let Some(ode) = m.equations_mut().odes_mut().next() {
            ode.rhs = Expr::from(shnn_ir::Variable::new("I").at(at));
        }
        flatten_inline_expressions(&mut m).expect("acyclic");
        let ode = m.equations.as_ref().expect("equations").odes().next().expect("ode").clone();
        assert_eq!(ode.rhs.to_string(), "(x)");
        assert_eq!(ode.rhs.position, Some(at));
        assert_eq!(ode.rhs.variables()[0].position, Some(at));
    }
}
