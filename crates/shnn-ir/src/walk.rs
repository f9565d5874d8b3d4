//! Model-level walkers.
//!
//! Every expression and variable of a model is reachable through these
//! functions; passes use them instead of per-node visitor types.

use crate::expr::{Expr, ExprKind, Variable};
use crate::model::{Block, Declaration, DeclarationBlock, EquationDecl, Model, Stmt};

/// Syntactic role of a visited variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarSite {
    /// Read inside an expression
    Expression,
    /// Left-hand side of an assignment
    AssignmentTarget,
    /// Declared by a state/parameter/internal/local declaration
    DeclarationTarget,
    /// Left-hand side of an ODE or kernel
    EquationTarget,
}

fn expr_vars(e: &Expr, f: &mut dyn FnMut(&Variable, VarSite)) {
    e.walk(&mut |n| {
        if let ExprKind::Variable(v) = &n.kind {
            f(v, VarSite::Expression);
        }
    });
}

fn expr_vars_mut(e: &mut Expr, f: &mut dyn FnMut(&mut Variable, VarSite)) {
    e.for_each_variable_mut(&mut |v| f(v, VarSite::Expression));
}

fn declaration_vars(d: &Declaration, f: &mut dyn FnMut(&Variable, VarSite)) {
    for v in &d.variables {
        f(v, VarSite::DeclarationTarget);
    }
    if let Some(e) = &d.expression {
        expr_vars(e, f);
    }
}

fn declaration_vars_mut(d: &mut Declaration, f: &mut dyn FnMut(&mut Variable, VarSite)) {
    for v in &mut d.variables {
        f(v, VarSite::DeclarationTarget);
    }
    if let Some(e) = &mut d.expression {
        expr_vars_mut(e, f);
    }
}

impl Block {
    /// Every expression root in the block, nested statements included
    pub fn visit_exprs_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        for stmt in &mut self.stmts {
            match stmt {
                Stmt::Assign(a) => f(&mut a.rhs),
                Stmt::Declare(d) => {
                    if let Some(e) = &mut d.expression {
                        f(e);
                    }
                }
                Stmt::Call { call } => f(call),
                Stmt::If { branches, otherwise } => {
                    for b in branches {
                        f(&mut b.condition);
                        b.body.visit_exprs_mut(f);
                    }
                    if let Some(body) = otherwise {
                        body.visit_exprs_mut(f);
                    }
                }
                Stmt::While { condition, body } => {
                    f(condition);
                    body.visit_exprs_mut(f);
                }
            }
        }
    }

    /// Every variable in the block with its role
    pub fn visit_variables(&self, f: &mut dyn FnMut(&Variable, VarSite)) {
        for stmt in &self.stmts {
            match stmt {
                Stmt::Assign(a) => {
                    f(&a.lhs, VarSite::AssignmentTarget);
                    expr_vars(&a.rhs, f);
                }
                Stmt::Declare(d) => declaration_vars(d, f),
                Stmt::Call { call } => expr_vars(call, f),
                Stmt::If { branches, otherwise } => {
                    for b in branches {
                        expr_vars(&b.condition, f);
                        b.body.visit_variables(f);
                    }
                    if let Some(body) = otherwise {
                        body.visit_variables(f);
                    }
                }
                Stmt::While { condition, body } => {
                    expr_vars(condition, f);
                    body.visit_variables(f);
                }
            }
        }
    }

    /// Mutable variant of `visit_variables`
    pub fn visit_variables_mut(&mut self, f: &mut dyn FnMut(&mut Variable, VarSite)) {
        for stmt in &mut self.stmts {
            match stmt {
                Stmt::Assign(a) => {
                    f(&mut a.lhs, VarSite::AssignmentTarget);
                    expr_vars_mut(&mut a.rhs, f);
                }
                Stmt::Declare(d) => declaration_vars_mut(d, f),
                Stmt::Call { call } => expr_vars_mut(call, f),
                Stmt::If { branches, otherwise } => {
                    for b in branches {
                        expr_vars_mut(&mut b.condition, f);
                        b.body.visit_variables_mut(f);
                    }
                    if let Some(body) = otherwise {
                        body.visit_variables_mut(f);
                    }
                }
                Stmt::While { condition, body } => {
                    expr_vars_mut(condition, f);
                    body.visit_variables_mut(f);
                }
            }
        }
    }

    /// Left-hand sides of every assignment, nested statements included
    pub fn assigned_variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.visit_variables(&mut |v, site| {
            if site == VarSite::AssignmentTarget && !out.contains(&v.name) {
                out.push(v.name.clone());
            }
        });
        out
    }
}

impl DeclarationBlock {
    fn visit_variables(&self, f: &mut dyn FnMut(&Variable, VarSite)) {
        for d in &self.declarations {
            declaration_vars(d, f);
        }
    }

    fn visit_variables_mut(&mut self, f: &mut dyn FnMut(&mut Variable, VarSite)) {
        for d in &mut self.declarations {
            declaration_vars_mut(d, f);
        }
    }

    fn visit_exprs_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        for d in &mut self.declarations {
            if let Some(e) = &mut d.expression {
                f(e);
            }
        }
    }
}

impl EquationDecl {
    /// Every variable of the declaration with its role
    pub fn visit_variables(&self, f: &mut dyn FnMut(&Variable, VarSite)) {
        match self {
            EquationDecl::Ode(ode) => {
                f(&ode.lhs, VarSite::EquationTarget);
                expr_vars(&ode.rhs, f);
            }
            EquationDecl::Kernel(k) => {
                for (v, e) in k.definitions() {
                    f(v, VarSite::EquationTarget);
                    expr_vars(e, f);
                }
            }
            EquationDecl::Inline(i) => expr_vars(&i.expression, f),
        }
    }

    /// Mutable variant of `visit_variables`
    pub fn visit_variables_mut(&mut self, f: &mut dyn FnMut(&mut Variable, VarSite)) {
        match self {
            EquationDecl::Ode(ode) => {
                f(&mut ode.lhs, VarSite::EquationTarget);
                expr_vars_mut(&mut ode.rhs, f);
            }
            EquationDecl::Kernel(k) => {
                for v in &mut k.variables {
                    f(v, VarSite::EquationTarget);
                }
                for e in &mut k.expressions {
                    expr_vars_mut(e, f);
                }
            }
            EquationDecl::Inline(i) => expr_vars_mut(&mut i.expression, f),
        }
    }
}

impl Model {
    /// Every variable of the model with its role
    pub fn visit_variables(&self, f: &mut dyn FnMut(&Variable, VarSite)) {
        self.state.visit_variables(f);
        self.parameters.visit_variables(f);
        self.internals.visit_variables(f);
        if let Some(eqs) = &self.equations {
            for d in &eqs.declarations {
                d.visit_variables(f);
            }
        }
        self.update.visit_variables(f);
        for b in [&self.pre_receive, &self.post_receive].into_iter().flatten() {
            b.visit_variables(f);
        }
    }

    /// Mutable variant of `visit_variables`
    pub fn visit_variables_mut(&mut self, f: &mut dyn FnMut(&mut Variable, VarSite)) {
        self.state.visit_variables_mut(f);
        self.parameters.visit_variables_mut(f);
        self.internals.visit_variables_mut(f);
        if let Some(eqs) = &mut self.equations {
            for d in &mut eqs.declarations {
                d.visit_variables_mut(f);
            }
        }
        self.update.visit_variables_mut(f);
        for b in [&mut self.pre_receive, &mut self.post_receive].into_iter().flatten() {
            b.visit_variables_mut(f);
        }
        if let Some(crate::model::Pairing::Neuron(p)) = &mut self.pairing {
            for a in &mut p.moved_spike_updates {
                f(&mut a.lhs, VarSite::AssignmentTarget);
                expr_vars_mut(&mut a.rhs, f);
            }
        }
    }

    /// Every expression root of the model (declarations, equations, statements)
    pub fn visit_exprs_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        self.state.visit_exprs_mut(f);
        self.parameters.visit_exprs_mut(f);
        self.internals.visit_exprs_mut(f);
        if let Some(eqs) = &mut self.equations {
            for d in &mut eqs.declarations {
                for e in d.expressions_mut() {
                    f(e);
                }
            }
        }
        self.update.visit_exprs_mut(f);
        for b in [&mut self.pre_receive, &mut self.post_receive].into_iter().flatten() {
            b.visit_exprs_mut(f);
        }
        if let Some(crate::model::Pairing::Neuron(p)) = &mut self.pairing {
            for a in &mut p.moved_spike_updates {
                f(&mut a.rhs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;

    #[test]
    fn visits_every_role() {
        let model = ModelBuilder::synapse("stdp")
            .state("w real = 1")
            .parameter("tau ms = 20")
            .ode("w' = -w / tau")
            .pre_receive("w += 1")
            .build()
            .expect("model builds");
        let mut seen = Vec::new();
        model.visit_variables(&mut |v, site| seen.push((v.complete_name(), site)));
        assert!(seen.contains(&("w".to_string(), VarSite::DeclarationTarget)));
        assert!(seen.contains(&("w'".to_string(), VarSite::EquationTarget)));
        assert!(seen.contains(&("tau".to_string(), VarSite::Expression)));
        assert!(seen.contains(&("w".to_string(), VarSite::AssignmentTarget)));
    }

    #[test]
    fn mutable_visit_renames_everywhere() {
        let mut model = ModelBuilder::synapse("stdp")
            .state("w real = 1")
            .ode("w' = -w")
            .post_receive("w += w * 2")
            .build()
            .expect("model builds");
        model.visit_variables_mut(&mut |v, _| {
            if v.name == "w" {
                v.name = "w__for_iaf".into();
            }
        });
        let text = model.to_text();
        assert!(!text.contains("w "), "unrenamed reference left in:\n{}", text);
        assert_eq!(
            model.post_receive.map(|b| b.assigned_variables()),
            Some(vec!["w__for_iaf".to_string()])
        );
    }
}
