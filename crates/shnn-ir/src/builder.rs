//! Fluent construction of models from declaration snippets

use crate::model::{
    Block, EquationDecl, InputPort, Model, ModelKind, PortKind, Stmt,
};
use crate::parse::{parse_declaration, parse_inline, parse_kernel, parse_ode, parse_statement};
use crate::{IrError, Result};

/// Builder for `Model`.
///
/// Each method parses its snippet right away; the first failure is kept and
/// returned by `build`.
#[derive(Debug)]
pub struct ModelBuilder {
    model: Model,
    error: Option<IrError>,
}

impl ModelBuilder {
    /// Start a neuron
    pub fn neuron(name: impl Into<String>) -> Self {
        Self::new(name, ModelKind::Neuron)
    }

    /// Start a synapse
    pub fn synapse(name: impl Into<String>) -> Self {
        Self::new(name, ModelKind::Synapse)
    }

    /// Start a model of the given kind
    pub fn new(name: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            model: Model::new(name, kind),
            error: None,
        }
    }

    fn apply<T>(mut self, parsed: Result<T>, add: impl FnOnce(&mut Model, T)) -> Self {
        match parsed {
            Ok(value) if self.error.is_none() => add(&mut self.model, value),
            Ok(_) => {}
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// `state:` declaration such as `V_m mV = -70`
    pub fn state(self, decl: &str) -> Self {
        self.apply(parse_declaration(decl), |m, d| m.state.push(d))
    }

    /// `parameters:` declaration
    pub fn parameter(self, decl: &str) -> Self {
        self.apply(parse_declaration(decl), |m, d| m.parameters.push(d))
    }

    /// `internals:` declaration
    pub fn internal(self, decl: &str) -> Self {
        self.apply(parse_declaration(decl), |m, d| m.internals.push(d))
    }

    /// ODE such as `V_m' = -V_m / tau`
    pub fn ode(self, text: &str) -> Self {
        self.apply(parse_ode(text), |m, ode| {
            m.equations_mut().declarations.push(EquationDecl::Ode(ode))
        })
    }

    /// Kernel such as `g = exp(-t / tau)` or `g'' = a, g' = b`
    pub fn kernel(self, text: &str) -> Self {
        self.apply(parse_kernel(text), |m, k| {
            m.equations_mut().declarations.push(EquationDecl::Kernel(k))
        })
    }

    /// Inline expression such as `I_syn pA = convolve(g, spikes)`
    pub fn inline(self, text: &str) -> Self {
        self.apply(parse_inline(text), |m, i| {
            m.equations_mut().declarations.push(EquationDecl::Inline(i))
        })
    }

    /// Spike input port
    pub fn spike_input(self, name: &str, data_type: Option<&str>) -> Self {
        self.port(name, data_type, PortKind::Spike)
    }

    /// Continuous input port
    pub fn continuous_input(self, name: &str, data_type: Option<&str>) -> Self {
        self.port(name, data_type, PortKind::Continuous)
    }

    fn port(mut self, name: &str, data_type: Option<&str>, kind: PortKind) -> Self {
        self.model.input_ports.push(InputPort {
            name: name.to_string(),
            data_type: data_type.map(str::to_string),
            kind,
            position: None,
        });
        self
    }

    /// Statement appended to `update:`
    pub fn update(self, stmt: &str) -> Self {
        self.apply(parse_statement(stmt), |m, s| m.update.stmts.push(s))
    }

    /// Statement appended to the presynaptic event handler
    pub fn pre_receive(self, stmt: &str) -> Self {
        self.apply(parse_statement(stmt), |m, s| {
            m.pre_receive.get_or_insert_with(Block::default).stmts.push(s)
        })
    }

    /// Statement appended to the postsynaptic event handler
    pub fn post_receive(self, stmt: &str) -> Self {
        self.apply(parse_statement(stmt), |m, s| {
            m.post_receive.get_or_insert_with(Block::default).stmts.push(s)
        })
    }

    /// Append an already-built statement to `update:`
    pub fn update_stmt(mut self, stmt: Stmt) -> Self {
        self.model.update.stmts.push(stmt);
        self
    }

    /// Finish, building the symbol table
    pub fn build(self) -> Result<Model> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let mut model = self.model;
        model.update_scope();
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_error_wins() {
        let err = ModelBuilder::neuron("n")
            .state("x real = (")
            .state("y = 2")
            .build()
            .expect_err("bad snippet");
        match err {
            IrError::Parse { input, .. } => assert_eq!(input, "x real = ("),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn builds_equations_block_lazily() {
        let m = ModelBuilder::neuron("n").state("x real = 0").build().expect("builds");
        assert!(m.equations.is_none());
        let m = ModelBuilder::neuron("n")
            .kernel("g = exp(-t / tau)")
            .inline("I pA = convolve(g, spikes)")
            .build()
            .expect("builds");
        let eqs = m.equations.expect("equations block");
        assert_eq!(eqs.declarations.len(), 2);
        assert!(eqs.inline_expression("I").is_some());
    }
}
