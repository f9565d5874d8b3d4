//! Per-model symbol tables.
//!
//! Tables are rebuilt from the tree whenever a pass changes declarations
//! (`Model::update_scope`); nodes never point back into a table.

use std::collections::BTreeMap;

use crate::expr::{Expr, SourcePosition};
use crate::model::{EquationDecl, Model, PortKind};

/// Names every model can use without declaring them
pub const PREDEFINED: &[&str] = &["t", "e", "inf", "pi"];

/// Block a symbol was declared in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    /// `state:`
    State,
    /// `parameters:`
    Parameters,
    /// `internals:`
    Internals,
    /// `equations:`
    Equations,
    /// `input:`
    Input,
    /// Built in (`t`, `e`)
    Predefined,
}

/// What a symbol denotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    /// A variable
    Variable,
    /// A kernel variable
    Kernel,
    /// An inline expression
    InlineExpression,
    /// A spike input port
    SpikePort,
    /// A continuous input port
    ContinuousPort,
}

/// Resolved symbol
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    /// Complete name (with ticks)
    pub name: String,
    /// Declaring block
    pub block: BlockType,
    /// Kind
    pub kind: SymbolKind,
    /// Declared type, if any
    pub data_type: Option<String>,
    /// Initial value or defining expression
    pub declaring_expression: Option<Expr>,
    /// Declaration position
    pub position: Option<SourcePosition>,
}

impl Symbol {
    /// True for input ports of either flavour
    pub fn is_input_port(&self) -> bool {
        matches!(self.kind, SymbolKind::SpikePort | SymbolKind::ContinuousPort)
    }
}

/// Symbol table of one model
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SymbolTable {
    symbols: BTreeMap<String, Symbol>,
}

impl SymbolTable {
    /// Collect every declaration of the model. First declaration of a name wins.
    pub fn build(model: &Model) -> Self {
        let mut table = SymbolTable::default();

        for name in PREDEFINED {
            table.insert(Symbol {
                name: name.to_string(),
                block: BlockType::Predefined,
                kind: SymbolKind::Variable,
                data_type: Some("real".into()),
                declaring_expression: None,
                position: None,
            });
        }

        for port in &model.input_ports {
            table.insert(Symbol {
                name: port.name.clone(),
                block: BlockType::Input,
                kind: match port.kind {
                    PortKind::Spike => SymbolKind::SpikePort,
                    PortKind::Continuous => SymbolKind::ContinuousPort,
                },
                data_type: port.data_type.clone(),
                declaring_expression: None,
                position: port.position,
            });
        }

        let blocks = [
            (&model.parameters, BlockType::Parameters),
            (&model.state, BlockType::State),
            (&model.internals, BlockType::Internals),
        ];
        for (block, block_type) in blocks {
            for decl in &block.declarations {
                for var in &decl.variables {
                    table.insert(Symbol {
                        name: var.complete_name(),
                        block: block_type,
                        kind: SymbolKind::Variable,
                        data_type: Some(decl.data_type.clone()),
                        declaring_expression: decl.expression.clone(),
                        position: var.position.or(decl.position),
                    });
                }
            }
        }

        if let Some(eqs) = &model.equations {
            for decl in &eqs.declarations {
                match decl {
                    EquationDecl::Kernel(k) => {
                        for (var, expr) in k.definitions() {
                            table.insert(Symbol {
                                name: var.complete_name(),
                                block: BlockType::Equations,
                                kind: SymbolKind::Kernel,
                                data_type: Some("real".into()),
                                declaring_expression: Some(expr.clone()),
                                position: var.position.or(k.position),
                            });
                        }
                    }
                    EquationDecl::Inline(i) => {
                        table.insert(Symbol {
                            name: i.name.clone(),
                            block: BlockType::Equations,
                            kind: SymbolKind::InlineExpression,
                            data_type: Some(i.data_type.clone()),
                            declaring_expression: Some(i.expression.clone()),
                            position: i.position,
                        });
                    }
                    EquationDecl::Ode(ode) => {
                        table.insert(Symbol {
                            name: ode.lhs.complete_name(),
                            block: BlockType::Equations,
                            kind: SymbolKind::Variable,
                            data_type: None,
                            declaring_expression: Some(ode.rhs.clone()),
                            position: ode.position,
                        });
                    }
                }
            }
        }

        table
    }

    fn insert(&mut self, symbol: Symbol) {
        self.symbols.entry(symbol.name.clone()).or_insert(symbol);
    }

    /// Look up a complete name (`g'`), then its base name (`g`)
    pub fn resolve(&self, name: &str) -> Option<&Symbol> {
        self.symbols
            .get(name)
            .or_else(|| self.symbols.get(name.trim_end_matches('\'')))
    }

    /// True if the name resolves
    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// True if the name resolves to an input port
    pub fn is_input_port(&self, name: &str) -> bool {
        self.resolve(name).map_or(false, Symbol::is_input_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;

    #[test]
    fn resolves_ports_state_and_kernels() {
        let model = ModelBuilder::neuron("iaf")
            .state("V_m mV = -70")
            .state("g real = 0")
            .state("g' real = 1")
            .parameter("tau ms = 10")
            .kernel("g' = -g / tau")
            .spike_input("spikes", Some("pA"))
            .build()
            .expect("model builds");
        let scope = model.scope();
        assert_eq!(scope.resolve("V_m").map(|s| s.block), Some(BlockType::State));
        assert!(scope.is_input_port("spikes"));
        assert!(!scope.is_input_port("tau"));
        assert_eq!(scope.resolve("g'").map(|s| s.block), Some(BlockType::State));
        assert!(scope.contains("t"));
        assert!(!scope.contains("nope"));
    }

    #[test]
    fn higher_order_falls_back_to_base_name() {
        let model = ModelBuilder::neuron("n").state("x real = 0").build().expect("model builds");
        assert_eq!(model.scope().resolve("x''").map(|s| s.name.as_str()), Some("x"));
    }
}
