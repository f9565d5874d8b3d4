//! Model nodes: declarations, equations, statements and the model itself

use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::expr::{Expr, SourcePosition, Variable};
use crate::symbols::SymbolTable;

/// Neuron or synapse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ModelKind {
    /// Neuron model
    Neuron,
    /// Synapse model
    Synapse,
}

impl ModelKind {
    /// Keyword used in the textual report
    pub fn keyword(self) -> &'static str {
        match self {
            ModelKind::Neuron => "neuron",
            ModelKind::Synapse => "synapse",
        }
    }
}

/// `a, b type = expr`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Declaration {
    /// Declared variables (co-declared variables share type and value)
    pub variables: Vec<Variable>,
    /// Data type as written (`real`, `mV`, `pA/ms`, ...)
    pub data_type: String,
    /// Initial value / defining expression
    #[cfg_attr(feature = "serde", serde(default))]
    pub expression: Option<Expr>,
    /// Source position
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<SourcePosition>,
}

impl Declaration {
    /// Single-variable declaration
    pub fn new(variable: Variable, data_type: impl Into<String>, expression: Option<Expr>) -> Self {
        Self {
            variables: vec![variable],
            data_type: data_type.into(),
            expression,
            position: None,
        }
    }

    /// True if one of the variables has this complete name (`g'`, `V_m`)
    pub fn declares(&self, complete_name: &str) -> bool {
        self.variables.iter().any(|v| v.complete_name() == complete_name)
    }

    /// True if one of the variables has this base name, whatever its order
    pub fn declares_base(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
    }
}

/// State, parameter or internals block
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DeclarationBlock {
    /// Declarations in source order
    pub declarations: Vec<Declaration>,
}

impl DeclarationBlock {
    /// Find the declaration of a complete name
    pub fn find(&self, complete_name: &str) -> Option<&Declaration> {
        self.declarations.iter().find(|d| d.declares(complete_name))
    }

    /// True if some declaration carries this complete name
    pub fn declares(&self, complete_name: &str) -> bool {
        self.find(complete_name).is_some()
    }

    /// Complete names of every declared variable, in order
    pub fn variable_names(&self) -> Vec<String> {
        self.declarations
            .iter()
            .flat_map(|d| d.variables.iter().map(Variable::complete_name))
            .collect()
    }

    /// Base names of every declared variable, derivatives folded in
    pub fn base_names(&self) -> BTreeSet<String> {
        self.declarations
            .iter()
            .flat_map(|d| d.variables.iter().map(|v| v.name.clone()))
            .collect()
    }

    /// Remove every declaration that declares the complete name
    pub fn remove(&mut self, complete_name: &str) -> Vec<Declaration> {
        let (removed, kept) = std::mem::take(&mut self.declarations)
            .into_iter()
            .partition(|d| d.declares(complete_name));
        self.declarations = kept;
        removed
    }

    /// Remove every declaration declaring the base name at any order
    pub fn remove_base(&mut self, name: &str) -> Vec<Declaration> {
        let (removed, kept) = std::mem::take(&mut self.declarations)
            .into_iter()
            .partition(|d| d.declares_base(name));
        self.declarations = kept;
        removed
    }

    /// Remove one variable by complete name; declarations left without variables are dropped
    pub fn remove_variable(&mut self, complete_name: &str) -> bool {
        let before = self.variable_names().len();
        for d in &mut self.declarations {
            d.variables.retain(|v| v.complete_name() != complete_name);
        }
        self.declarations.retain(|d| !d.variables.is_empty());
        self.variable_names().len() != before
    }

    /// Append
    pub fn push(&mut self, declaration: Declaration) {
        self.declarations.push(declaration);
    }

    /// Number of declarations
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    /// True when the block is empty
    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }
}

/// `x' = rhs`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OdeEquation {
    /// Differentiated left-hand side
    pub lhs: Variable,
    /// Right-hand side
    pub rhs: Expr,
    /// Source position
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<SourcePosition>,
}

/// `kernel g = expr` or `kernel g'' = e2, g' = e1, g = e0`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Kernel {
    /// Co-declared kernel variables, highest order first as written
    pub variables: Vec<Variable>,
    /// Defining expression per variable
    pub expressions: Vec<Expr>,
    /// Source position
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<SourcePosition>,
}

impl Kernel {
    /// Single-variable kernel
    pub fn new(variable: Variable, expression: Expr) -> Self {
        Self {
            variables: vec![variable],
            expressions: vec![expression],
            position: None,
        }
    }

    /// True if this kernel defines the base name
    pub fn defines(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
    }

    /// Variables paired with their defining expressions
    pub fn definitions(&self) -> impl Iterator<Item = (&Variable, &Expr)> {
        self.variables.iter().zip(self.expressions.iter())
    }
}

/// `inline name type = expr`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InlineExpression {
    /// Name of the inline expression
    pub name: String,
    /// Declared type
    pub data_type: String,
    /// Definition
    pub expression: Expr,
    /// Source position
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<SourcePosition>,
}

/// Declarations of the equations block
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum EquationDecl {
    /// Ordinary differential equation
    Ode(OdeEquation),
    /// Kernel definition
    Kernel(Kernel),
    /// Inline expression
    Inline(InlineExpression),
}

impl EquationDecl {
    /// Base names introduced on the left-hand side
    pub fn defined_names(&self) -> Vec<String> {
        match self {
            EquationDecl::Ode(ode) => vec![ode.lhs.name.clone()],
            EquationDecl::Kernel(k) => k.variables.iter().map(|v| v.name.clone()).collect(),
            EquationDecl::Inline(i) => vec![i.name.clone()],
        }
    }

    /// True if the declaration introduces the base name
    pub fn defines(&self, name: &str) -> bool {
        self.defined_names().iter().any(|n| n == name)
    }

    /// Right-hand sides
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            EquationDecl::Ode(ode) => vec![&ode.rhs],
            EquationDecl::Kernel(k) => k.expressions.iter().collect(),
            EquationDecl::Inline(i) => vec![&i.expression],
        }
    }

    /// Mutable right-hand sides
    pub fn expressions_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            EquationDecl::Ode(ode) => vec![&mut ode.rhs],
            EquationDecl::Kernel(k) => k.expressions.iter_mut().collect(),
            EquationDecl::Inline(i) => vec![&mut i.expression],
        }
    }
}

/// `equations:` block
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct EquationsBlock {
    /// Declarations in source order
    pub declarations: Vec<EquationDecl>,
}

impl EquationsBlock {
    /// ODE equations
    pub fn odes(&self) -> impl Iterator<Item = &OdeEquation> {
        self.declarations.iter().filter_map(|d| match d {
            EquationDecl::Ode(ode) => Some(ode),
            _ => None,
        })
    }

    /// Mutable ODE equations
    pub fn odes_mut(&mut self) -> impl Iterator<Item = &mut OdeEquation> {
        self.declarations.iter_mut().filter_map(|d| match d {
            EquationDecl::Ode(ode) => Some(ode),
            _ => None,
        })
    }

    /// Kernels
    pub fn kernels(&self) -> impl Iterator<Item = &Kernel> {
        self.declarations.iter().filter_map(|d| match d {
            EquationDecl::Kernel(k) => Some(k),
            _ => None,
        })
    }

    /// Inline expressions
    pub fn inline_expressions(&self) -> impl Iterator<Item = &InlineExpression> {
        self.declarations.iter().filter_map(|d| match d {
            EquationDecl::Inline(i) => Some(i),
            _ => None,
        })
    }

    /// Mutable inline expressions
    pub fn inline_expressions_mut(&mut self) -> impl Iterator<Item = &mut InlineExpression> {
        self.declarations.iter_mut().filter_map(|d| match d {
            EquationDecl::Inline(i) => Some(i),
            _ => None,
        })
    }

    /// Kernel defining the base name
    pub fn kernel(&self, name: &str) -> Option<&Kernel> {
        self.kernels().find(|k| k.defines(name))
    }

    /// Inline expression with this name
    pub fn inline_expression(&self, name: &str) -> Option<&InlineExpression> {
        self.inline_expressions().find(|i| i.name == name)
    }

    /// Remove and return every kernel
    pub fn remove_kernels(&mut self) -> Vec<Kernel> {
        let mut removed = Vec::new();
        self.declarations.retain(|d| match d {
            EquationDecl::Kernel(k) => {
                removed.push(k.clone());
                false
            }
            _ => true,
        });
        removed
    }

    /// Remove and return every ODE
    pub fn remove_odes(&mut self) -> Vec<OdeEquation> {
        let mut removed = Vec::new();
        self.declarations.retain(|d| match d {
            EquationDecl::Ode(ode) => {
                removed.push(ode.clone());
                false
            }
            _ => true,
        });
        removed
    }

    /// Remove and return every declaration defining the base name
    pub fn take_defining(&mut self, name: &str) -> Vec<EquationDecl> {
        let (taken, kept) = std::mem::take(&mut self.declarations)
            .into_iter()
            .partition(|d| d.defines(name));
        self.declarations = kept;
        taken
    }
}

/// Input port flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PortKind {
    /// Spike (event) input
    Spike,
    /// Continuous-time input
    Continuous,
}

/// Entry of the `input:` block
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct InputPort {
    /// Port name
    pub name: String,
    /// Data type (`pA`, `mV`, ...), if annotated
    #[cfg_attr(feature = "serde", serde(default))]
    pub data_type: Option<String>,
    /// Spike or continuous
    pub kind: PortKind,
    /// Source position
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<SourcePosition>,
}

/// Assignment operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AssignOp {
    /// `=`
    Assign,
    /// `+=`
    Add,
    /// `-=`
    Sub,
    /// `*=`
    Mul,
    /// `/=`
    Div,
}

impl AssignOp {
    /// Concrete-syntax symbol
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
        }
    }
}

/// `lhs op rhs`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Assignment {
    /// Target
    pub lhs: Variable,
    /// Operator
    pub op: AssignOp,
    /// Value
    pub rhs: Expr,
    /// Source position
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<SourcePosition>,
}

/// One `if`/`elif` arm
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IfBranch {
    /// Guard
    pub condition: Expr,
    /// Body
    pub body: Block,
}

/// Statements of update and event blocks
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", rename_all = "snake_case"))]
pub enum Stmt {
    /// Assignment
    Assign(Assignment),
    /// Local declaration
    Declare(Declaration),
    /// Bare call such as `integrate_odes()` or `emit_spike()`
    Call {
        /// The call expression
        call: Expr,
    },
    /// `if ...: elif ...: else: end`
    If {
        /// `if` and `elif` arms
        branches: Vec<IfBranch>,
        /// `else` arm
        #[cfg_attr(feature = "serde", serde(default))]
        otherwise: Option<Block>,
    },
    /// `while cond: ... end`
    While {
        /// Guard
        condition: Expr,
        /// Body
        body: Block,
    },
}

/// Statement list
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct Block {
    /// Statements in order
    pub stmts: Vec<Stmt>,
}

impl Block {
    /// Block from statements
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Self { stmts }
    }

    /// True when the block has no statements
    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }
}

/// Link data on the neuron side of a split neuron/synapse pair
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct NeuronPairing {
    /// Name of the paired synapse model
    pub synapse: String,
    /// Synapse state variables now living in the neuron (suffixed names)
    pub transferred_variables: Vec<String>,
    /// Postsynaptic-event statements moved over from the synapse
    pub moved_spike_updates: Vec<Assignment>,
    /// Names pulled in by the dependency closure (without suffix)
    pub recursive_vars_used: Vec<String>,
    /// Data type of every synapse input port, keyed by port name
    pub port_types: BTreeMap<String, Option<String>>,
}

/// Cross-link between the two halves of a split pair
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "side", rename_all = "snake_case"))]
pub enum Pairing {
    /// This model is the derived neuron
    Neuron(NeuronPairing),
    /// This model is the derived synapse
    Synapse {
        /// Name of the paired neuron model
        neuron: String,
    },
}

/// A neuron or synapse model
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Model {
    /// Model name, unique within a compilation run
    pub name: String,
    /// Neuron or synapse
    pub kind: ModelKind,
    /// Source position of the model header
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<SourcePosition>,
    /// `state:`
    #[cfg_attr(feature = "serde", serde(default))]
    pub state: DeclarationBlock,
    /// `parameters:`
    #[cfg_attr(feature = "serde", serde(default))]
    pub parameters: DeclarationBlock,
    /// `internals:`
    #[cfg_attr(feature = "serde", serde(default))]
    pub internals: DeclarationBlock,
    /// `equations:`, absent when the model has none
    #[cfg_attr(feature = "serde", serde(default))]
    pub equations: Option<EquationsBlock>,
    /// `input:`
    #[cfg_attr(feature = "serde", serde(default))]
    pub input_ports: Vec<InputPort>,
    /// `update:`
    #[cfg_attr(feature = "serde", serde(default))]
    pub update: Block,
    /// Presynaptic event handler (synapses)
    #[cfg_attr(feature = "serde", serde(default))]
    pub pre_receive: Option<Block>,
    /// Postsynaptic event handler (synapses)
    #[cfg_attr(feature = "serde", serde(default))]
    pub post_receive: Option<Block>,
    /// Set on models derived by pair splitting
    #[cfg_attr(feature = "serde", serde(default))]
    pub pairing: Option<Pairing>,
    /// Symbol table, rebuilt by `update_scope`
    #[cfg_attr(feature = "serde", serde(skip))]
    scope: SymbolTable,
}

impl Model {
    /// Empty model
    pub fn new(name: impl Into<String>, kind: ModelKind) -> Self {
        Self {
            name: name.into(),
            kind,
            position: None,
            state: DeclarationBlock::default(),
            parameters: DeclarationBlock::default(),
            internals: DeclarationBlock::default(),
            equations: None,
            input_ports: Vec::new(),
            update: Block::default(),
            pre_receive: None,
            post_receive: None,
            pairing: None,
            scope: SymbolTable::default(),
        }
    }

    /// True for synapse models
    pub fn is_synapse(&self) -> bool {
        self.kind == ModelKind::Synapse
    }

    /// Current symbol table (as of the last `update_scope`)
    pub fn scope(&self) -> &SymbolTable {
        &self.scope
    }

    /// Rebuild the symbol table from the current tree
    pub fn update_scope(&mut self) {
        self.scope = SymbolTable::build(self);
    }

    /// Input port by name
    pub fn input_port(&self, name: &str) -> Option<&InputPort> {
        self.input_ports.iter().find(|p| p.name == name)
    }

    /// Equations block, created empty if missing
    pub fn equations_mut(&mut self) -> &mut EquationsBlock {
        self.equations.get_or_insert_with(EquationsBlock::default)
    }

    /// Neuron-side pairing data, if this is a derived neuron
    pub fn neuron_pairing(&self) -> Option<&NeuronPairing> {
        match &self.pairing {
            Some(Pairing::Neuron(p)) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, order: usize) -> Declaration {
        Declaration::new(Variable::with_order(name, order), "real", Some(Expr::number(0.0)))
    }

    #[test]
    fn remove_by_complete_name_keeps_other_orders() {
        let mut block = DeclarationBlock::default();
        block.push(decl("g", 0));
        block.push(decl("g", 1));
        block.push(decl("V_m", 0));
        let removed = block.remove("g'");
        assert_eq!(removed.len(), 1);
        assert_eq!(block.variable_names(), vec!["g", "V_m"]);
    }

    #[test]
    fn base_names_fold_derivatives() {
        let mut block = DeclarationBlock::default();
        block.push(decl("g", 0));
        block.push(decl("g", 1));
        block.push(decl("V_m", 0));
        let names: Vec<String> = block.base_names().into_iter().collect();
        assert_eq!(names, vec!["V_m", "g"]);
        assert_eq!(block.variable_names(), vec!["g", "g'", "V_m"]);
    }

    #[test]
    fn take_defining_partitions_equations() {
        let mut eqs = EquationsBlock::default();
        eqs.declarations.push(EquationDecl::Kernel(Kernel::new(Variable::new("g"), Expr::var("t"))));
        eqs.declarations.push(EquationDecl::Ode(OdeEquation {
            lhs: Variable::with_order("V_m", 1),
            rhs: Expr::var("g"),
            position: None,
        }));
        let taken = eqs.take_defining("V_m");
        assert_eq!(taken.len(), 1);
        assert_eq!(eqs.declarations.len(), 1);
        assert!(eqs.kernel("g").is_some());
    }
}
