//! Expression nodes and variable references

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Position of a node in the model source (1-based line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourcePosition {
    /// Line number
    pub line: u32,
    /// Column number
    pub column: u32,
}

impl SourcePosition {
    /// Create a position
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Which model a variable reference belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VariableScope {
    /// Resolved in the model containing the reference
    #[default]
    Local,
    /// Refers to a variable living in another model (after pair splitting)
    External {
        /// Name of the model that owns the variable
        model: String,
    },
}

/// A (possibly differentiated) variable reference
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Variable {
    /// Base name without derivative ticks
    pub name: String,
    /// Number of derivative ticks
    #[cfg_attr(feature = "serde", serde(default))]
    pub differential_order: usize,
    /// Source position; `None` for synthesized nodes
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<SourcePosition>,
    /// Set when the variable names a postsynaptic port of a paired neuron
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_post_port: bool,
    /// Owning model
    #[cfg_attr(feature = "serde", serde(default))]
    pub scope: VariableScope,
}

impl Variable {
    /// Plain local variable of order 0
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_order(name, 0)
    }

    /// Local variable with the given derivative order
    pub fn with_order(name: impl Into<String>, differential_order: usize) -> Self {
        Self {
            name: name.into(),
            differential_order,
            position: None,
            is_post_port: false,
            scope: VariableScope::Local,
        }
    }

    /// Attach a source position
    pub fn at(mut self, position: SourcePosition) -> Self {
        self.position = Some(position);
        self
    }

    /// Name plus one `'` per derivative order
    pub fn complete_name(&self) -> String {
        let mut s = self.name.clone();
        s.extend(std::iter::repeat('\'').take(self.differential_order));
        s
    }

    /// True when the variable lives in another model
    pub fn is_external(&self) -> bool {
        matches!(self.scope, VariableScope::External { .. })
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Plus,
    /// `not x`
    Not,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BinaryOp {
    /// `**`
    Pow,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `and`
    And,
    /// `or`
    Or,
}

impl BinaryOp {
    /// Concrete-syntax symbol
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Pow => "**",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    /// Binding strength; higher binds tighter
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 2,
            BinaryOp::And => 3,
            BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::Eq
            | BinaryOp::Ne => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 7,
            BinaryOp::Pow => 9,
        }
    }

    /// Only `**` associates to the right
    pub fn is_right_associative(self) -> bool {
        matches!(self, BinaryOp::Pow)
    }
}

/// Expression variants
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExprKind {
    /// Numeric literal
    Number(f64),
    /// Boolean literal
    Bool(bool),
    /// Variable reference
    Variable(Variable),
    /// Function call such as `convolve(g, spikes)` or `exp(x)`
    Call {
        /// Callee name
        name: String,
        /// Arguments in order
        args: Vec<Expr>,
    },
    /// Unary operation
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Binary operation
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// `condition ? if_true : if_false`
    Conditional {
        /// Condition
        condition: Box<Expr>,
        /// Value when the condition holds
        if_true: Box<Expr>,
        /// Value otherwise
        if_false: Box<Expr>,
    },
    /// Explicit parentheses
    Paren(Box<Expr>),
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Expr {
    /// Node variant
    pub kind: ExprKind,
    /// Source position; `None` for synthesized nodes
    #[cfg_attr(feature = "serde", serde(default))]
    pub position: Option<SourcePosition>,
}

impl Expr {
    /// Wrap a kind without position
    pub fn new(kind: ExprKind) -> Self {
        Self { kind, position: None }
    }

    /// Numeric literal
    pub fn number(value: f64) -> Self {
        Self::new(ExprKind::Number(value))
    }

    /// Variable reference
    pub fn variable(var: Variable) -> Self {
        Self::new(ExprKind::Variable(var))
    }

    /// Local order-0 variable reference
    pub fn var(name: impl Into<String>) -> Self {
        Self::variable(Variable::new(name))
    }

    /// Function call
    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call { name: name.into(), args })
    }

    /// Unary operation
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::new(ExprKind::Unary { op, operand: Box::new(operand) })
    }

    /// Binary operation
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::new(ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    /// Parenthesized expression
    pub fn paren(inner: Expr) -> Self {
        Self::new(ExprKind::Paren(Box::new(inner)))
    }

    /// Attach a source position to the root node
    pub fn at(mut self, position: SourcePosition) -> Self {
        self.position = Some(position);
        self
    }

    /// The variable if this node is a bare variable reference
    pub fn as_variable(&self) -> Option<&Variable> {
        match &self.kind {
            ExprKind::Variable(v) => Some(v),
            _ => None,
        }
    }

    /// Call arguments if this node calls `name`
    pub fn call_args(&self, name: &str) -> Option<&[Expr]> {
        match &self.kind {
            ExprKind::Call { name: callee, args } if callee == name => Some(args),
            _ => None,
        }
    }

    /// True if this node (not a descendant) calls `name`
    pub fn is_call_to(&self, name: &str) -> bool {
        self.call_args(name).is_some()
    }

    /// Numeric value if this node is a literal (parentheses and unary signs looked through)
    pub fn as_number(&self) -> Option<f64> {
        match &self.kind {
            ExprKind::Number(v) => Some(*v),
            ExprKind::Paren(inner) => inner.as_number(),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => operand.as_number().map(|v| -v),
            ExprKind::Unary { op: UnaryOp::Plus, operand } => operand.as_number(),
            _ => None,
        }
    }

    /// Direct children in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Number(_) | ExprKind::Bool(_) | ExprKind::Variable(_) => Vec::new(),
            ExprKind::Call { args, .. } => args.iter().collect(),
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            ExprKind::Conditional { condition, if_true, if_false } => {
                vec![condition, if_true, if_false]
            }
            ExprKind::Paren(inner) => vec![inner],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Number(_) | ExprKind::Bool(_) | ExprKind::Variable(_) => Vec::new(),
            ExprKind::Call { args, .. } => args.iter_mut().collect(),
            ExprKind::Unary { operand, .. } => vec![operand.as_mut()],
            ExprKind::Binary { lhs, rhs, .. } => vec![lhs.as_mut(), rhs.as_mut()],
            ExprKind::Conditional { condition, if_true, if_false } => {
                vec![condition.as_mut(), if_true.as_mut(), if_false.as_mut()]
            }
            ExprKind::Paren(inner) => vec![inner.as_mut()],
        }
    }

    /// Pre-order traversal
    pub fn walk<'a, F: FnMut(&'a Expr)>(&'a self, f: &mut F) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Post-order mutable traversal.
    ///
    /// Children are visited before their parent, so a node replaced by `f`
    /// is not descended into again.
    pub fn walk_mut<F: FnMut(&mut Expr)>(&mut self, f: &mut F) {
        for child in self.children_mut() {
            child.walk_mut(f);
        }
        f(self);
    }

    /// Every variable referenced in this expression, in pre-order
    pub fn variables(&self) -> Vec<&Variable> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if let ExprKind::Variable(v) = &e.kind {
                out.push(v);
            }
        });
        out
    }

    /// Apply `f` to every variable reference
    pub fn for_each_variable_mut<F: FnMut(&mut Variable)>(&mut self, f: &mut F) {
        self.walk_mut(&mut |e| {
            if let ExprKind::Variable(v) = &mut e.kind {
                f(v);
            }
        });
    }

    /// All calls to `name` contained in this expression, in pre-order
    pub fn calls_to(&self, name: &str) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.walk(&mut |e| {
            if e.is_call_to(name) {
                out.push(e);
            }
        });
        out
    }

    /// True if any node in this expression calls `name`
    pub fn contains_call(&self, name: &str) -> bool {
        !self.calls_to(name).is_empty()
    }

    /// True if `other` occurs as a subtree (compared by printed form)
    pub fn contains_subtree(&self, other: &Expr) -> bool {
        let needle = other.to_string();
        let mut found = false;
        self.walk(&mut |e| {
            if !found && e.to_string() == needle {
                found = true;
            }
        });
        found
    }

    /// Give every node (and every variable) without a position the given one
    pub fn fill_positions(&mut self, position: Option<SourcePosition>) {
        if position.is_none() {
            return;
        }
        self.walk_mut(&mut |e| {
            if e.position.is_none() {
                e.position = position;
            }
            if let ExprKind::Variable(v) = &mut e.kind {
                if v.position.is_none() {
                    v.position = position;
                }
            }
        });
    }

    /// Drop redundant parentheses around a bare atom at the root
    pub fn strip_parens(self) -> Expr {
        match self.kind {
            ExprKind::Paren(inner) => inner.strip_parens(),
            kind => Expr { kind, position: self.position },
        }
    }
}

impl From<Variable> for Expr {
    fn from(v: Variable) -> Self {
        let position = v.position;
        Expr { kind: ExprKind::Variable(v), position }
    }
}
