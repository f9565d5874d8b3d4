#![doc = "Neuron/synapse model IR - the AST that the model compiler analyses and rewrites.\n\nContents:\n- Closed, tagged-variant nodes for models, blocks, declarations, equations, statements and expressions\n- Explicit walkers (`walk`, `walk_mut`, variable visitors) instead of double dispatch\n- Symbol tables rebuilt on demand from a model (no back-pointers into the tree)\n- A snippet parser for expressions, assignments and declarations (solver output, synthesized statements)\n- A precedence-aware printer and a textual model report (`Model::to_text`)\n\nConcrete-syntax parsing of whole model files happens in the front end; models are\nconstructed through `ModelBuilder` or deserialized (feature `serde`).\n"]
#![warn(missing_docs)]

pub mod builder;
pub mod expr;
pub mod model;
pub mod parse;
pub mod print;
pub mod symbols;
pub mod walk;

pub use builder::ModelBuilder;
pub use expr::{BinaryOp, Expr, ExprKind, SourcePosition, UnaryOp, Variable, VariableScope};
pub use model::{
    AssignOp, Assignment, Block, Declaration, DeclarationBlock, EquationDecl, EquationsBlock,
    IfBranch, InlineExpression, InputPort, Kernel, Model, ModelKind, NeuronPairing, OdeEquation,
    Pairing, PortKind, Stmt,
};
pub use parse::{
    parse_assignment, parse_declaration, parse_expression, parse_inline, parse_kernel, parse_ode,
    parse_statement, parse_variable, Parser,
};
pub use symbols::{BlockType, Symbol, SymbolKind, SymbolTable};
pub use walk::VarSite;

/// IR-wide result type
pub type Result<T> = std::result::Result<T, IrError>;

/// IR errors
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum IrError {
    /// Snippet could not be parsed
    #[error("cannot parse '{input}' at column {column}: {message}")]
    Parse {
        /// Text handed to the parser
        input: String,
        /// 1-based column of the offending token
        column: u32,
        /// What went wrong
        message: String,
    },

    /// Generic IR error
    #[error("IR error: {0}")]
    Message(String),
}
