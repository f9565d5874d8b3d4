//! Snippet parser for expressions, assignments, declarations and equations.
//!
//! Grammar (loosest to tightest):
//! ```text
//! expr        := or ('?' expr ':' expr)?
//! or          := and ('or' and)*
//! and         := not ('and' not)*
//! not         := 'not' not | comparison
//! comparison  := additive (('<'|'<='|'>'|'>='|'=='|'!=') additive)*
//! additive    := term (('+'|'-') term)*
//! term        := unary (('*'|'/'|'%') unary)*
//! unary       := ('-'|'+') unary | power
//! power       := primary ('**' unary)?
//! primary     := number | 'true' | 'false' | ident '(' args ')' | ident '\''* | '(' expr ')'
//! ```
//!
//! Nodes parsed from a bare snippet carry no position (they count as
//! synthesized). `Parser::with_origin` anchors positions to a source location.

use logos::Logos;

use crate::expr::{BinaryOp, Expr, ExprKind, SourcePosition, UnaryOp, Variable};
use crate::model::{AssignOp, Assignment, Declaration, InlineExpression, Kernel, OdeEquation, Stmt};
use crate::{IrError, Result};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum Tok {
    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),
    #[token("'")]
    Tick,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("**")]
    Pow,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    Ne,
    #[token("=")]
    Assign,
    #[token("+=")]
    AddAssign,
    #[token("-=")]
    SubAssign,
    #[token("*=")]
    MulAssign,
    #[token("/=")]
    DivAssign,
    /// Appended after the last lexed token; never produced by the lexer
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    offset: usize,
    line: u32,
    column: u32,
}

/// 1-based line and character column of a byte offset
fn line_column(input: &str, offset: usize) -> (u32, u32) {
    let before = &input[..offset];
    let line = before.matches('\n').count() as u32 + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    let column = before[line_start..].chars().count() as u32 + 1;
    (line, column)
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    for (result, span) in Tok::lexer(input).spanned() {
        let (line, column) = line_column(input, span.start);
        let tok = result.map_err(|()| IrError::Parse {
            input: input.to_string(),
            column,
            message: format!("unexpected input '{}'", &input[span.clone()]),
        })?;
        tokens.push(Token { tok, offset: span.start, line, column });
    }

    let (line, column) = line_column(input, input.len());
    tokens.push(Token { tok: Tok::Eof, offset: input.len(), line, column });
    Ok(tokens)
}

/// Recursive-descent parser over one snippet
pub struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    origin: Option<SourcePosition>,
}

impl<'a> Parser<'a> {
    /// Tokenize `input`
    pub fn new(input: &'a str) -> Result<Self> {
        Ok(Self {
            input,
            tokens: tokenize(input)?,
            pos: 0,
            origin: None,
        })
    }

    /// Give parsed nodes positions relative to `origin`
    pub fn with_origin(mut self, origin: SourcePosition) -> Self {
        self.origin = Some(origin);
        self
    }

    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn bump(&mut self) -> usize {
        let i = self.pos;
        if i + 1 < self.tokens.len() {
            self.pos += 1;
        }
        i
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(s) if s == word)
    }

    fn error(&self, message: impl Into<String>) -> IrError {
        IrError::Parse {
            input: self.input.to_string(),
            column: self.tokens[self.pos].column,
            message: message.into(),
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> Result<()> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn position_at(&self, index: usize) -> Option<SourcePosition> {
        let origin = self.origin?;
        let token = &self.tokens[index];
        Some(if token.line == 1 {
            SourcePosition::new(origin.line, origin.column + token.column - 1)
        } else {
            SourcePosition::new(origin.line + token.line - 1, token.column)
        })
    }

    fn node(&self, start: usize, kind: ExprKind) -> Expr {
        Expr {
            kind,
            position: self.position_at(start),
        }
    }

    /// Fail unless every token was consumed
    pub fn finish(&self) -> Result<()> {
        if *self.peek() == Tok::Eof {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }

    /// Parse one expression
    pub fn expression(&mut self) -> Result<Expr> {
        let start = self.pos;
        let condition = self.or()?;
        if self.eat(&Tok::Question) {
            let if_true = self.expression()?;
            self.expect(&Tok::Colon, "':'")?;
            let if_false = self.expression()?;
            return Ok(self.node(
                start,
                ExprKind::Conditional {
                    condition: Box::new(condition),
                    if_true: Box::new(if_true),
                    if_false: Box::new(if_false),
                },
            ));
        }
        Ok(condition)
    }

    fn binary(&self, start: usize, op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        self.node(start, ExprKind::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) })
    }

    fn or(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mut lhs = self.and()?;
        while self.at_keyword("or") {
            self.bump();
            let rhs = self.and()?;
            lhs = self.binary(start, BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mut lhs = self.not()?;
        while self.at_keyword("and") {
            self.bump();
            let rhs = self.not()?;
            lhs = self.binary(start, BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn not(&mut self) -> Result<Expr> {
        let start = self.pos;
        if self.at_keyword("not") {
            self.bump();
            let operand = self.not()?;
            return Ok(self.node(start, ExprKind::Unary { op: UnaryOp::Not, operand: Box::new(operand) }));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Tok::Lt => BinaryOp::Lt,
                Tok::Le => BinaryOp::Le,
                Tok::Gt => BinaryOp::Gt,
                Tok::Ge => BinaryOp::Ge,
                Tok::EqEq => BinaryOp::Eq,
                Tok::Ne => BinaryOp::Ne,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.additive()?;
            lhs = self.binary(start, op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinaryOp::Add,
                Tok::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.term()?;
            lhs = self.binary(start, op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr> {
        let start = self.pos;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinaryOp::Mul,
                Tok::Slash => BinaryOp::Div,
                Tok::Percent => BinaryOp::Mod,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = self.binary(start, op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr> {
        let start = self.pos;
        let op = match self.peek() {
            Tok::Minus => UnaryOp::Neg,
            Tok::Plus => UnaryOp::Plus,
            _ => return self.power(),
        };
        self.bump();
        let operand = self.unary()?;
        Ok(self.node(start, ExprKind::Unary { op, operand: Box::new(operand) }))
    }

    fn power(&mut self) -> Result<Expr> {
        let start = self.pos;
        let base = self.primary()?;
        if self.eat(&Tok::Pow) {
            let exponent = self.unary()?;
            return Ok(self.binary(start, BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        let start = self.pos;
        match self.peek().clone() {
            Tok::Number(value) => {
                self.bump();
                Ok(self.node(start, ExprKind::Number(value)))
            }
            Tok::Ident(name) => match name.as_str() {
                "true" | "false" => {
                    self.bump();
                    Ok(self.node(start, ExprKind::Bool(name == "true")))
                }
                "and" | "or" | "not" => Err(self.error(format!("unexpected keyword '{}'", name))),
                _ => {
                    self.bump();
                    if self.eat(&Tok::LParen) {
                        let mut args = Vec::new();
                        if !self.eat(&Tok::RParen) {
                            loop {
                                args.push(self.expression()?);
                                if !self.eat(&Tok::Comma) {
                                    break;
                                }
                            }
                            self.expect(&Tok::RParen, "')'")?;
                        }
                        return Ok(self.node(start, ExprKind::Call { name, args }));
                    }
                    let var = self.finish_variable(start, name);
                    Ok(self.node(start, ExprKind::Variable(var)))
                }
            },
            Tok::LParen => {
                self.bump();
                let inner = self.expression()?;
                self.expect(&Tok::RParen, "')'")?;
                Ok(self.node(start, ExprKind::Paren(Box::new(inner))))
            }
            _ => Err(self.error("expected an expression")),
        }
    }

    fn finish_variable(&mut self, start: usize, name: String) -> Variable {
        let mut order = 0;
        while self.eat(&Tok::Tick) {
            order += 1;
        }
        Variable {
            position: self.position_at(start),
            ..Variable::with_order(name, order)
        }
    }

    /// Parse a variable reference (`name`, `name''`)
    pub fn variable(&mut self) -> Result<Variable> {
        let start = self.pos;
        match self.peek().clone() {
            Tok::Ident(name) if !matches!(name.as_str(), "and" | "or" | "not" | "true" | "false") => {
                self.bump();
                Ok(self.finish_variable(start, name))
            }
            _ => Err(self.error("expected a variable name")),
        }
    }

    /// Parse `lhs op rhs`
    pub fn assignment(&mut self) -> Result<Assignment> {
        let lhs = self.variable()?;
        let op = match self.peek() {
            Tok::Assign => AssignOp::Assign,
            Tok::AddAssign => AssignOp::Add,
            Tok::SubAssign => AssignOp::Sub,
            Tok::MulAssign => AssignOp::Mul,
            Tok::DivAssign => AssignOp::Div,
            _ => return Err(self.error("expected an assignment operator")),
        };
        self.bump();
        let rhs = self.expression()?;
        Ok(Assignment { position: lhs.position, lhs, op, rhs })
    }

    /// Parse `a, b type [= expr]`
    pub fn declaration(&mut self) -> Result<Declaration> {
        let mut variables = vec![self.variable()?];
        while self.eat(&Tok::Comma) {
            variables.push(self.variable()?);
        }

        let type_start = self.tokens[self.pos].offset;
        while !matches!(self.peek(), Tok::Assign | Tok::Eof) {
            self.bump();
        }
        let data_type = self.input[type_start..self.tokens[self.pos].offset].trim();
        if data_type.is_empty() {
            return Err(self.error("expected a data type"));
        }
        let data_type = data_type.to_string();

        let expression = if self.eat(&Tok::Assign) {
            Some(self.expression()?)
        } else {
            None
        };
        Ok(Declaration {
            position: variables[0].position,
            variables,
            data_type,
            expression,
        })
    }

    /// Parse `x' = rhs` (order at least 1)
    pub fn ode(&mut self) -> Result<OdeEquation> {
        let lhs = self.variable()?;
        if lhs.differential_order == 0 {
            return Err(self.error("left-hand side of an ODE must be differentiated"));
        }
        self.expect(&Tok::Assign, "'='")?;
        let rhs = self.expression()?;
        Ok(OdeEquation { position: lhs.position, lhs, rhs })
    }

    /// Parse `g'' = e2, g' = e1, ...`
    pub fn kernel(&mut self) -> Result<Kernel> {
        let mut variables = Vec::new();
        let mut expressions = Vec::new();
        loop {
            variables.push(self.variable()?);
            self.expect(&Tok::Assign, "'='")?;
            expressions.push(self.expression()?);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        Ok(Kernel {
            position: variables[0].position,
            variables,
            expressions,
        })
    }

    /// Parse an assignment, or a bare call used as a statement
    pub fn statement(&mut self) -> Result<Stmt> {
        let is_assignment = self.tokens[self.pos..].iter().skip(1).find(|t| t.tok != Tok::Tick).map_or(
            false,
            |t| {
                matches!(
                    t.tok,
                    Tok::Assign | Tok::AddAssign | Tok::SubAssign | Tok::MulAssign | Tok::DivAssign
                )
            },
        );
        if is_assignment {
            return Ok(Stmt::Assign(self.assignment()?));
        }
        let call = self.expression()?;
        if !matches!(call.kind, ExprKind::Call { .. }) {
            return Err(self.error("only assignments and calls can stand alone"));
        }
        Ok(Stmt::Call { call })
    }
}

fn parse_with<'t, T>(text: &'t str, f: impl FnOnce(&mut Parser<'t>) -> Result<T>) -> Result<T> {
    let mut parser = Parser::new(text)?;
    let value = f(&mut parser)?;
    parser.finish()?;
    Ok(value)
}

/// Parse a complete expression
pub fn parse_expression(text: &str) -> Result<Expr> {
    parse_with(text, Parser::expression)
}

/// Parse a complete variable reference
pub fn parse_variable(text: &str) -> Result<Variable> {
    parse_with(text, Parser::variable)
}

/// Parse a complete assignment
pub fn parse_assignment(text: &str) -> Result<Assignment> {
    parse_with(text, Parser::assignment)
}

/// Parse a complete declaration
pub fn parse_declaration(text: &str) -> Result<Declaration> {
    parse_with(text, Parser::declaration)
}

/// Parse an ODE
pub fn parse_ode(text: &str) -> Result<OdeEquation> {
    parse_with(text, Parser::ode)
}

/// Parse a kernel definition (without the `kernel` keyword)
pub fn parse_kernel(text: &str) -> Result<Kernel> {
    parse_with(text, Parser::kernel)
}

/// Parse `name type = expr` as an inline expression
pub fn parse_inline(text: &str) -> Result<InlineExpression> {
    let decl = parse_declaration(text)?;
    let single = |message: &str| IrError::Parse {
        input: text.to_string(),
        column: 1,
        message: message.to_string(),
    };
    let [var] = decl.variables.as_slice() else {
        return Err(single("an inline expression declares exactly one name"));
    };
    if var.differential_order != 0 {
        return Err(single("an inline expression name cannot be differentiated"));
    }
    let expression = decl.expression.ok_or_else(|| single("an inline expression needs a definition"))?;
    Ok(InlineExpression {
        name: var.name.clone(),
        data_type: decl.data_type,
        expression,
        position: decl.position,
    })
}

/// Parse a statement (assignment or call)
pub fn parse_statement(text: &str) -> Result<Stmt> {
    parse_with(text, Parser::statement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssignOp;

    fn lex(source: &str) -> Vec<Tok> {
        Tok::lexer(source).filter_map(|result| result.ok()).collect()
    }

    #[test]
    fn lexer_prefers_longest_operator() {
        assert_eq!(
            lex("a *= b ** c <= d"),
            vec![
                Tok::Ident("a".into()),
                Tok::MulAssign,
                Tok::Ident("b".into()),
                Tok::Pow,
                Tok::Ident("c".into()),
                Tok::Le,
                Tok::Ident("d".into()),
            ]
        );
        assert_eq!(lex("g__X__in$1''"), vec![Tok::Ident("g__X__in$1".into()), Tok::Tick, Tok::Tick]);
    }

    #[test]
    fn lexer_numbers() {
        assert_eq!(
            lex("1 2.5 1. .25 3e2 4.0E-1"),
            vec![
                Tok::Number(1.0),
                Tok::Number(2.5),
                Tok::Number(1.0),
                Tok::Number(0.25),
                Tok::Number(300.0),
                Tok::Number(0.4),
            ]
        );
    }

    #[test]
    fn lexer_errors_and_positions() {
        let results: Vec<_> = Tok::lexer("a @ b").collect();
        assert_eq!(results.len(), 3);
        assert!(results[1].is_err());
        match parse_expression("a + @") {
            Err(IrError::Parse { column, message, .. }) => {
                assert_eq!(column, 5);
                assert!(message.contains('@'), "{}", message);
            }
            other => panic!("unexpected result {:?}", other),
        }

        let tokens = tokenize("x +\n  yy").expect("tokenizes");
        let yy = &tokens[2];
        assert_eq!((yy.line, yy.column, yy.offset), (2, 3, 6));
        assert_eq!(tokens.last().map(|t| &t.tok), Some(&Tok::Eof));
    }

    #[test]
    fn precedence_and_associativity() {
        let e = parse_expression("a - b - c * d ** e ** f").expect("parses");
        assert_eq!(e.to_string(), "a - b - c * d ** e ** f");
        let e = parse_expression("a - (b - c)").expect("parses");
        assert_eq!(e.to_string(), "a - (b - c)");
        let e = parse_expression("-x ** 2").expect("parses");
        assert!(matches!(e.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
    }

    #[test]
    fn numbers_ticks_and_calls() {
        let e = parse_expression("1.5e-3 * g'' + convolve(g, spikes) / 1.").expect("parses");
        let vars: Vec<String> = e.variables().iter().map(|v| v.complete_name()).collect();
        assert_eq!(vars, vec!["g''", "g", "spikes"]);
        assert!(e.contains_call("convolve"));
        assert_eq!(parse_expression(".5").expect("parses").as_number(), Some(0.5));
    }

    #[test]
    fn conditional_and_logic() {
        let e = parse_expression("x > 0 and not y ? 1 : 2").expect("parses");
        assert!(matches!(e.kind, ExprKind::Conditional { .. }));
    }

    #[test]
    fn assignment_operators() {
        let a = parse_assignment("g__X__spikes__d += (spikes) * (e / tau)").expect("parses");
        assert_eq!(a.op, AssignOp::Add);
        assert_eq!(a.lhs.name, "g__X__spikes__d");
        assert_eq!(a.to_string(), "g__X__spikes__d += (spikes) * (e / tau)");
    }

    #[test]
    fn declaration_keeps_compound_type() {
        let d = parse_declaration("a, b' pA/ms = -1").expect("parses");
        assert_eq!(d.variables.len(), 2);
        assert_eq!(d.variables[1].differential_order, 1);
        assert_eq!(d.data_type, "pA/ms");
        assert_eq!(d.expression.and_then(|e| e.as_number()), Some(-1.0));
        assert!(parse_declaration("x = 1").is_err());
    }

    #[test]
    fn statements() {
        assert!(matches!(parse_statement("integrate_odes()"), Ok(Stmt::Call { .. })));
        assert!(matches!(parse_statement("w' = w + 1"), Ok(Stmt::Assign(_))));
        assert!(parse_statement("w + 1").is_err());
    }

    #[test]
    fn errors_carry_column() {
        match parse_expression("a + * b") {
            Err(IrError::Parse { column, .. }) => assert_eq!(column, 5),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(parse_expression("a b").is_err());
        assert!(parse_expression("f(a,").is_err());
    }

    #[test]
    fn origin_positions() {
        let mut p = Parser::new("x + y").expect("tokenizes").with_origin(SourcePosition::new(4, 10));
        let e = p.expression().expect("parses");
        assert_eq!(e.position, Some(SourcePosition::new(4, 10)));
        let vars = e.variables();
        assert_eq!(vars[1].position, Some(SourcePosition::new(4, 14)));
        assert_eq!(parse_expression("x").expect("parses").position, None);
    }
}
