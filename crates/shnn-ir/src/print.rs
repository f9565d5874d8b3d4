//! Textual printer: precedence-aware expressions and the model report

use std::fmt::{self, Write as _};

use crate::expr::{Expr, ExprKind, UnaryOp, Variable, VariableScope};
use crate::model::{
    AssignOp, Assignment, Block, Declaration, DeclarationBlock, EquationDecl, Model, Pairing,
    PortKind, Stmt,
};

const ATOM: u8 = 10;
const UNARY_SIGN: u8 = 8;
const UNARY_NOT: u8 = 4;
const CONDITIONAL: u8 = 1;

fn precedence(e: &Expr) -> u8 {
    match &e.kind {
        ExprKind::Conditional { .. } => CONDITIONAL,
        ExprKind::Binary { op, .. } => op.precedence(),
        ExprKind::Unary { op: UnaryOp::Not, .. } => UNARY_NOT,
        ExprKind::Unary { .. } => UNARY_SIGN,
        ExprKind::Number(v) if v.is_sign_negative() => UNARY_SIGN,
        _ => ATOM,
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, e: &Expr, parens: bool) -> fmt::Result {
    if parens {
        write!(f, "({})", e)
    } else {
        write!(f, "{}", e)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.complete_name())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Number(v) => write!(f, "{:?}", v),
            ExprKind::Bool(b) => write!(f, "{}", b),
            ExprKind::Variable(v) => write!(f, "{}", v),
            ExprKind::Call { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            ExprKind::Unary { op, operand } => {
                let (symbol, own) = match op {
                    UnaryOp::Neg => ("-", UNARY_SIGN),
                    UnaryOp::Plus => ("+", UNARY_SIGN),
                    UnaryOp::Not => ("not ", UNARY_NOT),
                };
                f.write_str(symbol)?;
                write_operand(f, operand, precedence(operand) < own)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let own = op.precedence();
                let (lp, rp) = (precedence(lhs), precedence(rhs));
                let right_assoc = op.is_right_associative();
                write_operand(f, lhs, lp < own || (lp == own && right_assoc))?;
                write!(f, " {} ", op.symbol())?;
                write_operand(f, rhs, rp < own || (rp == own && !right_assoc))
            }
            ExprKind::Conditional { condition, if_true, if_false } => {
                write_operand(f, condition, precedence(condition) <= CONDITIONAL)?;
                f.write_str(" ? ")?;
                write_operand(f, if_true, precedence(if_true) <= CONDITIONAL)?;
                f.write_str(" : ")?;
                write_operand(f, if_false, precedence(if_false) <= CONDITIONAL)
            }
            ExprKind::Paren(inner) => write!(f, "({})", inner),
        }
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, v) in self.variables.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, " {}", self.data_type)?;
        if let Some(e) = &self.expression {
            write!(f, " = {}", e)?;
        }
        Ok(())
    }
}

impl fmt::Display for EquationDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquationDecl::Ode(ode) => write!(f, "{} = {}", ode.lhs, ode.rhs),
            EquationDecl::Kernel(k) => {
                f.write_str("kernel ")?;
                for (i, (v, e)) in k.definitions().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = {}", v, e)?;
                }
                Ok(())
            }
            EquationDecl::Inline(i) => write!(f, "inline {} {} = {}", i.name, i.data_type, i.expression),
        }
    }
}

struct Report {
    out: String,
    depth: usize,
}

impl Report {
    fn line(&mut self, text: impl fmt::Display) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
        // writing into a String cannot fail
        let _ = writeln!(self.out, "{}", text);
    }

    fn open(&mut self, header: impl fmt::Display) {
        self.line(format_args!("{}:", header));
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        self.line("end");
    }

    fn declarations(&mut self, header: &str, block: &DeclarationBlock) {
        if block.is_empty() {
            return;
        }
        self.open(header);
        for d in &block.declarations {
            self.line(d);
        }
        self.close();
    }

    fn block(&mut self, header: &str, block: &Block) {
        self.open(header);
        self.stmts(block);
        self.close();
    }

    fn stmts(&mut self, block: &Block) {
        for stmt in &block.stmts {
            match stmt {
                Stmt::Assign(a) => self.line(a),
                Stmt::Declare(d) => self.line(d),
                Stmt::Call { call } => self.line(call),
                Stmt::If { branches, otherwise } => {
                    for (i, branch) in branches.iter().enumerate() {
                        let keyword = if i == 0 { "if" } else { "elif" };
                        self.line(format_args!("{} {}:", keyword, branch.condition));
                        self.depth += 1;
                        self.stmts(&branch.body);
                        self.depth -= 1;
                    }
                    if let Some(body) = otherwise {
                        self.line("else:");
                        self.depth += 1;
                        self.stmts(body);
                        self.depth -= 1;
                    }
                    self.line("end");
                }
                Stmt::While { condition, body } => {
                    self.open(format_args!("while {}", condition));
                    self.stmts(body);
                    self.close();
                }
            }
        }
    }
}

impl Model {
    /// Render the model as NESTML-like text
    pub fn to_text(&self) -> String {
        let mut r = Report { out: String::new(), depth: 0 };
        r.open(format_args!("{} {}", self.kind.keyword(), self.name));

        match &self.pairing {
            Some(Pairing::Neuron(p)) => {
                r.line(format_args!("# paired with synapse {}", p.synapse));
                if !p.transferred_variables.is_empty() {
                    r.line(format_args!("# transferred: {}", p.transferred_variables.join(", ")));
                }
            }
            Some(Pairing::Synapse { neuron }) => r.line(format_args!("# paired with neuron {}", neuron)),
            None => {}
        }

        r.declarations("state", &self.state);
        if let Some(eqs) = &self.equations {
            r.open("equations");
            for d in &eqs.declarations {
                r.line(d);
            }
            r.close();
        }
        r.declarations("parameters", &self.parameters);
        r.declarations("internals", &self.internals);

        if !self.input_ports.is_empty() {
            r.open("input");
            for port in &self.input_ports {
                let kind = match port.kind {
                    PortKind::Spike => "spike",
                    PortKind::Continuous => "continuous",
                };
                match &port.data_type {
                    Some(t) => r.line(format_args!("{} {} <- {}", port.name, t, kind)),
                    None => r.line(format_args!("{} <- {}", port.name, kind)),
                }
            }
            r.close();
        }

        if !self.update.is_empty() {
            r.block("update", &self.update);
        }
        if let Some(b) = &self.pre_receive {
            r.block("preReceive", b);
        }
        if let Some(b) = &self.post_receive {
            r.block("postReceive", b);
        }
        if let Some(p) = self.neuron_pairing() {
            if !p.moved_spike_updates.is_empty() {
                r.open("# moved postReceive");
                for a in &p.moved_spike_updates {
                    r.line(a);
                }
                r.close();
            }
        }

        r.close();
        r.out
    }
}

/// Printed form of a variable including its owning model, for diagnostics
pub fn qualified_name(v: &Variable) -> String {
    match &v.scope {
        VariableScope::Local => v.complete_name(),
        VariableScope::External { model } => format!("{}.{}", model, v.complete_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;
    use crate::expr::BinaryOp;
    use crate::parse::parse_expression;

    #[test]
    fn parenthesizes_by_precedence() {
        let sum = Expr::binary(BinaryOp::Add, Expr::var("a"), Expr::var("b"));
        let e = Expr::binary(BinaryOp::Mul, sum.clone(), Expr::var("c"));
        assert_eq!(e.to_string(), "(a + b) * c");
        let e = Expr::binary(BinaryOp::Pow, Expr::unary(UnaryOp::Neg, Expr::var("x")), Expr::number(2.0));
        assert_eq!(e.to_string(), "(-x) ** 2.0");
        let e = Expr::binary(BinaryOp::Sub, Expr::var("a"), sum);
        assert_eq!(e.to_string(), "a - (a + b)");
    }

    #[test]
    fn printed_form_reparses_to_same_text() {
        for text in ["-(a + b) / c ** 2.0", "x > 0.0 ? exp(-t / tau) : 1.0", "not (a and b) or c"] {
            let once = parse_expression(text).expect("parses").to_string();
            let twice = parse_expression(&once).expect("reparses").to_string();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn report_lists_blocks() {
        let model = ModelBuilder::neuron("iaf")
            .state("V_m mV = -70")
            .parameter("tau ms = 10")
            .ode("V_m' = -V_m / tau")
            .spike_input("spikes", Some("pA"))
            .update("integrate_odes()")
            .build()
            .expect("model builds");
        let text = model.to_text();
        assert!(text.starts_with("neuron iaf:\n"));
        assert!(text.contains("  state:\n    V_m mV = -70.0\n  end\n"));
        assert!(text.contains("V_m' = -V_m / tau"));
        assert!(text.contains("spikes pA <- spike"));
        assert!(text.contains("integrate_odes()"));
    }

    #[test]
    fn qualified_names() {
        let mut v = Variable::new("w__for_stdp");
        assert_eq!(qualified_name(&v), "w__for_stdp");
        v.scope = VariableScope::External { model: "iaf__with_stdp".into() };
        assert_eq!(qualified_name(&v), "iaf__with_stdp.w__for_stdp");
    }
}
