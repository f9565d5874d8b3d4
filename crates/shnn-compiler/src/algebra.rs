//! Symbolic algebra capability used for delta-factor isolation.
//!
//! Only two operations are needed: expanding an expression into a sum of
//! products, and picking the additive terms that contain a given subterm.
//! `ExpansionAlgebra` implements both over the IR directly; any other
//! implementation of `SymbolicAlgebra` can be plugged into the pipeline.

use std::collections::BTreeMap;

use shnn_ir::{BinaryOp, Expr, ExprKind, UnaryOp};

/// Pluggable computer-algebra operations
pub trait SymbolicAlgebra {
    /// Multiply out products of sums and collect like terms
    fn expand(&self, expr: &Expr) -> Expr;

    /// Additive terms of the expanded expression that contain `subterm`
    fn isolate_additive_terms_containing(&self, expr: &Expr, subterm: &Expr) -> Vec<Expr>;
}

/// Sum-of-products expansion over the IR
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpansionAlgebra;

/// `coeff * factors... / divisors...`
#[derive(Debug, Clone)]
struct Term {
    coeff: f64,
    factors: Vec<Expr>,
    divisors: Vec<Expr>,
}

impl Term {
    fn constant(coeff: f64) -> Self {
        Self { coeff, factors: Vec::new(), divisors: Vec::new() }
    }

    fn atom(e: &Expr) -> Self {
        Self { coeff: 1.0, factors: vec![e.clone()], divisors: Vec::new() }
    }

    fn negated(mut self) -> Self {
        self.coeff = -self.coeff;
        self
    }

    fn times(&self, other: &Term) -> Term {
        let mut t = Term {
            coeff: self.coeff * other.coeff,
            factors: self.factors.iter().chain(&other.factors).cloned().collect(),
            divisors: self.divisors.iter().chain(&other.divisors).cloned().collect(),
        };
        t.cancel();
        t
    }

    fn divided_by(&self, other: &Term) -> Term {
        let mut t = Term {
            coeff: self.coeff / other.coeff,
            factors: self.factors.iter().chain(&other.divisors).cloned().collect(),
            divisors: self.divisors.iter().chain(&other.factors).cloned().collect(),
        };
        t.cancel();
        t
    }

    /// Drop factor/divisor pairs that print identically
    fn cancel(&mut self) {
        let mut i = 0;
        while i < self.divisors.len() {
            let text = self.divisors[i].to_string();
            match self.factors.iter().position(|f| f.to_string() == text) {
                Some(j) => {
                    self.factors.remove(j);
                    self.divisors.remove(i);
                }
                None => i += 1,
            }
        }
    }

    /// Order-insensitive identity of the symbolic part
    fn key(&self) -> (Vec<String>, Vec<String>) {
        let mut f: Vec<String> = self.factors.iter().map(ToString::to_string).collect();
        let mut d: Vec<String> = self.divisors.iter().map(ToString::to_string).collect();
        f.sort();
        d.sort();
        (f, d)
    }

    fn contains(&self, subterm: &Expr) -> bool {
        self.factors.iter().chain(&self.divisors).any(|e| e.contains_subtree(subterm))
    }

    /// Rebuild the term; with `signed` a negative coefficient is kept on the leading factor
    fn build(&self, signed: bool) -> Expr {
        let negative = signed && self.coeff < 0.0;
        let magnitude = self.coeff.abs();
        let mut factors = self.factors.iter().cloned();
        let mut e = if magnitude != 1.0 || self.factors.is_empty() {
            Expr::number(if negative { -magnitude } else { magnitude })
        } else {
            match factors.next() {
                Some(first) if negative => Expr::unary(UnaryOp::Neg, first),
                Some(first) => first,
                None => Expr::number(magnitude),
            }
        };
        for f in factors {
            e = Expr::binary(BinaryOp::Mul, e, f);
        }
        for d in &self.divisors {
            e = Expr::binary(BinaryOp::Div, e, d.clone());
        }
        e
    }

    fn to_expr(&self) -> Expr {
        self.build(true)
    }

    fn magnitude_expr(&self) -> Expr {
        self.build(false)
    }
}

impl ExpansionAlgebra {
    fn terms(&self, e: &Expr) -> Vec<Term> {
        match &e.kind {
            ExprKind::Number(v) => vec![Term::constant(*v)],
            ExprKind::Paren(inner) => self.terms(inner),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => {
                self.terms(operand).into_iter().map(Term::negated).collect()
            }
            ExprKind::Unary { op: UnaryOp::Plus, operand } => self.terms(operand),
            ExprKind::Binary { op: BinaryOp::Add, lhs, rhs } => {
                let mut out = self.terms(lhs);
                out.extend(self.terms(rhs));
                out
            }
            ExprKind::Binary { op: BinaryOp::Sub, lhs, rhs } => {
                let mut out = self.terms(lhs);
                out.extend(self.terms(rhs).into_iter().map(Term::negated));
                out
            }
            ExprKind::Binary { op: BinaryOp::Mul, lhs, rhs } => {
                let (l, r) = (self.terms(lhs), self.terms(rhs));
                l.iter().flat_map(|a| r.iter().map(move |b| a.times(b))).collect()
            }
            ExprKind::Binary { op: BinaryOp::Div, lhs, rhs } => {
                let denominator = collect(self.terms(rhs));
                match denominator.as_slice() {
                    [single] if single.coeff != 0.0 => {
                        self.terms(lhs).iter().map(|t| t.divided_by(single)).collect()
                    }
                    _ => {
                        let divisor = Term::atom(&Expr::paren(rebuild(&denominator)));
                        self.terms(lhs).iter().map(|t| t.divided_by(&divisor)).collect()
                    }
                }
            }
            _ => vec![Term::atom(e)],
        }
    }
}

/// Merge like terms, dropping those that cancel out
fn collect(terms: Vec<Term>) -> Vec<Term> {
    let mut order: Vec<(Vec<String>, Vec<String>)> = Vec::new();
    let mut merged: BTreeMap<(Vec<String>, Vec<String>), Term> = BTreeMap::new();
    for t in terms {
        let key = t.key();
        match merged.get_mut(&key) {
            Some(existing) => existing.coeff += t.coeff,
            None => {
                order.push(key.clone());
                merged.insert(key, t);
            }
        }
    }
    order
        .into_iter()
        .filter_map(|k| merged.remove(&k))
        .filter(|t| t.coeff != 0.0)
        .collect()
}

fn rebuild(terms: &[Term]) -> Expr {
    let mut iter = terms.iter();
    let mut sum = match iter.next() {
        Some(t) => t.to_expr(),
        None => return Expr::number(0.0),
    };
    for t in iter {
        sum = if t.coeff < 0.0 {
            Expr::binary(BinaryOp::Sub, sum, t.magnitude_expr())
        } else {
            Expr::binary(BinaryOp::Add, sum, t.magnitude_expr())
        };
    }
    sum
}

impl SymbolicAlgebra for ExpansionAlgebra {
    fn expand(&self, expr: &Expr) -> Expr {
        rebuild(&collect(self.terms(expr)))
    }

    fn isolate_additive_terms_containing(&self, expr: &Expr, subterm: &Expr) -> Vec<Expr> {
        collect(self.terms(expr))
            .iter()
            .filter(|t| t.contains(subterm))
            .map(Term::to_expr)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shnn_ir::parse_expression;

    fn expand(text: &str) -> String {
        let e = parse_expression(text).expect("parses");
        ExpansionAlgebra.expand(&e).to_string()
    }

    #[test]
    fn distributes_and_collects() {
        assert_eq!(expand("(a + b) * c"), "a * c + b * c");
        assert_eq!(expand("a - (b - a)"), "2.0 * a - b");
        assert_eq!(expand("x - x"), "0.0");
        assert_eq!(expand("-(a / tau)"), "-a / tau");
    }

    #[test]
    fn divides_single_terms() {
        assert_eq!(expand("(2 * a) / (4 * b)"), "0.5 * a / b");
        assert_eq!(expand("a * tau / tau"), "a");
        assert_eq!(expand("a / (b + c)"), "a / (b + c)");
    }

    #[test]
    fn isolates_terms_containing_a_call() {
        let rhs = parse_expression("-V_m / tau + convolve(I_delta, spikes) / C_m + I_e / C_m")
            .expect("parses");
        let call = parse_expression("convolve(I_delta, spikes)").expect("parses");
        let terms = ExpansionAlgebra.isolate_additive_terms_containing(&rhs, &call);
        let printed: Vec<String> = terms.iter().map(ToString::to_string).collect();
        assert_eq!(printed, vec!["convolve(I_delta, spikes) / C_m"]);
    }

    #[test]
    fn isolation_keeps_sign() {
        let rhs = parse_expression("a - 3 * convolve(k, s)").expect("parses");
        let call = parse_expression("convolve(k, s)").expect("parses");
        let terms = ExpansionAlgebra.isolate_additive_terms_containing(&rhs, &call);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].to_string(), "-3.0 * convolve(k, s)");
    }
}
