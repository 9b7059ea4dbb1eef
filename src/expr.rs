//! Matrix-level symbolic expressions.
//!
//! This is the contract with the (out-of-scope) expression parser: whatever
//! reads the user's problem text must produce [Expression] trees; the engine
//! only ever consumes them. Trees can also be built programmatically through
//! the combinators below, which is how tests state their problems.
//!
//! Lowering turns an expression into a matrix of scalar affine
//! [Expr](crate::linexpr::Expr)s given a resolver mapping each symbol to its
//! bound affine matrix for the (problem, scenario, intra-combination) being
//! instantiated. Non-affine products are rejected.

use std::collections::BTreeSet;

use ndarray::Array2;

use crate::error::{Error, Result};
use crate::linexpr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectiveSense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    Eq,
    Leq,
    Geq,
}

/// Symbolic matrix expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A variable symbol from the catalog.
    Symbol(String),
    /// A numeric literal, shape 1x1 (broadcast where needed).
    Literal(f64),
    Add(Box<Expression>, Box<Expression>),
    Sub(Box<Expression>, Box<Expression>),
    Neg(Box<Expression>),
    /// Matrix product; a 1x1 operand acts as a scalar factor.
    MatMul(Box<Expression>, Box<Expression>),
    /// Element-wise product.
    ElemMul(Box<Expression>, Box<Expression>),
    Transpose(Box<Expression>),
    /// Vector -> diagonal matrix.
    Diag(Box<Expression>),
}

/// `lhs op rhs`, one constraint relation of a symbolic problem.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub lhs: Expression,
    pub op: RelOp,
    pub rhs: Expression,
}

impl Expression {
    pub fn symbol<S: Into<String>>(name: S) -> Expression {
        Expression::Symbol(name.into())
    }

    pub fn lit(value: f64) -> Expression {
        Expression::Literal(value)
    }

    pub fn matmul(self, rhs: Expression) -> Expression {
        Expression::MatMul(Box::new(self), Box::new(rhs))
    }

    pub fn elem_mul(self, rhs: Expression) -> Expression {
        Expression::ElemMul(Box::new(self), Box::new(rhs))
    }

    pub fn tran(self) -> Expression {
        Expression::Transpose(Box::new(self))
    }

    pub fn diag(self) -> Expression {
        Expression::Diag(Box::new(self))
    }

    pub fn leq(self, rhs: Expression) -> Relation {
        Relation {
            lhs: self,
            op: RelOp::Leq,
            rhs,
        }
    }

    pub fn geq(self, rhs: Expression) -> Relation {
        Relation {
            lhs: self,
            op: RelOp::Geq,
            rhs,
        }
    }

    pub fn eq(self, rhs: Expression) -> Relation {
        Relation {
            lhs: self,
            op: RelOp::Eq,
            rhs,
        }
    }

    /// Every symbol referenced in the tree.
    pub fn symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Symbol(name) => {
                out.insert(name.clone());
            }
            Expression::Literal(_) => {}
            Expression::Add(a, b)
            | Expression::Sub(a, b)
            | Expression::MatMul(a, b)
            | Expression::ElemMul(a, b) => {
                a.collect_symbols(out);
                b.collect_symbols(out);
            }
            Expression::Neg(a) | Expression::Transpose(a) | Expression::Diag(a) => {
                a.collect_symbols(out);
            }
        }
    }
}

impl std::ops::Add for Expression {
    type Output = Expression;

    fn add(self, rhs: Expression) -> Expression {
        Expression::Add(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Sub for Expression {
    type Output = Expression;

    fn sub(self, rhs: Expression) -> Expression {
        Expression::Sub(Box::new(self), Box::new(rhs))
    }
}

impl std::ops::Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        Expression::Neg(Box::new(self))
    }
}

impl Relation {
    pub fn symbols(&self) -> BTreeSet<String> {
        let mut out = self.lhs.symbols();
        out.extend(self.rhs.symbols());
        out
    }
}

/// Matrix of scalar affine expressions, the lowering product.
pub type AffineMatrix = Array2<linexpr::Expr>;

fn expr_error(message: String) -> Error {
    Error::settings("expression", message)
}

fn scalar_of(matrix: &AffineMatrix) -> Option<&linexpr::Expr> {
    if matrix.dim() == (1, 1) {
        Some(&matrix[(0, 0)])
    } else {
        None
    }
}

/// Product of two scalar affine expressions; at least one factor must have
/// no variable terms, otherwise the product is not affine.
fn mul_affine(a: &linexpr::Expr, b: &linexpr::Expr) -> Result<linexpr::Expr> {
    if a.cleaned().is_constant() {
        Ok(b * a.get_constant())
    } else if b.cleaned().is_constant() {
        Ok(a * b.get_constant())
    } else {
        Err(expr_error(
            "product of two variable expressions is not affine".to_string(),
        ))
    }
}

/// Element-wise combination with broadcasting: along each axis the lengths
/// must agree or one of them must be 1 (a length-1 axis repeats).
fn broadcast_zip(
    a: &AffineMatrix,
    b: &AffineMatrix,
    op: impl Fn(&linexpr::Expr, &linexpr::Expr) -> Result<linexpr::Expr>,
    what: &str,
) -> Result<AffineMatrix> {
    let (sa, sb) = (a.dim(), b.dim());

    let axis = |x: usize, y: usize| -> Option<usize> {
        if x == y {
            Some(x)
        } else if x == 1 {
            Some(y)
        } else if y == 1 {
            Some(x)
        } else {
            None
        }
    };

    let shape = match (axis(sa.0, sb.0), axis(sa.1, sb.1)) {
        (Some(m), Some(n)) => (m, n),
        _ => {
            return Err(expr_error(format!(
                "shape mismatch in {}: {:?} vs {:?}",
                what, sa, sb
            )))
        }
    };

    let mut out = Array2::from_elem(shape, linexpr::Expr::default());
    for ((i, j), slot) in out.indexed_iter_mut() {
        let left = &a[(i % sa.0, j % sa.1)];
        let right = &b[(i % sb.0, j % sb.1)];
        *slot = op(left, right)?;
    }
    Ok(out)
}

/// Lowers an expression tree into a matrix of scalar affine expressions.
///
/// `resolve` maps each symbol to its affine matrix for the subproblem
/// instance being built.
pub fn lower(
    expression: &Expression,
    resolve: &dyn Fn(&str) -> Result<AffineMatrix>,
) -> Result<AffineMatrix> {
    match expression {
        Expression::Symbol(name) => resolve(name),
        Expression::Literal(value) => Ok(Array2::from_elem(
            (1, 1),
            linexpr::Expr::constant(*value),
        )),
        Expression::Add(a, b) => {
            let (a, b) = (lower(a, resolve)?, lower(b, resolve)?);
            broadcast_zip(&a, &b, |x, y| Ok(x + y), "addition")
        }
        Expression::Sub(a, b) => {
            let (a, b) = (lower(a, resolve)?, lower(b, resolve)?);
            broadcast_zip(&a, &b, |x, y| Ok(x - y), "subtraction")
        }
        Expression::Neg(a) => {
            let a = lower(a, resolve)?;
            Ok(a.map(|e| -e))
        }
        Expression::ElemMul(a, b) => {
            let (a, b) = (lower(a, resolve)?, lower(b, resolve)?);
            broadcast_zip(&a, &b, mul_affine, "element-wise product")
        }
        Expression::MatMul(a, b) => {
            let (a, b) = (lower(a, resolve)?, lower(b, resolve)?);

            // a 1x1 operand scales the other side
            if let Some(s) = scalar_of(&a) {
                return broadcast_zip(
                    &Array2::from_elem(b.dim(), s.clone()),
                    &b,
                    mul_affine,
                    "scalar product",
                );
            }
            if let Some(s) = scalar_of(&b) {
                return broadcast_zip(
                    &a,
                    &Array2::from_elem(a.dim(), s.clone()),
                    mul_affine,
                    "scalar product",
                );
            }

            let ((m, k), (k2, n)) = (a.dim(), b.dim());
            if k != k2 {
                return Err(expr_error(format!(
                    "matrix product dimension mismatch: {}x{} @ {}x{}",
                    m, k, k2, n
                )));
            }

            let mut out = Array2::from_elem((m, n), linexpr::Expr::default());
            for i in 0..m {
                for j in 0..n {
                    let mut acc = linexpr::Expr::constant(0.0);
                    for l in 0..k {
                        acc = &acc + &mul_affine(&a[(i, l)], &b[(l, j)])?;
                    }
                    out[(i, j)] = acc.cleaned();
                }
            }
            Ok(out)
        }
        Expression::Transpose(a) => {
            let a = lower(a, resolve)?;
            Ok(a.t().to_owned())
        }
        Expression::Diag(a) => {
            let a = lower(a, resolve)?;
            let (m, n) = a.dim();
            let (len, pick): (usize, Box<dyn Fn(usize) -> linexpr::Expr>) = if n == 1 {
                (m, Box::new(move |i| a[(i, 0)].clone()))
            } else if m == 1 {
                (n, Box::new(move |i| a[(0, i)].clone()))
            } else {
                return Err(expr_error(format!(
                    "diag expects a vector, got {}x{}",
                    m, n
                )));
            };

            let mut out = Array2::from_elem((len, len), linexpr::Expr::constant(0.0));
            for i in 0..len {
                out[(i, i)] = pick(i);
            }
            Ok(out)
        }
    }
}

/// Lowers a relation into normalized scalar constraints, element-wise over
/// the (broadcast) relation shape.
pub fn lower_relation(
    relation: &Relation,
    resolve: &dyn Fn(&str) -> Result<AffineMatrix>,
) -> Result<Vec<linexpr::Constraint>> {
    let lhs = lower(&relation.lhs, resolve)?;
    let rhs = lower(&relation.rhs, resolve)?;

    let diff = broadcast_zip(&lhs, &rhs, |x, y| Ok(x - y), "relation")?;

    let mut out = Vec::with_capacity(diff.len());
    for expr in diff.iter() {
        let zero = linexpr::Expr::constant(0.0);
        let constraint = match relation.op {
            RelOp::Eq => expr.eq(&zero),
            RelOp::Leq => expr.leq(&zero),
            RelOp::Geq => expr.geq(&zero),
        };
        out.push(constraint);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linexpr::{Expr, VarId};
    use ndarray::array;

    fn constant_matrix(values: Array2<f64>) -> AffineMatrix {
        values.map(|v| Expr::constant(*v))
    }

    fn resolver(
        symbols: Vec<(&'static str, AffineMatrix)>,
    ) -> impl Fn(&str) -> Result<AffineMatrix> {
        move |name: &str| {
            symbols
                .iter()
                .find(|(s, _)| *s == name)
                .map(|(_, m)| m.clone())
                .ok_or_else(|| Error::settings("expression", format!("unknown symbol '{}'", name)))
        }
    }

    #[test]
    fn matmul_accumulates_affine_terms() {
        // a (1x2 constant) @ x (2x1 variable)
        let a = constant_matrix(array![[2.0, 3.0]]);
        let x = array![[Expr::var(VarId(0))], [Expr::var(VarId(1))]];
        let resolve = resolver(vec![("a", a), ("x", x)]);

        let product = lower(
            &Expression::symbol("a").matmul(Expression::symbol("x")),
            &resolve,
        )
        .unwrap();

        assert_eq!(product.dim(), (1, 1));
        assert_eq!(product[(0, 0)].get(VarId(0)), Some(2.0));
        assert_eq!(product[(0, 0)].get(VarId(1)), Some(3.0));
    }

    #[test]
    fn product_of_two_variables_is_rejected() {
        let x = array![[Expr::var(VarId(0))]];
        let y = array![[Expr::var(VarId(1))]];
        let resolve = resolver(vec![("x", x), ("y", y)]);

        let result = lower(
            &Expression::symbol("x").elem_mul(Expression::symbol("y")),
            &resolve,
        );
        assert!(result.is_err());
    }

    #[test]
    fn diag_builds_a_square_matrix() {
        let x = array![[Expr::var(VarId(0))], [Expr::var(VarId(1))]];
        let resolve = resolver(vec![("x", x)]);

        let d = lower(&Expression::symbol("x").diag(), &resolve).unwrap();
        assert_eq!(d.dim(), (2, 2));
        assert_eq!(d[(0, 0)].get(VarId(0)), Some(1.0));
        assert_eq!(d[(1, 1)].get(VarId(1)), Some(1.0));
        assert!(d[(0, 1)].cleaned().is_constant());
    }

    #[test]
    fn relation_lowers_element_wise() {
        let a = constant_matrix(array![[1.0], [2.0]]);
        let x = array![[Expr::var(VarId(0))], [Expr::var(VarId(1))]];
        let resolve = resolver(vec![("a", a), ("x", x)]);

        let constraints = lower_relation(
            &Expression::symbol("x").geq(Expression::symbol("a")),
            &resolve,
        )
        .unwrap();
        assert_eq!(constraints.len(), 2);
    }

    #[test]
    fn scalar_literal_broadcasts() {
        let x = array![[Expr::var(VarId(0))], [Expr::var(VarId(1))]];
        let resolve = resolver(vec![("x", x)]);

        let constraints = lower_relation(
            &Expression::symbol("x").geq(Expression::lit(0.0)),
            &resolve,
        )
        .unwrap();
        assert_eq!(constraints.len(), 2);
    }

    #[test]
    fn transpose_swaps_axes() {
        let x = array![[Expr::var(VarId(0))], [Expr::var(VarId(1))]];
        let resolve = resolver(vec![("x", x)]);
        let t = lower(&Expression::symbol("x").tran(), &resolve).unwrap();
        assert_eq!(t.dim(), (1, 2));
    }
}
