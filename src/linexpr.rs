//! Scalar affine expressions over decision slots.
//!
//! Matrix expressions lower element-wise into these: a coefficient per
//! [VarId] plus a constant. Constraints are normalized to `expr (= | <=) 0`.

use std::collections::{BTreeMap, BTreeSet};

use ordered_float::OrderedFloat;

/// One scalar decision slot of a lowered subproblem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VarId(pub usize);

impl std::fmt::Display for VarId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "x{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialOrd, Ord, PartialEq, Eq)]
pub struct Expr {
    coefs: BTreeMap<VarId, OrderedFloat<f64>>,
    constant: OrderedFloat<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Sign {
    Equals,
    #[default]
    LessThan,
}

/// `expr sign 0`, the normalized constraint form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Constraint {
    sign: Sign,
    expr: Expr,
}

impl Expr {
    pub fn var(id: VarId) -> Self {
        Expr {
            coefs: BTreeMap::from([(id, OrderedFloat(1.0))]),
            constant: OrderedFloat(0.0),
        }
    }

    pub fn constant(number: f64) -> Self {
        Expr {
            coefs: BTreeMap::new(),
            constant: OrderedFloat(number),
        }
    }

    pub fn get_constant(&self) -> f64 {
        self.constant.into_inner()
    }

    pub fn get(&self, var: VarId) -> Option<f64> {
        self.coefs.get(&var).map(|&x| x.into_inner())
    }

    pub fn coefficients(&self) -> impl Iterator<Item = (VarId, f64)> + '_ {
        self.coefs.iter().map(|(&v, &c)| (v, c.into_inner()))
    }

    pub fn variables(&self) -> BTreeSet<VarId> {
        self.coefs.keys().copied().collect()
    }

    pub fn is_constant(&self) -> bool {
        self.coefs.values().all(|c| *c == OrderedFloat(0.0))
    }

    pub fn clean(&mut self) {
        self.coefs.retain(|_k, v| *v != OrderedFloat(0.0));
    }

    pub fn cleaned(&self) -> Expr {
        let mut output = self.clone();
        output.clean();
        output
    }

    pub fn add_term(&mut self, var: VarId, coef: f64) {
        let entry = self.coefs.entry(var).or_insert(OrderedFloat(0.0));
        *entry += coef;
    }

    pub fn add_constant(&mut self, value: f64) {
        self.constant += value;
    }
}

impl Expr {
    pub fn leq(&self, rhs: &Expr) -> Constraint {
        Constraint {
            expr: (self - rhs).cleaned(),
            sign: Sign::LessThan,
        }
    }

    pub fn geq(&self, rhs: &Expr) -> Constraint {
        Constraint {
            expr: (rhs - self).cleaned(),
            sign: Sign::LessThan,
        }
    }

    pub fn eq(&self, rhs: &Expr) -> Constraint {
        Constraint {
            expr: (self - rhs).cleaned(),
            sign: Sign::Equals,
        }
    }
}

impl Constraint {
    pub fn variables(&self) -> BTreeSet<VarId> {
        self.expr.variables()
    }

    pub fn get_sign(&self) -> Sign {
        self.sign
    }

    pub fn get_constant(&self) -> f64 {
        self.expr.get_constant()
    }

    pub fn coefficients(&self) -> impl Iterator<Item = (VarId, f64)> + '_ {
        self.expr.coefficients()
    }

    pub fn get_lhs(&self) -> &Expr {
        &self.expr
    }

    /// A constraint with no variables left is satisfied or impossible on its
    /// constant alone.
    pub fn is_trivially_satisfied(&self) -> Option<bool> {
        if !self.expr.coefs.is_empty() {
            return None;
        }
        let c = self.expr.get_constant();
        Some(match self.sign {
            Sign::Equals => c == 0.0,
            Sign::LessThan => c <= 0.0,
        })
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.coefs.is_empty() && self.constant.into_inner() == 0.0 {
            write!(f, "0")?;
            return Ok(());
        }

        let mut it = self.coefs.iter().peekable();
        while let Some((key, value)) = it.next() {
            if value.is_sign_negative() {
                write!(f, "({})*{}", value, key)?;
            } else {
                write!(f, "{}*{}", value, key)?;
            }
            if it.peek().is_some() || self.constant.0 != 0.0 {
                write!(f, " + ")?;
            }
        }

        if self.constant.into_inner() != 0.0 || self.coefs.is_empty() {
            if self.constant.is_sign_negative() {
                write!(f, "({})", self.constant)?;
            } else {
                write!(f, "{}", self.constant)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Sign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Sign::Equals => "=",
                Sign::LessThan => "<=",
            }
        )
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} 0", self.expr, self.sign)
    }
}

impl std::ops::Add for &Expr {
    type Output = Expr;

    fn add(self, rhs: &Expr) -> Self::Output {
        let mut output = self.clone();
        for (key, value) in rhs.coefs.iter() {
            if let Some(coef) = output.coefs.get_mut(key) {
                *coef += *value;
            } else {
                output.coefs.insert(*key, *value);
            }
        }
        output.constant += rhs.constant;
        output
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Self::Output {
        &self + &rhs
    }
}

impl std::ops::Sub for &Expr {
    type Output = Expr;

    fn sub(self, rhs: &Expr) -> Self::Output {
        self + &(-rhs)
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Self::Output {
        &self - &rhs
    }
}

impl std::ops::Neg for &Expr {
    type Output = Expr;

    fn neg(self) -> Self::Output {
        Expr {
            coefs: self.coefs.iter().map(|(&k, &v)| (k, -v)).collect(),
            constant: -self.constant,
        }
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Self::Output {
        -&self
    }
}

impl std::ops::Mul<f64> for &Expr {
    type Output = Expr;

    fn mul(self, rhs: f64) -> Self::Output {
        Expr {
            coefs: self.coefs.iter().map(|(&k, &v)| (k, v * rhs)).collect(),
            constant: self.constant * rhs,
        }
    }
}

impl std::ops::Mul<f64> for Expr {
    type Output = Expr;

    fn mul(self, rhs: f64) -> Self::Output {
        &self * rhs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algebra_merges_coefficients() {
        let x = Expr::var(VarId(0));
        let y = Expr::var(VarId(1));
        let e = &(&x * 2.0) + &(&y - &x);

        assert_eq!(e.get(VarId(0)), Some(1.0));
        assert_eq!(e.get(VarId(1)), Some(1.0));
        assert_eq!(e.get_constant(), 0.0);
    }

    #[test]
    fn geq_flips_into_leq_form() {
        let x = Expr::var(VarId(0));
        let c = x.geq(&Expr::constant(3.0));

        assert_eq!(c.get_sign(), Sign::LessThan);
        // 3 - x <= 0
        assert_eq!(c.get_lhs().get(VarId(0)), Some(-1.0));
        assert_eq!(c.get_constant(), 3.0);
    }

    #[test]
    fn cleaned_drops_zero_terms() {
        let x = Expr::var(VarId(0));
        let e = (&x - &x).cleaned();
        assert!(e.variables().is_empty());
        assert!(e.is_constant());
    }

    #[test]
    fn trivial_constraint_detection() {
        let c = Expr::constant(-1.0).leq(&Expr::constant(0.0));
        assert_eq!(c.is_trivially_satisfied(), Some(true));

        let c = Expr::constant(2.0).eq(&Expr::constant(0.0));
        assert_eq!(c.is_trivially_satisfied(), Some(false));

        let c = Expr::var(VarId(0)).leq(&Expr::constant(0.0));
        assert_eq!(c.is_trivially_satisfied(), None);
    }
}
