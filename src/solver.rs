//! Solver contract and backends.
//!
//! A lowered subproblem is a flat scalar form: one [VarSpec] per decision
//! slot, normalized affine constraints and an objective with a sense.
//! Backends consume it as a black box and report a [SolverStatus] plus one
//! value per slot. A non-optimal status is data, never an error.

pub mod good_lp;

#[cfg(feature = "coin_cbc")]
pub mod coin_cbc;

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::expr::ObjectiveSense;
use crate::linexpr;

/// Domain of one scalar decision slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VarSpec {
    pub integer: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// One concrete subproblem instance in scalar form.
#[derive(Debug, Clone)]
pub struct LoweredProblem {
    /// Indexed by [VarId](crate::linexpr::VarId).
    pub variables: Vec<VarSpec>,
    pub constraints: Vec<linexpr::Constraint>,
    pub objective: (ObjectiveSense, linexpr::Expr),
}

/// Terminal state of one solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SolverStatus {
    Optimal,
    Infeasible,
    Unbounded,
    SolverError(String),
}

impl SolverStatus {
    pub fn is_optimal(&self) -> bool {
        *self == SolverStatus::Optimal
    }
}

impl std::fmt::Display for SolverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverStatus::Optimal => write!(f, "optimal"),
            SolverStatus::Infeasible => write!(f, "infeasible"),
            SolverStatus::Unbounded => write!(f, "unbounded"),
            SolverStatus::SolverError(reason) => write!(f, "solver-error: {}", reason),
        }
    }
}

/// Solve result: status plus, when optimal, one value per slot.
#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub status: SolverStatus,
    pub values: Vec<f64>,
}

impl SolverOutcome {
    pub fn failed(status: SolverStatus) -> Self {
        SolverOutcome {
            status,
            values: Vec::new(),
        }
    }
}

/// Caller-supplied solver options, passed through opaquely.
#[derive(Debug, Clone, Default)]
pub struct SolverOptions {
    pub verbose: bool,
    pub extra: BTreeMap<String, String>,
}

pub trait Solve: Send + Sync {
    fn solve(&self, problem: &LoweredProblem, options: &SolverOptions) -> SolverOutcome;
}

/// Resolves a solver by name.
pub fn solver_by_name(name: &str) -> Result<Box<dyn Solve>> {
    match name {
        "good_lp" | "microlp" => Ok(Box::new(good_lp::GoodSolver::new())),
        #[cfg(feature = "coin_cbc")]
        "cbc" | "coin_cbc" => Ok(Box::new(coin_cbc::CbcSolver::new())),
        other => Err(Error::settings(
            "solver",
            format!("solver '{}' not available", other),
        )),
    }
}

/// Drops constraints that hold on their constant alone; reports an
/// impossible constant constraint as immediate infeasibility.
pub(crate) fn prune_trivial(
    constraints: &[linexpr::Constraint],
) -> std::result::Result<Vec<&linexpr::Constraint>, ()> {
    let mut out = Vec::with_capacity(constraints.len());
    for constraint in constraints {
        match constraint.is_trivially_satisfied() {
            Some(true) => {}
            Some(false) => return Err(()),
            None => out.push(constraint),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linexpr::{Expr, VarId};

    #[test]
    fn unknown_solver_is_a_settings_error() {
        assert!(solver_by_name("gurobi").is_err());
        assert!(solver_by_name("good_lp").is_ok());
    }

    #[test]
    fn trivial_pruning_detects_constant_infeasibility() {
        let ok = Expr::constant(-1.0).leq(&Expr::constant(0.0));
        let bad = Expr::constant(1.0).leq(&Expr::constant(0.0));
        let real = Expr::var(VarId(0)).leq(&Expr::constant(0.0));

        let inputs = [ok.clone(), real.clone()];
        let pruned = prune_trivial(&inputs).unwrap();
        assert_eq!(pruned.len(), 1);

        assert!(prune_trivial(&[ok, bad, real]).is_err());
    }
}
