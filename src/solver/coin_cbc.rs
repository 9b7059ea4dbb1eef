//! COIN-CBC solver
//!
//! This module implements a solver which uses the [coin_cbc] crate as a
//! backend, an interface to the COIN-CBC solver. Needs the native libcbc;
//! enabled through the `coin_cbc` cargo feature.

use super::{prune_trivial, LoweredProblem, Solve, SolverOptions, SolverOutcome, SolverStatus};
use crate::expr::ObjectiveSense;
use crate::linexpr::Sign;

/// Coin-cbc solver.
#[derive(Debug, Clone, Default)]
pub struct CbcSolver {}

impl CbcSolver {
    pub fn new() -> Self {
        CbcSolver {}
    }
}

impl Solve for CbcSolver {
    fn solve(&self, problem: &LoweredProblem, options: &SolverOptions) -> SolverOutcome {
        use coin_cbc::{Model, Sense};

        let constraints = match prune_trivial(&problem.constraints) {
            Ok(kept) => kept,
            Err(()) => return SolverOutcome::failed(SolverStatus::Infeasible),
        };

        let mut model = Model::default();

        let cols: Vec<coin_cbc::Col> = problem
            .variables
            .iter()
            .map(|spec| {
                let col = if spec.integer {
                    model.add_integer()
                } else {
                    model.add_col()
                };
                match spec.min {
                    Some(m) => model.set_col_lower(col, m),
                    None => model.set_col_lower(col, -f64::INFINITY),
                }
                match spec.max {
                    Some(m) => model.set_col_upper(col, m),
                    None => model.set_col_upper(col, f64::INFINITY),
                }
                col
            })
            .collect();

        for constraint in constraints {
            let row = model.add_row();
            for (v, w) in constraint.coefficients() {
                model.set_weight(row, cols[v.0], w);
            }
            match constraint.get_sign() {
                Sign::Equals => model.set_row_equal(row, -constraint.get_constant()),
                Sign::LessThan => model.set_row_upper(row, -constraint.get_constant()),
            }
        }

        let (sense, objective) = &problem.objective;
        model.set_obj_sense(match sense {
            ObjectiveSense::Maximize => Sense::Maximize,
            ObjectiveSense::Minimize => Sense::Minimize,
        });
        for (v, c) in objective.coefficients() {
            model.set_obj_coeff(cols[v.0], c);
        }

        if !options.verbose {
            model.set_parameter("log", "0");
            model.set_parameter("slog", "0");
        }

        let solution = model.solve();
        let raw = solution.raw();

        if raw.is_proven_infeasible() {
            return SolverOutcome::failed(SolverStatus::Infeasible);
        }
        if raw.is_proven_dual_infeasible() {
            return SolverOutcome::failed(SolverStatus::Unbounded);
        }
        if raw.status() != coin_cbc::raw::Status::Finished {
            return SolverOutcome::failed(SolverStatus::SolverError(format!(
                "cbc stopped with status {:?}",
                raw.status()
            )));
        }

        SolverOutcome {
            status: SolverStatus::Optimal,
            values: cols.iter().map(|col| solution.col(*col)).collect(),
        }
    }
}
