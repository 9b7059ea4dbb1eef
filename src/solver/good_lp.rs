//! good-lp solver
//!
//! This module implements a solver which uses the [good_lp] crate as a
//! backend. The crate multiplexes several concrete solvers; this build uses
//! whichever backend the cargo features enabled (the pure-Rust microlp by
//! default).

use good_lp::{ProblemVariables, ResolutionError, Solution, SolverModel};
use log::debug;

use super::{prune_trivial, LoweredProblem, Solve, SolverOptions, SolverOutcome, SolverStatus};
use crate::expr::ObjectiveSense;
use crate::linexpr::Sign;

/// [good_lp] solver.
#[derive(Debug, Clone, Default)]
pub struct GoodSolver {}

impl GoodSolver {
    pub fn new() -> Self {
        GoodSolver {}
    }
}

impl Solve for GoodSolver {
    fn solve(&self, problem: &LoweredProblem, options: &SolverOptions) -> SolverOutcome {
        let constraints = match prune_trivial(&problem.constraints) {
            Ok(kept) => kept,
            Err(()) => return SolverOutcome::failed(SolverStatus::Infeasible),
        };

        let mut pb_vars = ProblemVariables::new();
        let vars: Vec<good_lp::Variable> = problem
            .variables
            .iter()
            .map(|spec| {
                let mut var_def = good_lp::variable();
                if spec.integer {
                    var_def = var_def.integer();
                }
                if let Some(m) = spec.min {
                    var_def = var_def.min(m);
                }
                if let Some(m) = spec.max {
                    var_def = var_def.max(m);
                }
                pb_vars.add(var_def)
            })
            .collect();

        let (sense, objective) = &problem.objective;
        let mut objective_expr = good_lp::Expression::from_other_affine(objective.get_constant());
        for (v, c) in objective.coefficients() {
            objective_expr.add_mul(c, vars[v.0]);
        }

        let unsolved = match sense {
            ObjectiveSense::Maximize => pb_vars.maximise(objective_expr),
            ObjectiveSense::Minimize => pb_vars.minimise(objective_expr),
        };

        let mut model = unsolved.using(good_lp::default_solver);

        for constraint in constraints {
            let mut expr = good_lp::Expression::from_other_affine(constraint.get_constant());
            for (v, c) in constraint.coefficients() {
                expr.add_mul(c, vars[v.0]);
            }
            let clause = match constraint.get_sign() {
                Sign::Equals => expr.eq(0.0),
                Sign::LessThan => expr.leq(0.0),
            };
            model = model.with(clause);
        }

        if options.verbose {
            debug!(
                "solving: {} variables, {} constraints",
                problem.variables.len(),
                problem.constraints.len()
            );
        }

        match model.solve() {
            Ok(solution) => {
                let values = vars.iter().map(|v| solution.value(*v)).collect();
                SolverOutcome {
                    status: SolverStatus::Optimal,
                    values,
                }
            }
            Err(ResolutionError::Infeasible) => {
                SolverOutcome::failed(SolverStatus::Infeasible)
            }
            Err(ResolutionError::Unbounded) => SolverOutcome::failed(SolverStatus::Unbounded),
            Err(other) => {
                SolverOutcome::failed(SolverStatus::SolverError(other.to_string()))
            }
        }
    }
}
