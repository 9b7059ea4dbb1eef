//! Engine settings.
//!
//! All tunables are explicit values threaded through the [Model](crate::model::Model)
//! constructor. There is no global state.

/// Numerical and operational settings for a model instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Relative per-table tolerance declaring the coupling loop converged.
    pub tolerance_coupling_convergence: f64,
    /// Iteration cap for the coupling loop.
    pub max_iterations_coupling: usize,
    /// Relative tolerance used by [check_results](crate::model::Model::check_results).
    pub tolerance_results_check: f64,
    /// Digits kept when rounding per-table relative differences.
    pub rounding_digits_relative_diff: u32,
    /// Parameter matrices whose zero fraction reaches this ratio are stored sparse.
    pub sparse_zero_ratio_threshold: f64,
    /// Rows per batched store write.
    pub store_batch_size: usize,
    /// Solver used when the caller does not name one.
    pub default_solver: String,
    /// Accept NULL values in exogenous data when binding parameters.
    pub allow_none_values: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            tolerance_coupling_convergence: 0.01,
            max_iterations_coupling: 20,
            tolerance_results_check: 0.02,
            rounding_digits_relative_diff: 5,
            sparse_zero_ratio_threshold: 0.3,
            store_batch_size: 1000,
            default_solver: "good_lp".to_string(),
            allow_none_values: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn coupling_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance_coupling_convergence = tolerance;
        self
    }

    pub fn coupling_iteration_cap(mut self, cap: usize) -> Self {
        self.max_iterations_coupling = cap;
        self
    }

    pub fn results_check_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance_results_check = tolerance;
        self
    }

    pub fn default_solver<S: Into<String>>(mut self, solver: S) -> Self {
        self.default_solver = solver.into();
        self
    }

    pub fn allow_none_values(mut self, allow: bool) -> Self {
        self.allow_none_values = allow;
        self
    }
}
