//! Caller-facing model lifecycle.
//!
//! A [Model] walks through the stages of the original workflow: build the
//! catalog from a setup source, generate the blank store, load exogenous
//! data, materialize the numerical problems, solve (independently or
//! coupled), and export results. Invoking a stage out of order raises an
//! [Operational](crate::error::Error::Operational) error; nothing is
//! implicit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::Array2;

use crate::config::Config;
use crate::coords::ScenarioId;
use crate::core::{Core, ExogenousInput};
use crate::error::{Error, Result};
use crate::index::{Index, SetTable};
use crate::problem::ProblemStatus;
use crate::setup::{ProblemSetup, SetSetup, SetupSource, TableSetup};
use crate::solver::{solver_by_name, SolverOptions};
use crate::store::Store;

pub struct Model {
    config: Config,
    sets: BTreeMap<String, SetSetup>,
    tables: BTreeMap<String, TableSetup>,
    problems: BTreeMap<String, ProblemSetup>,
    store_path: PathBuf,
    index: Option<Index>,
    core: Option<Core>,
}

/// Options for [Model::run].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Solver name; falls back to the configured default.
    pub solver: Option<String>,
    pub verbose: bool,
    /// Solve the subproblems as a coupled fixed point.
    pub integrated: bool,
    pub force: bool,
    /// Overrides `tolerance_coupling_convergence`.
    pub tolerance: Option<f64>,
    /// Overrides `max_iterations_coupling`.
    pub max_iterations: Option<usize>,
    /// Extra options handed to the solver opaquely.
    pub solver_options: BTreeMap<String, String>,
}

impl Model {
    /// Reads the declarative setup from `source`. Validation happens in
    /// [load_model_coordinates](Model::load_model_coordinates).
    pub fn new(config: Config, source: &dyn SetupSource, store_path: &Path) -> Result<Model> {
        Ok(Model {
            config,
            sets: source.structure_sets()?,
            tables: source.structure_tables()?,
            problems: source.problems()?,
            store_path: store_path.to_path_buf(),
            index: None,
            core: None,
        })
    }

    fn core(&self) -> Result<&Core> {
        self.core.as_ref().ok_or_else(|| {
            Error::Operational(
                "store not initialized; call initialize_blank_data_structure first".into(),
            )
        })
    }

    fn core_mut(&mut self) -> Result<&mut Core> {
        self.core.as_mut().ok_or_else(|| {
            Error::Operational(
                "store not initialized; call initialize_blank_data_structure first".into(),
            )
        })
    }

    /// Builds and validates the catalog: resolves `copy_from`, applies
    /// variable filters, derives the scenario table. All validation
    /// findings are aggregated into a single error.
    pub fn load_model_coordinates(&mut self) -> Result<()> {
        let source = crate::setup::MapSource {
            sets: self.sets.clone(),
            tables: self.tables.clone(),
            problems: self.problems.clone(),
        };
        let index = Index::build(&source)?;
        info!(
            "model coordinates loaded: {} scenarios",
            index.scenarios().len()
        );
        self.index = Some(index);
        Ok(())
    }

    /// Creates the store file with set tables and blank data tables. An
    /// already existing store file is reused as-is.
    pub async fn initialize_blank_data_structure(&mut self) -> Result<()> {
        if self.core.is_some() {
            return Err(Error::Operational("store already initialized".into()));
        }
        let index = self.index.take().ok_or_else(|| {
            Error::Operational("coordinates not loaded; call load_model_coordinates first".into())
        })?;

        if self.store_path.exists() {
            info!(
                "relying on existing store '{}'",
                self.store_path.display()
            );
            let store = Store::open(&self.store_path).await?;
            self.core = Some(Core::new(self.config.clone(), index, store));
            return Ok(());
        }

        let store = Store::create(&self.store_path).await?;
        let mut core = Core::new(self.config.clone(), index, store);
        core.initialize_blank_store().await?;
        self.core = Some(core);
        Ok(())
    }

    /// Writes caller-supplied exogenous rows to the store.
    pub async fn load_exogenous_data_to_store(&mut self, data: &ExogenousInput) -> Result<()> {
        self.core()?.load_exogenous_data(data).await
    }

    /// Materializes the numerical problems and feeds exogenous parameters.
    pub async fn initialize_problems(&mut self, force: bool, allow_none: bool) -> Result<()> {
        self.core_mut()?.initialize_problems(force, allow_none).await
    }

    /// Solves the numerical problems.
    pub async fn run(&mut self, options: RunOptions) -> Result<()> {
        let solver_name = options
            .solver
            .clone()
            .unwrap_or_else(|| self.config.default_solver.clone());
        let solver = solver_by_name(&solver_name)?;

        let sub_problems = self.problems.len();
        if sub_problems == 0 {
            return Err(Error::settings("problems", "no symbolic problems declared"));
        }
        if options.integrated && sub_problems < 2 {
            return Err(Error::settings(
                "problems",
                "coupled solving needs at least two subproblems",
            ));
        }

        let core = self.core_mut()?;
        if let Some(status) = core.problem_status() {
            if status.any_solved() && !options.force {
                return Err(Error::Operational(
                    "problems already solved; pass force to solve again".into(),
                ));
            }
        }

        let tolerance = options
            .tolerance
            .unwrap_or(core.config.tolerance_coupling_convergence);
        let max_iterations = options
            .max_iterations
            .unwrap_or(core.config.max_iterations_coupling);

        let solver_options = SolverOptions {
            verbose: options.verbose,
            extra: options.solver_options.clone(),
        };

        info!(
            "model run: {} subproblems, mode '{}', solver '{}'",
            sub_problems,
            if options.integrated { "integrated" } else { "independent" },
            solver_name
        );

        if options.integrated {
            core.solve_coupled(solver.as_ref(), &solver_options, tolerance, max_iterations)
                .await?;
        } else {
            core.solve_independent(solver.as_ref(), &solver_options)
                .await?;
        }

        if let Some(status) = core.problem_status() {
            for ((problem, scenario), state) in status.iter() {
                match state {
                    Some(s) => info!("problem '{}' scenario {}: {}", problem, scenario, s),
                    None => info!("problem '{}' scenario {}: not solved", problem, scenario),
                }
            }
        }
        Ok(())
    }

    /// Exports endogenous results to the store (all scenarios, or a
    /// selection).
    pub async fn load_results_to_store(
        &mut self,
        scenarios: Option<&[ScenarioId]>,
    ) -> Result<()> {
        let core = self.core()?;
        match core.problem_status() {
            Some(status) if status.any_solved() => {
                core.pull_endogenous(scenarios, None).await
            }
            _ => {
                warn!("problems not solved yet; nothing exported");
                Ok(())
            }
        }
    }

    /// Nulls out the endogenous value columns. Exogenous data can then be
    /// reloaded with [load_exogenous_data_to_store](Model::load_exogenous_data_to_store).
    pub async fn reinitialize_store(&mut self) -> Result<()> {
        self.core()?.reinitialize_endogenous().await
    }

    /// Reloads exogenous data and rebuilds the numerical problems.
    pub async fn update_store_and_problems(
        &mut self,
        data: &ExogenousInput,
        allow_none: bool,
    ) -> Result<()> {
        self.load_exogenous_data_to_store(data).await?;
        self.initialize_problems(true, allow_none).await
    }

    /// Compares the store against a reference database within a relative
    /// tolerance.
    pub async fn check_results(
        &self,
        reference: &Path,
        tolerance: Option<f64>,
    ) -> Result<bool> {
        let tolerance = tolerance.unwrap_or(self.config.tolerance_results_check);
        self.core()?.check_results(reference, tolerance).await
    }

    /// Per-(problem, scenario) status ledger, if problems were initialized.
    pub fn problem_status(&self) -> Option<&ProblemStatus> {
        self.core.as_ref().and_then(|c| c.problem_status())
    }

    fn index_ref(&self) -> Result<&Index> {
        if let Some(core) = &self.core {
            return Ok(&core.index);
        }
        self.index.as_ref().ok_or_else(|| {
            Error::Operational("coordinates not loaded; call load_model_coordinates first".into())
        })
    }

    /// Inspector: one set of the catalog.
    pub fn set(&self, name: &str) -> Result<&SetTable> {
        let index = self.index_ref()?;
        index
            .set_by_key(name)
            .map(|(_, set)| set)
            .ok_or_else(|| Error::settings(name.to_string(), "unknown set"))
    }

    /// Inspector: current values of a variable with axis labels.
    ///
    /// `problem` is required iff the variable is type-split; `scenario`
    /// selects the binding row when more than one exists.
    pub fn variable(
        &self,
        name: &str,
        problem: Option<&str>,
        scenario: Option<usize>,
    ) -> Result<(Vec<String>, Vec<String>, Array2<f64>)> {
        self.core()?.variable_values(name, problem, scenario)
    }

    pub fn scenario_count(&self) -> Result<usize> {
        Ok(self.index_ref()?.scenarios().len())
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }
}
