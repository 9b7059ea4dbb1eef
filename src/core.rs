//! Engine orchestration.
//!
//! [Core] ties the catalog, the store and the materialized problems
//! together: it generates the blank store schema, moves data between store
//! rows and tensors (the data binder), drives the solver per scenario, and
//! runs the block Gauss-Seidel coupling loop with its crash-safe
//! snapshot/restore discipline.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use log::{debug, info, warn};
use ndarray::Array2;

use crate::config::Config;
use crate::coords::ScenarioId;
use crate::error::{Error, MissingEntry, Result};
use crate::index::{Index, TableId};
use crate::problem::{
    self, Materialized, ProblemStatus, TableGrid, TableTensor, VariableBinding,
};
use crate::setup::VarKind;
use crate::solver::{Solve, SolverOptions, SolverStatus};
use crate::store::{ColumnSpec, ForeignKeySpec, Store};

/// Exogenous input rows: table name -> (coordinate header -> label, value).
pub type ExogenousInput = BTreeMap<String, Vec<(BTreeMap<String, String>, f64)>>;

pub struct Core {
    pub(crate) config: Config,
    pub(crate) index: Index,
    pub(crate) store: Store,
    pub(crate) materialized: Option<Materialized>,
    pub(crate) status: Option<ProblemStatus>,
}

impl Core {
    pub fn new(config: Config, index: Index, store: Store) -> Core {
        Core {
            config,
            index,
            store,
            materialized: None,
            status: None,
        }
    }

    fn materialized(&self) -> Result<&Materialized> {
        self.materialized.as_ref().ok_or_else(|| {
            Error::Operational("problems not initialized; call initialize_problems first".into())
        })
    }

    /// Creates the set tables and blank data tables in the store.
    ///
    /// Set tables carry the items plus membership markers for each filter;
    /// data tables get the full Cartesian coordinate grid with NULL values.
    pub async fn initialize_blank_store(&mut self) -> Result<()> {
        let batch = self.config.store_batch_size;

        for (_, set) in self.index.sets() {
            let mut columns = vec![
                ColumnSpec::new("id", "INTEGER PRIMARY KEY"),
                ColumnSpec::new(set.name_header(), "TEXT UNIQUE"),
            ];
            for agg in &set.aggregations {
                columns.push(ColumnSpec::new(set.aggregation_header(agg), "TEXT"));
            }
            for filter_key in set.filters.keys() {
                columns.push(ColumnSpec::new(set.filter_header(filter_key), "TEXT"));
            }

            self.store
                .create_table(&set.table_name(), &columns, &[])
                .await?;

            let headers: Vec<String> = columns[1..].iter().map(|c| c.header.clone()).collect();
            let rows: Vec<Vec<Option<String>>> = set
                .items
                .iter()
                .map(|item| {
                    let mut row: Vec<Option<String>> = vec![Some(item.clone())];
                    row.extend(set.aggregations.iter().map(|_| None));
                    row.extend(set.filters.values().map(|values| {
                        if values.contains(item) {
                            Some("1".to_string())
                        } else {
                            None
                        }
                    }));
                    row
                })
                .collect();
            self.store
                .insert_rows(&set.table_name(), &headers, &rows, batch)
                .await?;
        }

        for (_, table) in self.index.tables() {
            let mut columns: Vec<ColumnSpec> = table
                .table_headers
                .iter()
                .map(|c| ColumnSpec::new(c.header.clone(), c.sql_type.clone()))
                .collect();
            columns.push(ColumnSpec::new("values", "REAL"));

            let foreign_keys: Vec<ForeignKeySpec> = table
                .foreign_keys
                .iter()
                .map(|fk| ForeignKeySpec {
                    column: fk.column.clone(),
                    references_table: fk.references_table.clone(),
                    references_column: fk.references_column.clone(),
                })
                .collect();

            self.store
                .create_table(&table.name, &columns, &foreign_keys)
                .await?;

            // full (unfiltered) coordinate grid, values NULL
            let grid_columns: Vec<(String, Vec<String>)> = table
                .coordinates_headers
                .iter()
                .map(|(set_id, header)| (header.clone(), self.index.set(*set_id).items.clone()))
                .collect();
            let grid = crate::coords::LabelFrame::cartesian(&grid_columns);
            let headers: Vec<String> = grid.headers().to_vec();
            let rows: Vec<Vec<Option<String>>> = grid
                .rows()
                .iter()
                .map(|row| row.iter().map(|label| Some(label.clone())).collect())
                .collect();
            self.store
                .insert_rows(&table.name, &headers, &rows, batch)
                .await?;
        }

        info!("blank data structure created at '{}'", self.store.path().display());
        Ok(())
    }

    /// Writes caller-supplied exogenous rows into the store.
    pub async fn load_exogenous_data(&self, data: &ExogenousInput) -> Result<()> {
        for (table_name, rows) in data {
            let (_, table) = self.index.table_by_name(table_name).ok_or_else(|| {
                Error::settings(table_name.clone(), "unknown data table")
            })?;
            let coord_headers: Vec<String> = table
                .coordinates_headers
                .iter()
                .map(|(_, h)| h.clone())
                .collect();

            let upserts: Vec<(Vec<String>, Option<f64>)> = rows
                .iter()
                .map(|(coords, value)| {
                    let tuple: Vec<String> = coord_headers
                        .iter()
                        .map(|h| coords.get(h).cloned().unwrap_or_default())
                        .collect();
                    (tuple, Some(*value))
                })
                .collect();

            self.store
                .bulk_upsert(
                    table_name,
                    &coord_headers,
                    &upserts,
                    self.config.store_batch_size,
                )
                .await?;
        }
        Ok(())
    }

    /// Rejects NULL entries in exogenous value columns, listing the
    /// offending `(table, id)` pairs (truncated).
    pub async fn check_exogenous_coherence(&self) -> Result<()> {
        let mut missing: Vec<MissingEntry> = Vec::new();

        for name in self.index.exogenous_table_names() {
            for id in self.store.null_rows(&name).await? {
                missing.push(MissingEntry { table: name.clone(), id });
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::null_entries("exogenous data check", &missing))
        }
    }

    /// Materializes grids, tensors and bindings, then feeds every exogenous
    /// parameter from the store.
    pub async fn initialize_problems(&mut self, force: bool, allow_none: bool) -> Result<()> {
        if self.materialized.is_some() && !force {
            return Err(Error::Operational(
                "problems already initialized; pass force to rebuild".into(),
            ));
        }
        if !allow_none {
            self.check_exogenous_coherence().await?;
        }

        self.materialized = Some(problem::materialize(&self.index)?);
        self.push_exogenous(None, None, allow_none).await?;

        let problem_keys: Vec<String> = self
            .index
            .problems()
            .iter()
            .map(|(k, _)| k.clone())
            .collect();
        self.status = Some(ProblemStatus::init(
            &problem_keys,
            self.index.scenarios().ids(),
        ));
        Ok(())
    }

    /// Pulls filtered store rows into the exogenous parameters.
    ///
    /// `scenarios` restricts the binding rows to those whose inter-problem
    /// columns match the selected scenarios; `vars` is an optional symbol
    /// allowlist.
    pub async fn push_exogenous(
        &mut self,
        scenarios: Option<&[ScenarioId]>,
        vars: Option<&[String]>,
        allow_none: bool,
    ) -> Result<()> {
        if let Some(allowlist) = vars {
            for symbol in allowlist {
                if self.index.variable_by_symbol(symbol).is_none() {
                    return Err(Error::settings(
                        symbol.clone(),
                        "unknown variable in update list",
                    ));
                }
            }
        }

        let materialized = self.materialized.as_ref().ok_or_else(|| {
            Error::Operational("problems not initialized".into())
        })?;

        // collect assignments first; the arena mutation happens after the reads
        let mut assignments: Vec<(crate::tensor::TensorId, Array2<f64>)> = Vec::new();

        for (variable_id, variable) in self.index.variables() {
            if let Some(allowlist) = vars {
                if !allowlist.contains(&variable.symbol) {
                    continue;
                }
            }

            let binding = match materialized.bindings.get(&variable_id) {
                Some(b) => b,
                None => continue,
            };
            let table = self.index.table(variable.table);
            let coord_headers: Vec<String> = table
                .coordinates_headers
                .iter()
                .map(|(_, h)| h.clone())
                .collect();

            for (problem_key, binding_table) in binding.tables() {
                let kind = variable.kind_for(problem_key);
                if kind != Some(VarKind::Exogenous) {
                    continue;
                }

                let selected: BTreeSet<usize> = match scenarios {
                    None => (0..binding_table.rows.len()).collect(),
                    Some(ids) => ids
                        .iter()
                        .flat_map(|s| {
                            binding_table
                                .rows_for_scenario(&self.index.scenarios().coords(*s))
                                .into_iter()
                                .map(|(i, _)| i)
                        })
                        .collect(),
                };

                for row_index in selected {
                    let row = &binding_table.rows[row_index];
                    let store_rows = self
                        .store
                        .select_where(&table.name, &coord_headers, &row.filter)
                        .await?;

                    if !allow_none {
                        let nulls: Vec<MissingEntry> = store_rows
                            .iter()
                            .filter(|r| r.value.is_none())
                            .map(|r| MissingEntry {
                                table: table.name.clone(),
                                id: r.id,
                            })
                            .collect();
                        if !nulls.is_empty() {
                            return Err(Error::null_entries(
                                &format!("variable '{}'", variable.symbol),
                                &nulls,
                            ));
                        }
                    }

                    let matrix = problem::pivot_rows(variable, &store_rows, allow_none)?;
                    assignments.push((row.tensor.tensor_id(), matrix));
                }
            }
        }

        let materialized = self.materialized.as_mut().expect("checked above");
        for (tensor, matrix) in assignments {
            materialized.arena.assign_parameter(
                tensor,
                matrix,
                self.config.sparse_zero_ratio_threshold,
            )?;
        }
        Ok(())
    }

    /// Writes decision-tensor values back to the store.
    ///
    /// Single-grid tables export whole; per-scenario partitions are
    /// restricted to `scenarios` when given. Tables whose tensors hold no
    /// value yet are skipped with a warning.
    pub async fn pull_endogenous(
        &self,
        scenarios: Option<&[ScenarioId]>,
        tables: Option<&[String]>,
    ) -> Result<()> {
        let materialized = self.materialized()?;

        for (table_id, table) in self.index.tables() {
            if !(table.is_endogenous_anywhere() || table.table_type.is_split()) {
                continue;
            }
            if let Some(allowlist) = tables {
                if !allowlist.contains(&table.name) {
                    continue;
                }
            }

            let (grid, tensor) = match (
                materialized.grids.get(&table_id),
                materialized.tensors.get(&table_id),
            ) {
                (Some(g), Some(t)) => (g, t),
                _ => continue,
            };

            let coord_headers: Vec<String> = table
                .coordinates_headers
                .iter()
                .map(|(_, h)| h.clone())
                .collect();

            let mut upserts: Vec<(Vec<String>, Option<f64>)> = Vec::new();
            match (grid, tensor) {
                (TableGrid::Single(frame), TableTensor::Single(id)) => {
                    let value = match materialized.arena.get(*id).value() {
                        Some(v) => v,
                        None => {
                            warn!("no values in tensor of table '{}'; skipping export", table.name);
                            continue;
                        }
                    };
                    for (pos, row) in frame.rows().iter().enumerate() {
                        upserts.push((row.clone(), Some(value[(pos, 0)])));
                    }
                }
                (TableGrid::PerScenario(frames), TableTensor::PerScenario(ids)) => {
                    for (scenario, frame) in frames {
                        if let Some(list) = scenarios {
                            if !list.contains(scenario) {
                                continue;
                            }
                        }
                        let id = match ids.get(scenario) {
                            Some(id) => id,
                            None => continue,
                        };
                        let value = match materialized.arena.get(*id).value() {
                            Some(v) => v,
                            None => {
                                warn!(
                                    "no values in tensor of table '{}' scenario {}; skipping",
                                    table.name, scenario
                                );
                                continue;
                            }
                        };
                        for (pos, row) in frame.rows().iter().enumerate() {
                            upserts.push((row.clone(), Some(value[(pos, 0)])));
                        }
                    }
                }
                _ => {
                    return Err(Error::Operational(
                        "grid and tensor partitioning disagree".into(),
                    ))
                }
            }

            if !upserts.is_empty() {
                self.store
                    .bulk_upsert(
                        &table.name,
                        &coord_headers,
                        &upserts,
                        self.config.store_batch_size,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Solves one (problem, scenario) instance and records its status.
    /// Solver values are written into the tensors only on optimal.
    fn solve_instance(
        &mut self,
        solver: &dyn Solve,
        options: &SolverOptions,
        problem_key: &str,
        scenario: ScenarioId,
    ) -> Result<SolverStatus> {
        let setup = self
            .index
            .problem(problem_key)
            .ok_or_else(|| Error::settings(problem_key.to_string(), "unknown problem"))?
            .clone();

        let materialized = self.materialized()?;
        let (lowered, slots) =
            problem::lower_instance(&self.index, materialized, problem_key, &setup, scenario)?;

        let outcome = solver.solve(&lowered, options);
        let status = outcome.status.clone();

        if status.is_optimal() {
            let materialized = self.materialized.as_mut().expect("checked above");
            problem::write_back(&mut materialized.arena, &slots, &outcome.values)?;
        } else {
            warn!(
                "problem '{}' scenario {}: status {}",
                problem_key, scenario, status
            );
        }

        if let Some(ledger) = &mut self.status {
            ledger.record(problem_key, scenario, status.clone());
        }
        Ok(status)
    }

    /// Solves every subproblem independently, in declared order, without
    /// exchanging endogenous values between them.
    pub async fn solve_independent(
        &mut self,
        solver: &dyn Solve,
        options: &SolverOptions,
    ) -> Result<()> {
        self.materialized()?;
        let problem_keys: Vec<String> = self
            .index
            .problems()
            .iter()
            .map(|(k, _)| k.clone())
            .collect();
        let scenarios: Vec<ScenarioId> = self.index.scenarios().ids().collect();

        for problem_key in &problem_keys {
            for &scenario in &scenarios {
                let status = self.solve_instance(solver, options, problem_key, scenario)?;
                debug!(
                    "problem '{}' scenario {}: {}",
                    problem_key, scenario, status
                );
            }
        }
        Ok(())
    }

    /// Block Gauss-Seidel fixed point over the declared subproblems.
    ///
    /// The store file is copied to a backup before the scenario loop and
    /// restored on every exit path, so the on-disk store is never mutated
    /// unless the caller later re-exports results explicitly.
    pub async fn solve_coupled(
        &mut self,
        solver: &dyn Solve,
        options: &SolverOptions,
        tolerance: f64,
        max_iterations: usize,
    ) -> Result<()> {
        self.materialized()?;
        if self.index.problems().len() < 2 {
            return Err(Error::Operational(
                "coupling needs at least two subproblems".into(),
            ));
        }

        let backup = path_with_suffix(self.store.path(), "_backup");
        let previous = path_with_suffix(self.store.path(), "_previous");

        self.store.snapshot_to(&backup).await?;

        let result = self
            .coupling_scenarios(solver, options, tolerance, max_iterations, &previous)
            .await;

        // crash-safe restore: drop whatever the iterations wrote and put the
        // backup in place, on success and on error alike
        let cleanup = async {
            Store::remove_file(&previous).await?;
            self.store.restore_from(&backup).await
        };
        match (result, cleanup.await) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e.into()),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn coupling_scenarios(
        &mut self,
        solver: &dyn Solve,
        options: &SolverOptions,
        tolerance: f64,
        max_iterations: usize,
        previous: &std::path::Path,
    ) -> Result<()> {
        let problem_keys: Vec<String> = self
            .index
            .problems()
            .iter()
            .map(|(k, _)| k.clone())
            .collect();
        let scenarios: Vec<ScenarioId> = self.index.scenarios().ids().collect();

        let endogenous_tables: Vec<(String, Vec<String>)> = self
            .index
            .tables()
            .filter(|(_, t)| t.is_endogenous_anywhere())
            .map(|(_, t)| {
                (
                    t.name.clone(),
                    t.coordinates_headers
                        .iter()
                        .map(|(_, h)| h.clone())
                        .collect(),
                )
            })
            .collect();

        for &scenario in &scenarios {
            let labels = self.index.scenarios().labels(scenario).to_vec();
            info!("solving coupled problems for scenario {:?}", labels);

            let mut iteration = 0usize;
            loop {
                iteration += 1;
                if iteration > max_iterations {
                    warn!(
                        "iteration cap {} hit before convergence (tolerance {})",
                        max_iterations, tolerance
                    );
                    break;
                }
                info!("iteration {} of at most {}", iteration, max_iterations);

                self.store.snapshot_to(previous).await?;

                // Gauss-Seidel ordering: each subproblem observes the exports
                // of the subproblems already solved this iteration, so the
                // parameters are refreshed before every solve
                let mut all_optimal = true;
                for problem_key in &problem_keys {
                    if iteration > 1 || problem_key != &problem_keys[0] {
                        self.push_exogenous(
                            Some(&[scenario]),
                            None,
                            self.config.allow_none_values,
                        )
                        .await?;
                    }
                    let status =
                        self.solve_instance(solver, options, problem_key, scenario)?;
                    if !status.is_optimal() {
                        all_optimal = false;
                        break;
                    }
                    self.pull_endogenous(Some(&[scenario]), None).await?;
                }

                if !all_optimal {
                    warn!("scenario {:?} marked failed; moving on", labels);
                    Store::remove_file(previous).await?;
                    break;
                }

                if iteration == 1 {
                    Store::remove_file(previous).await?;
                    continue;
                }

                let diff = self
                    .store
                    .relative_diff(
                        &endogenous_tables,
                        previous,
                        self.config.rounding_digits_relative_diff,
                    )
                    .await?;
                Store::remove_file(previous).await?;

                let above: BTreeMap<&String, &f64> =
                    diff.iter().filter(|(_, v)| **v > tolerance).collect();
                if above.is_empty() {
                    info!(
                        "convergence reached in {} iterations for scenario {:?}",
                        iteration, labels
                    );
                    break;
                }
                for (table, value) in above {
                    info!("table '{}': relative diff {} above tolerance", table, value);
                }
            }
        }
        Ok(())
    }

    /// Compares the store against a reference database.
    pub async fn check_results(&self, reference: &std::path::Path, tolerance: f64) -> Result<bool> {
        let tables: Vec<(String, Vec<String>)> = self
            .index
            .tables()
            .map(|(_, t)| {
                (
                    t.name.clone(),
                    t.coordinates_headers
                        .iter()
                        .map(|(_, h)| h.clone())
                        .collect(),
                )
            })
            .collect();
        Ok(self
            .store
            .equal_within_tolerance(&tables, reference, tolerance)
            .await?)
    }

    /// Nulls out every endogenous value column.
    pub async fn reinitialize_endogenous(&self) -> Result<()> {
        for name in self.index.endogenous_table_names() {
            self.store.null_out_values(&name).await?;
        }
        Ok(())
    }

    pub fn problem_status(&self) -> Option<&ProblemStatus> {
        self.status.as_ref()
    }

    /// Current value matrix of a variable with its axis labels, for
    /// inspection. Problem key is required iff the variable is type-split;
    /// scenario selection is required iff more than one binding row exists.
    pub fn variable_values(
        &self,
        symbol: &str,
        problem_key: Option<&str>,
        row_index: Option<usize>,
    ) -> Result<(Vec<String>, Vec<String>, Array2<f64>)> {
        let materialized = self.materialized()?;
        let (variable_id, variable) = self
            .index
            .variable_by_symbol(symbol)
            .ok_or_else(|| Error::settings(symbol.to_string(), "unknown variable"))?;
        let binding = materialized
            .bindings
            .get(&variable_id)
            .ok_or_else(|| Error::Operational("variable not materialized".into()))?;

        let table = match (binding, problem_key) {
            (VariableBinding::Single(t), None) => t,
            (VariableBinding::Single(_), Some(_)) => {
                return Err(Error::Operational(
                    "variable is not type-split; omit the problem key".into(),
                ))
            }
            (VariableBinding::PerProblem(map), Some(key)) => map.get(key).ok_or_else(|| {
                Error::settings(symbol.to_string(), format!("no binding under problem '{}'", key))
            })?,
            (VariableBinding::PerProblem(_), None) => {
                return Err(Error::Operational(
                    "variable is type-split; a problem key is required".into(),
                ))
            }
        };

        let row = match (table.rows.len(), row_index) {
            (0, _) => return Err(Error::MissingData("variable has no binding rows".into())),
            (1, None) => &table.rows[0],
            (1, Some(0)) => &table.rows[0],
            (_, Some(i)) if i < table.rows.len() => &table.rows[i],
            (n, None) => {
                return Err(Error::Operational(format!(
                    "variable has {} binding rows; a scenario index is required",
                    n
                )))
            }
            (n, Some(i)) => {
                return Err(Error::Operational(format!(
                    "binding row {} out of range (0..{})",
                    i, n
                )))
            }
        };

        let values = row.tensor.value(&materialized.arena).ok_or_else(|| {
            Error::MissingData(format!("variable '{}' has no values yet", symbol))
        })?;

        let row_labels = variable
            .rows
            .as_ref()
            .map(|d| d.items.clone())
            .unwrap_or_else(|| vec![String::new()]);
        let col_labels = variable
            .cols
            .as_ref()
            .map(|d| d.items.clone())
            .unwrap_or_else(|| vec![String::new()]);
        Ok((row_labels, col_labels, values))
    }

    pub fn table_id_by_name(&self, name: &str) -> Option<TableId> {
        self.index.table_by_name(name).map(|(id, _)| id)
    }
}

fn path_with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    if let Some(ext) = path.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    path.with_file_name(name)
}
