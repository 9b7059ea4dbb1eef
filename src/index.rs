//! Central registry of sets, data tables and variables.
//!
//! [Index::build] loads the declarative setup, resolves `copy_from` chains,
//! validates structural coherence (aggregating every finding into a single
//! [ValidationReport](crate::error::ValidationReport)) and completes tables
//! with their derived store schema. The catalog is three arena vectors with
//! small integer handles; cross-references are indices, and dependency only
//! flows variable -> table -> set, so no cycles arise. After construction
//! the index is read-only.

pub mod data_table;
pub mod set_table;
pub mod variable;

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::constants;
use crate::coords::ScenarioTable;
use crate::error::{Result, ValidationReport};
use crate::setup::{
    ProblemSetup, SetSetup, SetupSource, ShapeDim, TableSetup, TableType, VarKind,
};

pub use data_table::{DataTable, ForeignKey, TableColumn, TableId};
pub use set_table::{SetId, SetTable};
pub use variable::{DimCoordinate, Variable, VariableId};

/// Immutable catalog built from a [SetupSource].
#[derive(Debug)]
pub struct Index {
    sets: Vec<SetTable>,
    tables: Vec<DataTable>,
    variables: Vec<Variable>,
    set_lookup: BTreeMap<String, SetId>,
    table_lookup: BTreeMap<String, TableId>,
    variable_lookup: BTreeMap<String, VariableId>,
    /// Subproblems in declared (key) order.
    problems: Vec<(String, ProblemSetup)>,
    scenarios: ScenarioTable,
}

impl Index {
    pub fn build(source: &dyn SetupSource) -> Result<Index> {
        let mut report = ValidationReport::new();

        let sets_setup = source.structure_sets()?;
        let tables_setup = source.structure_tables()?;
        let problems_setup = source.problems()?;

        let resolved_sets = resolve_copy_from(&sets_setup, &mut report);
        let (sets, set_lookup) = build_sets(&resolved_sets, &mut report);

        let problem_keys: BTreeSet<String> = problems_setup.keys().cloned().collect();
        let (tables, table_lookup) = build_tables(
            &tables_setup,
            &sets,
            &set_lookup,
            &problem_keys,
            &mut report,
        );

        let (variables, variable_lookup) =
            build_variables(&tables_setup, &sets, &set_lookup, &tables, &table_lookup, &mut report);

        let scenarios = ScenarioTable::build(
            &sets
                .iter()
                .filter(|s| s.split_problem)
                .map(|s| (s.name_header(), s.items.clone()))
                .collect::<Vec<_>>(),
        );

        debug!(
            "index built: {} sets, {} tables, {} variables, {} scenarios",
            sets.len(),
            tables.len(),
            variables.len(),
            scenarios.len()
        );

        report.into_result(Index {
            sets,
            tables,
            variables,
            set_lookup,
            table_lookup,
            variable_lookup,
            problems: problems_setup.into_iter().collect(),
            scenarios,
        })
    }

    pub fn sets(&self) -> impl Iterator<Item = (SetId, &SetTable)> {
        self.sets.iter().enumerate().map(|(i, s)| (SetId(i), s))
    }

    pub fn tables(&self) -> impl Iterator<Item = (TableId, &DataTable)> {
        self.tables.iter().enumerate().map(|(i, t)| (TableId(i), t))
    }

    pub fn variables(&self) -> impl Iterator<Item = (VariableId, &Variable)> {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| (VariableId(i), v))
    }

    pub fn set(&self, id: SetId) -> &SetTable {
        &self.sets[id.0]
    }

    pub fn table(&self, id: TableId) -> &DataTable {
        &self.tables[id.0]
    }

    pub fn variable(&self, id: VariableId) -> &Variable {
        &self.variables[id.0]
    }

    /// Case-insensitive set lookup.
    pub fn set_by_key(&self, key: &str) -> Option<(SetId, &SetTable)> {
        let id = *self.set_lookup.get(&key.to_lowercase())?;
        Some((id, &self.sets[id.0]))
    }

    pub fn table_by_name(&self, name: &str) -> Option<(TableId, &DataTable)> {
        let id = *self.table_lookup.get(name)?;
        Some((id, &self.tables[id.0]))
    }

    pub fn variable_by_symbol(&self, symbol: &str) -> Option<(VariableId, &Variable)> {
        let id = *self.variable_lookup.get(symbol)?;
        Some((id, &self.variables[id.0]))
    }

    /// Variables rooted on the given table.
    pub fn table_variables(&self, table: TableId) -> impl Iterator<Item = (VariableId, &Variable)> {
        self.variables()
            .filter(move |(_, v)| v.table == table)
    }

    /// Subproblems in declared order.
    pub fn problems(&self) -> &[(String, ProblemSetup)] {
        &self.problems
    }

    pub fn problem(&self, key: &str) -> Option<&ProblemSetup> {
        self.problems
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, p)| p)
    }

    pub fn scenarios(&self) -> &ScenarioTable {
        &self.scenarios
    }

    pub fn split_sets(&self) -> impl Iterator<Item = (SetId, &SetTable)> {
        self.sets().filter(|(_, s)| s.split_problem)
    }

    /// Names of tables holding endogenous values under at least one problem.
    pub fn endogenous_table_names(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| t.is_endogenous_anywhere())
            .map(|t| t.name.clone())
            .collect()
    }

    /// Names of tables the user feeds before a solve.
    pub fn exogenous_table_names(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| t.table_type.has_exogenous())
            .map(|t| t.name.clone())
            .collect()
    }
}

/// Resolves `copy_from` chains transitively. Cycles and dangling targets
/// are reported; the offending sets keep their own (possibly empty) items.
fn resolve_copy_from(
    sets: &BTreeMap<String, SetSetup>,
    report: &mut ValidationReport,
) -> BTreeMap<String, SetSetup> {
    let lower: BTreeMap<String, &String> =
        sets.keys().map(|k| (k.to_lowercase(), k)).collect();

    let mut resolved = sets.clone();

    for key in sets.keys() {
        let mut chain = vec![key.to_lowercase()];
        let mut cursor = key;

        while let Some(target) = &sets[cursor].copy_from {
            let target_key = match lower.get(&target.to_lowercase()) {
                Some(k) => *k,
                None => {
                    report.push(
                        format!("{}.copy_from", key),
                        format!("referenced set '{}' is not defined", target),
                    );
                    break;
                }
            };

            if chain.contains(&target_key.to_lowercase()) {
                report.push(
                    format!("{}.copy_from", key),
                    format!("cycle detected through '{}'", target_key),
                );
                break;
            }
            chain.push(target_key.to_lowercase());

            if sets[target_key].copy_from.is_none() {
                if let Some(entry) = resolved.get_mut(key) {
                    entry.items = sets[target_key].items.clone();
                    entry.filters = sets[target_key].filters.clone();
                }
                break;
            }
            cursor = target_key;
        }
    }

    resolved
}

fn build_sets(
    sets_setup: &BTreeMap<String, SetSetup>,
    report: &mut ValidationReport,
) -> (Vec<SetTable>, BTreeMap<String, SetId>) {
    let mut sets = Vec::new();
    let mut lookup = BTreeMap::new();

    for (key, setup) in sets_setup {
        let mut seen = BTreeSet::new();
        for item in &setup.items {
            if !seen.insert(item) {
                report.push(
                    format!("{}.items", key),
                    format!("duplicate item '{}'", item),
                );
            }
        }

        for (filter_key, values) in &setup.filters {
            for value in values {
                if !setup.items.contains(value) {
                    report.push(
                        format!("{}.filters.{}", key, filter_key),
                        format!("filter value '{}' is not an item of the set", value),
                    );
                }
            }
        }

        if lookup.contains_key(&key.to_lowercase()) {
            report.push(key.clone(), "set key clashes case-insensitively");
            continue;
        }
        lookup.insert(key.to_lowercase(), SetId(sets.len()));
        sets.push(SetTable::from_setup(key, setup));
    }

    (sets, lookup)
}

fn build_tables(
    tables_setup: &BTreeMap<String, TableSetup>,
    sets: &[SetTable],
    set_lookup: &BTreeMap<String, SetId>,
    problem_keys: &BTreeSet<String>,
    report: &mut ValidationReport,
) -> (Vec<DataTable>, BTreeMap<String, TableId>) {
    let mut tables = Vec::new();
    let mut lookup = BTreeMap::new();

    let split_sets: Vec<SetId> = sets
        .iter()
        .enumerate()
        .filter(|(_, s)| s.split_problem)
        .map(|(i, _)| SetId(i))
        .collect();

    for (name, setup) in tables_setup {
        let mut coordinates = Vec::new();
        for coord in &setup.coordinates {
            match set_lookup.get(&coord.to_lowercase()) {
                Some(id) => coordinates.push(*id),
                None => report.push(
                    format!("{}.coordinates", name),
                    format!("'{}' is not a registered set", coord),
                ),
            }
        }

        if setup.table_type.has_endogenous() || setup.table_type.is_split() {
            let missing: Vec<&str> = split_sets
                .iter()
                .filter(|id| !coordinates.contains(id))
                .map(|id| sets[id.0].key.as_str())
                .collect();
            if !missing.is_empty() {
                report.push(
                    format!("{}.coordinates", name),
                    format!("missing inter-problem sets: {:?}", missing),
                );
            }
        }

        if setup.integer {
            match &setup.table_type {
                TableType::Single(VarKind::Exogenous) => report.push(
                    name.clone(),
                    "exogenous tables cannot be integer",
                ),
                TableType::Single(VarKind::Constant) => report.push(
                    name.clone(),
                    "constant tables cannot be integer",
                ),
                _ => {}
            }
        }

        if let TableType::PerProblem(map) = &setup.table_type {
            let declared: BTreeSet<String> = map.keys().cloned().collect();
            if declared != *problem_keys {
                report.push(
                    format!("{}.type", name),
                    format!(
                        "type-split keys {:?} must exactly match declared problems {:?}",
                        declared, problem_keys
                    ),
                );
            }
        }

        let mut table = DataTable::from_setup(name, setup, coordinates);
        complete_table_schema(&mut table, sets);

        lookup.insert(name.clone(), TableId(tables.len()));
        tables.push(table);
    }

    (tables, lookup)
}

/// Derives the store schema: a synthetic leading id column, one TEXT column
/// per coordinate referencing the set's name column.
fn complete_table_schema(table: &mut DataTable, sets: &[SetTable]) {
    table.table_headers.push(TableColumn {
        header: "id".to_string(),
        sql_type: "INTEGER PRIMARY KEY".to_string(),
    });

    for &set_id in &table.coordinates {
        let set = &sets[set_id.0];
        let header = set.name_header();
        table.table_headers.push(TableColumn {
            header: header.clone(),
            sql_type: "TEXT".to_string(),
        });
        table.coordinates_headers.push((set_id, header.clone()));
        table.foreign_keys.push(ForeignKey {
            column: header.clone(),
            references_table: set.table_name(),
            references_column: header,
        });
    }
}

fn build_variables(
    tables_setup: &BTreeMap<String, TableSetup>,
    sets: &[SetTable],
    set_lookup: &BTreeMap<String, SetId>,
    tables: &[DataTable],
    table_lookup: &BTreeMap<String, TableId>,
    report: &mut ValidationReport,
) -> (Vec<Variable>, BTreeMap<String, VariableId>) {
    let mut variables = Vec::new();
    let mut lookup: BTreeMap<String, VariableId> = BTreeMap::new();

    for (table_name, table_setup) in tables_setup {
        let table_id = match table_lookup.get(table_name) {
            Some(id) => *id,
            None => continue,
        };
        let table = &tables[table_id.0];

        for (symbol, var_setup) in &table_setup.variables_info {
            let path = format!("{}.variables_info.{}", table_name, symbol);

            if lookup.contains_key(symbol) {
                report.push(path.clone(), "variable symbol already declared");
                continue;
            }

            if var_setup.value.is_some() {
                if !matches!(table_setup.table_type, TableType::Single(VarKind::Constant)) {
                    report.push(
                        format!("{}.value", path),
                        "'value' can only be assigned on constant tables",
                    );
                } else if let Some(tag) = &var_setup.value {
                    if !constants::is_registered(tag) {
                        report.push(
                            format!("{}.value", path),
                            format!(
                                "constant generator '{}' not registered (available: {:?})",
                                tag,
                                constants::registered_names()
                            ),
                        );
                    }
                }
            }

            if var_setup.blank_fill.is_some() && !table_setup.table_type.has_exogenous() {
                report.push(
                    format!("{}.blank_fill", path),
                    "'blank_fill' can only be assigned on exogenous variables",
                );
            }

            let mut rows_set: Option<SetId> = None;
            let mut cols_set: Option<SetId> = None;
            let mut coord_filters: BTreeMap<SetId, BTreeMap<String, Vec<String>>> =
                BTreeMap::new();

            for (coord_key, coord_setup) in &var_setup.coordinates {
                let set_id = match set_lookup.get(&coord_key.to_lowercase()) {
                    Some(id) if table.coordinates.contains(id) => *id,
                    _ => {
                        report.push(
                            path.clone(),
                            format!("coordinate '{}' not found in table coordinates", coord_key),
                        );
                        continue;
                    }
                };

                match coord_setup.dim {
                    Some(ShapeDim::Rows) => {
                        if rows_set.replace(set_id).is_some() {
                            report.push(
                                format!("{}.{}.dim", path, coord_key),
                                "rows dimension declared twice",
                            );
                        }
                    }
                    Some(ShapeDim::Cols) => {
                        if cols_set.replace(set_id).is_some() {
                            report.push(
                                format!("{}.{}.dim", path, coord_key),
                                "cols dimension declared twice",
                            );
                        }
                    }
                    Some(ShapeDim::RowsCols) => {
                        if rows_set.replace(set_id).is_some() || cols_set.replace(set_id).is_some()
                        {
                            report.push(
                                format!("{}.{}.dim", path, coord_key),
                                "shape dimension declared twice",
                            );
                        }
                    }
                    None => {}
                }

                let set = &sets[set_id.0];
                if coord_setup.dim.is_some() && set.split_problem {
                    report.push(
                        format!("{}.{}.dim", path, coord_key),
                        "inter-problem sets cannot provide a shape dimension",
                    );
                }
                for (filter_key, values) in &coord_setup.filters {
                    match set.filters.get(filter_key) {
                        None => report.push(
                            format!("{}.{}.filters.{}", path, coord_key, filter_key),
                            format!("filter '{}' not defined on set '{}'", filter_key, set.key),
                        ),
                        Some(allowed) => {
                            for value in values {
                                if !allowed.contains(value) {
                                    report.push(
                                        format!("{}.{}.filters.{}", path, coord_key, filter_key),
                                        format!(
                                            "value '{}' not part of set '{}' filter values",
                                            value, set.key
                                        ),
                                    );
                                }
                            }
                        }
                    }
                }

                coord_filters.insert(set_id, coord_setup.filters.clone());
            }

            let variable = categorize_coordinates(
                symbol,
                table_id,
                table,
                table_setup,
                var_setup.value.clone(),
                var_setup.blank_fill,
                rows_set,
                cols_set,
                &coord_filters,
                sets,
            );

            for (label, dim) in [("rows", &variable.rows), ("cols", &variable.cols)] {
                if let Some(d) = dim {
                    if d.items.is_empty() {
                        report.push(
                            format!("{}.{}", path, label),
                            "empty label list after filtering; check set filters",
                        );
                    }
                }
            }
            for dim in variable.intra.iter().chain(variable.inter.iter()) {
                if dim.items.is_empty() {
                    report.push(
                        path.clone(),
                        format!("coordinate '{}' has no items after filtering", dim.header),
                    );
                }
            }

            lookup.insert(symbol.clone(), VariableId(variables.len()));
            variables.push(variable);
        }
    }

    (variables, lookup)
}

/// Partitions the table's coordinates into rows / cols / intra / inter and
/// resolves each category's label list (inter dimensions are never filtered).
#[allow(clippy::too_many_arguments)]
fn categorize_coordinates(
    symbol: &str,
    table_id: TableId,
    table: &DataTable,
    table_setup: &TableSetup,
    value: Option<String>,
    blank_fill: Option<f64>,
    rows_set: Option<SetId>,
    cols_set: Option<SetId>,
    coord_filters: &BTreeMap<SetId, BTreeMap<String, Vec<String>>>,
    sets: &[SetTable],
) -> Variable {
    let empty = BTreeMap::new();

    let mut rows = None;
    let mut cols = None;
    let mut intra = Vec::new();
    let mut inter = Vec::new();

    for &set_id in &table.coordinates {
        let set = &sets[set_id.0];
        let filters = coord_filters.get(&set_id).unwrap_or(&empty);
        let filtered = DimCoordinate {
            set: set_id,
            header: set.name_header(),
            items: set.filtered_items(filters),
        };

        if rows_set == Some(set_id) {
            rows = Some(filtered.clone());
        }
        if cols_set == Some(set_id) {
            cols = Some(filtered.clone());
        }
        if rows_set != Some(set_id) && cols_set != Some(set_id) {
            if set.split_problem {
                inter.push(DimCoordinate {
                    set: set_id,
                    header: set.name_header(),
                    items: set.items.clone(),
                });
            } else {
                intra.push(filtered);
            }
        }
    }

    Variable {
        symbol: symbol.to_string(),
        table: table_id,
        table_type: table_setup.table_type.clone(),
        value,
        blank_fill,
        rows,
        cols,
        intra,
        inter,
    }
}

#[cfg(test)]
mod tests;
