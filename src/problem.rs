//! Problem materializer.
//!
//! Turns the validated catalog into concrete numerical structures: one
//! coordinate grid per endogenous (or type-split) table, decision tensors
//! backing those grids, and a binding table per variable mapping each
//! (inter x intra) combination to a tensor and to the equality filter that
//! identifies its store rows. Lowering then instantiates one scalar
//! subproblem per (problem key, scenario).

use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use ndarray::Array2;

use crate::constants;
use crate::coords::{LabelFrame, ScenarioId};
use crate::error::{Error, Result};
use crate::expr::{self, AffineMatrix, ObjectiveSense};
use crate::index::{DimCoordinate, Index, TableId, Variable, VariableId};
use crate::linexpr::{self, VarId};
use crate::setup::{ProblemSetup, VarKind};
use crate::solver::{LoweredProblem, SolverStatus, VarSpec};
use crate::store::{FilterMap, FilterValue};
use crate::tensor::{TensorArena, TensorId, TensorRef};

/// Coordinate grid of a table: single, or partitioned per scenario for
/// type-split tables.
#[derive(Debug, Clone)]
pub enum TableGrid {
    Single(LabelFrame),
    PerScenario(BTreeMap<ScenarioId, LabelFrame>),
}

impl TableGrid {
    /// Total row count across partitions.
    pub fn table_length(&self) -> usize {
        match self {
            TableGrid::Single(frame) => frame.len(),
            TableGrid::PerScenario(map) => map.values().map(LabelFrame::len).sum(),
        }
    }
}

/// Decision tensor(s) backing a table grid.
#[derive(Debug, Clone)]
pub enum TableTensor {
    Single(TensorId),
    PerScenario(BTreeMap<ScenarioId, TensorId>),
}

/// One row of a variable binding table.
#[derive(Debug, Clone)]
pub struct BindingRow {
    /// Labels for the hierarchy columns, in hierarchy order.
    pub labels: Vec<String>,
    /// Store filter uniquely identifying the rows feeding this tensor.
    pub filter: FilterMap,
    pub tensor: TensorRef,
}

/// Per-variable binding: index = deterministic enumeration of the
/// `sets_parsing_hierarchy` (inter first, intra second) combinations.
#[derive(Debug, Clone)]
pub struct BindingTable {
    /// Hierarchy column headers, inter first.
    pub hierarchy: Vec<String>,
    /// The subset of `hierarchy` that is inter-problem.
    pub inter_headers: Vec<String>,
    pub rows: Vec<BindingRow>,
}

impl BindingTable {
    /// Rows whose inter columns match the scenario coordinates. Variables
    /// without inter dimensions match every scenario.
    pub fn rows_for_scenario<'a>(
        &'a self,
        scenario_coords: &BTreeMap<String, String>,
    ) -> Vec<(usize, &'a BindingRow)> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                self.hierarchy
                    .iter()
                    .zip(row.labels.iter())
                    .all(|(header, label)| match scenario_coords.get(header) {
                        Some(expected) if self.inter_headers.contains(header) => {
                            expected == label
                        }
                        _ => true,
                    })
            })
            .collect()
    }

    /// The single row matching both the scenario and an intra combination.
    fn row_matching(&self, wanted: &BTreeMap<String, String>) -> Option<(usize, &BindingRow)> {
        self.rows.iter().enumerate().find(|(_, row)| {
            self.hierarchy
                .iter()
                .zip(row.labels.iter())
                .all(|(header, label)| match wanted.get(header) {
                    Some(expected) => expected == label,
                    None => true,
                })
        })
    }
}

/// Binding dispatch: one table, or one per problem key for type-split
/// variables (spec: tagged variants instead of runtime type inspection).
#[derive(Debug, Clone)]
pub enum VariableBinding {
    Single(BindingTable),
    PerProblem(BTreeMap<String, BindingTable>),
}

impl VariableBinding {
    pub fn table_for(&self, problem_key: &str) -> Option<&BindingTable> {
        match self {
            VariableBinding::Single(table) => Some(table),
            VariableBinding::PerProblem(map) => map.get(problem_key),
        }
    }

    pub fn tables(&self) -> Vec<(Option<&str>, &BindingTable)> {
        match self {
            VariableBinding::Single(table) => vec![(None, table)],
            VariableBinding::PerProblem(map) => map
                .iter()
                .map(|(key, table)| (Some(key.as_str()), table))
                .collect(),
        }
    }
}

/// Everything `initialize_problems` builds: the tensor arena plus grids,
/// table tensors and variable bindings.
#[derive(Debug)]
pub struct Materialized {
    pub arena: TensorArena,
    pub grids: BTreeMap<TableId, TableGrid>,
    pub tensors: BTreeMap<TableId, TableTensor>,
    pub bindings: BTreeMap<VariableId, VariableBinding>,
}

/// Status ledger of the numerical problems: one row per (problem, scenario).
#[derive(Debug, Clone, Default)]
pub struct ProblemStatus {
    entries: BTreeMap<(String, ScenarioId), Option<SolverStatus>>,
}

impl ProblemStatus {
    pub fn init(problem_keys: &[String], scenarios: impl Iterator<Item = ScenarioId>) -> Self {
        let scenarios: Vec<_> = scenarios.collect();
        let mut entries = BTreeMap::new();
        for key in problem_keys {
            for &scenario in &scenarios {
                entries.insert((key.clone(), scenario), None);
            }
        }
        ProblemStatus { entries }
    }

    pub fn record(&mut self, problem: &str, scenario: ScenarioId, status: SolverStatus) {
        self.entries
            .insert((problem.to_string(), scenario), Some(status));
    }

    pub fn get(&self, problem: &str, scenario: ScenarioId) -> Option<&SolverStatus> {
        self.entries
            .get(&(problem.to_string(), scenario))
            .and_then(|s| s.as_ref())
    }

    pub fn any_solved(&self) -> bool {
        self.entries.values().any(|s| s.is_some())
    }

    pub fn all_optimal(&self, scenario: ScenarioId) -> bool {
        self.entries
            .iter()
            .filter(|((_, s), _)| *s == scenario)
            .all(|(_, status)| matches!(status, Some(s) if s.is_optimal()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(String, ScenarioId), &Option<SolverStatus>)> {
        self.entries.iter()
    }
}

/// Builds the coordinate grids, tensors and bindings for the whole catalog.
pub fn materialize(index: &Index) -> Result<Materialized> {
    let mut arena = TensorArena::new();
    let mut grids = BTreeMap::new();
    let mut tensors = BTreeMap::new();
    let mut bindings = BTreeMap::new();

    for (table_id, table) in index.tables() {
        if !(table.is_endogenous_anywhere() || table.table_type.is_split()) {
            continue;
        }

        let grid = table_grid(index, table_id)?;
        let table_tensor = allocate_table_tensors(&mut arena, &grid, table.integer);

        debug!(
            "table '{}': grid length {}, integer: {}",
            table.name,
            grid.table_length(),
            table.integer
        );

        grids.insert(table_id, grid);
        tensors.insert(table_id, table_tensor);
    }

    for (variable_id, variable) in index.variables() {
        let binding = bind_variable(index, variable, &grids, &tensors, &mut arena)?;
        bindings.insert(variable_id, binding);
    }

    Ok(Materialized {
        arena,
        grids,
        tensors,
        bindings,
    })
}

/// Full Cartesian grid of the table's coordinate sets, restricted to the
/// tuples actually used by at least one variable on the table, partitioned
/// per scenario for type-split tables.
fn table_grid(index: &Index, table_id: TableId) -> Result<TableGrid> {
    let table = index.table(table_id);

    let columns: Vec<(String, Vec<String>)> = table
        .coordinates_headers
        .iter()
        .map(|(set_id, header)| (header.clone(), index.set(*set_id).items.clone()))
        .collect();
    let mut grid = LabelFrame::cartesian(&columns);
    grid.dedup_rows();

    // union of the coordinates every variable on the table touches
    let mut used: Option<LabelFrame> = None;
    for (_, variable) in index.table_variables(table_id) {
        let var_frame = LabelFrame::cartesian(&variable.all_coordinates_with_headers());
        match &mut used {
            None => used = Some(var_frame),
            Some(frame) => {
                let mut aligned = LabelFrame::new(frame.headers().to_vec());
                for row in var_frame.rows() {
                    let reordered: Vec<String> = frame
                        .headers()
                        .iter()
                        .map(|h| {
                            var_frame
                                .column_index(h)
                                .map(|i| row[i].clone())
                                .unwrap_or_default()
                        })
                        .collect();
                    aligned.push_row(reordered);
                }
                frame.append(&aligned);
            }
        }
    }
    if let Some(mut used) = used {
        used.dedup_rows();
        grid = grid.semi_join(&used);
    }

    if !table.table_type.is_split() || index.scenarios().headers().is_empty() {
        return Ok(TableGrid::Single(grid));
    }

    let mut partitions = BTreeMap::new();
    for scenario in index.scenarios().ids() {
        let mut partition = grid.clone();
        for (header, label) in index.scenarios().coords(scenario) {
            partition = partition.filter_eq(&header, &label);
        }
        partitions.insert(scenario, partition);
    }
    Ok(TableGrid::PerScenario(partitions))
}

fn allocate_table_tensors(
    arena: &mut TensorArena,
    grid: &TableGrid,
    integer: bool,
) -> TableTensor {
    match grid {
        TableGrid::Single(frame) => {
            TableTensor::Single(arena.new_decision((frame.len(), 1), integer))
        }
        TableGrid::PerScenario(map) => TableTensor::PerScenario(
            map.iter()
                .map(|(scenario, frame)| {
                    (*scenario, arena.new_decision((frame.len(), 1), integer))
                })
                .collect(),
        ),
    }
}

fn bind_variable(
    index: &Index,
    variable: &Variable,
    grids: &BTreeMap<TableId, TableGrid>,
    tensors: &BTreeMap<TableId, TableTensor>,
    arena: &mut TensorArena,
) -> Result<VariableBinding> {
    match &variable.table_type {
        crate::setup::TableType::Single(kind) => {
            let table = build_binding_table(index, variable, *kind, grids, tensors, arena)?;
            Ok(VariableBinding::Single(table))
        }
        crate::setup::TableType::PerProblem(map) => {
            let mut out = BTreeMap::new();
            for (problem_key, kind) in map {
                let table =
                    build_binding_table(index, variable, *kind, grids, tensors, arena)?;
                out.insert(problem_key.clone(), table);
            }
            Ok(VariableBinding::PerProblem(out))
        }
    }
}

fn build_binding_table(
    index: &Index,
    variable: &Variable,
    kind: VarKind,
    grids: &BTreeMap<TableId, TableGrid>,
    tensors: &BTreeMap<TableId, TableTensor>,
    arena: &mut TensorArena,
) -> Result<BindingTable> {
    let hierarchy_dims = variable.sets_parsing_hierarchy();
    let hierarchy: Vec<String> = hierarchy_dims.iter().map(|d| d.header.clone()).collect();
    let inter_headers: Vec<String> = variable.inter.iter().map(|d| d.header.clone()).collect();

    if kind == VarKind::Constant {
        let tag = variable.value.as_deref().ok_or_else(|| {
            Error::settings(
                variable.symbol.clone(),
                "constant variable without a generator tag",
            )
        })?;
        let value = constants::generate(tag, variable.shape_size())?;
        let tensor = arena.new_constant(value);
        return Ok(BindingTable {
            hierarchy: Vec::new(),
            inter_headers: Vec::new(),
            rows: vec![BindingRow {
                labels: Vec::new(),
                filter: FilterMap::new(),
                tensor: TensorRef::Whole(tensor),
            }],
        });
    }

    let combos = hierarchy_combinations(&hierarchy_dims);
    let mut rows = Vec::with_capacity(combos.len());

    for combo in combos {
        let filter = binding_filter(variable, &hierarchy, &combo);

        let tensor = match kind {
            VarKind::Exogenous => {
                TensorRef::Whole(arena.new_parameter(variable.shape_size()))
            }
            VarKind::Endogenous => decision_slice(index, variable, &hierarchy, &combo, grids, tensors)?,
            VarKind::Constant => unreachable!("handled above"),
        };

        rows.push(BindingRow {
            labels: combo,
            filter,
            tensor,
        });
    }

    Ok(BindingTable {
        hierarchy,
        inter_headers,
        rows,
    })
}

/// Enumerates hierarchy label combinations, last dimension fastest.
fn hierarchy_combinations(dims: &[&DimCoordinate]) -> Vec<Vec<String>> {
    let columns: Vec<(String, Vec<String>)> = dims
        .iter()
        .map(|d| (d.header.clone(), d.items.clone()))
        .collect();
    if columns.is_empty() {
        return vec![Vec::new()];
    }
    LabelFrame::cartesian(&columns).rows().to_vec()
}

/// The equality filter identifying the store rows behind one binding row:
/// single labels for the hierarchy columns, label lists for the shape axes.
fn binding_filter(variable: &Variable, hierarchy: &[String], combo: &[String]) -> FilterMap {
    let mut filter = FilterMap::new();

    for (header, label) in hierarchy.iter().zip(combo.iter()) {
        filter.insert(header.clone(), FilterValue::One(label.clone()));
    }

    for dim in variable.rows.iter().chain(variable.cols.iter()) {
        match filter.get_mut(&dim.header) {
            // rows and cols on the same set merge into one list
            Some(FilterValue::Many(existing)) => {
                for item in &dim.items {
                    if !existing.contains(item) {
                        existing.push(item.clone());
                    }
                }
            }
            Some(FilterValue::One(_)) => {}
            None => {
                filter.insert(dim.header.clone(), FilterValue::Many(dim.items.clone()));
            }
        }
    }

    filter
}

/// Builds the expression view into the parent table's decision tensor: a
/// rows x cols matrix of parent row indices.
fn decision_slice(
    index: &Index,
    variable: &Variable,
    hierarchy: &[String],
    combo: &[String],
    grids: &BTreeMap<TableId, TableGrid>,
    tensors: &BTreeMap<TableId, TableTensor>,
) -> Result<TensorRef> {
    let table = index.table(variable.table);
    let grid = grids.get(&variable.table).ok_or_else(|| {
        Error::MissingData(format!(
            "no coordinate grid for table '{}' of variable '{}'",
            table.name, variable.symbol
        ))
    })?;
    let table_tensor = tensors.get(&variable.table).ok_or_else(|| {
        Error::MissingData(format!("no tensor for table '{}'", table.name))
    })?;

    // per-scenario grids: pick the partition matching the combo's inter labels
    let (frame, tensor) = match (grid, table_tensor) {
        (TableGrid::Single(frame), TableTensor::Single(tensor)) => (frame, *tensor),
        (TableGrid::PerScenario(frames), TableTensor::PerScenario(ids)) => {
            let scenario = scenario_for_combo(index, variable, hierarchy, combo)?;
            (
                frames.get(&scenario).ok_or_else(|| {
                    Error::MissingData(format!("no grid partition for scenario {}", scenario))
                })?,
                *ids.get(&scenario).ok_or_else(|| {
                    Error::MissingData(format!("no tensor partition for scenario {}", scenario))
                })?,
            )
        }
        _ => {
            return Err(Error::Operational(
                "grid and tensor partitioning disagree".to_string(),
            ))
        }
    };

    // lookup: full coordinate tuple -> grid row position
    let mut positions: BTreeMap<Vec<&str>, usize> = BTreeMap::new();
    for (pos, row) in frame.rows().iter().enumerate() {
        positions.insert(row.iter().map(String::as_str).collect(), pos);
    }

    let (rows_n, cols_n) = variable.shape_size();
    let row_items: Vec<Option<&String>> = match &variable.rows {
        Some(d) => d.items.iter().map(Some).collect(),
        None => vec![None],
    };
    let col_items: Vec<Option<&String>> = match &variable.cols {
        Some(d) => d.items.iter().map(Some).collect(),
        None => vec![None],
    };

    let mut slice = Array2::zeros((rows_n, cols_n));
    for (i, row_label) in row_items.iter().enumerate() {
        for (j, col_label) in col_items.iter().enumerate() {
            let tuple: Vec<&str> = frame
                .headers()
                .iter()
                .map(|header| {
                    if let Some(k) = hierarchy.iter().position(|h| h == header) {
                        return combo[k].as_str();
                    }
                    if let (Some(d), Some(label)) = (&variable.rows, row_label) {
                        if d.header == *header {
                            return label.as_str();
                        }
                    }
                    if let (Some(d), Some(label)) = (&variable.cols, col_label) {
                        if d.header == *header {
                            return label.as_str();
                        }
                    }
                    ""
                })
                .collect();

            let pos = positions.get(&tuple).ok_or_else(|| {
                Error::MissingData(format!(
                    "coordinate tuple {:?} of variable '{}' not present in table '{}' grid",
                    tuple, variable.symbol, table.name
                ))
            })?;
            slice[(i, j)] = *pos;
        }
    }

    Ok(TensorRef::Slice {
        tensor,
        index: slice,
    })
}

/// Scenario id matching a combo's inter labels.
fn scenario_for_combo(
    index: &Index,
    variable: &Variable,
    hierarchy: &[String],
    combo: &[String],
) -> Result<ScenarioId> {
    let mut inter_labels = BTreeMap::new();
    for dim in &variable.inter {
        if let Some(k) = hierarchy.iter().position(|h| *h == dim.header) {
            inter_labels.insert(dim.header.clone(), combo[k].clone());
        }
    }

    index
        .scenarios()
        .ids()
        .find(|id| index.scenarios().coords(*id) == inter_labels)
        .ok_or_else(|| {
            Error::MissingData(format!(
                "no scenario matches inter labels {:?} of variable '{}'",
                inter_labels, variable.symbol
            ))
        })
}

/// Allocates scalar slots for decision-tensor rows on demand.
#[derive(Debug, Default)]
pub struct SlotRegistry {
    lookup: BTreeMap<(TensorId, usize), VarId>,
    slots: Vec<(TensorId, usize)>,
    specs: Vec<VarSpec>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        SlotRegistry::default()
    }

    fn var(&mut self, arena: &TensorArena, tensor: TensorId, row: usize) -> VarId {
        if let Some(id) = self.lookup.get(&(tensor, row)) {
            return *id;
        }
        let integer = match arena.get(tensor) {
            crate::tensor::Tensor::Decision { integer, .. } => *integer,
            _ => false,
        };
        let id = VarId(self.slots.len());
        self.lookup.insert((tensor, row), id);
        self.slots.push((tensor, row));
        self.specs.push(VarSpec {
            integer,
            min: None,
            max: None,
        });
        id
    }

    pub fn slots(&self) -> &[(TensorId, usize)] {
        &self.slots
    }

    pub fn specs(&self) -> &[VarSpec] {
        &self.specs
    }
}

/// Affine matrix of a tensor view: decision slots become variables,
/// parameters and constants become numbers.
fn affine_of(
    arena: &TensorArena,
    registry: &mut SlotRegistry,
    tensor_ref: &TensorRef,
    symbol: &str,
) -> Result<AffineMatrix> {
    use crate::tensor::Tensor;

    match tensor_ref {
        TensorRef::Whole(id) => match arena.get(*id) {
            Tensor::Decision { shape, .. } => {
                let mut out = Array2::from_elem(*shape, linexpr::Expr::default());
                for ((i, j), slot) in out.indexed_iter_mut() {
                    debug_assert_eq!(j, 0);
                    *slot = linexpr::Expr::var(registry.var(arena, *id, i));
                }
                Ok(out)
            }
            Tensor::Parameter { value, .. } => {
                let value = value.as_ref().ok_or_else(|| {
                    Error::MissingData(format!(
                        "parameter of variable '{}' has no value; load exogenous data first",
                        symbol
                    ))
                })?;
                Ok(value.to_dense().map(|v| linexpr::Expr::constant(*v)))
            }
            Tensor::Constant { value } => {
                Ok(value.map(|v| linexpr::Expr::constant(*v)))
            }
        },
        TensorRef::Slice { tensor, index } => {
            let mut out = Array2::from_elem(index.dim(), linexpr::Expr::default());
            for ((i, j), slot) in out.indexed_iter_mut() {
                *slot = linexpr::Expr::var(registry.var(arena, *tensor, index[(i, j)]));
            }
            Ok(out)
        }
    }
}

/// Instantiates and lowers one subproblem: substitutes every symbol's
/// binding for the (problem key, scenario), replicates equations over the
/// intra-coordinate combinations and sums the objective over them.
///
/// Returns the scalar problem plus the decision slots backing each
/// [VarId], for writing solver values back.
pub fn lower_instance(
    index: &Index,
    materialized: &Materialized,
    problem_key: &str,
    setup: &ProblemSetup,
    scenario: ScenarioId,
) -> Result<(LoweredProblem, Vec<(TensorId, usize)>)> {
    let scenario_coords = index.scenarios().coords(scenario);

    let mut symbols = BTreeSet::new();
    for relation in &setup.expressions {
        symbols.extend(relation.symbols());
    }
    if let Some((_, objective)) = &setup.objective {
        symbols.extend(objective.symbols());
    }

    // union of the involved variables' intra dimensions; shared headers
    // intersect their item lists
    let mut intra_union: Vec<(String, Vec<String>)> = Vec::new();
    for symbol in &symbols {
        let (_, variable) = index.variable_by_symbol(symbol).ok_or_else(|| {
            Error::settings(
                format!("problem.{}", problem_key),
                format!("unknown symbol '{}'", symbol),
            )
        })?;
        for dim in &variable.intra {
            match intra_union.iter_mut().find(|(h, _)| *h == dim.header) {
                Some((_, items)) => items.retain(|i| dim.items.contains(i)),
                None => intra_union.push((dim.header.clone(), dim.items.clone())),
            }
        }
    }

    let intra_combos = if intra_union.is_empty() {
        vec![Vec::new()]
    } else {
        LabelFrame::cartesian(&intra_union).rows().to_vec()
    };
    let intra_headers: Vec<String> = intra_union.iter().map(|(h, _)| h.clone()).collect();

    let registry = std::cell::RefCell::new(SlotRegistry::new());
    let mut constraints: Vec<linexpr::Constraint> = Vec::new();
    let (sense, objective_expr) = match &setup.objective {
        Some((sense, e)) => (*sense, Some(e.clone())),
        None => (ObjectiveSense::Minimize, None),
    };
    let mut objective = linexpr::Expr::constant(0.0);

    for combo in &intra_combos {
        let mut wanted = scenario_coords.clone();
        for (header, label) in intra_headers.iter().zip(combo.iter()) {
            wanted.insert(header.clone(), label.clone());
        }

        let resolve = |symbol: &str| -> Result<AffineMatrix> {
            let (variable_id, variable) = index
                .variable_by_symbol(symbol)
                .ok_or_else(|| {
                    Error::settings(
                        format!("problem.{}", problem_key),
                        format!("unknown symbol '{}'", symbol),
                    )
                })?;
            let binding = materialized.bindings.get(&variable_id).ok_or_else(|| {
                Error::Operational(format!("variable '{}' not materialized", symbol))
            })?;
            let table = binding.table_for(problem_key).ok_or_else(|| {
                Error::settings(
                    format!("problem.{}", problem_key),
                    format!("variable '{}' has no binding under this problem", symbol),
                )
            })?;
            let (_, row) = table.row_matching(&wanted).ok_or_else(|| {
                Error::MissingData(format!(
                    "no binding row of '{}' matches {:?}",
                    variable.symbol, wanted
                ))
            })?;
            affine_of(
                &materialized.arena,
                &mut registry.borrow_mut(),
                &row.tensor,
                symbol,
            )
        };

        for relation in &setup.expressions {
            constraints.extend(expr::lower_relation(relation, &resolve)?);
        }

        if let Some(objective_tree) = &objective_expr {
            let lowered = expr::lower(objective_tree, &resolve)?;
            for entry in lowered.iter() {
                objective = &objective + entry;
            }
        }
    }

    let registry = registry.into_inner();
    debug!(
        "lowered problem '{}' scenario {}: {} slots, {} constraints",
        problem_key,
        scenario,
        registry.slots().len(),
        constraints.len()
    );

    let problem = LoweredProblem {
        variables: registry.specs().to_vec(),
        constraints,
        objective: (sense, objective.cleaned()),
    };
    let slots = registry.slots().to_vec();
    Ok((problem, slots))
}

/// Merges solved slot values back into the decision tensors.
pub fn write_back(
    arena: &mut TensorArena,
    slots: &[(TensorId, usize)],
    values: &[f64],
) -> Result<()> {
    let mut by_tensor: BTreeMap<TensorId, Vec<(usize, f64)>> = BTreeMap::new();
    for ((tensor, row), value) in slots.iter().zip(values.iter()) {
        by_tensor.entry(*tensor).or_default().push((*row, *value));
    }

    for (tensor, updates) in by_tensor {
        let shape = arena.get(tensor).shape();
        let mut value = arena
            .get(tensor)
            .value()
            .unwrap_or_else(|| Array2::zeros(shape));
        for (row, v) in updates {
            value[(row, 0)] = v;
        }
        arena.assign_decision(tensor, value)?;
    }
    Ok(())
}

/// Pivots store rows into the variable's declared 2-D shape.
///
/// Each row contributes `(row_label, col_label, value)`; first write wins on
/// duplicates. Slots no row supplies take `blank_fill` when declared,
/// otherwise the pivot fails. NULL values follow the same fallback when
/// `allow_none` is set.
pub fn pivot_rows(
    variable: &Variable,
    rows: &[crate::store::StoreRow],
    allow_none: bool,
) -> Result<Array2<f64>> {
    let shape = variable.shape_size();
    let (row_header, col_header) = variable.dims_labels();

    let row_items: Vec<Option<&str>> = match &variable.rows {
        Some(d) => d.items.iter().map(|s| Some(s.as_str())).collect(),
        None => vec![None],
    };
    let col_items: Vec<Option<&str>> = match &variable.cols {
        Some(d) => d.items.iter().map(|s| Some(s.as_str())).collect(),
        None => vec![None],
    };

    let mut out: Array2<Option<f64>> = Array2::from_elem(shape, None);

    for row in rows {
        let i = match row_header {
            Some(header) => {
                let label = row.coords.get(header).map(String::as_str);
                match row_items.iter().position(|item| *item == label) {
                    Some(i) => i,
                    None => continue,
                }
            }
            None => 0,
        };
        let j = match col_header {
            Some(header) => {
                let label = row.coords.get(header).map(String::as_str);
                match col_items.iter().position(|item| *item == label) {
                    Some(j) => j,
                    None => continue,
                }
            }
            None => 0,
        };

        if out[(i, j)].is_some() {
            continue;
        }

        match row.value {
            Some(v) => out[(i, j)] = Some(v),
            None => {
                if !allow_none {
                    return Err(Error::MissingData(format!(
                        "NULL value for variable '{}' at row id {}",
                        variable.symbol, row.id
                    )));
                }
            }
        }
    }

    let mut result = Array2::zeros(shape);
    for ((i, j), slot) in out.indexed_iter() {
        result[(i, j)] = match (slot, variable.blank_fill) {
            (Some(v), _) => *v,
            (None, Some(fill)) => fill,
            (None, None) => {
                return Err(Error::MissingData(format!(
                    "no store row supplies slot ({}, {}) of variable '{}' and no blank_fill is declared",
                    i, j, variable.symbol
                )))
            }
        };
    }
    Ok(result)
}

#[cfg(test)]
mod tests;
