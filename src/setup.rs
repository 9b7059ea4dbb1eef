//! Setup ingestion contract.
//!
//! The spreadsheet / YAML loaders live outside this crate. Whatever reads
//! the user's files must produce the three mappings below; the engine never
//! sees the files themselves. [MapSource] wraps already-built maps and is
//! what tests and programmatic callers use.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::expr::{ObjectiveSense, Expression, Relation};

/// Role a table (or a variable view on it) plays in the numerical problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarKind {
    Constant,
    Exogenous,
    Endogenous,
}

impl std::fmt::Display for VarKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VarKind::Constant => "constant",
            VarKind::Exogenous => "exogenous",
            VarKind::Endogenous => "endogenous",
        };
        write!(f, "{}", name)
    }
}

/// A table is either one role for every subproblem, or a role per problem
/// key (a *type-split* table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableType {
    Single(VarKind),
    PerProblem(BTreeMap<String, VarKind>),
}

impl TableType {
    pub fn is_split(&self) -> bool {
        matches!(self, TableType::PerProblem(_))
    }

    /// True if any role is endogenous.
    pub fn has_endogenous(&self) -> bool {
        match self {
            TableType::Single(kind) => *kind == VarKind::Endogenous,
            TableType::PerProblem(map) => map.values().any(|k| *k == VarKind::Endogenous),
        }
    }

    /// True if any role reads data from the store at solve time.
    pub fn has_exogenous(&self) -> bool {
        match self {
            TableType::Single(kind) => *kind == VarKind::Exogenous,
            TableType::PerProblem(map) => map.values().any(|k| *k == VarKind::Exogenous),
        }
    }
}

/// Declarative description of one index set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetSetup {
    #[serde(default)]
    pub description: Option<String>,
    /// Each item of this set spawns an independent subproblem.
    #[serde(default)]
    pub split_problem: bool,
    /// Clone items and filters from another set.
    #[serde(default)]
    pub copy_from: Option<String>,
    /// Ordered, distinct labels.
    #[serde(default)]
    pub items: Vec<String>,
    /// Filter key -> sub-list of items.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    /// Opaque aggregation labels, carried but unused by the engine.
    #[serde(default)]
    pub aggregations: Vec<String>,
}

/// Which shape axis a coordinate provides to a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeDim {
    Rows,
    Cols,
    /// One set providing both axes (a square variable).
    RowsCols,
}

/// Per-coordinate declaration inside a variable: optional shape axis plus
/// optional filters keyed on the set's filter names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateSetup {
    #[serde(default)]
    pub dim: Option<ShapeDim>,
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
}

/// Declarative description of one variable view over a table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSetup {
    /// Coordinate key -> shape/filter declaration.
    #[serde(default)]
    pub coordinates: BTreeMap<String, CoordinateSetup>,
    /// Constant-generator tag; constants only.
    #[serde(default)]
    pub value: Option<String>,
    /// Default for missing rows; exogenous only.
    #[serde(default)]
    pub blank_fill: Option<f64>,
}

/// Declarative description of one data table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSetup {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub table_type: TableType,
    #[serde(default)]
    pub integer: bool,
    /// Ordered coordinate tuple, drawn from set keys.
    pub coordinates: Vec<String>,
    /// Variable symbol -> declaration.
    pub variables_info: BTreeMap<String, VariableSetup>,
}

/// One symbolic subproblem: an optional objective plus constraint relations.
///
/// Expressions arrive already parsed; producing them from text is the
/// expression parser's job, not this crate's.
#[derive(Debug, Clone)]
pub struct ProblemSetup {
    pub description: Option<String>,
    pub objective: Option<(ObjectiveSense, Expression)>,
    pub expressions: Vec<Relation>,
}

/// Source-agnostic ingestion interface: three mappings, keyed by set,
/// table and problem names.
pub trait SetupSource {
    fn structure_sets(&self) -> Result<BTreeMap<String, SetSetup>>;
    fn structure_tables(&self) -> Result<BTreeMap<String, TableSetup>>;
    fn problems(&self) -> Result<BTreeMap<String, ProblemSetup>>;
}

/// In-memory setup source.
#[derive(Debug, Clone, Default)]
pub struct MapSource {
    pub sets: BTreeMap<String, SetSetup>,
    pub tables: BTreeMap<String, TableSetup>,
    pub problems: BTreeMap<String, ProblemSetup>,
}

impl MapSource {
    pub fn new() -> Self {
        MapSource::default()
    }

    pub fn with_set<K: Into<String>>(mut self, key: K, set: SetSetup) -> Self {
        self.sets.insert(key.into(), set);
        self
    }

    pub fn with_table<K: Into<String>>(mut self, key: K, table: TableSetup) -> Self {
        self.tables.insert(key.into(), table);
        self
    }

    pub fn with_problem<K: Into<String>>(mut self, key: K, problem: ProblemSetup) -> Self {
        self.problems.insert(key.into(), problem);
        self
    }
}

impl SetupSource for MapSource {
    fn structure_sets(&self) -> Result<BTreeMap<String, SetSetup>> {
        Ok(self.sets.clone())
    }

    fn structure_tables(&self) -> Result<BTreeMap<String, TableSetup>> {
        Ok(self.tables.clone())
    }

    fn problems(&self) -> Result<BTreeMap<String, ProblemSetup>> {
        Ok(self.problems.clone())
    }
}
