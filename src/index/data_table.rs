use crate::setup::{TableSetup, TableType, VarKind};

use super::set_table::SetId;

/// Handle into the table arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TableId(pub usize);

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Column of the store schema generated for a data table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableColumn {
    pub header: String,
    pub sql_type: String,
}

/// Foreign key from a coordinate column to its set's name column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// A relational tensor keyed by an ordered coordinate tuple of sets.
///
/// Completed with its derived store schema (`table_headers`,
/// `coordinates_headers`, `foreign_keys`) during index construction;
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataTable {
    pub name: String,
    pub description: Option<String>,
    pub table_type: TableType,
    pub integer: bool,
    /// Ordered coordinate tuple.
    pub coordinates: Vec<SetId>,
    /// Synthetic leading id column followed by one column per coordinate.
    pub table_headers: Vec<TableColumn>,
    /// Coordinate set -> name-column header, in coordinate order.
    pub coordinates_headers: Vec<(SetId, String)>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl DataTable {
    pub(super) fn from_setup(name: &str, setup: &TableSetup, coordinates: Vec<SetId>) -> Self {
        DataTable {
            name: name.to_string(),
            description: setup.description.clone(),
            table_type: setup.table_type.clone(),
            integer: setup.integer,
            coordinates,
            table_headers: Vec::new(),
            coordinates_headers: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Role of the table under one problem key (`None` for single-type tables).
    pub fn kind_for(&self, problem_key: Option<&str>) -> Option<VarKind> {
        match (&self.table_type, problem_key) {
            (TableType::Single(kind), _) => Some(*kind),
            (TableType::PerProblem(map), Some(key)) => map.get(key).copied(),
            (TableType::PerProblem(_), None) => None,
        }
    }

    /// True if the table drives (or can drive) decision values back to the store.
    pub fn is_endogenous_anywhere(&self) -> bool {
        self.table_type.has_endogenous()
    }

    pub fn coordinate_header(&self, set: SetId) -> Option<&str> {
        self.coordinates_headers
            .iter()
            .find(|(id, _)| *id == set)
            .map(|(_, h)| h.as_str())
    }
}
