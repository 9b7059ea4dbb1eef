use crate::setup::{TableType, VarKind};

use super::data_table::TableId;
use super::set_table::SetId;

/// Handle into the variable arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VariableId(pub usize);

impl std::fmt::Display for VariableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One coordinate of a variable, resolved to its store header and the label
/// list that survives the variable's filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimCoordinate {
    pub set: SetId,
    pub header: String,
    pub items: Vec<String>,
}

/// A typed view over one data table.
///
/// The table's coordinates are partitioned into four disjoint categories:
/// the single `rows` axis, the single `cols` axis, the remaining
/// non-inter-problem coordinates (`intra`, one equation instance per
/// combination) and the inter-problem coordinates (`inter`, one subproblem
/// per combination). Shapes are frozen once filters are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub symbol: String,
    pub table: TableId,
    /// Inherited from the table, possibly per problem key.
    pub table_type: TableType,
    /// Constant-generator tag (constants only).
    pub value: Option<String>,
    /// Default for missing rows (exogenous only).
    pub blank_fill: Option<f64>,
    pub rows: Option<DimCoordinate>,
    pub cols: Option<DimCoordinate>,
    pub intra: Vec<DimCoordinate>,
    pub inter: Vec<DimCoordinate>,
}

impl Variable {
    /// `(|rows|, |cols|)`, an undeclared axis counting 1.
    pub fn shape_size(&self) -> (usize, usize) {
        (
            self.rows.as_ref().map_or(1, |d| d.items.len()),
            self.cols.as_ref().map_or(1, |d| d.items.len()),
        )
    }

    pub fn is_square(&self) -> bool {
        match (&self.rows, &self.cols) {
            (Some(r), Some(c)) => r.items.len() == c.items.len(),
            _ => false,
        }
    }

    pub fn is_vector(&self) -> bool {
        let (rows, cols) = self.shape_size();
        rows == 1 || cols == 1
    }

    pub fn is_scalar(&self) -> bool {
        self.rows.is_none() && self.cols.is_none()
    }

    /// Row/col name-column headers, `None` for an undeclared axis.
    pub fn dims_labels(&self) -> (Option<&str>, Option<&str>) {
        (
            self.rows.as_ref().map(|d| d.header.as_str()),
            self.cols.as_ref().map(|d| d.header.as_str()),
        )
    }

    /// Ordered dimensions indexing the binding table: inter first, intra second.
    pub fn sets_parsing_hierarchy(&self) -> Vec<&DimCoordinate> {
        self.inter.iter().chain(self.intra.iter()).collect()
    }

    /// Every coordinate header with the union of its items across the
    /// variable's categories, duplicates removed. A variable whose rows and
    /// cols share a set contributes a single merged entry.
    pub fn all_coordinates_with_headers(&self) -> Vec<(String, Vec<String>)> {
        let mut out: Vec<(String, Vec<String>)> = Vec::new();

        let dims = self
            .rows
            .iter()
            .chain(self.cols.iter())
            .chain(self.intra.iter())
            .chain(self.inter.iter());

        for dim in dims {
            match out.iter_mut().find(|(header, _)| *header == dim.header) {
                Some((_, items)) => {
                    for item in &dim.items {
                        if !items.contains(item) {
                            items.push(item.clone());
                        }
                    }
                }
                None => out.push((dim.header.clone(), dim.items.clone())),
            }
        }

        out
    }

    /// Role of this variable under one problem key.
    pub fn kind_for(&self, problem_key: Option<&str>) -> Option<VarKind> {
        match (&self.table_type, problem_key) {
            (TableType::Single(kind), _) => Some(*kind),
            (TableType::PerProblem(map), Some(key)) => map.get(key).copied(),
            (TableType::PerProblem(_), None) => None,
        }
    }

    /// Problem keys under which this variable plays the given role.
    ///
    /// For single-type variables the answer is role-wide: `[None]` when it
    /// matches, empty otherwise.
    pub fn problem_keys_with_kind(&self, kind: VarKind) -> Vec<Option<String>> {
        match &self.table_type {
            TableType::Single(k) => {
                if *k == kind {
                    vec![None]
                } else {
                    Vec::new()
                }
            }
            TableType::PerProblem(map) => map
                .iter()
                .filter(|(_, k)| **k == kind)
                .map(|(key, _)| Some(key.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(set: usize, header: &str, items: &[&str]) -> DimCoordinate {
        DimCoordinate {
            set: SetId(set),
            header: header.to_string(),
            items: items.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn variable() -> Variable {
        Variable {
            symbol: "x".to_string(),
            table: TableId(0),
            table_type: TableType::Single(VarKind::Endogenous),
            value: None,
            blank_fill: None,
            rows: Some(dim(0, "tech_Name", &["pv", "wind"])),
            cols: Some(dim(1, "year_Name", &["2030", "2040", "2050"])),
            intra: vec![dim(2, "region_Name", &["north", "south"])],
            inter: vec![dim(3, "scen_Name", &["s1"])],
        }
    }

    #[test]
    fn shape_counts_filtered_items() {
        assert_eq!(variable().shape_size(), (2, 3));
        assert!(!variable().is_square());
    }

    #[test]
    fn scalar_shape_is_one_by_one() {
        let mut var = variable();
        var.rows = None;
        var.cols = None;
        assert_eq!(var.shape_size(), (1, 1));
        assert!(var.is_scalar());
        assert!(var.is_vector());
    }

    #[test]
    fn hierarchy_orders_inter_before_intra() {
        let var = variable();
        let headers: Vec<_> = var
            .sets_parsing_hierarchy()
            .iter()
            .map(|d| d.header.as_str())
            .collect();
        assert_eq!(headers, vec!["scen_Name", "region_Name"]);
    }

    #[test]
    fn shared_rows_cols_set_merges_into_one_header() {
        let mut var = variable();
        var.cols = Some(dim(0, "tech_Name", &["wind", "gas"]));
        let coords = var.all_coordinates_with_headers();
        let tech = coords.iter().find(|(h, _)| h == "tech_Name").unwrap();
        assert_eq!(tech.1, vec!["pv", "wind", "gas"]);
    }
}
