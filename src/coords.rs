//! Coordinate engine.
//!
//! Expands ordered `(header, items)` pairs into label grids — the Cartesian
//! products that dimension tables and variable bindings — and derives the
//! scenario table from the inter-problem sets. Grids keep a deterministic
//! row order: the product enumerates the last column fastest, mirroring the
//! order in which labels were declared.

use std::collections::BTreeMap;

/// A small relational frame of labels: named columns, string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFrame {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl LabelFrame {
    pub fn new(headers: Vec<String>) -> Self {
        LabelFrame {
            headers,
            rows: Vec::new(),
        }
    }

    /// Cartesian product of ordered `(header, items)` pairs.
    pub fn cartesian(columns: &[(String, Vec<String>)]) -> Self {
        let headers: Vec<String> = columns.iter().map(|(h, _)| h.clone()).collect();
        let mut rows: Vec<Vec<String>> = vec![Vec::new()];

        for (_, items) in columns {
            let mut next = Vec::with_capacity(rows.len() * items.len().max(1));
            for row in &rows {
                for item in items {
                    let mut extended = row.clone();
                    extended.push(item.clone());
                    next.push(extended);
                }
            }
            rows = next;
        }

        if columns.iter().any(|(_, items)| items.is_empty()) {
            rows.clear();
        }

        LabelFrame { headers, rows }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.headers.len());
        self.rows.push(row);
    }

    pub fn column_index(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == header)
    }

    pub fn cell(&self, row: usize, header: &str) -> Option<&str> {
        let col = self.column_index(header)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// Appends the rows of `other` (same headers required).
    pub fn append(&mut self, other: &LabelFrame) {
        debug_assert_eq!(self.headers, other.headers);
        self.rows.extend(other.rows.iter().cloned());
    }

    /// Removes duplicate rows, keeping the first occurrence.
    pub fn dedup_rows(&mut self) {
        let mut seen = std::collections::BTreeSet::new();
        self.rows.retain(|row| seen.insert(row.clone()));
    }

    /// Inner join on the columns shared with `other`: keeps rows of `self`
    /// whose shared-column values appear in `other`. Row order of `self` is
    /// preserved.
    pub fn semi_join(&self, other: &LabelFrame) -> LabelFrame {
        let shared: Vec<(usize, usize)> = self
            .headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| other.column_index(h).map(|j| (i, j)))
            .collect();

        if shared.is_empty() {
            return self.clone();
        }

        let keys: std::collections::BTreeSet<Vec<&str>> = other
            .rows
            .iter()
            .map(|row| shared.iter().map(|&(_, j)| row[j].as_str()).collect())
            .collect();

        let rows = self
            .rows
            .iter()
            .filter(|row| {
                let key: Vec<&str> = shared.iter().map(|&(i, _)| row[i].as_str()).collect();
                keys.contains(&key)
            })
            .cloned()
            .collect();

        LabelFrame {
            headers: self.headers.clone(),
            rows,
        }
    }

    /// Keeps rows whose value in `header` equals `label`.
    pub fn filter_eq(&self, header: &str, label: &str) -> LabelFrame {
        let col = match self.column_index(header) {
            Some(c) => c,
            None => return self.clone(),
        };
        LabelFrame {
            headers: self.headers.clone(),
            rows: self
                .rows
                .iter()
                .filter(|row| row[col] == label)
                .cloned()
                .collect(),
        }
    }
}

/// Stable identifier of one inter-problem combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScenarioId(pub usize);

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cartesian product of the inter-problem sets, one row per scenario.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioTable {
    /// Name-column headers of the inter-problem sets, in stable key order.
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ScenarioTable {
    /// Builds the scenario table from ordered `(header, items)` pairs of the
    /// inter-problem sets. With no inter-problem sets there is exactly one
    /// (empty-labelled) scenario.
    pub fn build(inter_sets: &[(String, Vec<String>)]) -> Self {
        let frame = LabelFrame::cartesian(inter_sets);
        let rows = if inter_sets.is_empty() {
            vec![Vec::new()]
        } else {
            frame.rows().to_vec()
        };
        ScenarioTable {
            headers: frame.headers().to_vec(),
            rows,
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ScenarioId> {
        (0..self.rows.len()).map(ScenarioId)
    }

    /// Inter-set labels of one scenario, keyed by store column header.
    pub fn coords(&self, id: ScenarioId) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .cloned()
            .zip(self.rows[id.0].iter().cloned())
            .collect()
    }

    /// Diagnostic label tuple, e.g. `[s1, 2030]`.
    pub fn labels(&self, id: ScenarioId) -> &[String] {
        &self.rows[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(spec: &[(&str, &[&str])]) -> Vec<(String, Vec<String>)> {
        spec.iter()
            .map(|(h, items)| {
                (
                    h.to_string(),
                    items.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn cartesian_enumerates_last_column_fastest() {
        let frame = LabelFrame::cartesian(&cols(&[
            ("Region_Name", &["r1", "r2"]),
            ("Product_Name", &["p1", "p2", "p3"]),
        ]));
        assert_eq!(frame.len(), 6);
        assert_eq!(frame.rows()[0], vec!["r1", "p1"]);
        assert_eq!(frame.rows()[1], vec!["r1", "p2"]);
        assert_eq!(frame.rows()[3], vec!["r2", "p1"]);
    }

    #[test]
    fn cartesian_with_empty_column_is_empty() {
        let frame = LabelFrame::cartesian(&cols(&[
            ("A_Name", &["a"]),
            ("B_Name", &[]),
        ]));
        assert!(frame.is_empty());
    }

    #[test]
    fn dedup_keeps_first_seen_order() {
        let mut frame = LabelFrame::new(vec!["X_Name".to_string()]);
        for label in ["b", "a", "b", "c", "a"] {
            frame.push_row(vec![label.to_string()]);
        }
        frame.dedup_rows();
        let flat: Vec<_> = frame.rows().iter().map(|r| r[0].as_str()).collect();
        assert_eq!(flat, vec!["b", "a", "c"]);
    }

    #[test]
    fn semi_join_restricts_to_shared_keys() {
        let grid = LabelFrame::cartesian(&cols(&[
            ("R_Name", &["r1", "r2"]),
            ("P_Name", &["p1", "p2"]),
        ]));
        let mut used = LabelFrame::new(vec!["P_Name".to_string()]);
        used.push_row(vec!["p2".to_string()]);

        let joined = grid.semi_join(&used);
        assert_eq!(joined.len(), 2);
        assert!(joined.rows().iter().all(|r| r[1] == "p2"));
    }

    #[test]
    fn semi_join_without_shared_columns_is_identity() {
        let grid = LabelFrame::cartesian(&cols(&[("R_Name", &["r1", "r2"])]));
        let other = LabelFrame::new(vec!["Unrelated".to_string()]);
        assert_eq!(grid.semi_join(&other), grid);
    }

    #[test]
    fn scenario_table_without_inter_sets_has_one_scenario() {
        let table = ScenarioTable::build(&[]);
        assert_eq!(table.len(), 1);
        assert!(table.coords(ScenarioId(0)).is_empty());
    }

    #[test]
    fn scenario_coords_map_headers_to_labels() {
        let table = ScenarioTable::build(&cols(&[("Scen_Name", &["s1", "s2"])]));
        assert_eq!(table.len(), 2);
        let coords = table.coords(ScenarioId(1));
        assert_eq!(coords.get("Scen_Name").map(String::as_str), Some("s2"));
    }
}
