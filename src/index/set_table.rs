use std::collections::BTreeMap;

use crate::setup::SetSetup;

/// Handle into the set arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SetId(pub usize);

impl std::fmt::Display for SetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One index set after validation: ordered distinct items, named filters,
/// and the store naming derived from its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetTable {
    pub key: String,
    pub description: Option<String>,
    pub split_problem: bool,
    pub items: Vec<String>,
    /// Filter key -> sub-list of items.
    pub filters: BTreeMap<String, Vec<String>>,
    pub aggregations: Vec<String>,
}

impl SetTable {
    pub fn from_setup(key: &str, setup: &SetSetup) -> Self {
        SetTable {
            key: key.to_string(),
            description: setup.description.clone(),
            split_problem: setup.split_problem,
            items: setup.items.clone(),
            filters: setup.filters.clone(),
            aggregations: setup.aggregations.clone(),
        }
    }

    /// Store table name, e.g. `_set_REGION`.
    pub fn table_name(&self) -> String {
        format!("_set_{}", self.key.to_uppercase())
    }

    /// Name column header, e.g. `region_Name`.
    pub fn name_header(&self) -> String {
        format!("{}_Name", self.key)
    }

    pub fn filter_header(&self, filter_key: &str) -> String {
        format!("{}_{}", self.key, filter_key)
    }

    pub fn aggregation_header(&self, agg: &str) -> String {
        format!("{}_agg_{}", self.key, agg)
    }

    /// Items restricted by the given variable-side filter selection.
    ///
    /// Each entry names one of this set's filters and the labels picked from
    /// it (an empty pick means the whole filter list). A label survives when
    /// it is picked by every named filter. Declaration order of `items` is
    /// preserved.
    pub fn filtered_items(&self, selection: &BTreeMap<String, Vec<String>>) -> Vec<String> {
        if selection.is_empty() {
            return self.items.clone();
        }

        self.items
            .iter()
            .filter(|item| {
                selection.iter().all(|(filter_key, picked)| {
                    let allowed = match self.filters.get(filter_key) {
                        Some(values) => values,
                        None => return false,
                    };
                    if picked.is_empty() {
                        allowed.contains(item)
                    } else {
                        picked.contains(item) && allowed.contains(item)
                    }
                })
            })
            .cloned()
            .collect()
    }
}
