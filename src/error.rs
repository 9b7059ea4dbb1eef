use thiserror::Error;

/// A single validation finding, located by a dotted path into the setup
/// (e.g. `table.coordinates` or `table.variables_info.x.filters.kind`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} | {}", self.path, self.message)
    }
}

/// Aggregated report of everything wrong with a declarative model.
///
/// Validation never stops at the first problem: all findings are collected
/// and surfaced at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn new() -> Self {
        ValidationReport::default()
    }

    pub fn push<P: Into<String>, M: Into<String>>(&mut self, path: P, message: M) {
        self.issues.push(ValidationIssue::new(path, message));
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.issues.extend(other.issues);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Turns a non-empty report into an error, or passes `value` through.
    pub fn into_result<T>(self, value: T) -> Result<T> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(Error::Settings(self))
        }
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, issue) in self.issues.iter().enumerate() {
            if i != 0 {
                writeln!(f)?;
            }
            write!(f, "{}", issue)?;
        }
        Ok(())
    }
}

/// A `(table, row id)` pair pointing at a missing or malformed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingEntry {
    pub table: String,
    pub id: i64,
}

/// Formats missing-data locations, truncated to the first five entries
/// with a total marker.
pub(crate) fn format_missing_entries(entries: &[MissingEntry]) -> String {
    let mut shown: Vec<String> = entries
        .iter()
        .take(5)
        .map(|e| format!("('{}', id {})", e.table, e.id))
        .collect();
    if entries.len() > 5 {
        shown.push(format!("(total {})", entries.len()));
    }
    shown.join(", ")
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid model settings:\n{0}")]
    Settings(ValidationReport),
    #[error("missing data: {0}")]
    MissingData(String),
    #[error("operation invoked in wrong lifecycle state: {0}")]
    Operational(String),
    #[error("store error")]
    Integrity(#[from] crate::store::Error),
}

impl Error {
    pub(crate) fn settings<P: Into<String>, M: Into<String>>(path: P, message: M) -> Error {
        let mut report = ValidationReport::new();
        report.push(path, message);
        Error::Settings(report)
    }

    /// Missing-data error listing the offending `(table, id)` pairs.
    pub(crate) fn null_entries(context: &str, entries: &[MissingEntry]) -> Error {
        Error::MissingData(format!(
            "{} | NULL or non-numeric values at: {}",
            context,
            format_missing_entries(entries)
        ))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_aggregates_all_issues() {
        let mut report = ValidationReport::new();
        report.push("a.coordinates", "unknown set 'z'");
        report.push("b.variables_info.x", "filter 'kind' not found");
        assert_eq!(report.issues().len(), 2);

        let err = report.into_result(()).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("unknown set 'z'"));
        assert!(text.contains("filter 'kind' not found"));
    }

    #[test]
    fn missing_entries_truncate_to_five() {
        let entries: Vec<_> = (0..8)
            .map(|i| MissingEntry {
                table: "demand".to_string(),
                id: i,
            })
            .collect();
        let text = format_missing_entries(&entries);
        assert!(text.contains("id 4"));
        assert!(!text.contains("id 5"));
        assert!(text.ends_with("(total 8)"));
    }
}
