//! Table store adapter.
//!
//! The engine treats the store as a typed table engine with filtered reads,
//! batched writes, file-level backup/copy and tolerant equality. The only
//! implementation is SQLite ([sqlite::Store]); everything above this module
//! assumes the store file is exclusively held and serializes access itself.

pub mod sqlite;

use std::collections::BTreeMap;

use thiserror::Error;

pub use sqlite::Store;

#[derive(Error, Debug)]
pub enum Error {
    #[error("sqlx error")]
    Sqlx(#[from] sqlx::Error),
    #[error("i/o error")]
    Io(#[from] std::io::Error),
    #[error("path is not a valid UTF-8 string")]
    InvalidPath,
    #[error("trying to override already existing database {0}")]
    DatabaseAlreadyExists(std::path::PathBuf),
    #[error("database {0} does not exist")]
    DatabaseDoesNotExist(std::path::PathBuf),
    #[error("corrupted database: {0}")]
    CorruptedDatabase(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Equality filter on one column: a single label (`=`) or a label list
/// (`IN`). Row/col axes contribute lists, intra/inter axes single labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    One(String),
    Many(Vec<String>),
}

impl FilterValue {
    pub fn labels(&self) -> Vec<&str> {
        match self {
            FilterValue::One(v) => vec![v.as_str()],
            FilterValue::Many(v) => v.iter().map(String::as_str).collect(),
        }
    }
}

/// Column header -> filter value; uniquely identifies the store rows that
/// feed one tensor.
pub type FilterMap = BTreeMap<String, FilterValue>;

/// One data-table row as the engine sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreRow {
    pub id: i64,
    /// Coordinate header -> label.
    pub coords: BTreeMap<String, String>,
    pub value: Option<f64>,
}

/// Column description for table creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub header: String,
    pub sql_type: String,
}

impl ColumnSpec {
    pub fn new<H: Into<String>, T: Into<String>>(header: H, sql_type: T) -> Self {
        ColumnSpec {
            header: header.into(),
            sql_type: sql_type.into(),
        }
    }
}

/// Foreign key clause for table creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeySpec {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Rounds to the given number of decimal digits.
pub(crate) fn round_digits(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

/// `|a - b| / max(|a|, |b|, eps)`.
pub(crate) fn relative_difference(a: f64, b: f64, eps: f64) -> f64 {
    (a - b).abs() / a.abs().max(b.abs()).max(eps)
}
