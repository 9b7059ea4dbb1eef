//! SQLite implementation of the table store.
//!
//! One pool, one connection: the engine assumes at-most-one writer and the
//! adapter enforces it by sizing the pool at a single connection. Journal
//! mode is `DELETE` so that the database is always a single file and the
//! file-level snapshot/restore operations of the coupling loop stay exact.

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use sqlx::migrate::MigrateDatabase;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row as _;

use super::{
    relative_difference, round_digits, ColumnSpec, Error, FilterMap, FilterValue, ForeignKeySpec,
    Result, StoreRow,
};

const VALUES_COLUMN: &str = "values";
const ID_COLUMN: &str = "id";

/// Denominator floor for relative differences.
const RELATIVE_DIFF_EPS: f64 = 1e-9;

#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn check_identifier(identifier: &str) -> Result<()> {
    if identifier.is_empty() || identifier.contains('"') {
        return Err(Error::CorruptedDatabase(format!(
            "invalid identifier '{}'",
            identifier
        )));
    }
    Ok(())
}

impl Store {
    fn build_url(path: &Path) -> Result<String> {
        let filename = path.to_str().ok_or(Error::InvalidPath)?;
        Ok(format!("sqlite://{}", filename))
    }

    async fn connect(path: &Path) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .journal_mode(SqliteJournalMode::Delete)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(pool)
    }

    /// Creates a new database file. Fails if the file already exists.
    pub async fn create(path: &Path) -> Result<Store> {
        let url = Self::build_url(path)?;
        if sqlx::Sqlite::database_exists(&url).await? {
            return Err(Error::DatabaseAlreadyExists(path.to_path_buf()));
        }
        sqlx::Sqlite::create_database(&url).await?;

        Ok(Store {
            pool: Self::connect(path).await?,
            path: path.to_path_buf(),
        })
    }

    /// Opens an existing database file.
    pub async fn open(path: &Path) -> Result<Store> {
        let url = Self::build_url(path)?;
        if !sqlx::Sqlite::database_exists(&url).await? {
            return Err(Error::DatabaseDoesNotExist(path.to_path_buf()));
        }

        Ok(Store {
            pool: Self::connect(path).await?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Creates a table with the given columns and foreign keys.
    pub async fn create_table(
        &self,
        name: &str,
        columns: &[ColumnSpec],
        foreign_keys: &[ForeignKeySpec],
    ) -> Result<()> {
        check_identifier(name)?;

        let mut clauses: Vec<String> = Vec::new();
        for column in columns {
            check_identifier(&column.header)?;
            clauses.push(format!("{} {}", quote(&column.header), column.sql_type));
        }
        for fk in foreign_keys {
            clauses.push(format!(
                "FOREIGN KEY({}) REFERENCES {}({})",
                quote(&fk.column),
                quote(&fk.references_table),
                quote(&fk.references_column)
            ));
        }

        let sql = format!("CREATE TABLE {} (\n{}\n)", quote(name), clauses.join(",\n"));
        debug!("creating table '{}'", name);
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn drop_table(&self, name: &str) -> Result<()> {
        check_identifier(name)?;
        let sql = format!("DROP TABLE IF EXISTS {}", quote(name));
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Batched insert of label rows; unnamed columns stay NULL.
    pub async fn insert_rows(
        &self,
        table: &str,
        headers: &[String],
        rows: &[Vec<Option<String>>],
        batch_size: usize,
    ) -> Result<()> {
        check_identifier(table)?;
        for header in headers {
            check_identifier(header)?;
        }

        let quoted: Vec<String> = headers.iter().map(|h| quote(h)).collect();
        let placeholders: Vec<&str> = headers.iter().map(|_| "?").collect();
        let sql = if headers.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(table))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(table),
                quoted.join(", "),
                placeholders.join(", ")
            )
        };

        for chunk in rows.chunks(batch_size.max(1)) {
            let mut tx = self.pool.begin().await?;
            for row in chunk {
                let mut query = sqlx::query(&sql);
                for cell in row {
                    query = query.bind(cell.clone());
                }
                query.execute(&mut *tx).await?;
            }
            tx.commit().await?;
        }
        Ok(())
    }

    fn filter_clause(filters: &FilterMap) -> Result<(String, Vec<String>)> {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();

        for (column, value) in filters {
            check_identifier(column)?;
            match value {
                FilterValue::One(label) => {
                    clauses.push(format!("{} = ?", quote(column)));
                    binds.push(label.clone());
                }
                FilterValue::Many(labels) => {
                    let marks: Vec<&str> = labels.iter().map(|_| "?").collect();
                    clauses.push(format!("{} IN ({})", quote(column), marks.join(", ")));
                    binds.extend(labels.iter().cloned());
                }
            }
        }

        let clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        Ok((clause, binds))
    }

    /// Rows of a data table matching the equality filters, in id order.
    pub async fn select_where(
        &self,
        table: &str,
        coord_headers: &[String],
        filters: &FilterMap,
    ) -> Result<Vec<StoreRow>> {
        check_identifier(table)?;
        for header in coord_headers {
            check_identifier(header)?;
        }

        let mut selected: Vec<String> = vec![quote(ID_COLUMN)];
        selected.extend(coord_headers.iter().map(|h| quote(h)));
        selected.push(quote(VALUES_COLUMN));

        let (clause, binds) = Self::filter_clause(filters)?;
        let sql = format!(
            "SELECT {} FROM {}{} ORDER BY {}",
            selected.join(", "),
            quote(table),
            clause,
            quote(ID_COLUMN)
        );

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind.clone());
        }
        let raw = query.fetch_all(&self.pool).await?;

        let mut rows = Vec::with_capacity(raw.len());
        for record in raw {
            let mut coords = BTreeMap::new();
            for header in coord_headers {
                coords.insert(header.clone(), record.try_get::<String, _>(header.as_str())?);
            }
            rows.push(StoreRow {
                id: record.try_get::<i64, _>(ID_COLUMN)?,
                coords,
                value: record.try_get::<Option<f64>, _>(VALUES_COLUMN)?,
            });
        }
        Ok(rows)
    }

    /// All rows of a data table, in id order.
    pub async fn table_rows(&self, table: &str, coord_headers: &[String]) -> Result<Vec<StoreRow>> {
        self.select_where(table, coord_headers, &FilterMap::new())
            .await
    }

    pub async fn table_length(&self, table: &str) -> Result<i64> {
        check_identifier(table)?;
        let sql = format!("SELECT COUNT(*) AS n FROM {}", quote(table));
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>("n")?)
    }

    /// Ids of rows whose value column is NULL.
    pub async fn null_rows(&self, table: &str) -> Result<Vec<i64>> {
        check_identifier(table)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} IS NULL ORDER BY {}",
            quote(ID_COLUMN),
            quote(table),
            quote(VALUES_COLUMN),
            quote(ID_COLUMN)
        );
        let raw = sqlx::query(&sql).fetch_all(&self.pool).await?;
        raw.iter()
            .map(|r| r.try_get::<i64, _>(ID_COLUMN).map_err(Error::from))
            .collect()
    }

    /// Writes values keyed by coordinate tuple, batched. Rows already in the
    /// table are updated in place; unknown tuples are inserted.
    pub async fn bulk_upsert(
        &self,
        table: &str,
        coord_headers: &[String],
        rows: &[(Vec<String>, Option<f64>)],
        batch_size: usize,
    ) -> Result<()> {
        check_identifier(table)?;
        for header in coord_headers {
            check_identifier(header)?;
        }

        let where_clause: Vec<String> = coord_headers
            .iter()
            .map(|h| format!("{} = ?", quote(h)))
            .collect();
        let update_sql = if coord_headers.is_empty() {
            format!("UPDATE {} SET {} = ?", quote(table), quote(VALUES_COLUMN))
        } else {
            format!(
                "UPDATE {} SET {} = ? WHERE {}",
                quote(table),
                quote(VALUES_COLUMN),
                where_clause.join(" AND ")
            )
        };

        let quoted: Vec<String> = coord_headers.iter().map(|h| quote(h)).collect();
        let mut insert_cols = quoted.clone();
        insert_cols.push(quote(VALUES_COLUMN));
        let marks: Vec<&str> = insert_cols.iter().map(|_| "?").collect();
        let insert_sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            insert_cols.join(", "),
            marks.join(", ")
        );

        for chunk in rows.chunks(batch_size.max(1)) {
            let mut tx = self.pool.begin().await?;
            for (coords, value) in chunk {
                let mut query = sqlx::query(&update_sql).bind(*value);
                for label in coords {
                    query = query.bind(label.clone());
                }
                let outcome = query.execute(&mut *tx).await?;

                if outcome.rows_affected() == 0 {
                    let mut insert = sqlx::query(&insert_sql);
                    for label in coords {
                        insert = insert.bind(label.clone());
                    }
                    insert = insert.bind(*value);
                    insert.execute(&mut *tx).await?;
                }
            }
            tx.commit().await?;
        }
        Ok(())
    }

    /// Sets every value of the table back to NULL.
    pub async fn null_out_values(&self, table: &str) -> Result<()> {
        check_identifier(table)?;
        let sql = format!(
            "UPDATE {} SET {} = NULL",
            quote(table),
            quote(VALUES_COLUMN)
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Per-table maximum relative difference of the value column against
    /// another database, aligned by coordinate tuple and rounded to
    /// `rounding_digits`. A value present on one side only counts as a full
    /// (1.0) difference; NULL on both sides is ignored.
    pub async fn relative_diff(
        &self,
        tables: &[(String, Vec<String>)],
        other_path: &Path,
        rounding_digits: u32,
    ) -> Result<BTreeMap<String, f64>> {
        let other = Store::open(other_path).await?;
        let mut out = BTreeMap::new();

        for (table, coord_headers) in tables {
            let mine = self.table_rows(table, coord_headers).await?;
            let theirs = other.table_rows(table, coord_headers).await?;

            let mut max_diff: f64 = 0.0;
            let theirs_by_coords: BTreeMap<Vec<String>, Option<f64>> = theirs
                .into_iter()
                .map(|r| (coords_key(&r, coord_headers), r.value))
                .collect();

            for row in &mine {
                let key = coords_key(row, coord_headers);
                let diff = match (row.value, theirs_by_coords.get(&key).copied().flatten()) {
                    (Some(a), Some(b)) => relative_difference(a, b, RELATIVE_DIFF_EPS),
                    (None, None) => continue,
                    _ => 1.0,
                };
                max_diff = max_diff.max(diff);
            }

            out.insert(table.clone(), round_digits(max_diff, rounding_digits));
        }

        other.close().await;
        Ok(out)
    }

    /// Compares the value columns of every listed table against another
    /// database within a relative tolerance. Divergences are logged.
    pub async fn equal_within_tolerance(
        &self,
        tables: &[(String, Vec<String>)],
        other_path: &Path,
        tolerance: f64,
    ) -> Result<bool> {
        let other = Store::open(other_path).await?;
        let mut equal = true;

        for (table, coord_headers) in tables {
            let mine = self.table_rows(table, coord_headers).await?;
            let theirs = other.table_rows(table, coord_headers).await?;

            if mine.len() != theirs.len() {
                warn!(
                    "table '{}' row count differs: {} vs {}",
                    table,
                    mine.len(),
                    theirs.len()
                );
                equal = false;
                continue;
            }

            let theirs_by_coords: BTreeMap<Vec<String>, Option<f64>> = theirs
                .into_iter()
                .map(|r| (coords_key(&r, coord_headers), r.value))
                .collect();

            for row in &mine {
                let key = coords_key(row, coord_headers);
                match (row.value, theirs_by_coords.get(&key)) {
                    (Some(a), Some(Some(b))) => {
                        let diff = relative_difference(a, *b, RELATIVE_DIFF_EPS);
                        if diff > tolerance {
                            warn!(
                                "table '{}' diverges at {:?}: {} vs {} (relative diff {})",
                                table, key, a, b, diff
                            );
                            equal = false;
                        }
                    }
                    (None, Some(None)) => {}
                    _ => {
                        warn!("table '{}' diverges at {:?}: value missing", table, key);
                        equal = false;
                    }
                }
            }
        }

        other.close().await;
        Ok(equal)
    }

    /// Copies the database file to `dest`, overwriting it.
    pub async fn snapshot_to(&self, dest: &Path) -> Result<()> {
        tokio::fs::copy(&self.path, dest).await?;
        Ok(())
    }

    /// Replaces the database file with `src` (consuming it) and reopens the
    /// connection.
    pub async fn restore_from(&mut self, src: &Path) -> Result<()> {
        // close before touching the file so no half-open handle survives
        self.pool.close().await;
        tokio::fs::rename(src, &self.path).await?;
        self.pool = Self::connect(&self.path).await?;
        Ok(())
    }

    /// Renames a database file.
    pub async fn rename_file(from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    /// Removes a database file if it exists.
    pub async fn remove_file(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn coords_key(row: &StoreRow, coord_headers: &[String]) -> Vec<String> {
    coord_headers
        .iter()
        .map(|h| row.coords.get(h).cloned().unwrap_or_default())
        .collect()
}
