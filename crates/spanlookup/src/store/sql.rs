//! SQL connections and the parameterized key query.

use std::ops::ControlFlow;
use std::path::Path;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::info;

use crate::document::FeatureValue;
use crate::error::{LookupError, Result};

/// Column values of one result row, in column order.
pub type Row = Vec<FeatureValue>;

/// Open a connection from an already expanded database URL.
///
/// Accepts `sqlite:path`, `sqlite://path`, `jdbc:sqlite:path`, a bare path, or
/// `:memory:` after any of those prefixes.
pub fn open_connection(url: &str) -> Result<Connection> {
    let path = sqlite_path(url)?;
    info!("Using database URL: {}", url);
    let conn = if path == ":memory:" {
        Connection::open_in_memory()
    } else {
        Connection::open(Path::new(path))
    };
    conn.map_err(|e| LookupError::backend(format!("could not establish connection to {}", url), e))
}

fn sqlite_path(url: &str) -> Result<&str> {
    let url = url.trim();
    let path = url
        .strip_prefix("jdbc:sqlite:")
        .or_else(|| url.strip_prefix("sqlite://"))
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    if path.is_empty() {
        return Err(LookupError::Config(format!(
            "database URL has no path: '{}'",
            url
        )));
    }
    if path.contains("://") || path.starts_with("jdbc:") {
        return Err(LookupError::Config(format!(
            "unsupported database URL '{}': only SQLite databases are supported",
            url
        )));
    }
    Ok(path)
}

pub(crate) fn value_from_sql(value: ValueRef<'_>) -> FeatureValue {
    match value {
        ValueRef::Null => FeatureValue::Null,
        ValueRef::Integer(i) => FeatureValue::Int(i),
        ValueRef::Real(x) => FeatureValue::Float(x),
        ValueRef::Text(t) => FeatureValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => FeatureValue::Bytes(b.to_vec()),
    }
}

/// A prepared query taking exactly one string parameter, the key.
pub trait KeyQuery {
    /// Run the query for `key`, feeding `(column names, row)` to `visit` in
    /// result order until the rows run out or `visit` breaks.
    fn query(
        &mut self,
        key: &str,
        visit: &mut dyn FnMut(&[String], Row) -> Result<ControlFlow<()>>,
    ) -> Result<()>;

    /// First column of the first row as text; `None` when there is no row or
    /// the value is null. Further rows are ignored.
    fn first_text(&mut self, key: &str) -> Result<Option<String>> {
        let mut found = None;
        self.query(key, &mut |_, row| {
            found = match row.into_iter().next() {
                None | Some(FeatureValue::Null) => None,
                Some(FeatureValue::Text(s)) => Some(s),
                Some(other) => Some(other.to_string()),
            };
            Ok(ControlFlow::Break(()))
        })?;
        Ok(found)
    }
}

/// `KeyQuery` over a SQLite connection.
pub struct SqlKeyQuery {
    conn: Connection,
    sql: String,
}

impl SqlKeyQuery {
    /// Prepare `sql` on `conn`. The statement stays in the connection's
    /// statement cache, so later executions do not re-prepare it.
    pub fn prepare(conn: Connection, sql: String) -> Result<Self> {
        {
            let stmt = conn.prepare_cached(&sql).map_err(|e| {
                LookupError::backend(format!("could not prepare query statement: {}", sql), e)
            })?;
            let params = stmt.parameter_count();
            if params != 1 {
                return Err(LookupError::Config(format!(
                    "query must take exactly one parameter (the key), found {}: {}",
                    params, sql
                )));
            }
        }
        Ok(Self { conn, sql })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

impl KeyQuery for SqlKeyQuery {
    fn query(
        &mut self,
        key: &str,
        visit: &mut dyn FnMut(&[String], Row) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached(&self.sql)
            .map_err(|e| LookupError::backend(format!("could not prepare query for '{}'", key), e))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query([key])
            .map_err(|e| LookupError::backend(format!("error executing query for '{}'", key), e))?;

        while let Some(row) = rows
            .next()
            .map_err(|e| LookupError::backend(format!("error getting a row for '{}'", key), e))?
        {
            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let value = row.get_ref(i).map_err(|e| {
                    LookupError::backend(format!("could not get value for column {}", i + 1), e)
                })?;
                values.push(value_from_sql(value));
            }
            if visit(&columns, values)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}
