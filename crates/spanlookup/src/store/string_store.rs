//! A table of string keys and string values.
//!
//! The table is created (with a unique index on the key column) when it is
//! missing, unless the store is opened read-only, in which case a missing
//! table is an error.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::quote_ident;
use crate::error::{LookupError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StringStoreSettings {
    pub table: String,
    pub key_column: String,
    /// A column name, or an SQL expression when it contains `(`.
    pub value_column: String,
    pub read_only: bool,
}

impl Default for StringStoreSettings {
    fn default() -> Self {
        Self {
            table: "string_store".to_string(),
            key_column: "key".to_string(),
            value_column: "value".to_string(),
            read_only: false,
        }
    }
}

impl StringStoreSettings {
    fn value_expr(&self) -> String {
        if self.value_column.contains('(') {
            self.value_column.clone()
        } else {
            quote_ident(&self.value_column)
        }
    }

    fn key_column(&self) -> &str {
        if self.key_column.is_empty() {
            "key"
        } else {
            &self.key_column
        }
    }
}

pub struct StringStore {
    conn: Connection,
    read_only: bool,
    get_sql: String,
    contains_sql: String,
    put_sql: String,
    delete_sql: String,
}

impl StringStore {
    pub fn open(conn: Connection, settings: &StringStoreSettings) -> Result<Self> {
        let table = quote_ident(&settings.table);
        let key = quote_ident(settings.key_column());
        establish_table(&conn, settings)?;

        let value = settings.value_expr();
        let plain_value = if settings.value_column.contains('(') {
            quote_ident("value")
        } else {
            value.clone()
        };
        Ok(Self {
            read_only: settings.read_only,
            get_sql: format!("SELECT {} FROM {} WHERE {} = ?1", value, table, key),
            contains_sql: format!("SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1", table, key),
            put_sql: format!(
                "INSERT INTO {t} ({k}, {v}) VALUES (?1, ?2) \
                 ON CONFLICT({k}) DO UPDATE SET {v} = excluded.{v}",
                t = table,
                k = key,
                v = plain_value
            ),
            delete_sql: format!("DELETE FROM {} WHERE {} = ?1", table, key),
            conn,
        })
    }

    /// The value for `key`. A missing key and a stored null both give `None`.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare_cached(&self.get_sql)
            .map_err(|e| LookupError::backend("preparing string store lookup", e))?;
        let value: Option<Option<String>> = stmt
            .query_row(params![key], |row| row.get(0))
            .optional()
            .map_err(|e| LookupError::backend(format!("looking up '{}'", key), e))?;
        Ok(value.flatten())
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare_cached(&self.contains_sql)
            .map_err(|e| LookupError::backend("preparing string store check", e))?;
        stmt.exists(params![key])
            .map_err(|e| LookupError::backend(format!("checking for '{}'", key), e))
    }

    /// Insert or replace the value for `key`.
    pub fn put(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable("update")?;
        self.conn
            .prepare_cached(&self.put_sql)
            .and_then(|mut stmt| stmt.execute(params![key, value]))
            .map_err(|e| LookupError::backend(format!("could not store '{}'", key), e))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.check_writable("delete")?;
        self.conn
            .prepare_cached(&self.delete_sql)
            .and_then(|mut stmt| stmt.execute(params![key]))
            .map_err(|e| LookupError::backend(format!("could not delete '{}'", key), e))?;
        Ok(())
    }

    pub fn remove_all<I, S>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.remove(key.as_ref())?;
        }
        Ok(())
    }

    fn check_writable(&self, operation: &str) -> Result<()> {
        if self.read_only {
            return Err(LookupError::Config(format!(
                "{} not allowed for a read-only string store",
                operation
            )));
        }
        Ok(())
    }
}

fn establish_table(conn: &Connection, settings: &StringStoreSettings) -> Result<()> {
    let table = quote_ident(&settings.table);
    let probe = conn
        .prepare(&format!("SELECT * FROM {} LIMIT 1", table))
        .and_then(|mut stmt| stmt.exists([]));
    let err = match probe {
        Ok(_) => return Ok(()),
        Err(e) => e,
    };
    if settings.read_only {
        return Err(LookupError::backend(
            format!("read-only store could not access table {}", table),
            err,
        ));
    }

    let value = if settings.value_column.contains('(') {
        "value"
    } else {
        settings.value_column.as_str()
    };
    info!("Creating string store table {}", table);
    conn.execute_batch(&format!(
        "CREATE TABLE {t} ({k} TEXT NOT NULL, {v} TEXT);
         CREATE UNIQUE INDEX {i} ON {t} ({k});",
        t = table,
        k = quote_ident(settings.key_column()),
        v = quote_ident(value),
        i = quote_ident(&format!("{}_by_key", settings.table)),
    ))
    .map_err(|e| LookupError::backend(format!("could not create table {}", table), e))
}
