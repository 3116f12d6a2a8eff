//! Backing stores consulted by lookups.
//!
//! - `sql`: connections and the one-parameter "fetch by key" query
//! - `string_store`: a string key/value table with read/write access
//! - `map_file`: read-only key/value map files of typed values

pub mod map_file;
pub mod sql;
pub mod string_store;

pub use map_file::{MapFile, MapFileWriter};
pub use sql::{open_connection, KeyQuery, Row, SqlKeyQuery};
pub use string_store::{StringStore, StringStoreSettings};

/// Quote an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
