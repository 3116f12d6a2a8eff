//! Read-only key/value map files.
//!
//! A map file is an SQLite database holding one table per named map, with
//! columns `key TEXT PRIMARY KEY` and `value TEXT`, the value being a
//! serialized `FeatureValue`.
//!
//! File-backed maps keep a few read-only connections so duplicates sharing
//! one `MapFile` can look up keys in parallel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use super::quote_ident;
use crate::config::LoadingMode;
use crate::document::FeatureValue;
use crate::error::{LookupError, Result};

/// Upper bound for the memory-mapped region of a map file.
const MMAP_SIZE_BYTES: i64 = 1 << 34;

/// Read-only connections opened per file-backed map.
const READER_COUNT: usize = 4;

enum Backend {
    File {
        readers: Vec<Mutex<Connection>>,
        next: AtomicUsize,
        get_sql: String,
    },
    Memory(HashMap<String, FeatureValue>),
}

pub struct MapFile {
    path: PathBuf,
    map_name: String,
    mode: LoadingMode,
    backend: Backend,
}

impl MapFile {
    /// Open the map `map_name` inside the file at `path`.
    pub fn open(path: &Path, map_name: &str, mode: LoadingMode) -> Result<Self> {
        if !path.is_file() {
            return Err(LookupError::Config(format!(
                "map file not found: {}",
                path.display()
            )));
        }
        let conn = open_reader(path)?;
        check_map_exists(&conn, path, map_name)?;

        let table = quote_ident(map_name);
        let backend = match mode {
            LoadingMode::MemoryMapped | LoadingMode::FileOnly => {
                let mmap_size = if mode == LoadingMode::MemoryMapped {
                    MMAP_SIZE_BYTES
                } else {
                    0
                };
                set_mmap_size(&conn, mmap_size)?;
                let mut readers = vec![Mutex::new(conn)];
                while readers.len() < READER_COUNT {
                    let reader = open_reader(path)?;
                    set_mmap_size(&reader, mmap_size)?;
                    readers.push(Mutex::new(reader));
                }
                Backend::File {
                    readers,
                    next: AtomicUsize::new(0),
                    get_sql: format!("SELECT value FROM {} WHERE key = ?1", table),
                }
            }
            LoadingMode::CopyToMemory => Backend::Memory(copy_entries(&conn, &table)?),
        };

        info!(
            "Opened map '{}' in {} ({:?})",
            map_name,
            path.display(),
            mode
        );
        Ok(Self {
            path: path.to_path_buf(),
            map_name: map_name.to_string(),
            mode,
            backend,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }

    pub fn loading_mode(&self) -> LoadingMode {
        self.mode
    }

    /// The value stored for `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<FeatureValue>> {
        match &self.backend {
            Backend::Memory(entries) => Ok(entries.get(key).cloned()),
            Backend::File {
                readers,
                next,
                get_sql,
            } => {
                let conn = checkout(readers, next);
                let raw: Option<String> = conn
                    .prepare_cached(get_sql)
                    .and_then(|mut stmt| stmt.query_row(params![key], |row| row.get(0)).optional())
                    .map_err(|e| {
                        LookupError::backend(format!("looking up '{}' in map {}", key, self.map_name), e)
                    })?;
                raw.map(|raw| decode_value(key, &raw)).transpose()
            }
        }
    }
}

fn open_reader(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| LookupError::backend(format!("opening map file {}", path.display()), e))
}

/// Take the first idle reader, starting from a rotating slot; wait on that
/// slot when all are busy.
fn checkout<'a>(readers: &'a [Mutex<Connection>], next: &AtomicUsize) -> MutexGuard<'a, Connection> {
    let start = next.fetch_add(1, Ordering::Relaxed) % readers.len();
    for offset in 0..readers.len() {
        match readers[(start + offset) % readers.len()].try_lock() {
            Ok(guard) => return guard,
            Err(TryLockError::Poisoned(poisoned)) => return poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {}
        }
    }
    readers[start].lock().unwrap_or_else(PoisonError::into_inner)
}

fn check_map_exists(conn: &Connection, path: &Path, map_name: &str) -> Result<()> {
    let found: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")
        .and_then(|mut stmt| stmt.exists(params![map_name]))
        .map_err(|e| LookupError::backend(format!("reading map file {}", path.display()), e))?;
    if !found {
        return Err(LookupError::Config(format!(
            "map '{}' not found in {}",
            map_name,
            path.display()
        )));
    }
    Ok(())
}

fn set_mmap_size(conn: &Connection, bytes: i64) -> Result<()> {
    // the pragma answers with the effective size, which is not needed here
    let mut stmt = conn
        .prepare(&format!("PRAGMA mmap_size = {}", bytes))
        .map_err(|e| LookupError::backend("configuring memory map", e))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| LookupError::backend("configuring memory map", e))?;
    rows.next()
        .map_err(|e| LookupError::backend("configuring memory map", e))?;
    Ok(())
}

fn copy_entries(conn: &Connection, table: &str) -> Result<HashMap<String, FeatureValue>> {
    let mut stmt = conn
        .prepare(&format!("SELECT key, value FROM {}", table))
        .map_err(|e| LookupError::backend(format!("reading map {}", table), e))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(|e| LookupError::backend(format!("reading map {}", table), e))?;

    let mut entries = HashMap::new();
    for row in rows {
        let (key, raw) = row.map_err(|e| LookupError::backend(format!("reading map {}", table), e))?;
        let value = decode_value(&key, &raw)?;
        entries.insert(key, value);
    }
    debug!("Copied {} entries of map {} to memory", entries.len(), table);
    Ok(entries)
}

fn decode_value(key: &str, raw: &str) -> Result<FeatureValue> {
    serde_json::from_str(raw).map_err(|e| {
        LookupError::DataShape(format!("could not decode stored value for '{}': {}", key, e))
    })
}

/// Builds map files.
pub struct MapFileWriter {
    conn: Connection,
    insert_sql: String,
}

impl MapFileWriter {
    /// Open (or create) `path` and make sure the map table exists.
    pub fn create(path: &Path, map_name: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| LookupError::backend(format!("creating map file {}", path.display()), e))?;
        let table = quote_ident(map_name);
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            table
        ))
        .map_err(|e| LookupError::backend(format!("creating map {}", map_name), e))?;
        Ok(Self {
            conn,
            insert_sql: format!("INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)", table),
        })
    }

    pub fn insert(&mut self, key: &str, value: &FeatureValue) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| LookupError::DataShape(format!("could not encode value for '{}': {}", key, e)))?;
        self.conn
            .prepare_cached(&self.insert_sql)
            .and_then(|mut stmt| stmt.execute(params![key, raw]))
            .map_err(|e| LookupError::backend(format!("storing '{}'", key), e))?;
        Ok(())
    }

    /// Insert many entries in one transaction; returns how many were written.
    pub fn insert_all<I, K>(&mut self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = (K, FeatureValue)>,
        K: AsRef<str>,
    {
        self.conn
            .execute_batch("BEGIN")
            .map_err(|e| LookupError::backend("starting map import", e))?;
        let mut count = 0;
        for (key, value) in entries {
            if let Err(e) = self.insert(key.as_ref(), &value) {
                let _ = self.conn.execute_batch("ROLLBACK");
                return Err(e);
            }
            count += 1;
        }
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| LookupError::backend("committing map import", e))?;
        Ok(count)
    }
}
