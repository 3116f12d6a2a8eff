//! Lookup of SQL rows per key, mapped column by column.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use spanlookup::config::{DatabaseSettings, RowLookupConfig, RowMode};
use spanlookup::store::{open_connection, KeyQuery, Row, SqlKeyQuery};
use spanlookup::{Annotation, FeatureMap, FeatureValue, LookupError, Result};

use super::processor::Lookup;
use super::types::{FeatureUpdate, LookupEffect};

const ARRAY_SUFFIX: &str = "|s2adouble";
const LIST_SUFFIX: &str = "|s2ldouble";

static NUMBER_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s+").expect("separator pattern is valid"));

/// How a column value is converted before it becomes a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    None,
    /// Packed numeric string to a fixed numeric array.
    DoubleArray,
    /// Packed numeric string to a list of numbers.
    DoubleList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub feature: String,
    pub coercion: Coercion,
}

impl ColumnMapping {
    fn resolve(column: &str, remaps: &BTreeMap<String, String>) -> Self {
        let Some(target) = remaps.get(column) else {
            return Self {
                feature: column.to_string(),
                coercion: Coercion::None,
            };
        };
        if let Some(feature) = target.strip_suffix(ARRAY_SUFFIX) {
            Self {
                feature: feature.to_string(),
                coercion: Coercion::DoubleArray,
            }
        } else if let Some(feature) = target.strip_suffix(LIST_SUFFIX) {
            Self {
                feature: feature.to_string(),
                coercion: Coercion::DoubleList,
            }
        } else {
            Self {
                feature: target.clone(),
                coercion: Coercion::None,
            }
        }
    }

    fn convert(&self, value: FeatureValue) -> Result<FeatureValue> {
        match self.coercion {
            Coercion::None => Ok(value),
            Coercion::DoubleArray => Ok(FeatureValue::Doubles(decode_doubles(&value)?)),
            Coercion::DoubleList => Ok(FeatureValue::List(
                decode_doubles(&value)?
                    .into_iter()
                    .map(FeatureValue::Float)
                    .collect(),
            )),
        }
    }
}

/// Decode a packed numeric string such as `[1.0, 2.5, 3.0]`.
///
/// The first and last characters are dropped without checking what they
/// are, and the rest is split on a comma followed by whitespace. Null
/// decodes to an empty sequence.
pub fn decode_doubles(value: &FeatureValue) -> Result<Vec<f64>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    let text = value.to_string();
    let mut chars = text.chars();
    chars.next();
    chars.next_back();
    let inner = chars.as_str().trim();
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    NUMBER_SEPARATOR
        .split(inner)
        .map(|piece| {
            let piece = piece.trim();
            piece.parse::<f64>().map_err(|_| {
                LookupError::DataShape(format!(
                    "cannot decode '{}' in numeric value {}",
                    piece, text
                ))
            })
        })
        .collect()
}

/// Maps result columns to features.
///
/// The column mapping is built from the first result seen and reused for
/// the lifetime of the mapper, even if a later result has other columns.
#[derive(Debug, Clone)]
pub struct ColumnMapper {
    remaps: BTreeMap<String, String>,
    mapping: Option<Vec<ColumnMapping>>,
}

impl ColumnMapper {
    pub fn new(remaps: BTreeMap<String, String>) -> Self {
        Self {
            remaps,
            mapping: None,
        }
    }

    /// The cached mapping, if a result has been seen.
    pub fn mapping(&self) -> Option<&[ColumnMapping]> {
        self.mapping.as_deref()
    }

    /// Map one row's values into `features`.
    pub fn map_row(&mut self, columns: &[String], row: Row, features: &mut FeatureMap) -> Result<()> {
        let remaps = &self.remaps;
        let mapping = self.mapping.get_or_insert_with(|| {
            columns
                .iter()
                .map(|column| ColumnMapping::resolve(column, remaps))
                .collect()
        });
        for (column, value) in mapping.iter().zip(row) {
            features.insert(column.feature.clone(), column.convert(value)?);
        }
        Ok(())
    }
}

/// Fetches rows per key from an SQL database.
pub struct RowLookup {
    name: String,
    database: Option<DatabaseSettings>,
    duplicate: usize,
    mode: RowMode,
    mapper: ColumnMapper,
    query: Option<Box<dyn KeyQuery + Send>>,
}

impl RowLookup {
    pub fn new(config: &RowLookupConfig, duplicate: usize) -> Self {
        Self {
            name: config.settings.name.clone(),
            database: Some(config.database.clone()),
            duplicate,
            mode: config.mode,
            mapper: ColumnMapper::new(config.name_mappings.clone()),
            query: None,
        }
    }

    /// A lookup over an already prepared query.
    pub fn with_query(
        name: &str,
        mode: RowMode,
        mapper: ColumnMapper,
        query: Box<dyn KeyQuery + Send>,
    ) -> Self {
        Self {
            name: name.to_string(),
            database: None,
            duplicate: 0,
            mode,
            mapper,
            query: Some(query),
        }
    }

    pub fn mapper(&self) -> &ColumnMapper {
        &self.mapper
    }
}

impl Lookup for RowLookup {
    fn initialize(&mut self) -> Result<()> {
        match &self.database {
            Some(database) => database.validate(),
            None => Ok(()),
        }
    }

    fn run_started(&mut self) -> Result<()> {
        let Some(database) = &self.database else {
            return Ok(());
        };
        database.validate()?;
        let conn = open_connection(&database.expanded_url()?)?;
        let sql = database.expanded_query(self.duplicate)?;
        debug!("{}: preparing {}", self.name, sql);
        self.query = Some(Box::new(SqlKeyQuery::prepare(conn, sql)?));
        Ok(())
    }

    fn lookup(&mut self, key: &str, trigger: &Annotation) -> Result<LookupEffect> {
        let name = &self.name;
        let query = self.query.as_mut().ok_or_else(|| {
            LookupError::Config(format!("{}: lookup used before the run was started", name))
        })?;
        let mapper = &mut self.mapper;
        let mode = self.mode;

        let mut features = match mode {
            RowMode::AddFeaturesFromFirst | RowMode::UpdateFeatures => trigger.features.clone(),
            RowMode::AddAnnotations => FeatureMap::new(),
        };
        let mut children = Vec::new();
        let mut rows = 0usize;

        query.query(key, &mut |columns, row| {
            rows += 1;
            match mode {
                RowMode::AddFeaturesFromFirst => {
                    mapper.map_row(columns, row, &mut features)?;
                    Ok(ControlFlow::Break(()))
                }
                RowMode::UpdateFeatures => {
                    mapper.map_row(columns, row, &mut features)?;
                    Ok(ControlFlow::Continue(()))
                }
                RowMode::AddAnnotations => {
                    let mut child = FeatureMap::new();
                    mapper.map_row(columns, row, &mut child)?;
                    children.push(child);
                    Ok(ControlFlow::Continue(()))
                }
            }
        })?;
        debug!("{}: '{}' matched {} row(s)", name, key, rows);

        if rows == 0 {
            return Ok(LookupEffect::none());
        }
        Ok(match mode {
            RowMode::AddAnnotations => LookupEffect::children(children),
            _ => LookupEffect::update(FeatureUpdate::Replace(features)),
        })
    }

    fn cleanup(&mut self) {
        if self.database.is_some() && self.query.take().is_some() {
            debug!("{}: closed database connection", self.name);
        }
    }
}
