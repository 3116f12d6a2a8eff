//! Lookup of a JSON text per key, mapped to features or new annotations.

use serde_json::Value;
use tracing::debug;

use spanlookup::config::{DatabaseSettings, JsonLookupConfig, JsonMode};
use spanlookup::document::json_object_to_features;
use spanlookup::store::{open_connection, KeyQuery, SqlKeyQuery};
use spanlookup::{Annotation, FeatureMap, LookupError, Result};

use super::processor::Lookup;
use super::types::{FeatureUpdate, LookupEffect};

type JsonObject = serde_json::Map<String, Value>;

/// Turns one fetched JSON text into a lookup effect.
#[derive(Debug, Clone, Copy)]
pub struct JsonResultMapper {
    mode: JsonMode,
    inherit_features: bool,
}

impl JsonResultMapper {
    pub fn new(mode: JsonMode, inherit_features: bool) -> Self {
        Self {
            mode,
            inherit_features,
        }
    }

    pub fn mode(&self) -> JsonMode {
        self.mode
    }

    /// Map `fetched` against the trigger's current features.
    ///
    /// A missing or empty text leaves everything unchanged. In
    /// `AddAnnotations` mode an object yields one child and an array one
    /// child per element; in the feature modes only the first element of an
    /// array is used.
    pub fn map(&self, fetched: Option<&str>, existing: &FeatureMap) -> Result<LookupEffect> {
        let raw = match fetched {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Ok(LookupEffect::none()),
        };
        let parsed: Value = serde_json::from_str(raw)
            .map_err(|e| LookupError::DataShape(format!("could not parse JSON: {}: {}", raw, e)))?;

        match self.mode {
            JsonMode::AddAnnotations => {
                let children = annotation_objects(parsed, raw)?
                    .into_iter()
                    .map(|obj| {
                        let mut features = if self.inherit_features {
                            existing.clone()
                        } else {
                            FeatureMap::new()
                        };
                        features.extend(json_object_to_features(obj));
                        features
                    })
                    .collect();
                Ok(LookupEffect {
                    features: FeatureUpdate::Unchanged,
                    children,
                    list: Some(existing.clone()),
                })
            }
            JsonMode::AddFeatures | JsonMode::UpdateFeatures => {
                let value = match parsed {
                    Value::Array(items) => match items.into_iter().next() {
                        Some(first) => first,
                        None => return Ok(LookupEffect::none()),
                    },
                    other => other,
                };
                let obj = match value {
                    Value::Object(obj) => obj,
                    Value::Null => return Ok(LookupEffect::none()),
                    other => {
                        return Err(LookupError::DataShape(format!(
                            "expected a JSON object, got {}: {}",
                            json_kind(&other),
                            raw
                        )))
                    }
                };
                let fetched = json_object_to_features(obj);
                let update = if self.mode == JsonMode::AddFeatures {
                    // fetched fields are defaults, existing features win
                    let mut features = fetched;
                    features.extend(existing.iter().map(|(k, v)| (k.clone(), v.clone())));
                    FeatureUpdate::Replace(features)
                } else {
                    FeatureUpdate::Merge(fetched)
                };
                Ok(LookupEffect::update(update))
            }
        }
    }
}

fn annotation_objects(parsed: Value, raw: &str) -> Result<Vec<JsonObject>> {
    match parsed {
        Value::Object(obj) => Ok(vec![obj]),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(obj) => Ok(obj),
                _ => Err(LookupError::DataShape(format!(
                    "JSON array does not contain just maps: {}",
                    raw
                ))),
            })
            .collect(),
        other => Err(LookupError::DataShape(format!(
            "expected a JSON object or array, got {}: {}",
            json_kind(&other),
            raw
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Fetches a JSON text per key from an SQL database.
///
/// Only the first column of the first row is consulted.
pub struct JsonLookup {
    name: String,
    /// `None` when the query was supplied ready-made.
    database: Option<DatabaseSettings>,
    duplicate: usize,
    mapper: JsonResultMapper,
    query: Option<Box<dyn KeyQuery + Send>>,
}

impl JsonLookup {
    pub fn new(config: &JsonLookupConfig, duplicate: usize) -> Self {
        Self {
            name: config.settings.name.clone(),
            database: Some(config.database.clone()),
            duplicate,
            mapper: JsonResultMapper::new(config.mode, config.inherit_features),
            query: None,
        }
    }

    /// A lookup over an already prepared query.
    pub fn with_query(name: &str, mapper: JsonResultMapper, query: Box<dyn KeyQuery + Send>) -> Self {
        Self {
            name: name.to_string(),
            database: None,
            duplicate: 0,
            mapper,
            query: Some(query),
        }
    }
}

impl Lookup for JsonLookup {
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
        let fetched = query.first_text(key)?;
        debug!(
            "{}: '{}' -> {}",
            name,
            key,
            if fetched.is_some() { "hit" } else { "miss" }
        );
        self.mapper.map(fetched.as_deref(), &trigger.features)
    }

    fn cleanup(&mut self) {
        if self.database.is_some() && self.query.take().is_some() {
            debug!("{}: closed database connection", self.name);
        }
    }
}
