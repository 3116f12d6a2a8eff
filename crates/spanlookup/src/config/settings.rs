//! Lookup configuration types.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{LookupError, Result};

/// Options shared by every lookup kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupSettings {
    /// Processor name, used in logs and as the shared-resource identity.
    pub name: String,
    /// Input annotation set; empty means the default set.
    pub input_set: String,
    /// Required input annotation type.
    pub input_type: String,
    /// Only process input annotations inside annotations of this type.
    pub containing_type: String,
    /// Feature holding the key; empty means the covered text.
    pub key_feature: String,
    pub output_set: String,
    pub output_type: String,
    /// Type of the list annotation; empty suppresses it.
    pub list_type: String,
}

impl Default for LookupSettings {
    fn default() -> Self {
        Self {
            name: "lookup".to_string(),
            input_set: String::new(),
            input_type: "Lookup".to_string(),
            containing_type: String::new(),
            key_feature: String::new(),
            output_set: String::new(),
            output_type: "LookupData".to_string(),
            list_type: "LookupList".to_string(),
        }
    }
}

/// Connection and query settings for the SQL-backed lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database URL (`sqlite:path`, `jdbc:sqlite:path` or a bare path).
    /// May reference `${dbdirectory}` and environment variables.
    pub url: String,
    /// Directory substituted for `${dbdirectory}`; a path or `file://` URL.
    #[serde(default = "default_db_directory")]
    pub db_directory: String,
    /// Query taking exactly one `?` parameter, the key. `${name}` placeholders
    /// are filled from `vars` and the built-in `duplicate`.
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
}

fn default_db_directory() -> String {
    ".".to_string()
}

impl DatabaseSettings {
    pub fn new(url: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            db_directory: default_db_directory(),
            query: query.into(),
            vars: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(LookupError::Config("database url must be specified".into()));
        }
        if self.query.trim().is_empty() {
            return Err(LookupError::Config("SQL query must be specified".into()));
        }
        Ok(())
    }

    /// Absolute path of the database directory.
    pub fn db_directory_path(&self) -> Result<PathBuf> {
        let raw = self.db_directory.trim();
        let path = if let Some(rest) = raw.strip_prefix("file://") {
            PathBuf::from(rest)
        } else if raw.contains("://") {
            return Err(LookupError::Config(format!(
                "the database directory URL is not a file URL: {}",
                raw
            )));
        } else {
            PathBuf::from(raw)
        };
        if path.is_absolute() {
            return Ok(path);
        }
        let cwd = std::env::current_dir()
            .map_err(|e| LookupError::io("resolving database directory", e))?;
        Ok(cwd.join(path))
    }

    /// The URL with `${dbdirectory}` and environment variables expanded.
    pub fn expanded_url(&self) -> Result<String> {
        let dbdirectory = self.db_directory_path()?.display().to_string();
        expand_template(&self.url, "database url", |name| {
            if name == "dbdirectory" {
                Some(dbdirectory.clone())
            } else {
                std::env::var(name).ok()
            }
        })
    }

    /// The query with its `${name}` placeholders expanded for one duplicate.
    /// Bare `$name` text is left alone so SQLite named parameters survive.
    pub fn expanded_query(&self, duplicate: usize) -> Result<String> {
        expand_braced(&self.query, "SQL query", |name| {
            if name == "duplicate" {
                Some(duplicate.to_string())
            } else {
                self.vars.get(name).cloned()
            }
        })
    }

    pub(crate) fn resolve_relative(&mut self, base: &Path) {
        let raw = self.db_directory.trim();
        if !raw.contains("://") && Path::new(raw).is_relative() {
            self.db_directory = base.join(raw).display().to_string();
        }
    }
}

/// Expand `$name` / `${name}` references; undefined names are an error.
pub fn expand_template(
    template: &str,
    what: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    shellexpand::env_with_context(template, |name: &str| -> std::result::Result<Option<String>, String> {
        match lookup(name) {
            Some(value) => Ok(Some(value)),
            None => Err("undefined".to_string()),
        }
    })
    .map(|expanded| expanded.into_owned())
    .map_err(|e| LookupError::Config(format!("cannot expand {}: {}", what, e)))
}

static BRACED_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_.]*)\}").expect("placeholder pattern is valid")
});

/// Expand only `${name}` references; undefined names are an error.
pub fn expand_braced(
    template: &str,
    what: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<String> {
    let mut missing = None;
    let expanded = BRACED_PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        lookup(name).unwrap_or_else(|| {
            missing.get_or_insert_with(|| name.to_string());
            caps[0].to_string()
        })
    });
    match missing {
        Some(name) => Err(LookupError::Config(format!(
            "cannot expand {}: '{}' is undefined",
            what, name
        ))),
        None => Ok(expanded.into_owned()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonMode {
    /// Fetched fields act as defaults; existing features win.
    AddFeatures,
    /// Fetched fields overwrite existing features.
    UpdateFeatures,
    /// One new annotation per fetched object.
    #[default]
    AddAnnotations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowMode {
    /// Copy the first row's columns onto the trigger annotation.
    #[default]
    AddFeaturesFromFirst,
    /// Copy every row's columns onto the trigger annotation, in order.
    UpdateFeatures,
    /// One new annotation per row.
    AddAnnotations,
}

/// How a map file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingMode {
    #[default]
    MemoryMapped,
    FileOnly,
    CopyToMemory,
}

/// How a stored map value becomes features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMode {
    #[default]
    Direct,
    SequenceToFeatures,
    MapToFeatures,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonLookupConfig {
    #[serde(flatten)]
    pub settings: LookupSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub mode: JsonMode,
    /// Copy the trigger's features onto each created annotation before the
    /// fetched fields.
    #[serde(default = "default_true")]
    pub inherit_features: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowLookupConfig {
    #[serde(flatten)]
    pub settings: LookupSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub mode: RowMode,
    /// Column name to feature name, optionally suffixed `|s2adouble` or `|s2ldouble`.
    #[serde(default)]
    pub name_mappings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapLookupConfig {
    #[serde(flatten)]
    pub settings: LookupSettings,
    pub file: PathBuf,
    #[serde(default = "default_map_name")]
    pub map_name: String,
    #[serde(default)]
    pub loading_mode: LoadingMode,
    #[serde(default = "default_value_feature")]
    pub value_feature: String,
    #[serde(default)]
    pub mapping_mode: MappingMode,
    /// Sequence index (or map key) to feature name.
    #[serde(default)]
    pub feature_mappings: BTreeMap<String, String>,
}

fn default_map_name() -> String {
    "map".to_string()
}

fn default_value_feature() -> String {
    "value".to_string()
}

impl JsonLookupConfig {
    pub fn new(database: DatabaseSettings) -> Self {
        Self {
            settings: LookupSettings::default(),
            database,
            mode: JsonMode::default(),
            inherit_features: true,
        }
    }
}

impl RowLookupConfig {
    pub fn new(database: DatabaseSettings) -> Self {
        Self {
            settings: LookupSettings::default(),
            database,
            mode: RowMode::default(),
            name_mappings: BTreeMap::new(),
        }
    }
}

impl MapLookupConfig {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            settings: LookupSettings::default(),
            file: file.into(),
            map_name: default_map_name(),
            loading_mode: LoadingMode::default(),
            value_feature: default_value_feature(),
            mapping_mode: MappingMode::default(),
            feature_mappings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LookupConfig {
    Json(JsonLookupConfig),
    Row(RowLookupConfig),
    Map(MapLookupConfig),
}

impl LookupConfig {
    pub fn settings(&self) -> &LookupSettings {
        match self {
            LookupConfig::Json(c) => &c.settings,
            LookupConfig::Row(c) => &c.settings,
            LookupConfig::Map(c) => &c.settings,
        }
    }
}
