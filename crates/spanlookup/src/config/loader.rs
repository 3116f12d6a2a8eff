//! Pipeline file loading.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::settings::LookupConfig;
use crate::error::{LookupError, Result};

/// A pipeline: lookups applied in order to every document.
///
/// ```toml
/// [[lookup]]
/// kind = "json"
/// name = "drugs"
/// input_type = "Drug"
///
/// [lookup.database]
/// url = "sqlite:${dbdirectory}/drugs.db"
/// query = "SELECT info FROM ${table} WHERE name = ?"
/// vars = { table = "drug_info" }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default, rename = "lookup")]
    pub lookups: Vec<LookupConfig>,
}

impl PipelineConfig {
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| LookupError::Config(format!("invalid pipeline file: {}", e)))
    }

    /// Load a pipeline file. Relative paths inside it resolve against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| LookupError::io(format!("reading {}", path.display()), e))?;
        let mut config = Self::from_toml(&source)?;
        let base = path.parent().unwrap_or(Path::new("."));
        config.resolve_relative(base);
        tracing::debug!(
            "Loaded {} lookup(s) from {}",
            config.lookups.len(),
            path.display()
        );
        Ok(config)
    }

    fn resolve_relative(&mut self, base: &Path) {
        for lookup in &mut self.lookups {
            match lookup {
                LookupConfig::Json(c) => c.database.resolve_relative(base),
                LookupConfig::Row(c) => c.database.resolve_relative(base),
                LookupConfig::Map(c) => {
                    if c.file.is_relative() {
                        c.file = base.join(&c.file);
                    }
                }
            }
        }
    }
}
