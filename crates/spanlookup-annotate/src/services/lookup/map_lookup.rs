//! Lookup in a read-only map file shared between duplicates.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use spanlookup::config::{LoadingMode, MapLookupConfig, MappingMode};
use spanlookup::store::MapFile;
use spanlookup::{Annotation, FeatureMap, FeatureValue, Lease, LookupError, ResourceRegistry, Result};

use super::key::KeyText;
use super::processor::Lookup;
use super::types::{FeatureUpdate, LookupEffect};

/// Turns a stored value into features.
#[derive(Debug, Clone)]
pub struct MapValueMapper {
    mode: MappingMode,
    value_feature: String,
    mappings: BTreeMap<String, String>,
}

impl MapValueMapper {
    pub fn new(mode: MappingMode, value_feature: &str, mappings: BTreeMap<String, String>) -> Self {
        Self {
            mode,
            value_feature: value_feature.to_string(),
            mappings,
        }
    }

    pub fn map(&self, value: FeatureValue) -> Result<FeatureMap> {
        let mut features = FeatureMap::new();
        match self.mode {
            MappingMode::Direct => {
                features.insert(self.value_feature.clone(), value);
            }
            MappingMode::SequenceToFeatures => {
                for (index, item) in sequence_items(value)?.into_iter().enumerate() {
                    let name = if self.mappings.is_empty() {
                        format!("{}{}", self.value_feature, index)
                    } else {
                        match self.mappings.get(&index.to_string()) {
                            Some(name) => name.clone(),
                            None => continue,
                        }
                    };
                    features.insert(name, item);
                }
            }
            MappingMode::MapToFeatures => {
                let entries = match value {
                    FeatureValue::Map(entries) => entries,
                    other => {
                        return Err(LookupError::DataShape(format!(
                            "map_to_features needs a map value, got {}: {}",
                            other.kind_name(),
                            other
                        )))
                    }
                };
                if !self.mappings.is_empty() {
                    return Err(LookupError::Unimplemented(
                        "feature mappings for map_to_features".into(),
                    ));
                }
                features.extend(entries);
            }
        }
        Ok(features)
    }
}

fn sequence_items(value: FeatureValue) -> Result<Vec<FeatureValue>> {
    match value {
        FeatureValue::List(items) => Ok(items),
        FeatureValue::Doubles(items) => Ok(items.into_iter().map(FeatureValue::Float).collect()),
        FeatureValue::Ints(items) => Ok(items.into_iter().map(FeatureValue::Int).collect()),
        FeatureValue::Strings(items) => Ok(items.into_iter().map(FeatureValue::Text).collect()),
        other => Err(LookupError::DataShape(format!(
            "sequence_to_features needs a sequence value, got {}: {}",
            other.kind_name(),
            other
        ))),
    }
}

/// Looks keys up in a map file.
///
/// The file is acquired from the registry at run start under the lookup's
/// name and path, so duplicates of one lookup share a single open file.
pub struct MapLookup {
    name: String,
    config: MapLookupConfig,
    duplicate: usize,
    registry: ResourceRegistry,
    mapper: MapValueMapper,
    map: Option<Lease<MapFile>>,
}

impl MapLookup {
    pub fn new(config: &MapLookupConfig, duplicate: usize, registry: ResourceRegistry) -> Self {
        Self {
            name: config.settings.name.clone(),
            config: config.clone(),
            duplicate,
            registry,
            mapper: MapValueMapper::new(
                config.mapping_mode,
                &config.value_feature,
                config.feature_mappings.clone(),
            ),
            map: None,
        }
    }

    /// Registry key identifying the shared map file.
    pub fn resource_key(&self) -> String {
        format!(
            "{}:{}#{}",
            self.name,
            self.config.file.display(),
            self.config.map_name
        )
    }

    pub fn is_open(&self) -> bool {
        self.map.is_some()
    }
}

impl Lookup for MapLookup {
    fn key_text(&self) -> KeyText {
        KeyText::Cleaned
    }

    fn initialize(&mut self) -> Result<()> {
        if self.config.map_name.trim().is_empty() {
            return Err(LookupError::Config(format!(
                "{}: map name must not be empty",
                self.name
            )));
        }
        if self.config.mapping_mode == MappingMode::MapToFeatures
            && !self.config.feature_mappings.is_empty()
        {
            warn!(
                "{}: feature mappings are not supported for map_to_features; lookups will fail",
                self.name
            );
        }
        Ok(())
    }

    fn run_started(&mut self) -> Result<()> {
        if self.map.is_some() {
            return Ok(());
        }
        let key = self.resource_key();
        let file = self.config.file.clone();
        let map_name = self.config.map_name.clone();
        let mode: LoadingMode = self.config.loading_mode;
        let lease = self
            .registry
            .acquire(&key, self.duplicate, || MapFile::open(&file, &map_name, mode))?;
        debug!(
            "{}: duplicate {} using map file opened by duplicate {}",
            self.name,
            self.duplicate,
            lease.owner()
        );
        self.map = Some(lease);
        Ok(())
    }

    fn lookup(&mut self, key: &str, _trigger: &Annotation) -> Result<LookupEffect> {
        let map = self.map.as_ref().ok_or_else(|| {
            LookupError::Config(format!(
                "{}: lookup used before the run was started",
                self.name
            ))
        })?;
        let Some(value) = map.get(key)? else {
            return Ok(LookupEffect::none());
        };
        let features = self.mapper.map(value)?;
        Ok(LookupEffect::update(FeatureUpdate::Merge(features)))
    }

    fn cleanup(&mut self) {
        if self.map.take().is_some() {
            debug!("{}: released map file", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mappings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_direct_keeps_value() {
        let mapper = MapValueMapper::new(MappingMode::Direct, "value", BTreeMap::new());
        let features = mapper.map(FeatureValue::Doubles(vec![1.0])).unwrap();
        assert_eq!(features["value"], FeatureValue::Doubles(vec![1.0]));
    }

    #[test]
    fn test_sequence_to_features() {
        let mapper = MapValueMapper::new(MappingMode::SequenceToFeatures, "v", BTreeMap::new());
        let features = mapper.map(FeatureValue::Ints(vec![7, 8])).unwrap();
        assert_eq!(features["v0"], FeatureValue::Int(7));
        assert_eq!(features["v1"], FeatureValue::Int(8));

        let mapper = MapValueMapper::new(
            MappingMode::SequenceToFeatures,
            "v",
            mappings(&[("1", "second")]),
        );
        let features = mapper
            .map(FeatureValue::Strings(vec!["a".into(), "b".into(), "c".into()]))
            .unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features["second"], FeatureValue::Text("b".into()));

        assert!(matches!(
            mapper.map(FeatureValue::Int(1)),
            Err(LookupError::DataShape(_))
        ));
    }

    #[test]
    fn test_map_to_features() {
        let mut stored = FeatureMap::new();
        stored.insert("pos".into(), "NN".into());
        stored.insert("freq".into(), FeatureValue::Int(12));

        let mapper = MapValueMapper::new(MappingMode::MapToFeatures, "value", BTreeMap::new());
        assert_eq!(mapper.map(FeatureValue::Map(stored.clone())).unwrap(), stored);
        assert!(matches!(
            mapper.map(FeatureValue::Text("x".into())),
            Err(LookupError::DataShape(_))
        ));

        let mapper = MapValueMapper::new(
            MappingMode::MapToFeatures,
            "value",
            mappings(&[("pos", "category")]),
        );
        assert!(matches!(
            mapper.map(FeatureValue::Map(stored)),
            Err(LookupError::Unimplemented(_))
        ));
    }
}
