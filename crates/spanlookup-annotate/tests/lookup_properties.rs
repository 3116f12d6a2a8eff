//! End-to-end lookup behavior against real SQLite databases and map files.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use spanlookup::config::{
    DatabaseSettings, JsonLookupConfig, JsonMode, LoadingMode, LookupSettings, MapLookupConfig,
    MappingMode, PipelineConfig, RowLookupConfig, RowMode,
};
use spanlookup::store::MapFileWriter;
use spanlookup::{Annotation, Document, FeatureMap, FeatureValue, LookupError, ResourceRegistry};
use spanlookup_annotate::{
    Cancellation, DocumentProcessor, JsonLookup, Lookup, LookupDriver, LookupEffect, MapLookup,
    Pipeline, RowLookup,
};

fn create_db(dir: &Path, sql: &str) -> PathBuf {
    let path = dir.join("lookup.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(sql).unwrap();
    path
}

fn settings(name: &str) -> LookupSettings {
    LookupSettings {
        name: name.to_string(),
        input_type: "Lookup".to_string(),
        ..LookupSettings::default()
    }
}

fn json_driver(db: &Path, mode: JsonMode) -> LookupDriver<JsonLookup> {
    let mut config = JsonLookupConfig::new(DatabaseSettings::new(
        format!("sqlite:{}", db.display()),
        "SELECT info FROM drugs WHERE name = ?",
    ));
    config.settings = settings("drugs");
    config.mode = mode;
    let mut driver = LookupDriver::new(config.settings.clone(), JsonLookup::new(&config, 0));
    driver.initialize().unwrap();
    driver.run_started().unwrap();
    driver
}

fn row_driver(db: &Path, mode: RowMode, remaps: &[(&str, &str)]) -> LookupDriver<RowLookup> {
    let mut config = RowLookupConfig::new(DatabaseSettings::new(
        format!("sqlite:{}", db.display()),
        "SELECT * FROM terms WHERE term = ? ORDER BY n",
    ));
    config.settings = settings("terms");
    config.mode = mode;
    config.name_mappings = remaps
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut driver = LookupDriver::new(config.settings.clone(), RowLookup::new(&config, 0));
    driver.initialize().unwrap();
    driver.run_started().unwrap();
    driver
}

fn one_lookup(text: &str, features: FeatureMap) -> (Document, spanlookup::AnnotationId) {
    let mut doc = Document::new("doc", text);
    let id = doc.add_annotation("", 0, text.chars().count(), "Lookup", features);
    (doc, id)
}

fn features(pairs: &[(&str, FeatureValue)]) -> FeatureMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

const DRUGS: &str = r#"
CREATE TABLE drugs (name TEXT, info TEXT);
INSERT INTO drugs VALUES ('aspirin', '{"a": 2, "b": 3}');
INSERT INTO drugs VALUES ('ibuprofen', '[{"dose": 200}, {"dose": 400}, {"dose": 600, "a": 5}]');
INSERT INTO drugs VALUES ('broken', '[{"dose": 1}, "oops"]');
INSERT INTO drugs VALUES ('blank', '');
"#;

#[test]
fn test_add_features_existing_wins_update_features_fetched_wins() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(dir.path(), DRUGS);

    let (mut doc, id) = one_lookup("aspirin", features(&[("a", FeatureValue::Int(1))]));
    json_driver(&db, JsonMode::AddFeatures)
        .process(&mut doc, &Cancellation::new())
        .unwrap();
    assert_eq!(
        doc.annotation("", id).unwrap().features,
        features(&[("a", FeatureValue::Int(1)), ("b", FeatureValue::Int(3))])
    );

    let (mut doc, id) = one_lookup("aspirin", features(&[("a", FeatureValue::Int(1))]));
    json_driver(&db, JsonMode::UpdateFeatures)
        .process(&mut doc, &Cancellation::new())
        .unwrap();
    assert_eq!(
        doc.annotation("", id).unwrap().features,
        features(&[("a", FeatureValue::Int(2)), ("b", FeatureValue::Int(3))])
    );
}

#[test]
fn test_json_array_fans_out_with_list_annotation() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(dir.path(), DRUGS);
    let mut driver = json_driver(&db, JsonMode::AddAnnotations);

    let mut doc = Document::new("doc", "take ibuprofen");
    let trigger = doc.add_annotation(
        "",
        5,
        14,
        "Lookup",
        features(&[("a", FeatureValue::Int(1))]),
    );
    let summary = driver.process(&mut doc, &Cancellation::new()).unwrap();
    assert_eq!(summary.created, 4);

    let set = doc.set("").unwrap();
    let children = set.of_type("LookupData");
    assert_eq!(children.len(), 3);
    let lists = set.of_type("LookupList");
    assert_eq!(lists.len(), 1);
    let list = lists[0];

    let doses: Vec<&FeatureValue> = children.iter().map(|c| &c.features["dose"]).collect();
    assert_eq!(
        doses,
        [&FeatureValue::Int(200), &FeatureValue::Int(400), &FeatureValue::Int(600)]
    );
    for child in &children {
        assert_eq!((child.start, child.end), (5, 14));
        assert_eq!(child.features["llId"], FeatureValue::from(list.id));
    }
    // the element's own field overrides the inherited one
    assert_eq!(children[0].features["a"], FeatureValue::Int(1));
    assert_eq!(children[2].features["a"], FeatureValue::Int(5));

    let ids: Vec<i64> = children.iter().map(|c| i64::from(c.id.0)).collect();
    assert_eq!(list.features["ids"], FeatureValue::Ints(ids));
    assert_eq!(list.features["a"], FeatureValue::Int(1));
    assert_eq!(
        doc.annotation("", trigger).unwrap().features,
        features(&[("a", FeatureValue::Int(1))])
    );
}

#[test]
fn test_json_errors_and_soft_paths() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(dir.path(), DRUGS);
    let mut driver = json_driver(&db, JsonMode::AddAnnotations);

    let (mut doc, _) = one_lookup("broken", FeatureMap::new());
    let err = driver.process(&mut doc, &Cancellation::new()).unwrap_err();
    assert!(matches!(err, LookupError::DataShape(_)));
    assert!(!err.is_interrupted());

    for key in ["blank", "unknown"] {
        let (mut doc, id) = one_lookup(key, FeatureMap::new());
        let summary = driver.process(&mut doc, &Cancellation::new()).unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(doc.set("").unwrap().len(), 1);
        assert!(doc.annotation("", id).unwrap().features.is_empty());
    }
}

#[test]
fn test_empty_key_is_never_looked_up() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(dir.path(), DRUGS);
    let mut config = JsonLookupConfig::new(DatabaseSettings::new(
        format!("sqlite:{}", db.display()),
        "SELECT info FROM drugs WHERE name = ?",
    ));
    config.settings = settings("drugs");
    config.settings.key_feature = "drug".into();
    let mut driver = LookupDriver::new(config.settings.clone(), JsonLookup::new(&config, 0));
    driver.run_started().unwrap();

    let (mut doc, id) = one_lookup("aspirin", features(&[("other", FeatureValue::Int(1))]));
    let summary = driver.process(&mut doc, &Cancellation::new()).unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.looked_up, 0);
    assert_eq!(
        doc.annotation("", id).unwrap().features,
        features(&[("other", FeatureValue::Int(1))])
    );
}

const TERMS: &str = r#"
CREATE TABLE terms (term TEXT, n INTEGER, label TEXT, vec TEXT);
INSERT INTO terms VALUES ('cat', 1, 'first', '[1.0, 2.5, 3.0]');
INSERT INTO terms VALUES ('cat', 2, 'second', NULL);
INSERT INTO terms VALUES ('cat', 3, 'third', '[4.0, 5.0]');
"#;

#[test]
fn test_first_row_only_and_all_rows() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(dir.path(), TERMS);
    let remap = [("vec", "embedding|s2adouble")];

    let (mut doc, id) = one_lookup("cat", FeatureMap::new());
    row_driver(&db, RowMode::AddFeaturesFromFirst, &remap)
        .process(&mut doc, &Cancellation::new())
        .unwrap();
    let f = &doc.annotation("", id).unwrap().features;
    assert_eq!(f["label"], FeatureValue::Text("first".into()));
    assert_eq!(f["embedding"], FeatureValue::Doubles(vec![1.0, 2.5, 3.0]));
    assert!(!f.contains_key("vec"));

    let (mut doc, id) = one_lookup("cat", FeatureMap::new());
    row_driver(&db, RowMode::UpdateFeatures, &remap)
        .process(&mut doc, &Cancellation::new())
        .unwrap();
    let f = &doc.annotation("", id).unwrap().features;
    assert_eq!(f["label"], FeatureValue::Text("third".into()));
    assert_eq!(f["n"], FeatureValue::Int(3));
    assert_eq!(f["embedding"], FeatureValue::Doubles(vec![4.0, 5.0]));

    let (mut doc, id) = one_lookup("cat", features(&[("keep", FeatureValue::Bool(true))]));
    let summary = row_driver(&db, RowMode::AddAnnotations, &[("vec", "embedding|s2ldouble")])
        .process(&mut doc, &Cancellation::new())
        .unwrap();
    assert_eq!(summary.created, 3);
    let set = doc.set("").unwrap();
    let rows = set.of_type("LookupData");
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| !r.features.contains_key("keep")));
    assert_eq!(rows[1].features["embedding"], FeatureValue::List(Vec::new()));
    assert!(set.of_type("LookupList").is_empty());
    assert_eq!(
        doc.annotation("", id).unwrap().features,
        features(&[("keep", FeatureValue::Bool(true))])
    );
}

#[test]
fn test_containment_filtering_and_grouping() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(
        dir.path(),
        "CREATE TABLE terms (term TEXT, n INTEGER);
         INSERT INTO terms VALUES ('a1', 1);
         INSERT INTO terms VALUES ('a2', 2);
         INSERT INTO terms VALUES ('a3', 3);
         INSERT INTO terms VALUES ('a4', 4);",
    );
    let mut config = RowLookupConfig::new(DatabaseSettings::new(
        format!("sqlite:{}", db.display()),
        "SELECT n FROM terms WHERE term = ?",
    ));
    config.settings = settings("terms");
    config.settings.containing_type = "Sentence".into();

    // "a1 a2. a3. a4": C1 covers a1 a2, C2 covers a3, a4 is outside
    let mut doc = Document::new("doc", "a1 a2. a3. a4");
    let a4 = doc.add_annotation("", 11, 13, "Lookup", FeatureMap::new());
    let a3 = doc.add_annotation("", 7, 9, "Lookup", FeatureMap::new());
    let a1 = doc.add_annotation("", 0, 2, "Lookup", FeatureMap::new());
    let a2 = doc.add_annotation("", 3, 5, "Lookup", FeatureMap::new());
    doc.add_annotation("", 7, 10, "Sentence", FeatureMap::new());
    doc.add_annotation("", 0, 6, "Sentence", FeatureMap::new());

    let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let lookup = Recording {
        inner: RowLookup::new(&config, 0),
        order: order.clone(),
    };
    let mut driver = LookupDriver::new(config.settings.clone(), lookup);
    driver.run_started().unwrap();
    let summary = driver.process(&mut doc, &Cancellation::new()).unwrap();

    assert_eq!(*order.lock().unwrap(), ["a1", "a2", "a3"]);
    assert_eq!(summary.candidates, 3);
    for (id, n) in [(a1, 1), (a2, 2), (a3, 3)] {
        assert_eq!(doc.annotation("", id).unwrap().features["n"], FeatureValue::Int(n));
    }
    assert!(doc.annotation("", a4).unwrap().features.is_empty());
}

/// Records keys in order and can raise cancellation after a given count.
struct Recording<L> {
    inner: L,
    order: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl<L: Lookup> Lookup for Recording<L> {
    fn run_started(&mut self) -> spanlookup::Result<()> {
        self.inner.run_started()
    }

    fn lookup(&mut self, key: &str, trigger: &Annotation) -> spanlookup::Result<LookupEffect> {
        self.order.lock().unwrap().push(key.to_string());
        self.inner.lookup(key, trigger)
    }
}

struct CancelAfter<L> {
    inner: L,
    remaining: usize,
    cancel: Cancellation,
}

impl<L: Lookup> Lookup for CancelAfter<L> {
    fn run_started(&mut self) -> spanlookup::Result<()> {
        self.inner.run_started()
    }

    fn lookup(&mut self, key: &str, trigger: &Annotation) -> spanlookup::Result<LookupEffect> {
        let effect = self.inner.lookup(key, trigger)?;
        self.remaining -= 1;
        if self.remaining == 0 {
            self.cancel.cancel();
        }
        Ok(effect)
    }
}

#[test]
fn test_cancellation_leaves_remaining_annotations_unmodified() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_db(
        dir.path(),
        "CREATE TABLE terms (term TEXT, n INTEGER);
         INSERT INTO terms VALUES ('x', 1);",
    );
    let mut config = RowLookupConfig::new(DatabaseSettings::new(
        format!("sqlite:{}", db.display()),
        "SELECT n FROM terms WHERE term = ?",
    ));
    config.settings = settings("terms");

    let mut doc = Document::new("doc", "x x x x x");
    let ids: Vec<_> = (0..5)
        .map(|i| doc.add_annotation("", i * 2, i * 2 + 1, "Lookup", FeatureMap::new()))
        .collect();

    let cancel = Cancellation::new();
    let lookup = CancelAfter {
        inner: RowLookup::new(&config, 0),
        remaining: 2,
        cancel: cancel.clone(),
    };
    let mut driver = LookupDriver::new(config.settings.clone(), lookup);
    driver.run_started().unwrap();

    let err = driver.process(&mut doc, &cancel).unwrap_err();
    assert!(err.is_interrupted());
    assert_eq!(err.to_string(), "terms has been interrupted");
    for (k, id) in ids.iter().enumerate() {
        let touched = doc.annotation("", *id).unwrap().features.contains_key("n");
        assert_eq!(touched, k < 2, "annotation {}", k);
    }
}

fn write_vectors(dir: &Path) -> PathBuf {
    let path = dir.join("vectors.map");
    let mut writer = MapFileWriter::create(&path, "map").unwrap();
    writer
        .insert_all(vec![
            ("New York", FeatureValue::Doubles(vec![0.25, 0.75])),
            ("Paris", FeatureValue::Doubles(vec![1.0, 2.0])),
        ])
        .unwrap();
    path
}

#[test]
fn test_map_lookup_uses_cleaned_text_and_sequence_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MapLookupConfig::new(write_vectors(dir.path()));
    config.settings = settings("vectors");
    config.mapping_mode = MappingMode::SequenceToFeatures;
    config.value_feature = "dim".into();

    let registry = ResourceRegistry::new();
    let mut driver = LookupDriver::new(config.settings.clone(), MapLookup::new(&config, 0, registry));
    driver.initialize().unwrap();
    driver.run_started().unwrap();

    let mut doc = Document::new("doc", "New   York and Rome");
    let ny = doc.add_annotation("", 0, 10, "Lookup", FeatureMap::new());
    let rome = doc.add_annotation("", 15, 19, "Lookup", FeatureMap::new());
    driver.process(&mut doc, &Cancellation::new()).unwrap();

    let f = &doc.annotation("", ny).unwrap().features;
    assert_eq!(f["dim0"], FeatureValue::Float(0.25));
    assert_eq!(f["dim1"], FeatureValue::Float(0.75));
    assert!(doc.annotation("", rome).unwrap().features.is_empty());
    driver.cleanup();
}

#[test]
fn test_map_file_shared_between_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MapLookupConfig::new(write_vectors(dir.path()));
    config.settings = settings("vectors");
    config.loading_mode = LoadingMode::CopyToMemory;
    let pipeline_config = PipelineConfig {
        lookups: vec![spanlookup::config::LookupConfig::Map(config.clone())],
    };

    let registry = ResourceRegistry::new();
    let key = MapLookup::new(&config, 0, registry.clone()).resource_key();

    let mut first = Pipeline::from_config(&pipeline_config, 0, &registry);
    let mut second = Pipeline::from_config(&pipeline_config, 1, &registry);
    first.start().unwrap();
    second.start().unwrap();
    assert_eq!(registry.lease_count(&key), 2);

    let (mut doc, id) = one_lookup("Paris", FeatureMap::new());
    second.process(&mut doc, &Cancellation::new()).unwrap();
    assert_eq!(
        doc.annotation("", id).unwrap().features["value"],
        FeatureValue::Doubles(vec![1.0, 2.0])
    );

    // the duplicate that opened the file finishes first
    first.finish().unwrap();
    assert!(registry.is_open(&key));
    second.finish().unwrap();
    assert!(!registry.is_open(&key));
}

#[test]
fn test_pipeline_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    create_db(dir.path(), DRUGS);
    write_vectors(dir.path());
    let toml = r#"
[[lookup]]
kind = "json"
name = "drugs"
mode = "update_features"

[lookup.database]
url = "sqlite:${dbdirectory}/lookup.db"
query = "SELECT info FROM ${table} WHERE name = ?"
vars = { table = "drugs" }

[[lookup]]
kind = "map"
name = "vectors"
file = "vectors.map"
value_feature = "vector"
"#;
    let path = dir.path().join("pipeline.toml");
    std::fs::write(&path, toml).unwrap();
    let config = PipelineConfig::load(&path).unwrap();

    let registry = ResourceRegistry::new();
    let mut pipeline = Pipeline::from_config(&config, 0, &registry);
    assert_eq!(pipeline.names(), ["drugs", "vectors"]);

    let mut doc = Document::new("doc", "aspirin in Paris");
    let aspirin = doc.add_annotation("", 0, 7, "Lookup", FeatureMap::new());
    let paris = doc.add_annotation("", 11, 16, "Lookup", FeatureMap::new());
    let mut docs = vec![doc];
    let summary = pipeline.run(docs.iter_mut(), &Cancellation::new()).unwrap();
    assert_eq!(summary.looked_up, 4);

    let doc = &docs[0];
    assert_eq!(doc.annotation("", aspirin).unwrap().features["b"], FeatureValue::Int(3));
    assert_eq!(
        doc.annotation("", paris).unwrap().features["vector"],
        FeatureValue::Doubles(vec![1.0, 2.0])
    );
    drop(pipeline);
    let map_config = match &config.lookups[1] {
        spanlookup::config::LookupConfig::Map(c) => c.clone(),
        other => panic!("expected map lookup, got {:?}", other),
    };
    let key = MapLookup::new(&map_config, 0, registry.clone()).resource_key();
    assert!(!registry.is_open(&key));
}

#[test]
fn test_missing_query_is_config_error_at_initialize() {
    let config = JsonLookupConfig::new(DatabaseSettings::new("sqlite::memory:", ""));
    let mut driver = LookupDriver::new(settings("drugs"), JsonLookup::new(&config, 0));
    assert!(matches!(driver.initialize(), Err(LookupError::Config(_))));
}
