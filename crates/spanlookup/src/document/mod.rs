//! Documents, annotation sets and annotations.
//!
//! This is the slice of a text-annotation host that lookups need: a text,
//! named annotation sets (the empty name is the default set) and annotations
//! carrying mutable feature maps. Offsets count characters, not bytes, and
//! `end` is exclusive.

mod features;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub use features::{json_object_to_features, FeatureMap, FeatureValue};

/// Identifier of an annotation, unique within its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationId(pub u32);

impl fmt::Display for AnnotationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<AnnotationId> for FeatureValue {
    fn from(id: AnnotationId) -> Self {
        FeatureValue::Int(i64::from(id.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub start: usize,
    pub end: usize,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub features: FeatureMap,
}

impl Annotation {
    /// Whether `other` lies entirely within this annotation's span.
    pub fn contains(&self, other: &Annotation) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Annotations of one set, kept in id order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationSet {
    annotations: Vec<Annotation>,
}

impl AnnotationSet {
    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter()
    }

    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations
            .binary_search_by_key(&id, |a| a.id)
            .ok()
            .map(|i| &self.annotations[i])
    }

    pub fn get_mut(&mut self, id: AnnotationId) -> Option<&mut Annotation> {
        match self.annotations.binary_search_by_key(&id, |a| a.id) {
            Ok(i) => Some(&mut self.annotations[i]),
            Err(_) => None,
        }
    }

    /// Annotations of the given type in document order (start offset, then id).
    pub fn of_type(&self, kind: &str) -> Vec<&Annotation> {
        let mut found: Vec<&Annotation> =
            self.annotations.iter().filter(|a| a.kind == kind).collect();
        found.sort_by_key(|a| (a.start, a.id));
        found
    }

    /// Annotations of the given type lying within `outer`, in document order.
    pub fn contained_in(&self, kind: &str, outer: &Annotation) -> Vec<&Annotation> {
        let mut found = self.of_type(kind);
        found.retain(|a| outer.contains(a));
        found
    }

    fn push(&mut self, annotation: Annotation) {
        // ids are handed out in increasing order, so appending keeps the order
        self.annotations.push(annotation);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawDocument")]
pub struct Document {
    pub name: String,
    text: String,
    sets: BTreeMap<String, AnnotationSet>,
    #[serde(skip)]
    next_id: u32,
}

#[derive(Deserialize)]
struct RawDocument {
    #[serde(default)]
    name: String,
    text: String,
    #[serde(default)]
    sets: BTreeMap<String, Vec<Annotation>>,
}

impl TryFrom<RawDocument> for Document {
    type Error = String;

    fn try_from(raw: RawDocument) -> Result<Self, Self::Error> {
        let length = raw.text.chars().count();
        let mut seen = HashSet::new();
        let mut sets = BTreeMap::new();
        let mut next_id = 0;
        for (set_name, mut annotations) in raw.sets {
            for a in &annotations {
                if a.start > a.end || a.end > length {
                    return Err(format!(
                        "annotation {} in set '{}' has invalid span {}..{} (text length {})",
                        a.id, set_name, a.start, a.end, length
                    ));
                }
                if !seen.insert(a.id) {
                    return Err(format!("duplicate annotation id {}", a.id));
                }
                next_id = next_id.max(a.id.0 + 1);
            }
            annotations.sort_by_key(|a| a.id);
            sets.insert(set_name, AnnotationSet { annotations });
        }
        Ok(Document {
            name: raw.name,
            text: raw.text,
            sets,
            next_id,
        })
    }
}

impl Document {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            sets: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The named annotation set; `""` is the default set.
    pub fn set(&self, name: &str) -> Option<&AnnotationSet> {
        self.sets.get(name)
    }

    pub fn set_names(&self) -> impl Iterator<Item = &str> {
        self.sets.keys().map(String::as_str)
    }

    pub fn annotation(&self, set: &str, id: AnnotationId) -> Option<&Annotation> {
        self.sets.get(set).and_then(|s| s.get(id))
    }

    pub fn annotation_mut(&mut self, set: &str, id: AnnotationId) -> Option<&mut Annotation> {
        self.sets.get_mut(set).and_then(|s| s.get_mut(id))
    }

    /// Add an annotation to a set (created on demand) and return its id.
    pub fn add_annotation(
        &mut self,
        set: &str,
        start: usize,
        end: usize,
        kind: &str,
        features: FeatureMap,
    ) -> AnnotationId {
        let id = AnnotationId(self.next_id);
        self.next_id += 1;
        self.sets.entry(set.to_string()).or_default().push(Annotation {
            id,
            start,
            end,
            kind: kind.to_string(),
            features,
        });
        id
    }

    /// The text covered by an annotation.
    pub fn text_for(&self, annotation: &Annotation) -> String {
        self.text
            .chars()
            .skip(annotation.start)
            .take(annotation.end.saturating_sub(annotation.start))
            .collect()
    }

    /// Covered text, trimmed, with whitespace runs collapsed to one space.
    pub fn clean_text_for(&self, annotation: &Annotation) -> String {
        self.text_for(annotation)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::new("d", "Take  aspirin\tdaily");
        doc.add_annotation("", 6, 13, "Lookup", FeatureMap::new());
        doc.add_annotation("", 0, 4, "Lookup", FeatureMap::new());
        doc.add_annotation("", 0, 19, "Sentence", FeatureMap::new());
        doc
    }

    #[test]
    fn test_of_type_is_document_order() {
        let doc = sample();
        let set = doc.set("").unwrap();
        let starts: Vec<usize> = set.of_type("Lookup").iter().map(|a| a.start).collect();
        assert_eq!(starts, vec![0, 6]);
        assert!(set.of_type("Missing").is_empty());
    }

    #[test]
    fn test_contained_in() {
        let doc = sample();
        let set = doc.set("").unwrap();
        let sentence = set.of_type("Sentence")[0].clone();
        assert_eq!(set.contained_in("Lookup", &sentence).len(), 2);
        let first = set.of_type("Lookup")[0].clone();
        assert!(set.contained_in("Lookup", &first).iter().all(|a| a.id == first.id));
    }

    #[test]
    fn test_text_for_and_clean_text() {
        let doc = sample();
        let sentence = doc.set("").unwrap().of_type("Sentence")[0].clone();
        assert_eq!(doc.text_for(&sentence), "Take  aspirin\tdaily");
        assert_eq!(doc.clean_text_for(&sentence), "Take aspirin daily");
    }

    #[test]
    fn test_text_for_uses_char_offsets() {
        let mut doc = Document::new("d", "café crème");
        let id = doc.add_annotation("", 5, 10, "Lookup", FeatureMap::new());
        let ann = doc.annotation("", id).unwrap().clone();
        assert_eq!(doc.text_for(&ann), "crème");
    }

    #[test]
    fn test_ids_unique_across_sets() {
        let mut doc = Document::new("d", "abc");
        let a = doc.add_annotation("", 0, 1, "X", FeatureMap::new());
        let b = doc.add_annotation("out", 0, 1, "X", FeatureMap::new());
        assert_ne!(a, b);
        assert!(doc.annotation("out", b).is_some());
        assert!(doc.annotation("", b).is_none());
    }

    #[test]
    fn test_json_round_trip_continues_ids() {
        let doc = sample();
        let json = serde_json::to_string(&doc).unwrap();
        let mut back: Document = serde_json::from_str(&json).unwrap();
        let id = back.add_annotation("", 0, 1, "X", FeatureMap::new());
        assert_eq!(id, AnnotationId(3));
    }

    #[test]
    fn test_json_rejects_bad_span() {
        let json = r#"{"text": "abc", "sets": {"": [
            {"id": 0, "start": 1, "end": 9, "type": "X"}
        ]}}"#;
        let err = serde_json::from_str::<Document>(json).unwrap_err();
        assert!(err.to_string().contains("invalid span"));
    }
}
