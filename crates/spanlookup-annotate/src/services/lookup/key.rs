use spanlookup::{Annotation, Document};

/// How covered text becomes a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyText {
    /// The covered text as is.
    #[default]
    Raw,
    /// Trimmed, with whitespace runs collapsed.
    Cleaned,
}

/// Derives the lookup key of an annotation.
#[derive(Debug, Clone, Default)]
pub struct KeyExtractor {
    feature: Option<String>,
    text: KeyText,
}

impl KeyExtractor {
    /// Use the named feature, or the covered text when `feature` is empty.
    pub fn new(feature: &str, text: KeyText) -> Self {
        let feature = Some(feature.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string);
        Self { feature, text }
    }

    /// The key for `annotation`; empty means "skip".
    pub fn key(&self, doc: &Document, annotation: &Annotation) -> String {
        match &self.feature {
            Some(name) => annotation
                .features
                .get(name)
                .filter(|value| !value.is_null())
                .map(|value| value.to_string())
                .unwrap_or_default(),
            None => match self.text {
                KeyText::Raw => doc.text_for(annotation),
                KeyText::Cleaned => doc.clean_text_for(annotation),
            },
        }
    }
}
