//! Types shared across lookup processors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spanlookup::FeatureMap;

/// Feature name under which a list annotation records its children.
pub const LIST_IDS_FEATURE: &str = "ids";
/// Feature name under which each child points back at its list annotation.
pub const LIST_ID_FEATURE: &str = "llId";

/// What a lookup does to the trigger annotation's own features.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FeatureUpdate {
    #[default]
    Unchanged,
    /// Replace the feature map wholesale.
    Replace(FeatureMap),
    /// Merge into the existing map; incoming values win.
    Merge(FeatureMap),
}

/// The outcome of looking up one annotation.
///
/// Children are created over the trigger's span in the output set, in order.
/// When `list` is set and the lookup has a list type, one more same-span
/// annotation of that type is created with those features plus the
/// children's ids, and every child gets a back-reference to it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupEffect {
    pub features: FeatureUpdate,
    pub children: Vec<FeatureMap>,
    pub list: Option<FeatureMap>,
}

impl LookupEffect {
    /// Leave the document untouched.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn update(features: FeatureUpdate) -> Self {
        Self {
            features,
            ..Self::default()
        }
    }

    pub fn children(children: Vec<FeatureMap>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    pub fn is_none(&self) -> bool {
        self.features == FeatureUpdate::Unchanged && self.children.is_empty() && self.list.is_none()
    }
}

/// Result of processing one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Input annotations visited.
    pub candidates: usize,
    /// Candidates that had a non-empty key and were looked up.
    pub looked_up: usize,
    /// Candidates skipped for an empty key.
    pub skipped: usize,
    /// Annotations created, list annotations included.
    pub created: usize,
}

impl BatchSummary {
    pub fn add(&mut self, other: &BatchSummary) {
        self.candidates += other.candidates;
        self.looked_up += other.looked_up;
        self.skipped += other.skipped;
        self.created += other.created;
    }
}

/// Cooperative cancellation flag, polled once per processed annotation.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new run.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
