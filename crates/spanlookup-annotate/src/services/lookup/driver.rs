//! The shared per-document lookup loop.

use tracing::{debug, info};

use spanlookup::config::LookupSettings;
use spanlookup::{Annotation, AnnotationId, Document, FeatureValue, LookupError, Result};

use super::key::KeyExtractor;
use super::processor::{DocumentProcessor, Lookup};
use super::types::{
    BatchSummary, Cancellation, FeatureUpdate, LookupEffect, LIST_IDS_FEATURE, LIST_ID_FEATURE,
};

/// Runs a `Lookup` over the input annotations of each document.
pub struct LookupDriver<L> {
    settings: LookupSettings,
    keys: KeyExtractor,
    lookup: L,
}

impl<L: Lookup> LookupDriver<L> {
    pub fn new(settings: LookupSettings, lookup: L) -> Self {
        let keys = KeyExtractor::new(&settings.key_feature, lookup.key_text());
        Self {
            settings,
            keys,
            lookup,
        }
    }

    pub fn settings(&self) -> &LookupSettings {
        &self.settings
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    fn check_settings(&self) -> Result<()> {
        if self.settings.input_type.trim().is_empty() {
            return Err(LookupError::Config(format!(
                "{}: input annotation type must not be empty",
                self.settings.name
            )));
        }
        Ok(())
    }

    /// Ids of the annotations to process, in processing order.
    ///
    /// With a containing type, containing annotations are walked in document
    /// order and each contributes the input annotations inside it; input
    /// annotations outside every container are left out.
    fn candidates(&self, doc: &Document) -> Vec<AnnotationId> {
        let Some(set) = doc.set(&self.settings.input_set) else {
            return Vec::new();
        };
        let input_type = self.settings.input_type.as_str();
        if self.settings.containing_type.is_empty() {
            return set.of_type(input_type).iter().map(|a| a.id).collect();
        }
        set.of_type(&self.settings.containing_type)
            .into_iter()
            .flat_map(|outer| set.contained_in(input_type, outer))
            .map(|a| a.id)
            .collect()
    }

    /// Write an effect back to the document; returns the number of
    /// annotations created.
    fn apply(&self, doc: &mut Document, trigger: &Annotation, effect: LookupEffect) -> usize {
        let LookupEffect {
            features,
            children,
            list,
        } = effect;

        if let Some(target) = doc.annotation_mut(&self.settings.input_set, trigger.id) {
            match features {
                FeatureUpdate::Unchanged => {}
                FeatureUpdate::Replace(map) => target.features = map,
                FeatureUpdate::Merge(map) => target.features.extend(map),
            }
        }

        let output_set = self.settings.output_set.as_str();
        let ids: Vec<AnnotationId> = children
            .into_iter()
            .map(|features| {
                doc.add_annotation(
                    output_set,
                    trigger.start,
                    trigger.end,
                    &self.settings.output_type,
                    features,
                )
            })
            .collect();
        let mut created = ids.len();

        if let Some(mut features) = list.filter(|_| !self.settings.list_type.is_empty()) {
            features.insert(
                LIST_IDS_FEATURE.to_string(),
                FeatureValue::Ints(ids.iter().map(|id| i64::from(id.0)).collect()),
            );
            let list_id = doc.add_annotation(
                output_set,
                trigger.start,
                trigger.end,
                &self.settings.list_type,
                features,
            );
            for id in &ids {
                if let Some(child) = doc.annotation_mut(output_set, *id) {
                    child
                        .features
                        .insert(LIST_ID_FEATURE.to_string(), list_id.into());
                }
            }
            created += 1;
        }
        created
    }
}

impl<L: Lookup> DocumentProcessor for LookupDriver<L> {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn initialize(&mut self) -> Result<()> {
        self.check_settings()?;
        self.lookup.initialize()
    }

    fn run_started(&mut self) -> Result<()> {
        info!("{}: starting lookup run", self.settings.name);
        self.lookup.run_started()
    }

    fn process(&mut self, doc: &mut Document, cancel: &Cancellation) -> Result<BatchSummary> {
        self.check_settings()?;
        let candidates = self.candidates(doc);
        debug!(
            "{}: performing look-up in {} ({} candidates)",
            self.settings.name,
            doc.name,
            candidates.len()
        );

        let mut summary = BatchSummary::default();
        for id in candidates {
            let Some(trigger) = doc.annotation(&self.settings.input_set, id).cloned() else {
                continue;
            };
            summary.candidates += 1;

            let key = self.keys.key(doc, &trigger);
            if key.is_empty() {
                summary.skipped += 1;
            } else {
                let effect = self.lookup.lookup(&key, &trigger)?;
                summary.looked_up += 1;
                if !effect.is_none() {
                    summary.created += self.apply(doc, &trigger, effect);
                }
            }

            if cancel.is_cancelled() {
                return Err(LookupError::Interrupted(self.settings.name.clone()));
            }
        }

        debug!(
            "{}: look-up complete for {}: {:?}",
            self.settings.name, doc.name, summary
        );
        Ok(summary)
    }

    fn run_finished(&mut self) -> Result<()> {
        self.lookup.run_finished()
    }

    fn cleanup(&mut self) {
        self.lookup.cleanup();
    }
}
