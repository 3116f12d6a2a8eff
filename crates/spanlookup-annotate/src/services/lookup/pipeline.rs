//! Building processors from configuration and running them over documents.

use tracing::{info, warn};

use spanlookup::config::{LookupConfig, PipelineConfig};
use spanlookup::{Document, ResourceRegistry, Result};

use super::driver::LookupDriver;
use super::json_lookup::JsonLookup;
use super::map_lookup::MapLookup;
use super::processor::DocumentProcessor;
use super::row_lookup::RowLookup;
use super::types::{BatchSummary, Cancellation};

/// Build the processor for one configured lookup.
///
/// `duplicate` is the index of the parallel copy being built; map files are
/// shared through `registry` across copies.
pub fn build_processor(
    config: &LookupConfig,
    duplicate: usize,
    registry: &ResourceRegistry,
) -> Box<dyn DocumentProcessor> {
    match config {
        LookupConfig::Json(c) => Box::new(LookupDriver::new(
            c.settings.clone(),
            JsonLookup::new(c, duplicate),
        )),
        LookupConfig::Row(c) => Box::new(LookupDriver::new(
            c.settings.clone(),
            RowLookup::new(c, duplicate),
        )),
        LookupConfig::Map(c) => Box::new(LookupDriver::new(
            c.settings.clone(),
            MapLookup::new(c, duplicate, registry.clone()),
        )),
    }
}

pub fn build_processors(
    config: &PipelineConfig,
    duplicate: usize,
    registry: &ResourceRegistry,
) -> Vec<Box<dyn DocumentProcessor>> {
    config
        .lookups
        .iter()
        .map(|lookup| build_processor(lookup, duplicate, registry))
        .collect()
}

/// An ordered list of processors with run lifecycle handling.
///
/// Once started, `run_finished` and `cleanup` are called on every
/// processor by `finish`, or by drop if `finish` was never reached.
pub struct Pipeline {
    processors: Vec<Box<dyn DocumentProcessor>>,
    started: bool,
}

impl Pipeline {
    pub fn new(processors: Vec<Box<dyn DocumentProcessor>>) -> Self {
        Self {
            processors,
            started: false,
        }
    }

    pub fn from_config(
        config: &PipelineConfig,
        duplicate: usize,
        registry: &ResourceRegistry,
    ) -> Self {
        Self::new(build_processors(config, duplicate, registry))
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    /// Initialize every processor and start the run.
    pub fn start(&mut self) -> Result<()> {
        for processor in &mut self.processors {
            processor.initialize()?;
        }
        self.started = true;
        let started = self
            .processors
            .iter_mut()
            .try_for_each(|processor| processor.run_started());
        if let Err(e) = started {
            self.cleanup();
            return Err(e);
        }
        info!("Started pipeline with {} processor(s)", self.processors.len());
        Ok(())
    }

    /// Apply every processor to `doc`, stopping at the first error.
    pub fn process(&mut self, doc: &mut Document, cancel: &Cancellation) -> Result<BatchSummary> {
        let mut total = BatchSummary::default();
        for processor in &mut self.processors {
            let summary = processor.process(doc, cancel)?;
            info!(
                "{}: {} candidate(s) in {}: {} looked up, {} skipped, {} created",
                processor.name(),
                summary.candidates,
                doc.name,
                summary.looked_up,
                summary.skipped,
                summary.created
            );
            total.add(&summary);
        }
        Ok(total)
    }

    /// End the run: `run_finished` then `cleanup` on every processor.
    /// Returns the first `run_finished` error.
    pub fn finish(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        let mut first_error = None;
        for processor in &mut self.processors {
            if let Err(e) = processor.run_finished() {
                warn!("{}: run end failed: {}", processor.name(), e);
                first_error.get_or_insert(e);
            }
        }
        self.cleanup();
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Start, process every document, and finish, whatever the outcome.
    pub fn run<'a, I>(&mut self, docs: I, cancel: &Cancellation) -> Result<BatchSummary>
    where
        I: IntoIterator<Item = &'a mut Document>,
    {
        self.start()?;
        let mut total = BatchSummary::default();
        let mut outcome = Ok(());
        for doc in docs {
            match self.process(doc, cancel) {
                Ok(summary) => total.add(&summary),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        let finished = self.finish();
        outcome?;
        finished?;
        Ok(total)
    }

    fn cleanup(&mut self) {
        for processor in &mut self.processors {
            processor.cleanup();
        }
        self.started = false;
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.started {
            self.cleanup();
        }
    }
}
