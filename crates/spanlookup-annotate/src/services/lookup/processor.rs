//! Lifecycle contracts for document processors and per-annotation lookups.

use spanlookup::{Annotation, Document, Result};

use super::key::KeyText;
use super::types::{BatchSummary, Cancellation, LookupEffect};

/// A processor applied to each document of a run.
///
/// The pipeline calls `initialize` once, `run_started` before the first
/// document, `process` per document, then `run_finished` and `cleanup`
/// whether or not processing succeeded.
pub trait DocumentProcessor: Send {
    fn name(&self) -> &str;

    /// Validate configuration. Nothing is opened yet.
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Open connections, prepare statements, acquire shared resources.
    fn run_started(&mut self) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, doc: &mut Document, cancel: &Cancellation) -> Result<BatchSummary>;

    fn run_finished(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release everything acquired in `run_started`. Must be safe to call
    /// more than once and after a failed `run_started`.
    fn cleanup(&mut self) {}
}

/// The variant-specific half of a lookup: fetch by key and map the result.
pub trait Lookup: Send {
    /// Which text to use as key when no key feature is configured.
    fn key_text(&self) -> KeyText {
        KeyText::Raw
    }

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn run_started(&mut self) -> Result<()> {
        Ok(())
    }

    /// Fetch the value for `key` and decide what to do with `trigger`.
    fn lookup(&mut self, key: &str, trigger: &Annotation) -> Result<LookupEffect>;

    fn run_finished(&mut self) -> Result<()> {
        Ok(())
    }

    fn cleanup(&mut self) {}
}
