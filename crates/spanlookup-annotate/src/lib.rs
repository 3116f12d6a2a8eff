//! Lookup processors for spanlookup documents.
//!
//! Three lookups share one driver: a JSON lookup that turns fetched JSON
//! into features or new annotations, a row lookup that maps SQL result
//! columns to features, and a map lookup over read-only map files.

pub mod services;

pub use services::lookup::{
    BatchSummary, Cancellation, DocumentProcessor, JsonLookup, KeyExtractor, KeyText, Lookup,
    LookupDriver, LookupEffect, MapLookup, Pipeline, RowLookup,
};
