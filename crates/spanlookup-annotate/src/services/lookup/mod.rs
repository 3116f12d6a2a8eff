//! Annotation lookups against external key/value stores.
//!
//! A `LookupDriver` walks the input annotations of a document and hands each
//! key to a `Lookup`, which fetches from its store and says what to change:
//!
//! - `JsonLookup`: one JSON text per key, mapped by `JsonResultMapper`
//! - `RowLookup`: SQL rows per key, mapped by `ColumnMapper`
//! - `MapLookup`: typed values from a map file, mapped by `MapValueMapper`

mod driver;
mod json_lookup;
mod key;
mod map_lookup;
mod pipeline;
mod processor;
mod row_lookup;
mod types;

pub use driver::LookupDriver;
pub use json_lookup::{JsonLookup, JsonResultMapper};
pub use key::{KeyExtractor, KeyText};
pub use map_lookup::{MapLookup, MapValueMapper};
pub use pipeline::{build_processor, build_processors, Pipeline};
pub use processor::{DocumentProcessor, Lookup};
pub use row_lookup::{decode_doubles, Coercion, ColumnMapper, ColumnMapping, RowLookup};
pub use types::{
    BatchSummary, Cancellation, FeatureUpdate, LookupEffect, LIST_IDS_FEATURE, LIST_ID_FEATURE,
};
