//! Configuration for lookup processors.
//!
//! A pipeline file is TOML with one `[[lookup]]` table per processor, tagged
//! by `kind`. See `PipelineConfig`.

mod loader;
mod settings;

pub use loader::PipelineConfig;
pub use settings::{
    expand_braced, expand_template, DatabaseSettings, JsonLookupConfig, JsonMode, LoadingMode,
    LookupConfig, LookupSettings, MapLookupConfig, MappingMode, RowLookupConfig, RowMode,
};
