pub mod lookup;

#[allow(unused_imports)]
pub use lookup::{
    build_processor, build_processors, ColumnMapper, FeatureUpdate, JsonResultMapper,
    MapValueMapper,
};
