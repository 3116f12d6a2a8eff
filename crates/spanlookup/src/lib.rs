//! spanlookup - enrich document annotations from external key/value stores.
//!
//! Core library exposing the document model, feature values, backing stores
//! and configuration types shared by the lookup processors and the CLI.

pub mod config;
pub mod document;
pub mod error;
pub mod registry;
pub mod store;

pub use document::{Annotation, AnnotationId, AnnotationSet, Document, FeatureMap, FeatureValue};
pub use error::{LookupError, Result};
pub use registry::{Lease, ResourceRegistry};
