//! Command-line interface for spanlookup.

mod commands;

pub use commands::{is_verbose, run};
