//! ABU Filter List Compiler
//!
//! Turns filter list text into [`abu_core::Rule`] values: syntax
//! normalization, rule dispatch and per-list deduplication.

pub mod builder;
pub mod converter;
pub mod error;
pub mod optimizer;

pub use builder::{compile_filter_list, create_rule, parse_rule, CompiledList};
pub use converter::convert_rule;
pub use error::ConvertError;
pub use optimizer::{dedup_rules, DedupStats};
