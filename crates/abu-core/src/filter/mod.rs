//! Matching indices for the three rule families.

mod css_filter;
mod rule_set;
mod script_filter;
mod url_filter;

pub use css_filter::{CssFilter, SelectorsResult};
pub use script_filter::ScriptFilter;
pub use url_filter::{RequestQuery, UrlFilter};
