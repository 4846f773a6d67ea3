//! ABU Core Library
//!
//! Rule model and matching engine of the ABU content blocker. Everything in
//! this crate is synchronous and free of I/O; the lifecycle service in
//! `abu-service` owns downloading, storage and scheduling.
//!
//! # Architecture
//!
//! Rule lines are parsed into immutable [`Rule`] values and spread over
//! three indices: [`UrlFilter`] for network rules, [`CssFilter`] for
//! cosmetic rules and [`ScriptFilter`] for script injection. Exceptions are
//! paired with the blocking rules they cancel when they are added, so a
//! query never has to search for them. [`RequestFilter`] puts the three
//! indices behind one object.
//!
//! # Modules
//!
//! - `types`: Filter ids, request types and option flags
//! - `url`: URL helpers used on the matching path
//! - `domain`: Registrable domains and third-party checks
//! - `rule`: Rule parsing and the [`Rule`] enum
//! - `filter`: The URL, CSS and script indices
//! - `request_filter`: The aggregate filter
//! - `whitelist`: Domain whitelist
//! - `blocking`: Per-request decisions on top of the filters

pub mod blocking;
pub mod domain;
pub mod error;
pub mod filter;
pub mod request_filter;
pub mod rule;
pub mod types;
pub mod url;
pub mod whitelist;

// Re-export commonly used types
pub use blocking::{BlockedResponse, CosmeticResult};
pub use domain::{get_etld1, is_third_party};
pub use error::RuleError;
pub use filter::{CssFilter, RequestQuery, ScriptFilter, SelectorsResult, UrlFilter};
pub use request_filter::RequestFilter;
pub use rule::{
    CompositeRule, CssFilterRule, FilterRule, Rule, ScriptFilterRule, ScriptletRule, UrlFilterRule,
};
pub use types::{CssOptions, FilterId, RequestType, UrlRuleOptions};
pub use whitelist::WhitelistEngine;
