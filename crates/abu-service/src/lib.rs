//! ABU Filter Service
//!
//! Lifecycle of the content blocker's filters around the matching engine in
//! `abu-core`: which filters are installed and enabled, where their rules
//! are stored, when they are updated, and when the request filter is
//! rebuilt.
//!
//! # Modules
//!
//! - `antibanner`: [`AntiBannerService`], start/stop, rebuilds and change batching
//! - `filters`: Installing, enabling and removing filters and groups
//! - `update`: Update checks, downloads and custom filter lists
//! - `whitelist`: Persisted domain whitelist
//! - `subscription`: Filter catalog, header parsing and checksums
//! - `state`: Persisted filter, group and application state
//! - `storage`: Rule text and state stores
//! - `source`: Metadata and rule downloads
//! - `debounce`: Trailing-edge batching of change events
//! - `events`: Event kinds and the listener bus
//! - `metadata`: Metadata documents and version comparison
//! - `config`: Service configuration

pub mod antibanner;
pub mod config;
pub mod debounce;
pub mod error;
pub mod events;
pub mod filters;
pub mod metadata;
pub mod source;
pub mod state;
pub mod storage;
pub mod subscription;
pub mod update;
pub mod whitelist;

pub use antibanner::{AntiBannerService, RequestFilterInfo, RunState};
pub use config::ServiceConfig;
pub use error::{Result, ServiceError};
pub use events::{Event, EventBus, EventType, ListenerId};
pub use source::{FilterSource, HttpFilterSource};
pub use state::{FiltersState, RunInfo};
pub use storage::{FileRulesStorage, FileStateStore, MemoryRulesStorage, MemoryStateStore, RulesStorage, StateStore};
pub use subscription::{Filter, Group, GroupId};
pub use whitelist::WhitelistService;

/// Install `env_logger` on stderr. `RUST_LOG` overrides `level`. Calling it
/// twice is harmless.
pub fn init_logging(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .try_init();
}
