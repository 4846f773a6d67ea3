//! Error types for the lifecycle service.

use abu_core::FilterId;
use thiserror::Error;

use crate::subscription::GroupId;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("filter {0} not found")]
    FilterNotFound(FilterId),

    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    #[error("download from {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("filters metadata unavailable: {0}")]
    Metadata(String),

    #[error("storage error for filter {filter_id}: {reason}")]
    Storage { filter_id: FilterId, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration value for '{key}': {value}")]
    Config { key: String, value: String },

    #[error("custom filter from {0} is already added")]
    AlreadyAdded(String),

    #[error("subscription url is empty")]
    EmptyUrl,

    #[error("service is not running")]
    NotRunning,
}

impl ServiceError {
    pub(crate) fn download(url: impl Into<String>, reason: impl ToString) -> Self {
        ServiceError::Download {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        ServiceError::download(url, e)
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
