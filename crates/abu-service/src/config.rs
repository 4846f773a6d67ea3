//! Service configuration.
//!
//! Loaded from JSON; every field has a default so a partial file is valid.
//! Durations are written as milliseconds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "abu-service.json";

/// Placeholder replaced by a filter id in `filter_rules_url_template`.
pub const FILTER_ID_PLACEHOLDER: &str = "{filter_id}";

/// Placeholder replaced by comma separated ids in `filters_metadata_url_template`.
pub const FILTER_IDS_PLACEHOLDER: &str = "{filter_ids}";

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// How often installed filters are checked for updates
    #[serde(with = "duration_ms")]
    pub update_period: Duration,

    /// Delay before the first update check after start
    #[serde(with = "duration_ms")]
    pub update_delay: Duration,

    /// Quiet period after the last filter change before changes are applied
    #[serde(with = "duration_ms")]
    pub filters_change_debounce: Duration,

    /// Retries of a failed metadata request during an update check
    pub metadata_retry_attempts: u32,

    #[serde(with = "duration_ms")]
    pub metadata_retry_delay: Duration,

    /// How long after the first initialization pages collapse every
    /// blocked element
    #[serde(with = "duration_ms")]
    pub collapse_window: Duration,

    /// Rules compiled between yields when `async_compile` is set
    pub compile_chunk_size: usize,
    pub async_compile: bool,

    pub app_version: String,
    pub locale: String,
    /// Browser languages, most preferred first. Only the first two are used.
    pub languages: Vec<String>,

    /// Directory holding rule text and state
    pub storage_dir: PathBuf,

    /// Local filters metadata: a file path or an http(s) URL
    pub metadata_url: String,
    /// Rule text for one filter, with a `{filter_id}` placeholder
    pub filter_rules_url_template: String,
    /// Metadata for several filters, with a `{filter_ids}` placeholder
    pub filters_metadata_url_template: String,
    /// Packaged `filter_{id}.txt` files used before going to the network
    pub local_filters_dir: Option<PathBuf>,

    #[serde(with = "duration_ms")]
    pub download_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            update_period: Duration::from_secs(4 * 60 * 60),
            update_delay: Duration::from_secs(10),
            filters_change_debounce: Duration::from_millis(1000),
            metadata_retry_attempts: 10,
            metadata_retry_delay: Duration::from_secs(60),
            collapse_window: Duration::from_secs(5),
            compile_chunk_size: 1000,
            async_compile: false,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            locale: "en".to_string(),
            languages: Vec::new(),
            storage_dir: PathBuf::from("abu-data"),
            metadata_url: "filters/filters.json".to_string(),
            filter_rules_url_template: String::new(),
            filters_metadata_url_template: String::new(),
            local_filters_dir: None,
            download_timeout: Duration::from_secs(30),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: ServiceConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, value: String| {
            Err(ServiceError::Config {
                key: key.to_string(),
                value,
            })
        };

        if self.update_period.is_zero() {
            return invalid("update_period", "0".to_string());
        }
        if self.filters_change_debounce.is_zero() {
            return invalid("filters_change_debounce", "0".to_string());
        }
        if self.compile_chunk_size == 0 {
            return invalid("compile_chunk_size", "0".to_string());
        }
        if self.app_version.trim().is_empty() {
            return invalid("app_version", self.app_version.clone());
        }
        if !self.filter_rules_url_template.is_empty()
            && !self.filter_rules_url_template.contains(FILTER_ID_PLACEHOLDER)
        {
            return invalid("filter_rules_url_template", self.filter_rules_url_template.clone());
        }
        if !self.filters_metadata_url_template.is_empty()
            && !self.filters_metadata_url_template.contains(FILTER_IDS_PLACEHOLDER)
        {
            return invalid("filters_metadata_url_template", self.filters_metadata_url_template.clone());
        }
        Ok(())
    }

    /// Navigator languages taken into account when offering filters.
    pub fn preferred_languages(&self) -> &[String] {
        let n = self.languages.len().min(2);
        &self.languages[..n]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.update_period, Duration::from_secs(14_400));
        assert_eq!(config.filters_change_debounce, Duration::from_millis(1000));
        assert_eq!(config.metadata_retry_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_and_millis() {
        let config: ServiceConfig =
            serde_json::from_str(r#"{"update_delay": 2500, "locale": "de", "languages": ["de-DE", "en", "fr"]}"#)
                .unwrap();
        assert_eq!(config.update_delay, Duration::from_millis(2500));
        assert_eq!(config.collapse_window, Duration::from_secs(5));
        assert_eq!(config.preferred_languages(), ["de-DE".to_string(), "en".to_string()]);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["update_delay"], 2500);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ServiceConfig::default();
        config.compile_chunk_size = 0;
        assert!(matches!(config.validate(), Err(ServiceError::Config { .. })));

        let mut config = ServiceConfig::default();
        config.filter_rules_url_template = "https://example.org/filters/1.txt".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(DEFAULT_CONFIG_FILE);

        let mut config = ServiceConfig::default();
        config.locale = "ru".to_string();
        config.save_to_file(&path).unwrap();

        let loaded = ServiceConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
