//! Where filter metadata and rule text come from.

use std::path::PathBuf;

use abu_core::FilterId;
use async_trait::async_trait;

use crate::config::{ServiceConfig, FILTER_IDS_PLACEHOLDER, FILTER_ID_PLACEHOLDER};
use crate::error::{Result, ServiceError};
use crate::metadata::{FilterMetadata, FiltersMetadata};

#[async_trait]
pub trait FilterSource: Send + Sync {
    /// Groups and filters shipped with the application.
    async fn load_local_metadata(&self) -> Result<FiltersMetadata>;

    /// Current metadata of the given filters.
    async fn load_filters_metadata(&self, filter_ids: &[FilterId]) -> Result<Vec<FilterMetadata>>;

    /// Rule lines of a filter. Without `force_remote` a packaged copy may
    /// be used.
    async fn load_filter_rules(&self, filter_id: FilterId, force_remote: bool) -> Result<Vec<String>>;

    /// Rule lines of a list given by URL.
    async fn load_filter_rules_by_url(&self, url: &str) -> Result<Vec<String>>;
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(|l| l.trim_end_matches('\r').to_string()).collect()
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Metadata and rules over HTTP, with local files where configured.
#[derive(Debug, Clone)]
pub struct HttpFilterSource {
    client: reqwest::Client,
    metadata_url: String,
    filter_rules_url_template: String,
    filters_metadata_url_template: String,
    local_filters_dir: Option<PathBuf>,
}

impl HttpFilterSource {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .user_agent(concat!("abu-service/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            metadata_url: config.metadata_url.clone(),
            filter_rules_url_template: config.filter_rules_url_template.clone(),
            filters_metadata_url_template: config.filters_metadata_url_template.clone(),
            local_filters_dir: config.local_filters_dir.clone(),
        })
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        url::Url::parse(url).map_err(|e| ServiceError::download(url, e))?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ServiceError::download(url, format!("HTTP {}", response.status())));
        }
        Ok(response.text().await?)
    }

    fn rules_url(&self, filter_id: FilterId) -> Result<String> {
        if self.filter_rules_url_template.is_empty() {
            return Err(ServiceError::download(
                format!("filter {}", filter_id),
                "no filter_rules_url_template configured",
            ));
        }
        Ok(self
            .filter_rules_url_template
            .replace(FILTER_ID_PLACEHOLDER, &filter_id.to_string()))
    }

    async fn read_local_rules(&self, filter_id: FilterId) -> Option<Vec<String>> {
        let dir = self.local_filters_dir.as_ref()?;
        let path = dir.join(format!("filter_{}.txt", filter_id));
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Some(split_lines(&text)),
            Err(e) => {
                log::debug!("No packaged rules for filter {} at {}: {}", filter_id, path.display(), e);
                None
            }
        }
    }
}

#[async_trait]
impl FilterSource for HttpFilterSource {
    async fn load_local_metadata(&self) -> Result<FiltersMetadata> {
        let text = if is_remote(&self.metadata_url) {
            self.get_text(&self.metadata_url).await?
        } else {
            tokio::fs::read_to_string(&self.metadata_url).await?
        };
        serde_json::from_str(&text).map_err(|e| ServiceError::Metadata(e.to_string()))
    }

    async fn load_filters_metadata(&self, filter_ids: &[FilterId]) -> Result<Vec<FilterMetadata>> {
        if filter_ids.is_empty() {
            return Ok(Vec::new());
        }
        if self.filters_metadata_url_template.is_empty() {
            return Err(ServiceError::Metadata(
                "no filters_metadata_url_template configured".to_string(),
            ));
        }
        let ids: Vec<String> = filter_ids.iter().map(ToString::to_string).collect();
        let url = self
            .filters_metadata_url_template
            .replace(FILTER_IDS_PLACEHOLDER, &ids.join(","));
        let text = self.get_text(&url).await?;
        let metadata: FiltersMetadata =
            serde_json::from_str(&text).map_err(|e| ServiceError::Metadata(e.to_string()))?;
        Ok(metadata.filters)
    }

    async fn load_filter_rules(&self, filter_id: FilterId, force_remote: bool) -> Result<Vec<String>> {
        if !force_remote {
            if let Some(lines) = self.read_local_rules(filter_id).await {
                return Ok(lines);
            }
        }
        let url = self.rules_url(filter_id)?;
        Ok(split_lines(&self.get_text(&url).await?))
    }

    async fn load_filter_rules_by_url(&self, url: &str) -> Result<Vec<String>> {
        Ok(split_lines(&self.get_text(url).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines() {
        assert_eq!(split_lines("a\r\nb\n\nc"), vec!["a", "b", "", "c"]);
    }

    #[tokio::test]
    async fn test_local_metadata_and_packaged_rules() {
        let dir = tempfile::tempdir().unwrap();
        let metadata_path = dir.path().join("filters.json");
        std::fs::write(
            &metadata_path,
            r#"{"groups": [], "filters": [{"filterId": 1, "groupId": 1, "version": "1.0"}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("filter_1.txt"), "! Title: ABU\n||ads.net^\n").unwrap();

        let config = ServiceConfig {
            metadata_url: metadata_path.to_string_lossy().into_owned(),
            local_filters_dir: Some(dir.path().to_path_buf()),
            ..ServiceConfig::default()
        };
        let source = HttpFilterSource::new(&config).unwrap();

        let metadata = source.load_local_metadata().await.unwrap();
        assert_eq!(metadata.filters[0].filter_id, 1);

        let rules = source.load_filter_rules(1, false).await.unwrap();
        assert_eq!(rules, vec!["! Title: ABU", "||ads.net^"]);

        assert!(source.load_filters_metadata(&[]).await.unwrap().is_empty());
        assert!(matches!(
            source.load_filters_metadata(&[1]).await,
            Err(ServiceError::Metadata(_))
        ));
        assert!(matches!(
            source.load_filter_rules(2, true).await,
            Err(ServiceError::Download { .. })
        ));
    }
}
