//! Filter updates: version checks against the metadata source, rule
//! downloads, custom filter refreshes and the periodic schedule.

use std::time::Duration;

use abu_core::FilterId;
use chrono::Utc;

use crate::antibanner::AntiBannerService;
use crate::error::Result;
use crate::events::Event;
use crate::metadata::{is_greater_version, FilterMetadata};
use crate::subscription::{checksum, did_filter_update, parse_filter_data_from_header, Filter, CUSTOM_FILTERS_GROUP_ID};

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

impl AntiBannerService {
    /// Check filters for newer versions and download the ones that changed.
    ///
    /// Without `force` only filters whose last check is older than the
    /// update period are considered, and nothing happens while the service
    /// is not running. Returns the ids of updated filters, custom ones last.
    pub async fn check_antibanner_filters_update(
        &self,
        force: bool,
        only: Option<&[FilterId]>,
    ) -> Result<Vec<FilterId>> {
        if !force && !self.is_running() {
            return Ok(Vec::new());
        }
        log::info!("Start checking filters updates");

        let selection =
            self.catalog
                .lock()
                .select_for_update(force, only, now_millis(), millis(self.config.update_period));
        if selection.is_empty() {
            log::info!("No filters for update found");
            return Ok(Vec::new());
        }
        log::info!("Checking updates for {} filters", selection.filter_ids.len());

        let metadata = self.load_filters_metadata_with_retry(&selection.filter_ids).await?;

        let mut to_download: Vec<FilterMetadata> = Vec::new();
        for meta in metadata {
            let checked = {
                let mut catalog = self.catalog.lock();
                let filter = match catalog.filter_mut(meta.filter_id) {
                    Ok(filter) => filter,
                    Err(e) => {
                        log::warn!("Ignoring metadata: {}", e);
                        continue;
                    }
                };
                match meta.version.as_deref() {
                    Some(version) if is_greater_version(version, filter.version.as_deref()) => {
                        log::info!("Updating filter {} to version {}", filter.filter_id, version);
                        merge_metadata(&meta, filter);
                        None
                    }
                    _ => {
                        filter.last_check_time = Some(now_millis());
                        Some(filter.clone())
                    }
                }
            };
            match checked {
                Some(filter) => self.notify(Event::SuccessDownloadFilter(filter)),
                None => to_download.push(meta),
            }
        }

        let mut updated = Vec::new();
        for meta in to_download {
            let loaded = self
                .load_filter_rules(meta.filter_id, true, meta.version.clone(), meta.time_updated.clone())
                .await;
            match loaded {
                Ok(()) => updated.push(meta.filter_id),
                Err(e) => log::warn!("Filter {} was not updated: {}", meta.filter_id, e),
            }
        }

        updated.extend(self.update_custom_filters(&selection.custom_filter_ids).await);
        Ok(updated)
    }

    /// Fetch metadata for `filter_ids`, retrying after a fixed delay. Gives
    /// up after the configured number of retries.
    async fn load_filters_metadata_with_retry(&self, filter_ids: &[FilterId]) -> Result<Vec<FilterMetadata>> {
        let mut attempts = 0;
        loop {
            match self.source.load_filters_metadata(filter_ids).await {
                Ok(metadata) => {
                    log::debug!(
                        "Retrieved response from server for {} filters, result: {} metadata",
                        filter_ids.len(),
                        metadata.len()
                    );
                    return Ok(metadata);
                }
                Err(e) => {
                    log::error!("Error retrieved response from server for filters {:?}, cause: {}", filter_ids, e);
                    if attempts >= self.config.metadata_retry_attempts {
                        return Err(e);
                    }
                    attempts += 1;
                    tokio::time::sleep(self.config.metadata_retry_delay).await;
                    log::info!("Retrying to update filters from backend attempt {}", attempts);
                }
            }
        }
    }

    /// Download a filter's rules and hand them to the change batcher.
    pub async fn load_filter_rules(
        &self,
        filter_id: FilterId,
        force_remote: bool,
        version: Option<String>,
        time_updated: Option<String>,
    ) -> Result<()> {
        self.catalog.lock().filter(filter_id)?;
        self.notify(Event::StartDownloadFilter(filter_id));

        let rules = match self.source.load_filter_rules(filter_id, force_remote).await {
            Ok(rules) => rules,
            Err(e) => {
                log::error!("Error retrieved response from server for filter {}, cause: {}", filter_id, e);
                self.notify(Event::ErrorDownloadFilter(filter_id));
                return Err(e);
            }
        };
        log::info!(
            "Retrieved response from server for filter {}, rules count: {}",
            filter_id,
            rules.len()
        );

        let filter = {
            let mut catalog = self.catalog.lock();
            let filter = catalog.filter_mut(filter_id)?;
            filter.version = version;
            filter.last_update_time = time_updated;
            filter.last_check_time = Some(now_millis());
            filter.loaded = true;
            filter.clone()
        };
        self.notify(Event::SuccessDownloadFilter(filter));
        self.notify(Event::UpdateFilterRules { filter_id, rules });
        Ok(())
    }

    /// Download a custom filter list and add or refresh its filter.
    ///
    /// Lists with a `Version` header are compared by version, others by
    /// checksum. Returns `None` when the known list did not change.
    pub async fn add_update_custom_filter(&self, url: &str) -> Result<Option<Filter>> {
        let rules = self.source.load_filter_rules_by_url(url).await.map_err(|e| {
            log::error!("Error download filter by url {}, cause: {}", url, e);
            e
        })?;

        let header = parse_filter_data_from_header(&rules);
        let version = Some(header.version.clone()).filter(|v| !v.is_empty());
        let sum = match version {
            Some(_) => None,
            None => Some(checksum(&rules)),
        };
        let time_updated = if header.time_updated.is_empty() {
            Utc::now().to_rfc3339()
        } else {
            header.time_updated.clone()
        };

        let filter = {
            let mut catalog = self.catalog.lock();
            let existing = catalog.find_by_subscription_url(url).map(|f| f.filter_id);
            match existing {
                Some(filter_id) => {
                    let filter = catalog.filter_mut(filter_id)?;
                    if !did_filter_update(version.as_deref(), sum.as_deref(), filter) {
                        filter.last_check_time = Some(now_millis());
                        let unchanged = filter.clone();
                        drop(catalog);
                        log::debug!("Custom filter {} is up to date", filter_id);
                        self.state.save_custom_filter(&unchanged);
                        self.state.update_filter_version(&unchanged);
                        return Ok(None);
                    }
                    filter.version = version;
                    filter.checksum = sum;
                    filter.last_update_time = Some(time_updated);
                    filter.expires = header.expires;
                    filter.last_check_time = Some(now_millis());
                    filter.clone()
                }
                None => {
                    let mut filter = Filter::new(catalog.next_custom_filter_id());
                    filter.group_id = CUSTOM_FILTERS_GROUP_ID;
                    filter.name = if header.name.is_empty() {
                        url.to_string()
                    } else {
                        header.name.clone()
                    };
                    filter.description = header.description.clone();
                    filter.homepage = header.homepage.clone();
                    filter.version = version;
                    filter.checksum = sum;
                    filter.last_update_time = Some(time_updated);
                    filter.last_check_time = Some(now_millis());
                    filter.expires = header.expires;
                    filter.subscription_url = url.to_string();
                    filter.enabled = true;
                    filter.installed = true;
                    filter.loaded = true;
                    catalog.insert_filter(filter.clone());
                    filter
                }
            }
        };

        self.state.save_custom_filter(&filter);
        self.notify(Event::SuccessDownloadFilter(filter.clone()));
        self.notify(Event::UpdateFilterRules {
            filter_id: filter.filter_id,
            rules,
        });
        Ok(Some(filter))
    }

    /// Refresh custom filters by id. Returns the ones that changed.
    pub async fn update_custom_filters(&self, filter_ids: &[FilterId]) -> Vec<FilterId> {
        let mut updated = Vec::new();
        for &filter_id in filter_ids {
            let url = match self.catalog.lock().filter(filter_id) {
                Ok(filter) => filter.subscription_url.clone(),
                Err(e) => {
                    log::warn!("{}", e);
                    continue;
                }
            };
            match self.add_update_custom_filter(&url).await {
                Ok(Some(_)) => updated.push(filter_id),
                Ok(None) => {}
                Err(e) => log::warn!("Custom filter {} was not updated: {}", filter_id, e),
            }
        }
        if !updated.is_empty() {
            log::info!("Updated custom filters with ids: {:?}", updated);
        }
        updated
    }

    /// Forget filter versions and download everything again.
    pub async fn reload_filters(&self) -> Result<Vec<FilterId>> {
        self.state.reset_filters_version();
        self.catalog.lock().reset_versions();
        self.check_antibanner_filters_update(true, None).await
    }

    /// One check `update_delay` after start, forced on first run, then a
    /// check every `update_period`.
    pub(crate) fn schedule_filters_update(&self, first_run: bool) {
        let service = self.self_ref.clone();
        let delay = self.config.update_delay;
        let period = self.config.update_period;

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut force = first_run;
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                let Some(strong) = service.upgrade() else {
                    return;
                };
                if let Err(e) = strong.check_antibanner_filters_update(force, None).await {
                    log::error!("Error update filters, cause {}", e);
                }
                drop(strong);
                force = false;
                interval.tick().await;
            }
        });

        if let Some(previous) = self.update_task.lock().replace(task) {
            previous.abort();
        }
    }
}

fn merge_metadata(meta: &FilterMetadata, filter: &mut Filter) {
    filter.last_update_time = meta.time_updated.clone();
    filter.expires = meta.expires;
    if !meta.subscription_url.is_empty() && meta.subscription_url != filter.subscription_url {
        filter.subscription_url = meta.subscription_url.clone();
    }
    if !meta.name.is_empty() {
        filter.name = meta.name.clone();
    }
}
