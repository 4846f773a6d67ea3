//! Filter and group management on top of [`AntiBannerService`].

use abu_core::types::{ABU_FILTER, ABU_PRIVACY, ABU_SECURITY, ANTI_CIRCUMVENTION, NO_COIN, SPAM_404, USER_FILTER_ID};
use abu_core::FilterId;

use crate::antibanner::AntiBannerService;
use crate::error::{Result, ServiceError};
use crate::events::Event;
use crate::subscription::{Filter, Group, GroupId};

/// Filters enabled on a fresh install, before the language-specific ones.
pub const DEFAULT_FILTER_IDS: [FilterId; 6] = [ABU_FILTER, ANTI_CIRCUMVENTION, ABU_SECURITY, ABU_PRIVACY, SPAM_404, NO_COIN];

impl AntiBannerService {
    /// Filters to install on first run: the defaults, then filters for the
    /// locale and for the preferred languages. May contain repeats; ids the
    /// catalog does not know are left out.
    pub fn offer_filters(&self) -> Vec<FilterId> {
        let catalog = self.catalog.lock();
        let mut ids: Vec<FilterId> = DEFAULT_FILTER_IDS.to_vec();
        ids.extend(catalog.filter_ids_for_language(&self.config.locale));
        for lang in self.config.preferred_languages() {
            ids.extend(catalog.filter_ids_for_language(lang));
        }
        ids.retain(|id| catalog.filter(*id).is_ok());
        ids
    }

    pub fn get_filter(&self, filter_id: FilterId) -> Result<Filter> {
        Ok(self.catalog.lock().filter(filter_id)?.clone())
    }

    /// Every filter in the catalog, by display number.
    pub fn get_filters(&self) -> Vec<Filter> {
        self.catalog.lock().filters().into_iter().cloned().collect()
    }

    /// Filters shown to the user for a group.
    pub fn get_filters_for_group(&self, group_id: GroupId) -> Vec<Filter> {
        self.catalog
            .lock()
            .filters_for_group(group_id)
            .into_iter()
            .filter(|f| f.filter_id != ANTI_CIRCUMVENTION)
            .cloned()
            .collect()
    }

    pub fn get_groups(&self) -> Vec<Group> {
        self.catalog.lock().groups().cloned().collect()
    }

    /// Installed and enabled filters. The user and whitelist filters are
    /// always on and not listed.
    pub fn get_enabled_filters(&self) -> Vec<Filter> {
        self.catalog.lock().enabled_filters().into_iter().cloned().collect()
    }

    pub fn is_filter_enabled(&self, filter_id: FilterId) -> Result<bool> {
        Ok(self.catalog.lock().filter(filter_id)?.enabled)
    }

    pub fn is_filter_installed(&self, filter_id: FilterId) -> Result<bool> {
        Ok(self.catalog.lock().filter(filter_id)?.installed)
    }

    /// Install a filter, downloading its rules unless they were loaded
    /// before. Returns whether the filter is installed afterwards.
    pub async fn add_anti_banner_filter(&self, filter_id: FilterId) -> Result<bool> {
        let filter = self.get_filter(filter_id)?;
        if filter.installed {
            return Ok(true);
        }

        if !filter.loaded {
            let version = filter.version.clone();
            let time_updated = filter.last_update_time.clone();
            if let Err(e) = self.load_filter_rules(filter_id, false, version, time_updated).await {
                log::warn!("Filter {} was not installed: {}", filter_id, e);
                return Ok(false);
            }
        }

        let filter = {
            let mut catalog = self.catalog.lock();
            let filter = catalog.filter_mut(filter_id)?;
            filter.installed = true;
            filter.clone()
        };
        self.notify(Event::FilterAddRemove(filter));
        Ok(true)
    }

    /// Install and enable filters one after another. With
    /// `check_manual_disabled`, filters the user switched off are skipped.
    /// Returns the ids that were enabled by this call.
    pub async fn add_and_enable_filters(&self, filter_ids: &[FilterId], check_manual_disabled: bool) -> Vec<FilterId> {
        let mut unique: Vec<FilterId> = Vec::with_capacity(filter_ids.len());
        for id in filter_ids {
            if !unique.contains(id) {
                unique.push(*id);
            }
        }

        let mut enabled = Vec::new();
        for filter_id in unique {
            let filter = match self.get_filter(filter_id) {
                Ok(filter) => filter,
                Err(e) => {
                    log::warn!("Skipping filter: {}", e);
                    continue;
                }
            };
            if check_manual_disabled && !filter.enabled && filter.manual_disabled {
                continue;
            }

            match self.add_anti_banner_filter(filter_id).await {
                Ok(true) => {
                    if let Ok(true) = self.enable_filter(filter_id) {
                        enabled.push(filter_id);
                    }
                }
                Ok(false) => {}
                Err(e) => log::warn!("Error adding filter {}: {}", filter_id, e),
            }
        }
        enabled
    }

    /// Enable an installed filter. Returns false when nothing changed.
    pub fn enable_filter(&self, filter_id: FilterId) -> Result<bool> {
        let filter = {
            let mut catalog = self.catalog.lock();
            let filter = catalog.filter_mut(filter_id)?;
            if filter.enabled || !filter.installed {
                return Ok(false);
            }
            filter.enabled = true;
            filter.clone()
        };
        self.notify(Event::FilterEnableDisable(filter));
        Ok(true)
    }

    /// Disable a filter. `manual` marks it as switched off by the user so
    /// later automatic enabling leaves it alone.
    pub fn disable_filter(&self, filter_id: FilterId, manual: bool) -> Result<bool> {
        let filter = {
            let mut catalog = self.catalog.lock();
            let filter = catalog.filter_mut(filter_id)?;
            if !filter.enabled || !filter.installed {
                return Ok(false);
            }
            filter.enabled = false;
            if manual {
                filter.manual_disabled = true;
            }
            filter.clone()
        };
        self.notify(Event::FilterEnableDisable(filter));
        Ok(true)
    }

    pub fn enable_filters_group(&self, group_id: GroupId) -> Result<bool> {
        self.set_group_enabled(group_id, true)
    }

    pub fn disable_filters_group(&self, group_id: GroupId) -> Result<bool> {
        self.set_group_enabled(group_id, false)
    }

    fn set_group_enabled(&self, group_id: GroupId, enabled: bool) -> Result<bool> {
        let group = {
            let mut catalog = self.catalog.lock();
            let group = catalog.group_mut(group_id)?;
            if group.enabled == Some(enabled) {
                return Ok(false);
            }
            group.enabled = Some(enabled);
            group.clone()
        };
        self.notify(Event::FilterGroupEnableDisable(group));
        Ok(true)
    }

    /// Soft-delete a filter: it stays known but disabled and uninstalled.
    /// A custom filter is forgotten entirely.
    pub fn remove_filter(&self, filter_id: FilterId) -> Result<bool> {
        let filter = {
            let mut catalog = self.catalog.lock();
            let filter = catalog.filter_mut(filter_id)?;
            if filter.removed {
                return Ok(false);
            }
            filter.enabled = false;
            filter.installed = false;
            filter.removed = true;
            let filter = filter.clone();
            if filter.is_custom() {
                catalog.remove_filter(filter_id);
            }
            filter
        };
        log::debug!("Remove filter {}", filter_id);

        if filter.is_custom() {
            self.state.remove_custom_filter(filter_id);
        }
        self.notify(Event::FilterEnableDisable(filter.clone()));
        self.notify(Event::FilterAddRemove(filter));
        Ok(true)
    }

    /// Subscribe to a custom filter list.
    pub async fn load_custom_filter(&self, url: &str) -> Result<Filter> {
        let url = url.trim();
        log::info!("Downloading custom filter from {}", url);
        if url.is_empty() {
            return Err(ServiceError::EmptyUrl);
        }
        if self.catalog.lock().find_by_subscription_url(url).is_some() {
            return Err(ServiceError::AlreadyAdded(url.to_string()));
        }

        match self.add_update_custom_filter(url).await? {
            Some(filter) => {
                log::info!("Custom filter {} downloaded", filter.filter_id);
                Ok(filter)
            }
            None => Err(ServiceError::AlreadyAdded(url.to_string())),
        }
    }

    /// Handle an `abp:subscribe` link. A list the catalog knows is enabled;
    /// any other list is downloaded into the user filter. Returns the number
    /// of rules added to the user filter.
    pub async fn process_abp_subscription_url(&self, url: &str) -> Result<usize> {
        let known = self.catalog.lock().find_by_subscription_url(url).map(|f| f.filter_id);
        if let Some(filter_id) = known {
            self.add_and_enable_filters(&[filter_id], false).await;
            return Ok(0);
        }

        let lines = self.source.load_filter_rules_by_url(url).await.map_err(|e| {
            log::error!("Error download subscription by url {}, cause: {}", url, e);
            e
        })?;
        let added = self.add_filter_rules(USER_FILTER_ID, &lines)?;
        Ok(added.len())
    }

    /// Force an update check, of every filter or of `only`.
    pub async fn check_filters_updates(&self, only: Option<&[FilterId]>) -> Result<Vec<FilterId>> {
        self.check_antibanner_filters_update(true, only).await
    }
}
