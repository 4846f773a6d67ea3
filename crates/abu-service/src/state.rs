//! Persisted filter state, kept as JSON documents in a [`StateStore`].

use std::collections::BTreeMap;
use std::sync::Arc;

use abu_core::FilterId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::events::Event;
use crate::metadata::is_greater_version;
use crate::storage::StateStore;
use crate::subscription::{Filter, Group, GroupId};

const FILTERS_STATE_PROP: &str = "filters-state";
const FILTERS_VERSION_PROP: &str = "filters-version";
const GROUPS_STATE_PROP: &str = "groups-state";
const CUSTOM_FILTERS_PROP: &str = "custom_filters";
const WHITE_LIST_DOMAINS_PROP: &str = "white-list-domains";
const APP_VERSION_PROP: &str = "app-version";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionInfo {
    pub version: Option<String>,
    pub last_check_time: Option<i64>,
    pub last_update_time: Option<String>,
    pub expires: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateInfo {
    pub loaded: bool,
    pub enabled: bool,
    pub installed: bool,
    pub manual_disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupState {
    pub enabled: bool,
}

/// How this run relates to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    pub is_first_run: bool,
    pub is_update: bool,
    pub current_version: String,
    pub prev_version: Option<String>,
}

#[derive(Clone)]
pub struct FiltersState {
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for FiltersState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiltersState").finish_non_exhaustive()
    }
}

impl FiltersState {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn get<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let json = match self.store.get_item(key) {
            Some(json) => json,
            None => return T::default(),
        };
        serde_json::from_str(&json).unwrap_or_else(|e| {
            log::error!("Error retrieve {}, cause {}", key, e);
            T::default()
        })
    }

    fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(Into::into)
            .and_then(|json| self.store.set_item(key, &json));
        if let Err(e) = result {
            log::error!("Error saving {}, cause {}", key, e);
        }
    }

    pub fn filters_version(&self) -> BTreeMap<FilterId, VersionInfo> {
        self.get(FILTERS_VERSION_PROP)
    }

    pub fn filters_state(&self) -> BTreeMap<FilterId, StateInfo> {
        self.get(FILTERS_STATE_PROP)
    }

    pub fn groups_state(&self) -> BTreeMap<GroupId, GroupState> {
        self.get(GROUPS_STATE_PROP)
    }

    pub fn update_filter_version(&self, filter: &Filter) {
        let mut versions = self.filters_version();
        versions.insert(
            filter.filter_id,
            VersionInfo {
                version: filter.version.clone(),
                last_check_time: filter.last_check_time,
                last_update_time: filter.last_update_time.clone(),
                expires: Some(filter.expires).filter(|e| *e > 0),
            },
        );
        self.set(FILTERS_VERSION_PROP, &versions);
    }

    pub fn update_filter_state(&self, filter: &Filter) {
        let mut states = self.filters_state();
        states.insert(
            filter.filter_id,
            StateInfo {
                loaded: filter.loaded,
                enabled: filter.enabled,
                installed: filter.installed,
                manual_disabled: filter.manual_disabled,
            },
        );
        self.set(FILTERS_STATE_PROP, &states);
    }

    pub fn update_group_state(&self, group: &Group) {
        let mut groups = self.groups_state();
        groups.insert(
            group.group_id,
            GroupState {
                enabled: group.is_enabled(),
            },
        );
        self.set(GROUPS_STATE_PROP, &groups);
    }

    /// Forget every stored filter version so the next check downloads all.
    pub fn reset_filters_version(&self) {
        let mut versions = self.filters_version();
        for info in versions.values_mut() {
            info.version = None;
        }
        self.set(FILTERS_VERSION_PROP, &versions);
    }

    pub fn custom_filters(&self) -> Vec<Filter> {
        self.get(CUSTOM_FILTERS_PROP)
    }

    /// Insert or replace a custom filter definition.
    pub fn save_custom_filter(&self, filter: &Filter) {
        let mut filters = self.custom_filters();
        match filters.iter_mut().find(|f| f.filter_id == filter.filter_id) {
            Some(existing) => *existing = filter.clone(),
            None => filters.push(filter.clone()),
        }
        self.set(CUSTOM_FILTERS_PROP, &filters);
    }

    pub fn remove_custom_filter(&self, filter_id: FilterId) {
        let mut filters = self.custom_filters();
        filters.retain(|f| f.filter_id != filter_id);
        self.set(CUSTOM_FILTERS_PROP, &filters);
    }

    pub fn whitelist_domains(&self) -> Vec<String> {
        self.get(WHITE_LIST_DOMAINS_PROP)
    }

    pub fn save_whitelist_domains(&self, domains: &[String]) {
        self.set(WHITE_LIST_DOMAINS_PROP, domains);
    }

    pub fn clear_whitelist_domains(&self) {
        if let Err(e) = self.store.remove_item(WHITE_LIST_DOMAINS_PROP) {
            log::error!("Error removing whitelist domains, cause {}", e);
        }
    }

    /// Compare the stored application version with `current` and store
    /// `current`.
    pub fn run_info(&self, current: &str) -> RunInfo {
        let prev = self.store.get_item(APP_VERSION_PROP).filter(|v| !v.is_empty());
        if let Err(e) = self.store.set_item(APP_VERSION_PROP, current) {
            log::error!("Error saving application version, cause {}", e);
        }
        RunInfo {
            is_first_run: prev.is_none(),
            is_update: prev.as_deref().map_or(false, |p| is_greater_version(current, Some(p))),
            current_version: current.to_string(),
            prev_version: prev,
        }
    }

    /// Keep stored state in step with filter and group events.
    pub fn on_event(&self, event: &Event) {
        match event {
            Event::SuccessDownloadFilter(filter) => {
                self.update_filter_state(filter);
                self.update_filter_version(filter);
            }
            Event::FilterAddRemove(filter) | Event::FilterEnableDisable(filter) => {
                self.update_filter_state(filter);
            }
            Event::FilterGroupEnableDisable(group) => self.update_group_state(group),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStateStore;

    fn state() -> FiltersState {
        FiltersState::new(Arc::new(MemoryStateStore::new()))
    }

    #[test]
    fn test_run_info() {
        let state = state();
        let first = state.run_info("1.0.0");
        assert!(first.is_first_run);
        assert!(!first.is_update);

        let same = state.run_info("1.0.0");
        assert!(!same.is_first_run && !same.is_update);

        let update = state.run_info("1.1.0");
        assert!(update.is_update);
        assert_eq!(update.prev_version.as_deref(), Some("1.0.0"));

        let downgrade = state.run_info("1.0.5");
        assert!(!downgrade.is_update && !downgrade.is_first_run);
    }

    #[test]
    fn test_events_update_state() {
        let state = state();
        let mut filter = Filter::new(3);
        filter.enabled = true;
        filter.installed = true;
        filter.version = Some("2.0".to_string());
        filter.last_check_time = Some(42);

        state.on_event(&Event::FilterEnableDisable(filter.clone()));
        assert!(state.filters_state()[&3].enabled);
        assert!(state.filters_version().is_empty());

        state.on_event(&Event::SuccessDownloadFilter(filter));
        assert_eq!(state.filters_version()[&3].version.as_deref(), Some("2.0"));
        assert_eq!(state.filters_version()[&3].last_check_time, Some(42));

        let group = Group {
            group_id: 5,
            enabled: Some(false),
            ..Group::default()
        };
        state.on_event(&Event::FilterGroupEnableDisable(group));
        assert!(!state.groups_state()[&5].enabled);

        state.reset_filters_version();
        assert_eq!(state.filters_version()[&3].version, None);
    }

    #[test]
    fn test_custom_filters_and_whitelist() {
        let state = state();
        let mut filter = Filter::new(1000);
        filter.subscription_url = "https://example.org/list.txt".to_string();
        state.save_custom_filter(&filter);
        filter.name = "Renamed".to_string();
        state.save_custom_filter(&filter);
        assert_eq!(state.custom_filters(), vec![filter]);

        state.remove_custom_filter(1000);
        assert!(state.custom_filters().is_empty());

        state.save_whitelist_domains(&["example.com".to_string()]);
        assert_eq!(state.whitelist_domains(), vec!["example.com".to_string()]);
        state.clear_whitelist_domains();
        assert!(state.whitelist_domains().is_empty());
    }

    #[test]
    fn test_corrupt_json_reads_as_empty() {
        let store = Arc::new(MemoryStateStore::new());
        store.set_item(FILTERS_STATE_PROP, "{not json").unwrap();
        let state = FiltersState::new(store);
        assert!(state.filters_state().is_empty());
    }
}
