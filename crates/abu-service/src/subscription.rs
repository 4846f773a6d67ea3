//! Filter catalog: filters and groups known to the service, their state,
//! and the custom filter helpers (header parsing, checksums, ids).

use std::collections::BTreeMap;

use abu_core::types::{ANTI_CIRCUMVENTION, CUSTOM_FILTERS_START_ID, USER_FILTER_ID, WHITE_LIST_FILTER_ID};
use abu_core::FilterId;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::metadata::{is_greater_or_equal_version, FilterMetadata, FiltersMetadata, GroupMetadata};
use crate::state::{GroupState, StateInfo, VersionInfo};

pub type GroupId = u32;

/// Group holding every custom filter.
pub const CUSTOM_FILTERS_GROUP_ID: GroupId = 0;

/// Lines searched for header tags.
const HEADER_MAX_LINES: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    pub filter_id: FilterId,
    pub group_id: GroupId,
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub display_number: u32,
    pub languages: Vec<String>,
    pub subscription_url: String,
    pub version: Option<String>,
    /// Publication time reported by the filter source
    pub last_update_time: Option<String>,
    /// Unix milliseconds
    pub last_check_time: Option<i64>,
    /// Seconds
    pub expires: u64,
    /// Content checksum of an unversioned custom filter
    pub checksum: Option<String>,
    pub enabled: bool,
    pub installed: bool,
    pub loaded: bool,
    pub manual_disabled: bool,
    pub removed: bool,
}

impl Filter {
    pub fn new(filter_id: FilterId) -> Self {
        Self {
            filter_id,
            ..Self::default()
        }
    }

    pub fn from_metadata(meta: &FilterMetadata) -> Self {
        Self {
            filter_id: meta.filter_id,
            group_id: meta.group_id,
            name: meta.name.clone(),
            description: meta.description.clone(),
            homepage: meta.homepage.clone(),
            display_number: meta.display_number,
            languages: meta.languages.clone(),
            subscription_url: meta.subscription_url.clone(),
            version: meta.version.clone(),
            last_update_time: meta.time_updated.clone(),
            expires: meta.expires,
            ..Self::default()
        }
    }

    pub fn is_custom(&self) -> bool {
        self.filter_id >= CUSTOM_FILTERS_START_ID
    }

    /// The user and whitelist filters, which never come from a subscription.
    pub fn is_synthetic(&self) -> bool {
        self.filter_id == USER_FILTER_ID || self.filter_id == WHITE_LIST_FILTER_ID
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Group {
    pub group_id: GroupId,
    pub group_name: String,
    pub display_number: u32,
    /// Never toggled when `None`; such a group counts as enabled.
    pub enabled: Option<bool>,
}

impl Group {
    pub fn from_metadata(meta: &GroupMetadata) -> Self {
        Self {
            group_id: meta.group_id,
            group_name: meta.group_name.clone(),
            display_number: meta.display_number,
            enabled: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }
}

/// Filters selected by an update check.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UpdateSelection {
    pub filter_ids: Vec<FilterId>,
    pub custom_filter_ids: Vec<FilterId>,
}

impl UpdateSelection {
    pub fn is_empty(&self) -> bool {
        self.filter_ids.is_empty() && self.custom_filter_ids.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    filters: BTreeMap<FilterId, Filter>,
    groups: BTreeMap<GroupId, Group>,
}

impl Catalog {
    /// Backend metadata plus stored custom filters plus the user and
    /// whitelist filters.
    pub fn new(metadata: &FiltersMetadata, custom_filters: Vec<Filter>) -> Self {
        let mut catalog = Catalog::default();
        for group in &metadata.groups {
            catalog.groups.insert(group.group_id, Group::from_metadata(group));
        }
        for meta in &metadata.filters {
            catalog.filters.insert(meta.filter_id, Filter::from_metadata(meta));
        }
        for filter in custom_filters.into_iter().filter(|f| !f.removed) {
            catalog.filters.insert(filter.filter_id, filter);
        }
        for id in [USER_FILTER_ID, WHITE_LIST_FILTER_ID] {
            catalog.filters.entry(id).or_insert_with(|| Filter::new(id));
        }
        catalog
    }

    /// Overlay persisted version and state info.
    pub fn apply_state(
        &mut self,
        versions: &BTreeMap<FilterId, VersionInfo>,
        states: &BTreeMap<FilterId, StateInfo>,
        groups: &BTreeMap<GroupId, GroupState>,
    ) {
        for (id, filter) in self.filters.iter_mut() {
            if let Some(v) = versions.get(id) {
                filter.version = v.version.clone();
                filter.last_check_time = v.last_check_time;
                filter.last_update_time = v.last_update_time.clone();
                if let Some(expires) = v.expires {
                    filter.expires = expires;
                }
            }
            if let Some(s) = states.get(id) {
                filter.enabled = s.enabled;
                filter.installed = s.installed;
                filter.loaded = s.loaded;
                filter.manual_disabled = s.manual_disabled;
            }
        }
        for (id, group) in self.groups.iter_mut() {
            if let Some(s) = groups.get(id) {
                group.enabled = Some(s.enabled);
            }
        }
    }

    pub fn filter(&self, id: FilterId) -> Result<&Filter> {
        self.filters.get(&id).ok_or(ServiceError::FilterNotFound(id))
    }

    pub fn filter_mut(&mut self, id: FilterId) -> Result<&mut Filter> {
        self.filters.get_mut(&id).ok_or(ServiceError::FilterNotFound(id))
    }

    pub fn insert_filter(&mut self, filter: Filter) {
        self.filters.insert(filter.filter_id, filter);
    }

    pub fn remove_filter(&mut self, id: FilterId) -> Option<Filter> {
        self.filters.remove(&id)
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn group_mut(&mut self, id: GroupId) -> Result<&mut Group> {
        self.groups.get_mut(&id).ok_or(ServiceError::GroupNotFound(id))
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Filters ordered by display number, then id.
    pub fn filters(&self) -> Vec<&Filter> {
        let mut filters: Vec<&Filter> = self.filters.values().collect();
        filters.sort_by_key(|f| (f.display_number, f.filter_id));
        filters
    }

    pub fn filters_for_group(&self, group_id: GroupId) -> Vec<&Filter> {
        self.filters()
            .into_iter()
            .filter(|f| f.group_id == group_id && !f.removed && !f.is_synthetic())
            .collect()
    }

    pub fn find_by_subscription_url(&self, url: &str) -> Option<&Filter> {
        self.filters.values().find(|f| !f.subscription_url.is_empty() && f.subscription_url == url)
    }

    /// Filters tagged with a language; `lang` is cut to its first two letters.
    pub fn filter_ids_for_language(&self, lang: &str) -> Vec<FilterId> {
        let lang: String = lang.chars().take(2).collect::<String>().to_lowercase();
        if lang.is_empty() {
            return Vec::new();
        }
        self.filters()
            .into_iter()
            .filter(|f| f.languages.iter().any(|l| *l == lang))
            .map(|f| f.filter_id)
            .collect()
    }

    /// Installed and enabled filters, user and whitelist excluded.
    pub fn enabled_filters(&self) -> Vec<&Filter> {
        self.filters()
            .into_iter()
            .filter(|f| f.installed && f.enabled && !f.is_synthetic())
            .collect()
    }

    /// Ids whose stored rules go into a rebuild, ascending. The user filter
    /// is loaded separately.
    ///
    /// A filter in a disabled group is left out, except the
    /// anti-circumvention filter.
    pub fn filter_ids_to_build(&self) -> Vec<FilterId> {
        self.filters
            .values()
            .filter(|f| f.enabled && !f.is_synthetic())
            .filter(|f| {
                f.filter_id == ANTI_CIRCUMVENTION || self.group(f.group_id).map_or(true, Group::is_enabled)
            })
            .map(|f| f.filter_id)
            .collect()
    }

    /// Filters due for an update check.
    ///
    /// `only` restricts the candidates. Without `force`, a filter is due
    /// when it was never checked or its last check is `period_ms` old.
    pub fn select_for_update(
        &self,
        force: bool,
        only: Option<&[FilterId]>,
        now_ms: i64,
        period_ms: i64,
    ) -> UpdateSelection {
        let mut selection = UpdateSelection::default();
        let due = |f: &Filter| force || f.last_check_time.map_or(true, |t| t + period_ms <= now_ms);

        for filter in self.filters() {
            if filter.is_synthetic() {
                continue;
            }
            if only.map_or(false, |ids| !ids.contains(&filter.filter_id)) {
                continue;
            }
            if filter.installed && filter.enabled && due(filter) {
                if filter.is_custom() {
                    selection.custom_filter_ids.push(filter.filter_id);
                } else {
                    selection.filter_ids.push(filter.filter_id);
                }
            }
        }
        selection
    }

    /// Id for a new custom filter.
    pub fn next_custom_filter_id(&self) -> FilterId {
        let max = self.filters.keys().copied().max().unwrap_or(0);
        if max >= CUSTOM_FILTERS_START_ID {
            max + 1
        } else {
            CUSTOM_FILTERS_START_ID
        }
    }

    pub fn reset_versions(&mut self) {
        for filter in self.filters.values_mut() {
            filter.version = None;
        }
    }
}

// =============================================================================
// Custom filters
// =============================================================================

/// Tags read from a filter list's `! Tag: value` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterHeader {
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub version: String,
    /// Seconds
    pub expires: u64,
    pub time_updated: String,
}

/// `N day(s)` or `N hour(s)` in seconds. A bare integer is taken as is.
pub fn parse_expires(value: &str) -> u64 {
    let words: Vec<&str> = value.split_whitespace().collect();
    for pair in words.windows(2) {
        if let Ok(n) = pair[0].parse::<u64>() {
            if pair[1].starts_with("day") {
                return n.saturating_mul(24 * 60 * 60);
            }
            if pair[1].starts_with("hour") {
                return n.saturating_mul(60 * 60);
            }
        }
    }
    let digits: String = value.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

pub fn parse_filter_data_from_header<S: AsRef<str>>(lines: &[S]) -> FilterHeader {
    let head = &lines[..lines.len().min(HEADER_MAX_LINES)];
    let tag = |name: &str| -> String {
        let needle = format!("! {}: ", name);
        let mut value = String::new();
        for line in head {
            let line = line.as_ref();
            if let Some(pos) = line.find(&needle) {
                value = line[pos + needle.len()..].to_string();
            }
        }
        value
    };

    FilterHeader {
        name: tag("Title"),
        description: tag("Description"),
        homepage: tag("Homepage"),
        version: tag("Version"),
        expires: parse_expires(&tag("Expires")),
        time_updated: tag("TimeUpdated"),
    }
}

/// Lowercase hex MD5 of the lines joined with `\n`.
pub fn checksum<S: AsRef<str>>(lines: &[S]) -> String {
    let mut hasher = Md5::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            hasher.update(b"\n");
        }
        hasher.update(line.as_ref().as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Whether downloaded content differs from what `old` holds: by version
/// when the list has one, by checksum otherwise.
pub fn did_filter_update(new_version: Option<&str>, new_checksum: Option<&str>, old: &Filter) -> bool {
    if let Some(version) = new_version.filter(|v| !v.is_empty()) {
        return !is_greater_or_equal_version(old.version.as_deref(), version);
    }
    match old.checksum.as_deref() {
        None => true,
        Some(old_checksum) => new_checksum != Some(old_checksum),
    }
}
