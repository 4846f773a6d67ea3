//! Filters metadata as served by the backend, and version comparison.

use std::cmp::Ordering;

use abu_core::FilterId;
use serde::{Deserialize, Serialize};

use crate::subscription::GroupId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupMetadata {
    pub group_id: GroupId,
    pub group_name: String,
    pub display_number: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterMetadata {
    pub filter_id: FilterId,
    pub group_id: GroupId,
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub version: Option<String>,
    pub time_updated: Option<String>,
    pub display_number: u32,
    pub languages: Vec<String>,
    /// Seconds
    pub expires: u64,
    pub subscription_url: String,
    pub enabled: bool,
}

/// `filters.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersMetadata {
    pub groups: Vec<GroupMetadata>,
    pub filters: Vec<FilterMetadata>,
}

/// Dotted version with four numeric components.
///
/// Missing and non-numeric components count as zero, so `"2"`, `"2.0"`
/// and `"2.0.beta"` are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version([u64; 4]);

impl Version {
    pub fn parse(s: &str) -> Self {
        let mut parts = [0u64; 4];
        for (slot, part) in parts.iter_mut().zip(s.split('.')) {
            *slot = part.trim().parse().unwrap_or(0);
        }
        Version(parts)
    }
}

pub fn compare_versions(left: &str, right: &str) -> Ordering {
    Version::parse(left).cmp(&Version::parse(right))
}

/// `left > right`. An absent `right` is older than anything.
pub fn is_greater_version(left: &str, right: Option<&str>) -> bool {
    compare_versions(left, right.unwrap_or("")) == Ordering::Greater
}

/// `left >= right`. An absent `left` is older than anything.
pub fn is_greater_or_equal_version(left: Option<&str>, right: &str) -> bool {
    compare_versions(left.unwrap_or(""), right) != Ordering::Less
}
