//! Shared fixtures for the service tests: an in-memory filter source, a
//! rules store that can hold back one read, and an event recorder.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use abu_core::FilterId;
use abu_service::metadata::{FilterMetadata, FiltersMetadata, GroupMetadata};
use abu_service::{
    AntiBannerService, Event, EventType, FilterSource, FiltersState, MemoryRulesStorage, MemoryStateStore, Result,
    RulesStorage, ServiceConfig, ServiceError, StateStore,
};
use async_trait::async_trait;
use parking_lot::Mutex;

pub const APP_VERSION: &str = "1.0.0";

/// Group 1 holds the default filters, group 2 holds the privacy filter and
/// the anti-circumvention filter, group 7 holds a German list.
pub fn local_metadata() -> FiltersMetadata {
    let filter = |filter_id: FilterId, group_id: u32, languages: &[&str]| FilterMetadata {
        filter_id,
        group_id,
        name: format!("Filter {}", filter_id),
        display_number: filter_id,
        version: Some("1.0.0.0".to_string()),
        languages: languages.iter().map(|l| l.to_string()).collect(),
        ..FilterMetadata::default()
    };
    let group = |group_id: u32, group_name: &str| GroupMetadata {
        group_id,
        group_name: group_name.to_string(),
        display_number: group_id,
    };
    FiltersMetadata {
        groups: vec![group(1, "Ad blocking"), group(2, "Privacy"), group(7, "Language")],
        filters: vec![
            filter(1, 1, &[]),
            filter(2, 2, &[]),
            filter(4, 2, &[]),
            filter(6, 1, &[]),
            filter(7, 1, &[]),
            filter(8, 1, &[]),
            filter(13, 7, &["de"]),
        ],
    }
}

#[derive(Default)]
pub struct MockSource {
    pub remote_metadata: Mutex<Vec<FilterMetadata>>,
    pub rules: Mutex<HashMap<FilterId, Vec<String>>>,
    pub url_rules: Mutex<HashMap<String, Vec<String>>>,
    pub fail_metadata: AtomicBool,
    pub metadata_calls: AtomicUsize,
    pub rules_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_rules(&self, filter_id: FilterId, lines: &[&str]) {
        self.rules
            .lock()
            .insert(filter_id, lines.iter().map(|l| l.to_string()).collect());
    }

    pub fn set_url_rules(&self, url: &str, lines: &[&str]) {
        self.url_rules
            .lock()
            .insert(url.to_string(), lines.iter().map(|l| l.to_string()).collect());
    }

    pub fn set_remote_version(&self, filter_id: FilterId, version: &str) {
        let mut remote = self.remote_metadata.lock();
        remote.retain(|m| m.filter_id != filter_id);
        remote.push(FilterMetadata {
            filter_id,
            version: Some(version.to_string()),
            time_updated: Some("2024-05-01T00:00:00Z".to_string()),
            ..FilterMetadata::default()
        });
    }
}

#[async_trait]
impl FilterSource for MockSource {
    async fn load_local_metadata(&self) -> Result<FiltersMetadata> {
        Ok(local_metadata())
    }

    async fn load_filters_metadata(&self, filter_ids: &[FilterId]) -> Result<Vec<FilterMetadata>> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_metadata.load(Ordering::SeqCst) {
            return Err(ServiceError::Metadata("backend unavailable".to_string()));
        }
        Ok(self
            .remote_metadata
            .lock()
            .iter()
            .filter(|m| filter_ids.contains(&m.filter_id))
            .cloned()
            .collect())
    }

    async fn load_filter_rules(&self, filter_id: FilterId, _force_remote: bool) -> Result<Vec<String>> {
        self.rules_calls.fetch_add(1, Ordering::SeqCst);
        self.rules
            .lock()
            .get(&filter_id)
            .cloned()
            .ok_or_else(|| ServiceError::Download {
                url: format!("filter {}", filter_id),
                reason: "HTTP 404".to_string(),
            })
    }

    async fn load_filter_rules_by_url(&self, url: &str) -> Result<Vec<String>> {
        self.url_rules.lock().get(url).cloned().ok_or_else(|| ServiceError::Download {
            url: url.to_string(),
            reason: "HTTP 404".to_string(),
        })
    }
}

/// Rules store whose next read of one filter takes a snapshot, then waits.
#[derive(Default)]
pub struct SlowRulesStorage {
    pub inner: MemoryRulesStorage,
    slow: Mutex<Option<(FilterId, Duration)>>,
    slow_read_started: AtomicBool,
}

impl SlowRulesStorage {
    pub fn slow_down_next_read(&self, filter_id: FilterId, delay: Duration) {
        self.slow_read_started.store(false, Ordering::SeqCst);
        *self.slow.lock() = Some((filter_id, delay));
    }

    pub fn slow_read_started(&self) -> bool {
        self.slow_read_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RulesStorage for SlowRulesStorage {
    async fn read(&self, filter_id: FilterId) -> Result<Vec<String>> {
        let lines = self.inner.read(filter_id).await?;
        let delay = {
            let mut slow = self.slow.lock();
            match *slow {
                Some((id, delay)) if id == filter_id => {
                    *slow = None;
                    Some(delay)
                }
                _ => None,
            }
        };
        if let Some(delay) = delay {
            self.slow_read_started.store(true, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
        }
        Ok(lines)
    }

    async fn write(&self, filter_id: FilterId, lines: &[String]) -> Result<()> {
        self.inner.write(filter_id, lines).await
    }
}

pub fn config() -> ServiceConfig {
    ServiceConfig {
        app_version: APP_VERSION.to_string(),
        locale: "en".to_string(),
        // Keep the scheduled check out of the way of the tests.
        update_delay: Duration::from_secs(7 * 24 * 60 * 60),
        ..ServiceConfig::default()
    }
}

/// Stored state of an installation that already ran, with `enabled`
/// installed, loaded and enabled.
pub fn existing_install(enabled: &[FilterId]) -> Arc<MemoryStateStore> {
    let store = Arc::new(MemoryStateStore::new());
    let state = FiltersState::new(Arc::clone(&store) as Arc<dyn StateStore>);
    state.run_info(APP_VERSION);
    for &filter_id in enabled {
        let mut filter = abu_service::Filter::new(filter_id);
        filter.installed = true;
        filter.loaded = true;
        filter.enabled = true;
        filter.version = Some("1.0.0.0".to_string());
        state.update_filter_state(&filter);
        state.update_filter_version(&filter);
    }
    store
}

pub fn service(
    source: Arc<MockSource>,
    storage: Arc<dyn RulesStorage>,
    store: Arc<MemoryStateStore>,
) -> Arc<AntiBannerService> {
    AntiBannerService::new(config(), storage, store, source)
}

#[derive(Clone, Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn attach(service: &AntiBannerService) -> Self {
        let recorder = Recorder::default();
        let events = Arc::clone(&recorder.events);
        service.add_listener(move |e| events.lock().push(e.clone()));
        recorder
    }

    pub fn count(&self, kind: EventType) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Let the change batcher flush.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1500)).await;
}
