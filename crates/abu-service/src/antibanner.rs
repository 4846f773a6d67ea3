//! Filter lifecycle: start and stop, request filter rebuilds, and the
//! batched processing of filter change events.
//!
//! The live [`RequestFilter`] sits behind a read/write lock. A rebuild
//! compiles a fresh filter off-lock and swaps it in; incremental edits take
//! the write lock and change the live filter in place. Every rebuild takes a
//! number from a generation counter, and only the newest generation may be
//! installed, so a slow rebuild finishing late cannot replace a newer one.
//!
//! A rebuild reads rule text from storage, which trails the live filter
//! until the next batch is saved. Edits applied live but not yet saved when
//! the rebuild started are missing from what it installs; such a rebuild is
//! followed by another once the batch holding those edits is written.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use abu_compiler::{compile_filter_list, create_rule, dedup_rules};
use abu_core::blocking::{self, CosmeticResult};
use abu_core::rule::{FilterRule, UrlFilterRule};
use abu_core::types::{ANTI_CIRCUMVENTION, USER_FILTER_ID};
use abu_core::{FilterId, RequestFilter, RequestType};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use crate::config::ServiceConfig;
use crate::debounce::{BatchPhase, BatchSink, ChangeBatcher};
use crate::error::Result;
use crate::events::{Event, EventBus, EventType, ListenerId};
use crate::source::{FilterSource, HttpFilterSource};
use crate::state::{FiltersState, RunInfo};
use crate::storage::{FileRulesStorage, FileStateStore, RulesStorage, StateStore};
use crate::subscription::Catalog;
use crate::whitelist::WhitelistService;

const STATE_FILE: &str = "state.json";
const RULES_DIR: &str = "rules";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotInitialized,
    Initializing,
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFilterInfo {
    pub rules_count: usize,
}

pub struct AntiBannerService {
    pub(crate) config: ServiceConfig,
    pub(crate) storage: Arc<dyn RulesStorage>,
    pub(crate) source: Arc<dyn FilterSource>,
    pub(crate) state: FiltersState,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) catalog: Mutex<Catalog>,
    pub(crate) self_ref: Weak<AntiBannerService>,
    request_filter: RwLock<RequestFilter>,
    generation: AtomicU64,
    edits_made: AtomicU64,
    edits_saved: AtomicU64,
    rebuild_owed: AtomicBool,
    run_state: Mutex<RunState>,
    init_time: Mutex<Option<Instant>>,
    batcher: Mutex<Option<ChangeBatcher<Event>>>,
    pub(crate) update_task: Mutex<Option<JoinHandle<()>>>,
    run_info: Mutex<Option<RunInfo>>,
    whitelist: WhitelistService,
}

impl std::fmt::Debug for AntiBannerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AntiBannerService")
            .field("run_state", &*self.run_state.lock())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("rules_count", &self.rules_count())
            .finish_non_exhaustive()
    }
}

impl AntiBannerService {
    pub fn new(
        config: ServiceConfig,
        storage: Arc<dyn RulesStorage>,
        state_store: Arc<dyn StateStore>,
        source: Arc<dyn FilterSource>,
    ) -> Arc<Self> {
        let state = FiltersState::new(state_store);
        let bus = Arc::new(EventBus::new());
        Arc::new_cyclic(|self_ref| Self {
            config,
            storage,
            source,
            whitelist: WhitelistService::new(state.clone(), Arc::clone(&bus)),
            state,
            bus,
            catalog: Mutex::new(Catalog::default()),
            self_ref: self_ref.clone(),
            request_filter: RwLock::new(RequestFilter::new()),
            generation: AtomicU64::new(0),
            edits_made: AtomicU64::new(0),
            edits_saved: AtomicU64::new(0),
            rebuild_owed: AtomicBool::new(false),
            run_state: Mutex::new(RunState::NotInitialized),
            init_time: Mutex::new(None),
            batcher: Mutex::new(None),
            update_task: Mutex::new(None),
            run_info: Mutex::new(None),
        })
    }

    /// Service keeping rules and state under `config.storage_dir` and
    /// fetching filters over HTTP.
    pub fn with_config(config: ServiceConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let dir: &Path = &config.storage_dir;
        let storage = Arc::new(FileRulesStorage::new(dir.join(RULES_DIR)));
        let state_store = Arc::new(FileStateStore::open(dir.join(STATE_FILE))?);
        let source = Arc::new(HttpFilterSource::new(&config)?);
        Ok(Self::new(config, storage, state_store, source))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn state(&self) -> &FiltersState {
        &self.state
    }

    pub fn whitelist(&self) -> &WhitelistService {
        &self.whitelist
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.add_listener(listener)
    }

    pub fn run_state(&self) -> RunState {
        *self.run_state.lock()
    }

    pub fn run_info(&self) -> Option<RunInfo> {
        self.run_info.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }

    /// True once `start` has been called.
    pub fn is_initialized(&self) -> bool {
        self.run_state() != RunState::NotInitialized
    }

    /// True once a request filter has been built.
    pub fn is_ready(&self) -> bool {
        self.init_time.lock().is_some()
    }

    /// Number of rebuilds started so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start filtering. The first call loads metadata and state and builds
    /// the request filter; a later call after [`stop`](Self::stop) only
    /// rebuilds.
    pub async fn start(&self) -> Result<()> {
        let previous = {
            let mut run_state = self.run_state.lock();
            let previous = *run_state;
            match previous {
                RunState::Running | RunState::Initializing => return Ok(()),
                RunState::NotInitialized => *run_state = RunState::Initializing,
                RunState::Stopped => *run_state = RunState::Running,
            }
            previous
        };

        if previous == RunState::Stopped {
            log::info!("Restarting request filter");
            self.create_request_filter().await;
            return Ok(());
        }

        if let Err(e) = self.initialize().await {
            log::error!("Error initializing filters, cause {}", e);
            *self.run_state.lock() = RunState::NotInitialized;
            return Err(e);
        }
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        let run_info = self.state.run_info(&self.config.app_version);
        log::info!(
            "Initializing filters: first run {}, update {}, version {}",
            run_info.is_first_run,
            run_info.is_update,
            run_info.current_version
        );

        let metadata = self.source.load_local_metadata().await?;
        let mut catalog = Catalog::new(&metadata, self.state.custom_filters());
        catalog.apply_state(
            &self.state.filters_version(),
            &self.state.filters_state(),
            &self.state.groups_state(),
        );
        *self.catalog.lock() = catalog;
        *self.run_info.lock() = Some(run_info.clone());

        self.whitelist.load();
        self.spawn_batcher();
        *self.run_state.lock() = RunState::Running;

        if run_info.is_first_run {
            let offered = self.offer_filters();
            log::info!("Installing offered filters {:?}", offered);
            let enabled = self.add_and_enable_filters(&offered, false).await;
            // Enabled filters reach the request filter through the batched
            // rebuild. Nothing was enabled, so build the empty one here.
            if enabled.is_empty() {
                self.create_request_filter().await;
            }
        } else {
            self.create_request_filter().await;
        }

        self.schedule_filters_update(run_info.is_first_run);
        Ok(())
    }

    fn spawn_batcher(&self) {
        let sink = ChangeSink {
            service: self.self_ref.clone(),
        };
        let batcher = ChangeBatcher::spawn(self.config.filters_change_debounce, sink);
        *self.batcher.lock() = Some(batcher);
    }

    /// Stop filtering. The live filter is replaced by an empty one; stored
    /// rules and state are kept.
    pub fn stop(&self) {
        *self.run_state.lock() = RunState::Stopped;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.request_filter.write() = RequestFilter::new();
        log::info!("Request filter stopped");
        self.bus.notify(&Event::RequestFilterUpdated { rules_count: 0 });
    }

    /// Wait until change events queued so far have been written and applied.
    pub async fn wait_for_pending_changes(&self) {
        tokio::time::sleep(self.config.filters_change_debounce).await;
        loop {
            let phase = self.batcher.lock().as_ref().map(ChangeBatcher::phase);
            if !matches!(phase, Some(BatchPhase::Buffering | BatchPhase::Flushing)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Deliver an event: persisted state first, then the change batcher for
    /// filter changes, then listeners.
    pub(crate) fn notify(&self, event: Event) {
        self.state.on_event(&event);
        if event.kind().is_filter_change() {
            if let Some(batcher) = self.batcher.lock().as_ref() {
                batcher.push(event.clone());
            }
        }
        self.bus.notify(&event);
    }

    /// Apply one debounced batch: write back changed rule text, then rebuild
    /// or just announce the already-edited filter.
    async fn process_events_batch(&self, events: Vec<Event>) {
        let mut by_filter: BTreeMap<FilterId, Vec<&Event>> = BTreeMap::new();
        for event in &events {
            if let Some(filter_id) = event.filter_id() {
                by_filter.entry(filter_id).or_default().push(event);
            }
        }

        for (filter_id, filter_events) in by_filter {
            if filter_events.iter().any(|e| e.kind().requires_persist()) {
                self.save_filter_rules(filter_id, &filter_events).await;
            }
        }

        let edits = events
            .iter()
            .filter(|e| matches!(e.kind(), EventType::AddRules | EventType::RemoveRule))
            .count();
        self.edits_saved.fetch_add(edits as u64, Ordering::SeqCst);

        let owed = self.rebuild_owed.swap(false, Ordering::SeqCst);
        if owed || events.iter().any(|e| e.kind().requires_rebuild()) {
            self.create_request_filter().await;
        } else {
            self.bus.notify(&Event::RequestFilterUpdated {
                rules_count: self.rules_count(),
            });
        }
    }

    async fn save_filter_rules(&self, filter_id: FilterId, events: &[&Event]) {
        let mut lines = self.storage.read(filter_id).await.unwrap_or_else(|e| {
            log::error!("Error reading rules of filter {}, cause {}", filter_id, e);
            Vec::new()
        });

        for event in events {
            match event {
                Event::AddRules { rules, .. } => {
                    log::debug!("Add {} rules to filter {}", rules.len(), filter_id);
                    lines.extend(rules.iter().cloned());
                }
                Event::RemoveRule { rule, .. } => {
                    log::debug!("Remove {} rule from filter {}", rule, filter_id);
                    lines.retain(|l| l != rule);
                }
                Event::UpdateFilterRules { rules, .. } => {
                    log::debug!("Update filter {} rules count to {}", filter_id, rules.len());
                    lines = rules.clone();
                }
                _ => {}
            }
        }

        log::debug!("Save {} rules to filter {}", lines.len(), filter_id);
        if let Err(e) = self.storage.write(filter_id, &lines).await {
            log::error!("Error saving rules of filter {}, cause {}", filter_id, e);
        }
    }

    // =========================================================================
    // Rebuild
    // =========================================================================

    /// Rebuild the request filter from stored rule text.
    ///
    /// Returns false when the service is not running or a newer rebuild
    /// started before this one finished.
    pub async fn create_request_filter(&self) -> bool {
        loop {
            let made = match self.rebuild_request_filter().await {
                Install::Discarded => return false,
                Install::Complete => return true,
                Install::MissingEdits { made } => made,
            };

            // Whoever clears the flag rebuilds: this call if the edits are
            // already stored, otherwise the batch that stores them.
            self.rebuild_owed.store(true, Ordering::SeqCst);
            if self.edits_saved.load(Ordering::SeqCst) < made || !self.rebuild_owed.swap(false, Ordering::SeqCst) {
                return true;
            }
            log::info!("Rules were edited during the rebuild, rebuilding again");
        }
    }

    async fn rebuild_request_filter(&self) -> Install {
        if !self.is_running() {
            return Install::Discarded;
        }
        let edits_stored = self.edits_saved.load(Ordering::SeqCst);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let start = std::time::Instant::now();
        log::info!("Starting loading filter rules from the storage");

        let filter_ids = self.catalog.lock().filter_ids_to_build();
        let mut reads = JoinSet::new();
        for filter_id in filter_ids.into_iter().chain(std::iter::once(USER_FILTER_ID)) {
            let storage = Arc::clone(&self.storage);
            reads.spawn(async move { (filter_id, storage.read(filter_id).await) });
        }

        let mut rules_by_filter: BTreeMap<FilterId, Vec<String>> = BTreeMap::new();
        while let Some(joined) = reads.join_next().await {
            match joined {
                Ok((filter_id, Ok(lines))) => {
                    rules_by_filter.insert(filter_id, lines);
                }
                Ok((filter_id, Err(e))) => {
                    log::warn!("Error reading rules of filter {}, cause {}", filter_id, e);
                }
                Err(e) => log::error!("Rules read task failed: {}", e),
            }
        }
        log::info!(
            "Finished loading filter rules from the storage in {} ms",
            start.elapsed().as_millis()
        );

        let chunked = self.config.async_compile && self.is_ready();
        let filter = self.compile_request_filter(rules_by_filter, chunked).await;
        let rules_count = filter.rules_count();

        let Some(made) = self.install_request_filter(generation, filter) else {
            log::info!("Discarding request filter of generation {}", generation);
            return Install::Discarded;
        };

        self.bus.notify(&Event::RequestFilterUpdated { rules_count });
        log::info!(
            "Finished request filter initialization in {} ms. Rules count: {}",
            start.elapsed().as_millis(),
            rules_count
        );
        if made > edits_stored {
            Install::MissingEdits { made }
        } else {
            Install::Complete
        }
    }

    /// Compile filters in id order with the user filter last. A rule text
    /// seen in an earlier filter is skipped.
    async fn compile_request_filter(
        &self,
        mut rules_by_filter: BTreeMap<FilterId, Vec<String>>,
        chunked: bool,
    ) -> RequestFilter {
        log::info!("Starting request filter initialization. Async={}", chunked);
        let user_rules = rules_by_filter.remove(&USER_FILTER_ID).unwrap_or_default();
        let chunk_size = if chunked {
            self.config.compile_chunk_size.max(1)
        } else {
            usize::MAX
        };

        let mut filter = RequestFilter::new();
        let mut seen = HashSet::new();
        let ordered = rules_by_filter
            .into_iter()
            .chain(std::iter::once((USER_FILTER_ID, user_rules)));

        for (filter_id, lines) in ordered {
            let count_toward_total = filter_id != ANTI_CIRCUMVENTION;
            for chunk in lines.chunks(chunk_size) {
                let mut compiled = compile_filter_list(chunk, filter_id);
                if compiled.dropped > 0 {
                    log::debug!("Dropped {} lines of filter {}", compiled.dropped, filter_id);
                }
                dedup_rules(&mut compiled.rules, &mut seen);
                for rule in compiled.rules {
                    filter.add_rule(rule, count_toward_total);
                }
                if chunked {
                    tokio::task::yield_now().await;
                }
            }
        }
        filter
    }

    /// Swap in `filter` if `generation` is still the newest. Returns the
    /// edit count the replaced filter carried.
    fn install_request_filter(&self, generation: u64, filter: RequestFilter) -> Option<u64> {
        let made = {
            let mut live = self.request_filter.write();
            if self.generation.load(Ordering::SeqCst) != generation || !self.is_running() {
                return None;
            }
            *live = filter;
            self.edits_made.load(Ordering::SeqCst)
        };

        let first = {
            let mut init_time = self.init_time.lock();
            let first = init_time.is_none();
            if first {
                *init_time = Some(Instant::now());
            }
            first
        };
        if first {
            self.bus.notify(&Event::ApplicationInitialized);
        }
        Some(made)
    }

    // =========================================================================
    // Incremental edits
    // =========================================================================

    /// Add rule lines to a filter. The live filter changes immediately;
    /// storage follows with the next batch. Returns the texts that made a
    /// rule.
    pub fn add_filter_rules<S: AsRef<str>>(&self, filter_id: FilterId, texts: &[S]) -> Result<Vec<String>> {
        self.catalog.lock().filter(filter_id)?;

        let rules: Vec<_> = texts
            .iter()
            .filter_map(|t| create_rule(t.as_ref().trim(), filter_id))
            .collect();
        let added: Vec<String> = rules.iter().map(|r| r.rule_text().to_string()).collect();
        {
            let mut live = self.request_filter.write();
            self.count_edit();
            let count_toward_total = filter_id != ANTI_CIRCUMVENTION;
            for rule in rules {
                live.add_rule(rule, count_toward_total);
            }
        }

        self.notify(Event::AddRules {
            filter_id,
            rules: added.clone(),
        });
        self.notify_user_rules_changed(filter_id);
        Ok(added)
    }

    /// Remove one rule line from a filter.
    pub fn remove_filter_rule(&self, filter_id: FilterId, text: &str) -> Result<bool> {
        self.catalog.lock().filter(filter_id)?;

        let text = text.trim();
        let mut removed = false;
        if let Some(rule) = create_rule(text, filter_id) {
            removed = {
                let mut live = self.request_filter.write();
                self.count_edit();
                live.remove_rule(rule.rule_text())
            };
            self.notify(Event::RemoveRule {
                filter_id,
                rule: rule.rule_text().to_string(),
            });
        }
        self.notify_user_rules_changed(filter_id);
        Ok(removed)
    }

    /// Drop every rule of a filter, in storage and, after the rebuild, in
    /// the live filter.
    pub fn clear_filter_rules(&self, filter_id: FilterId) -> Result<()> {
        self.catalog.lock().filter(filter_id)?;
        self.notify(Event::UpdateFilterRules {
            filter_id,
            rules: Vec::new(),
        });
        self.notify_user_rules_changed(filter_id);
        Ok(())
    }

    /// Called with the live filter locked, ahead of the edit's event.
    fn count_edit(&self) {
        if self.batcher.lock().is_some() {
            self.edits_made.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn notify_user_rules_changed(&self, filter_id: FilterId) {
        if filter_id == USER_FILTER_ID {
            self.bus.notify(&Event::UpdateUserFilterRules {
                rules_count: self.rules_count(),
            });
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Read access to the live filter. Hold the guard for one query only.
    pub fn request_filter(&self) -> RwLockReadGuard<'_, RequestFilter> {
        self.request_filter.read()
    }

    pub fn rules_count(&self) -> usize {
        self.request_filter.read().rules_count()
    }

    pub fn get_request_filter_info(&self) -> RequestFilterInfo {
        RequestFilterInfo {
            rules_count: self.rules_count(),
        }
    }

    pub fn get_rules(&self) -> Vec<String> {
        self.request_filter.read().get_rules()
    }

    /// True for a short while after the first request filter was built, so
    /// pages loaded during startup can collapse blocked elements.
    pub fn should_collapse_all_elements(&self) -> bool {
        self.init_time
            .lock()
            .map_or(false, |t| t.elapsed() <= self.config.collapse_window)
    }

    pub fn request_filter_init_time(&self) -> Option<Duration> {
        self.init_time.lock().map(|t| t.elapsed())
    }

    /// Page-level exception of a frame, whitelist first.
    pub fn get_frame_whitelist_rule(&self, frame_url: &str) -> Option<Arc<UrlFilterRule>> {
        let filter = self.request_filter.read();
        let whitelist = self.whitelist.engine();
        blocking::get_frame_whitelist_rule(&filter, &whitelist, frame_url)
    }

    pub fn get_rule_for_request(
        &self,
        request_url: &str,
        frame_url: &str,
        request_type: RequestType,
    ) -> Option<Arc<UrlFilterRule>> {
        let filter = self.request_filter.read();
        let whitelist = self.whitelist.engine();
        blocking::get_rule_for_request(&filter, &whitelist, request_url, frame_url, request_type, None)
    }

    pub fn get_selectors_and_scripts(&self, document_url: &str, retrieve_extended_css: bool) -> CosmeticResult {
        let frame_rule = self.get_frame_whitelist_rule(document_url);
        let filter = self.request_filter.read();
        blocking::get_selectors_and_scripts(
            &filter,
            document_url,
            frame_rule.as_ref(),
            retrieve_extended_css,
            self.should_collapse_all_elements(),
        )
    }

    pub fn get_csp_rules(&self, request_url: &str, referrer: &str, request_type: RequestType) -> Vec<Arc<UrlFilterRule>> {
        let frame_rule = self.get_frame_whitelist_rule(referrer);
        let filter = self.request_filter.read();
        blocking::get_csp_rules(&filter, frame_rule.as_ref(), request_url, referrer, request_type)
    }
}

impl Drop for AntiBannerService {
    fn drop(&mut self) {
        if let Some(task) = self.update_task.lock().take() {
            task.abort();
        }
    }
}

enum Install {
    Discarded,
    Complete,
    MissingEdits { made: u64 },
}

struct ChangeSink {
    service: Weak<AntiBannerService>,
}

#[async_trait]
impl BatchSink<Event> for ChangeSink {
    async fn flush(&self, batch: Vec<Event>) {
        if let Some(service) = self.service.upgrade() {
            service.process_events_batch(batch).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FilterMetadata, FiltersMetadata, GroupMetadata};
    use crate::storage::{MemoryRulesStorage, MemoryStateStore};
    use crate::subscription::Filter;

    struct StaticSource;

    #[async_trait]
    impl FilterSource for StaticSource {
        async fn load_local_metadata(&self) -> Result<FiltersMetadata> {
            Ok(FiltersMetadata {
                groups: vec![GroupMetadata {
                    group_id: 1,
                    group_name: "Ad blocking".to_string(),
                    display_number: 1,
                }],
                filters: [1, ANTI_CIRCUMVENTION]
                    .into_iter()
                    .map(|filter_id| FilterMetadata {
                        filter_id,
                        group_id: 1,
                        ..FilterMetadata::default()
                    })
                    .collect(),
            })
        }

        async fn load_filters_metadata(&self, _: &[FilterId]) -> Result<Vec<FilterMetadata>> {
            Ok(Vec::new())
        }

        async fn load_filter_rules(&self, _: FilterId, _: bool) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn load_filter_rules_by_url(&self, _: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn enabled_state(store: &Arc<MemoryStateStore>) {
        let state = FiltersState::new(Arc::clone(store) as Arc<dyn StateStore>);
        state.run_info("0.0.1");
        for filter_id in [1, ANTI_CIRCUMVENTION] {
            let mut filter = Filter::new(filter_id);
            filter.enabled = true;
            filter.installed = true;
            filter.loaded = true;
            state.update_filter_state(&filter);
        }
    }

    fn service(storage: Arc<MemoryRulesStorage>) -> Arc<AntiBannerService> {
        let store = Arc::new(MemoryStateStore::new());
        enabled_state(&store);
        let config = ServiceConfig {
            app_version: "0.0.1".to_string(),
            ..ServiceConfig::default()
        };
        AntiBannerService::new(config, storage, store, Arc::new(StaticSource))
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_builds_from_storage() {
        let storage = Arc::new(MemoryRulesStorage::new());
        storage.insert(1, ["||ads.net^", "example.com##.ad"]);
        storage.insert(USER_FILTER_ID, ["||user.net^"]);
        let service = service(storage);

        assert!(!service.is_initialized());
        service.start().await.unwrap();
        assert_eq!(service.run_state(), RunState::Running);
        assert!(service.is_ready());
        assert!(service.should_collapse_all_elements());
        assert_eq!(service.rules_count(), 3);
        assert_eq!(service.generation(), 1);

        let rule = service
            .get_rule_for_request("http://ads.net/x.js", "http://site.com/", RequestType::SCRIPT)
            .unwrap();
        assert_eq!(rule.filter_id(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!service.should_collapse_all_elements());

        // Second start is a no-op.
        service.start().await.unwrap();
        assert_eq!(service.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_and_restart() {
        let storage = Arc::new(MemoryRulesStorage::new());
        storage.insert(1, ["||ads.net^"]);
        let service = service(storage);
        service.start().await.unwrap();

        let counts = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&counts);
        service.add_listener(move |e| {
            if let Event::RequestFilterUpdated { rules_count } = e {
                c.lock().push(*rules_count);
            }
        });

        service.stop();
        assert_eq!(service.run_state(), RunState::Stopped);
        assert_eq!(service.rules_count(), 0);
        assert!(!service.create_request_filter().await);

        service.start().await.unwrap();
        assert_eq!(service.rules_count(), 1);
        assert_eq!(*counts.lock(), vec![0, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incremental_edits_reach_storage_after_debounce() {
        let storage = Arc::new(MemoryRulesStorage::new());
        let service = service(Arc::clone(&storage));
        service.start().await.unwrap();

        let added = service
            .add_filter_rules(USER_FILTER_ID, &["||one.com^", "! comment", "||two.com^"])
            .unwrap();
        assert_eq!(added, vec!["||one.com^", "||two.com^"]);
        assert_eq!(service.rules_count(), 2);
        assert!(service.remove_filter_rule(USER_FILTER_ID, "||one.com^").unwrap());
        assert_eq!(service.rules_count(), 1);
        assert_eq!(storage.write_count(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(storage.get(USER_FILTER_ID), Some(vec!["||two.com^".to_string()]));
        assert_eq!(storage.write_count(), 1);
        // Add and remove only: the live filter was edited, no rebuild.
        assert_eq!(service.generation(), 1);

        service.clear_filter_rules(USER_FILTER_ID).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(storage.get(USER_FILTER_ID), Some(Vec::new()));
        assert_eq!(service.generation(), 2);
        assert_eq!(service.rules_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_filter_is_an_error() {
        let service = service(Arc::new(MemoryRulesStorage::new()));
        service.start().await.unwrap();
        assert!(matches!(
            service.add_filter_rules(77, &["||x.com^"]),
            Err(crate::error::ServiceError::FilterNotFound(77))
        ));
        assert!(service.clear_filter_rules(77).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_anti_circumvention_rules_are_not_counted() {
        let storage = Arc::new(MemoryRulesStorage::new());
        storage.insert(ANTI_CIRCUMVENTION, ["||circumvent.net^"]);
        storage.insert(USER_FILTER_ID, ["||user.net^"]);
        let service = service(storage);
        service.start().await.unwrap();
        assert_eq!(service.rules_count(), 1);

        service
            .add_filter_rules(ANTI_CIRCUMVENTION, &["||evasion.net^"])
            .unwrap();
        assert_eq!(service.rules_count(), 1);
        assert!(service
            .get_rule_for_request("http://evasion.net/a.js", "http://site.com/", RequestType::SCRIPT)
            .is_some());

        service.add_filter_rules(USER_FILTER_ID, &["||user2.net^"]).unwrap();
        assert_eq!(service.rules_count(), 2);
    }
}
