//! Whitelist with persistence and change notifications.

use std::sync::Arc;

use abu_core::rule::UrlFilterRule;
use abu_core::url::host_of;
use abu_core::whitelist::whitelist_rule_text;
use abu_core::WhitelistEngine;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::events::{Event, EventBus};
use crate::state::FiltersState;

#[derive(Debug)]
pub struct WhitelistService {
    engine: RwLock<WhitelistEngine>,
    state: FiltersState,
    bus: Arc<EventBus>,
}

impl WhitelistService {
    pub fn new(state: FiltersState, bus: Arc<EventBus>) -> Self {
        Self {
            engine: RwLock::new(WhitelistEngine::new()),
            state,
            bus,
        }
    }

    /// Rebuild the engine from stored domains.
    pub fn load(&self) {
        let domains = self.state.whitelist_domains();
        log::debug!("Loading {} whitelisted domains", domains.len());
        *self.engine.write() = WhitelistEngine::with_domains(&domains);
    }

    pub fn engine(&self) -> RwLockReadGuard<'_, WhitelistEngine> {
        self.engine.read()
    }

    pub fn find_whitelist_rule(&self, url: &str) -> Option<Arc<UrlFilterRule>> {
        if url.is_empty() {
            return None;
        }
        self.engine.read().find_whitelist_rule(url)
    }

    pub fn whitelist_domains(&self) -> Vec<String> {
        self.engine.read().whitelist_domains().to_vec()
    }

    /// Rule texts behind the whitelist, bare and `www.` form per domain.
    pub fn rules(&self) -> Vec<String> {
        self.whitelist_domains()
            .iter()
            .flat_map(|d| [whitelist_rule_text(d), whitelist_rule_text(&format!("www.{}", d))])
            .collect()
    }

    fn save(&self) {
        let domains = self.whitelist_domains();
        self.state.save_whitelist_domains(&domains);
    }

    fn notify_changed(&self) {
        self.bus.notify(&Event::UpdateWhitelistFilterRules);
    }

    /// Whitelist a domain and store the list. Returns false for input that
    /// is not a domain or is already whitelisted.
    pub fn add_to_whitelist(&self, domain: &str) -> bool {
        let added = self.engine.write().add_to_whitelist(domain).is_some();
        if added {
            self.save();
        }
        added
    }

    pub fn whitelist_url(&self, url: &str) {
        let host = host_of(url);
        self.add_to_whitelist(&host);
        self.notify_changed();
    }

    pub fn unwhitelist_url(&self, url: &str) {
        let host = host_of(url);
        self.remove_from_whitelist(&host);
    }

    pub fn add_to_whitelist_array<S: AsRef<str>>(&self, domains: &[S]) {
        {
            let mut engine = self.engine.write();
            for domain in domains {
                engine.add_to_whitelist(domain.as_ref());
            }
        }
        self.save();
        self.notify_changed();
    }

    pub fn remove_from_whitelist(&self, domain: &str) -> bool {
        let removed = self.engine.write().remove_from_whitelist(domain);
        self.save();
        self.notify_changed();
        removed
    }

    pub fn clear_whitelist(&self) {
        self.state.clear_whitelist_domains();
        self.engine.write().clear();
    }
}
