//! Event bus.
//!
//! Listeners run synchronously inside [`EventBus::notify`], in registration
//! order. The bus snapshots its listener list before delivering, so a
//! listener may add or remove listeners, or emit further events.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use abu_core::FilterId;
use parking_lot::RwLock;

use crate::subscription::{Filter, Group};

/// Every kind of event the service emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    AddRules,
    RemoveRule,
    UpdateFilterRules,
    FilterEnableDisable,
    FilterGroupEnableDisable,
    FilterAddRemove,
    StartDownloadFilter,
    SuccessDownloadFilter,
    ErrorDownloadFilter,
    RequestFilterUpdated,
    UpdateUserFilterRules,
    UpdateWhitelistFilterRules,
    ApplicationInitialized,
}

impl EventType {
    pub const ALL: [EventType; 13] = [
        EventType::AddRules,
        EventType::RemoveRule,
        EventType::UpdateFilterRules,
        EventType::FilterEnableDisable,
        EventType::FilterGroupEnableDisable,
        EventType::FilterAddRemove,
        EventType::StartDownloadFilter,
        EventType::SuccessDownloadFilter,
        EventType::ErrorDownloadFilter,
        EventType::RequestFilterUpdated,
        EventType::UpdateUserFilterRules,
        EventType::UpdateWhitelistFilterRules,
        EventType::ApplicationInitialized,
    ];

    /// Buffered by the change batcher instead of acted on immediately.
    pub fn is_filter_change(self) -> bool {
        matches!(
            self,
            EventType::AddRules
                | EventType::RemoveRule
                | EventType::UpdateFilterRules
                | EventType::FilterEnableDisable
                | EventType::FilterGroupEnableDisable
        )
    }

    /// Requires the request filter to be rebuilt from storage.
    pub fn requires_rebuild(self) -> bool {
        matches!(
            self,
            EventType::UpdateFilterRules | EventType::FilterEnableDisable | EventType::FilterGroupEnableDisable
        )
    }

    /// Changes the rule text kept in storage.
    pub fn requires_persist(self) -> bool {
        matches!(self, EventType::UpdateFilterRules | EventType::AddRules | EventType::RemoveRule)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AddRules { filter_id: FilterId, rules: Vec<String> },
    RemoveRule { filter_id: FilterId, rule: String },
    UpdateFilterRules { filter_id: FilterId, rules: Vec<String> },
    FilterEnableDisable(Filter),
    FilterGroupEnableDisable(Group),
    FilterAddRemove(Filter),
    StartDownloadFilter(FilterId),
    SuccessDownloadFilter(Filter),
    ErrorDownloadFilter(FilterId),
    RequestFilterUpdated { rules_count: usize },
    UpdateUserFilterRules { rules_count: usize },
    UpdateWhitelistFilterRules,
    ApplicationInitialized,
}

impl Event {
    pub fn kind(&self) -> EventType {
        match self {
            Event::AddRules { .. } => EventType::AddRules,
            Event::RemoveRule { .. } => EventType::RemoveRule,
            Event::UpdateFilterRules { .. } => EventType::UpdateFilterRules,
            Event::FilterEnableDisable(_) => EventType::FilterEnableDisable,
            Event::FilterGroupEnableDisable(_) => EventType::FilterGroupEnableDisable,
            Event::FilterAddRemove(_) => EventType::FilterAddRemove,
            Event::StartDownloadFilter(_) => EventType::StartDownloadFilter,
            Event::SuccessDownloadFilter(_) => EventType::SuccessDownloadFilter,
            Event::ErrorDownloadFilter(_) => EventType::ErrorDownloadFilter,
            Event::RequestFilterUpdated { .. } => EventType::RequestFilterUpdated,
            Event::UpdateUserFilterRules { .. } => EventType::UpdateUserFilterRules,
            Event::UpdateWhitelistFilterRules => EventType::UpdateWhitelistFilterRules,
            Event::ApplicationInitialized => EventType::ApplicationInitialized,
        }
    }

    /// Filter the event is about. Group and service events have none.
    pub fn filter_id(&self) -> Option<FilterId> {
        match self {
            Event::AddRules { filter_id, .. }
            | Event::RemoveRule { filter_id, .. }
            | Event::UpdateFilterRules { filter_id, .. }
            | Event::StartDownloadFilter(filter_id)
            | Event::ErrorDownloadFilter(filter_id) => Some(*filter_id),
            Event::FilterEnableDisable(f) | Event::FilterAddRemove(f) | Event::SuccessDownloadFilter(f) => {
                Some(f.filter_id)
            }
            _ => None,
        }
    }
}

pub type ListenerId = usize;

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_id: AtomicUsize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn notify(&self, event: &Event) {
        let snapshot: Vec<Listener> = self.listeners.read().iter().map(|(_, l)| Arc::clone(l)).collect();
        for listener in snapshot {
            listener(event);
        }
    }
}
