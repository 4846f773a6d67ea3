//! Debounced processing of filter change events.

mod common;

use std::sync::Arc;
use std::time::Duration;

use abu_core::types::USER_FILTER_ID;
use abu_core::RequestType;
use abu_service::{Event, EventType, MemoryRulesStorage};

use common::{existing_install, service, settle, MockSource, Recorder};

#[tokio::test(start_paused = true)]
async fn test_rule_edits_coalesce_into_one_write() {
    let storage = Arc::new(MemoryRulesStorage::new());
    let service = service(MockSource::new(), storage.clone(), existing_install(&[]));
    service.start().await.unwrap();
    let recorder = Recorder::attach(&service);

    for i in 0..50 {
        service
            .add_filter_rules(USER_FILTER_ID, &[format!("||ad{}.example.com^", i)])
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(storage.write_count(), 0);
    assert_eq!(service.rules_count(), 50);

    settle().await;
    assert_eq!(storage.write_count(), 1);
    assert_eq!(storage.get(USER_FILTER_ID).map(|l| l.len()), Some(50));
    assert_eq!(recorder.count(EventType::RequestFilterUpdated), 1);
    assert_eq!(recorder.count(EventType::AddRules), 50);
    assert_eq!(recorder.count(EventType::UpdateUserFilterRules), 50);
    // Live filter was edited in place.
    assert_eq!(service.generation(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rule_updates_trigger_one_rebuild() {
    let storage = Arc::new(MemoryRulesStorage::new());
    storage.insert(1, ["||one.com^"]);
    storage.insert(4, ["||four.com^"]);
    storage.insert(USER_FILTER_ID, ["||user.com^"]);
    let service = service(MockSource::new(), storage.clone(), existing_install(&[1, 4]));
    service.start().await.unwrap();
    assert_eq!(service.rules_count(), 3);
    let recorder = Recorder::attach(&service);

    service.clear_filter_rules(1).unwrap();
    service.clear_filter_rules(4).unwrap();
    service.clear_filter_rules(USER_FILTER_ID).unwrap();
    assert_eq!(service.rules_count(), 3);

    settle().await;
    assert_eq!(storage.write_count(), 3);
    assert_eq!(service.generation(), 2);
    assert_eq!(service.rules_count(), 0);
    assert_eq!(recorder.count(EventType::RequestFilterUpdated), 1);
}

#[tokio::test(start_paused = true)]
async fn test_add_then_remove_in_one_batch() {
    let storage = Arc::new(MemoryRulesStorage::new());
    storage.insert(USER_FILTER_ID, ["||kept.com^", "||gone.com^"]);
    let service = service(MockSource::new(), storage.clone(), existing_install(&[]));
    service.start().await.unwrap();

    service.add_filter_rules(USER_FILTER_ID, &["||fresh.com^"]).unwrap();
    assert!(service.remove_filter_rule(USER_FILTER_ID, "||gone.com^").unwrap());
    assert!(!service.remove_filter_rule(USER_FILTER_ID, "||never.com^").unwrap());
    assert!(service
        .get_rule_for_request("http://gone.com/", "http://a.com/", RequestType::SCRIPT)
        .is_none());

    settle().await;
    assert_eq!(
        storage.get(USER_FILTER_ID),
        Some(vec!["||kept.com^".to_string(), "||fresh.com^".to_string()])
    );
    assert_eq!(storage.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_pending_changes() {
    let storage = Arc::new(MemoryRulesStorage::new());
    let service = service(MockSource::new(), storage.clone(), existing_install(&[]));
    service.start().await.unwrap();

    service.add_filter_rules(USER_FILTER_ID, &["||pending.com^"]).unwrap();
    service.wait_for_pending_changes().await;
    assert_eq!(storage.write_count(), 1);

    // Nothing queued: returns after one window.
    service.wait_for_pending_changes().await;
    assert_eq!(storage.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_events_reach_listeners_immediately() {
    let service = service(
        MockSource::new(),
        Arc::new(MemoryRulesStorage::new()),
        existing_install(&[1]),
    );
    service.start().await.unwrap();
    let recorder = Recorder::attach(&service);

    service.disable_filter(1, false).unwrap();
    let events = recorder.events.lock().clone();
    assert!(matches!(events.as_slice(), [Event::FilterEnableDisable(f)] if f.filter_id == 1 && !f.enabled));
    assert!(!service.state().filters_state()[&1].enabled);
}
