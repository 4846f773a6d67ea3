//! Update checks, metadata retries and custom filter lists.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use abu_core::types::CUSTOM_FILTERS_START_ID;
use abu_core::RequestType;
use abu_service::subscription::checksum;
use abu_service::{EventType, MemoryRulesStorage, ServiceError};

use common::{existing_install, service, settle, MockSource, Recorder};

const CUSTOM_URL: &str = "https://lists.example.org/custom.txt";

#[tokio::test(start_paused = true)]
async fn test_only_newer_versions_are_downloaded() {
    let source = MockSource::new();
    source.set_remote_version(1, "1.0.0.1");
    source.set_remote_version(4, "1.0.0.0");
    source.set_rules(1, &["||fresh-ads.com^"]);
    let storage = Arc::new(MemoryRulesStorage::new());
    storage.insert(1, ["||stale-ads.com^"]);
    let service = service(source.clone(), storage.clone(), existing_install(&[1, 4]));
    service.start().await.unwrap();
    let recorder = Recorder::attach(&service);

    let updated = service.check_filters_updates(None).await.unwrap();
    assert_eq!(updated, vec![1]);
    assert_eq!(source.rules_calls.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.count(EventType::SuccessDownloadFilter), 2);

    let filter = service.get_filter(1).unwrap();
    assert_eq!(filter.version.as_deref(), Some("1.0.0.1"));
    assert_eq!(filter.last_update_time.as_deref(), Some("2024-05-01T00:00:00Z"));
    assert!(service.get_filter(4).unwrap().last_check_time.is_some());
    assert_eq!(
        service.state().filters_version()[&1].version.as_deref(),
        Some("1.0.0.1")
    );

    settle().await;
    assert_eq!(storage.get(1), Some(vec!["||fresh-ads.com^".to_string()]));
    assert!(service
        .get_rule_for_request("http://fresh-ads.com/", "http://a.com/", RequestType::SCRIPT)
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn test_recently_checked_filters_are_skipped() {
    let source = MockSource::new();
    source.set_remote_version(1, "1.0.0.0");
    let service = service(source.clone(), Arc::new(MemoryRulesStorage::new()), existing_install(&[1]));
    service.start().await.unwrap();

    assert!(service.check_antibanner_filters_update(false, None).await.unwrap().is_empty());
    assert_eq!(source.metadata_calls.load(Ordering::SeqCst), 1);

    // Checked a moment ago, so a background check finds nothing to do.
    assert!(service.check_antibanner_filters_update(false, None).await.unwrap().is_empty());
    assert_eq!(source.metadata_calls.load(Ordering::SeqCst), 1);

    // Not running: background checks do nothing at all.
    service.stop();
    assert!(service.check_antibanner_filters_update(false, None).await.unwrap().is_empty());
    assert_eq!(source.metadata_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_download_does_not_stop_other_updates() {
    let source = MockSource::new();
    for filter_id in [1, 4, 6] {
        source.set_remote_version(filter_id, "1.0.0.1");
    }
    source.set_rules(1, &["||one-v2.com^"]);
    source.set_rules(6, &["||six-v2.com^"]);
    source.set_url_rules(CUSTOM_URL, &["||custom-v1.com^"]);
    let storage = Arc::new(MemoryRulesStorage::new());
    storage.insert(4, ["||four-v1.com^"]);
    let service = service(source.clone(), storage.clone(), existing_install(&[1, 4, 6]));
    service.start().await.unwrap();
    let custom = service.load_custom_filter(CUSTOM_URL).await.unwrap();
    let recorder = Recorder::attach(&service);

    source.set_url_rules(CUSTOM_URL, &["||custom-v2.com^"]);
    let updated = service.check_filters_updates(None).await.unwrap();
    assert_eq!(updated, vec![1, 6, custom.filter_id]);
    assert_eq!(recorder.count(EventType::ErrorDownloadFilter), 1);
    assert_eq!(service.get_filter(4).unwrap().version.as_deref(), Some("1.0.0.0"));
    assert_eq!(service.get_filter(6).unwrap().version.as_deref(), Some("1.0.0.1"));

    settle().await;
    assert_eq!(storage.get(4), Some(vec!["||four-v1.com^".to_string()]));
    assert_eq!(storage.get(6), Some(vec!["||six-v2.com^".to_string()]));
    assert!(service
        .get_rule_for_request("http://custom-v2.com/", "http://a.com/", RequestType::SCRIPT)
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn test_metadata_failure_retries_then_gives_up() {
    let source = MockSource::new();
    source.fail_metadata.store(true, Ordering::SeqCst);
    let service = service(source.clone(), Arc::new(MemoryRulesStorage::new()), existing_install(&[1]));
    service.start().await.unwrap();

    let result = service.check_filters_updates(None).await;
    assert!(matches!(result, Err(ServiceError::Metadata(_))));
    assert_eq!(source.metadata_calls.load(Ordering::SeqCst), 11);
}

#[tokio::test(start_paused = true)]
async fn test_custom_filter_unchanged_content_is_not_duplicated() {
    let source = MockSource::new();
    let lines = ["! Title: My list", "! Expires: 2 days", "||custom-ads.com^"];
    source.set_url_rules(CUSTOM_URL, &lines);
    let storage = Arc::new(MemoryRulesStorage::new());
    let service = service(source.clone(), storage.clone(), existing_install(&[]));
    service.start().await.unwrap();

    let filter = service.load_custom_filter(CUSTOM_URL).await.unwrap();
    assert_eq!(filter.filter_id, CUSTOM_FILTERS_START_ID);
    assert_eq!(filter.name, "My list");
    assert_eq!(filter.expires, 2 * 24 * 60 * 60);
    assert_eq!(filter.checksum.as_deref(), Some(checksum(&lines).as_str()));
    assert!(filter.enabled && filter.installed);

    settle().await;
    assert_eq!(storage.get(CUSTOM_FILTERS_START_ID).map(|l| l.len()), Some(3));
    assert!(service
        .get_rule_for_request("http://custom-ads.com/", "http://a.com/", RequestType::SCRIPT)
        .is_some());

    assert!(service.add_update_custom_filter(CUSTOM_URL).await.unwrap().is_none());
    let customs: Vec<_> = service.get_filters().into_iter().filter(|f| f.is_custom()).collect();
    assert_eq!(customs.len(), 1);
    assert!(customs[0].last_check_time.is_some());
    assert_eq!(service.state().custom_filters().len(), 1);

    assert!(matches!(
        service.load_custom_filter(CUSTOM_URL).await,
        Err(ServiceError::AlreadyAdded(_))
    ));
    assert!(matches!(service.load_custom_filter("  ").await, Err(ServiceError::EmptyUrl)));

    source.set_url_rules(CUSTOM_URL, &["! Title: My list", "||other-ads.com^"]);
    let changed = service.add_update_custom_filter(CUSTOM_URL).await.unwrap().unwrap();
    assert_eq!(changed.filter_id, CUSTOM_FILTERS_START_ID);
    assert_ne!(changed.checksum, filter.checksum);
}

#[tokio::test(start_paused = true)]
async fn test_versioned_custom_filter_compares_versions() {
    let source = MockSource::new();
    source.set_url_rules(CUSTOM_URL, &["! Version: 2.0", "||v2.com^"]);
    let service = service(source.clone(), Arc::new(MemoryRulesStorage::new()), existing_install(&[]));
    service.start().await.unwrap();

    let filter = service.load_custom_filter(CUSTOM_URL).await.unwrap();
    assert_eq!(filter.version.as_deref(), Some("2.0"));
    assert_eq!(filter.checksum, None);
    assert_eq!(filter.name, CUSTOM_URL);

    source.set_url_rules(CUSTOM_URL, &["! Version: 2.0", "||changed-but-same-version.com^"]);
    assert!(service.add_update_custom_filter(CUSTOM_URL).await.unwrap().is_none());

    source.set_url_rules(CUSTOM_URL, &["! Version: 2.1", "||v21.com^"]);
    assert_eq!(service.update_custom_filters(&[filter.filter_id]).await, vec![filter.filter_id]);
    assert_eq!(service.get_filter(filter.filter_id).unwrap().version.as_deref(), Some("2.1"));
}

#[tokio::test(start_paused = true)]
async fn test_removed_custom_filter_is_forgotten() {
    let source = MockSource::new();
    source.set_url_rules(CUSTOM_URL, &["||custom-ads.com^"]);
    let service = service(source, Arc::new(MemoryRulesStorage::new()), existing_install(&[]));
    service.start().await.unwrap();

    let filter = service.load_custom_filter(CUSTOM_URL).await.unwrap();
    assert!(service.remove_filter(filter.filter_id).unwrap());
    assert!(service.get_filter(filter.filter_id).is_err());
    assert!(service.state().custom_filters().is_empty());

    // The same list can be subscribed again.
    let again = service.load_custom_filter(CUSTOM_URL).await.unwrap();
    assert_eq!(again.filter_id, CUSTOM_FILTERS_START_ID);
}

#[tokio::test(start_paused = true)]
async fn test_abp_subscription_into_user_filter() {
    let source = MockSource::new();
    source.set_url_rules("https://abp.example.net/list.txt", &["! Title: ABP", "||abp-ads.com^", "##.abp-ad"]);
    let storage = Arc::new(MemoryRulesStorage::new());
    let service = service(source, storage.clone(), existing_install(&[]));
    service.start().await.unwrap();

    let added = service
        .process_abp_subscription_url("https://abp.example.net/list.txt")
        .await
        .unwrap();
    assert_eq!(added, 2);
    assert!(service
        .process_abp_subscription_url("https://abp.example.net/missing.txt")
        .await
        .is_err());

    settle().await;
    assert_eq!(
        storage.get(abu_core::types::USER_FILTER_ID),
        Some(vec!["||abp-ads.com^".to_string(), "##.abp-ad".to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn test_reload_resets_versions() {
    let source = MockSource::new();
    source.set_remote_version(1, "1.0.0.0");
    source.set_rules(1, &["||reloaded.com^"]);
    let service = service(source.clone(), Arc::new(MemoryRulesStorage::new()), existing_install(&[1]));
    service.start().await.unwrap();

    assert!(service.check_filters_updates(None).await.unwrap().is_empty());
    assert_eq!(service.reload_filters().await.unwrap(), vec![1]);
    assert_eq!(source.rules_calls.load(Ordering::SeqCst), 1);
}
