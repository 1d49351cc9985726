use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use futures::future::join_all;

use shared_models::auth::User;
use shared_utils::test_utils::{TestConfig, TestUser};
use slot_cell::services::transaction::TransactionRunner;
use slot_cell::store::InMemorySlotStore;
use slot_cell::{CreateSlotRequest, ProviderSlotsQuery, SlotError, SlotService};

fn service(transactional: bool) -> Arc<SlotService> {
    let config = TestConfig {
        transactions_enabled: transactional,
        ..TestConfig::default()
    }
    .to_app_config();
    let store = Arc::new(InMemorySlotStore::new(transactional, 5_000));
    Arc::new(
        SlotService::new(&config, store)
            .with_runner(TransactionRunner::new(50).with_backoff(StdDuration::from_millis(1))),
    )
}

fn legacy_request(start: &str, end: &str, capacity: i64) -> CreateSlotRequest {
    CreateSlotRequest {
        entity_type: Some("OPD".to_string()),
        date: Some((Utc::now() + Duration::days(2)).format("%Y-%m-%d").to_string()),
        start_time: Some(start.to_string()),
        end_time: Some(end.to_string()),
        capacity: Some(capacity),
        ..Default::default()
    }
}

async fn race_identical_creates(service: Arc<SlotService>, user: User, racers: usize) -> Vec<Result<(), SlotError>> {
    let handles: Vec<_> = (0..racers)
        .map(|_| {
            let service = Arc::clone(&service);
            let user = user.clone();
            tokio::spawn(async move {
                service
                    .create_slot(&user, legacy_request("09:00", "10:00", 3))
                    .await
                    .map(|_| ())
            })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.expect("create task panicked"))
        .collect()
}

fn assert_single_winner(results: &[Result<(), SlotError>]) {
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one identical create may win: {:?}", results);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(
            matches!(result, Err(SlotError::OverlapConflict(_))),
            "losers must see an overlap conflict, got {:?}",
            result
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_creates_with_transactions() {
    let service = service(true);
    let user = TestUser::doctor("doc@example.com").to_user();

    let results = race_identical_creates(Arc::clone(&service), user.clone(), 16).await;
    assert_single_winner(&results);

    let slots = service.list_provider_slots(&user, ProviderSlotsQuery::default()).await.unwrap();
    assert_eq!(slots.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_identical_creates_without_transactions() {
    let service = service(false);
    let user = TestUser::doctor("doc@example.com").to_user();

    let results = race_identical_creates(Arc::clone(&service), user.clone(), 16).await;
    assert_single_winner(&results);

    let slots = service.list_provider_slots(&user, ProviderSlotsQuery::default()).await.unwrap();
    assert_eq!(slots.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_overlapping_creates_keep_schedule_disjoint() {
    let service = service(true);
    let user = TestUser::doctor("doc@example.com").to_user();

    let ranges = [("09:00", "10:00"), ("09:30", "10:30"), ("09:45", "11:00"), ("09:50", "10:05")];
    let handles: Vec<_> = ranges
        .iter()
        .map(|(start, end)| {
            let service = Arc::clone(&service);
            let user = user.clone();
            let request = legacy_request(start, end, 1);
            tokio::spawn(async move { service.create_slot(&user, request).await })
        })
        .collect();

    let successes = join_all(handles)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(_))))
        .count();
    assert_eq!(successes, 1, "every range overlaps every other");
}

async fn race_reserves(service: Arc<SlotService>, capacity: i64, racers: usize) -> (usize, u32) {
    let user = TestUser::doctor("doc@example.com").to_user();
    let slot = service
        .create_slot(&user, legacy_request("09:00", "10:00", capacity))
        .await
        .unwrap();

    let handles: Vec<_> = (0..racers)
        .map(|_| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.reserve_window(slot.id, "09:00", "10:00").await })
        })
        .collect();

    let mut reserved = 0;
    for joined in join_all(handles).await {
        match joined.expect("reserve task panicked") {
            Ok(_) => reserved += 1,
            Err(SlotError::WindowFull(_)) => {}
            Err(other) => panic!("unexpected reserve failure: {:?}", other),
        }
    }

    let stored = service.get_slot(slot.id).await.unwrap();
    (reserved, stored.windows()[0].booked)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reserves_never_oversell() {
    let (reserved, booked) = race_reserves(service(true), 5, 20).await;
    assert_eq!(reserved, 5);
    assert_eq!(booked, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_version_checks_keep_counters_exact_without_transactions() {
    let (reserved, booked) = race_reserves(service(false), 5, 12).await;
    assert_eq!(reserved as u32, booked);
    assert!(booked <= 5);
}
