//! Tests for the category reference cache.

use std::sync::Arc;

use rstest::rstest;
use serde_json::{Value, json};

use super::*;
use crate::domain::ports::{GatewayError, MockRemoteGateway};
use crate::domain::{ErrorCode, Row};
use crate::outbound::memory::{GatewayOperation, InMemoryGateway};

fn category_row(code: &str, sort_order: i32, vehicle_related: bool, report_line: Option<&str>) -> Row {
    match json!({
        "code": code,
        "label": code.to_lowercase(),
        "sort_order": sort_order,
        "vehicle_related": vehicle_related,
        "report_line": report_line,
    }) {
        Value::Object(row) => row,
        other => panic!("category rows must be objects, got {other}"),
    }
}

fn taxonomy() -> Vec<Row> {
    vec![
        category_row("FUEL", 10, true, Some("Line 9")),
        category_row("MEALS", 20, false, Some("Line 24b")),
        category_row("PARKING", 30, true, None),
        category_row("OFFICE", 40, false, Some("Line 18")),
        category_row("TOLLS", 50, true, Some("Line 9")),
    ]
}

fn memory_cache(rows: Vec<Row>) -> (Arc<InMemoryGateway>, ReferenceCache<InMemoryGateway>) {
    let gateway = Arc::new(InMemoryGateway::new().with_rows(Collection::ExpenseCategories, rows));
    let cache = ReferenceCache::new(Arc::clone(&gateway));
    (gateway, cache)
}

#[tokio::test]
async fn lookup_is_total_over_loaded_codes() {
    let (_, cache) = memory_cache(taxonomy());
    cache.load().await.expect("load succeeds");

    for code in ["FUEL", "MEALS", "PARKING", "OFFICE", "TOLLS"] {
        let entry = cache.lookup(code).expect("loaded code resolves");
        assert_eq!(entry.code().as_str(), code);
    }
    assert!(cache.lookup("TRAVEL").is_none());
}

#[tokio::test]
async fn fuel_and_meals_scenario() {
    let (_, cache) = memory_cache(vec![
        category_row("FUEL", 10, true, Some("Line 9")),
        category_row("MEALS", 20, false, Some("Line 24b")),
    ]);
    cache.load().await.expect("load succeeds");

    let vehicle = cache.filter(ReferenceCategory::vehicle_related);
    assert_eq!(vehicle.len(), 1);
    assert_eq!(vehicle.first().map(|c| c.code().as_str()), Some("FUEL"));
    assert_eq!(
        cache.lookup("MEALS").and_then(|c| c.report_line().map(str::to_owned)),
        Some("Line 24b".to_owned())
    );
}

#[tokio::test]
async fn entries_are_sorted_stably_by_sort_order() {
    let (_, cache) = memory_cache(vec![
        category_row("B_SECOND", 5, false, None),
        category_row("C_LAST", 9, false, None),
        category_row("A_FIRST", 1, false, None),
        category_row("B_THIRD", 5, false, None),
    ]);
    let snapshot = cache.load().await.expect("load succeeds");

    let codes: Vec<_> = snapshot.iter().map(|c| c.code().as_str()).collect();
    assert_eq!(codes, ["A_FIRST", "B_SECOND", "B_THIRD", "C_LAST"]);
}

#[tokio::test]
async fn filter_on_unloaded_cache_is_empty() {
    let (gateway, cache) = memory_cache(taxonomy());
    assert!(!cache.is_loaded());
    assert!(cache.filter(|_| true).is_empty());
    assert!(cache.lookup("FUEL").is_none());
    assert!(gateway.calls().is_empty());
}

#[tokio::test]
async fn concurrent_loads_share_one_request() {
    let (gateway, cache) = memory_cache(taxonomy());
    let gate = gateway.hold_next(Collection::ExpenseCategories, GatewayOperation::FetchCollection);

    let (first, second, ()) = tokio::join!(cache.load(), cache.load(), async move {
        tokio::task::yield_now().await;
        gate.release();
    });

    let first = first.expect("first load succeeds");
    let second = second.expect("second load succeeds");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(
        gateway.call_count(Collection::ExpenseCategories, GatewayOperation::FetchCollection),
        1
    );
}

#[tokio::test]
async fn failed_load_keeps_previous_snapshot() {
    let (gateway, cache) = memory_cache(taxonomy());
    let installed = cache.load().await.expect("first load succeeds");

    gateway.fail_next(
        Collection::ExpenseCategories,
        GatewayOperation::FetchCollection,
        GatewayError::network("connection reset"),
    );
    let error = cache.load().await.expect_err("second load fails");

    assert_eq!(error.code(), ErrorCode::NetworkFailure);
    let current = cache.snapshot().expect("snapshot retained");
    assert!(Arc::ptr_eq(&current, &installed));
}

#[tokio::test]
async fn duplicate_codes_reject_the_load() {
    let (_, cache) = memory_cache(vec![
        category_row("FUEL", 10, true, None),
        category_row("FUEL", 20, true, None),
    ]);

    let error = cache.load().await.expect_err("duplicates rejected");
    assert_eq!(error.code(), ErrorCode::ValidationFailure);
    assert_eq!(
        error.details().and_then(|d| d.get("code")),
        Some(&json!("FUEL"))
    );
    assert!(!cache.is_loaded());
}

#[rstest]
#[tokio::test]
async fn ensure_loaded_fetches_only_once() {
    let mut gateway = MockRemoteGateway::new();
    gateway
        .expect_fetch_collection()
        .withf(|collection, order| {
            *collection == Collection::ExpenseCategories && *order == collection.default_order()
        })
        .times(1)
        .returning(|_, _| Ok(taxonomy()));
    let cache = ReferenceCache::new(Arc::new(gateway));

    let first = cache.ensure_loaded().await.expect("loads");
    let second = cache.ensure_loaded().await.expect("cached");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.len(), 5);
}

#[tokio::test]
async fn malformed_rows_fail_the_whole_load() {
    let mut rows = taxonomy();
    rows.push(category_row("bad code", 60, false, None));
    let (_, cache) = memory_cache(rows);

    let error = cache.load().await.expect_err("malformed row");
    assert_eq!(error.code(), ErrorCode::ValidationFailure);
    assert!(cache.snapshot().is_none());
}
