//! Behaviour of the in-memory gateway.

use std::sync::Arc;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;

fn row(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        other => panic!("fixture rows must be objects, got {other}"),
    }
}

#[fixture]
fn gateway() -> InMemoryGateway {
    InMemoryGateway::new().with_rows(
        Collection::ExpenseCategories,
        vec![
            row(json!({ "code": "MEALS", "label": "Meals", "sort_order": 20 })),
            row(json!({ "code": "FUEL", "label": "Fuel", "sort_order": 10 })),
            row(json!({ "code": "OTHER", "label": "Other", "sort_order": null })),
        ],
    )
}

#[rstest]
#[tokio::test]
async fn orders_rows_with_nulls_last(gateway: InMemoryGateway) {
    let rows = gateway
        .fetch_collection(
            Collection::ExpenseCategories,
            Some(OrderKey::ascending("sort_order")),
        )
        .await
        .expect("fetch succeeds");

    let codes: Vec<_> = rows
        .iter()
        .filter_map(|row| row.get("code").and_then(Value::as_str))
        .collect();
    assert_eq!(codes, ["FUEL", "MEALS", "OTHER"]);
}

#[rstest]
#[tokio::test]
async fn queued_failures_apply_once(gateway: InMemoryGateway) {
    gateway.fail_next(
        Collection::ExpenseCategories,
        GatewayOperation::FetchCollection,
        GatewayError::timeout("slow"),
    );

    let first = gateway
        .fetch_collection(Collection::ExpenseCategories, None)
        .await;
    let second = gateway
        .fetch_collection(Collection::ExpenseCategories, None)
        .await;

    assert_eq!(first, Err(GatewayError::timeout("slow")));
    assert_eq!(second.map(|rows| rows.len()), Ok(3));
}

#[rstest]
#[tokio::test]
async fn missing_rows_are_not_found() {
    let gateway = InMemoryGateway::new();
    let result = gateway.fetch_one(Collection::Profiles, "nobody").await;
    assert_eq!(result, Err(GatewayError::not_found("profiles", "nobody")));
}

#[rstest]
#[tokio::test]
async fn insert_assigns_ids_and_delete_removes() {
    let gateway = InMemoryGateway::new();
    let stored = gateway
        .insert(Collection::Expenses, row(json!({ "amount_minor": 500 })))
        .await
        .expect("insert succeeds");
    let id = stored
        .get("id")
        .and_then(Value::as_str)
        .expect("id assigned")
        .to_owned();

    gateway
        .delete(Collection::Expenses, &id)
        .await
        .expect("delete succeeds");
    assert!(gateway.rows(Collection::Expenses).is_empty());
    assert_eq!(
        gateway.delete(Collection::Expenses, &id).await,
        Err(GatewayError::not_found("expenses", id.as_str()))
    );
}

#[rstest]
#[tokio::test]
async fn patch_merges_fields_into_the_stored_row() {
    let gateway = InMemoryGateway::new().with_rows(
        Collection::Profiles,
        vec![row(json!({ "id": "p1", "region": "GB", "unit_system": "metric" }))],
    );

    let stored = gateway
        .patch(
            Collection::Profiles,
            "p1",
            row(json!({ "unit_system": "imperial" })),
        )
        .await
        .expect("patch succeeds");

    assert_eq!(stored.get("region"), Some(&json!("GB")));
    assert_eq!(stored.get("unit_system"), Some(&json!("imperial")));
    assert_eq!(gateway.rows(Collection::Profiles), vec![stored]);
}

#[rstest]
#[tokio::test]
async fn held_calls_return_data_from_call_time() {
    let gateway = Arc::new(InMemoryGateway::new().with_rows(
        Collection::Profiles,
        vec![row(json!({ "id": "p1", "region": "GB" }))],
    ));
    let gate = gateway.hold_next(Collection::Profiles, GatewayOperation::FetchOne);

    let parked = tokio::spawn({
        let gateway = Arc::clone(&gateway);
        async move { gateway.fetch_one(Collection::Profiles, "p1").await }
    });
    while gateway.call_count(Collection::Profiles, GatewayOperation::FetchOne) == 0 {
        tokio::task::yield_now().await;
    }
    gateway.set_rows(
        Collection::Profiles,
        vec![row(json!({ "id": "p1", "region": "US" }))],
    );
    gate.release();

    let stored = parked.await.expect("task joins").expect("fetch succeeds");
    assert_eq!(stored.get("region"), Some(&json!("GB")));
}

#[rstest]
fn fixtures_reject_unknown_collections() {
    let result = InMemoryGateway::from_json(r#"{ "referrals": [] }"#);
    assert_eq!(
        result.map(|_| ()),
        Err(FixtureError::UnknownCollection {
            name: "referrals".to_owned()
        })
    );
}

#[rstest]
fn fixtures_seed_every_named_collection() {
    let gateway = InMemoryGateway::from_json(
        r#"{
            "expenses": [{ "id": "e1" }],
            "mileage_logs": [{ "id": "m1" }, { "id": "m2" }]
        }"#,
    )
    .expect("valid fixture");

    assert_eq!(gateway.rows(Collection::Expenses).len(), 1);
    assert_eq!(gateway.rows(Collection::MileageLogs).len(), 2);
    assert!(gateway.calls().is_empty());
}
