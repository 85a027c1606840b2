//! Behaviour-driven tests for the domain store.
//!
//! Scenarios run the store against the in-memory gateway so that partial
//! failures and refused writes can be staged deterministically.

use std::sync::Arc;

use ledger_store::domain::ports::GatewayError;
use ledger_store::domain::{
    Collection, DomainStore, Error, Profile, ProfilePatch, RecordKind, ReferenceCategory,
    ReferenceSnapshot, Row, UnitSystem, UserId,
};
use ledger_store::outbound::memory::{GatewayOperation, InMemoryGateway};
use rstest::fixture;
use rstest_bdd::Slot;
use rstest_bdd_macros::{ScenarioState, given, scenario, then, when};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

const USER: &str = "0b7c3c1e-52a4-4b8e-9d4f-6f7d2c1a9e33";

/// Wrapper for the runtime so it can live in a `Slot`.
#[derive(Clone)]
struct RuntimeHandle(Arc<Runtime>);

type Store = DomainStore<InMemoryGateway>;

#[derive(Default, ScenarioState)]
struct StoreWorld {
    runtime: Slot<RuntimeHandle>,
    gateway: Slot<Arc<InMemoryGateway>>,
    store: Slot<Arc<Store>>,
    profile_result: Slot<Result<Profile, Error>>,
    categories: Slot<Result<Arc<ReferenceSnapshot>, Error>>,
}

impl StoreWorld {
    fn runtime(&self) -> Arc<Runtime> {
        self.runtime.get().expect("runtime should be set").0
    }

    fn gateway(&self) -> Arc<InMemoryGateway> {
        self.gateway.get().expect("gateway should be set")
    }

    fn store(&self) -> Arc<Store> {
        self.store.get().expect("store should be set")
    }

    fn profile(&self) -> Profile {
        self.store()
            .snapshot()
            .profile()
            .cloned()
            .expect("profile should be cached")
    }
}

fn object(value: Value) -> Row {
    match value {
        Value::Object(row) => row,
        other => panic!("rows must be objects, got {other}"),
    }
}

fn expense_rows(count: usize) -> Vec<Row> {
    (1..=count)
        .map(|day| {
            object(json!({
                "id": format!("00000000-0000-4000-8000-{day:012}"),
                "user_id": USER,
                "category_code": "MEALS",
                "amount_minor": 1000 + day,
                "occurred_at": format!("2026-03-{day:02}T12:00:00Z"),
                "notes": null
            }))
        })
        .collect()
}

fn backend(expenses: usize) -> InMemoryGateway {
    InMemoryGateway::new()
        .with_rows(
            Collection::Profiles,
            vec![object(json!({
                "id": USER,
                "region": "GB",
                "display_name": "Grace Hopper",
                "business_name": "Hopper Consulting",
                "unit_system": "metric",
                "updated_at": "2026-02-01T08:00:00Z"
            }))],
        )
        .with_rows(
            Collection::ExpenseCategories,
            vec![
                object(json!({ "code": "MEALS", "label": "Meals", "sort_order": 20, "vehicle_related": false, "report_line": "Line 24b" })),
                object(json!({ "code": "FUEL", "label": "Fuel", "sort_order": 10, "vehicle_related": true, "report_line": "Line 9" })),
            ],
        )
        .with_rows(Collection::Expenses, expense_rows(expenses))
}

fn parse_collection(name: &str) -> Collection {
    name.parse().expect("feature names a known collection")
}

#[fixture]
fn world() -> StoreWorld {
    StoreWorld::default()
}

// -----------------------------------------------------------------------------
// Given Steps
// -----------------------------------------------------------------------------

#[given("a backend holding a profile and {count} expenses")]
fn a_backend_holding(world: &StoreWorld, count: usize) {
    let runtime = Runtime::new().expect("create runtime");
    let gateway = Arc::new(backend(count));
    let user = UserId::new(USER).expect("valid user id");
    world.runtime.set(RuntimeHandle(Arc::new(runtime)));
    world
        .store
        .set(Arc::new(DomainStore::new(Arc::clone(&gateway), user)));
    world.gateway.set(gateway);
}

#[given("the {collection} collection is unreachable")]
fn the_collection_is_unreachable(world: &StoreWorld, collection: String) {
    world.gateway().fail_next(
        parse_collection(&collection),
        GatewayOperation::FetchCollection,
        GatewayError::network("connection refused"),
    );
}

#[given("the store has loaded")]
fn the_store_has_loaded(world: &StoreWorld) {
    let store = world.store();
    let snapshot = world.runtime().block_on(store.initialize());
    assert!(snapshot.is_ready(), "store should be ready after loading");
}

#[given("the backend rejects the next profile update")]
fn the_backend_rejects_the_next_profile_update(world: &StoreWorld) {
    world.gateway().fail_next(
        Collection::Profiles,
        GatewayOperation::Patch,
        GatewayError::rejected("unit_system is locked"),
    );
}

// -----------------------------------------------------------------------------
// When Steps
// -----------------------------------------------------------------------------

#[when("the store initializes")]
fn the_store_initializes(world: &StoreWorld) {
    let store = world.store();
    world.runtime().block_on(store.initialize());
}

#[when("the user switches the unit system to {system}")]
fn the_user_switches_the_unit_system(world: &StoreWorld, system: String) {
    let system: UnitSystem = system.parse().expect("feature names a unit system");
    let store = world.store();
    let result = world
        .runtime()
        .block_on(store.update_profile(ProfilePatch::default().with_unit_system(system)));
    world.profile_result.set(result);
}

#[when("the categories load")]
fn the_categories_load(world: &StoreWorld) {
    let store = world.store();
    let result = world.runtime().block_on(store.categories().load());
    world.categories.set(result);
}

// -----------------------------------------------------------------------------
// Then Steps
// -----------------------------------------------------------------------------

#[then("the store is ready")]
fn the_store_is_ready(world: &StoreWorld) {
    assert!(world.store().snapshot().is_ready());
}

#[then("{count} expenses are cached")]
fn expenses_are_cached(world: &StoreWorld, count: usize) {
    let snapshot = world.store().snapshot();
    assert_eq!(snapshot.records(RecordKind::Expense).len(), count);
}

#[then("the {collection} collection reports {code}")]
fn the_collection_reports(world: &StoreWorld, collection: String, code: String) {
    let snapshot = world.store().snapshot();
    let error = snapshot
        .load_error(parse_collection(&collection))
        .expect("collection should carry a load error");
    assert_eq!(error.code().as_str(), code);
}

#[then("the update fails with {code}")]
fn the_update_fails_with(world: &StoreWorld, code: String) {
    match world.profile_result.get().expect("update should have run") {
        Ok(profile) => panic!("expected {code}, got updated profile {profile:?}"),
        Err(error) => assert_eq!(error.code().as_str(), code),
    }
}

#[then("the update succeeds")]
fn the_update_succeeds(world: &StoreWorld) {
    if let Err(error) = world.profile_result.get().expect("update should have run") {
        panic!("expected success, got {error}");
    }
}

#[then("the cached profile uses {system}")]
fn the_cached_profile_uses(world: &StoreWorld, system: String) {
    assert_eq!(world.profile().unit_system.as_str(), system);
    assert_eq!(
        world.profile().business_name.as_deref(),
        Some("Hopper Consulting")
    );
}

#[then("the vehicle-related categories are {codes}")]
fn the_vehicle_related_categories_are(world: &StoreWorld, codes: String) {
    let snapshot = world
        .categories
        .get()
        .expect("categories should have loaded")
        .expect("category load should succeed");
    let vehicle: Vec<_> = snapshot
        .filter(ReferenceCategory::vehicle_related)
        .into_iter()
        .map(|category| category.code().as_str().to_owned())
        .collect();
    assert_eq!(vehicle.join(","), codes);
}

#[then("category {code} reports on line {line}")]
fn category_reports_on_line(world: &StoreWorld, code: String, line: String) {
    let category = world
        .store()
        .categories()
        .lookup(&code)
        .expect("category should resolve");
    assert_eq!(category.report_line(), Some(format!("Line {line}").as_str()));
}

#[then("category {code} is unknown")]
fn category_is_unknown(world: &StoreWorld, code: String) {
    assert!(world.store().categories().lookup(&code).is_none());
}

// -----------------------------------------------------------------------------
// Scenario Bindings
// -----------------------------------------------------------------------------

#[scenario(
    path = "tests/features/domain_store.feature",
    name = "One failing collection does not block the others"
)]
fn one_failing_collection_does_not_block_the_others(world: StoreWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/domain_store.feature",
    name = "A refused profile update is rolled back"
)]
fn a_refused_profile_update_is_rolled_back(world: StoreWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/domain_store.feature",
    name = "An accepted profile update is kept"
)]
fn an_accepted_profile_update_is_kept(world: StoreWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/domain_store.feature",
    name = "Categories are looked up by code and filtered by flag"
)]
fn categories_are_looked_up_by_code_and_filtered_by_flag(world: StoreWorld) {
    let _ = world;
}
