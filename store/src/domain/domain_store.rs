//! The local-first domain store.
//!
//! [`DomainStore`] is the single writer of the signed-in user's profile and
//! records. It loads them once, serves immutable snapshots synchronously, and
//! keeps the cache consistent with the backend across partial failures and
//! overlapping requests:
//!
//! - fetch cycles run on spawned tasks and carry a generation number; only
//!   the most recently started cycle may install its results;
//! - mutations apply optimistically and join a per-entity write log; when a
//!   write fails the entity is rebuilt from its last confirmed value plus the
//!   writes that have not failed, so a rejected field never outlives its
//!   request;
//! - every snapshot replacement is pushed through the selector registry.
//!
//! The store lock is never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde_json::json;
use tracing::{debug, warn};

use super::ports::{GatewayError, RemoteGateway};
use super::record::{sort_newest_first, sorted_position};
use super::subscription::{SharedRegistry, SubscriberRegistry, register_selector};
use super::{
    CategoryCode, Collection, Error, Lifecycle, Profile, ProfilePatch, RecordDraft, RecordId,
    RecordKind, RecordPatch, ReferenceCache, StoreSnapshot, Subscription, UserId, UserRecord,
};

/// Output of a fetch cycle: the installed snapshot, or `None` when the cycle
/// was superseded before it could install.
type LoadFuture = Shared<BoxFuture<'static, Option<Arc<StoreSnapshot>>>>;

/// An entity an optimistic write can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntityKey {
    Profile,
    Record(RecordKind, RecordId),
}

impl EntityKey {
    fn collection(self) -> Collection {
        match self {
            Self::Profile => Collection::Profiles,
            Self::Record(kind, _) => kind.collection(),
        }
    }

    fn read(self, snapshot: &StoreSnapshot) -> Cached {
        match self {
            Self::Profile => Cached::Profile(snapshot.profile().cloned()),
            Self::Record(kind, id) => Cached::Record(snapshot.record(kind, id).cloned()),
        }
    }

    fn write(self, snapshot: &mut StoreSnapshot, value: Cached) {
        match (self, value) {
            (Self::Profile, Cached::Profile(profile)) => snapshot.profile = profile,
            (Self::Record(kind, id), Cached::Record(record)) => {
                let records = snapshot.records_mut(kind);
                records.retain(|existing| existing.id != id);
                if let Some(record) = record {
                    reposition(records, record);
                }
            }
            (key, value) => debug!(?key, ?value, "cached value does not fit entity"),
        }
    }
}

/// The cached state of one entity; `None` when absent.
#[derive(Debug, Clone, PartialEq)]
enum Cached {
    Profile(Option<Profile>),
    Record(Option<UserRecord>),
}

#[derive(Debug, Clone)]
enum WriteOp {
    Profile(ProfilePatch),
    Record(RecordPatch),
    Delete,
    /// The row the backend returned for a confirmed record write.
    Stored(UserRecord),
}

impl WriteOp {
    fn apply(&self, value: Cached) -> Cached {
        match (self, value) {
            (Self::Profile(patch), Cached::Profile(Some(profile))) => {
                Cached::Profile(Some(patch.apply_to(&profile).unwrap_or(profile)))
            }
            (Self::Record(patch), Cached::Record(Some(record))) => {
                Cached::Record(Some(patch.apply_to(&record).unwrap_or(record)))
            }
            (Self::Delete, Cached::Record(_)) => Cached::Record(None),
            (Self::Stored(row), Cached::Record(_)) => Cached::Record(Some(row.clone())),
            (_, unchanged) => unchanged,
        }
    }
}

#[derive(Debug)]
struct PendingWrite {
    stamp: u64,
    op: WriteOp,
    confirmed: bool,
}

/// Optimistic writes to one entity since its last settled value.
#[derive(Debug)]
struct WriteLog {
    base: Cached,
    writes: Vec<PendingWrite>,
}

impl WriteLog {
    /// Fold the writes over the base. A stored row replaces everything before
    /// it, so earlier writes still in flight are applied again on top.
    fn replay(&self) -> Cached {
        let mut value = self.base.clone();
        for (index, write) in self.writes.iter().enumerate() {
            value = write.op.apply(value);
            if matches!(write.op, WriteOp::Stored(_)) {
                value = self
                    .writes
                    .iter()
                    .take(index)
                    .filter(|earlier| !earlier.confirmed)
                    .fold(value, |value, earlier| earlier.op.apply(value));
            }
        }
        value
    }

    fn is_settled(&self) -> bool {
        self.writes.iter().all(|write| write.confirmed)
    }
}

enum Outcome {
    /// The backend accepted the write, optionally returning the stored row.
    Confirmed(Option<WriteOp>),
    Failed,
}

struct Fetched {
    profile: Result<Option<Profile>, Error>,
    expenses: Result<Vec<UserRecord>, Error>,
    mileage_logs: Result<Vec<UserRecord>, Error>,
}

#[derive(Default)]
struct StoreInner {
    snapshot: Arc<StoreSnapshot>,
    /// Generation of the most recently started fetch cycle.
    loads_started: u64,
    installs: u64,
    in_flight: Option<LoadFuture>,
    revision: u64,
    /// Unsettled optimistic writes per entity.
    writes: HashMap<EntityKey, WriteLog>,
}

impl StoreInner {
    /// Log `op` against `key` and return its stamp. The first unsettled write
    /// captures the entity's current value as the base to rebuild from.
    fn log_write(&mut self, key: EntityKey, op: WriteOp) -> u64 {
        self.revision += 1;
        let base = key.read(&self.snapshot);
        self.writes
            .entry(key)
            .or_insert_with(|| WriteLog {
                base,
                writes: Vec::new(),
            })
            .writes
            .push(PendingWrite {
                stamp: self.revision,
                op,
                confirmed: false,
            });
        self.revision
    }
}

struct StoreState {
    inner: Mutex<StoreInner>,
    observers: SharedRegistry,
}

impl StoreState {
    fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            observers: Arc::new(Mutex::new(SubscriberRegistry::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in `next` and notify selectors. Callers hold the store lock, so
    /// observers see replacements in order.
    fn publish(&self, inner: &mut StoreInner, next: StoreSnapshot) -> Arc<StoreSnapshot> {
        inner.snapshot = Arc::new(next);
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .notify(&inner.snapshot);
        Arc::clone(&inner.snapshot)
    }

    /// Settle the write `stamp` on `key` and publish the rebuilt entity.
    ///
    /// A failed write drops out of the log, so the entity becomes its base
    /// value plus every write that has not failed. Writes whose log was
    /// discarded by a reload or sign-out are ignored.
    fn resolve(&self, key: EntityKey, stamp: u64, outcome: Outcome) {
        let mut inner = self.lock();
        let Some(log) = inner.writes.get_mut(&key) else {
            debug!(?key, stamp, "write log superseded; nothing to settle");
            return;
        };
        let Some(position) = log.writes.iter().position(|write| write.stamp == stamp) else {
            return;
        };
        match outcome {
            Outcome::Confirmed(stored) => {
                if let Some(write) = log.writes.get_mut(position) {
                    write.confirmed = true;
                    if let Some(op) = stored {
                        write.op = op;
                    }
                }
            }
            Outcome::Failed => {
                log.writes.remove(position);
                warn!(?key, stamp, "reverted failed optimistic write");
            }
        }
        let value = log.replay();
        if log.is_settled() {
            inner.writes.remove(&key);
        }
        if key.read(&inner.snapshot) == value {
            return;
        }
        let mut next = (*inner.snapshot).clone();
        key.write(&mut next, value);
        self.publish(&mut inner, next);
    }

    fn install(&self, generation: u64, fetched: Fetched) -> Option<Arc<StoreSnapshot>> {
        let mut inner = self.lock();
        if generation != inner.loads_started {
            debug!(
                generation,
                latest = inner.loads_started,
                "discarding superseded load"
            );
            return None;
        }

        let mut next = (*inner.snapshot).clone();
        next.lifecycle = Lifecycle::Ready;
        next.load_errors.clear();
        let mut replaced = Vec::with_capacity(3);

        match fetched.profile {
            Ok(profile) => {
                next.profile = profile;
                replaced.push(Collection::Profiles);
            }
            Err(error) => record_failure(&mut next, Collection::Profiles, error),
        }
        for (kind, result) in [
            (RecordKind::Expense, fetched.expenses),
            (RecordKind::Mileage, fetched.mileage_logs),
        ] {
            match result {
                Ok(records) => {
                    *next.records_mut(kind) = records;
                    replaced.push(kind.collection());
                }
                Err(error) => record_failure(&mut next, kind.collection(), error),
            }
        }

        // Fetched data is ground truth: pending writes to replaced
        // collections may no longer rebuild over it.
        inner
            .writes
            .retain(|key, _| !replaced.contains(&key.collection()));
        inner.in_flight = None;
        inner.installs += 1;
        debug!(
            generation,
            failed = next.load_errors.len(),
            "installed fetch cycle"
        );
        Some(self.publish(&mut inner, next))
    }

    /// Recover from a fetch task that died without installing.
    fn abandon(&self, generation: u64) {
        let mut inner = self.lock();
        if generation != inner.loads_started {
            return;
        }
        inner.in_flight = None;
        let mut next = (*inner.snapshot).clone();
        next.lifecycle = if inner.installs > 0 {
            Lifecycle::Ready
        } else {
            Lifecycle::Uninitialized
        };
        self.publish(&mut inner, next);
    }
}

fn record_failure(next: &mut StoreSnapshot, collection: Collection, error: Error) {
    warn!(
        %collection,
        code = %error.code(),
        "collection failed to load; keeping cached rows: {error}"
    );
    next.load_errors.insert(collection, error);
}

async fn fetch_profile<G: RemoteGateway>(
    gateway: &G,
    user_id: &UserId,
) -> Result<Option<Profile>, Error> {
    match gateway.fetch_one(Collection::Profiles, user_id.as_ref()).await {
        Ok(row) => Profile::from_row(row).map(Some),
        Err(GatewayError::NotFound { .. }) => Ok(None),
        Err(error) => Err(error.into()),
    }
}

async fn fetch_records<G: RemoteGateway>(
    gateway: &G,
    kind: RecordKind,
) -> Result<Vec<UserRecord>, Error> {
    let collection = kind.collection();
    let rows = gateway
        .fetch_collection(collection, collection.default_order())
        .await?;
    let mut records = rows
        .into_iter()
        .map(|row| UserRecord::from_row(kind, row))
        .collect::<Result<Vec<_>, _>>()?;
    sort_newest_first(&mut records);
    Ok(records)
}

async fn fetch_all<G: RemoteGateway>(gateway: &G, user_id: &UserId) -> Fetched {
    let (profile, expenses, mileage_logs) = futures_util::join!(
        fetch_profile(gateway, user_id),
        fetch_records(gateway, RecordKind::Expense),
        fetch_records(gateway, RecordKind::Mileage),
    );
    Fetched {
        profile,
        expenses,
        mileage_logs,
    }
}

/// Process-wide cache of one user's domain data.
///
/// Construct one per signed-in user and share it behind an `Arc`.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use ledger_store::domain::{DomainStore, UserId};
/// # use ledger_store::outbound::memory::InMemoryGateway;
/// # async fn demo() {
/// let store = DomainStore::new(Arc::new(InMemoryGateway::new()), UserId::random());
/// let snapshot = store.initialize().await;
/// assert!(snapshot.is_ready());
/// # }
/// ```
pub struct DomainStore<G> {
    gateway: Arc<G>,
    user_id: UserId,
    categories: Arc<ReferenceCache<G>>,
    state: Arc<StoreState>,
}

impl<G> DomainStore<G> {
    /// Create a store with its own reference cache over the same gateway.
    pub fn new(gateway: Arc<G>, user_id: UserId) -> Self {
        let categories = Arc::new(ReferenceCache::new(Arc::clone(&gateway)));
        Self::with_reference_cache(gateway, user_id, categories)
    }

    /// Create a store that validates category codes against a shared cache.
    pub fn with_reference_cache(
        gateway: Arc<G>,
        user_id: UserId,
        categories: Arc<ReferenceCache<G>>,
    ) -> Self {
        Self {
            gateway,
            user_id,
            categories,
            state: Arc::new(StoreState::new()),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// The category cache used for write-time validation.
    pub fn categories(&self) -> &Arc<ReferenceCache<G>> {
        &self.categories
    }

    /// The current snapshot. Never blocks on the network.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        Arc::clone(&self.state.lock().snapshot)
    }

    /// Subscribe to a slice of store state.
    ///
    /// `selector` runs on every snapshot replacement, under the store lock;
    /// it must be pure and must not call back into the store.
    pub fn select<S, F>(&self, selector: F) -> Subscription<S>
    where
        S: Clone + PartialEq + Send + Sync + 'static,
        F: Fn(&StoreSnapshot) -> S + Send + 'static,
    {
        let inner = self.state.lock();
        register_selector(&self.state.observers, &inner.snapshot, selector)
    }

    /// Number of live selector subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop all cached data and return to `Uninitialized`.
    ///
    /// In-flight loads are superseded; pending optimistic writes will not
    /// roll back into the cleared state.
    pub fn sign_out(&self) {
        let mut inner = self.state.lock();
        inner.loads_started += 1;
        inner.in_flight = None;
        inner.installs = 0;
        inner.writes.clear();
        debug!(user_id = %self.user_id, "signed out; store reset");
        self.state.publish(&mut inner, StoreSnapshot::default());
    }
}

impl<G> DomainStore<G>
where
    G: RemoteGateway + 'static,
{
    /// Load every collection once.
    ///
    /// No-op when the store is already ready; callers arriving while a load
    /// is running await that load. Per-collection failures are recorded in
    /// the snapshot's load errors rather than returned.
    pub async fn initialize(&self) -> Arc<StoreSnapshot> {
        let pending = {
            let mut inner = self.state.lock();
            if let Some(pending) = inner.in_flight.clone() {
                pending
            } else if inner.snapshot.is_ready() {
                return Arc::clone(&inner.snapshot);
            } else {
                self.start_cycle(&mut inner)
            }
        };
        self.settle(pending).await
    }

    /// Start a new fetch cycle unconditionally.
    ///
    /// The most recently started cycle wins; results of earlier cycles are
    /// dropped when they arrive.
    pub async fn reload(&self) -> Arc<StoreSnapshot> {
        let pending = {
            let mut inner = self.state.lock();
            self.start_cycle(&mut inner)
        };
        self.settle(pending).await
    }

    fn start_cycle(&self, inner: &mut StoreInner) -> LoadFuture {
        inner.loads_started += 1;
        let generation = inner.loads_started;
        if inner.snapshot.lifecycle() != Lifecycle::Loading {
            let mut next = (*inner.snapshot).clone();
            next.lifecycle = Lifecycle::Loading;
            self.state.publish(inner, next);
        }
        debug!(generation, user_id = %self.user_id, "starting fetch cycle");

        let gateway = Arc::clone(&self.gateway);
        let user_id = self.user_id.clone();
        let state = Arc::downgrade(&self.state);
        let task = tokio::spawn({
            let state = Weak::clone(&state);
            async move {
                let fetched = fetch_all(gateway.as_ref(), &user_id).await;
                state
                    .upgrade()
                    .and_then(|state| state.install(generation, fetched))
            }
        });

        let pending = async move {
            match task.await {
                Ok(installed) => installed,
                Err(error) => {
                    warn!(generation, "fetch cycle task failed: {error}");
                    if let Some(state) = state.upgrade() {
                        state.abandon(generation);
                    }
                    None
                }
            }
        }
        .boxed()
        .shared();
        inner.in_flight = Some(pending.clone());
        pending
    }

    /// Await `pending`, following newer cycles if it was superseded.
    async fn settle(&self, mut pending: LoadFuture) -> Arc<StoreSnapshot> {
        loop {
            if let Some(installed) = pending.clone().await {
                return installed;
            }
            pending = {
                let inner = self.state.lock();
                match &inner.in_flight {
                    Some(newer) if !Shared::ptr_eq(newer, &pending) => newer.clone(),
                    _ => return Arc::clone(&inner.snapshot),
                }
            };
        }
    }

    async fn ensure_category(&self, code: &CategoryCode) -> Result<(), Error> {
        let categories = self.categories.ensure_loaded().await?;
        if categories.lookup(code.as_str()).is_some() {
            return Ok(());
        }
        Err(
            Error::validation_failure(format!("unknown category code {code}")).with_details(
                json!({ "field": "category_code", "code": code.as_str() }),
            ),
        )
    }

    /// Patch the profile optimistically.
    ///
    /// # Errors
    ///
    /// Validation failure for an empty or invalid patch, `NotFound` when no
    /// profile is cached, or the mapped gateway error. On gateway failure the
    /// cached profile is rebuilt without this patch; concurrent patches that
    /// have not failed stay applied.
    pub async fn update_profile(&self, patch: ProfilePatch) -> Result<Profile, Error> {
        if patch.is_empty() {
            return Err(Error::validation_failure(
                "profile update must change at least one field",
            ));
        }

        let (owner, optimistic, stamp) = {
            let mut inner = self.state.lock();
            let Some(current) = inner.snapshot.profile().cloned() else {
                return Err(Error::not_found("no profile is loaded for this user"));
            };
            let optimistic = patch.apply_to(&current)?;
            let stamp = inner.log_write(EntityKey::Profile, WriteOp::Profile(patch.clone()));
            let mut next = (*inner.snapshot).clone();
            next.profile = Some(optimistic.clone());
            self.state.publish(&mut inner, next);
            (current.id, optimistic, stamp)
        };

        let result = self
            .gateway
            .patch(Collection::Profiles, owner.as_ref(), patch.to_fields())
            .await;
        match result {
            Ok(_) => {
                self.state
                    .resolve(EntityKey::Profile, stamp, Outcome::Confirmed(None));
                Ok(optimistic)
            }
            Err(error) => {
                self.state.resolve(EntityKey::Profile, stamp, Outcome::Failed);
                Err(error.into())
            }
        }
    }

    /// Create a record. The cache is updated only once the backend confirms
    /// the insert and assigns an id.
    ///
    /// # Errors
    ///
    /// Validation failure for invalid drafts or unknown category codes, or
    /// the mapped gateway error.
    pub async fn create_record(&self, draft: RecordDraft) -> Result<UserRecord, Error> {
        draft.validate()?;
        if let Some(code) = &draft.category {
            self.ensure_category(code).await?;
        }

        let kind = draft.kind();
        let row = self
            .gateway
            .insert(kind.collection(), draft.to_fields(&self.user_id))
            .await?;
        let record = UserRecord::from_row(kind, row)?;

        let mut inner = self.state.lock();
        if inner.snapshot.lifecycle() == Lifecycle::Uninitialized {
            debug!(id = %record.id, "store reset during insert; not caching record");
            return Ok(record);
        }
        let mut next = (*inner.snapshot).clone();
        reposition(next.records_mut(kind), record.clone());
        self.state.publish(&mut inner, next);
        Ok(record)
    }

    /// Patch a record optimistically; on success the cached copy becomes the
    /// row the backend returned.
    ///
    /// # Errors
    ///
    /// Validation failure for empty or invalid patches and unknown category
    /// codes, `NotFound` when the record is not cached, or the mapped gateway
    /// error.
    pub async fn update_record(
        &self,
        kind: RecordKind,
        id: RecordId,
        patch: RecordPatch,
    ) -> Result<UserRecord, Error> {
        if patch.is_empty() {
            return Err(Error::validation_failure(
                "record update must change at least one field",
            ));
        }
        if let Some(code) = patch.assigned_category() {
            self.ensure_category(code).await?;
        }

        let key = EntityKey::Record(kind, id);
        let (optimistic, stamp) = {
            let mut inner = self.state.lock();
            let Some(current) = inner.snapshot.record(kind, id).cloned() else {
                return Err(record_not_found(kind, id));
            };
            let optimistic = patch.apply_to(&current)?;
            let stamp = inner.log_write(key, WriteOp::Record(patch.clone()));
            let mut next = (*inner.snapshot).clone();
            reposition(next.records_mut(kind), optimistic.clone());
            self.state.publish(&mut inner, next);
            (optimistic, stamp)
        };

        let result = self
            .gateway
            .patch(kind.collection(), &id.to_string(), patch.to_fields())
            .await;
        match result {
            Ok(row) => match UserRecord::from_row(kind, row) {
                Ok(confirmed) => {
                    let stored = WriteOp::Stored(confirmed.clone());
                    self.state
                        .resolve(key, stamp, Outcome::Confirmed(Some(stored)));
                    Ok(confirmed)
                }
                Err(error) => {
                    warn!(%id, "confirmed row failed to decode; keeping local copy: {error}");
                    self.state.resolve(key, stamp, Outcome::Confirmed(None));
                    Ok(optimistic)
                }
            },
            Err(error) => {
                self.state.resolve(key, stamp, Outcome::Failed);
                Err(error.into())
            }
        }
    }

    /// Delete a record optimistically. A record the backend no longer has
    /// counts as deleted.
    ///
    /// # Errors
    ///
    /// `NotFound` when the record is not cached, or the mapped gateway error;
    /// on failure the record is restored in date order.
    pub async fn delete_record(&self, kind: RecordKind, id: RecordId) -> Result<(), Error> {
        let key = EntityKey::Record(kind, id);
        let stamp = {
            let mut inner = self.state.lock();
            if inner.snapshot.record(kind, id).is_none() {
                return Err(record_not_found(kind, id));
            }
            let stamp = inner.log_write(key, WriteOp::Delete);
            let mut next = (*inner.snapshot).clone();
            next.records_mut(kind).retain(|record| record.id != id);
            self.state.publish(&mut inner, next);
            stamp
        };

        match self.gateway.delete(kind.collection(), &id.to_string()).await {
            Ok(()) | Err(GatewayError::NotFound { .. }) => {
                self.state.resolve(key, stamp, Outcome::Confirmed(None));
                Ok(())
            }
            Err(error) => {
                self.state.resolve(key, stamp, Outcome::Failed);
                Err(error.into())
            }
        }
    }
}

fn record_not_found(kind: RecordKind, id: RecordId) -> Error {
    let collection = kind.collection();
    Error::not_found(format!("no cached {collection} record with id {id}"))
        .with_details(json!({ "collection": collection.as_str(), "id": id }))
}

/// Replace the record with `record.id`, keeping newest-first order.
fn reposition(records: &mut Vec<UserRecord>, record: UserRecord) {
    records.retain(|existing| existing.id != record.id);
    let position = sorted_position(records, record.occurred_at);
    records.insert(position, record);
}

#[cfg(test)]
#[path = "domain_store_tests.rs"]
mod tests;
