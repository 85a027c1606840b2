//! Category taxonomy cache.
//!
//! The taxonomy is fetched once, sorted by `sort_order`, and indexed by code.
//! Readers get O(1) lookups and ordered filters over an immutable
//! [`ReferenceSnapshot`]. Concurrent loads share one in-flight request, and a
//! failed load leaves the previous snapshot in place.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use serde_json::json;
use tracing::{debug, warn};

use super::ports::RemoteGateway;
use super::{CategoryCode, Collection, Error, ReferenceCategory};

/// Immutable, indexed view of one taxonomy load.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReferenceSnapshot {
    entries: Vec<ReferenceCategory>,
    index: HashMap<CategoryCode, usize>,
}

impl ReferenceSnapshot {
    /// Build a snapshot from categories in gateway order.
    ///
    /// Entries are sorted stably by `sort_order`, so ties keep the order they
    /// arrived in.
    ///
    /// # Errors
    ///
    /// Returns a validation failure naming the first duplicated code.
    pub fn from_categories(mut entries: Vec<ReferenceCategory>) -> Result<Self, Error> {
        entries.sort_by_key(ReferenceCategory::sort_order);

        let mut index = HashMap::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if index.insert(entry.code().clone(), position).is_some() {
                return Err(Error::validation_failure(format!(
                    "duplicate category code {}",
                    entry.code()
                ))
                .with_details(json!({
                    "collection": Collection::ExpenseCategories.as_str(),
                    "code": entry.code().as_str(),
                })));
            }
        }

        Ok(Self { entries, index })
    }

    pub fn lookup(&self, code: &str) -> Option<&ReferenceCategory> {
        self.index
            .get(code)
            .and_then(|position| self.entries.get(*position))
    }

    /// Entries satisfying `predicate`, in load order.
    pub fn filter<P>(&self, predicate: P) -> Vec<&ReferenceCategory>
    where
        P: Fn(&ReferenceCategory) -> bool,
    {
        self.entries.iter().filter(|entry| predicate(entry)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReferenceCategory> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<ReferenceSnapshot>, Error>>>;

#[derive(Default)]
struct ReferenceState {
    snapshot: Option<Arc<ReferenceSnapshot>>,
    in_flight: Option<LoadFuture>,
}

fn lock(state: &Mutex<ReferenceState>) -> MutexGuard<'_, ReferenceState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lazily loaded, process-wide category cache.
pub struct ReferenceCache<G> {
    gateway: Arc<G>,
    state: Arc<Mutex<ReferenceState>>,
}

impl<G> ReferenceCache<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            state: Arc::new(Mutex::new(ReferenceState::default())),
        }
    }

    /// The installed snapshot, if any load has succeeded.
    pub fn snapshot(&self) -> Option<Arc<ReferenceSnapshot>> {
        lock(&self.state).snapshot.clone()
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.state).snapshot.is_some()
    }

    /// Look up a category by code. Unknown codes, and an unloaded cache,
    /// yield `None`.
    pub fn lookup(&self, code: &str) -> Option<ReferenceCategory> {
        self.snapshot()
            .and_then(|snapshot| snapshot.lookup(code).cloned())
    }

    /// Categories satisfying `predicate`, in load order.
    pub fn filter<P>(&self, predicate: P) -> Vec<ReferenceCategory>
    where
        P: Fn(&ReferenceCategory) -> bool,
    {
        self.snapshot()
            .map(|snapshot| snapshot.filter(predicate).into_iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl<G> ReferenceCache<G>
where
    G: RemoteGateway + 'static,
{
    /// Fetch the taxonomy and replace the snapshot wholesale.
    ///
    /// Callers arriving while a load is running await that load instead of
    /// issuing another request.
    pub async fn load(&self) -> Result<Arc<ReferenceSnapshot>, Error> {
        let pending = {
            let mut state = lock(&self.state);
            match &state.in_flight {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.start_load();
                    state.in_flight = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }

    /// Return the installed snapshot, loading only if none exists yet.
    pub async fn ensure_loaded(&self) -> Result<Arc<ReferenceSnapshot>, Error> {
        match self.snapshot() {
            Some(snapshot) => Ok(snapshot),
            None => self.load().await,
        }
    }

    fn start_load(&self) -> LoadFuture {
        let gateway = Arc::clone(&self.gateway);
        let state = Arc::downgrade(&self.state);
        debug!("loading category taxonomy");
        async move {
            let result = fetch_snapshot(gateway.as_ref()).await;
            install(&state, &result);
            result
        }
        .boxed()
        .shared()
    }
}

async fn fetch_snapshot<G: RemoteGateway>(gateway: &G) -> Result<Arc<ReferenceSnapshot>, Error> {
    let collection = Collection::ExpenseCategories;
    let rows = gateway
        .fetch_collection(collection, collection.default_order())
        .await?;
    let entries = rows
        .into_iter()
        .map(ReferenceCategory::from_row)
        .collect::<Result<Vec<_>, _>>()?;
    ReferenceSnapshot::from_categories(entries).map(Arc::new)
}

fn install(state: &Weak<Mutex<ReferenceState>>, result: &Result<Arc<ReferenceSnapshot>, Error>) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut state = lock(&state);
    state.in_flight = None;
    match result {
        Ok(snapshot) => {
            debug!(entries = snapshot.len(), "installed category taxonomy");
            state.snapshot = Some(Arc::clone(snapshot));
        }
        Err(error) => {
            warn!(
                code = %error.code(),
                kept_previous = state.snapshot.is_some(),
                "category taxonomy load failed: {error}"
            );
        }
    }
}

#[cfg(test)]
#[path = "reference_cache_tests.rs"]
mod tests;
