//! Selector subscriptions over store snapshots.
//!
//! A consumer registers a selector: a pure function from a
//! [`StoreSnapshot`] to some derived value. Whenever the store publishes a
//! new snapshot the registry re-evaluates every selector and pushes the
//! result through a `watch` channel only when it differs from the value last
//! delivered. Consumers therefore never wake for changes outside their slice.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::watch;

use super::StoreSnapshot;

/// Identifier of a registered selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Something the registry feeds snapshots to.
pub(crate) trait Observer: Send {
    /// Evaluate against `snapshot`. Returns `false` once nobody is listening
    /// any more, which removes the observer.
    fn observe(&mut self, snapshot: &StoreSnapshot) -> bool;
}

struct SelectorObserver<S, F> {
    selector: F,
    sender: watch::Sender<S>,
}

impl<S, F> Observer for SelectorObserver<S, F>
where
    S: PartialEq + Send + Sync,
    F: Fn(&StoreSnapshot) -> S + Send,
{
    fn observe(&mut self, snapshot: &StoreSnapshot) -> bool {
        if self.sender.is_closed() {
            return false;
        }
        let next = (self.selector)(snapshot);
        self.sender.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        true
    }
}

/// Registered observers keyed by subscription id.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: u64,
    observers: HashMap<SubscriptionId, Box<dyn Observer>>,
}

impl SubscriberRegistry {
    pub(crate) fn register(&mut self, observer: Box<dyn Observer>) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.observers.insert(id, observer);
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        self.observers.remove(&id).is_some()
    }

    /// Feed `snapshot` to every observer, pruning the ones that report
    /// themselves dead.
    pub(crate) fn notify(&mut self, snapshot: &StoreSnapshot) {
        self.observers
            .retain(|_, observer| observer.observe(snapshot));
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("next_id", &self.next_id)
            .field("observers", &self.observers.len())
            .finish()
    }
}

pub(crate) type SharedRegistry = Arc<Mutex<SubscriberRegistry>>;

/// Register `selector` against `registry`, seeding it with `snapshot`.
///
/// Callers must prevent snapshot replacement between reading `snapshot` and
/// this call returning, or the first change can be missed.
pub(crate) fn register_selector<S, F>(
    registry: &SharedRegistry,
    snapshot: &StoreSnapshot,
    selector: F,
) -> Subscription<S>
where
    S: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&StoreSnapshot) -> S + Send + 'static,
{
    let (sender, receiver) = watch::channel(selector(snapshot));
    let observer = SelectorObserver { selector, sender };
    let id = registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register(Box::new(observer));

    Subscription {
        id,
        receiver,
        registry: Arc::downgrade(registry),
    }
}

/// Handle to a derived slice of store state.
///
/// Dropping the handle unregisters the selector.
pub struct Subscription<S> {
    id: SubscriptionId,
    receiver: watch::Receiver<S>,
    registry: Weak<Mutex<SubscriberRegistry>>,
}

impl<S: Clone> Subscription<S> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The most recently delivered value.
    pub fn current(&self) -> S {
        self.receiver.borrow().clone()
    }

    /// Whether a value has arrived that this handle has not yet seen through
    /// [`Subscription::changed`].
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Wait for the selected value to change and return it.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<S> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stop receiving updates.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl<S> Drop for Subscription<S> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(self.id);
        }
    }
}

impl<S> fmt::Debug for Subscription<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
