//! Immutable view of the store's cached state.

use std::collections::BTreeMap;

use super::{Collection, Error, Profile, RecordId, RecordKind, UserRecord};

/// Load lifecycle of the domain store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifecycle {
    /// Nothing has been requested yet, or the user signed out.
    #[default]
    Uninitialized,
    /// A fetch cycle is running.
    Loading,
    /// At least one fetch cycle has been installed.
    Ready,
}

/// One consistent view of everything the store caches.
///
/// Snapshots are replaced wholesale and never mutated once published, so a
/// consumer holding an `Arc<StoreSnapshot>` always sees data from a single
/// point in time.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreSnapshot {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) profile: Option<Profile>,
    pub(crate) expenses: Vec<UserRecord>,
    pub(crate) mileage_logs: Vec<UserRecord>,
    pub(crate) load_errors: BTreeMap<Collection, Error>,
}

impl StoreSnapshot {
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle == Lifecycle::Ready
    }

    pub fn is_loading(&self) -> bool {
        self.lifecycle == Lifecycle::Loading
    }

    /// The signed-in user's profile, if one exists.
    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    /// Whether onboarding has produced a profile.
    ///
    /// Only meaningful once the store is ready; a missing profile is not an
    /// error.
    pub fn onboarding_complete(&self) -> bool {
        self.profile.is_some()
    }

    /// Cached records of `kind`, newest first.
    pub fn records(&self, kind: RecordKind) -> &[UserRecord] {
        match kind {
            RecordKind::Expense => &self.expenses,
            RecordKind::Mileage => &self.mileage_logs,
        }
    }

    /// Look up one cached record.
    pub fn record(&self, kind: RecordKind, id: RecordId) -> Option<&UserRecord> {
        self.records(kind).iter().find(|record| record.id == id)
    }

    /// The failure recorded for `collection` by the latest fetch cycle.
    pub fn load_error(&self, collection: Collection) -> Option<&Error> {
        self.load_errors.get(&collection)
    }

    /// Every failure recorded by the latest fetch cycle.
    pub fn load_errors(&self) -> &BTreeMap<Collection, Error> {
        &self.load_errors
    }

    pub(crate) fn records_mut(&mut self, kind: RecordKind) -> &mut Vec<UserRecord> {
        match kind {
            RecordKind::Expense => &mut self.expenses,
            RecordKind::Mileage => &mut self.mileage_logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn default_snapshot_is_uninitialised_and_empty() {
        let snapshot = StoreSnapshot::default();
        assert_eq!(snapshot.lifecycle(), Lifecycle::Uninitialized);
        assert!(!snapshot.is_ready());
        assert!(!snapshot.onboarding_complete());
        assert!(snapshot.records(RecordKind::Expense).is_empty());
        assert!(snapshot.load_errors().is_empty());
    }

    #[rstest]
    fn load_errors_are_keyed_by_collection() {
        let mut snapshot = StoreSnapshot::default();
        snapshot
            .load_errors
            .insert(Collection::Expenses, Error::network_failure("offline"));

        assert!(snapshot.load_error(Collection::Expenses).is_some());
        assert!(snapshot.load_error(Collection::MileageLogs).is_none());
    }
}
