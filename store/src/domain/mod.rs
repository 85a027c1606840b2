//! Domain primitives, aggregates, and the store built on them.
//!
//! Purpose: hold the signed-in user's data in memory and keep it consistent
//! with the backend reachable through [`ports::RemoteGateway`]. Types are
//! immutable once published; invariants are documented on each type.
//!
//! Public surface:
//! - [`DomainStore`]: profile and record cache with optimistic writes.
//! - [`ReferenceCache`]: indexed category taxonomy.
//! - [`Subscription`]: change-filtered view of a slice of store state.
//! - [`Error`] / [`ErrorCode`]: outcome of every failed operation.

pub mod error;
pub mod ports;

mod category;
mod collection;
mod domain_store;
mod identity;
mod profile;
mod record;
mod reference_cache;
mod snapshot;
mod subscription;

pub use self::category::{
    CategoryCode, CategoryValidationError, ReferenceCategory, ReferenceCategoryDraft,
};
pub use self::collection::{Collection, OrderKey, ParseCollectionError, Row, SortDirection};
pub use self::domain_store::DomainStore;
pub use self::error::{Error, ErrorCode, ErrorValidationError};
pub use self::identity::{
    DISPLAY_NAME_MAX, DISPLAY_NAME_MIN, DisplayName, IdentityValidationError, RecordId, UserId,
};
pub use self::profile::{
    ParseUnitSystemError, Profile, ProfileBuilder, ProfilePatch, RegionCode,
    RegionCodeValidationError, UnitSystem,
};
pub use self::record::{Measure, RecordDraft, RecordKind, RecordPatch, UserRecord};
pub use self::reference_cache::{ReferenceCache, ReferenceSnapshot};
pub use self::snapshot::{Lifecycle, StoreSnapshot};
pub use self::subscription::{Subscription, SubscriptionId};
