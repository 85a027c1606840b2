//! Backend collection names, ordering keys, and the raw row type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::Error;

/// A raw backend row: a JSON object keyed by snake_case column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Collections the store reads from and writes to.
///
/// # Examples
///
/// ```
/// # use ledger_store::domain::Collection;
/// assert_eq!(Collection::MileageLogs.as_str(), "mileage_logs");
/// assert_eq!("expenses".parse::<Collection>(), Ok(Collection::Expenses));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// One profile row per user, keyed by the user id.
    Profiles,
    /// Category taxonomy shared by all users.
    ExpenseCategories,
    /// Money-valued user records.
    Expenses,
    /// Distance-valued user records.
    MileageLogs,
}

impl Collection {
    /// Every collection, in declaration order.
    pub const ALL: [Self; 4] = [
        Self::Profiles,
        Self::ExpenseCategories,
        Self::Expenses,
        Self::MileageLogs,
    ];

    /// Returns the backend table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::ExpenseCategories => "expense_categories",
            Self::Expenses => "expenses",
            Self::MileageLogs => "mileage_logs",
        }
    }

    /// Ordering the store requests when fetching the whole collection.
    pub fn default_order(&self) -> Option<OrderKey> {
        match self {
            Self::Profiles => None,
            Self::ExpenseCategories => Some(OrderKey::ascending("sort_order")),
            Self::Expenses | Self::MileageLogs => Some(OrderKey::descending("occurred_at")),
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown collection name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown collection: {input}")]
pub struct ParseCollectionError {
    /// The unrecognised input value.
    pub input: String,
}

impl std::str::FromStr for Collection {
    type Err = ParseCollectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str() == s)
            .ok_or_else(|| ParseCollectionError {
                input: s.to_owned(),
            })
    }
}

/// Sort direction for an [`OrderKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// PostgREST-style suffix (`asc`/`desc`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

/// Column and direction a collection fetch is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderKey {
    pub column: &'static str,
    pub direction: SortDirection,
}

impl OrderKey {
    /// Order by `column` ascending.
    pub const fn ascending(column: &'static str) -> Self {
        Self {
            column,
            direction: SortDirection::Ascending,
        }
    }

    /// Order by `column` descending.
    pub const fn descending(column: &'static str) -> Self {
        Self {
            column,
            direction: SortDirection::Descending,
        }
    }
}

/// Decode a backend row into a domain type, reporting malformed rows as
/// validation failures tagged with their collection.
pub(crate) fn decode_row<T: DeserializeOwned>(collection: Collection, row: Row) -> Result<T, Error> {
    serde_json::from_value(serde_json::Value::Object(row)).map_err(|err| {
        Error::validation_failure(format!("malformed {collection} row: {err}"))
            .with_details(json!({ "collection": collection.as_str() }))
    })
}
