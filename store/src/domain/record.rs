//! User-owned records: expenses and mileage logs.
//!
//! Both collections share one shape and differ only in their measure: money
//! in minor currency units for expenses, tenths of a distance unit for
//! mileage. Rows are decoded through [`UserRecord::from_row`] and written back
//! as column maps built by [`RecordDraft::to_fields`] and
//! [`RecordPatch::to_fields`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use super::collection::{Collection, Row, decode_row};
use super::{CategoryCode, Error, RecordId, UnitSystem, UserId};

/// Which owned collection a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Expense,
    Mileage,
}

impl RecordKind {
    /// Both kinds, in the order the store fetches them.
    pub const ALL: [Self; 2] = [Self::Expense, Self::Mileage];

    /// Backend collection holding records of this kind.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Expense => Collection::Expenses,
            Self::Mileage => Collection::MileageLogs,
        }
    }
}

/// The quantity a record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Measure {
    /// Amount in minor currency units (cents).
    Money { minor_units: i64 },
    /// Distance in tenths of `unit`.
    Distance { tenths: u32, unit: UnitSystem },
}

impl Measure {
    /// The record kind this measure belongs to.
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Money { .. } => RecordKind::Expense,
            Self::Distance { .. } => RecordKind::Mileage,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        match *self {
            Self::Money { minor_units } if minor_units < 0 => Err(Error::validation_failure(
                "expense amount must not be negative",
            )
            .with_details(json!({ "field": "amount_minor" }))),
            Self::Distance { tenths: 0, .. } => Err(Error::validation_failure(
                "mileage distance must be positive",
            )
            .with_details(json!({ "field": "distance_tenths" }))),
            _ => Ok(()),
        }
    }

    fn write_fields(&self, fields: &mut Row) {
        match *self {
            Self::Money { minor_units } => {
                fields.insert("amount_minor".to_owned(), Value::from(minor_units));
            }
            Self::Distance { tenths, unit } => {
                fields.insert("distance_tenths".to_owned(), Value::from(tenths));
                fields.insert("unit_system".to_owned(), Value::from(unit.as_str()));
            }
        }
    }
}

/// A cached expense or mileage log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: RecordId,
    pub owner: UserId,
    pub kind: RecordKind,
    /// `None` means uncategorised.
    pub category: Option<CategoryCode>,
    pub measure: Measure,
    pub occurred_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordRow {
    id: RecordId,
    user_id: UserId,
    #[serde(default)]
    category_code: Option<CategoryCode>,
    #[serde(default)]
    amount_minor: Option<i64>,
    #[serde(default)]
    distance_tenths: Option<u32>,
    #[serde(default)]
    unit_system: Option<UnitSystem>,
    occurred_at: DateTime<Utc>,
    #[serde(default)]
    notes: Option<String>,
}

impl UserRecord {
    /// Decode a row from the collection backing `kind`.
    pub fn from_row(kind: RecordKind, row: Row) -> Result<Self, Error> {
        let collection = kind.collection();
        let raw: RecordRow = decode_row(collection, row)?;
        let measure = match kind {
            RecordKind::Expense => raw.amount_minor.map(|minor_units| Measure::Money { minor_units }),
            RecordKind::Mileage => raw.distance_tenths.map(|tenths| Measure::Distance {
                tenths,
                unit: raw.unit_system.unwrap_or_default(),
            }),
        }
        .ok_or_else(|| {
            Error::validation_failure(format!("malformed {collection} row: missing measure"))
                .with_details(json!({ "collection": collection.as_str(), "id": raw.id }))
        })?;

        Ok(Self {
            id: raw.id,
            owner: raw.user_id,
            kind,
            category: raw.category_code,
            measure,
            occurred_at: raw.occurred_at,
            notes: raw.notes,
        })
    }
}

/// Index at which a record stamped `occurred_at` belongs in a list kept in
/// descending `occurred_at` order. Equal timestamps keep insertion order.
pub(crate) fn sorted_position(records: &[UserRecord], occurred_at: DateTime<Utc>) -> usize {
    records.partition_point(|record| record.occurred_at >= occurred_at)
}

/// Sort records newest first, keeping the relative order of ties.
pub(crate) fn sort_newest_first(records: &mut [UserRecord]) {
    records.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
}

fn timestamp(value: DateTime<Utc>) -> Value {
    Value::from(value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

fn validate_notes(notes: Option<&str>) -> Result<(), Error> {
    match notes {
        Some(text) if text.trim().is_empty() => Err(Error::validation_failure(
            "notes must not be blank; clear them instead",
        )
        .with_details(json!({ "field": "notes" }))),
        _ => Ok(()),
    }
}

fn code_value(category: Option<&CategoryCode>) -> Value {
    category.map_or(Value::Null, |code| Value::from(code.as_str()))
}

/// A record to be created. The backend assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub category: Option<CategoryCode>,
    pub measure: Measure,
    pub occurred_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl RecordDraft {
    /// Draft an expense of `minor_units`.
    pub fn expense(minor_units: i64, occurred_at: DateTime<Utc>) -> Self {
        Self {
            category: None,
            measure: Measure::Money { minor_units },
            occurred_at,
            notes: None,
        }
    }

    /// Draft a mileage log of `tenths` tenths of `unit`.
    pub fn mileage(tenths: u32, unit: UnitSystem, occurred_at: DateTime<Utc>) -> Self {
        Self {
            category: None,
            measure: Measure::Distance { tenths, unit },
            occurred_at,
            notes: None,
        }
    }

    pub fn with_category(mut self, code: CategoryCode) -> Self {
        self.category = Some(code);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn kind(&self) -> RecordKind {
        self.measure.kind()
    }

    /// Check the draft's own fields. Category resolution is the store's job.
    pub fn validate(&self) -> Result<(), Error> {
        self.measure.validate()?;
        validate_notes(self.notes.as_deref())
    }

    /// Column map for an insert owned by `owner`.
    pub fn to_fields(&self, owner: &UserId) -> Row {
        let mut fields = Row::new();
        fields.insert("user_id".to_owned(), Value::from(owner.as_ref()));
        fields.insert(
            "category_code".to_owned(),
            code_value(self.category.as_ref()),
        );
        self.measure.write_fields(&mut fields);
        fields.insert("occurred_at".to_owned(), timestamp(self.occurred_at));
        fields.insert(
            "notes".to_owned(),
            self.notes.clone().map_or(Value::Null, Value::from),
        );
        fields
    }
}

/// Partial record update. `None` leaves a field untouched; the doubly
/// optional fields accept `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub category: Option<Option<CategoryCode>>,
    pub measure: Option<Measure>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub notes: Option<Option<String>>,
}

impl RecordPatch {
    pub fn with_category(mut self, code: Option<CategoryCode>) -> Self {
        self.category = Some(code);
        self
    }

    pub fn with_measure(mut self, measure: Measure) -> Self {
        self.measure = Some(measure);
        self
    }

    pub fn with_occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(occurred_at);
        self
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.measure.is_none()
            && self.occurred_at.is_none()
            && self.notes.is_none()
    }

    /// The category code this patch assigns, if it assigns one.
    pub fn assigned_category(&self) -> Option<&CategoryCode> {
        self.category.as_ref().and_then(Option::as_ref)
    }

    /// Produce the patched record without touching `record`.
    ///
    /// # Errors
    ///
    /// Validation failure for an empty patch, a measure of the wrong kind, or
    /// invalid field values.
    pub fn apply_to(&self, record: &UserRecord) -> Result<UserRecord, Error> {
        if self.is_empty() {
            return Err(Error::validation_failure(
                "record update must change at least one field",
            ));
        }
        if let Some(measure) = &self.measure {
            if measure.kind() != record.kind {
                return Err(Error::validation_failure(format!(
                    "cannot store a {:?} measure on a {:?} record",
                    measure.kind(),
                    record.kind
                )));
            }
            measure.validate()?;
        }
        if let Some(notes) = &self.notes {
            validate_notes(notes.as_deref())?;
        }

        let mut next = record.clone();
        if let Some(category) = &self.category {
            next.category = category.clone();
        }
        if let Some(measure) = self.measure {
            next.measure = measure;
        }
        if let Some(occurred_at) = self.occurred_at {
            next.occurred_at = occurred_at;
        }
        if let Some(notes) = &self.notes {
            next.notes = notes.clone();
        }
        Ok(next)
    }

    /// Serialise only the fields this patch sets.
    pub fn to_fields(&self) -> Row {
        let mut fields = Row::new();
        if let Some(category) = &self.category {
            fields.insert("category_code".to_owned(), code_value(category.as_ref()));
        }
        if let Some(measure) = &self.measure {
            measure.write_fields(&mut fields);
        }
        if let Some(occurred_at) = self.occurred_at {
            fields.insert("occurred_at".to_owned(), timestamp(occurred_at));
        }
        if let Some(notes) = &self.notes {
            fields.insert(
                "notes".to_owned(),
                notes.clone().map_or(Value::Null, Value::from),
            );
        }
        fields
    }
}
