//! User profile aggregate and its partial-update payload.
//!
//! A profile is created server-side at the end of onboarding; its absence
//! means onboarding is incomplete. This crate only ever patches it.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::collection::{Row, decode_row};
use super::{Collection, DisplayName, Error, UserId};

/// The unit system for distance display and mileage logs.
///
/// # Examples
///
/// ```
/// # use ledger_store::domain::UnitSystem;
/// assert_eq!(UnitSystem::default(), UnitSystem::Metric);
/// assert_eq!("imperial".parse::<UnitSystem>(), Ok(UnitSystem::Imperial));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnitSystem {
    /// Kilometres.
    #[default]
    Metric,
    /// Miles.
    Imperial,
}

impl UnitSystem {
    /// Returns the database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Imperial => "imperial",
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown unit system string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown unit system: {input}")]
pub struct ParseUnitSystemError {
    /// The unrecognised input value.
    pub input: String,
}

impl std::str::FromStr for UnitSystem {
    type Err = ParseUnitSystemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "metric" => Ok(Self::Metric),
            "imperial" => Ok(Self::Imperial),
            _ => Err(ParseUnitSystemError {
                input: s.to_owned(),
            }),
        }
    }
}

/// Jurisdiction code: an ISO-3166 country (`US`) optionally followed by a
/// subdivision (`US-CA`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionCode(String);

/// Validation error for [`RegionCode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("region code must look like `CC` or `CC-SUB`, got {input:?}")]
pub struct RegionCodeValidationError {
    pub input: String,
}

static REGION_CODE_RE: OnceLock<Regex> = OnceLock::new();

fn region_code_regex() -> &'static Regex {
    REGION_CODE_RE.get_or_init(|| {
        Regex::new("^[A-Z]{2}(-[A-Z0-9]{1,3})?$")
            .unwrap_or_else(|error| panic!("region code regex failed to compile: {error}"))
    })
}

impl RegionCode {
    /// Validate and construct a region code.
    pub fn new(value: impl Into<String>) -> Result<Self, RegionCodeValidationError> {
        let value = value.into();
        if region_code_regex().is_match(&value) {
            Ok(Self(value))
        } else {
            Err(RegionCodeValidationError { input: value })
        }
    }

    /// The country part of the code.
    pub fn country(&self) -> &str {
        self.0.split('-').next().unwrap_or(self.0.as_str())
    }
}

impl AsRef<str> for RegionCode {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<RegionCode> for String {
    fn from(value: RegionCode) -> Self {
        value.0
    }
}

impl TryFrom<String> for RegionCode {
    type Error = RegionCodeValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// The signed-in user's profile.
///
/// Deserialises directly from a `profiles` row; unknown columns are ignored
/// so backend additions do not break decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Owning user; also the row id.
    pub id: UserId,
    /// Tax jurisdiction.
    pub region: RegionCode,
    /// Name shown in the app.
    pub display_name: DisplayName,
    /// Optional trading name.
    #[serde(default)]
    pub business_name: Option<String>,
    /// Display unit for distances.
    #[serde(default)]
    pub unit_system: UnitSystem,
    /// Last server-side modification.
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Start building a profile for `id`.
    pub fn builder(id: UserId, region: RegionCode, display_name: DisplayName) -> ProfileBuilder {
        ProfileBuilder::new(id, region, display_name)
    }

    /// Decode a `profiles` row.
    pub fn from_row(row: Row) -> Result<Self, Error> {
        decode_row(Collection::Profiles, row)
    }
}

/// Builder for constructing [`Profile`] values.
#[derive(Debug, Clone)]
pub struct ProfileBuilder {
    id: UserId,
    region: RegionCode,
    display_name: DisplayName,
    business_name: Option<String>,
    unit_system: UnitSystem,
    updated_at: Option<DateTime<Utc>>,
}

impl ProfileBuilder {
    fn new(id: UserId, region: RegionCode, display_name: DisplayName) -> Self {
        Self {
            id,
            region,
            display_name,
            business_name: None,
            unit_system: UnitSystem::default(),
            updated_at: None,
        }
    }

    /// Set the trading name.
    pub fn business_name(mut self, name: impl Into<String>) -> Self {
        self.business_name = Some(name.into());
        self
    }

    /// Set the unit system.
    pub fn unit_system(mut self, system: UnitSystem) -> Self {
        self.unit_system = system;
        self
    }

    /// Set the updated timestamp.
    pub fn updated_at(mut self, ts: DateTime<Utc>) -> Self {
        self.updated_at = Some(ts);
        self
    }

    /// Build the final [`Profile`].
    pub fn build(self) -> Profile {
        Profile {
            id: self.id,
            region: self.region,
            display_name: self.display_name,
            business_name: self.business_name,
            unit_system: self.unit_system,
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Partial profile update. `None` leaves a field untouched.
///
/// `business_name` is doubly optional: `Some(None)` clears the name.
///
/// # Examples
///
/// ```
/// # use ledger_store::domain::{ProfilePatch, UnitSystem};
/// let patch = ProfilePatch::default().with_unit_system(UnitSystem::Imperial);
/// assert!(!patch.is_empty());
/// assert!(ProfilePatch::default().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePatch {
    pub region: Option<RegionCode>,
    pub display_name: Option<DisplayName>,
    pub business_name: Option<Option<String>>,
    pub unit_system: Option<UnitSystem>,
}

impl ProfilePatch {
    /// Change the region.
    pub fn with_region(mut self, region: RegionCode) -> Self {
        self.region = Some(region);
        self
    }

    /// Change the display name.
    pub fn with_display_name(mut self, name: DisplayName) -> Self {
        self.display_name = Some(name);
        self
    }

    /// Set or clear the business name.
    pub fn with_business_name(mut self, name: Option<String>) -> Self {
        self.business_name = Some(name);
        self
    }

    /// Change the unit system.
    pub fn with_unit_system(mut self, system: UnitSystem) -> Self {
        self.unit_system = Some(system);
        self
    }

    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.region.is_none()
            && self.display_name.is_none()
            && self.business_name.is_none()
            && self.unit_system.is_none()
    }

    /// Produce the patched profile without touching `profile`.
    ///
    /// # Errors
    ///
    /// Returns a validation failure when the patch is empty or sets a blank
    /// business name.
    pub fn apply_to(&self, profile: &Profile) -> Result<Profile, Error> {
        if self.is_empty() {
            return Err(Error::validation_failure(
                "profile update must change at least one field",
            ));
        }
        if let Some(Some(name)) = &self.business_name {
            if name.trim().is_empty() {
                return Err(Error::validation_failure("business name must not be blank")
                    .with_details(json!({ "field": "business_name" })));
            }
        }

        let mut next = profile.clone();
        if let Some(region) = &self.region {
            next.region = region.clone();
        }
        if let Some(name) = &self.display_name {
            next.display_name = name.clone();
        }
        if let Some(business_name) = &self.business_name {
            next.business_name = business_name.clone();
        }
        if let Some(unit_system) = self.unit_system {
            next.unit_system = unit_system;
        }
        Ok(next)
    }

    /// Serialise only the fields this patch sets, as backend columns.
    pub fn to_fields(&self) -> Row {
        let mut fields = Row::new();
        if let Some(region) = &self.region {
            fields.insert("region".to_owned(), Value::from(region.as_ref()));
        }
        if let Some(name) = &self.display_name {
            fields.insert("display_name".to_owned(), Value::from(name.as_ref()));
        }
        if let Some(business_name) = &self.business_name {
            fields.insert(
                "business_name".to_owned(),
                business_name.clone().map_or(Value::Null, Value::from),
            );
        }
        if let Some(unit_system) = self.unit_system {
            fields.insert("unit_system".to_owned(), Value::from(unit_system.as_str()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    //! Coverage for profile decoding and patch semantics.

    use super::*;
    use rstest::{fixture, rstest};

    const USER_ID: &str = "11111111-1111-1111-1111-111111111111";

    #[fixture]
    fn profile() -> Profile {
        Profile::builder(
            UserId::new(USER_ID).expect("user id"),
            RegionCode::new("US-CA").expect("region"),
            DisplayName::new("Ada Lovelace").expect("display name"),
        )
        .business_name("Analytical Engines")
        .build()
    }

    #[rstest]
    #[case::country("GB", true)]
    #[case::subdivision("US-CA", true)]
    #[case::lowercase("us-ca", false)]
    #[case::long_country("USA", false)]
    #[case::empty("", false)]
    fn region_codes_follow_iso_shape(#[case] raw: &str, #[case] valid: bool) {
        assert_eq!(RegionCode::new(raw).is_ok(), valid);
    }

    #[rstest]
    fn region_country_strips_subdivision() {
        let region = RegionCode::new("US-NY").expect("region");
        assert_eq!(region.country(), "US");
    }

    #[rstest]
    fn decodes_profile_rows_ignoring_extra_columns() {
        let row = json!({
            "id": USER_ID,
            "region": "GB",
            "display_name": "Grace Hopper",
            "business_name": null,
            "unit_system": "imperial",
            "updated_at": "2026-01-02T03:04:05Z",
            "created_at": "2025-12-01T00:00:00Z"
        });
        let Value::Object(row) = row else {
            panic!("fixture must be an object");
        };

        let profile = Profile::from_row(row).expect("decode");
        assert_eq!(profile.region.as_ref(), "GB");
        assert_eq!(profile.unit_system, UnitSystem::Imperial);
        assert!(profile.business_name.is_none());
    }

    #[rstest]
    fn rejects_rows_with_invalid_region() {
        let Value::Object(row) = json!({
            "id": USER_ID,
            "region": "nowhere",
            "display_name": "Grace Hopper",
            "updated_at": "2026-01-02T03:04:05Z"
        }) else {
            panic!("fixture must be an object");
        };

        let error = Profile::from_row(row).expect_err("invalid region");
        assert_eq!(error.code(), crate::domain::ErrorCode::ValidationFailure);
    }

    #[rstest]
    fn empty_patch_is_rejected(profile: Profile) {
        let error = ProfilePatch::default()
            .apply_to(&profile)
            .expect_err("empty patch");
        assert_eq!(error.code(), crate::domain::ErrorCode::ValidationFailure);
    }

    #[rstest]
    fn patch_changes_only_named_fields(profile: Profile) {
        let patch = ProfilePatch::default().with_unit_system(UnitSystem::Imperial);
        let next = patch.apply_to(&profile).expect("apply");

        assert_eq!(next.unit_system, UnitSystem::Imperial);
        assert_eq!(next.display_name, profile.display_name);
        assert_eq!(next.business_name, profile.business_name);
        assert_eq!(next.updated_at, profile.updated_at);
    }

    #[rstest]
    fn patch_can_clear_business_name(profile: Profile) {
        let patch = ProfilePatch::default().with_business_name(None);
        let next = patch.apply_to(&profile).expect("apply");
        assert!(next.business_name.is_none());
        assert_eq!(patch.to_fields().get("business_name"), Some(&Value::Null));
    }

    #[rstest]
    fn blank_business_name_is_rejected(profile: Profile) {
        let patch = ProfilePatch::default().with_business_name(Some("  ".to_owned()));
        assert!(patch.apply_to(&profile).is_err());
    }

    #[rstest]
    fn fields_contain_only_set_columns() {
        let patch = ProfilePatch::default()
            .with_region(RegionCode::new("GB").expect("region"))
            .with_unit_system(UnitSystem::Metric);
        let fields = patch.to_fields();

        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("region"), Some(&json!("GB")));
        assert_eq!(fields.get("unit_system"), Some(&json!("metric")));
    }
}
