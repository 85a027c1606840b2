//! Expense category reference entity.

use std::borrow::Borrow;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Error;
use super::collection::{Collection, Row, decode_row};

/// Validation errors raised while constructing reference categories.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CategoryValidationError {
    #[error("category code must match [A-Z0-9_]{{1,32}}, got {input:?}")]
    InvalidCode { input: String },
    #[error("category {code} must have a non-empty label")]
    EmptyLabel { code: String },
    #[error("category {code} has a blank report line")]
    BlankReportLine { code: String },
}

/// Unique code identifying a category, for example `FUEL` or `MEALS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CategoryCode(String);

static CATEGORY_CODE_RE: OnceLock<Regex> = OnceLock::new();

fn category_code_regex() -> &'static Regex {
    CATEGORY_CODE_RE.get_or_init(|| {
        Regex::new("^[A-Z0-9_]{1,32}$")
            .unwrap_or_else(|error| panic!("category code regex failed to compile: {error}"))
    })
}

impl CategoryCode {
    /// Validate and construct a category code.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ledger_store::domain::CategoryCode;
    /// assert!(CategoryCode::new("FUEL").is_ok());
    /// assert!(CategoryCode::new("fuel").is_err());
    /// ```
    pub fn new(code: impl Into<String>) -> Result<Self, CategoryValidationError> {
        let code = code.into();
        if category_code_regex().is_match(&code) {
            Ok(Self(code))
        } else {
            Err(CategoryValidationError::InvalidCode { input: code })
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for CategoryCode {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Borrow<str> for CategoryCode {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for CategoryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CategoryCode> for String {
    fn from(value: CategoryCode) -> Self {
        value.0
    }
}

impl TryFrom<String> for CategoryCode {
    type Error = CategoryValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Input payload for [`ReferenceCategory::new`]; mirrors an
/// `expense_categories` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCategoryDraft {
    pub code: CategoryCode,
    pub label: String,
    pub sort_order: i32,
    #[serde(default)]
    pub vehicle_related: bool,
    #[serde(default)]
    pub report_line: Option<String>,
}

/// One entry of the category taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceCategory {
    code: CategoryCode,
    label: String,
    sort_order: i32,
    vehicle_related: bool,
    report_line: Option<String>,
}

impl ReferenceCategory {
    /// Validate and construct a reference category.
    pub fn new(draft: ReferenceCategoryDraft) -> Result<Self, CategoryValidationError> {
        Self::try_from(draft)
    }

    /// Decode an `expense_categories` row.
    pub fn from_row(row: Row) -> Result<Self, Error> {
        decode_row(Collection::ExpenseCategories, row)
    }

    pub fn code(&self) -> &CategoryCode {
        &self.code
    }
    pub fn label(&self) -> &str {
        self.label.as_str()
    }
    pub fn sort_order(&self) -> i32 {
        self.sort_order
    }
    /// Whether the category feeds mileage calculations.
    pub fn vehicle_related(&self) -> bool {
        self.vehicle_related
    }
    /// Tax form line; `None` means not reportable there.
    pub fn report_line(&self) -> Option<&str> {
        self.report_line.as_deref()
    }
    pub fn is_reportable(&self) -> bool {
        self.report_line.is_some()
    }
}

impl TryFrom<ReferenceCategoryDraft> for ReferenceCategory {
    type Error = CategoryValidationError;

    fn try_from(draft: ReferenceCategoryDraft) -> Result<Self, Self::Error> {
        let label = draft.label.trim();
        if label.is_empty() {
            return Err(CategoryValidationError::EmptyLabel {
                code: draft.code.into(),
            });
        }
        if draft
            .report_line
            .as_deref()
            .is_some_and(|line| line.trim().is_empty())
        {
            return Err(CategoryValidationError::BlankReportLine {
                code: draft.code.into(),
            });
        }

        Ok(Self {
            label: label.to_owned(),
            code: draft.code,
            sort_order: draft.sort_order,
            vehicle_related: draft.vehicle_related,
            report_line: draft.report_line,
        })
    }
}

impl<'de> Deserialize<'de> for ReferenceCategory {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        ReferenceCategoryDraft::deserialize(deserializer)?
            .try_into()
            .map_err(serde::de::Error::custom)
    }
}
