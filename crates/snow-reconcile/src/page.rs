//! Page driver capability consumed by the reconciler

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snow_core::{LookupKind, PageError, Record, TargetProfile};

/// What to type into the user search box
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum SearchCriterion {
    EmployeeId(String),
    Email(String),
    Username(String),
}

impl SearchCriterion {
    pub fn value(&self) -> &str {
        match self {
            Self::EmployeeId(v) | Self::Email(v) | Self::Username(v) => v,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::EmployeeId(_) => "employee_id",
            Self::Email(_) => "email",
            Self::Username(_) => "username",
        }
    }
}

impl std::fmt::Display for SearchCriterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.value())
    }
}

/// A row in a lookup dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRow {
    pub label: String,
}

/// An open company/project lookup dialog
#[async_trait]
pub trait LookupSession: Send {
    /// Find the row whose label matches `text`
    async fn find(&mut self, text: &str) -> Result<Option<LookupRow>, PageError>;

    /// Pick a row, closing the dialog
    async fn select(&mut self, row: &LookupRow) -> Result<(), PageError>;

    /// Create a new entry from `(name, value)` pairs
    async fn create_new(&mut self, fields: &[(String, String)]) -> Result<(), PageError>;
}

/// Trait for driving the user pages of the application (allows in-memory pages in tests)
///
/// Every call blocks until the page reaches the expected condition or its own
/// timeout fires. The session has one focus, so `&mut self` keeps calls ordered.
#[async_trait]
pub trait PageDriver: Send {
    type Lookup: LookupSession;

    /// Run a user search
    async fn search(&mut self, criterion: &SearchCriterion) -> Result<(), PageError>;

    /// Rows currently shown for the last search
    async fn list_matches(&mut self) -> Result<Vec<Record>, PageError>;

    /// Focus a result row so its form can be edited
    async fn open_record(&mut self, record: &Record) -> Result<(), PageError>;

    /// Overwrite the value of the input at `locator` on the focused form
    async fn edit_field(&mut self, locator: &str, value: &str) -> Result<(), PageError>;

    /// Fill and submit the new-user form
    async fn create_record(
        &mut self,
        profile: &TargetProfile,
        username: &str,
    ) -> Result<(), PageError>;

    /// Literal error messages currently shown on the page
    async fn pending_errors(&mut self) -> Result<Vec<String>, PageError>;

    /// Open the company or project lookup dialog of the focused form
    async fn open_lookup(&mut self, kind: LookupKind) -> Result<Self::Lookup, PageError>;
}
