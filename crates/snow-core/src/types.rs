//! Core type definitions for user reconciliation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{Result, SnowError};

/// Generational suffixes dropped from names before usernames are derived
const NAME_SUFFIXES: &[&str] = &["jr", "sr", "ii", "iii", "iv", "v"];

/// The desired state of one user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetProfile {
    pub first_name: String,
    pub last_name: String,
    /// May carry an "unknown" marker
    #[serde(default)]
    pub employee_id: String,
    /// May carry an "unknown" marker
    #[serde(default)]
    pub email: String,
    pub division: String,
    pub customer_id: String,
    pub company: String,
    pub office_id: String,
    pub project_id: String,
    pub organization: String,
    pub office_location: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub requestor_email: String,
}

impl TargetProfile {
    /// Check the name invariant and return a copy with suffixes stripped from the names
    pub fn validate(&self) -> Result<Self> {
        let first_name = strip_name_suffix(&self.first_name);
        let last_name = strip_name_suffix(&self.last_name);

        if username_part(&first_name).is_empty() {
            return Err(SnowError::InvalidProfile(format!(
                "first name '{}' is empty after suffix stripping",
                self.first_name
            )));
        }
        if username_part(&last_name).is_empty() {
            return Err(SnowError::InvalidProfile(format!(
                "last name '{}' is empty after suffix stripping",
                self.last_name
            )));
        }

        Ok(Self {
            first_name,
            last_name,
            ..self.clone()
        })
    }

    /// Full display name
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
    }
}

/// Drop trailing generational suffixes ("Jr.", "III", ...) and stray punctuation
fn strip_name_suffix(name: &str) -> String {
    let mut words: Vec<&str> = name.split_whitespace().collect();

    while words.len() > 1 {
        let last = words[words.len() - 1]
            .trim_matches(|c: char| c == '.' || c == ',')
            .to_lowercase();
        if NAME_SUFFIXES.contains(&last.as_str()) {
            words.pop();
        } else {
            break;
        }
    }

    words
        .join(" ")
        .trim_end_matches(|c: char| c == ',' || c == '.')
        .to_string()
}

/// Lowercase a name for use in a username, keeping letters, digits and hyphens
fn username_part(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// A generated username: `first.last[suffix]@domain`
///
/// Suffix 0 is "unset" and renders no digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUsername {
    base: String,
    suffix: u32,
    domain: String,
}

impl CandidateUsername {
    /// Derive the unsuffixed candidate for a profile
    pub fn new(profile: &TargetProfile, domain: &str) -> Self {
        Self {
            base: format!(
                "{}.{}",
                username_part(&profile.first_name),
                username_part(&profile.last_name)
            ),
            suffix: 0,
            domain: domain.trim().trim_start_matches('@').to_lowercase(),
        }
    }

    /// Same base and domain, different suffix
    pub fn with_suffix(&self, suffix: u32) -> Self {
        Self {
            suffix,
            ..self.clone()
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn suffix(&self) -> u32 {
        self.suffix
    }

    /// Whether `name` is this candidate under any suffix
    pub fn accepts(&self, name: &str) -> bool {
        let name = name.trim().to_lowercase();
        let Some((local, domain)) = name.rsplit_once('@') else {
            return false;
        };
        domain == self.domain
            && local
                .strip_prefix(&self.base.to_lowercase())
                .is_some_and(|digits| digits.chars().all(|c| c.is_ascii_digit()))
    }
}

impl std::fmt::Display for CandidateUsername {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.suffix == 0 {
            write!(f, "{}@{}", self.base, self.domain)
        } else {
            write!(f, "{}{}@{}", self.base, self.suffix, self.domain)
        }
    }
}

/// A result row shown by the page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub display_text: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(display_text: impl Into<String>) -> Self {
        Self {
            display_text: display_text.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn display_text(&self) -> &str {
        &self.display_text
    }

    /// Value of a stored field; blank values read as absent
    pub fn read_field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// Editable user fields, in no particular order (order comes from the bindings)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    ProjectId,
    CustomerId,
    OfficeId,
    OfficeLocation,
    Division,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectId => "projectId",
            Self::CustomerId => "customerId",
            Self::OfficeId => "officeId",
            Self::OfficeLocation => "officeLocation",
            Self::Division => "division",
        }
    }

    /// The value the profile wants for this field
    pub fn target_value<'a>(&self, profile: &'a TargetProfile) -> &'a str {
        match self {
            Self::ProjectId => &profile.project_id,
            Self::CustomerId => &profile.customer_id,
            Self::OfficeId => &profile.office_id,
            Self::OfficeLocation => &profile.office_location,
            Self::Division => &profile.division,
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a reconciliation run currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Searching,
    Disambiguating,
    Reconciling,
    Creating,
    ErrorHandling,
    Verifying,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Searching => write!(f, "searching"),
            Self::Disambiguating => write!(f, "disambiguating"),
            Self::Reconciling => write!(f, "reconciling"),
            Self::Creating => write!(f, "creating"),
            Self::ErrorHandling => write!(f, "error_handling"),
            Self::Verifying => write!(f, "verifying"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Mutable state of one reconciliation run
///
/// Built fresh for every run and dropped when it ends.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationState {
    pub existing_user: bool,
    pub duplicate_user: bool,
    pub unique_suffix: u32,
    pub error_counter: u32,
    pub stop: bool,
    pub disambiguation_rounds: u32,
    highest_suffix: u32,
    phase: Phase,
}

impl ReconciliationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Move to another phase; terminal phases are sticky
    pub fn enter(&mut self, phase: Phase) {
        if self.phase.is_terminal() || self.phase == phase {
            return;
        }
        debug!("Reconciliation phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Issue the next username suffix
    ///
    /// Strictly greater than every suffix issued before in this run, even
    /// after [`reset_suffix`](Self::reset_suffix).
    pub fn advance_suffix(&mut self) -> u32 {
        let next = self.highest_suffix.max(self.unique_suffix) + 1;
        self.highest_suffix = next;
        self.unique_suffix = next;
        next
    }

    /// Forget the current suffix after a confirmed match
    pub fn reset_suffix(&mut self) {
        self.unique_suffix = 0;
    }
}

/// What a successful run did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationOutcome {
    pub created: bool,
    pub username: String,
    pub fields_updated: Vec<Field>,
}

impl ReconciliationOutcome {
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields_updated.iter().map(Field::as_str).collect()
    }
}
