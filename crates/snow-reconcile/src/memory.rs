//! In-memory user directory page for tests and offline rehearsals
//!
//! Behaves like the application's user pages closely enough to drive a full
//! reconciliation: searches filter the stored records, the new-user form is
//! validated the way the application validates it, and lookups edit the
//! company/project reference lists. Every call is journaled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snow_core::{FieldSettings, LookupKind, PageError, Record, TargetProfile};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::matching::{EMAIL_KEY, EMPLOYEE_ID_KEY};
use crate::page::{LookupRow, LookupSession, PageDriver, SearchCriterion};

const SYS_ID_KEY: &str = "sys_id";

const MSG_DUPLICATE_KEY: &str = "Unique Key violation detected by database ((user_name))";
const MSG_INVALID_COMPANY: &str = "The following mandatory fields are not filled in: Company";
const MSG_INVALID_EMAIL: &str = "Invalid email address";
const MSG_INVALID_PROJECT: &str = "Invalid update";

/// Serializable contents of a directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub records: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
}

/// One call made against a [`MemoryPage`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum PageCall {
    Search { criterion: SearchCriterion },
    ListMatches { rows: usize },
    OpenRecord { sys_id: String },
    EditField { locator: String, value: String },
    CreateRecord { username: String, email: String },
    PendingErrors { errors: Vec<String> },
    OpenLookup { kind: LookupKind },
    LookupFind { kind: LookupKind, text: String, found: bool },
    LookupSelect { kind: LookupKind, label: String },
    LookupCreate { kind: LookupKind, label: String },
}

#[derive(Debug, Default)]
enum Focus {
    #[default]
    None,
    Record(usize),
    Draft(BTreeMap<String, String>),
}

#[derive(Debug, Default)]
struct Directory {
    snapshot: DirectorySnapshot,
    journal: Vec<PageCall>,
    results: Vec<usize>,
    focus: Focus,
    pending: Vec<String>,
    // Fault injection
    stale_listings: u32,
    flaky_locators: HashMap<String, u32>,
    forced_errors: VecDeque<String>,
    persistent_error: Option<String>,
    form_defaults: HashMap<String, String>,
}

impl Directory {
    fn lookup_list(&mut self, kind: LookupKind) -> &mut Vec<String> {
        match kind {
            LookupKind::Company => &mut self.snapshot.companies,
            LookupKind::Project => &mut self.snapshot.projects,
        }
    }

    fn row(&self, index: usize) -> Record {
        let fields = self.snapshot.records[index].clone();
        let get = |key: &str| fields.get(key).map(String::as_str).unwrap_or("");
        let display_text = format!(
            "{} | {} {} | {} | {}",
            get("user_name"),
            get("first_name"),
            get("last_name"),
            get(EMAIL_KEY),
            get(EMPLOYEE_ID_KEY)
        );
        Record {
            display_text,
            fields,
        }
    }

    fn next_sys_id(&self) -> String {
        format!("usr{:04}", self.snapshot.records.len() + 1)
    }
}

fn contains_ignore_case(list: &[String], value: &str) -> bool {
    list.iter().any(|v| v.trim().eq_ignore_ascii_case(value.trim()))
}

fn looks_like_email(value: &str) -> bool {
    let value = value.trim();
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !value.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// A [`PageDriver`] over an in-memory directory
#[derive(Debug, Clone)]
pub struct MemoryPage {
    directory: Arc<Mutex<Directory>>,
    locators: HashMap<String, String>,
    username_key: String,
}

impl MemoryPage {
    /// Build a page over `snapshot`, resolving locators through `fields`
    pub fn new(mut snapshot: DirectorySnapshot, fields: &FieldSettings) -> Self {
        for (i, record) in snapshot.records.iter_mut().enumerate() {
            record
                .entry(SYS_ID_KEY.to_string())
                .or_insert_with(|| format!("usr{:04}", i + 1));
        }

        let mut locators: HashMap<String, String> = fields
            .bindings
            .iter()
            .map(|b| (b.locator.clone(), b.record_key.clone()))
            .collect();
        locators.insert(fields.email_locator.clone(), EMAIL_KEY.to_string());

        Self {
            directory: Arc::new(Mutex::new(Directory {
                snapshot,
                ..Directory::default()
            })),
            locators,
            username_key: fields.username_key.clone(),
        }
    }

    /// Fail the next `count` listings with a stale result
    pub fn with_stale_listings(self, count: u32) -> Self {
        self.lock().stale_listings = count;
        self
    }

    /// Fail the next `failures` edits of `locator` with element-not-found
    pub fn with_flaky_locator(self, locator: &str, failures: u32) -> Self {
        self.lock()
            .flaky_locators
            .insert(locator.to_string(), failures);
        self
    }

    /// Show `message` after the next creation attempt, on top of real validation
    pub fn with_forced_error(self, message: &str) -> Self {
        self.lock().forced_errors.push_back(message.to_string());
        self
    }

    /// Show `message` after every creation attempt
    pub fn with_persistent_error(self, message: &str) -> Self {
        self.lock().persistent_error = Some(message.to_string());
        self
    }

    /// Submit `value` for `record_key` on the new-user form, whatever the profile says
    ///
    /// Models forms that do not expose every field and store a default instead.
    pub fn with_creation_form_default(self, record_key: &str, value: &str) -> Self {
        self.lock()
            .form_defaults
            .insert(record_key.to_string(), value.to_string());
        self
    }

    pub fn journal(&self) -> Vec<PageCall> {
        self.lock().journal.clone()
    }

    pub fn snapshot(&self) -> DirectorySnapshot {
        self.lock().snapshot.clone()
    }

    /// Search criteria in call order
    pub fn searches(&self) -> Vec<SearchCriterion> {
        self.lock()
            .journal
            .iter()
            .filter_map(|call| match call {
                PageCall::Search { criterion } => Some(criterion.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(locator, value)` of every edit attempt in call order
    pub fn edits(&self) -> Vec<(String, String)> {
        self.lock()
            .journal
            .iter()
            .filter_map(|call| match call {
                PageCall::EditField { locator, value } => Some((locator.clone(), value.clone())),
                _ => None,
            })
            .collect()
    }

    /// Usernames submitted on the new-user form, in call order
    pub fn creations(&self) -> Vec<String> {
        self.lock()
            .journal
            .iter()
            .filter_map(|call| match call {
                PageCall::CreateRecord { username, .. } => Some(username.clone()),
                _ => None,
            })
            .collect()
    }

    /// Stored record with the given username
    pub fn record(&self, username: &str) -> Option<BTreeMap<String, String>> {
        self.lock()
            .snapshot
            .records
            .iter()
            .find(|r| {
                r.get(&self.username_key)
                    .is_some_and(|u| u.eq_ignore_ascii_case(username))
            })
            .cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn criterion_key(&self, criterion: &SearchCriterion) -> String {
        match criterion {
            SearchCriterion::EmployeeId(_) => EMPLOYEE_ID_KEY.to_string(),
            SearchCriterion::Email(_) => EMAIL_KEY.to_string(),
            SearchCriterion::Username(_) => self.username_key.clone(),
        }
    }

    fn draft(&self, dir: &Directory, profile: &TargetProfile, username: &str) -> BTreeMap<String, String> {
        let mut draft = BTreeMap::new();
        let values = [
            (self.username_key.as_str(), username),
            ("first_name", profile.first_name.as_str()),
            ("last_name", profile.last_name.as_str()),
            (EMAIL_KEY, profile.email.as_str()),
            (EMPLOYEE_ID_KEY, profile.employee_id.as_str()),
            ("company", profile.company.as_str()),
            ("organization", profile.organization.as_str()),
            ("project_id", profile.project_id.as_str()),
            ("customer_id", profile.customer_id.as_str()),
            ("office_id", profile.office_id.as_str()),
            ("office_location", profile.office_location.as_str()),
            ("division", profile.division.as_str()),
        ];
        for (key, value) in values {
            let value = dir.form_defaults.get(key).map_or(value, String::as_str);
            draft.insert(key.to_string(), value.to_string());
        }
        draft.insert(
            "is_admin".to_string(),
            if profile.is_admin { "true" } else { "false" }.to_string(),
        );
        draft
    }

    fn validate(&self, dir: &Directory, draft: &BTreeMap<String, String>) -> Vec<String> {
        let get = |key: &str| draft.get(key).map(String::as_str).unwrap_or("");
        let mut errors = Vec::new();

        let username = get(&self.username_key);
        let taken = dir.snapshot.records.iter().any(|r| {
            r.get(&self.username_key)
                .is_some_and(|u| u.eq_ignore_ascii_case(username))
        });
        if taken {
            errors.push(MSG_DUPLICATE_KEY.to_string());
        }
        if !contains_ignore_case(&dir.snapshot.companies, get("company")) {
            errors.push(MSG_INVALID_COMPANY.to_string());
        }
        if !looks_like_email(get(EMAIL_KEY)) {
            errors.push(MSG_INVALID_EMAIL.to_string());
        }
        let project = get("project_id");
        if !project.is_empty() && !contains_ignore_case(&dir.snapshot.projects, project) {
            errors.push(MSG_INVALID_PROJECT.to_string());
        }
        errors
    }
}

#[async_trait]
impl PageDriver for MemoryPage {
    type Lookup = MemoryLookup;

    async fn search(&mut self, criterion: &SearchCriterion) -> Result<(), PageError> {
        let key = self.criterion_key(criterion);
        let mut dir = self.lock();
        dir.journal.push(PageCall::Search {
            criterion: criterion.clone(),
        });

        let wanted = criterion.value().trim();
        dir.results = dir
            .snapshot
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.get(&key).is_some_and(|v| v.trim().eq_ignore_ascii_case(wanted)))
            .map(|(i, _)| i)
            .collect();
        debug!("Memory search by {} matched {} rows", key, dir.results.len());
        Ok(())
    }

    async fn list_matches(&mut self) -> Result<Vec<Record>, PageError> {
        let mut dir = self.lock();
        if dir.stale_listings > 0 {
            dir.stale_listings -= 1;
            return Err(PageError::StaleResult);
        }

        let rows: Vec<Record> = dir.results.iter().map(|&i| dir.row(i)).collect();
        dir.journal.push(PageCall::ListMatches { rows: rows.len() });
        Ok(rows)
    }

    async fn open_record(&mut self, record: &Record) -> Result<(), PageError> {
        let mut dir = self.lock();
        let position = match record.read_field(SYS_ID_KEY) {
            Some(sys_id) => dir
                .snapshot
                .records
                .iter()
                .position(|r| r.get(SYS_ID_KEY).is_some_and(|v| v == sys_id)),
            None => None,
        };
        let index = position.ok_or_else(|| {
            PageError::ElementNotFound(format!("row '{}'", record.display_text()))
        })?;

        let sys_id = dir.snapshot.records[index]
            .get(SYS_ID_KEY)
            .cloned()
            .unwrap_or_default();
        dir.journal.push(PageCall::OpenRecord { sys_id });
        dir.focus = Focus::Record(index);
        Ok(())
    }

    async fn edit_field(&mut self, locator: &str, value: &str) -> Result<(), PageError> {
        let mut dir = self.lock();
        dir.journal.push(PageCall::EditField {
            locator: locator.to_string(),
            value: value.to_string(),
        });

        if let Some(remaining) = dir.flaky_locators.get_mut(locator) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PageError::ElementNotFound(locator.to_string()));
            }
        }

        let key = self
            .locators
            .get(locator)
            .ok_or_else(|| PageError::ElementNotFound(locator.to_string()))?
            .clone();

        let dir = &mut *dir;
        let target = match &mut dir.focus {
            Focus::Record(index) => &mut dir.snapshot.records[*index],
            Focus::Draft(draft) => draft,
            Focus::None => return Err(PageError::Other("no form is open".to_string())),
        };
        target.insert(key, value.to_string());
        Ok(())
    }

    async fn create_record(
        &mut self,
        profile: &TargetProfile,
        username: &str,
    ) -> Result<(), PageError> {
        let mut dir = self.lock();
        dir.journal.push(PageCall::CreateRecord {
            username: username.to_string(),
            email: profile.email.clone(),
        });

        let mut draft = self.draft(&dir, profile, username);
        let mut errors = self.validate(&dir, &draft);
        if let Some(forced) = dir.forced_errors.pop_front() {
            errors.push(forced);
        }
        if let Some(persistent) = dir.persistent_error.clone() {
            errors.push(persistent);
        }

        if errors.is_empty() {
            let sys_id = dir.next_sys_id();
            draft.insert(SYS_ID_KEY.to_string(), sys_id);
            dir.snapshot.records.push(draft);
            dir.focus = Focus::Record(dir.snapshot.records.len() - 1);
        } else {
            dir.focus = Focus::Draft(draft);
        }
        dir.pending = errors;
        Ok(())
    }

    async fn pending_errors(&mut self) -> Result<Vec<String>, PageError> {
        let mut dir = self.lock();
        let errors = dir.pending.clone();
        dir.journal.push(PageCall::PendingErrors {
            errors: errors.clone(),
        });
        Ok(errors)
    }

    async fn open_lookup(&mut self, kind: LookupKind) -> Result<MemoryLookup, PageError> {
        self.lock().journal.push(PageCall::OpenLookup { kind });
        Ok(MemoryLookup {
            directory: Arc::clone(&self.directory),
            kind,
        })
    }
}

/// Lookup dialog of a [`MemoryPage`]
#[derive(Debug)]
pub struct MemoryLookup {
    directory: Arc<Mutex<Directory>>,
    kind: LookupKind,
}

impl MemoryLookup {
    fn lock(&self) -> MutexGuard<'_, Directory> {
        self.directory.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn label_key(&self) -> &'static str {
        match self.kind {
            LookupKind::Company => "name",
            LookupKind::Project => "project_id",
        }
    }
}

#[async_trait]
impl LookupSession for MemoryLookup {
    async fn find(&mut self, text: &str) -> Result<Option<LookupRow>, PageError> {
        let kind = self.kind;
        let mut dir = self.lock();
        let found = dir
            .lookup_list(kind)
            .iter()
            .find(|label| label.trim().eq_ignore_ascii_case(text.trim()))
            .map(|label| LookupRow {
                label: label.clone(),
            });
        dir.journal.push(PageCall::LookupFind {
            kind,
            text: text.to_string(),
            found: found.is_some(),
        });
        Ok(found)
    }

    async fn select(&mut self, row: &LookupRow) -> Result<(), PageError> {
        let kind = self.kind;
        let mut dir = self.lock();
        if !contains_ignore_case(dir.lookup_list(kind), &row.label) {
            return Err(PageError::ElementNotFound(row.label.clone()));
        }
        dir.journal.push(PageCall::LookupSelect {
            kind,
            label: row.label.clone(),
        });
        Ok(())
    }

    async fn create_new(&mut self, fields: &[(String, String)]) -> Result<(), PageError> {
        let kind = self.kind;
        let key = self.label_key();
        let label = fields
            .iter()
            .find(|(name, value)| name == key && !value.trim().is_empty())
            .map(|(_, value)| value.trim().to_string())
            .ok_or_else(|| PageError::Other(format!("new {} needs a {}", kind, key)))?;

        let mut dir = self.lock();
        dir.lookup_list(kind).push(label.clone());
        dir.journal.push(PageCall::LookupCreate { kind, label });
        Ok(())
    }
}
