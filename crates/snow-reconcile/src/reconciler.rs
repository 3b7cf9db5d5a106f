//! Duplicate-aware user reconciliation
//!
//! A run searches for the target by employee ID, email, then generated
//! username. A hit on someone else's username moves to the next suffix. A
//! confirmed match gets the minimal field edits; no match gets a new record,
//! with recognized page errors corrected in place, then a verification search.
//!
//! ```text
//! Searching -> Disambiguating <-> Searching
//! Searching -> Reconciling -> Done
//! Searching -> Creating -> (ErrorHandling <-> Creating) -> Verifying -> Done
//! any -> Failed
//! ```

use snow_core::{
    AttemptBound, CandidateUsername, Field, LookupKind, Phase, ReconciliationOutcome,
    ReconciliationState, Record, Result, SnowConfig, SnowError, TargetProfile,
};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::diff::FieldDiff;
use crate::matching::{username_in_display, Identity, MatchResult};
use crate::page::{LookupSession, PageDriver, SearchCriterion};
use crate::taxonomy::{classify_all, ErrorKind};

/// Reconciles target profiles through a page driver
///
/// Holds only configuration; every run gets its own state and borrows the
/// page session exclusively for its duration.
#[derive(Debug, Clone, Default)]
pub struct UserReconciler {
    config: SnowConfig,
}

impl UserReconciler {
    pub fn new(config: SnowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SnowConfig {
        &self.config
    }

    /// Bring the application's record for `profile` in line with it
    ///
    /// # Errors
    /// `ExhaustedAttempts` when a retry bound is exceeded,
    /// `UnrecognizedPageError` for page errors outside the known set, and any
    /// non-transient page failure.
    #[instrument(skip_all, fields(user = %profile.full_name()))]
    pub async fn reconcile<P: PageDriver>(
        &self,
        profile: &TargetProfile,
        page: &mut P,
    ) -> Result<ReconciliationOutcome> {
        let profile = profile.validate()?;
        info!("Starting reconciliation");

        let mut run = Run::new(&self.config, profile, page);
        let result = run.execute().await;

        match &result {
            Ok(outcome) => {
                run.state.enter(Phase::Done);
                info!(
                    created = outcome.created,
                    username = %outcome.username,
                    fields = ?outcome.field_names(),
                    "Reconciliation done"
                );
            }
            Err(e) => {
                run.state.enter(Phase::Failed);
                warn!("Reconciliation failed: {}", e);
            }
        }

        result
    }

    /// [`reconcile`](Self::reconcile), abandoned once `deadline` elapses
    ///
    /// The run stops between two page calls; edits already applied stay applied.
    pub async fn reconcile_with_deadline<P: PageDriver>(
        &self,
        profile: &TargetProfile,
        page: &mut P,
        deadline: Duration,
    ) -> Result<ReconciliationOutcome> {
        tokio::time::timeout(deadline, self.reconcile(profile, page))
            .await
            .map_err(|_| SnowError::Cancelled(format!("deadline of {:?} elapsed", deadline)))?
    }
}

/// How a creation attempt ended
enum Creation {
    Created(String),
    UsernameTaken,
}

/// One reconciliation run
struct Run<'a, P: PageDriver> {
    config: &'a SnowConfig,
    page: &'a mut P,
    /// Working copy; corrections such as email substitution land here
    profile: TargetProfile,
    candidate: CandidateUsername,
    state: ReconciliationState,
    /// Set once the page rejected the email; the email then follows the username
    substituted_email: bool,
}

impl<'a, P: PageDriver> Run<'a, P> {
    fn new(config: &'a SnowConfig, profile: TargetProfile, page: &'a mut P) -> Self {
        let candidate = CandidateUsername::new(&profile, &config.username.domain);
        Self {
            config,
            page,
            profile,
            candidate,
            state: ReconciliationState::new(),
            substituted_email: false,
        }
    }

    async fn execute(&mut self) -> Result<ReconciliationOutcome> {
        let mut result = self.search_all(false).await?;

        loop {
            match result {
                MatchResult::ExactMatch(record) => return self.update_existing(record).await,
                MatchResult::NameCollision(record) => {
                    debug!("Username taken by another user: {}", record.display_text());
                    result = self.disambiguate().await?;
                }
                MatchResult::NoMatch => match self.create().await? {
                    Creation::Created(username) => return self.verify(username).await,
                    Creation::UsernameTaken => result = self.disambiguate().await?,
                },
            }
        }
    }

    fn current_username(&self) -> String {
        self.candidate
            .with_suffix(self.state.unique_suffix)
            .to_string()
    }

    fn known<'v>(&self, value: &'v str) -> Option<&'v str> {
        (!self.config.is_unknown(value)).then(|| value.trim())
    }

    fn identity<'s>(&'s self, username: &'s str, claimed: bool) -> Identity<'s> {
        Identity {
            employee_id: self.known(&self.profile.employee_id),
            email: self.known(&self.profile.email),
            username,
            username_key: &self.config.fields.username_key,
            claimed,
        }
    }

    fn strategies(&self) -> Vec<SearchCriterion> {
        let mut strategies = Vec::with_capacity(3);
        if let Some(id) = self.known(&self.profile.employee_id) {
            strategies.push(SearchCriterion::EmployeeId(id.to_string()));
        }
        if let Some(email) = self.known(&self.profile.email) {
            strategies.push(SearchCriterion::Email(email.to_string()));
        }
        strategies.push(SearchCriterion::Username(self.current_username()));
        strategies
    }

    /// Try each search strategy until one yields something other than `NoMatch`
    async fn search_all(&mut self, claimed: bool) -> Result<MatchResult> {
        self.state
            .enter(if claimed { Phase::Verifying } else { Phase::Searching });

        for criterion in self.strategies() {
            let result = self.search_by(criterion, claimed).await?;
            if !result.is_no_match() {
                return Ok(result);
            }
        }

        Ok(MatchResult::NoMatch)
    }

    async fn search_by(&mut self, criterion: SearchCriterion, claimed: bool) -> Result<MatchResult> {
        let max = self.config.limits.max_stale_retries;

        for attempt in 1..=max {
            debug!(by = criterion.label(), value = %criterion, attempt, "Searching");

            let listed = match self.page.search(&criterion).await {
                Ok(()) => self.page.list_matches().await,
                Err(e) => Err(e),
            };

            match listed {
                Ok(records) => {
                    let username = self.current_username();
                    let result = self.identity(&username, claimed).evaluate(records);
                    debug!(by = criterion.label(), result = result.label(), "Search evaluated");
                    return Ok(result);
                }
                Err(e) if e.is_transient() => {
                    warn!("Search by {} failed (attempt {}/{}): {}", criterion.label(), attempt, max, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SnowError::ExhaustedAttempts {
            bound: AttemptBound::StaleResults,
            attempts: max,
        })
    }

    /// Move to the next username suffix until a search no longer collides
    async fn disambiguate(&mut self) -> Result<MatchResult> {
        self.state.enter(Phase::Disambiguating);
        self.state.duplicate_user = true;
        let max = self.config.limits.max_disambiguation_rounds;

        loop {
            if self.state.disambiguation_rounds >= max {
                return Err(SnowError::ExhaustedAttempts {
                    bound: AttemptBound::Disambiguation,
                    attempts: self.state.disambiguation_rounds,
                });
            }
            self.state.disambiguation_rounds += 1;
            let suffix = self.state.advance_suffix();
            let username = self.current_username();
            info!(
                round = self.state.disambiguation_rounds,
                suffix, %username, "Trying next username"
            );

            let result = self
                .search_by(SearchCriterion::Username(username), false)
                .await?;
            if !matches!(result, MatchResult::NameCollision(_)) {
                return Ok(result);
            }
        }
    }

    fn include_project(&self) -> bool {
        self.state.existing_user || self.state.duplicate_user
    }

    async fn update_existing(&mut self, record: Record) -> Result<ReconciliationOutcome> {
        self.state.existing_user = true;
        let username = match record.read_field(&self.config.fields.username_key) {
            Some(stored) => stored.to_string(),
            None => match username_in_display(&record, &self.candidate) {
                Some(shown) => shown.to_string(),
                None => {
                    let inferred = self.current_username();
                    warn!(username = %inferred, "Matched row shows no username; reporting the candidate");
                    inferred
                }
            },
        };
        self.state.reset_suffix();
        info!(%username, "Found existing user");

        let include_project = self.include_project();
        let fields_updated = self.apply_diff(&record, include_project).await?;

        Ok(ReconciliationOutcome {
            created: false,
            username,
            fields_updated,
        })
    }

    async fn apply_diff(&mut self, record: &Record, include_project: bool) -> Result<Vec<Field>> {
        self.state.enter(Phase::Reconciling);
        let config = self.config;
        let diff = FieldDiff::between(record, &self.profile, &config.fields.bindings, include_project);

        if diff.is_empty() {
            self.state.stop = true;
            debug!("Record already matches profile");
            return Ok(Vec::new());
        }

        self.page.open_record(record).await?;
        for change in &diff.changes {
            info!(
                field = %change.field,
                from = %change.current,
                to = %change.target,
                "Updating field"
            );
            self.edit_with_retry(&change.locator, &change.target).await?;
        }

        Ok(diff.fields())
    }

    async fn edit_with_retry(&mut self, locator: &str, value: &str) -> Result<()> {
        let max = self.config.limits.max_edit_attempts;

        for attempt in 1..=max {
            match self.page.edit_field(locator, value).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() => {
                    warn!("Edit of {} failed (attempt {}/{}): {}", locator, attempt, max, e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SnowError::ExhaustedAttempts {
            bound: AttemptBound::FieldEdit,
            attempts: max,
        })
    }

    async fn create(&mut self) -> Result<Creation> {
        loop {
            self.state.enter(Phase::Creating);
            let username = self.current_username();
            if self.substituted_email {
                self.profile.email = username.clone();
            }
            info!(%username, "Creating user record");

            if let Err(e) = self.page.create_record(&self.profile, &username).await {
                if !e.is_transient() {
                    return Err(e.into());
                }
                warn!("Creation form not ready: {}", e);
                self.count_error_round()?;
                continue;
            }

            let pending = self.page.pending_errors().await?;
            if pending.is_empty() {
                return Ok(Creation::Created(username));
            }

            self.state.enter(Phase::ErrorHandling);
            let kinds = classify_all(&self.config.error_patterns, &pending)
                .map_err(|text| SnowError::UnrecognizedPageError(text.to_string()))?;
            self.count_error_round()?;

            let mut username_taken = false;
            for kind in kinds {
                warn!(%kind, round = self.state.error_counter, "Correcting page error");
                match kind {
                    ErrorKind::DuplicateKey => username_taken = true,
                    ErrorKind::InvalidCompany => self.resolve_lookup(LookupKind::Company).await?,
                    ErrorKind::InvalidProjectReference => {
                        self.resolve_lookup(LookupKind::Project).await?
                    }
                    ErrorKind::InvalidEmail => self.substitute_email(&username).await?,
                }
            }

            if username_taken {
                return Ok(Creation::UsernameTaken);
            }
        }
    }

    fn count_error_round(&mut self) -> Result<()> {
        let max = self.config.limits.max_creation_error_rounds;
        self.state.error_counter += 1;
        if self.state.error_counter > max {
            return Err(SnowError::ExhaustedAttempts {
                bound: AttemptBound::CreationErrors,
                attempts: max,
            });
        }
        Ok(())
    }

    async fn substitute_email(&mut self, username: &str) -> Result<()> {
        let config = self.config;
        self.edit_with_retry(&config.fields.email_locator, username)
            .await?;
        self.profile.email = username.to_string();
        self.substituted_email = true;
        Ok(())
    }

    /// Select the profile's company/project in its lookup, creating it when missing
    async fn resolve_lookup(&mut self, kind: LookupKind) -> Result<()> {
        let wanted = match kind {
            LookupKind::Company => self.profile.company.clone(),
            LookupKind::Project => self.profile.project_id.clone(),
        };
        let fields = self.lookup_fields(kind);

        let mut session = self.page.open_lookup(kind).await?;
        if let Some(row) = session.find(&wanted).await? {
            debug!(%kind, value = %wanted, "Selecting existing lookup entry");
            session.select(&row).await?;
            return Ok(());
        }

        info!(%kind, value = %wanted, "Creating missing lookup entry");
        session.create_new(&fields).await?;
        match session.find(&wanted).await? {
            Some(row) => {
                session.select(&row).await?;
                Ok(())
            }
            None => Err(SnowError::LookupFailed {
                kind,
                value: wanted,
            }),
        }
    }

    fn lookup_fields(&self, kind: LookupKind) -> Vec<(String, String)> {
        let p = &self.profile;
        let pairs = match kind {
            LookupKind::Company => vec![
                ("name", p.company.as_str()),
                ("organization", p.organization.as_str()),
            ],
            LookupKind::Project => vec![
                ("project_id", p.project_id.as_str()),
                ("customer_id", p.customer_id.as_str()),
                ("company", p.company.as_str()),
                ("organization", p.organization.as_str()),
            ],
        };

        pairs
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    async fn verify(&mut self, username: String) -> Result<ReconciliationOutcome> {
        let fields_updated = match self.search_all(true).await? {
            MatchResult::ExactMatch(record) => {
                let include_project = self.include_project();
                self.apply_diff(&record, include_project).await?
            }
            other => {
                warn!(%username, result = other.label(), "Created record not found on verification");
                Vec::new()
            }
        };

        Ok(ReconciliationOutcome {
            created: true,
            username,
            fields_updated,
        })
    }
}
