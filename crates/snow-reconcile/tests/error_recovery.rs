//! Recovery from page errors surfaced while creating and editing users.

use async_trait::async_trait;
use snow_core::{
    AttemptBound, Field, LookupKind, PageError, Record, SnowConfig, SnowError, TargetProfile,
};
use snow_reconcile::{
    DirectorySnapshot, LookupRow, LookupSession, MemoryPage, PageCall, PageDriver,
    SearchCriterion, UserReconciler,
};
use std::collections::BTreeMap;
use std::time::Duration;

const EMAIL_LOCATOR: &str = "sys_user.email";

fn config() -> SnowConfig {
    let mut config = SnowConfig::default();
    config.username.domain = "corp.test".to_string();
    config
}

fn profile() -> TargetProfile {
    TargetProfile {
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        employee_id: "E123".to_string(),
        email: "jane@corp.test".to_string(),
        division: "Ops".to_string(),
        customer_id: "C1".to_string(),
        company: "Acme".to_string(),
        office_id: "O1".to_string(),
        project_id: "P1".to_string(),
        organization: "Org".to_string(),
        office_location: "HQ".to_string(),
        is_admin: false,
        requestor_email: String::new(),
    }
}

fn empty_directory() -> DirectorySnapshot {
    DirectorySnapshot {
        records: Vec::new(),
        companies: vec!["Acme".to_string()],
        projects: vec!["P1".to_string()],
    }
}

#[tokio::test]
async fn test_invalid_email_is_replaced_by_username() {
    let mut page = MemoryPage::new(empty_directory(), &config().fields)
        .with_forced_error("Invalid email address");

    let outcome = UserReconciler::new(config())
        .reconcile(&profile(), &mut page)
        .await
        .unwrap();

    assert!(outcome.created);
    assert_eq!(
        page.edits(),
        vec![(EMAIL_LOCATOR.to_string(), "jane.doe@corp.test".to_string())]
    );

    let creations: Vec<PageCall> = page
        .journal()
        .into_iter()
        .filter(|c| matches!(c, PageCall::CreateRecord { .. }))
        .collect();
    assert_eq!(
        creations,
        vec![
            PageCall::CreateRecord {
                username: "jane.doe@corp.test".to_string(),
                email: "jane@corp.test".to_string(),
            },
            PageCall::CreateRecord {
                username: "jane.doe@corp.test".to_string(),
                email: "jane.doe@corp.test".to_string(),
            },
        ]
    );
}

#[tokio::test]
async fn test_placeholder_email_fails_validation_and_is_substituted() {
    let mut target = profile();
    target.email = "unknown".to_string();
    let mut page = MemoryPage::new(empty_directory(), &config().fields);

    let outcome = UserReconciler::new(config())
        .reconcile(&target, &mut page)
        .await
        .unwrap();

    assert!(outcome.created);
    let stored = page.record("jane.doe@corp.test").unwrap();
    assert_eq!(
        stored.get("email").map(String::as_str),
        Some("jane.doe@corp.test")
    );
}

#[tokio::test]
async fn test_substituted_email_follows_username_to_next_suffix() {
    let mut target = profile();
    target.email = "TBD".to_string();
    let mut page = MemoryPage::new(empty_directory(), &config().fields)
        .with_forced_error("Unique Key violation detected by database");

    let outcome = UserReconciler::new(config())
        .reconcile(&target, &mut page)
        .await
        .unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.username, "jane.doe1@corp.test");
    let stored = page.record("jane.doe1@corp.test").unwrap();
    assert_eq!(
        stored.get("email").map(String::as_str),
        Some("jane.doe1@corp.test")
    );

    let creations: Vec<PageCall> = page
        .journal()
        .into_iter()
        .filter(|c| matches!(c, PageCall::CreateRecord { .. }))
        .collect();
    assert_eq!(
        creations.last(),
        Some(&PageCall::CreateRecord {
            username: "jane.doe1@corp.test".to_string(),
            email: "jane.doe1@corp.test".to_string(),
        })
    );
}

#[tokio::test]
async fn test_missing_company_is_created_through_lookup() {
    let mut target = profile();
    target.company = "Globex".to_string();
    let mut page = MemoryPage::new(empty_directory(), &config().fields);

    let outcome = UserReconciler::new(config())
        .reconcile(&target, &mut page)
        .await
        .unwrap();

    assert!(outcome.created);
    assert!(page.snapshot().companies.contains(&"Globex".to_string()));
    let journal = page.journal();
    assert!(journal.contains(&PageCall::LookupCreate {
        kind: LookupKind::Company,
        label: "Globex".to_string(),
    }));
    assert!(journal.contains(&PageCall::LookupSelect {
        kind: LookupKind::Company,
        label: "Globex".to_string(),
    }));
}

#[tokio::test]
async fn test_existing_project_is_selected_not_created() {
    let mut page = MemoryPage::new(empty_directory(), &config().fields)
        .with_forced_error("Invalid update");

    let outcome = UserReconciler::new(config())
        .reconcile(&profile(), &mut page)
        .await
        .unwrap();

    assert!(outcome.created);
    let journal = page.journal();
    assert!(journal.contains(&PageCall::LookupSelect {
        kind: LookupKind::Project,
        label: "P1".to_string(),
    }));
    assert!(!journal
        .iter()
        .any(|c| matches!(c, PageCall::LookupCreate { .. })));
}

#[tokio::test]
async fn test_missing_project_and_company_fixed_in_one_round() {
    let mut target = profile();
    target.company = "Globex".to_string();
    target.project_id = "P7".to_string();
    let mut page = MemoryPage::new(empty_directory(), &config().fields);

    let outcome = UserReconciler::new(config())
        .reconcile(&target, &mut page)
        .await
        .unwrap();

    assert!(outcome.created);
    assert_eq!(page.creations().len(), 2);
    let snapshot = page.snapshot();
    assert!(snapshot.projects.contains(&"P7".to_string()));
    assert!(snapshot.companies.contains(&"Globex".to_string()));
}

#[tokio::test]
async fn test_unrecognized_error_is_fatal() {
    let mut page = MemoryPage::new(empty_directory(), &config().fields)
        .with_forced_error("Your session has expired");

    let err = UserReconciler::new(config())
        .reconcile(&profile(), &mut page)
        .await
        .unwrap_err();

    match err {
        SnowError::UnrecognizedPageError(text) => assert_eq!(text, "Your session has expired"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(page.creations().len(), 1);
    assert!(page.edits().is_empty());
}

#[tokio::test]
async fn test_creation_errors_stop_after_three_rounds() {
    let mut page = MemoryPage::new(empty_directory(), &config().fields)
        .with_persistent_error("Invalid email address");

    let err = UserReconciler::new(config())
        .reconcile(&profile(), &mut page)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SnowError::ExhaustedAttempts {
            bound: AttemptBound::CreationErrors,
            attempts: 3
        }
    ));
    assert_eq!(page.creations().len(), 4);
    assert_eq!(page.edits().len(), 3);
}

#[tokio::test]
async fn test_flaky_field_is_retried() {
    let mut jane = BTreeMap::new();
    jane.insert("user_name".to_string(), "jane.doe@corp.test".to_string());
    jane.insert("employee_id".to_string(), "E123".to_string());
    jane.insert("division".to_string(), "Legal".to_string());
    let snapshot = DirectorySnapshot {
        records: vec![jane],
        ..empty_directory()
    };
    let mut page = MemoryPage::new(snapshot, &config().fields)
        .with_flaky_locator("sys_user.u_division", 2);

    let outcome = UserReconciler::new(config())
        .reconcile(&profile(), &mut page)
        .await
        .unwrap();

    assert_eq!(outcome.fields_updated, vec![Field::Division]);
    assert_eq!(page.edits().len(), 3);
    let stored = page.record("jane.doe@corp.test").unwrap();
    assert_eq!(stored.get("division").map(String::as_str), Some("Ops"));
}

#[tokio::test]
async fn test_field_that_never_appears_exhausts_edits() {
    let mut jane = BTreeMap::new();
    jane.insert("user_name".to_string(), "jane.doe@corp.test".to_string());
    jane.insert("employee_id".to_string(), "E123".to_string());
    jane.insert("division".to_string(), "Legal".to_string());
    let snapshot = DirectorySnapshot {
        records: vec![jane],
        ..empty_directory()
    };
    let mut page = MemoryPage::new(snapshot, &config().fields)
        .with_flaky_locator("sys_user.u_division", 10);

    let err = UserReconciler::new(config())
        .reconcile(&profile(), &mut page)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SnowError::ExhaustedAttempts {
            bound: AttemptBound::FieldEdit,
            attempts: 3
        }
    ));
    assert_eq!(page.edits().len(), 3);
}

#[tokio::test]
async fn test_stale_listings_are_retried() {
    let mut page = MemoryPage::new(empty_directory(), &config().fields).with_stale_listings(2);

    let outcome = UserReconciler::new(config())
        .reconcile(&profile(), &mut page)
        .await
        .unwrap();

    assert!(outcome.created);
    let searches = page.searches();
    assert_eq!(searches[0], searches[1]);
    assert_eq!(searches[1], searches[2]);
}

#[tokio::test]
async fn test_persistently_stale_listing_exhausts() {
    let mut page = MemoryPage::new(empty_directory(), &config().fields).with_stale_listings(100);

    let err = UserReconciler::new(config())
        .reconcile(&profile(), &mut page)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SnowError::ExhaustedAttempts {
            bound: AttemptBound::StaleResults,
            attempts: 3
        }
    ));
}

#[tokio::test]
async fn test_configured_error_wording_is_used() {
    let mut config = config();
    config.error_patterns.invalid_email = "E-mail rejected".to_string();
    let mut page =
        MemoryPage::new(empty_directory(), &config.fields).with_forced_error("E-mail rejected");

    let outcome = UserReconciler::new(config)
        .reconcile(&profile(), &mut page)
        .await
        .unwrap();

    assert!(outcome.created);
    assert_eq!(page.edits()[0].0, EMAIL_LOCATOR);
}

/// Page whose searches never return
struct HangingPage;

struct NoLookup;

#[async_trait]
impl LookupSession for NoLookup {
    async fn find(&mut self, _text: &str) -> Result<Option<LookupRow>, PageError> {
        Ok(None)
    }

    async fn select(&mut self, _row: &LookupRow) -> Result<(), PageError> {
        Ok(())
    }

    async fn create_new(&mut self, _fields: &[(String, String)]) -> Result<(), PageError> {
        Ok(())
    }
}

#[async_trait]
impl PageDriver for HangingPage {
    type Lookup = NoLookup;

    async fn search(&mut self, _criterion: &SearchCriterion) -> Result<(), PageError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn list_matches(&mut self) -> Result<Vec<Record>, PageError> {
        Ok(Vec::new())
    }

    async fn open_record(&mut self, _record: &Record) -> Result<(), PageError> {
        Ok(())
    }

    async fn edit_field(&mut self, _locator: &str, _value: &str) -> Result<(), PageError> {
        Ok(())
    }

    async fn create_record(
        &mut self,
        _profile: &TargetProfile,
        _username: &str,
    ) -> Result<(), PageError> {
        Ok(())
    }

    async fn pending_errors(&mut self) -> Result<Vec<String>, PageError> {
        Ok(Vec::new())
    }

    async fn open_lookup(&mut self, _kind: LookupKind) -> Result<NoLookup, PageError> {
        Ok(NoLookup)
    }
}

#[tokio::test]
async fn test_deadline_cancels_run() {
    let mut page = HangingPage;

    let err = UserReconciler::new(config())
        .reconcile_with_deadline(&profile(), &mut page, Duration::from_millis(50))
        .await
        .unwrap_err();

    assert!(matches!(err, SnowError::Cancelled(_)));
}
