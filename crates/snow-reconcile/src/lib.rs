//! Duplicate-aware user reconciliation for ServiceNow
//!
//! The reconciler never touches a browser. Everything it does to the
//! application goes through a [`PageDriver`], which a browser-backed
//! implementation provides in production and [`MemoryPage`] provides in tests.
//!
//! # Example
//!
//! ```no_run
//! use snow_core::{SnowConfig, TargetProfile};
//! use snow_reconcile::{DirectorySnapshot, MemoryPage, UserReconciler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SnowConfig::default();
//!     let profile: TargetProfile = serde_json::from_str(&std::fs::read_to_string("profile.json")?)?;
//!
//!     let mut page = MemoryPage::new(DirectorySnapshot::default(), &config.fields);
//!     let reconciler = UserReconciler::new(config);
//!
//!     let outcome = reconciler.reconcile(&profile, &mut page).await?;
//!     println!("{} (created: {})", outcome.username, outcome.created);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - [`page`]: the page driver capability
//! - [`matching`]: classifying result rows against the target
//! - [`diff`]: minimal field edits
//! - [`taxonomy`]: recognized page errors
//! - [`reconciler`]: the run state machine
//! - [`memory`]: in-memory directory page

pub mod diff;
pub mod matching;
pub mod memory;
pub mod page;
pub mod reconciler;
pub mod taxonomy;

// Re-export commonly used types
pub use diff::{FieldChange, FieldDiff};
pub use matching::{Identity, MatchResult};
pub use memory::{DirectorySnapshot, MemoryLookup, MemoryPage, PageCall};
pub use page::{LookupRow, LookupSession, PageDriver, SearchCriterion};
pub use reconciler::UserReconciler;
pub use taxonomy::{classify, classify_all, ErrorKind};
