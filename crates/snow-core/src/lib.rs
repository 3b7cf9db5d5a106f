//! # snow-core
//!
//! Core types for reconciling user records in a ServiceNow instance.
//!
//! ## Core Paradigm
//!
//! - A target profile is the desired state, the application is the system of record
//! - Usernames are derived from names, collisions are resolved by a numeric suffix
//! - Every reconciliation run owns its state; nothing is shared between runs
//! - Error texts and field locators are configuration, not code

pub mod config;
mod error;
mod types;

pub use config::{
    ErrorPatterns, FieldBinding, FieldSettings, Limits, RunSettings, SnowConfig, UsernameSettings,
};
pub use error::{AttemptBound, LookupKind, PageError, Result, SnowError};
pub use types::*;
