//! Unified error types for snowrecon

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which retry bound a run ran out of
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptBound {
    /// Username suffix rounds after name collisions
    Disambiguation,
    /// Attempts at a single field edit
    FieldEdit,
    /// Rounds of pending errors after record creation
    CreationErrors,
    /// Re-runs of a search whose results went stale
    StaleResults,
}

impl std::fmt::Display for AttemptBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disambiguation => write!(f, "disambiguation rounds"),
            Self::FieldEdit => write!(f, "field edit attempts"),
            Self::CreationErrors => write!(f, "creation error rounds"),
            Self::StaleResults => write!(f, "stale result retries"),
        }
    }
}

/// Reference lists reachable through a lookup dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    Company,
    Project,
}

impl std::fmt::Display for LookupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Company => write!(f, "company"),
            Self::Project => write!(f, "project"),
        }
    }
}

/// Failures reported by a page driver
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Result list went stale")]
    StaleResult,

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Page error: {0}")]
    Other(String),
}

impl PageError {
    /// Conditions that are retried locally before escalating
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ElementNotFound(_) | Self::StaleResult)
    }
}

/// Unified error type for all snowrecon operations
#[derive(Error, Debug)]
pub enum SnowError {
    // Input errors
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    // Reconciliation errors
    #[error("Exhausted {bound} after {attempts} attempts")]
    ExhaustedAttempts { bound: AttemptBound, attempts: u32 },

    #[error("Unrecognized page error: {0}")]
    UnrecognizedPageError(String),

    #[error("No {kind} entry matching '{value}' after creating it")]
    LookupFailed { kind: LookupKind, value: String },

    #[error(transparent)]
    Page(#[from] PageError),

    #[error("Reconciliation cancelled: {0}")]
    Cancelled(String),

    // Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using SnowError
pub type Result<T> = std::result::Result<T, SnowError>;
