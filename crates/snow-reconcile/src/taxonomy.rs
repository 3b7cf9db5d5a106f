//! Recognized page errors

use serde::Serialize;
use snow_core::ErrorPatterns;

/// Business errors the reconciler knows how to correct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The username is taken
    DuplicateKey,
    /// The company reference did not resolve
    InvalidCompany,
    /// The email was rejected
    InvalidEmail,
    /// The project reference did not resolve
    InvalidProjectReference,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateKey => write!(f, "duplicate_key"),
            Self::InvalidCompany => write!(f, "invalid_company"),
            Self::InvalidEmail => write!(f, "invalid_email"),
            Self::InvalidProjectReference => write!(f, "invalid_project_reference"),
        }
    }
}

/// Sort pending error texts into recognized kinds
///
/// Returns the kinds in first-seen order without repeats, or the first text
/// that matches no pattern.
pub fn classify_all<'a>(
    patterns: &ErrorPatterns,
    messages: &'a [String],
) -> Result<Vec<ErrorKind>, &'a str> {
    let mut kinds = Vec::new();
    for message in messages {
        let kind = classify(patterns, message).ok_or(message.as_str())?;
        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }
    Ok(kinds)
}

/// Case-insensitive substring match of one message against the patterns
pub fn classify(patterns: &ErrorPatterns, message: &str) -> Option<ErrorKind> {
    let message = message.to_lowercase();
    [
        (&patterns.duplicate_key, ErrorKind::DuplicateKey),
        (&patterns.invalid_company, ErrorKind::InvalidCompany),
        (&patterns.invalid_email, ErrorKind::InvalidEmail),
        (&patterns.invalid_project_reference, ErrorKind::InvalidProjectReference),
    ]
    .into_iter()
    .find(|(pattern, _)| {
        let pattern = pattern.trim();
        !pattern.is_empty() && message.contains(&pattern.to_lowercase())
    })
    .map(|(_, kind)| kind)
}
