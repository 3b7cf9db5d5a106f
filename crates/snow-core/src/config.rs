//! Configuration management for snowrecon
//!
//! Username generation, retry bounds, the literal error texts the application
//! shows, and the locators of the editable user fields all live here so that
//! wording or markup drift on the real page is a config change.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::Field;
use crate::{Result, SnowError};

/// Directory holding the config file, relative to a root
pub const CONFIG_DIR: &str = ".snowrecon";

/// Repository-level snowrecon configuration
///
/// Loaded from `.snowrecon/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnowConfig {
    /// Username generation
    #[serde(default)]
    pub username: UsernameSettings,

    /// Retry bounds
    #[serde(default)]
    pub limits: Limits,

    /// Literal error texts recognized on the page
    #[serde(default)]
    pub error_patterns: ErrorPatterns,

    /// Field locators
    #[serde(default)]
    pub fields: FieldSettings,

    /// Run-level settings
    #[serde(default)]
    pub run: RunSettings,
}

/// Username generation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsernameSettings {
    /// Domain appended to every generated username
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Values of employee ID / email that mean "not known yet"
    #[serde(default = "default_unknown_markers")]
    pub unknown_markers: Vec<String>,
}

/// Retry bounds for a reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_disambiguation_rounds")]
    pub max_disambiguation_rounds: u32,

    #[serde(default = "default_max_edit_attempts")]
    pub max_edit_attempts: u32,

    #[serde(default = "default_max_creation_error_rounds")]
    pub max_creation_error_rounds: u32,

    #[serde(default = "default_max_stale_retries")]
    pub max_stale_retries: u32,
}

/// Case-insensitive substrings identifying each recognized page error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPatterns {
    #[serde(default = "default_duplicate_key")]
    pub duplicate_key: String,

    #[serde(default = "default_invalid_company")]
    pub invalid_company: String,

    #[serde(default = "default_invalid_email")]
    pub invalid_email: String,

    #[serde(default = "default_invalid_project_reference")]
    pub invalid_project_reference: String,
}

/// Where each editable field lives on the user form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSettings {
    /// Locator of the email input
    #[serde(default = "default_email_locator")]
    pub email_locator: String,

    /// Record key holding the username on result rows
    #[serde(default = "default_username_key")]
    pub username_key: String,

    /// Ordered field bindings; edits are applied in this order
    #[serde(default = "default_bindings")]
    pub bindings: Vec<FieldBinding>,
}

/// One editable field: where to read it and where to write it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinding {
    pub field: Field,
    pub record_key: String,
    pub locator: String,
}

impl FieldBinding {
    pub fn new(field: Field, record_key: &str, locator: &str) -> Self {
        Self {
            field,
            record_key: record_key.to_string(),
            locator: locator.to_string(),
        }
    }
}

/// Run-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSettings {
    /// Abort a run that takes longer than this
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

// Default value providers
fn default_domain() -> String {
    "example-corp.com".to_string()
}

fn default_unknown_markers() -> Vec<String> {
    vec!["unknown".to_string(), "tbd".to_string(), "n/a".to_string()]
}

fn default_max_disambiguation_rounds() -> u32 {
    8
}

fn default_max_edit_attempts() -> u32 {
    3
}

fn default_max_creation_error_rounds() -> u32 {
    3
}

fn default_max_stale_retries() -> u32 {
    3
}

fn default_duplicate_key() -> String {
    "Unique Key violation detected by database".to_string()
}

fn default_invalid_company() -> String {
    "mandatory fields are not filled in: Company".to_string()
}

fn default_invalid_email() -> String {
    "Invalid email address".to_string()
}

fn default_invalid_project_reference() -> String {
    "Invalid update".to_string()
}

fn default_email_locator() -> String {
    "sys_user.email".to_string()
}

fn default_username_key() -> String {
    "user_name".to_string()
}

fn default_bindings() -> Vec<FieldBinding> {
    vec![
        FieldBinding::new(Field::ProjectId, "project_id", "sys_user.u_project_id"),
        FieldBinding::new(Field::CustomerId, "customer_id", "sys_user.u_customer_id"),
        FieldBinding::new(Field::OfficeId, "office_id", "sys_user.u_office_id"),
        FieldBinding::new(Field::OfficeId, "office_id", "sys_user.u_building_office_id"),
        FieldBinding::new(Field::OfficeLocation, "office_location", "sys_user.location"),
        FieldBinding::new(Field::Division, "division", "sys_user.u_division"),
    ]
}

impl SnowConfig {
    /// Load configuration from `.snowrecon/config.toml` under `root`, or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(CONFIG_DIR).join("config.toml");

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SnowError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write default configuration to `.snowrecon/config.toml` under `root`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| SnowError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Reject settings no run could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.username.domain.trim().is_empty() {
            return Err(SnowError::Config("username.domain must not be empty".to_string()));
        }
        if self.limits.max_edit_attempts == 0 || self.limits.max_stale_retries == 0 {
            return Err(SnowError::Config(
                "limits.max_edit_attempts and limits.max_stale_retries must be at least 1"
                    .to_string(),
            ));
        }
        if self.fields.email_locator.trim().is_empty() {
            return Err(SnowError::Config("fields.email_locator must not be empty".to_string()));
        }
        Ok(())
    }

    /// Whether an identifier value is one of the "not known yet" markers
    pub fn is_unknown(&self, value: &str) -> bool {
        let value = value.trim();
        value.is_empty()
            || self
                .username
                .unknown_markers
                .iter()
                .any(|marker| marker.trim().eq_ignore_ascii_case(value))
    }
}

impl Default for UsernameSettings {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            unknown_markers: default_unknown_markers(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_disambiguation_rounds: default_max_disambiguation_rounds(),
            max_edit_attempts: default_max_edit_attempts(),
            max_creation_error_rounds: default_max_creation_error_rounds(),
            max_stale_retries: default_max_stale_retries(),
        }
    }
}

impl Default for ErrorPatterns {
    fn default() -> Self {
        Self {
            duplicate_key: default_duplicate_key(),
            invalid_company: default_invalid_company(),
            invalid_email: default_invalid_email(),
            invalid_project_reference: default_invalid_project_reference(),
        }
    }
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self {
            email_locator: default_email_locator(),
            username_key: default_username_key(),
            bindings: default_bindings(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SnowConfig::default();
        assert_eq!(config.username.domain, "example-corp.com");
        assert_eq!(config.limits.max_disambiguation_rounds, 8);
        assert_eq!(config.limits.max_edit_attempts, 3);
        assert_eq!(config.limits.max_creation_error_rounds, 3);
        assert_eq!(config.fields.bindings.len(), 6);
        assert_eq!(config.fields.bindings[0].field, Field::ProjectId);
        assert_eq!(config.fields.bindings[5].field, Field::Division);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = TempDir::new().unwrap();
        let config = SnowConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.limits.max_stale_retries, 3);
    }

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        SnowConfig::write_default(dir.path()).unwrap();
        assert!(dir.path().join(".snowrecon/config.toml").exists());

        let config = SnowConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.error_patterns.invalid_email, "Invalid email address");
        assert_eq!(config.fields.bindings, default_bindings());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[username]\ndomain = \"corp.test\"\n\n[limits]\nmax_disambiguation_rounds = 4\n",
        )
        .unwrap();

        let config = SnowConfig::load(&path).unwrap();
        assert_eq!(config.username.domain, "corp.test");
        assert_eq!(config.limits.max_disambiguation_rounds, 4);
        assert_eq!(config.limits.max_edit_attempts, 3);
        assert_eq!(config.username.unknown_markers, default_unknown_markers());
    }

    #[test]
    fn test_rejects_empty_domain() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[username]\ndomain = \"  \"\n").unwrap();

        assert!(matches!(SnowConfig::load(&path), Err(SnowError::Config(_))));
    }

    #[test]
    fn test_unknown_markers() {
        let config = SnowConfig::default();
        assert!(config.is_unknown("TBD"));
        assert!(config.is_unknown(" Unknown "));
        assert!(config.is_unknown(""));
        assert!(!config.is_unknown("E123"));
    }
}
