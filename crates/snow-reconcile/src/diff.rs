//! Field differences between a stored record and the target profile

use serde::Serialize;
use snow_core::{Field, FieldBinding, Record, TargetProfile};

/// One field that needs an edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: Field,
    pub locator: String,
    pub current: String,
    pub target: String,
}

/// Ordered list of edits, in binding order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    pub changes: Vec<FieldChange>,
}

impl FieldDiff {
    /// Compare `record` with `profile` through `bindings`
    ///
    /// Only fields the record has and the profile sets are compared, ignoring
    /// case and surrounding whitespace. Project ID is compared only when
    /// `include_project` is set.
    pub fn between(
        record: &Record,
        profile: &TargetProfile,
        bindings: &[FieldBinding],
        include_project: bool,
    ) -> Self {
        let changes = bindings
            .iter()
            .filter(|binding| include_project || binding.field != Field::ProjectId)
            .filter_map(|binding| {
                let current = record.read_field(&binding.record_key)?;
                let target = binding.field.target_value(profile).trim();
                if target.is_empty() || current.trim().eq_ignore_ascii_case(target) {
                    return None;
                }
                Some(FieldChange {
                    field: binding.field,
                    locator: binding.locator.clone(),
                    current: current.to_string(),
                    target: target.to_string(),
                })
            })
            .collect();

        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Distinct fields touched, in first-seen order
    pub fn fields(&self) -> Vec<Field> {
        let mut fields = Vec::new();
        for change in &self.changes {
            if !fields.contains(&change.field) {
                fields.push(change.field);
            }
        }
        fields
    }
}
