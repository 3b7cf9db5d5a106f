//! Classifying search result rows against a target identity

use snow_core::{CandidateUsername, Record};

/// Record key of the stored employee ID
pub const EMPLOYEE_ID_KEY: &str = "employee_id";
/// Record key of the stored email
pub const EMAIL_KEY: &str = "email";

/// How the rows of one search relate to the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    /// The row is the target person
    ExactMatch(Record),
    /// The row holds the candidate username but belongs to someone else
    NameCollision(Record),
}

impl MatchResult {
    pub fn is_no_match(&self) -> bool {
        matches!(self, Self::NoMatch)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoMatch => "no_match",
            Self::ExactMatch(_) => "exact_match",
            Self::NameCollision(_) => "name_collision",
        }
    }
}

/// What the rows are compared with
#[derive(Debug, Clone)]
pub struct Identity<'a> {
    /// Known employee ID, `None` when unknown
    pub employee_id: Option<&'a str>,
    /// Known email, `None` when unknown
    pub email: Option<&'a str>,
    /// Current candidate username
    pub username: &'a str,
    /// Record key holding usernames
    pub username_key: &'a str,
    /// The username was just created by this run, so a row carrying it is ours
    pub claimed: bool,
}

impl Identity<'_> {
    /// Classify the rows; the first exact match wins over any collision
    pub fn evaluate(&self, records: Vec<Record>) -> MatchResult {
        let mut collision = None;

        for record in records {
            if self.is_exact(&record) {
                return MatchResult::ExactMatch(record);
            }
            if collision.is_none() && self.carries_username(&record) {
                collision = Some(record);
            }
        }

        collision.map_or(MatchResult::NoMatch, MatchResult::NameCollision)
    }

    fn is_exact(&self, record: &Record) -> bool {
        let by_id = self
            .employee_id
            .is_some_and(|id| identifies(record, EMPLOYEE_ID_KEY, id));
        let by_email = self
            .email
            .is_some_and(|email| identifies(record, EMAIL_KEY, email));

        by_id || by_email || (self.claimed && self.carries_username(record))
    }

    fn carries_username(&self, record: &Record) -> bool {
        if let Some(stored) = record.read_field(self.username_key) {
            return stored.trim().eq_ignore_ascii_case(self.username);
        }
        tokens(record.display_text()).any(|token| token.eq_ignore_ascii_case(self.username))
    }
}

/// Stored field equal to `value`, or display text containing it (case-insensitive)
fn identifies(record: &Record, key: &str, value: &str) -> bool {
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    if record
        .read_field(key)
        .is_some_and(|stored| stored.trim().eq_ignore_ascii_case(value))
    {
        return true;
    }
    record
        .display_text()
        .to_lowercase()
        .contains(&value.to_lowercase())
}

/// A username for `candidate` shown in the row's display text, if any
pub fn username_in_display<'r>(
    record: &'r Record,
    candidate: &CandidateUsername,
) -> Option<&'r str> {
    tokens(record.display_text()).find(|token| candidate.accepts(token))
}

fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| {
        c.is_whitespace() || matches!(c, '|' | ',' | ';' | '(' | ')' | '<' | '>' | '[' | ']')
    })
    .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snow_core::TargetProfile;

    fn identity<'a>(employee_id: Option<&'a str>, email: Option<&'a str>) -> Identity<'a> {
        Identity {
            employee_id,
            email,
            username: "jane.doe@corp.test",
            username_key: "user_name",
            claimed: false,
        }
    }

    #[test]
    fn test_username_read_from_display_text() {
        let profile = TargetProfile {
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            employee_id: "E123".to_string(),
            email: "jane@corp.test".to_string(),
            division: String::new(),
            customer_id: String::new(),
            company: String::new(),
            office_id: String::new(),
            project_id: String::new(),
            organization: String::new(),
            office_location: String::new(),
            is_admin: false,
            requestor_email: String::new(),
        };
        let candidate = CandidateUsername::new(&profile, "corp.test");

        let row = Record::new("Jane Doe | jane@corp.test | jane.doe3@corp.test | E123");
        assert_eq!(username_in_display(&row, &candidate), Some("jane.doe3@corp.test"));

        let row = Record::new("Jane Doe | jane@corp.test | E123");
        assert_eq!(username_in_display(&row, &candidate), None);
    }

    #[test]
    fn test_no_rows_is_no_match() {
        assert_eq!(identity(Some("E123"), None).evaluate(vec![]), MatchResult::NoMatch);
    }

    #[test]
    fn test_email_in_display_text_is_exact() {
        let row = Record::new("Jane Doe | JANE@corp.test | Ops");
        let result = identity(None, Some("jane@corp.test")).evaluate(vec![row.clone()]);
        assert_eq!(result, MatchResult::ExactMatch(row));
    }

    #[test]
    fn test_employee_id_field_is_exact() {
        let row = Record::new("Jane Doe").with_field("employee_id", "e123");
        let result = identity(Some("E123"), None).evaluate(vec![row.clone()]);
        assert_eq!(result, MatchResult::ExactMatch(row));
    }

    #[test]
    fn test_same_username_other_person_is_collision() {
        let row = Record::new("jane.doe@corp.test | Jane Doe | other@corp.test")
            .with_field("email", "other@corp.test");
        let result = identity(Some("E123"), Some("jane@corp.test")).evaluate(vec![row.clone()]);
        assert_eq!(result, MatchResult::NameCollision(row));
    }

    #[test]
    fn test_suffixed_username_is_not_a_collision() {
        let row = Record::new("x").with_field("user_name", "jane.doe1@corp.test");
        assert_eq!(identity(None, None).evaluate(vec![row]), MatchResult::NoMatch);
    }

    #[test]
    fn test_exact_match_wins_over_earlier_collision() {
        let other = Record::new("jane.doe@corp.test other@corp.test");
        let ours = Record::new("Jane Doe jane@corp.test");
        let result = identity(None, Some("jane@corp.test")).evaluate(vec![other, ours.clone()]);
        assert_eq!(result, MatchResult::ExactMatch(ours));
    }

    #[test]
    fn test_claimed_username_is_exact() {
        let row = Record::new("new row").with_field("user_name", "Jane.Doe@corp.test");
        let mut identity = identity(None, None);
        identity.claimed = true;
        assert_eq!(identity.evaluate(vec![row.clone()]), MatchResult::ExactMatch(row));
    }
}
