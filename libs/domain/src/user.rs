//! Directory principal snapshots and the identity-matching rule used by
//! every component that needs to know whether two references name the same
//! person.

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// A snapshot of a directory principal as known at the time it was
/// captured. Two `UserRef`s denote the same person when their directory
/// ids match; when either id is missing, case-insensitive email equality
/// is authoritative. [`UserRef::is_same_person`] is the *only* place this
/// aliasing rule is implemented — every permission and routing decision
/// goes through it rather than re-deriving equality locally.
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// Stable directory identifier (e.g. an Azure AD object id). Optional
    /// but preferred — absent for principals resolved purely by email
    /// (e.g. a `SPECIFIC_EMAIL` approver never looked up against the
    /// directory).
    pub directory_id: Option<String>,
    pub email: String,
    pub display_name: String,
}

impl UserRef {
    #[must_use]
    pub fn new(directory_id: Option<String>, email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            directory_id,
            email: email.into(),
            display_name: display_name.into(),
        }
    }

    /// Construct a `UserRef` from an email alone, defaulting the display
    /// name from the local part of the address (mirrors `SPECIFIC_EMAIL`
    /// approver resolution, §4.6).
    #[must_use]
    pub fn from_email(email: impl Into<String>) -> Self {
        let email = email.into();
        let local_part = email.split('@').next().unwrap_or(&email).to_string();
        Self {
            directory_id: None,
            email,
            display_name: local_part,
        }
    }

    fn email_matches(&self, other: &Self) -> bool {
        self.email.eq_ignore_ascii_case(&other.email)
    }

    /// The single identity-matching predicate used everywhere in this
    /// crate: directory id equality wins when both sides have one, else
    /// case-insensitive email equality decides.
    #[must_use]
    pub fn is_same_person(&self, other: &Self) -> bool {
        match (&self.directory_id, &other.directory_id) {
            (Some(a), Some(b)) => a == b,
            _ => self.email_matches(other),
        }
    }
}

/// The authenticated principal initiating an action: a `UserRef` plus the
/// roles asserted for this call. Roles are opaque strings to this crate
/// (e.g. `"admin"`); only the identity fields participate in matching.
#[typeshare]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user: UserRef,
    pub roles: Vec<String>,
}

impl Actor {
    #[must_use]
    pub fn new(user: UserRef, roles: Vec<String>) -> Self {
        Self { user, roles }
    }

    #[must_use]
    pub fn is_same_person(&self, other: &UserRef) -> bool {
        self.user.is_same_person(other)
    }

    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_directory_id_matches_regardless_of_email_casing() {
        let a = UserRef::new(Some("aad-1".into()), "Bob@X.com", "Bob");
        let b = UserRef::new(Some("aad-1".into()), "bob@x.com", "Robert");
        assert!(a.is_same_person(&b));
    }

    #[test]
    fn different_directory_ids_never_match_even_with_same_email() {
        let a = UserRef::new(Some("aad-1".into()), "bob@x.com", "Bob");
        let b = UserRef::new(Some("aad-2".into()), "bob@x.com", "Bob");
        assert!(!a.is_same_person(&b));
    }

    #[test]
    fn missing_directory_id_falls_back_to_case_insensitive_email() {
        let a = UserRef::new(None, "Carol@X.com", "Carol");
        let b = UserRef::new(None, "carol@x.com", "Carol T.");
        assert!(a.is_same_person(&b));
    }

    #[test]
    fn one_sided_directory_id_falls_back_to_email() {
        let a = UserRef::new(Some("aad-1".into()), "dave@x.com", "Dave");
        let b = UserRef::new(None, "DAVE@X.COM", "Dave");
        assert!(a.is_same_person(&b));
    }

    #[test]
    fn from_email_derives_display_name_from_local_part() {
        let u = UserRef::from_email("cfo@x.com");
        assert_eq!(u.display_name, "cfo");
        assert_eq!(u.directory_id, None);
    }
}
