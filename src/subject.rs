//! Subject predicates: `user:<name>`, `group:<name>`, `oauth2:client:<id>`.
//!
//! A rule's subject dimension is a list of [`SubjectGroup`]s (OR), each of
//! which is a list of [`SubjectPredicate`]s (AND).

use crate::types::Subject;
use std::fmt;

const PREFIX_USER: &str = "user:";
const PREFIX_GROUP: &str = "group:";
const PREFIX_OAUTH2_CLIENT: &str = "oauth2:client:";

/// A single identity predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectPredicate {
    /// Username equality.
    User(String),
    /// Group membership.
    Group(String),
    /// OAuth2 client identifier equality.
    Client(String),
}

impl SubjectPredicate {
    /// Parse a predicate string. Returns `None` for anything unrecognised.
    ///
    /// ```
    /// use proxy_authz::SubjectPredicate;
    ///
    /// assert_eq!(SubjectPredicate::parse("user:john"), Some(SubjectPredicate::User("john".into())));
    /// assert_eq!(SubjectPredicate::parse("team:x"), None);
    /// ```
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();

        let predicate = if let Some(name) = value.strip_prefix(PREFIX_OAUTH2_CLIENT) {
            Self::Client(name.to_string())
        } else if let Some(name) = value.strip_prefix(PREFIX_USER) {
            Self::User(name.to_string())
        } else if let Some(name) = value.strip_prefix(PREFIX_GROUP) {
            Self::Group(name.to_string())
        } else {
            return None;
        };

        (!predicate.value().is_empty()).then_some(predicate)
    }

    fn value(&self) -> &str {
        match self {
            Self::User(v) | Self::Group(v) | Self::Client(v) => v,
        }
    }

    /// Literal comparison against the subject.
    pub fn is_match(&self, subject: &Subject) -> bool {
        match self {
            Self::User(name) => subject.username == *name,
            Self::Group(name) => subject.has_group(name),
            Self::Client(id) => subject.client_id == *id,
        }
    }
}

impl fmt::Display for SubjectPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(name) => write!(f, "{PREFIX_USER}{name}"),
            Self::Group(name) => write!(f, "{PREFIX_GROUP}{name}"),
            Self::Client(id) => write!(f, "{PREFIX_OAUTH2_CLIENT}{id}"),
        }
    }
}

/// Predicates that must all hold. Never empty once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectGroup {
    predicates: Vec<SubjectPredicate>,
}

impl SubjectGroup {
    /// Parse a group of predicate strings.
    ///
    /// Unparseable predicates are skipped with a warning. Returns `None`
    /// when nothing usable remains, so an emptied group is dropped rather
    /// than matching vacuously.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Option<Self> {
        let mut predicates = Vec::with_capacity(values.len());

        for value in values {
            let value = value.as_ref();
            match SubjectPredicate::parse(value) {
                Some(predicate) => predicates.push(predicate),
                None => tracing::warn!(subject = value, "Skipping unparseable subject predicate"),
            }
        }

        if predicates.is_empty() {
            if !values.is_empty() {
                tracing::warn!("Dropping subject group with no valid predicates");
            }
            return None;
        }

        Some(Self { predicates })
    }

    /// The predicates of this group.
    pub fn predicates(&self) -> &[SubjectPredicate] {
        &self.predicates
    }

    /// True when every predicate holds.
    pub fn is_match(&self, subject: &Subject) -> bool {
        self.predicates.iter().all(|p| p.is_match(subject))
    }
}

impl fmt::Display for SubjectGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, predicate) in self.predicates.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{predicate}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn test_parse_predicates() {
        assert_eq!(SubjectPredicate::parse("group:admins"), Some(SubjectPredicate::Group("admins".into())));
        assert_eq!(
            SubjectPredicate::parse("oauth2:client:grafana"),
            Some(SubjectPredicate::Client("grafana".into()))
        );
        assert_eq!(SubjectPredicate::parse("user:"), None);
        assert_eq!(SubjectPredicate::parse("john"), None);
        assert_eq!(SubjectPredicate::parse("oauth2:grafana"), None);
    }

    #[test]
    fn test_display_round_trip() {
        for value in ["user:john", "group:dev", "oauth2:client:app"] {
            assert_eq!(SubjectPredicate::parse(value).unwrap().to_string(), value);
        }
    }

    #[test]
    fn test_group_requires_all() {
        let group = SubjectGroup::parse(&["user:john", "group:admins"]).unwrap();
        let john_admin = Subject::new("john", localhost()).with_groups(["admins"]);
        let john = Subject::new("john", localhost());
        let bob_admin = Subject::new("bob", localhost()).with_groups(["admins"]);

        assert!(group.is_match(&john_admin));
        assert!(!group.is_match(&john));
        assert!(!group.is_match(&bob_admin));
    }

    #[test]
    fn test_literal_comparison() {
        let group = SubjectGroup::parse(&["user:john"]).unwrap();
        assert!(!group.is_match(&Subject::new("John", localhost())));
        assert!(!group.is_match(&Subject::anonymous(localhost())));
    }

    #[test]
    fn test_client_predicate() {
        let group = SubjectGroup::parse(&["oauth2:client:grafana"]).unwrap();
        assert!(group.is_match(&Subject::anonymous(localhost()).with_client_id("grafana")));
        assert!(!group.is_match(&Subject::new("grafana", localhost())));
    }

    #[test]
    fn test_invalid_predicates_skipped() {
        let group = SubjectGroup::parse(&["bogus", "group:dev"]).unwrap();
        assert_eq!(group.predicates().len(), 1);
        assert_eq!(group.to_string(), "group:dev");
    }

    #[test]
    fn test_emptied_group_dropped() {
        assert!(SubjectGroup::parse(&["bogus", "also:bogus"]).is_none());
        assert!(SubjectGroup::parse::<&str>(&[]).is_none());
    }
}
