//! Domain and resource matchers.
//!
//! Both dimensions share [`RegexMatcher`], which may bind the named capture
//! groups `User` and `Group` to the subject's identity. Domains additionally
//! support exact names, `*.` wildcards and `{user}.`/`{group}.` wildcards
//! through [`DomainMatcher`].

use crate::types::Subject;
use regex::Regex;

/// Capture group name bound to the subject's username.
pub const CAPTURE_USER: &str = "User";
/// Capture group name bound to one of the subject's groups.
pub const CAPTURE_GROUP: &str = "Group";

const PREFIX_USER_WILDCARD: &str = "{user}.";
const PREFIX_GROUP_WILDCARD: &str = "{group}.";

/// A compiled regular expression, optionally bound to the subject.
#[derive(Debug, Clone)]
pub enum RegexMatcher {
    /// Plain pattern match.
    Plain(Regex),
    /// Pattern with `User` and/or `Group` capture groups.
    Subject {
        /// The compiled pattern.
        pattern: Regex,
        /// Index of the `User` capture group.
        user: Option<usize>,
        /// Index of the `Group` capture group.
        group: Option<usize>,
    },
}

impl RegexMatcher {
    /// Compile a pattern, detecting the subject capture groups once.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = Regex::new(pattern)?;

        let mut user = None;
        let mut group = None;
        for (index, name) in pattern.capture_names().enumerate() {
            match name {
                Some(CAPTURE_USER) => user = Some(index),
                Some(CAPTURE_GROUP) => group = Some(index),
                _ => {}
            }
        }

        if user.is_none() && group.is_none() {
            Ok(Self::Plain(pattern))
        } else {
            Ok(Self::Subject { pattern, user, group })
        }
    }

    /// True when the pattern constrains the subject.
    pub fn has_subject(&self) -> bool {
        matches!(self, Self::Subject { .. })
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(pattern) | Self::Subject { pattern, .. } => pattern.as_str(),
        }
    }

    /// Match the input, checking the subject binding when present.
    ///
    /// An anonymous subject passes the binding check once the pattern
    /// itself matches.
    pub fn is_match(&self, input: &str, subject: &Subject) -> bool {
        match self {
            Self::Plain(pattern) => pattern.is_match(input),
            Self::Subject { pattern, user, group } => {
                let Some(captures) = pattern.captures(input) else {
                    return false;
                };

                if subject.is_anonymous() {
                    return true;
                }

                let captured = |index: usize| captures.get(index).map_or("", |m| m.as_str());

                if let Some(index) = *user {
                    if !subject.username.eq_ignore_ascii_case(captured(index)) {
                        return false;
                    }
                }

                if let Some(index) = *group {
                    if !subject.has_group_ignore_case(captured(index)) {
                        return false;
                    }
                }

                true
            }
        }
    }
}

/// A single entry of a rule's domain dimension.
#[derive(Debug, Clone)]
pub enum DomainMatcher {
    /// Case-insensitive equality.
    Exact(String),
    /// `*.example.com`, stored as `.example.com`. The apex does not match.
    Wildcard(String),
    /// `{user}.example.com`, stored as `example.com`.
    UserWildcard(String),
    /// `{group}.example.com`, stored as `example.com`.
    GroupWildcard(String),
    /// Regular expression.
    Regex(RegexMatcher),
}

impl DomainMatcher {
    /// Build a matcher from a configured domain name.
    ///
    /// ```
    /// use proxy_authz::{DomainMatcher, Subject};
    ///
    /// let matcher = DomainMatcher::new("*.example.com");
    /// let anonymous = Subject::anonymous("127.0.0.1".parse().unwrap());
    /// assert!(matcher.is_match("a.b.example.com", &anonymous));
    /// assert!(!matcher.is_match("example.com", &anonymous));
    /// ```
    pub fn new(domain: &str) -> Self {
        let domain = domain.trim().to_ascii_lowercase();

        if let Some(rest) = domain.strip_prefix('*') {
            if rest.starts_with('.') {
                return Self::Wildcard(rest.to_string());
            }
        }
        if let Some(rest) = domain.strip_prefix(PREFIX_USER_WILDCARD) {
            return Self::UserWildcard(rest.to_string());
        }
        if let Some(rest) = domain.strip_prefix(PREFIX_GROUP_WILDCARD) {
            return Self::GroupWildcard(rest.to_string());
        }

        Self::Exact(domain)
    }

    /// Build a matcher from a configured domain regex.
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        RegexMatcher::new(pattern).map(Self::Regex)
    }

    /// True when the matcher encodes a subject constraint.
    pub fn has_subject(&self) -> bool {
        match self {
            Self::UserWildcard(_) | Self::GroupWildcard(_) => true,
            Self::Regex(regex) => regex.has_subject(),
            Self::Exact(_) | Self::Wildcard(_) => false,
        }
    }

    /// Check whether the domain matches.
    pub fn is_match(&self, domain: &str, subject: &Subject) -> bool {
        match self {
            Self::Exact(name) => domain.eq_ignore_ascii_case(name),
            Self::Wildcard(suffix) => ends_with_ignore_case(domain, suffix),
            Self::UserWildcard(name) => {
                let Some(label) = leading_label(domain, name) else {
                    return false;
                };
                if subject.is_anonymous() {
                    return true;
                }
                !subject.username.is_empty() && label.eq_ignore_ascii_case(&subject.username)
            }
            Self::GroupWildcard(name) => {
                let Some(label) = leading_label(domain, name) else {
                    return false;
                };
                if subject.is_anonymous() {
                    return true;
                }
                subject.has_group_ignore_case(label)
            }
            Self::Regex(regex) => regex.is_match(domain, subject),
        }
    }
}

fn ends_with_ignore_case(value: &str, suffix: &str) -> bool {
    value.len() >= suffix.len()
        && value
            .get(value.len() - suffix.len()..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
}

/// For `label.name`, return everything before `.name`.
fn leading_label<'a>(domain: &'a str, name: &str) -> Option<&'a str> {
    let split = domain.len().checked_sub(name.len() + 1)?;
    if split == 0 || !domain.is_char_boundary(split) {
        return None;
    }
    let (label, rest) = domain.split_at(split);
    let rest = rest.strip_prefix('.')?;
    rest.eq_ignore_ascii_case(name).then_some(label)
}
