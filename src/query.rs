//! Query matchers over key/value data.
//!
//! A rule's query dimension is a list of [`QueryRule`]s (OR); each rule is a
//! list of [`QueryMatcher`]s (AND). Matchers read from anything implementing
//! [`QueryValues`]: the URL query of an [`Object`], or a claim map.

use crate::config::{ConfigError, QueryConfig};
use crate::types::Object;
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Key/value data a query matcher can inspect.
pub trait QueryValues {
    /// True when the key is present, even with an empty value.
    fn contains_key(&self, key: &str) -> bool;

    /// First value for the key.
    fn first_value(&self, key: &str) -> Option<Cow<'_, str>>;
}

impl QueryValues for Object {
    fn contains_key(&self, key: &str) -> bool {
        self.url.query_pairs().any(|(k, _)| k == key)
    }

    fn first_value(&self, key: &str) -> Option<Cow<'_, str>> {
        self.url.query_pairs().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl QueryValues for HashMap<String, String> {
    fn contains_key(&self, key: &str) -> bool {
        HashMap::contains_key(self, key)
    }

    fn first_value(&self, key: &str) -> Option<Cow<'_, str>> {
        self.get(key).map(|v| Cow::Borrowed(v.as_str()))
    }
}

/// Query operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperator {
    /// Value equals.
    Equal,
    /// Value differs.
    NotEqual,
    /// Key present.
    Present,
    /// Key absent.
    Absent,
    /// Value matches a regex.
    Pattern,
    /// Value does not match a regex.
    NotPattern,
}

impl FromStr for QueryOperator {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().replace('_', " ").as_str() {
            "equal" => Ok(Self::Equal),
            "not equal" => Ok(Self::NotEqual),
            "present" => Ok(Self::Present),
            "absent" => Ok(Self::Absent),
            "pattern" => Ok(Self::Pattern),
            "not pattern" => Ok(Self::NotPattern),
            _ => Err(ConfigError::InvalidQuery(format!("unknown operator '{s}'"))),
        }
    }
}

impl fmt::Display for QueryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Equal => "equal",
            Self::NotEqual => "not equal",
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Pattern => "pattern",
            Self::NotPattern => "not pattern",
        })
    }
}

/// A single compiled query condition.
#[derive(Debug, Clone)]
pub enum QueryMatcher {
    /// Key presence (`present`) or absence (`absent`).
    Present {
        /// Query key.
        key: String,
        /// Expected presence.
        present: bool,
    },
    /// Value equality (`equal`) or inequality (`not equal`).
    Equal {
        /// Query key.
        key: String,
        /// Value to compare with.
        value: String,
        /// Expected outcome of the comparison.
        equal: bool,
    },
    /// Regex match (`pattern`) or mismatch (`not pattern`).
    Pattern {
        /// Query key.
        key: String,
        /// Compiled pattern.
        pattern: Regex,
        /// Expected outcome of the match.
        matches: bool,
    },
}

impl QueryMatcher {
    /// Compile a configured condition.
    ///
    /// The operator defaults to `equal` when a value is given and to
    /// `present` otherwise.
    pub fn new(config: &QueryConfig) -> Result<Self, ConfigError> {
        let operator = match config.operator.as_deref() {
            Some(op) => op.parse()?,
            None if config.value.is_some() => QueryOperator::Equal,
            None => QueryOperator::Present,
        };

        let key = config.key.clone();
        if key.is_empty() {
            return Err(ConfigError::InvalidQuery(format!("operator '{operator}' requires a key")));
        }

        let value = || {
            config
                .value
                .clone()
                .ok_or_else(|| ConfigError::InvalidQuery(format!("operator '{operator}' requires a value for key '{key}'")))
        };

        Ok(match operator {
            QueryOperator::Present | QueryOperator::Absent => Self::Present {
                present: operator == QueryOperator::Present,
                key,
            },
            QueryOperator::Equal | QueryOperator::NotEqual => Self::Equal {
                value: value()?,
                equal: operator == QueryOperator::Equal,
                key,
            },
            QueryOperator::Pattern | QueryOperator::NotPattern => {
                let source = value()?;
                let pattern = Regex::new(&source).map_err(|e| ConfigError::InvalidRegex(source, e))?;
                Self::Pattern {
                    pattern,
                    matches: operator == QueryOperator::Pattern,
                    key,
                }
            }
        })
    }

    /// Evaluate against the data. Missing values compare as empty strings.
    pub fn is_match<Q: QueryValues + ?Sized>(&self, values: &Q) -> bool {
        match self {
            Self::Present { key, present } => values.contains_key(key) == *present,
            Self::Equal { key, value, equal } => {
                let actual = values.first_value(key).unwrap_or_default();
                (actual == value.as_str()) == *equal
            }
            Self::Pattern { key, pattern, matches } => {
                let actual = values.first_value(key).unwrap_or_default();
                pattern.is_match(&actual) == *matches
            }
        }
    }
}

/// Conditions that must all hold.
#[derive(Debug, Clone, Default)]
pub struct QueryRule {
    matchers: Vec<QueryMatcher>,
}

impl QueryRule {
    /// Compile a configured group of conditions.
    pub fn new(configs: &[QueryConfig]) -> Result<Self, ConfigError> {
        let matchers = configs.iter().map(QueryMatcher::new).collect::<Result<_, _>>()?;
        Ok(Self { matchers })
    }

    /// The compiled conditions.
    pub fn matchers(&self) -> &[QueryMatcher] {
        &self.matchers
    }

    /// True when every condition holds. An empty rule always holds.
    pub fn is_match<Q: QueryValues + ?Sized>(&self, values: &Q) -> bool {
        self.matchers.iter().all(|m| m.is_match(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(operator: Option<&str>, key: &str, value: Option<&str>) -> QueryConfig {
        QueryConfig {
            operator: operator.map(str::to_string),
            key: key.to_string(),
            value: value.map(str::to_string),
        }
    }

    fn object(target: &str) -> Object {
        Object::parse(target, "GET").unwrap()
    }

    #[test]
    fn test_present_and_absent() {
        let present = QueryMatcher::new(&query(Some("present"), "token", None)).unwrap();
        let absent = QueryMatcher::new(&query(Some("absent"), "token", None)).unwrap();

        let with = object("https://example.com/?token=");
        let without = object("https://example.com/?other=1");

        assert!(present.is_match(&with));
        assert!(!present.is_match(&without));
        assert!(!absent.is_match(&with));
        assert!(absent.is_match(&without));
    }

    #[test]
    fn test_equal_and_not_equal() {
        let equal = QueryMatcher::new(&query(None, "mode", Some("admin"))).unwrap();
        let not_equal = QueryMatcher::new(&query(Some("not equal"), "mode", Some("admin"))).unwrap();

        assert!(equal.is_match(&object("https://example.com/?mode=admin&mode=user")));
        assert!(!equal.is_match(&object("https://example.com/?mode=user")));
        assert!(not_equal.is_match(&object("https://example.com/")));
        assert!(!not_equal.is_match(&object("https://example.com/?mode=admin")));
    }

    #[test]
    fn test_pattern() {
        let pattern = QueryMatcher::new(&query(Some("pattern"), "id", Some("^[0-9]+$"))).unwrap();
        let not_pattern = QueryMatcher::new(&query(Some("not_pattern"), "id", Some("^[0-9]+$"))).unwrap();

        assert!(pattern.is_match(&object("https://example.com/?id=42")));
        assert!(!pattern.is_match(&object("https://example.com/?id=x42")));
        assert!(not_pattern.is_match(&object("https://example.com/")));
    }

    #[test]
    fn test_decoded_values() {
        let equal = QueryMatcher::new(&query(Some("equal"), "q", Some("a b"))).unwrap();
        assert!(equal.is_match(&object("https://example.com/?q=a+b")));
        assert!(equal.is_match(&object("https://example.com/?q=a%20b")));
    }

    #[test]
    fn test_claim_map() {
        let rule = QueryRule::new(&[
            query(Some("equal"), "amr", Some("mfa")),
            query(Some("present"), "email", None),
        ])
        .unwrap();

        let mut claims = HashMap::new();
        claims.insert("amr".to_string(), "mfa".to_string());
        assert!(!rule.is_match(&claims));

        claims.insert("email".to_string(), "john@example.com".to_string());
        assert!(rule.is_match(&claims));
    }

    #[test]
    fn test_empty_rule_matches() {
        let rule = QueryRule::new(&[]).unwrap();
        assert!(rule.is_match(&object("https://example.com/")));
    }

    #[test]
    fn test_configuration_errors() {
        assert!(matches!(
            QueryMatcher::new(&query(Some("contains"), "k", Some("v"))),
            Err(ConfigError::InvalidQuery(_))
        ));
        assert!(matches!(
            QueryMatcher::new(&query(Some("equal"), "k", None)),
            Err(ConfigError::InvalidQuery(_))
        ));
        assert!(matches!(
            QueryMatcher::new(&query(Some("pattern"), "k", Some("("))),
            Err(ConfigError::InvalidRegex(..))
        ));
        assert!(QueryMatcher::new(&query(Some("present"), "", None)).is_err());
    }
}
