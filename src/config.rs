//! TOML configuration for the access control engine.
//!
//! Configuration is loaded once, validated by [`Authorizer::new`] and then
//! discarded; the authorizer never reads it again.
//!
//! # Example TOML Format
//!
//! ```toml
//! [access_control]
//! default_policy = "deny"
//!
//! [[access_control.networks]]
//! name = "internal"
//! networks = ["10.0.0.0/8", "192.168.1.1"]
//!
//! [[access_control.rules]]
//! domain = "public.example.com"
//! policy = "bypass"
//!
//! [[access_control.rules]]
//! domain = ["*.example.com"]
//! networks = ["internal"]
//! policy = "one_factor"
//!
//! [[access_control.rules]]
//! domain_regex = '^(?P<User>\w+)\.home\.example\.com$'
//! resources = ['^/admin/.*$']
//! methods = ["GET", "HEAD"]
//! subject = [["group:admins", "user:john"], "group:ops"]
//! query = [[{ operator = "present", key = "token" }]]
//! policy = "two_factor"
//!
//! [[clients]]
//! id = "grafana"
//! authorization_policy = "one_factor"
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use proxy_authz::{Authorizer, AuthorizerConfig};
//!
//! let config = AuthorizerConfig::from_file("config/access_control.toml")?;
//! let authorizer = Authorizer::new(&config)?;
//! ```
//!
//! [`Authorizer::new`]: crate::Authorizer::new

use crate::authorizer::Authorizer;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizerConfig {
    /// Access control rules and defaults.
    #[serde(default)]
    pub access_control: AccessControlConfig,
    /// Registered OAuth2 clients. Only their policies are used here.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

/// Access control section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessControlConfig {
    /// Policy applied when no rule matches.
    #[serde(default = "default_policy")]
    pub default_policy: String,
    /// Named network groups.
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
    /// Ordered rules; the first match wins.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

fn default_policy() -> String {
    crate::level::POLICY_DENY.to_string()
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            default_policy: default_policy(),
            networks: Vec::new(),
            rules: Vec::new(),
        }
    }
}

/// A named group of network literals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Group name, referenced from rules.
    pub name: String,
    /// Addresses or CIDR ranges.
    #[serde(default, deserialize_with = "one_or_many")]
    pub networks: Vec<String>,
}

/// A single rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Domain names: exact, `*.suffix`, `{user}.suffix` or `{group}.suffix`.
    #[serde(default, deserialize_with = "one_or_many")]
    pub domain: Vec<String>,
    /// Domain regular expressions.
    #[serde(default, deserialize_with = "one_or_many")]
    pub domain_regex: Vec<String>,
    /// Policy name.
    pub policy: String,
    /// Subject predicates: OR of AND groups.
    #[serde(default, deserialize_with = "subject_groups")]
    pub subject: Vec<Vec<String>>,
    /// Network group names or literals.
    #[serde(default, deserialize_with = "one_or_many")]
    pub networks: Vec<String>,
    /// Path regular expressions.
    #[serde(default, deserialize_with = "one_or_many")]
    pub resources: Vec<String>,
    /// HTTP methods, case-insensitive.
    #[serde(default, deserialize_with = "one_or_many")]
    pub methods: Vec<String>,
    /// Query conditions: OR of AND groups.
    #[serde(default)]
    pub query: Vec<Vec<QueryConfig>>,
}

impl RuleConfig {
    /// Create a rule with the given policy name and no criteria.
    pub fn new(policy: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            ..Self::default()
        }
    }

    /// Add a domain name.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain.push(domain.into());
        self
    }

    /// Add a domain regular expression.
    pub fn domain_regex(mut self, pattern: impl Into<String>) -> Self {
        self.domain_regex.push(pattern.into());
        self
    }

    /// Add a resource regular expression.
    pub fn resource(mut self, pattern: impl Into<String>) -> Self {
        self.resources.push(pattern.into());
        self
    }

    /// Add an HTTP method.
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.methods.push(method.into());
        self
    }

    /// Add a network group name or literal.
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.networks.push(network.into());
        self
    }

    /// Add a subject group whose predicates must all hold.
    pub fn subject<I, S>(mut self, predicates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject.push(predicates.into_iter().map(Into::into).collect());
        self
    }

    /// Add a query group whose conditions must all hold.
    pub fn query(mut self, conditions: Vec<QueryConfig>) -> Self {
        self.query.push(conditions);
        self
    }
}

/// A single query condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// `equal`, `not equal`, `present`, `absent`, `pattern` or `not pattern`.
    #[serde(default)]
    pub operator: Option<String>,
    /// Query key.
    pub key: String,
    /// Value or pattern, required by the comparing operators.
    #[serde(default)]
    pub value: Option<String>,
}

impl QueryConfig {
    /// Create a condition.
    pub fn new(operator: &str, key: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            operator: Some(operator.to_string()),
            key: key.into(),
            value: value.map(str::to_string),
        }
    }
}

/// An OAuth2 client registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client identifier.
    pub id: String,
    /// Policy the client's consent flow requires.
    #[serde(default = "default_client_policy")]
    pub authorization_policy: String,
}

fn default_client_policy() -> String {
    crate::level::POLICY_TWO_FACTOR.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    OneOrMany::deserialize(deserializer).map(Into::into)
}

/// `subject` accepts a string, a list of strings (each an OR branch), or a
/// list mixing strings and lists (a list is an AND group).
fn subject_groups<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<String>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Subjects {
        One(String),
        Many(Vec<OneOrMany>),
    }

    Ok(match Subjects::deserialize(deserializer)? {
        Subjects::One(value) => vec![vec![value]],
        Subjects::Many(groups) => groups.into_iter().map(Into::into).collect(),
    })
}

/// Error type for configuration loading and compilation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing error.
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// File I/O error.
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Unknown policy name.
    #[error("Invalid policy '{policy}' in {location}")]
    InvalidPolicy {
        /// Where the policy was configured.
        location: String,
        /// The offending name.
        policy: String,
    },

    /// Regular expression failed to compile.
    #[error("Invalid regular expression '{0}': {1}")]
    InvalidRegex(String, #[source] regex::Error),

    /// Network literal failed to parse.
    #[error("Invalid network '{0}': {1}")]
    InvalidNetwork(String, String),

    /// Network group defined twice.
    #[error("Network group '{0}' is defined more than once")]
    DuplicateNetworkGroup(String),

    /// Invalid query condition.
    #[error("Invalid query condition: {0}")]
    InvalidQuery(String),
}

impl AuthorizerConfig {
    /// Parse configuration from a TOML string.
    ///
    /// ```
    /// use proxy_authz::AuthorizerConfig;
    ///
    /// let config = AuthorizerConfig::from_toml(r#"
    /// [access_control]
    /// default_policy = "one_factor"
    ///
    /// [[access_control.rules]]
    /// domain = "public.example.com"
    /// policy = "bypass"
    /// "#).unwrap();
    ///
    /// assert_eq!(config.access_control.rules.len(), 1);
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and compile in one step.
    pub fn into_authorizer(self) -> Result<Authorizer, ConfigError> {
        Authorizer::new(&self)
    }
}

impl Authorizer {
    /// Create an authorizer from a TOML configuration string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        AuthorizerConfig::from_toml(toml_str)?.into_authorizer()
    }

    /// Create an authorizer from a TOML configuration file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        AuthorizerConfig::from_file(path)?.into_authorizer()
    }
}
