//! The authorizer: ordered rules plus a default policy.
//!
//! The [`Authorizer`] is built once from configuration and is immutable
//! afterwards, so it can be shared across any number of concurrent requests.
//! Configuration reloads build a new authorizer and swap it in through
//! [`SharedAuthorizer`].

use crate::config::{AccessControlConfig, AuthorizerConfig, ClientConfig, ConfigError, NetworkConfig, RuleConfig};
use crate::level::Level;
use crate::network::NetworkCache;
use crate::rule::AccessControlRule;
use crate::types::{Object, Subject};
use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of a decision, with the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Required level.
    pub level: Level,
    /// 1-based position of the matching rule, `None` for the default policy.
    pub position: Option<usize>,
    /// Whether the matching rule constrains identity.
    pub has_subjects: bool,
}

/// Per-rule diagnostic for an explain tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleMatchResult {
    /// 1-based rule position.
    pub position: usize,
    /// Rule policy.
    pub policy: Level,
    /// An earlier rule already fully matched.
    pub skipped: bool,
    /// Domain dimension.
    pub match_domain: bool,
    /// Resource dimension.
    pub match_resources: bool,
    /// Query dimension.
    pub match_query: bool,
    /// Method dimension.
    pub match_methods: bool,
    /// Network dimension.
    pub match_networks: bool,
    /// Lenient subject check.
    pub match_subjects: bool,
    /// Strict subject check.
    pub match_subjects_exact: bool,
}

impl RuleMatchResult {
    fn dimensions_match(&self) -> bool {
        self.match_domain && self.match_resources && self.match_query && self.match_methods && self.match_networks
    }

    /// The rule fully matches the current subject.
    pub fn is_match(&self) -> bool {
        self.dimensions_match() && self.match_subjects_exact
    }

    /// The rule would match once the caller authenticates as a fitting subject.
    pub fn is_potential_match(&self) -> bool {
        self.dimensions_match() && self.match_subjects && !self.match_subjects_exact
    }
}

/// Access control decision engine.
///
/// # Example
/// ```
/// use proxy_authz::{Authorizer, Level, Object, RuleConfig, Subject};
///
/// let authorizer = Authorizer::builder()
///     .default_policy(Level::Denied)
///     .rule(RuleConfig::new("bypass").domain("*.example.com"))
///     .build()
///     .unwrap();
///
/// let subject = Subject::anonymous("10.0.0.1".parse().unwrap());
/// let public = Object::parse("https://public.example.com/", "GET").unwrap();
/// let apex = Object::parse("https://example.com/", "GET").unwrap();
///
/// assert_eq!(authorizer.required_level(&subject, &public), Level::Bypass);
/// assert_eq!(authorizer.required_level(&subject, &apex), Level::Denied);
/// ```
#[derive(Debug, Clone)]
pub struct Authorizer {
    default_policy: Level,
    rules: Vec<AccessControlRule>,
    second_factor: bool,
}

impl Authorizer {
    /// Compile the configuration.
    ///
    /// Any invalid policy, regex, network literal or query operator is an
    /// error; no partially built authorizer is ever returned.
    pub fn new(config: &AuthorizerConfig) -> Result<Self, ConfigError> {
        Self::compile(&config.access_control, &config.clients)
    }

    /// Create a builder for programmatic construction.
    pub fn builder() -> AuthorizerBuilder {
        AuthorizerBuilder::new()
    }

    fn compile(access_control: &AccessControlConfig, clients: &[ClientConfig]) -> Result<Self, ConfigError> {
        let default_policy = parse_policy(&access_control.default_policy, "default_policy")?;

        let mut cache = NetworkCache::with_groups(&access_control.networks)?;

        let rules = access_control
            .rules
            .iter()
            .enumerate()
            .map(|(i, rule)| AccessControlRule::new(i + 1, rule, &mut cache))
            .collect::<Result<Vec<_>, _>>()?;

        let mut second_factor =
            default_policy == Level::TwoFactor || rules.iter().any(|r| r.policy() == Level::TwoFactor);
        for client in clients {
            let policy = parse_policy(&client.authorization_policy, &format!("client '{}'", client.id))?;
            second_factor |= policy == Level::TwoFactor;
        }

        tracing::debug!(
            rules = rules.len(),
            networks = cache.len(),
            default_policy = %default_policy,
            second_factor,
            "Compiled access control rules"
        );

        Ok(Self {
            default_policy,
            rules,
            second_factor,
        })
    }

    /// Policy applied when no rule matches.
    pub fn default_policy(&self) -> Level {
        self.default_policy
    }

    /// The ordered rules.
    pub fn rules(&self) -> &[AccessControlRule] {
        &self.rules
    }

    /// True when any path through the configuration can require two factors.
    pub fn is_second_factor_enabled(&self) -> bool {
        self.second_factor
    }

    /// Level required for the request: the policy of the first matching
    /// rule, or the default policy.
    pub fn required_level(&self, subject: &Subject, object: &Object) -> Level {
        self.evaluate(subject, object).level
    }

    /// Evaluate the request and report which rule decided it.
    pub fn evaluate(&self, subject: &Subject, object: &Object) -> Decision {
        tracing::debug!(
            subject = %subject,
            object = %object,
            method = %object.method,
            "Checking authorization"
        );

        for rule in &self.rules {
            if rule.is_match(subject, object) {
                tracing::trace!(
                    position = rule.position(),
                    subject = %subject,
                    object = %object,
                    method = %object.method,
                    policy = %rule.policy(),
                    "ACL rule HIT"
                );
                return Decision {
                    level: rule.policy(),
                    position: Some(rule.position()),
                    has_subjects: rule.has_subjects(),
                };
            }
            tracing::trace!(
                position = rule.position(),
                subject = %subject,
                object = %object,
                method = %object.method,
                "ACL rule MISS"
            );
        }

        tracing::debug!(
            subject = %subject,
            object = %object,
            method = %object.method,
            policy = %self.default_policy,
            "No matching rule, applying default policy"
        );

        Decision {
            level: self.default_policy,
            position: None,
            has_subjects: false,
        }
    }

    /// Evaluate every rule without short-circuiting.
    ///
    /// Rules after the first full match are flagged `skipped`.
    pub fn rule_match_results(&self, subject: &Subject, object: &Object) -> Vec<RuleMatchResult> {
        let mut skipped = false;

        self.rules
            .iter()
            .map(|rule| {
                let result = RuleMatchResult {
                    position: rule.position(),
                    policy: rule.policy(),
                    skipped,
                    match_domain: rule.matches_domains(subject, object),
                    match_resources: rule.matches_resources(subject, object),
                    match_query: rule.matches_query(object),
                    match_methods: rule.matches_methods(object),
                    match_networks: rule.matches_networks(subject),
                    match_subjects: rule.matches_subjects(subject),
                    match_subjects_exact: rule.matches_subjects_exact(subject),
                };
                skipped = skipped || result.is_match();
                result
            })
            .collect()
    }
}

fn parse_policy(policy: &str, location: &str) -> Result<Level, ConfigError> {
    policy.parse().map_err(|_| ConfigError::InvalidPolicy {
        location: location.to_string(),
        policy: policy.to_string(),
    })
}

/// Builder for constructing an [`Authorizer`] without a configuration file.
#[derive(Debug, Default)]
pub struct AuthorizerBuilder {
    access_control: AccessControlConfig,
    clients: Vec<ClientConfig>,
}

impl AuthorizerBuilder {
    /// Create a new builder. The default policy is `deny`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the policy applied when no rule matches.
    pub fn default_policy(mut self, level: Level) -> Self {
        self.access_control.default_policy = level.policy_name().to_string();
        self
    }

    /// Define a named network group.
    pub fn network<I, S>(mut self, name: impl Into<String>, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.access_control.networks.push(NetworkConfig {
            name: name.into(),
            networks: networks.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Append a rule. Rules are evaluated in insertion order.
    pub fn rule(mut self, rule: RuleConfig) -> Self {
        self.access_control.rules.push(rule);
        self
    }

    /// Register an OAuth2 client policy.
    pub fn client_policy(mut self, id: impl Into<String>, level: Level) -> Self {
        self.clients.push(ClientConfig {
            id: id.into(),
            authorization_policy: level.policy_name().to_string(),
        });
        self
    }

    /// Build the authorizer.
    pub fn build(self) -> Result<Authorizer, ConfigError> {
        Authorizer::compile(&self.access_control, &self.clients)
    }

    /// Build the authorizer behind a reloadable handle.
    pub fn build_shared(self) -> Result<SharedAuthorizer, ConfigError> {
        self.build().map(SharedAuthorizer::new)
    }
}

/// A reloadable, shareable handle to the current [`Authorizer`].
///
/// Readers take a snapshot with [`load`](Self::load); a reload swaps the
/// whole authorizer atomically and in-flight requests keep their snapshot.
#[derive(Debug, Clone)]
pub struct SharedAuthorizer {
    current: Arc<ArcSwap<Authorizer>>,
}

impl SharedAuthorizer {
    /// Wrap an authorizer.
    pub fn new(authorizer: Authorizer) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(authorizer)),
        }
    }

    /// Snapshot of the current authorizer.
    pub fn load(&self) -> Arc<Authorizer> {
        self.current.load_full()
    }

    /// Replace the current authorizer.
    pub fn replace(&self, authorizer: Authorizer) {
        self.current.store(Arc::new(authorizer));
    }

    /// Compile a new configuration and swap it in.
    ///
    /// On error the current authorizer keeps serving.
    pub fn reload(&self, config: &AuthorizerConfig) -> Result<(), ConfigError> {
        match Authorizer::new(config) {
            Ok(authorizer) => {
                tracing::info!(rules = authorizer.rules().len(), "Reloaded access control rules");
                self.replace(authorizer);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Access control reload failed, keeping current rules");
                Err(e)
            }
        }
    }
}

impl From<Authorizer> for SharedAuthorizer {
    fn from(authorizer: Authorizer) -> Self {
        Self::new(authorizer)
    }
}
