//! Access control rule definitions and matching logic.
//!
//! An [`AccessControlRule`] ANDs six independent dimensions, each of which
//! ORs its own entries and matches vacuously when empty:
//!
//! - **Domains**: exact, wildcard or regex ([`DomainMatcher`])
//! - **Resources**: path regex ([`RegexMatcher`])
//! - **Query**: query conditions ([`QueryRule`])
//! - **Methods**: upper-cased HTTP verbs
//! - **Networks**: CIDR containment ([`NetworkMatcher`])
//! - **Subjects**: OR of AND predicate groups ([`SubjectGroup`])

use crate::config::{ConfigError, RuleConfig};
use crate::level::Level;
use crate::matcher::{DomainMatcher, RegexMatcher};
use crate::network::{NetworkCache, NetworkMatcher};
use crate::query::QueryRule;
use crate::subject::SubjectGroup;
use crate::types::{Object, Subject};

/// A compiled, immutable access control rule.
#[derive(Debug, Clone)]
pub struct AccessControlRule {
    position: usize,
    domains: Vec<DomainMatcher>,
    resources: Vec<RegexMatcher>,
    query: Vec<QueryRule>,
    methods: Vec<String>,
    networks: NetworkMatcher,
    subjects: Vec<SubjectGroup>,
    policy: Level,
    has_subjects: bool,
}

impl AccessControlRule {
    /// Compile a configured rule. `position` is 1-based.
    pub fn new(position: usize, config: &RuleConfig, cache: &mut NetworkCache) -> Result<Self, ConfigError> {
        let policy = config.policy.parse::<Level>().map_err(|e| ConfigError::InvalidPolicy {
            location: format!("rule #{position}"),
            policy: e.0,
        })?;

        let mut domains: Vec<DomainMatcher> = config.domain.iter().map(|d| DomainMatcher::new(d)).collect();
        for pattern in &config.domain_regex {
            let matcher = DomainMatcher::regex(pattern).map_err(|e| ConfigError::InvalidRegex(pattern.clone(), e))?;
            domains.push(matcher);
        }

        let resources = config
            .resources
            .iter()
            .map(|pattern| RegexMatcher::new(pattern).map_err(|e| ConfigError::InvalidRegex(pattern.clone(), e)))
            .collect::<Result<Vec<_>, _>>()?;

        let query = config
            .query
            .iter()
            .map(|group| QueryRule::new(group))
            .collect::<Result<Vec<_>, _>>()?;

        let mut methods: Vec<String> = Vec::with_capacity(config.methods.len());
        for method in &config.methods {
            let method = method.trim().to_ascii_uppercase();
            if !methods.contains(&method) {
                methods.push(method);
            }
        }

        let mut networks = Vec::new();
        for entry in &config.networks {
            networks.extend(cache.resolve(entry)?);
        }

        let subjects: Vec<SubjectGroup> = config
            .subject
            .iter()
            .filter_map(|group| SubjectGroup::parse(group))
            .collect();

        let has_subjects = !subjects.is_empty()
            || domains.iter().any(DomainMatcher::has_subject)
            || resources.iter().any(RegexMatcher::has_subject);

        Ok(Self {
            position,
            domains,
            resources,
            query,
            methods,
            networks: NetworkMatcher::new(networks),
            subjects,
            policy,
            has_subjects,
        })
    }

    /// 1-based position in the rule list.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Level returned when this rule matches.
    pub fn policy(&self) -> Level {
        self.policy
    }

    /// True when the rule constrains identity, explicitly or through a
    /// subject-bound domain or resource pattern.
    pub fn has_subjects(&self) -> bool {
        self.has_subjects
    }

    /// Domain matchers.
    pub fn domains(&self) -> &[DomainMatcher] {
        &self.domains
    }

    /// Resource matchers.
    pub fn resources(&self) -> &[RegexMatcher] {
        &self.resources
    }

    /// Upper-cased methods.
    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    /// Network matcher.
    pub fn networks(&self) -> &NetworkMatcher {
        &self.networks
    }

    /// Subject groups.
    pub fn subjects(&self) -> &[SubjectGroup] {
        &self.subjects
    }

    /// Check whether the rule applies to the request.
    ///
    /// Uses the lenient subject check, so an anonymous caller matches a
    /// subject-constrained rule until it authenticates.
    #[inline]
    pub fn is_match(&self, subject: &Subject, object: &Object) -> bool {
        self.matches_domains(subject, object)
            && self.matches_resources(subject, object)
            && self.matches_query(object)
            && self.matches_methods(object)
            && self.matches_networks(subject)
            && self.matches_subjects(subject)
    }

    /// Domain dimension.
    pub fn matches_domains(&self, subject: &Subject, object: &Object) -> bool {
        self.domains.is_empty() || self.domains.iter().any(|d| d.is_match(&object.domain, subject))
    }

    /// Resource dimension, matched against the normalized path and query.
    pub fn matches_resources(&self, subject: &Subject, object: &Object) -> bool {
        self.resources.is_empty() || self.resources.iter().any(|r| r.is_match(&object.path, subject))
    }

    /// Query dimension.
    pub fn matches_query(&self, object: &Object) -> bool {
        self.query.is_empty() || self.query.iter().any(|q| q.is_match(object))
    }

    /// Method dimension.
    pub fn matches_methods(&self, object: &Object) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| *m == object.method)
    }

    /// Network dimension.
    pub fn matches_networks(&self, subject: &Subject) -> bool {
        self.networks.matches(&subject.ip)
    }

    /// Lenient subject check: anonymous subjects always pass.
    pub fn matches_subjects(&self, subject: &Subject) -> bool {
        subject.is_anonymous() || self.matches_subjects_exact(subject)
    }

    /// Strict subject check: anonymous subjects fail any non-empty subject list.
    pub fn matches_subjects_exact(&self, subject: &Subject) -> bool {
        if self.subjects.is_empty() {
            return true;
        }
        if subject.is_anonymous() {
            return false;
        }
        self.subjects.iter().any(|group| group.is_match(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn compile(config: RuleConfig) -> AccessControlRule {
        AccessControlRule::new(1, &config, &mut NetworkCache::new()).unwrap()
    }

    fn object(target: &str, method: &str) -> Object {
        Object::parse(target, method).unwrap()
    }

    #[test]
    fn test_empty_rule_matches_everything() {
        let rule = compile(RuleConfig::new("deny"));
        assert!(!rule.has_subjects());
        assert!(rule.is_match(&Subject::anonymous(ip("8.8.8.8")), &object("https://x.org/a?b", "")));
        assert!(rule.is_match(
            &Subject::new("john", ip("::1")).with_groups(["dev"]),
            &object("http://example.com/", "DELETE")
        ));
    }

    #[test]
    fn test_domains_are_ored() {
        let rule = compile(RuleConfig::new("bypass").domain("a.example.com").domain("*.b.example.com"));
        let subject = Subject::anonymous(ip("10.0.0.1"));
        assert!(rule.is_match(&subject, &object("https://a.example.com/", "GET")));
        assert!(rule.is_match(&subject, &object("https://x.b.example.com/", "GET")));
        assert!(!rule.is_match(&subject, &object("https://b.example.com/", "GET")));
    }

    #[test]
    fn test_methods_are_normalized() {
        let rule = compile(RuleConfig::new("bypass").method("get").method("Head").method("GET"));
        assert_eq!(rule.methods(), ["GET", "HEAD"]);

        let subject = Subject::anonymous(ip("10.0.0.1"));
        assert!(rule.matches_methods(&object("https://a.example.com/", "get")));
        assert!(!rule.matches_methods(&object("https://a.example.com/", "POST")));
        assert!(!rule.is_match(&subject, &object("https://a.example.com/", "")));
    }

    #[test]
    fn test_resources_include_query() {
        let rule = compile(RuleConfig::new("bypass").resource(r"^/api/.*\?debug=1$"));
        let subject = Subject::anonymous(ip("10.0.0.1"));
        assert!(rule.is_match(&subject, &object("https://a.example.com/api/x?debug=1", "GET")));
        assert!(!rule.is_match(&subject, &object("https://a.example.com/api/x", "GET")));
    }

    #[test]
    fn test_query_dimension() {
        let rule = compile(
            RuleConfig::new("bypass")
                .query(vec![QueryConfig::new("present", "token", None)])
                .query(vec![QueryConfig::new("equal", "public", Some("yes"))]),
        );
        assert!(rule.matches_query(&object("https://a.example.com/?token=x", "GET")));
        assert!(rule.matches_query(&object("https://a.example.com/?public=yes", "GET")));
        assert!(!rule.matches_query(&object("https://a.example.com/?public=no", "GET")));
    }

    #[test]
    fn test_network_dimension() {
        let rule = compile(RuleConfig::new("bypass").network("10.0.0.0/8").network("fec0::1"));
        assert!(rule.matches_networks(&Subject::anonymous(ip("10.230.5.1"))));
        assert!(rule.matches_networks(&Subject::anonymous(ip("fec0::1"))));
        assert!(!rule.matches_networks(&Subject::anonymous(ip("192.168.1.1"))));
    }

    #[test]
    fn test_lenient_vs_strict_subjects() {
        let rule = compile(RuleConfig::new("one_factor").subject(["user:john"]));
        let anonymous = Subject::anonymous(ip("10.0.0.1"));
        let john = Subject::new("john", ip("10.0.0.1"));
        let bob = Subject::new("bob", ip("10.0.0.1"));
        let target = object("https://a.example.com/", "GET");

        assert!(rule.has_subjects());
        assert!(rule.is_match(&anonymous, &target));
        assert!(rule.matches_subjects(&anonymous));
        assert!(!rule.matches_subjects_exact(&anonymous));

        assert!(rule.matches_subjects_exact(&john));
        assert!(!rule.matches_subjects(&bob));
        assert!(!rule.is_match(&bob, &target));
    }

    #[test]
    fn test_subject_groups_or_of_and() {
        let rule = compile(
            RuleConfig::new("one_factor")
                .subject(["user:john", "group:admins"])
                .subject(["group:ops"]),
        );
        let at = ip("10.0.0.1");
        assert!(rule.matches_subjects_exact(&Subject::new("john", at).with_groups(["admins"])));
        assert!(rule.matches_subjects_exact(&Subject::new("bob", at).with_groups(["ops"])));
        assert!(!rule.matches_subjects_exact(&Subject::new("john", at)));
    }

    #[test]
    fn test_unparseable_subjects_do_not_become_vacuous() {
        let rule = compile(RuleConfig::new("one_factor").subject(["nonsense"]).subject(["user:john"]));
        assert_eq!(rule.subjects().len(), 1);
        assert!(!rule.matches_subjects_exact(&Subject::new("bob", ip("10.0.0.1"))));

        let rule = compile(RuleConfig::new("one_factor").subject(["nonsense"]));
        assert!(rule.subjects().is_empty());
        assert!(!rule.has_subjects());
    }

    #[test]
    fn test_subject_bound_patterns_flag_subjects() {
        let rule = compile(RuleConfig::new("one_factor").domain_regex(r"^(?P<User>\w+)\.example\.com$"));
        assert!(rule.has_subjects());
        assert!(rule.subjects().is_empty());

        let rule = compile(RuleConfig::new("one_factor").resource(r"^/(?P<Group>\w+)/"));
        assert!(rule.has_subjects());

        let rule = compile(RuleConfig::new("one_factor").domain("{user}.example.com"));
        assert!(rule.has_subjects());
    }

    #[test]
    fn test_configuration_errors() {
        let mut cache = NetworkCache::new();
        let err = AccessControlRule::new(3, &RuleConfig::new("allow"), &mut cache).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPolicy { ref location, .. } if location == "rule #3"));

        let bad_regex = RuleConfig::new("bypass").resource("(");
        assert!(matches!(AccessControlRule::new(1, &bad_regex, &mut cache), Err(ConfigError::InvalidRegex(..))));

        let bad_network = RuleConfig::new("bypass").network("lan");
        assert!(matches!(AccessControlRule::new(1, &bad_network, &mut cache), Err(ConfigError::InvalidNetwork(..))));
    }
}
