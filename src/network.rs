//! Network literal compilation and de-duplication.
//!
//! Rules refer to networks either by a literal (`10.0.0.1`, `10.0.0.0/8`,
//! `fec0::1`) or by the name of a configured network group. The
//! [`NetworkCache`] compiles each literal once and hands out shared
//! [`Arc<IpNetwork>`] handles, so the same literal used by several rules or
//! groups resolves to the very same object.

use crate::config::{ConfigError, NetworkConfig};
use ipnetwork::IpNetwork;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

/// Parse a network literal.
///
/// A bare IPv4 address becomes a `/32`, a bare IPv6 address a `/128`. Host
/// bits of a CIDR are cleared, so `10.1.2.3/8` compiles to `10.0.0.0/8`.
/// IPv4-mapped IPv6 networks compile to their IPv4 equivalent.
///
/// ```
/// use proxy_authz::parse_network;
///
/// assert_eq!(parse_network("10.0.0.1").unwrap().to_string(), "10.0.0.1/32");
/// assert_eq!(parse_network("10.1.2.3/8").unwrap().to_string(), "10.0.0.0/8");
/// assert_eq!(parse_network("::ffff:10.0.0.0/104").unwrap().to_string(), "10.0.0.0/8");
/// assert!(parse_network("10.0.0.300").is_err());
/// ```
pub fn parse_network(literal: &str) -> Result<IpNetwork, ConfigError> {
    let literal = literal.trim();
    let invalid = |reason: String| ConfigError::InvalidNetwork(literal.to_string(), reason);

    let network = match literal.split_once('/') {
        Some(_) => literal
            .parse::<IpNetwork>()
            .map_err(|e| invalid(e.to_string()))?,
        None => {
            let addr = literal
                .parse::<IpAddr>()
                .map_err(|e| invalid(e.to_string()))?;
            let prefix = if addr.is_ipv4() { 32 } else { 128 };
            IpNetwork::new(addr, prefix).map_err(|e| invalid(e.to_string()))?
        }
    };

    let network = IpNetwork::new(network.network(), network.prefix()).map_err(|e| invalid(e.to_string()))?;

    // addresses are matched in canonical form, so mapped ranges compile to IPv4
    match network {
        IpNetwork::V6(v6) if v6.prefix() >= 96 => match v6.network().to_ipv4_mapped() {
            Some(v4) => IpNetwork::new(IpAddr::V4(v4), v6.prefix() - 96).map_err(|e| invalid(e.to_string())),
            None => Ok(network),
        },
        _ => Ok(network),
    }
}

/// Construction-time arena of compiled networks.
///
/// Compiled networks are keyed by the literal as written and by their
/// canonical form. The first compiled object for a key wins; later lookups
/// return it unchanged.
#[derive(Debug, Default)]
pub struct NetworkCache {
    compiled: HashMap<String, Arc<IpNetwork>>,
    groups: HashMap<String, Vec<Arc<IpNetwork>>>,
}

impl NetworkCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache pre-populated with the configured network groups.
    pub fn with_groups(groups: &[NetworkConfig]) -> Result<Self, ConfigError> {
        let mut cache = Self::new();
        for group in groups {
            cache.add_group(&group.name, &group.networks)?;
        }
        Ok(cache)
    }

    /// Register a named group of literals.
    pub fn add_group<S: AsRef<str>>(&mut self, name: &str, literals: &[S]) -> Result<(), ConfigError> {
        if self.groups.contains_key(name) {
            return Err(ConfigError::DuplicateNetworkGroup(name.to_string()));
        }

        let networks = literals
            .iter()
            .map(|literal| self.compile(literal.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::trace!(group = name, count = networks.len(), "Registered network group");
        self.groups.insert(name.to_string(), networks);
        Ok(())
    }

    /// Compile a literal, reusing a previously compiled object when possible.
    pub fn compile(&mut self, literal: &str) -> Result<Arc<IpNetwork>, ConfigError> {
        if let Some(network) = self.compiled.get(literal) {
            return Ok(Arc::clone(network));
        }

        let parsed = parse_network(literal)?;
        let canonical = parsed.to_string();

        let network = match self.compiled.get(&canonical) {
            Some(existing) => Arc::clone(existing),
            None => {
                let network = Arc::new(parsed);
                self.compiled.insert(canonical, Arc::clone(&network));
                network
            }
        };

        self.compiled
            .entry(literal.to_string())
            .or_insert_with(|| Arc::clone(&network));

        Ok(network)
    }

    /// Resolve a rule entry: a group name expands to the group's networks,
    /// anything else is compiled as a literal.
    pub fn resolve(&mut self, entry: &str) -> Result<Vec<Arc<IpNetwork>>, ConfigError> {
        if let Some(group) = self.groups.get(entry) {
            return Ok(group.clone());
        }
        Ok(vec![self.compile(entry)?])
    }

    /// Get a registered group.
    pub fn group(&self, name: &str) -> Option<&[Arc<IpNetwork>]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// Number of distinct compiled network objects.
    pub fn len(&self) -> usize {
        let mut seen: Vec<*const IpNetwork> = self.compiled.values().map(Arc::as_ptr).collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }

    /// True when nothing has been compiled.
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }
}

/// The network dimension of a rule: matches when any network contains the
/// source address. An empty matcher matches everything.
#[derive(Debug, Clone, Default)]
pub struct NetworkMatcher {
    networks: Vec<Arc<IpNetwork>>,
}

impl NetworkMatcher {
    /// Create a matcher from compiled networks.
    pub fn new(networks: Vec<Arc<IpNetwork>>) -> Self {
        Self { networks }
    }

    /// The compiled networks.
    pub fn networks(&self) -> &[Arc<IpNetwork>] {
        &self.networks
    }

    /// True when no networks are configured.
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Check whether the address falls within any network.
    ///
    /// IPv4-mapped IPv6 addresses are compared as IPv4.
    pub fn matches(&self, ip: &IpAddr) -> bool {
        if self.networks.is_empty() {
            return true;
        }
        let ip = ip.to_canonical();
        self.networks.iter().any(|network| network.contains(ip))
    }
}
