//! Subject and object value types consumed by every matcher.
//!
//! - [`Subject`]: who is asking (username, groups, OAuth2 client, source IP)
//! - [`Object`]: what is being asked for (scheme, domain, normalized path, method)

use std::fmt;
use std::net::IpAddr;
use url::{Host, Url};

/// Identity of the caller for matching purposes.
///
/// Built fresh per request; the engine never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// Username, empty when unauthenticated.
    pub username: String,
    /// Group memberships. Order is kept for display only.
    pub groups: Vec<String>,
    /// OAuth2 client identifier, empty when the caller is not a client.
    pub client_id: String,
    /// Source address of the request.
    pub ip: IpAddr,
}

impl Subject {
    /// Create a subject for the given username and source address.
    pub fn new(username: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            username: username.into(),
            groups: Vec::new(),
            client_id: String::new(),
            ip,
        }
    }

    /// Create an anonymous subject.
    pub fn anonymous(ip: IpAddr) -> Self {
        Self::new("", ip)
    }

    /// Set the group memberships.
    pub fn with_groups<I, G>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    /// Set the OAuth2 client identifier.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// True when the subject carries no identity at all.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() && self.groups.is_empty() && self.client_id.is_empty()
    }

    /// Exact group membership test.
    pub fn has_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Case-insensitive group membership test.
    pub fn has_group_ignore_case(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.eq_ignore_ascii_case(group))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[username={} groups={} clientid={} ip={}]",
            self.username,
            self.groups.join(","),
            self.client_id,
            self.ip
        )
    }
}

/// The protected resource being requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// The original parsed URL, kept for query inspection.
    pub url: Url,
    /// URL scheme.
    pub scheme: String,
    /// Hostname only, lower-case, no port or brackets.
    pub domain: String,
    /// Decoded and cleaned path with the raw query re-appended.
    pub path: String,
    /// Upper-cased HTTP method.
    pub method: String,
}

impl Object {
    /// Build an object from a parsed URL and a method.
    pub fn new(url: Url, method: &str) -> Self {
        let domain = match url.host() {
            Some(Host::Domain(domain)) => domain.to_ascii_lowercase(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => String::new(),
        };

        Self {
            scheme: url.scheme().to_string(),
            path: normalized_path(&url),
            method: method.trim().to_ascii_uppercase(),
            domain,
            url,
        }
    }

    /// Parse a target URL and build an object from it.
    ///
    /// ```
    /// use proxy_authz::Object;
    ///
    /// let object = Object::parse("https://Home.example.com/a/%2e%2e/b?x=1", "get").unwrap();
    /// assert_eq!(object.domain, "home.example.com");
    /// assert_eq!(object.path, "/b?x=1");
    /// assert_eq!(object.method, "GET");
    /// ```
    pub fn parse(target: &str, method: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Url::parse(target)?, method))
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.scheme, self.domain, self.path)
    }
}

/// Percent-decode and clean the URL path, keeping a meaningful trailing
/// slash, then re-append the raw query.
fn normalized_path(url: &Url) -> String {
    let raw = urlencoding::decode_binary(url.path().as_bytes());
    let decoded = String::from_utf8_lossy(&raw);

    let mut path = if decoded.len() <= 1 {
        "/".to_string()
    } else {
        let mut cleaned = clean_path(&decoded);
        if decoded.ends_with('/') && cleaned != "/" {
            cleaned.push('/');
        }
        cleaned
    };

    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        path.push('?');
        path.push_str(query);
    }

    path
}

/// Lexically clean a slash-separated path.
///
/// Collapses repeated slashes, drops `.` segments and resolves `..` against
/// the preceding segment. A rooted path never climbs above `/`.
pub(crate) fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}
