//! Caller identity extraction from HTTP requests.
//!
//! The authorization engine never authenticates anyone; it is handed an
//! [`Identity`] by whatever sits in front of it. A [`SubjectExtractor`]
//! reads that identity from the request, typically from headers set by a
//! session layer or from an extension inserted by an earlier middleware.
//!
//! ```
//! use proxy_authz::{HeaderSubjectExtractor, SubjectExtractor, SubjectExtractionResult};
//! use http::Request;
//!
//! let extractor = HeaderSubjectExtractor::new();
//! let request = Request::builder()
//!     .header("Remote-User", "john")
//!     .header("Remote-Groups", "admins, dev")
//!     .body(())
//!     .unwrap();
//!
//! match extractor.extract_subject(&request) {
//!     SubjectExtractionResult::Identified(identity) => {
//!         assert_eq!(identity.username, "john");
//!         assert_eq!(identity.groups, vec!["admins", "dev"]);
//!     }
//!     _ => panic!("expected an identity"),
//! }
//! ```

use crate::level::AuthenticationLevel;
use crate::types::Subject;
use http::Request;
use std::net::IpAddr;
use std::sync::Arc;

/// Default header carrying the username.
pub const HEADER_REMOTE_USER: &str = "Remote-User";
/// Default header carrying comma separated groups.
pub const HEADER_REMOTE_GROUPS: &str = "Remote-Groups";
/// Default header carrying the OAuth2 client identifier.
pub const HEADER_REMOTE_CLIENT: &str = "Remote-Client-Id";
/// Default header carrying the authentication level.
pub const HEADER_REMOTE_AUTH_LEVEL: &str = "Remote-Auth-Level";

/// Who the caller is and how strongly they authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    /// Username, empty for pure OAuth2 clients.
    pub username: String,
    /// Group memberships.
    pub groups: Vec<String>,
    /// OAuth2 client identifier.
    pub client_id: String,
    /// Authentication level held.
    pub level: AuthenticationLevel,
}

impl Identity {
    /// An identity for the given user, authenticated with one factor.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            level: AuthenticationLevel::OneFactor,
            ..Self::default()
        }
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

    /// Set the authentication level.
    pub fn with_level(mut self, level: AuthenticationLevel) -> Self {
        self.level = level;
        self
    }

    /// Build the matching subject for a request from `ip`.
    pub fn to_subject(&self, ip: IpAddr) -> Subject {
        Subject::new(self.username.clone(), ip)
            .with_groups(self.groups.iter().cloned())
            .with_client_id(self.client_id.clone())
    }
}

/// Result of subject extraction.
#[derive(Debug, Clone)]
pub enum SubjectExtractionResult {
    /// The caller is identified.
    Identified(Identity),
    /// No identity is attached to the request.
    Anonymous,
    /// The request carried identity data that could not be read.
    Error(String),
}

impl SubjectExtractionResult {
    /// The identity, or an empty unauthenticated one.
    pub fn identity_or_anonymous(self) -> Identity {
        match self {
            Self::Identified(identity) => identity,
            Self::Anonymous | Self::Error(_) => Identity::default(),
        }
    }
}

/// Trait for extracting the caller identity from HTTP requests.
///
/// The trait is synchronous because identity extraction reads headers or
/// request extensions.
///
/// # Example
/// ```
/// use proxy_authz::{Identity, SubjectExtractor, SubjectExtractionResult};
/// use http::Request;
///
/// /// Trust a single service account header.
/// struct ServiceAccountExtractor;
///
/// impl<B> SubjectExtractor<B> for ServiceAccountExtractor {
///     fn extract_subject(&self, request: &Request<B>) -> SubjectExtractionResult {
///         match request.headers().get("X-Service-Account").and_then(|v| v.to_str().ok()) {
///             Some(name) => SubjectExtractionResult::Identified(
///                 Identity::new(name).with_groups(["services"]),
///             ),
///             None => SubjectExtractionResult::Anonymous,
///         }
///     }
/// }
/// ```
pub trait SubjectExtractor<B>: Send + Sync {
    /// Extract the caller identity from an HTTP request.
    fn extract_subject(&self, request: &Request<B>) -> SubjectExtractionResult;
}

impl<B, T: SubjectExtractor<B>> SubjectExtractor<B> for Arc<T> {
    fn extract_subject(&self, request: &Request<B>) -> SubjectExtractionResult {
        (**self).extract_subject(request)
    }
}

impl<B, T: SubjectExtractor<B> + ?Sized> SubjectExtractor<B> for Box<T> {
    fn extract_subject(&self, request: &Request<B>) -> SubjectExtractionResult {
        (**self).extract_subject(request)
    }
}

/// Extract the identity from `Remote-*` headers set by a session layer.
///
/// A request with a username, groups or client header is identified, in line
/// with [`Subject::is_anonymous`](crate::Subject::is_anonymous). Without an
/// auth level header an identified caller counts as one-factor.
///
/// # Example
/// ```
/// use proxy_authz::HeaderSubjectExtractor;
///
/// let extractor = HeaderSubjectExtractor::new()
///     .with_user_header("X-Auth-User")
///     .with_groups_header("X-Auth-Groups");
/// ```
#[derive(Debug, Clone)]
pub struct HeaderSubjectExtractor {
    user_header: String,
    groups_header: String,
    client_header: String,
    level_header: String,
}

impl Default for HeaderSubjectExtractor {
    fn default() -> Self {
        Self {
            user_header: HEADER_REMOTE_USER.to_string(),
            groups_header: HEADER_REMOTE_GROUPS.to_string(),
            client_header: HEADER_REMOTE_CLIENT.to_string(),
            level_header: HEADER_REMOTE_AUTH_LEVEL.to_string(),
        }
    }
}

impl HeaderSubjectExtractor {
    /// Create an extractor using the default `Remote-*` headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the username header.
    pub fn with_user_header(mut self, header: impl Into<String>) -> Self {
        self.user_header = header.into();
        self
    }

    /// Set the groups header.
    pub fn with_groups_header(mut self, header: impl Into<String>) -> Self {
        self.groups_header = header.into();
        self
    }

    /// Set the OAuth2 client header.
    pub fn with_client_header(mut self, header: impl Into<String>) -> Self {
        self.client_header = header.into();
        self
    }

    /// Set the authentication level header.
    pub fn with_level_header(mut self, header: impl Into<String>) -> Self {
        self.level_header = header.into();
        self
    }

    fn header<'a, B>(request: &'a Request<B>, name: &str) -> Result<Option<&'a str>, String> {
        match request.headers().get(name) {
            Some(value) => value
                .to_str()
                .map(|s| Some(s.trim()).filter(|s| !s.is_empty()))
                .map_err(|_| format!("header '{}' is not valid UTF-8", name)),
            None => Ok(None),
        }
    }

    fn identity<B>(&self, request: &Request<B>) -> Result<Option<Identity>, String> {
        let username = Self::header(request, &self.user_header)?;
        let client_id = Self::header(request, &self.client_header)?;
        let groups: Vec<String> = Self::header(request, &self.groups_header)?
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if username.is_none() && client_id.is_none() && groups.is_empty() {
            return Ok(None);
        }

        let level = match Self::header(request, &self.level_header)? {
            Some(value) => AuthenticationLevel::parse_lenient(value),
            None => AuthenticationLevel::OneFactor,
        };

        Ok(Some(Identity {
            username: username.unwrap_or_default().to_string(),
            groups,
            client_id: client_id.unwrap_or_default().to_string(),
            level,
        }))
    }
}

impl<B> SubjectExtractor<B> for HeaderSubjectExtractor {
    fn extract_subject(&self, request: &Request<B>) -> SubjectExtractionResult {
        match self.identity(request) {
            Ok(Some(identity)) => SubjectExtractionResult::Identified(identity),
            Ok(None) => SubjectExtractionResult::Anonymous,
            Err(e) => SubjectExtractionResult::Error(e),
        }
    }
}

/// Extract the identity from a request extension.
///
/// For setups where an authentication middleware inserts its own session
/// type into the request extensions.
///
/// # Example
/// ```
/// use proxy_authz::{ExtensionSubjectExtractor, Identity};
///
/// #[derive(Clone)]
/// struct Session {
///     user: String,
///     mfa: bool,
/// }
///
/// let extractor = ExtensionSubjectExtractor::<Session>::new(|session| {
///     let identity = Identity::new(&session.user);
///     if session.mfa {
///         identity.with_level(proxy_authz::AuthenticationLevel::TwoFactor)
///     } else {
///         identity
///     }
/// });
/// ```
pub struct ExtensionSubjectExtractor<T> {
    extract_fn: Box<dyn Fn(&T) -> Identity + Send + Sync>,
}

impl<T> ExtensionSubjectExtractor<T> {
    /// Create a new extension extractor.
    pub fn new<F>(extract_fn: F) -> Self
    where
        F: Fn(&T) -> Identity + Send + Sync + 'static,
    {
        Self {
            extract_fn: Box::new(extract_fn),
        }
    }
}

impl<T> std::fmt::Debug for ExtensionSubjectExtractor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionSubjectExtractor")
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<B, T: Clone + Send + Sync + 'static> SubjectExtractor<B> for ExtensionSubjectExtractor<T> {
    fn extract_subject(&self, request: &Request<B>) -> SubjectExtractionResult {
        match request.extensions().get::<T>() {
            Some(ext) => SubjectExtractionResult::Identified((self.extract_fn)(ext)),
            None => SubjectExtractionResult::Anonymous,
        }
    }
}

/// An extractor that always returns the same identity.
///
/// Useful for testing.
#[derive(Debug, Clone)]
pub struct FixedSubjectExtractor {
    identity: Identity,
}

impl FixedSubjectExtractor {
    /// Create a new fixed extractor.
    pub fn new(identity: Identity) -> Self {
        Self { identity }
    }
}

impl<B> SubjectExtractor<B> for FixedSubjectExtractor {
    fn extract_subject(&self, _request: &Request<B>) -> SubjectExtractionResult {
        SubjectExtractionResult::Identified(self.identity.clone())
    }
}

/// An extractor that always returns anonymous.
#[derive(Debug, Clone, Default)]
pub struct AnonymousSubjectExtractor;

impl AnonymousSubjectExtractor {
    /// Create a new anonymous extractor.
    pub fn new() -> Self {
        Self
    }
}

impl<B> SubjectExtractor<B> for AnonymousSubjectExtractor {
    fn extract_subject(&self, _request: &Request<B>) -> SubjectExtractionResult {
        SubjectExtractionResult::Anonymous
    }
}

/// Tries several extractors in order and returns the first identity.
pub struct ChainedSubjectExtractor<B> {
    extractors: Vec<Box<dyn SubjectExtractor<B>>>,
}

impl<B> ChainedSubjectExtractor<B> {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Add an extractor to the chain.
    pub fn add<E: SubjectExtractor<B> + 'static>(mut self, extractor: E) -> Self {
        self.extractors.push(Box::new(extractor));
        self
    }
}

impl<B> Default for ChainedSubjectExtractor<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> std::fmt::Debug for ChainedSubjectExtractor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedSubjectExtractor")
            .field("extractors_count", &self.extractors.len())
            .finish()
    }
}

impl<B> SubjectExtractor<B> for ChainedSubjectExtractor<B> {
    fn extract_subject(&self, request: &Request<B>) -> SubjectExtractionResult {
        for extractor in &self.extractors {
            match extractor.extract_subject(request) {
                SubjectExtractionResult::Identified(identity) => {
                    return SubjectExtractionResult::Identified(identity)
                }
                SubjectExtractionResult::Error(e) => {
                    tracing::warn!(error = %e, "Subject extractor failed, trying next");
                }
                SubjectExtractionResult::Anonymous => continue,
            }
        }
        SubjectExtractionResult::Anonymous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    #[test]
    fn test_header_extractor_full() {
        let req = Request::builder()
            .header("Remote-User", "john")
            .header("Remote-Groups", "admins,dev, ,ops")
            .header("Remote-Auth-Level", "two_factor")
            .body(())
            .unwrap();

        match HeaderSubjectExtractor::new().extract_subject(&req) {
            SubjectExtractionResult::Identified(identity) => {
                assert_eq!(identity.username, "john");
                assert_eq!(identity.groups, vec!["admins", "dev", "ops"]);
                assert_eq!(identity.level, AuthenticationLevel::TwoFactor);
                assert!(identity.client_id.is_empty());
            }
            other => panic!("Expected Identified, got {:?}", other),
        }
    }

    #[test]
    fn test_header_extractor_missing() {
        let req = Request::builder().header("Remote-Groups", " , ").body(()).unwrap();

        assert!(matches!(
            HeaderSubjectExtractor::new().extract_subject(&req),
            SubjectExtractionResult::Anonymous
        ));
    }

    #[test]
    fn test_header_extractor_groups_only() {
        let req = Request::builder().header("Remote-Groups", "admins").body(()).unwrap();

        let identity = HeaderSubjectExtractor::new().extract_subject(&req).identity_or_anonymous();
        assert!(identity.username.is_empty());
        assert_eq!(identity.groups, vec!["admins"]);
        assert!(!identity.to_subject("10.0.0.1".parse().unwrap()).is_anonymous());
    }

    #[test]
    fn test_header_extractor_client_only() {
        let req = Request::builder().header("Remote-Client-Id", "grafana").body(()).unwrap();

        let identity = HeaderSubjectExtractor::new().extract_subject(&req).identity_or_anonymous();
        assert_eq!(identity.client_id, "grafana");
        assert!(identity.username.is_empty());
        assert_eq!(identity.level, AuthenticationLevel::OneFactor);
    }

    #[test]
    fn test_header_extractor_invalid_utf8() {
        let mut req = Request::builder().body(()).unwrap();
        req.headers_mut()
            .insert("Remote-User", HeaderValue::from_bytes(b"j\xffhn").unwrap());

        assert!(matches!(
            HeaderSubjectExtractor::new().extract_subject(&req),
            SubjectExtractionResult::Error(_)
        ));
    }

    #[test]
    fn test_custom_headers() {
        let extractor = HeaderSubjectExtractor::new().with_user_header("X-User");
        let req = Request::builder()
            .header("X-User", "bob")
            .header("Remote-Auth-Level", "garbage")
            .body(())
            .unwrap();

        let identity = extractor.extract_subject(&req).identity_or_anonymous();
        assert_eq!(identity.username, "bob");
        assert_eq!(identity.level, AuthenticationLevel::NotAuthenticated);
    }

    #[test]
    fn test_extension_extractor() {
        #[derive(Clone)]
        struct Session(String);

        let extractor = ExtensionSubjectExtractor::<Session>::new(|s| Identity::new(&s.0));
        let mut req = Request::builder().body(()).unwrap();
        assert!(matches!(extractor.extract_subject(&req), SubjectExtractionResult::Anonymous));

        req.extensions_mut().insert(Session("john".into()));
        let identity = extractor.extract_subject(&req).identity_or_anonymous();
        assert_eq!(identity.username, "john");
    }

    #[test]
    fn test_chained_extractor() {
        let chain = ChainedSubjectExtractor::new()
            .add(AnonymousSubjectExtractor::new())
            .add(FixedSubjectExtractor::new(Identity::new("fallback")));

        let req = Request::builder().body(()).unwrap();
        let identity = chain.extract_subject(&req).identity_or_anonymous();
        assert_eq!(identity.username, "fallback");
    }

    #[test]
    fn test_identity_to_subject() {
        let identity = Identity::new("john").with_groups(["dev"]).with_client_id("cli");
        let subject = identity.to_subject("10.0.0.1".parse().unwrap());

        assert_eq!(subject.username, "john");
        assert!(subject.has_group("dev"));
        assert_eq!(subject.client_id, "cli");
        assert!(!subject.is_anonymous());
        assert!(Identity::default().to_subject("10.0.0.1".parse().unwrap()).is_anonymous());
    }
}
