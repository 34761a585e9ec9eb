//! # proxy-authz
//!
//! Access control decision engine for a forward-auth proxy, with
//! [axum](https://docs.rs/axum) 0.8 middleware.
//!
//! Given *who* is asking (a [`Subject`]) and *what* they are asking for (an
//! [`Object`]), the [`Authorizer`] walks an ordered list of rules and returns
//! the [`Level`] of authentication the request requires:
//!
//! - **bypass**: no authentication
//! - **one_factor**: first factor
//! - **two_factor**: both factors
//! - **deny**: never allowed
//!
//! Each rule ANDs six dimensions, each matching vacuously when empty:
//!
//! - **Domain**: exact, `*.suffix` wildcard, `{user}.` / `{group}.` wildcards, regex
//! - **Resources**: path regex, optionally bound to the caller via `User` / `Group` captures
//! - **Query**: presence, equality and pattern conditions on query parameters
//! - **Methods**: HTTP verbs
//! - **Networks**: CIDR ranges, named groups shared across rules
//! - **Subjects**: `user:`, `group:` and `oauth2:client:` predicates, OR of AND groups
//!
//! The first matching rule wins; the default policy applies otherwise.
//!
//! ## Quick Start
//!
//! ```
//! use proxy_authz::{Authorizer, Level, Object, RuleConfig, Subject};
//!
//! let authorizer = Authorizer::builder()
//!     .default_policy(Level::Denied)
//!     .network("lan", ["10.0.0.0/8"])
//!     .rule(RuleConfig::new("bypass").domain("public.example.com"))
//!     .rule(RuleConfig::new("one_factor").domain("*.example.com").network("lan"))
//!     .rule(RuleConfig::new("two_factor").domain("*.example.com").subject(["group:admins"]))
//!     .build()
//!     .unwrap();
//!
//! let john = Subject::new("john", "8.8.8.8".parse().unwrap()).with_groups(["admins"]);
//! let object = Object::parse("https://app.example.com/", "GET").unwrap();
//!
//! assert_eq!(authorizer.required_level(&john, &object), Level::TwoFactor);
//! ```
//!
//! ## Configuration
//!
//! Rules are normally loaded from TOML:
//!
//! ```
//! use proxy_authz::{Authorizer, Level, Object, Subject};
//!
//! let authorizer = Authorizer::from_toml(r#"
//! [access_control]
//! default_policy = "one_factor"
//!
//! [[access_control.rules]]
//! domain = "public.example.com"
//! policy = "bypass"
//! "#).unwrap();
//!
//! let anonymous = Subject::anonymous("10.0.0.1".parse().unwrap());
//! let object = Object::parse("https://public.example.com/", "GET").unwrap();
//! assert_eq!(authorizer.required_level(&anonymous, &object), Level::Bypass);
//! ```
//!
//! Construction validates everything up front: an unknown policy, a bad regex
//! or network literal, or an unknown query operator is a [`ConfigError`].
//!
//! ## Forward Auth
//!
//! [`AccessControlLayer`] turns any axum router into a forward-auth endpoint.
//! The object comes from `X-Forwarded-Proto`, `X-Forwarded-Host`,
//! `X-Forwarded-Uri` and `X-Forwarded-Method`; the caller identity from
//! `Remote-User`, `Remote-Groups`, `Remote-Client-Id` and `Remote-Auth-Level`
//! (see [`HeaderSubjectExtractor`]).
//!
//! ```no_run
//! use axum::{Router, routing::get};
//! use proxy_authz::{AccessControlLayer, Authorizer, JsonDeniedHandler};
//!
//! let authorizer = Authorizer::from_toml_file("config/access_control.toml").unwrap();
//!
//! let app: Router = Router::new()
//!     .route("/api/verify", get(|| async { "OK" }))
//!     .layer(
//!         AccessControlLayer::new(authorizer)
//!             .with_forwarded_ip_header("X-Forwarded-For")
//!             .with_denied_handler(JsonDeniedHandler::new()),
//!     );
//! ```
//!
//! Denials answer 403 when the object is denied outright and 401 when the
//! caller only lacks authentication factors.
//!
//! ## Reloading
//!
//! The layer holds a [`SharedAuthorizer`]. Reloading builds a whole new
//! authorizer and swaps it in atomically; a failed reload keeps the old one.
//!
//! ```
//! use proxy_authz::{Authorizer, AuthorizerConfig, SharedAuthorizer};
//!
//! let shared = SharedAuthorizer::new(Authorizer::builder().build().unwrap());
//! let config = AuthorizerConfig::from_toml("[access_control]\ndefault_policy = \"bypass\"").unwrap();
//! shared.reload(&config).unwrap();
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![forbid(unsafe_code)]

mod authorizer;
mod config;
mod error;
mod extractor;
mod level;
mod matcher;
mod middleware;
mod network;
mod query;
mod rule;
mod subject;
mod types;

// Re-export main types
pub use authorizer::{Authorizer, AuthorizerBuilder, Decision, RuleMatchResult, SharedAuthorizer};
pub use config::{
    AccessControlConfig, AuthorizerConfig, ClientConfig, ConfigError, NetworkConfig, QueryConfig, RuleConfig,
};
pub use error::{AccessDenied, AccessDeniedHandler, AuthzError, DefaultDeniedHandler, JsonDeniedHandler};
pub use extractor::{
    AnonymousSubjectExtractor, ChainedSubjectExtractor, ExtensionSubjectExtractor, FixedSubjectExtractor,
    HeaderSubjectExtractor, Identity, SubjectExtractionResult, SubjectExtractor, HEADER_REMOTE_AUTH_LEVEL,
    HEADER_REMOTE_CLIENT, HEADER_REMOTE_GROUPS, HEADER_REMOTE_USER,
};
pub use level::{
    is_auth_level_sufficient, AuthenticationLevel, Level, UnknownPolicy, POLICY_BYPASS, POLICY_DENY,
    POLICY_ONE_FACTOR, POLICY_TWO_FACTOR,
};
pub use matcher::{DomainMatcher, RegexMatcher, CAPTURE_GROUP, CAPTURE_USER};
pub use middleware::{
    extract_object, AccessControlLayer, AccessControlMiddleware, HEADER_X_FORWARDED_HOST,
    HEADER_X_FORWARDED_METHOD, HEADER_X_FORWARDED_PROTO, HEADER_X_FORWARDED_URI,
};
pub use network::{parse_network, NetworkCache, NetworkMatcher};
pub use query::{QueryMatcher, QueryOperator, QueryRule, QueryValues};
pub use rule::AccessControlRule;
pub use subject::{SubjectGroup, SubjectPredicate};
pub use types::{Object, Subject};

/// Prelude module for convenient imports.
///
/// ```
/// use proxy_authz::prelude::*;
/// ```
pub mod prelude {
    pub use crate::authorizer::{Authorizer, Decision, SharedAuthorizer};
    pub use crate::config::{AuthorizerConfig, ConfigError, RuleConfig};
    pub use crate::error::{AccessDenied, AccessDeniedHandler, AuthzError};
    pub use crate::extractor::{HeaderSubjectExtractor, Identity, SubjectExtractionResult, SubjectExtractor};
    pub use crate::level::{is_auth_level_sufficient, AuthenticationLevel, Level};
    pub use crate::middleware::AccessControlLayer;
    pub use crate::types::{Object, Subject};
}
