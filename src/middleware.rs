//! Forward-auth middleware for axum.
//!
//! [`AccessControlLayer`] reconstructs the object a reverse proxy is asking
//! about from the `X-Forwarded-*` headers, identifies the caller through a
//! [`SubjectExtractor`], and asks the current [`Authorizer`] snapshot for the
//! required level. Sufficient requests continue to the inner service with the
//! [`Level`] inserted as a request extension; the rest are answered by the
//! denied handler.
//!
//! [`Authorizer`]: crate::Authorizer

use crate::authorizer::SharedAuthorizer;
use crate::error::{AccessDenied, AccessDeniedHandler, AuthzError, DefaultDeniedHandler};
use crate::extractor::{HeaderSubjectExtractor, Identity, SubjectExtractionResult, SubjectExtractor};
use crate::level::{is_auth_level_sufficient, Level};
use crate::types::Object;

use axum::extract::ConnectInfo;
use axum::response::{IntoResponse, Response};
use futures_util::future::BoxFuture;
use http::{HeaderMap, Request};
use http_body::Body;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use url::Url;

/// Scheme requested by the client.
pub const HEADER_X_FORWARDED_PROTO: &str = "X-Forwarded-Proto";
/// Host requested by the client.
pub const HEADER_X_FORWARDED_HOST: &str = "X-Forwarded-Host";
/// Path and query requested by the client.
pub const HEADER_X_FORWARDED_URI: &str = "X-Forwarded-Uri";
/// Method used by the client.
pub const HEADER_X_FORWARDED_METHOD: &str = "X-Forwarded-Method";

struct LayerState<E> {
    authorizer: SharedAuthorizer,
    subject_extractor: Arc<E>,
    denied_handler: Arc<dyn AccessDeniedHandler>,
    forwarded_ip_header: Option<String>,
}

impl<E> Clone for LayerState<E> {
    fn clone(&self) -> Self {
        Self {
            authorizer: self.authorizer.clone(),
            subject_extractor: self.subject_extractor.clone(),
            denied_handler: self.denied_handler.clone(),
            forwarded_ip_header: self.forwarded_ip_header.clone(),
        }
    }
}

/// A Tower layer that authorizes forwarded requests.
///
/// # Example
/// ```no_run
/// use axum::{Router, routing::get};
/// use proxy_authz::{AccessControlLayer, Authorizer, Level, RuleConfig};
/// use std::net::SocketAddr;
///
/// async fn verify() -> &'static str {
///     "OK"
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let authorizer = Authorizer::builder()
///         .default_policy(Level::OneFactor)
///         .rule(RuleConfig::new("bypass").domain("public.example.com"))
///         .build()
///         .unwrap();
///
///     let app = Router::new()
///         .route("/api/verify", get(verify))
///         .layer(AccessControlLayer::new(authorizer));
///
///     let listener = tokio::net::TcpListener::bind("0.0.0.0:9091").await.unwrap();
///     axum::serve(
///         listener,
///         app.into_make_service_with_connect_info::<SocketAddr>()
///     ).await.unwrap();
/// }
/// ```
pub struct AccessControlLayer<E> {
    state: LayerState<E>,
}

impl<E> Clone for AccessControlLayer<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl AccessControlLayer<HeaderSubjectExtractor> {
    /// Create a layer reading identity from the `Remote-*` headers and
    /// answering denials with plain text.
    pub fn new(authorizer: impl Into<SharedAuthorizer>) -> Self {
        Self {
            state: LayerState {
                authorizer: authorizer.into(),
                subject_extractor: Arc::new(HeaderSubjectExtractor::new()),
                denied_handler: Arc::new(DefaultDeniedHandler),
                forwarded_ip_header: None,
            },
        }
    }
}

impl<E> AccessControlLayer<E> {
    /// Use a custom subject extractor.
    ///
    /// # Example
    /// ```
    /// use proxy_authz::{AccessControlLayer, Authorizer, HeaderSubjectExtractor};
    ///
    /// let authorizer = Authorizer::builder().build().unwrap();
    /// let layer = AccessControlLayer::new(authorizer)
    ///     .with_subject_extractor(HeaderSubjectExtractor::new().with_user_header("X-User"));
    /// ```
    pub fn with_subject_extractor<E2>(self, extractor: E2) -> AccessControlLayer<E2> {
        AccessControlLayer {
            state: LayerState {
                authorizer: self.state.authorizer,
                subject_extractor: Arc::new(extractor),
                denied_handler: self.state.denied_handler,
                forwarded_ip_header: self.state.forwarded_ip_header,
            },
        }
    }

    /// Set a custom access denied handler.
    pub fn with_denied_handler(mut self, handler: impl AccessDeniedHandler + 'static) -> Self {
        self.state.denied_handler = Arc::new(handler);
        self
    }

    /// Set a header to extract the client IP from (e.g., X-Forwarded-For).
    ///
    /// The leftmost address of the header is used. Without it, or when the
    /// header is missing, the connection's peer address is used.
    pub fn with_forwarded_ip_header(mut self, header: impl Into<String>) -> Self {
        self.state.forwarded_ip_header = Some(header.into());
        self
    }

    /// The reloadable authorizer handle.
    pub fn authorizer(&self) -> &SharedAuthorizer {
        &self.state.authorizer
    }
}

impl<S, E> Layer<S> for AccessControlLayer<E> {
    type Service = AccessControlMiddleware<S, E>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessControlMiddleware {
            inner,
            state: self.state.clone(),
        }
    }
}

/// The forward-auth middleware service.
pub struct AccessControlMiddleware<S, E> {
    inner: S,
    state: LayerState<E>,
}

impl<S: Clone, E> Clone for AccessControlMiddleware<S, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            state: self.state.clone(),
        }
    }
}

impl<S, E, ReqBody, ResBody> Service<Request<ReqBody>> for AccessControlMiddleware<S, E>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    E: SubjectExtractor<ReqBody> + 'static,
    ReqBody: Body + Send + 'static,
    ResBody: Body + Default + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<ReqBody>) -> Self::Future {
        let state = self.state.clone();
        let mut inner = self.inner.clone();

        let object = extract_object(&request);
        let client_ip = extract_client_ip(&request, state.forwarded_ip_header.as_deref());
        let extraction = state.subject_extractor.extract_subject(&request);

        Box::pin(async move {
            let object = match object {
                Ok(object) => object,
                Err(e) => {
                    tracing::warn!(error = %e, "Rejecting malformed forwarded request");
                    return Ok(replace_body(e.into_response()));
                }
            };

            let Some(client_ip) = client_ip else {
                tracing::warn!(object = %object, "Failed to extract client IP address");
                return Ok(replace_body(AuthzError::IpExtractionFailed.into_response()));
            };

            let identity = match extraction {
                SubjectExtractionResult::Identified(identity) => identity,
                SubjectExtractionResult::Anonymous => Identity::default(),
                SubjectExtractionResult::Error(e) => {
                    tracing::warn!(error = %e, object = %object, ip = %client_ip, "Failed to extract subject");
                    return Ok(replace_body(AuthzError::SubjectExtractionFailed(e).into_response()));
                }
            };

            let subject = identity.to_subject(client_ip);
            let decision = state.authorizer.load().evaluate(&subject, &object);

            // Subject constraints pass an anonymous caller only provisionally.
            let anonymous = subject.is_anonymous();
            let pending_identity =
                anonymous && decision.has_subjects && matches!(decision.level, Level::Bypass | Level::Denied);

            if !pending_identity && is_auth_level_sufficient(identity.level, decision.level) {
                tracing::trace!(
                    subject = %subject,
                    object = %object,
                    method = %object.method,
                    required = %decision.level,
                    position = ?decision.position,
                    "Access granted"
                );
                request.extensions_mut().insert(decision.level);
                return inner.call(request).await;
            }

            tracing::info!(
                subject = %subject,
                object = %object,
                method = %object.method,
                required = %decision.level,
                current = %identity.level,
                position = ?decision.position,
                "Access denied"
            );

            let denied = AccessDenied::new(decision.level, identity.level, subject.to_string(), object.to_string())
                .with_subject_state(anonymous, decision.has_subjects);
            Ok(replace_body(state.denied_handler.handle(&denied)))
        })
    }
}

fn replace_body<B: Default>(response: Response) -> Response<B> {
    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, B::default())
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AuthzError> {
    match headers.get(name) {
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()).filter(|s| !s.is_empty()))
            .map_err(|_| AuthzError::InvalidForwardedRequest(format!("header '{}' is not valid UTF-8", name))),
        None => Ok(None),
    }
}

/// Build the requested [`Object`] from the forwarded headers, falling back
/// to the request's own URI, `Host` header and method.
///
/// The scheme must be `http` or `https` and the URI must be an absolute
/// path; anything else is rejected before it reaches the engine.
pub fn extract_object<B>(request: &Request<B>) -> Result<Object, AuthzError> {
    let headers = request.headers();

    let scheme = header(headers, HEADER_X_FORWARDED_PROTO)?
        .or_else(|| request.uri().scheme_str())
        .unwrap_or("http")
        .to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(AuthzError::InvalidForwardedRequest(format!("unsupported scheme '{}'", scheme)));
    }

    let host = match header(headers, HEADER_X_FORWARDED_HOST)? {
        Some(value) => value.split(',').next().map(str::trim),
        None => header(headers, http::header::HOST.as_str())?.or_else(|| request.uri().host()),
    }
    .filter(|h| !h.is_empty())
    .ok_or_else(|| AuthzError::InvalidForwardedRequest("missing host".to_string()))?;
    if host.contains(|c: char| matches!(c, '@' | '/' | '\\' | '?' | '#') || c.is_whitespace()) {
        return Err(AuthzError::InvalidForwardedRequest(format!("invalid host '{}'", host)));
    }

    let uri = match header(headers, HEADER_X_FORWARDED_URI)? {
        Some(value) => value,
        None => request.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
    };
    if !uri.starts_with('/') {
        return Err(AuthzError::InvalidForwardedRequest(format!("uri '{}' is not an absolute path", uri)));
    }

    let method = header(headers, HEADER_X_FORWARDED_METHOD)?.unwrap_or_else(|| request.method().as_str());

    let target = format!("{}://{}{}", scheme, host, uri);
    let url = Url::parse(&target)
        .map_err(|e| AuthzError::InvalidForwardedRequest(format!("'{}': {}", target, e)))?;

    Ok(Object::new(url, method))
}

/// Extract the client IP address from the request.
fn extract_client_ip<B>(request: &Request<B>, forwarded_header: Option<&str>) -> Option<IpAddr> {
    if let Some(header_name) = forwarded_header {
        if let Some(value) = request.headers().get(header_name) {
            if let Ok(s) = value.to_str() {
                // client, proxy1, proxy2, ...
                if let Some(first_ip) = s.split(',').next() {
                    if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
                        return Some(ip);
                    }
                }
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authorizer::Authorizer;
    use crate::config::RuleConfig;
    use crate::error::JsonDeniedHandler;
    use axum::body::Body as AxumBody;
    use axum::routing::get;
    use axum::{Extension, Router};
    use http::StatusCode;
    use tower::ServiceExt;

    async fn verify(Extension(level): Extension<Level>) -> String {
        level.to_string()
    }

    fn authorizer() -> Authorizer {
        Authorizer::builder()
            .default_policy(Level::Denied)
            .rule(RuleConfig::new("bypass").domain("public.example.com"))
            .rule(RuleConfig::new("one_factor").domain("app.example.com").resource("^/api/"))
            .rule(RuleConfig::new("two_factor").domain("secure.example.com"))
            .build()
            .unwrap()
    }

    fn app(authorizer: Authorizer) -> Router {
        Router::new()
            .route("/api/verify", get(verify))
            .layer(AccessControlLayer::new(authorizer).with_forwarded_ip_header("X-Forwarded-For"))
    }

    fn forwarded(host: &str, uri: &str) -> http::request::Builder {
        Request::builder()
            .uri("/api/verify")
            .header("X-Forwarded-For", "10.0.0.1, 192.168.0.1")
            .header(HEADER_X_FORWARDED_PROTO, "https")
            .header(HEADER_X_FORWARDED_HOST, host)
            .header(HEADER_X_FORWARDED_URI, uri)
    }

    #[tokio::test]
    async fn test_bypass_anonymous() {
        let response = app(authorizer())
            .oneshot(forwarded("public.example.com", "/").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"bypass");
    }

    #[tokio::test]
    async fn test_anonymous_needs_authentication() {
        let response = app(authorizer())
            .oneshot(forwarded("app.example.com", "/api/users").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_authenticated_user() {
        let request = forwarded("app.example.com", "/api/users")
            .header("Remote-User", "john")
            .body(AxumBody::empty())
            .unwrap();
        let response = app(authorizer()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"one_factor");
    }

    #[tokio::test]
    async fn test_second_factor_required() {
        let one = forwarded("secure.example.com", "/")
            .header("Remote-User", "john")
            .header("Remote-Auth-Level", "one_factor")
            .body(AxumBody::empty())
            .unwrap();
        let response = app(authorizer()).oneshot(one).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let two = forwarded("secure.example.com", "/")
            .header("Remote-User", "john")
            .header("Remote-Auth-Level", "two_factor")
            .body(AxumBody::empty())
            .unwrap();
        let response = app(authorizer()).oneshot(two).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_default_deny_is_forbidden() {
        let request = forwarded("other.example.com", "/")
            .header("Remote-User", "john")
            .header("Remote-Auth-Level", "two_factor")
            .body(AxumBody::empty())
            .unwrap();
        let response = app(authorizer()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_malformed_uri_rejected() {
        let response = app(authorizer())
            .oneshot(forwarded("public.example.com", "relative/path").body(AxumBody::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_client_ip() {
        let request = Request::builder()
            .uri("/api/verify")
            .header(HEADER_X_FORWARDED_HOST, "public.example.com")
            .body(AxumBody::empty())
            .unwrap();
        let response = app(authorizer()).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_reload_is_visible_to_layer() {
        let layer = AccessControlLayer::new(authorizer())
            .with_forwarded_ip_header("X-Forwarded-For")
            .with_denied_handler(JsonDeniedHandler::new());
        let shared = layer.authorizer().clone();
        let app = Router::new().route("/api/verify", get(verify)).layer(layer);

        let request = || forwarded("other.example.com", "/").body(AxumBody::empty()).unwrap();

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        shared.replace(Authorizer::builder().default_policy(Level::Bypass).build().unwrap());

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    fn subject_authorizer() -> Authorizer {
        Authorizer::builder()
            .default_policy(Level::Denied)
            .rule(RuleConfig::new("bypass").domain("team.example.com").subject(["user:john"]))
            .rule(RuleConfig::new("deny").domain("ops.example.com").subject(["user:bob"]))
            .rule(RuleConfig::new("one_factor").domain("team.example.com").domain("ops.example.com"))
            .rule(RuleConfig::new("two_factor").domain("admin.example.com").subject(["group:admins"]))
            .rule(RuleConfig::new("one_factor").domain("{user}.home.example.com"))
            .rule(RuleConfig::new("deny").domain("vault.example.com").resource("^/(?P<User>[a-z]+)/"))
            .build()
            .unwrap()
    }

    async fn status_for(host: &str, user: Option<(&str, &str)>) -> StatusCode {
        let mut request = forwarded(host, "/john/").header("Remote-Auth-Level", "two_factor");
        if let Some((user, groups)) = user {
            request = request.header("Remote-User", user).header("Remote-Groups", groups);
        }
        app(subject_authorizer())
            .oneshot(request.body(AxumBody::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_anonymous_on_subject_bypass_must_authenticate() {
        assert_eq!(status_for("team.example.com", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for("team.example.com", Some(("john", ""))).await, StatusCode::OK);
        assert_eq!(status_for("team.example.com", Some(("bob", ""))).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_anonymous_on_subject_deny_must_authenticate() {
        let request = forwarded("ops.example.com", "/").body(AxumBody::empty()).unwrap();
        let response = Router::new()
            .route("/api/verify", get(verify))
            .layer(
                AccessControlLayer::new(subject_authorizer())
                    .with_forwarded_ip_header("X-Forwarded-For")
                    .with_denied_handler(JsonDeniedHandler::new()),
            )
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(status_for("ops.example.com", Some(("bob", ""))).await, StatusCode::FORBIDDEN);
        assert_eq!(status_for("ops.example.com", Some(("alice", ""))).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_subject_constrained_levels() {
        // two_factor for a group
        assert_eq!(status_for("admin.example.com", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for("admin.example.com", Some(("john", "admins"))).await, StatusCode::OK);
        assert_eq!(status_for("admin.example.com", Some(("john", "dev"))).await, StatusCode::FORBIDDEN);

        // {user}. domain
        assert_eq!(status_for("john.home.example.com", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for("john.home.example.com", Some(("john", ""))).await, StatusCode::OK);
        assert_eq!(status_for("john.home.example.com", Some(("bob", ""))).await, StatusCode::FORBIDDEN);

        // deny bound to a User capture
        assert_eq!(status_for("vault.example.com", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(status_for("vault.example.com", Some(("john", ""))).await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_rejects_userinfo_in_forwarded_host() {
        let response = app(authorizer())
            .oneshot(
                forwarded("secure.example.com@public.example.com", "/")
                    .body(AxumBody::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_extract_object_rejects_host_delimiters() {
        for host in ["a.example.com@b.example.com", "a.example.com/x", "a.example.com?x", "a.example.com#x"] {
            let request = Request::builder()
                .uri("/")
                .header(HEADER_X_FORWARDED_HOST, host)
                .body(())
                .unwrap();
            assert!(matches!(
                extract_object(&request),
                Err(AuthzError::InvalidForwardedRequest(_))
            ));
        }
    }

    #[test]
    fn test_extract_object_fallbacks() {
        let request = Request::builder()
            .method("POST")
            .uri("/a/../b//c?x=1")
            .header(http::header::HOST, "App.Example.com")
            .body(())
            .unwrap();

        let object = extract_object(&request).unwrap();
        assert_eq!(object.scheme, "http");
        assert_eq!(object.domain, "app.example.com");
        assert_eq!(object.path, "/b/c?x=1");
        assert_eq!(object.method, "POST");
    }

    #[test]
    fn test_extract_object_forwarded() {
        let request = Request::builder()
            .uri("/api/verify")
            .header(HEADER_X_FORWARDED_PROTO, "https")
            .header(HEADER_X_FORWARDED_HOST, "app.example.com, proxy.internal")
            .header(HEADER_X_FORWARDED_URI, "/admin/")
            .header(HEADER_X_FORWARDED_METHOD, "delete")
            .body(())
            .unwrap();

        let object = extract_object(&request).unwrap();
        assert_eq!(object.scheme, "https");
        assert_eq!(object.domain, "app.example.com");
        assert_eq!(object.path, "/admin/");
        assert_eq!(object.method, "DELETE");
    }

    #[test]
    fn test_extract_object_rejects_bad_scheme() {
        let request = Request::builder()
            .uri("/")
            .header(HEADER_X_FORWARDED_PROTO, "javascript")
            .header(HEADER_X_FORWARDED_HOST, "app.example.com")
            .body(())
            .unwrap();

        assert!(matches!(
            extract_object(&request),
            Err(AuthzError::InvalidForwardedRequest(_))
        ));
    }
}
