//! Example demonstrating custom subject extraction.
//!
//! This example shows how to:
//! - Identify callers from a request extension set by an auth middleware
//! - Bind resources to the caller with a `User` capture group
//! - Restrict an OAuth2 client with an `oauth2:client:` subject
//!
//! Run with: `cargo run --example custom_extractor`

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use proxy_authz::{
    AccessControlLayer, AuthenticationLevel, Authorizer, Identity, Level, RuleConfig, SubjectExtractionResult,
    SubjectExtractor,
};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Session resolved by the authentication middleware.
#[derive(Clone, Debug)]
struct Session {
    user: String,
    groups: Vec<String>,
    client: Option<String>,
    mfa: bool,
}

/// Simulated authentication middleware.
/// In production this would validate a session cookie or bearer token.
async fn auth_middleware(mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    // Fake tokens: "john", "john+mfa", "admin+mfa", "client:grafana"
    if let Some(token) = token {
        let session = if let Some(client) = token.strip_prefix("client:") {
            Session {
                user: String::new(),
                groups: Vec::new(),
                client: Some(client.to_string()),
                mfa: false,
            }
        } else {
            let (user, mfa) = match token.strip_suffix("+mfa") {
                Some(user) => (user.to_string(), true),
                None => (token.clone(), false),
            };
            let groups = if user == "admin" { vec!["admins".to_string()] } else { Vec::new() };
            Session {
                user,
                groups,
                client: None,
                mfa,
            }
        };
        request.extensions_mut().insert(session);
    }

    next.run(request).await
}

/// Subject extractor reading the [`Session`] extension.
#[derive(Clone)]
struct SessionExtractor;

impl<B> SubjectExtractor<B> for SessionExtractor {
    fn extract_subject(&self, request: &http::Request<B>) -> SubjectExtractionResult {
        match request.extensions().get::<Session>() {
            Some(session) => {
                tracing::debug!(user = %session.user, client = ?session.client, "Extracted session");
                let level = if session.mfa {
                    AuthenticationLevel::TwoFactor
                } else {
                    AuthenticationLevel::OneFactor
                };
                let mut identity = Identity::new(&session.user)
                    .with_groups(session.groups.iter().cloned())
                    .with_level(level);
                if let Some(client) = &session.client {
                    identity = identity.with_client_id(client);
                }
                SubjectExtractionResult::Identified(identity)
            }
            None => {
                tracing::debug!("No session found");
                SubjectExtractionResult::Anonymous
            }
        }
    }
}

async fn ok() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_authz=debug,custom_extractor=debug".into()),
        )
        .init();

    let authorizer = Authorizer::builder()
        .default_policy(Level::Denied)
        .network("loopback", ["127.0.0.1", "::1"])
        // Health checks from the host itself
        .rule(RuleConfig::new("bypass").resource("^/health$").network("loopback"))
        // Grafana may only read dashboards
        .rule(
            RuleConfig::new("one_factor")
                .resource("^/dashboards/")
                .method("GET")
                .subject(["oauth2:client:grafana"]),
        )
        // Each user owns /users/<name>/
        .rule(RuleConfig::new("one_factor").resource("^/users/(?P<User>[a-z]+)/"))
        // Administration needs both factors
        .rule(RuleConfig::new("two_factor").resource("^/admin/").subject(["group:admins"]))
        .client_policy("grafana", Level::OneFactor)
        .build()
        .expect("Invalid access control rules");

    tracing::info!(rules = authorizer.rules().len(), "Configured access control");

    // Auth middleware runs BEFORE the access control layer
    let app = Router::new()
        .route("/health", get(ok))
        .route("/dashboards/{id}", get(ok))
        .route("/users/{name}/profile", get(ok))
        .route("/admin/settings", get(ok))
        .layer(AccessControlLayer::new(authorizer).with_subject_extractor(SessionExtractor))
        .layer(middleware::from_fn(auth_middleware));

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Test with:");
    tracing::info!("  curl http://localhost:3000/health");
    tracing::info!("  curl -H 'Authorization: Bearer john' http://localhost:3000/users/john/profile");
    tracing::info!("  curl -H 'Authorization: Bearer john' http://localhost:3000/users/bob/profile");
    tracing::info!("  curl -H 'Authorization: Bearer client:grafana' http://localhost:3000/dashboards/1");
    tracing::info!("  curl -H 'Authorization: Bearer admin+mfa' http://localhost:3000/admin/settings");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
