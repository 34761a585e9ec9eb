//! Forward-auth endpoint driven by a TOML access control configuration.
//!
//! A reverse proxy calls `/api/verify` for every request it receives and
//! passes the original request in `X-Forwarded-*` headers. A 200 lets the
//! request through; 401 means the caller must (re)authenticate; 403 means
//! the object is denied outright.
//!
//! The configuration is embedded by default. Pass a file path to load it
//! from disk instead; the file is then re-read every 30 seconds and swapped
//! in atomically when it parses.
//!
//! Run with: `cargo run --example forward_auth [config.toml]`
//!
//! Test with:
//! ```sh
//! # Public site (bypass)
//! curl -i -H 'X-Forwarded-Host: public.example.com' -H 'X-Forwarded-Uri: /' \
//!     http://localhost:9091/api/verify
//!
//! # Application without a session (401)
//! curl -i -H 'X-Forwarded-Host: app.example.com' -H 'X-Forwarded-Uri: /' \
//!     http://localhost:9091/api/verify
//!
//! # Application with a one-factor session (200)
//! curl -i -H 'X-Forwarded-Host: app.example.com' -H 'X-Forwarded-Uri: /' \
//!     -H 'Remote-User: john' http://localhost:9091/api/verify
//!
//! # Admin area needs two factors (401 with one, 200 with two)
//! curl -i -H 'X-Forwarded-Host: app.example.com' -H 'X-Forwarded-Uri: /admin/' \
//!     -H 'Remote-User: john' -H 'Remote-Groups: admins' -H 'Remote-Auth-Level: two_factor' \
//!     http://localhost:9091/api/verify
//!
//! # Personal site of another user (403)
//! curl -i -H 'X-Forwarded-Host: bob.home.example.com' -H 'X-Forwarded-Uri: /' \
//!     -H 'Remote-User: john' http://localhost:9091/api/verify
//! ```

use axum::{routing::get, Extension, Router};
use proxy_authz::{AccessControlLayer, Authorizer, AuthorizerConfig, JsonDeniedHandler, Level, SharedAuthorizer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const EMBEDDED_CONFIG: &str = r#"
[access_control]
default_policy = "deny"

[[access_control.networks]]
name = "internal"
networks = ["127.0.0.0/8", "10.0.0.0/8", "::1"]

[[access_control.rules]]
domain = "public.example.com"
policy = "bypass"

[[access_control.rules]]
domain = "app.example.com"
resources = '^/admin/.*$'
subject = "group:admins"
policy = "two_factor"

[[access_control.rules]]
domain = "app.example.com"
resources = '^/admin/.*$'
policy = "deny"

[[access_control.rules]]
domain = "app.example.com"
policy = "one_factor"

[[access_control.rules]]
domain = "{user}.home.example.com"
policy = "one_factor"

[[access_control.rules]]
domain = "metrics.example.com"
networks = "internal"
methods = ["GET", "HEAD"]
policy = "bypass"
"#;

async fn verify(Extension(level): Extension<Level>) -> String {
    format!("OK ({})", level)
}

fn load(path: Option<&PathBuf>) -> Result<AuthorizerConfig, proxy_authz::ConfigError> {
    match path {
        Some(path) => AuthorizerConfig::from_file(path),
        None => AuthorizerConfig::from_toml(EMBEDDED_CONFIG),
    }
}

async fn watch(shared: SharedAuthorizer, path: PathBuf) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    interval.tick().await;

    loop {
        interval.tick().await;
        match AuthorizerConfig::from_file(&path) {
            Ok(config) => {
                // reload logs its own outcome
                let _ = shared.reload(&config);
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to read configuration"),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proxy_authz=debug,forward_auth=info".into()),
        )
        .init();

    let path = std::env::args().nth(1).map(PathBuf::from);

    let config = load(path.as_ref()).expect("Failed to load access control configuration");
    let authorizer = Authorizer::new(&config).expect("Invalid access control configuration");

    tracing::info!(
        rules = authorizer.rules().len(),
        default_policy = %authorizer.default_policy(),
        second_factor = authorizer.is_second_factor_enabled(),
        "Loaded access control rules"
    );

    let layer = AccessControlLayer::new(authorizer)
        .with_forwarded_ip_header("X-Forwarded-For")
        .with_denied_handler(JsonDeniedHandler::new().with_details());

    if let Some(path) = path {
        tokio::spawn(watch(layer.authorizer().clone(), path));
    }

    let app = Router::new()
        .route("/api/verify", get(verify))
        .layer(layer);

    let addr = SocketAddr::from(([127, 0, 0, 1], 9091));
    tracing::info!("Starting forward-auth endpoint on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();

    // Important: Use into_make_service_with_connect_info for IP extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
