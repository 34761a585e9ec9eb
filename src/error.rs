//! Request-time errors of the forward-auth layer.
//!
//! Configuration errors live in [`crate::config::ConfigError`]; everything
//! here happens while a request is being authorized.

use crate::level::{AuthenticationLevel, Level};
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use std::fmt;

/// Error returned when the caller does not meet the required level.
#[derive(Debug, Clone)]
pub struct AccessDenied {
    /// Level the matching rule (or default policy) requires.
    pub required: Level,
    /// Level the caller currently holds.
    pub current: AuthenticationLevel,
    /// Display form of the subject.
    pub subject: String,
    /// Display form of the object.
    pub object: String,
    /// Optional custom message.
    pub message: Option<String>,
    /// The caller presented no identity.
    pub anonymous: bool,
    /// The deciding rule constrains subjects.
    pub has_subjects: bool,
}

impl AccessDenied {
    /// Create a new access denied error.
    pub fn new(
        required: Level,
        current: AuthenticationLevel,
        subject: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            required,
            current,
            subject: subject.into(),
            object: object.into(),
            message: None,
            anonymous: false,
            has_subjects: false,
        }
    }

    /// Record whether the caller is anonymous and whether the deciding rule
    /// names subjects. An anonymous caller stopped by a subject-constrained
    /// rule is asked to authenticate instead of being forbidden.
    pub fn with_subject_state(mut self, anonymous: bool, has_subjects: bool) -> Self {
        self.anonymous = anonymous;
        self.has_subjects = has_subjects;
        self
    }

    /// True when authenticating (further) may change the outcome.
    pub fn is_authentication_required(&self) -> bool {
        self.required != Level::Denied || (self.anonymous && self.has_subjects)
    }

    /// Add a custom message to the error.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// 401 when the caller lacks authentication factors or has yet to
    /// identify against a subject-constrained rule, 403 otherwise.
    pub fn status(&self) -> StatusCode {
        if self.is_authentication_required() {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::FORBIDDEN
        }
    }

    fn reason(&self) -> &str {
        match &self.message {
            Some(msg) => msg,
            None if self.is_authentication_required() => "Authentication required",
            None => "Access denied",
        }
    }
}

impl fmt::Display for AccessDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}", msg),
            None => write!(
                f,
                "Access to '{}' requires {} but {} is {}",
                self.object, self.required, self.subject, self.current
            ),
        }
    }
}

impl std::error::Error for AccessDenied {}

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        (self.status(), self.reason().to_string()).into_response()
    }
}

/// Error type for the forward-auth layer.
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// The caller does not meet the required level.
    #[error("Access denied: {0}")]
    AccessDenied(#[from] AccessDenied),

    /// Failed to extract the client IP address.
    #[error("Failed to extract client IP address")]
    IpExtractionFailed,

    /// The forwarded request headers do not describe a valid URL.
    #[error("Invalid forwarded request: {0}")]
    InvalidForwardedRequest(String),

    /// Failed to extract the subject from the request.
    #[error("Failed to extract subject: {0}")]
    SubjectExtractionFailed(String),
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        match self {
            Self::AccessDenied(denied) => denied.into_response(),
            Self::IpExtractionFailed => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to determine client IP").into_response()
            }
            Self::InvalidForwardedRequest(msg) => {
                (StatusCode::BAD_REQUEST, format!("Invalid forwarded request: {}", msg)).into_response()
            }
            Self::SubjectExtractionFailed(_) => {
                (StatusCode::UNAUTHORIZED, "Authentication required").into_response()
            }
        }
    }
}

/// Custom response handler for access denied errors.
///
/// # Example
/// ```
/// use proxy_authz::{AccessDeniedHandler, AccessDenied};
/// use axum::response::{Response, IntoResponse};
///
/// struct RedirectHandler;
///
/// impl AccessDeniedHandler for RedirectHandler {
///     fn handle(&self, denied: &AccessDenied) -> Response {
///         let location = format!("https://auth.example.com/?rd={}", denied.object);
///         (http::StatusCode::FOUND, [(http::header::LOCATION, location)]).into_response()
///     }
/// }
/// ```
pub trait AccessDeniedHandler: Send + Sync {
    /// Handle an access denied error and return a response.
    fn handle(&self, denied: &AccessDenied) -> Response;
}

/// Default handler that returns a plain text 401/403 response.
#[derive(Debug, Clone, Default)]
pub struct DefaultDeniedHandler;

impl AccessDeniedHandler for DefaultDeniedHandler {
    fn handle(&self, denied: &AccessDenied) -> Response {
        denied.clone().into_response()
    }
}

/// Handler that returns a JSON error response.
#[derive(Debug, Clone, Default)]
pub struct JsonDeniedHandler {
    include_details: bool,
}

impl JsonDeniedHandler {
    /// Create a new JSON denied handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the required level, subject and object in the body.
    pub fn with_details(mut self) -> Self {
        self.include_details = true;
        self
    }
}

impl AccessDeniedHandler for JsonDeniedHandler {
    fn handle(&self, denied: &AccessDenied) -> Response {
        use axum::Json;

        let body = if self.include_details {
            serde_json::json!({
                "error": "access_denied",
                "message": denied.reason(),
                "required": denied.required,
                "current": denied.current.to_string(),
                "subject": denied.subject,
                "object": denied.object,
            })
        } else {
            serde_json::json!({
                "error": "access_denied",
                "message": denied.reason(),
            })
        };

        (denied.status(), Json(body)).into_response()
    }
}
