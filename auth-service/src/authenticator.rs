use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use common_auth::{AuthError, Claims};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::credentials::{CredentialError, CredentialVerifier, Credentials};
use crate::metrics::AuthMetrics;
use crate::tokens::{SignedToken, TokenService};

/// Failures surfaced to the HTTP layer.
#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unauthorized: {0}")]
    Unauthorized(#[source] AuthError),
    #[error("authentication backend unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthFailure {
    /// Stable code for logs; never sent to clients outside debug mode.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::InvalidCredentials => "invalid_credentials",
            AuthFailure::Unauthorized(err) => err.kind(),
            AuthFailure::Unavailable(_) => "unavailable",
            AuthFailure::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthFailure::InvalidCredentials | AuthFailure::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }
            AuthFailure::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AuthFailure::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Renders the failure. Outside debug mode every rejected credential or
    /// token becomes the same bare 401 so callers cannot tell which check
    /// failed.
    pub fn into_response_with(self, debug: bool) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: match status {
                StatusCode::UNAUTHORIZED => "Unauthorized",
                StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable",
                _ => "Internal Server Error",
            },
            reason: debug.then(|| self.reason()),
            message: debug.then(|| self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AuthFailure {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

/// Failure paired with the rendering mode of the authenticator that
/// produced it.
#[derive(Debug)]
pub struct AuthRejection {
    pub failure: AuthFailure,
    pub debug: bool,
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        self.failure.into_response_with(self.debug)
    }
}

/// The two calls a login controller needs: exchange credentials for a token,
/// and turn a presented token into claims.
pub struct Authenticator {
    credentials: Arc<dyn CredentialVerifier>,
    tokens: Arc<TokenService>,
    metrics: Option<Arc<AuthMetrics>>,
    debug_errors: bool,
}

impl Authenticator {
    pub fn new(credentials: Arc<dyn CredentialVerifier>, tokens: Arc<TokenService>) -> Self {
        Self {
            credentials,
            tokens,
            metrics: None,
            debug_errors: false,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AuthMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Trusted deployments only: failure responses name the failed check.
    pub fn with_debug_errors(mut self, enabled: bool) -> Self {
        self.debug_errors = enabled;
        self
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    pub fn reject(&self, failure: AuthFailure) -> AuthRejection {
        AuthRejection {
            failure,
            debug: self.debug_errors,
        }
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> Result<SignedToken, AuthFailure> {
        let principal = match self.credentials.verify(credentials).await {
            Ok(principal) => principal,
            Err(err) => {
                let failure = match err {
                    CredentialError::InvalidCredentials => AuthFailure::InvalidCredentials,
                    CredentialError::Unavailable(message) => AuthFailure::Unavailable(message),
                    CredentialError::Hash(message) => AuthFailure::Internal(message),
                };
                self.record_login(failure.reason());
                warn!(reason = failure.reason(), "login rejected");
                return Err(failure);
            }
        };

        let token = self
            .tokens
            .issue_default(principal.subject, principal.data)
            .map_err(|err| AuthFailure::Internal(err.to_string()))?;
        self.record_login("success");
        info!(sub = token.claims().subject(), jti = token.claims().jti(), "login succeeded");
        Ok(token)
    }

    pub async fn authorize(&self, token: &str) -> Result<Claims, AuthFailure> {
        self.tokens
            .verify(token, Utc::now())
            .await
            .map_err(AuthFailure::Unauthorized)
    }

    /// Revokes the presented token. Already expired tokens succeed quietly.
    pub async fn logout(&self, token: &str) -> Result<(), AuthFailure> {
        self.tokens
            .revoke_token(token, Utc::now())
            .await
            .map_err(AuthFailure::Unauthorized)
    }

    fn record_login(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.login_attempt(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};

    async fn body_json(response: Response) -> Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn verification_failures_collapse_to_bare_unauthorized() {
        for err in [
            AuthError::TokenExpired,
            AuthError::InvalidSignature("signature does not match".into()),
            AuthError::TokenRevoked,
        ] {
            let response = AuthFailure::Unauthorized(err).into_response();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(body_json(response).await, json!({ "error": "Unauthorized" }));
        }
    }

    #[tokio::test]
    async fn debug_mode_names_the_failed_check() {
        let response =
            AuthFailure::Unauthorized(AuthError::TokenExpired).into_response_with(true);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["reason"], json!("token_expired"));
        assert_eq!(body["error"], json!("Unauthorized"));
    }

    #[test]
    fn backend_outage_is_not_reported_as_unauthorized() {
        let failure = AuthFailure::Unavailable("idp down".into());
        assert_eq!(failure.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
