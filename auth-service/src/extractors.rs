use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderValue};
use common_auth::{AuthError, AuthResult, Claims};

use crate::authenticator::{AuthFailure, AuthRejection, Authenticator};

/// Verified claims of the bearer token presented with the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub claims: Claims,
    pub token: String,
}

impl AuthContext {
    pub fn subject(&self) -> &str {
        self.claims.subject()
    }

    pub fn into_claims(self) -> Claims {
        self.claims
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    Arc<Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authenticator = Arc::<Authenticator>::from_ref(state);

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| AuthError::MalformedToken("missing authorization header".into()))
            .and_then(parse_bearer)
            .map_err(|err| authenticator.reject(AuthFailure::Unauthorized(err)))?;

        let claims = authenticator
            .authorize(&token)
            .await
            .map_err(|failure| authenticator.reject(failure))?;

        Ok(Self { claims, token })
    }
}

pub fn parse_bearer(value: &HeaderValue) -> AuthResult<String> {
    let raw = value
        .to_str()
        .map_err(|_| AuthError::MalformedToken("authorization header is not ascii".into()))?
        .trim();

    let token = raw
        .strip_prefix("Bearer ")
        .ok_or_else(|| AuthError::MalformedToken("expected a bearer token".into()))?
        .trim();

    if token.is_empty() {
        return Err(AuthError::MalformedToken("empty bearer token".into()));
    }

    Ok(token.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bearer_accepts_valid_token() {
        let header = HeaderValue::from_static("Bearer abc.def.ghi");
        let token = parse_bearer(&header).expect("token");
        assert_eq!(token, "abc.def.ghi");
    }

    #[test]
    fn parse_bearer_rejects_wrong_scheme() {
        let header = HeaderValue::from_static("Basic credentials");
        let err = parse_bearer(&header).expect_err("should reject");
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }

    #[test]
    fn parse_bearer_rejects_empty_value() {
        let header = HeaderValue::from_static("Bearer    ");
        let err = parse_bearer(&header).expect_err("should reject empty token");
        assert!(matches!(err, AuthError::MalformedToken(_)));
    }
}
