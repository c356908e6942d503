use std::collections::HashMap;
use std::fmt;

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use common_auth::ClaimData;
use rand_core::OsRng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Login credentials as submitted by a client.
#[derive(Clone, Deserialize, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"***redacted***")
            .finish()
    }
}

/// Authenticated identity handed to token issuance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Principal {
    pub subject: String,
    #[serde(default)]
    pub data: ClaimData,
}

impl Principal {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            data: ClaimData::new(),
        }
    }

    pub fn with_claim(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("credential backend unavailable: {0}")]
    Unavailable(String),
    #[error("failed to hash password: {0}")]
    Hash(String),
}

/// Checks submitted credentials and resolves the principal they belong to.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<Principal, CredentialError>;
}

/// Argon2 PHC string for `password` with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, CredentialError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| CredentialError::Hash(err.to_string()))
}

struct Account {
    password_hash: String,
    principal: Principal,
}

/// Verifies passwords against Argon2 hashes of a directory supplied by the
/// caller. Logins are matched case-insensitively.
#[derive(Default)]
pub struct PasswordHashVerifier {
    accounts: HashMap<String, Account>,
}

impl PasswordHashVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(
        mut self,
        email: &str,
        password_hash: impl Into<String>,
        principal: Principal,
    ) -> Self {
        self.accounts.insert(
            normalize_login(email),
            Account {
                password_hash: password_hash.into(),
                principal,
            },
        );
        self
    }
}

#[async_trait]
impl CredentialVerifier for PasswordHashVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<Principal, CredentialError> {
        let account = self
            .accounts
            .get(&normalize_login(&credentials.email))
            .ok_or(CredentialError::InvalidCredentials)?;

        let parsed = PasswordHash::new(&account.password_hash).map_err(|err| {
            warn!(error = %err, "stored password hash is unreadable");
            CredentialError::InvalidCredentials
        })?;

        Argon2::default()
            .verify_password(credentials.password.as_bytes(), &parsed)
            .map_err(|_| CredentialError::InvalidCredentials)?;
        Ok(account.principal.clone())
    }
}

fn normalize_login(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Delegates the credential check to an external identity provider.
///
/// The credentials are POSTed as JSON; a 2xx answer carries
/// `{"subject": ..., "data": {...}}`, 401/403 mean the credentials were wrong.
#[derive(Clone)]
pub struct ExternalIdpVerifier {
    client: Client,
    url: String,
}

impl ExternalIdpVerifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl CredentialVerifier for ExternalIdpVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<Principal, CredentialError> {
        let response = self
            .client
            .post(&self.url)
            .json(credentials)
            .send()
            .await
            .map_err(|err| CredentialError::Unavailable(err.to_string()))?;

        match response.status() {
            status if status.is_success() => response
                .json::<Principal>()
                .await
                .map_err(|err| CredentialError::Unavailable(format!("invalid IdP response: {err}"))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(CredentialError::InvalidCredentials)
            }
            status => Err(CredentialError::Unavailable(format!(
                "HTTP {status} from {}",
                self.url
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn directory() -> PasswordHashVerifier {
        let hash = hash_password("correct horse").expect("hash");
        PasswordHashVerifier::new().with_account(
            "Admin@Example.com",
            hash,
            Principal::new("3").with_claim("role", json!("admin")),
        )
    }

    #[tokio::test]
    async fn password_verifier_accepts_matching_password() {
        let principal = directory()
            .verify(&Credentials::new(" admin@example.com ", "correct horse"))
            .await
            .expect("valid credentials");
        assert_eq!(principal.subject, "3");
        assert_eq!(principal.data.get("role"), Some(&json!("admin")));
    }

    #[tokio::test]
    async fn password_verifier_rejects_wrong_password_and_unknown_user() {
        let verifier = directory();
        for credentials in [
            Credentials::new("admin@example.com", "wrong"),
            Credentials::new("nobody@example.com", "correct horse"),
        ] {
            let err = verifier.verify(&credentials).await.expect_err("rejected");
            assert!(matches!(err, CredentialError::InvalidCredentials));
        }
    }

    #[tokio::test]
    async fn unreadable_stored_hash_is_treated_as_invalid() {
        let verifier = PasswordHashVerifier::new().with_account(
            "user@example.com",
            "plaintext-oops",
            Principal::new("9"),
        );
        let err = verifier
            .verify(&Credentials::new("user@example.com", "plaintext-oops"))
            .await
            .expect_err("rejected");
        assert!(matches!(err, CredentialError::InvalidCredentials));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("same").expect("hash");
        let second = hash_password("same").expect("hash");
        assert_ne!(first, second);
        assert!(first.starts_with("$argon2id$"));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("a@b.c", "s3cret"));
        assert!(!rendered.contains("s3cret"));
    }
}
