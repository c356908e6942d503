use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Result;
use async_trait::async_trait;
use auth_service::revocation::{
    InMemoryRevocationStore, RevocationEntry, RevocationError, RevocationStore,
};
use auth_service::tokens::TokenService;
use chrono::{DateTime, TimeZone, Utc};
use common_auth::{JwtConfig, KeyPair};
use rand_core::OsRng;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;

pub const TEST_SECRET: &[u8] = b"integration-test-secret";

pub fn fixed_now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .expect("valid timestamp")
}

pub fn hmac_key(kid: &str) -> KeyPair {
    KeyPair::hmac(kid, TEST_SECRET.to_vec()).expect("hmac key")
}

pub fn hmac_service(config: JwtConfig) -> (TokenService, InMemoryRevocationStore) {
    let store = InMemoryRevocationStore::new();
    let service = TokenService::new(config, hmac_key("hs-1"), Arc::new(store.clone()));
    (service, store)
}

/// RSA key pair plus the SPKI PEM of its public half.
#[allow(dead_code)]
pub fn rsa_key(kid: &str) -> Result<(KeyPair, String)> {
    let private_key = RsaPrivateKey::new(&mut OsRng, 2048)?;
    let private_pem = private_key.to_pkcs8_pem(LineEnding::LF)?;
    let public_pem = private_key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)?;
    Ok((KeyPair::rsa_from_pem(kid, &private_pem)?, public_pem))
}

#[allow(dead_code)]
pub fn ec_key(kid: &str) -> Result<KeyPair> {
    let private_key = p256::ecdsa::SigningKey::random(&mut OsRng);
    let pem = p256::pkcs8::EncodePrivateKey::to_pkcs8_pem(&private_key, LineEnding::LF)?;
    Ok(KeyPair::ec_from_pem(kid, &pem)?)
}

/// Store that answers only after `delay`.
#[allow(dead_code)]
pub struct SlowStore {
    pub delay: StdDuration,
}

#[async_trait]
impl RevocationStore for SlowStore {
    async fn is_revoked(&self, _jti: &str) -> Result<bool, RevocationError> {
        tokio::time::sleep(self.delay).await;
        Ok(false)
    }

    async fn revoke(&self, _entry: RevocationEntry) -> Result<(), RevocationError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, RevocationError> {
        Ok(0)
    }
}

/// Store whose backend is down.
#[allow(dead_code)]
pub struct FailingStore;

#[async_trait]
impl RevocationStore for FailingStore {
    async fn is_revoked(&self, _jti: &str) -> Result<bool, RevocationError> {
        Err(RevocationError::Unavailable("connection refused".into()))
    }

    async fn revoke(&self, _entry: RevocationEntry) -> Result<(), RevocationError> {
        Err(RevocationError::Unavailable("connection refused".into()))
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, RevocationError> {
        Err(RevocationError::Unavailable("connection refused".into()))
    }
}
