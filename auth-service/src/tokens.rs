use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use common_auth::{
    encode_token, AuthError, AuthResult, ClaimData, Claims, Header, InMemoryKeyStore, JwtConfig,
    JwtVerifier, KeyPair,
};
use rand_core::{OsRng, RngCore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::metrics::AuthMetrics;
use crate::revocation::{RevocationEntry, RevocationError, RevocationStore};

const JTI_BYTES: usize = 16;

/// A signed token. The parts are fixed at issuance; changing anything means
/// issuing a new token.
#[derive(Debug, Clone)]
pub struct SignedToken {
    header: Header,
    claims: Claims,
    signature: Vec<u8>,
    compact: String,
}

impl SignedToken {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    pub fn as_str(&self) -> &str {
        &self.compact
    }

    pub fn into_string(self) -> String {
        self.compact
    }
}

impl fmt::Display for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact)
    }
}

/// Issues, verifies and revokes tokens.
///
/// Holds no per-call state; the key ring and revocation store are the only
/// shared resources, so `issue` and `verify` may run concurrently.
pub struct TokenService {
    config: JwtConfig,
    keys: InMemoryKeyStore,
    verifier: JwtVerifier,
    revocations: Arc<dyn RevocationStore>,
    metrics: Option<Arc<AuthMetrics>>,
}

impl TokenService {
    pub fn new(config: JwtConfig, key: KeyPair, revocations: Arc<dyn RevocationStore>) -> Self {
        let keys = InMemoryKeyStore::new(key);
        let verifier = JwtVerifier::with_store(config.clone(), keys.clone());
        Self {
            config,
            keys,
            verifier,
            revocations,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AuthMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn key_store(&self) -> &InMemoryKeyStore {
        &self.keys
    }

    /// Issues a token valid from `now + not_before_delay` until `now + ttl`.
    pub fn issue(
        &self,
        subject: impl Into<String>,
        data: ClaimData,
        ttl: Duration,
        not_before_delay: Duration,
    ) -> AuthResult<SignedToken> {
        self.issue_at(subject, data, ttl, not_before_delay, Utc::now())
    }

    /// Issues with the configured default lifetime, valid immediately.
    pub fn issue_default(
        &self,
        subject: impl Into<String>,
        data: ClaimData,
    ) -> AuthResult<SignedToken> {
        self.issue(subject, data, self.config.default_ttl(), Duration::zero())
    }

    pub fn issue_at(
        &self,
        subject: impl Into<String>,
        data: ClaimData,
        ttl: Duration,
        not_before_delay: Duration,
        now: DateTime<Utc>,
    ) -> AuthResult<SignedToken> {
        if ttl.num_seconds() <= 0 {
            return Err(AuthError::InvalidTtl(format!(
                "ttl must be at least one second, got {}ms",
                ttl.num_milliseconds()
            )));
        }
        if not_before_delay < Duration::zero() || not_before_delay > ttl {
            return Err(AuthError::InvalidTtl(format!(
                "not-before delay of {}s must lie within the {}s lifetime",
                not_before_delay.num_seconds(),
                ttl.num_seconds()
            )));
        }

        let now = now.trunc_subsecs(0);
        let (Some(not_before), Some(expires_at)) = (
            now.checked_add_signed(not_before_delay),
            now.checked_add_signed(ttl),
        ) else {
            return Err(AuthError::InvalidTtl(format!(
                "a {}s lifetime runs past the representable time range",
                ttl.num_seconds()
            )));
        };
        let claims = Claims::new(subject, now, not_before, expires_at, generate_jti())?
            .with_issuer(self.config.issuer.clone())
            .with_audience(self.config.audience.iter().cloned().collect())
            .with_data(data);

        let ring = self.keys.snapshot();
        let key = ring.current();
        let encoded = encode_token(&claims, key)?;

        if let Some(metrics) = &self.metrics {
            metrics.token_issued(key.algorithm().as_str());
        }
        debug!(
            jti = claims.jti(),
            sub = claims.subject(),
            kid = key.kid(),
            "issued token"
        );

        Ok(SignedToken {
            header: encoded.header,
            claims,
            signature: encoded.signature,
            compact: encoded.compact,
        })
    }

    /// Verifies `token` as of `now`, bounding the revocation lookup by the
    /// configured timeout.
    pub async fn verify(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        self.verify_with_timeout(token, now, self.config.revocation_timeout())
            .await
    }

    pub async fn verify_with_timeout(
        &self,
        token: &str,
        now: DateTime<Utc>,
        limit: StdDuration,
    ) -> AuthResult<Claims> {
        let result = self.verify_inner(token, now, limit).await;
        if let Some(metrics) = &self.metrics {
            match &result {
                Ok(_) => metrics.verification("ok"),
                Err(err) => metrics.verification(err.kind()),
            }
        }
        if let Err(err) = &result {
            debug!(reason = err.kind(), "token verification failed");
        }
        result
    }

    async fn verify_inner(
        &self,
        token: &str,
        now: DateTime<Utc>,
        limit: StdDuration,
    ) -> AuthResult<Claims> {
        let claims = self.verifier.verify_at(token, now)?;

        match timeout(limit, self.revocations.is_revoked(claims.jti())).await {
            Ok(Ok(false)) => Ok(claims),
            Ok(Ok(true)) => Err(AuthError::TokenRevoked),
            Ok(Err(err)) => Err(unavailable(claims.jti(), err)),
            Err(_) => {
                warn!(jti = claims.jti(), ?limit, "revocation check timed out");
                Err(AuthError::RevocationCheckUnavailable(format!(
                    "no answer within {}ms",
                    limit.as_millis()
                )))
            }
        }
    }

    /// Revokes a token id. Revoking an id twice is not an error.
    pub async fn revoke(&self, jti: &str, now: DateTime<Utc>) -> AuthResult<()> {
        self.store_revocation(RevocationEntry {
            jti: jti.to_string(),
            revoked_at: now,
            expires_at: None,
        })
        .await
    }

    /// Revokes the token itself (logout). The signature must check out; a
    /// token already past `exp` plus leeway is accepted and left alone.
    pub async fn revoke_token(&self, token: &str, now: DateTime<Utc>) -> AuthResult<()> {
        let claims = self.verifier.decode_verified(token, now)?;
        if let Err(AuthError::TokenExpired) = self.verifier.check_window(&claims, now) {
            debug!(jti = claims.jti(), "token already expired, nothing to revoke");
            return Ok(());
        }
        self.store_revocation(RevocationEntry {
            jti: claims.jti().to_string(),
            revoked_at: now,
            expires_at: Some(claims.expires_at()),
        })
        .await
    }

    /// Drops revocation entries for tokens that have expired anyway. An entry
    /// outlives its token's `exp` by the leeway, since verification still
    /// accepts the token until then.
    pub async fn purge_revocations(&self, now: DateTime<Utc>) -> AuthResult<usize> {
        let cutoff = now
            .checked_sub_signed(self.config.leeway())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let limit = self.config.revocation_timeout();
        match timeout(limit, self.revocations.purge_expired(cutoff)).await {
            Ok(Ok(purged)) => {
                if purged > 0 {
                    info!(purged, "purged expired revocation entries");
                }
                Ok(purged)
            }
            Ok(Err(err)) => Err(AuthError::RevocationCheckUnavailable(err.to_string())),
            Err(_) => Err(AuthError::RevocationCheckUnavailable(
                "purge timed out".into(),
            )),
        }
    }

    /// Makes `next` the signing key; the old key keeps verifying for the
    /// configured grace period.
    pub fn rotate_key(&self, next: KeyPair, now: DateTime<Utc>) {
        self.keys.rotate(
            next,
            now,
            self.config.key_grace(),
            self.config.max_retired_keys,
        );
        self.keys.prune(now);
    }

    async fn store_revocation(&self, entry: RevocationEntry) -> AuthResult<()> {
        let jti = entry.jti.clone();
        let limit = self.config.revocation_timeout();
        let result = match timeout(limit, self.revocations.revoke(entry)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(unavailable(&jti, err)),
            Err(_) => Err(AuthError::RevocationCheckUnavailable(format!(
                "revoke not acknowledged within {}ms",
                limit.as_millis()
            ))),
        };

        if let Some(metrics) = &self.metrics {
            metrics.revocation(if result.is_ok() { "ok" } else { "unavailable" });
        }
        if result.is_ok() {
            info!(jti = %jti, "revoked token");
        }
        result
    }
}

fn unavailable(jti: &str, err: RevocationError) -> AuthError {
    warn!(jti, error = %err, "revocation store call failed");
    AuthError::RevocationCheckUnavailable(err.to_string())
}

/// 128 random bits from the OS generator, Base64URL encoded.
fn generate_jti() -> String {
    let mut bytes = [0u8; JTI_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revocation::InMemoryRevocationStore;
    use std::collections::HashSet;

    fn service() -> TokenService {
        let key = KeyPair::hmac("k1", b"unit-test-secret".to_vec()).expect("key");
        TokenService::new(
            JwtConfig::new(),
            key,
            Arc::new(InMemoryRevocationStore::new()),
        )
    }

    #[test]
    fn rejects_non_positive_ttl() {
        let service = service();
        for ttl in [Duration::zero(), Duration::seconds(-5), Duration::milliseconds(900)] {
            let err = service
                .issue("42", ClaimData::new(), ttl, Duration::zero())
                .expect_err("invalid ttl");
            assert!(matches!(err, AuthError::InvalidTtl(_)), "{ttl:?}");
        }
    }

    #[test]
    fn rejects_not_before_outside_lifetime() {
        let service = service();
        for delay in [Duration::seconds(-1), Duration::seconds(61)] {
            let err = service
                .issue("42", ClaimData::new(), Duration::seconds(60), delay)
                .expect_err("invalid delay");
            assert!(matches!(err, AuthError::InvalidTtl(_)));
        }
    }

    #[test]
    fn lifetime_past_the_time_range_is_invalid_ttl() {
        let service = service();
        let err = service
            .issue("42", ClaimData::new(), Duration::days(100_000_000), Duration::zero())
            .expect_err("overflowing ttl");
        assert!(matches!(err, AuthError::InvalidTtl(_)));

        let err = service
            .issue("42", ClaimData::new(), Duration::MAX, Duration::zero())
            .expect_err("maximal ttl");
        assert!(matches!(err, AuthError::InvalidTtl(_)));
    }

    #[test]
    fn oversized_default_ttl_is_invalid_ttl() {
        let key = KeyPair::hmac("k1", b"unit-test-secret".to_vec()).expect("key");
        let service = TokenService::new(
            JwtConfig::new().with_default_ttl(i64::MAX),
            key,
            Arc::new(InMemoryRevocationStore::new()),
        );
        let err = service
            .issue_default("42", ClaimData::new())
            .expect_err("overflowing default ttl");
        assert!(matches!(err, AuthError::InvalidTtl(_)));
    }

    #[test]
    fn jti_is_unique_and_128_bits() {
        let ids: HashSet<String> = (0..256).map(|_| generate_jti()).collect();
        assert_eq!(ids.len(), 256);
        for id in &ids {
            assert_eq!(URL_SAFE_NO_PAD.decode(id).expect("base64").len(), JTI_BYTES);
        }
    }

    #[test]
    fn issued_token_exposes_its_parts() {
        let service = service();
        let token = service
            .issue("42", ClaimData::new(), Duration::hours(1), Duration::minutes(5))
            .expect("issue");

        let claims = token.claims();
        assert_eq!(claims.expires_at() - claims.issued_at(), Duration::hours(1));
        assert_eq!(claims.not_before() - claims.issued_at(), Duration::minutes(5));
        assert_eq!(token.header().kid(), Some("k1"));
        assert_eq!(token.signature().len(), 32);
        assert_eq!(token.to_string(), token.as_str());
    }
}
