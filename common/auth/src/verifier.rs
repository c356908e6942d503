use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::claims::{Claims, ClaimsCodec};
use crate::codec::{Header, TokenCodec, TokenParts, UnverifiedHeader};
use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};
use crate::signer::{self, KeyPair};

/// Current signing key plus recently retired keys that still verify.
#[derive(Clone)]
pub struct KeyRing {
    current: Arc<KeyPair>,
    retired: Vec<RetiredKey>,
}

#[derive(Clone)]
struct RetiredKey {
    key: Arc<KeyPair>,
    valid_until: DateTime<Utc>,
}

impl KeyRing {
    pub fn new(current: KeyPair) -> Self {
        Self {
            current: current.into_shared(),
            retired: Vec::new(),
        }
    }

    pub fn current(&self) -> &KeyPair {
        &self.current
    }

    /// Key ids of retired keys still inside their grace period, newest first.
    pub fn retired_kids(&self, now: DateTime<Utc>) -> Vec<&str> {
        self.live_retired(now).map(KeyPair::kid).collect()
    }

    /// Keys a token may be checked against. A `kid` narrows the set to the
    /// matching key; without one the current key is tried first.
    pub fn candidates(&self, kid: Option<&str>, now: DateTime<Utc>) -> Vec<&KeyPair> {
        let all = std::iter::once(self.current.as_ref()).chain(self.live_retired(now));
        match kid {
            Some(kid) => all.filter(|key| key.kid() == kid).collect(),
            None => all.collect(),
        }
    }

    fn live_retired(&self, now: DateTime<Utc>) -> impl Iterator<Item = &KeyPair> {
        self.retired
            .iter()
            .filter(move |entry| now < entry.valid_until)
            .map(|entry| entry.key.as_ref())
    }

    fn rotated(
        &self,
        next: Arc<KeyPair>,
        now: DateTime<Utc>,
        grace: Duration,
        max_retired: usize,
    ) -> KeyRing {
        let mut retired = Vec::with_capacity(self.retired.len() + 1);
        retired.push(RetiredKey {
            key: self.current.clone(),
            valid_until: now
                .checked_add_signed(grace)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        });
        retired.extend(
            self.retired
                .iter()
                .filter(|entry| now < entry.valid_until)
                .cloned(),
        );
        retired.truncate(max_retired);
        KeyRing {
            current: next,
            retired,
        }
    }

    fn pruned(&self, now: DateTime<Utc>) -> KeyRing {
        KeyRing {
            current: self.current.clone(),
            retired: self
                .retired
                .iter()
                .filter(|entry| now < entry.valid_until)
                .cloned()
                .collect(),
        }
    }
}

/// Shared, atomically swappable key ring. Readers keep the snapshot they
/// loaded, so a rotation never disturbs a verification already in flight.
#[derive(Clone)]
pub struct InMemoryKeyStore {
    inner: Arc<ArcSwap<KeyRing>>,
}

impl InMemoryKeyStore {
    pub fn new(current: KeyPair) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(KeyRing::new(current))),
        }
    }

    pub fn snapshot(&self) -> Arc<KeyRing> {
        self.inner.load_full()
    }

    /// Installs `next` as the signing key and retires the current one for
    /// `grace`.
    pub fn rotate(&self, next: KeyPair, now: DateTime<Utc>, grace: Duration, max_retired: usize) {
        let next = next.into_shared();
        let previous = self
            .inner
            .rcu(|ring| ring.rotated(next.clone(), now, grace, max_retired));
        info!(
            retired_kid = previous.current().kid(),
            current_kid = next.kid(),
            "rotated JWT signing key"
        );
    }

    /// Drops retired keys whose grace period has ended. Returns how many went.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let previous = self.inner.rcu(|ring| ring.pruned(now));
        previous
            .retired
            .iter()
            .filter(|entry| now >= entry.valid_until)
            .count()
    }
}

/// Output of signing a claim set.
#[derive(Debug, Clone)]
pub struct EncodedToken {
    pub header: Header,
    pub signature: Vec<u8>,
    pub compact: String,
}

/// Signs `claims` with `key` and assembles the compact token.
pub fn encode_token(claims: &Claims, key: &KeyPair) -> AuthResult<EncodedToken> {
    let header = Header::new(key.algorithm()).with_kid(key.kid());
    let header_bytes = header.to_bytes()?;
    let payload = ClaimsCodec::encode(claims)?;
    let signature = signer::sign(&header_bytes, &payload, key.signing_key())?;
    let compact = TokenCodec::assemble_raw(&header_bytes, &payload, &signature);
    Ok(EncodedToken {
        header,
        signature,
        compact,
    })
}

#[derive(Clone)]
pub struct JwtVerifier {
    config: JwtConfig,
    store: InMemoryKeyStore,
}

impl JwtVerifier {
    pub fn new(config: JwtConfig, key: KeyPair) -> Self {
        Self::with_store(config, InMemoryKeyStore::new(key))
    }

    pub fn with_store(config: JwtConfig, store: InMemoryKeyStore) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    pub fn store(&self) -> &InMemoryKeyStore {
        &self.store
    }

    /// Full stateless check: structure, signature, claims, issuer/audience
    /// and the validity window at `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        let claims = self.decode_verified(token, now)?;
        self.check_window(&claims, now)?;
        debug!(jti = claims.jti(), sub = claims.subject(), "verified JWT successfully");
        Ok(claims)
    }

    /// Checks structure, signature and claims, but not the validity window.
    pub fn decode_verified(&self, token: &str, now: DateTime<Utc>) -> AuthResult<Claims> {
        let parts = TokenCodec::split(token)?;
        let header = UnverifiedHeader::parse(&parts.header)?;
        self.check_signature(&header, &parts, now)?;

        let claims = ClaimsCodec::decode(&parts.payload)?;
        self.check_issuer_audience(&claims)?;
        Ok(claims)
    }

    /// Applies the configured leeway symmetrically to `nbf` and `exp`.
    pub fn check_window(&self, claims: &Claims, now: DateTime<Utc>) -> AuthResult<()> {
        let leeway = self.config.leeway();
        if now + leeway < claims.not_before() {
            return Err(AuthError::TokenNotYetValid);
        }
        if now - leeway >= claims.expires_at() {
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }

    fn check_signature(
        &self,
        header: &UnverifiedHeader,
        parts: &TokenParts,
        now: DateTime<Utc>,
    ) -> AuthResult<()> {
        let ring = self.store.snapshot();
        let candidates = ring.candidates(header.kid.as_deref(), now);
        let Some(first) = candidates.first() else {
            return Err(AuthError::InvalidSignature(format!(
                "no verification key for kid '{}'",
                header.kid.as_deref().unwrap_or_default()
            )));
        };
        let expected = first.algorithm();

        let mut algorithm_matched = false;
        for key in &candidates {
            if signer::check_algorithm(&header.alg, key.verifying_key()).is_err() {
                continue;
            }
            algorithm_matched = true;
            if signer::verify(
                &parts.header,
                &parts.payload,
                &parts.signature,
                key.verifying_key(),
            ) {
                return Ok(());
            }
        }

        if !algorithm_matched {
            return Err(AuthError::AlgorithmMismatch {
                expected,
                found: header.alg.clone(),
            });
        }
        Err(AuthError::InvalidSignature("signature does not match".into()))
    }

    fn check_issuer_audience(&self, claims: &Claims) -> AuthResult<()> {
        if let Some(expected) = &self.config.issuer {
            if claims.issuer() != Some(expected.as_str()) {
                return Err(AuthError::MalformedClaims(format!(
                    "claim 'iss' does not match '{expected}'"
                )));
            }
        }
        if let Some(expected) = &self.config.audience {
            if !claims.audience().iter().any(|aud| aud == expected) {
                return Err(AuthError::MalformedClaims(format!(
                    "claim 'aud' does not include '{expected}'"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chrono::TimeZone;
    use jsonwebtoken::{encode, Algorithm as JwtAlgorithm, EncodingKey, Header as JwtHeader};
    use serde::Serialize;
    use serde_json::json;

    use crate::claims::ClaimData;

    const SECRET: &[u8] = b"an-hmac-secret-for-tests";

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("timestamp")
    }

    fn hmac_key(kid: &str, secret: &[u8]) -> KeyPair {
        KeyPair::hmac(kid, secret.to_vec()).expect("hmac key")
    }

    fn claims(iat: i64, nbf: i64, exp: i64) -> Claims {
        let mut data = ClaimData::new();
        data.insert("role".into(), json!("admin"));
        Claims::new("42", at(iat), at(nbf), at(exp), "jti-1")
            .expect("claims")
            .with_data(data)
    }

    fn flip_bit(token: &str, segment: usize, bit: usize) -> String {
        let mut segments: Vec<Vec<u8>> = token
            .split('.')
            .map(|part| URL_SAFE_NO_PAD.decode(part).expect("segment"))
            .collect();
        segments[segment][bit / 8] ^= 1 << (bit % 8);
        TokenCodec::assemble_raw(&segments[0], &segments[1], &segments[2])
    }

    #[test]
    fn verifier_accepts_valid_token() {
        let key = hmac_key("k1", SECRET);
        let verifier = JwtVerifier::new(JwtConfig::new(), key.clone());
        let token = encode_token(&claims(1_000, 1_000, 4_600), &key).expect("encode");

        let verified = verifier.verify_at(&token.compact, at(2_000)).expect("verify");
        assert_eq!(verified.subject(), "42");
        assert_eq!(verified.get("role"), Some(&json!("admin")));
        assert_eq!(token.header.kid(), Some("k1"));
    }

    #[test]
    fn verifier_accepts_jsonwebtoken_output() {
        #[derive(Serialize)]
        struct Foreign<'a> {
            sub: &'a str,
            iat: i64,
            exp: i64,
            jti: &'a str,
        }
        let token = encode(
            &JwtHeader::new(JwtAlgorithm::HS256),
            &Foreign {
                sub: "42",
                iat: 1_000,
                exp: 4_600,
                jti: "foreign",
            },
            &EncodingKey::from_secret(SECRET),
        )
        .expect("jsonwebtoken encode");

        let verifier = JwtVerifier::new(JwtConfig::new(), hmac_key("k1", SECRET));
        let verified = verifier.verify_at(&token, at(2_000)).expect("verify");
        assert_eq!(verified.jti(), "foreign");
    }

    #[test]
    fn every_single_bit_flip_is_rejected() {
        let key = hmac_key("k1", SECRET);
        let verifier = JwtVerifier::new(JwtConfig::new(), key.clone());
        let token = encode_token(&claims(1_000, 1_000, 4_600), &key).expect("encode");
        let parts = TokenCodec::split(&token.compact).expect("split");

        for (segment, len) in [(0, parts.header.len()), (1, parts.payload.len())] {
            for bit in 0..len * 8 {
                let tampered = flip_bit(&token.compact, segment, bit);
                let err = verifier
                    .verify_at(&tampered, at(2_000))
                    .expect_err("tampered token must fail");
                assert!(
                    matches!(
                        err,
                        AuthError::InvalidSignature(_)
                            | AuthError::AlgorithmMismatch { .. }
                            | AuthError::MalformedClaims(_)
                    ),
                    "segment {segment} bit {bit}: {err:?}"
                );
            }
        }
    }

    #[test]
    fn expiry_and_not_before_boundaries() {
        let key = hmac_key("k1", SECRET);
        let verifier = JwtVerifier::new(JwtConfig::new(), key.clone());
        let token = encode_token(&claims(1_000, 1_500, 4_600), &key).expect("encode");

        assert_eq!(
            verifier.verify_at(&token.compact, at(1_499)).expect_err("early"),
            AuthError::TokenNotYetValid
        );
        assert!(verifier.verify_at(&token.compact, at(1_500)).is_ok());
        assert!(verifier.verify_at(&token.compact, at(4_599)).is_ok());
        assert_eq!(
            verifier.verify_at(&token.compact, at(4_600)).expect_err("expired"),
            AuthError::TokenExpired
        );
    }

    #[test]
    fn leeway_widens_both_bounds() {
        let key = hmac_key("k1", SECRET);
        let verifier = JwtVerifier::new(JwtConfig::new().with_leeway(30), key.clone());
        let token = encode_token(&claims(1_000, 1_500, 4_600), &key).expect("encode");

        assert!(verifier.verify_at(&token.compact, at(1_470)).is_ok());
        assert_eq!(
            verifier.verify_at(&token.compact, at(1_469)).expect_err("early"),
            AuthError::TokenNotYetValid
        );
        assert!(verifier.verify_at(&token.compact, at(4_629)).is_ok());
        assert_eq!(
            verifier.verify_at(&token.compact, at(4_630)).expect_err("expired"),
            AuthError::TokenExpired
        );
    }

    #[test]
    fn verifier_rejects_unknown_kid() {
        let signer_key = hmac_key("missing", SECRET);
        let verifier = JwtVerifier::new(JwtConfig::new(), hmac_key("k1", SECRET));
        let token = encode_token(&claims(1_000, 1_000, 4_600), &signer_key).expect("encode");

        let err = verifier.verify_at(&token.compact, at(2_000)).expect_err("unknown kid");
        match err {
            AuthError::InvalidSignature(message) => assert!(message.contains("missing")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn issuer_and_audience_are_enforced_when_configured() {
        let key = hmac_key("k1", SECRET);
        let config = JwtConfig::new().with_issuer("pos").with_audience("web");
        let verifier = JwtVerifier::new(config, key.clone());

        let plain = encode_token(&claims(1_000, 1_000, 4_600), &key).expect("encode");
        assert!(matches!(
            verifier.verify_at(&plain.compact, at(2_000)),
            Err(AuthError::MalformedClaims(_))
        ));

        let stamped = claims(1_000, 1_000, 4_600)
            .with_issuer(Some("pos".into()))
            .with_audience(vec!["web".into(), "mobile".into()]);
        let token = encode_token(&stamped, &key).expect("encode");
        assert!(verifier.verify_at(&token.compact, at(2_000)).is_ok());
    }

    #[test]
    fn rotated_key_verifies_until_grace_ends() {
        let old = hmac_key("old", b"old-secret");
        let verifier = JwtVerifier::new(JwtConfig::new(), old.clone());
        let old_token = encode_token(&claims(1_000, 1_000, 9_000), &old).expect("encode");

        verifier
            .store()
            .rotate(hmac_key("new", b"new-secret"), at(2_000), Duration::seconds(300), 3);
        let ring = verifier.store().snapshot();
        assert_eq!(ring.current().kid(), "new");
        assert_eq!(ring.retired_kids(at(2_000)), vec!["old"]);

        assert!(verifier.verify_at(&old_token.compact, at(2_299)).is_ok());
        let err = verifier
            .verify_at(&old_token.compact, at(2_300))
            .expect_err("grace over");
        assert!(matches!(err, AuthError::InvalidSignature(_)));

        assert_eq!(verifier.store().prune(at(2_300)), 1);
        assert!(verifier.store().snapshot().retired_kids(at(0)).is_empty());
    }

    #[test]
    fn rotation_keeps_bounded_history() {
        let store = InMemoryKeyStore::new(hmac_key("k0", b"s0"));
        for index in 1..=4 {
            store.rotate(
                hmac_key(&format!("k{index}"), format!("s{index}").as_bytes()),
                at(1_000),
                Duration::seconds(600),
                2,
            );
        }
        let ring = store.snapshot();
        assert_eq!(ring.current().kid(), "k4");
        assert_eq!(ring.retired_kids(at(1_000)), vec!["k3", "k2"]);
    }

    #[test]
    fn unbounded_grace_keeps_the_retired_key() {
        let store = InMemoryKeyStore::new(hmac_key("k0", b"s0"));
        store.rotate(hmac_key("k1", b"s1"), at(1_000), Duration::MAX, 1);
        let ring = store.snapshot();
        assert_eq!(ring.retired_kids(at(1_000_000_000)), vec!["k0"]);
    }

    #[test]
    fn snapshot_survives_rotation() {
        let store = InMemoryKeyStore::new(hmac_key("k0", b"s0"));
        let before = store.snapshot();
        store.rotate(hmac_key("k1", b"s1"), at(1_000), Duration::seconds(60), 1);
        assert_eq!(before.current().kid(), "k0");
        assert_eq!(store.snapshot().current().kid(), "k1");
    }

    #[test]
    fn token_without_kid_falls_back_to_retired_keys() {
        let old = hmac_key("old", b"old-secret");
        let header = br#"{"alg":"HS256","typ":"JWT"}"#;
        let payload = ClaimsCodec::encode(&claims(1_000, 1_000, 9_000)).expect("encode");
        let signature = signer::sign(header, &payload, old.signing_key()).expect("sign");
        let token = TokenCodec::assemble_raw(header, &payload, &signature);

        let verifier = JwtVerifier::new(JwtConfig::new(), old);
        verifier
            .store()
            .rotate(hmac_key("new", b"new-secret"), at(2_000), Duration::seconds(300), 3);
        assert!(verifier.verify_at(&token, at(2_100)).is_ok());
    }
}
