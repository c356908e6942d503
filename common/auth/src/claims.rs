use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthError, AuthResult};

/// Custom claims carried under the `data` claim, ordered by key.
pub type ClaimData = BTreeMap<String, Value>;

/// Verified (or about to be signed) claim set.
///
/// Timestamps have whole-second precision, matching their wire form.
/// `issued_at <= not_before <= expires_at` and `issued_at < expires_at` hold
/// for every value of this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    issuer: Option<String>,
    audience: Vec<String>,
    subject: String,
    issued_at: DateTime<Utc>,
    not_before: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    jti: String,
    data: ClaimData,
}

impl Claims {
    pub fn new(
        subject: impl Into<String>,
        issued_at: DateTime<Utc>,
        not_before: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        jti: impl Into<String>,
    ) -> AuthResult<Self> {
        let issued_at = issued_at.trunc_subsecs(0);
        let not_before = not_before.trunc_subsecs(0);
        let expires_at = expires_at.trunc_subsecs(0);
        check_window(issued_at, not_before, expires_at)?;

        let subject = subject.into();
        if subject.is_empty() {
            return Err(AuthError::MalformedClaims("claim 'sub' is empty".into()));
        }
        let jti = jti.into();
        if jti.is_empty() {
            return Err(AuthError::MalformedClaims("claim 'jti' is empty".into()));
        }

        Ok(Self {
            issuer: None,
            audience: Vec::new(),
            subject,
            issued_at,
            not_before,
            expires_at,
            jti,
            data: ClaimData::new(),
        })
    }

    pub fn with_issuer(mut self, issuer: Option<String>) -> Self {
        self.issuer = issuer;
        self
    }

    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    pub fn with_data(mut self, data: ClaimData) -> Self {
        self.data = data;
        self
    }

    pub fn issuer(&self) -> Option<&str> {
        self.issuer.as_deref()
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn jti(&self) -> &str {
        &self.jti
    }

    pub fn data(&self) -> &ClaimData {
        &self.data
    }

    /// Looks up a single custom claim.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

fn check_window(
    issued_at: DateTime<Utc>,
    not_before: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> AuthResult<()> {
    if not_before < issued_at {
        return Err(AuthError::MalformedClaims(
            "claim 'nbf' precedes 'iat'".into(),
        ));
    }
    if expires_at < not_before {
        return Err(AuthError::MalformedClaims(
            "claim 'exp' precedes 'nbf'".into(),
        ));
    }
    if expires_at <= issued_at {
        return Err(AuthError::MalformedClaims(
            "claim 'exp' must be after 'iat'".into(),
        ));
    }
    Ok(())
}

/// Canonical JSON form of [`Claims`].
pub struct ClaimsCodec;

impl ClaimsCodec {
    /// Serializes claims. Field order is fixed and custom data is sorted by
    /// key, so equal claims always produce identical bytes.
    pub fn encode(claims: &Claims) -> AuthResult<Vec<u8>> {
        let audience = match claims.audience.as_slice() {
            [] => None,
            [single] => Some(AudienceRepr::Single(single.clone())),
            many => Some(AudienceRepr::Many(many.to_vec())),
        };
        let wire = ClaimsWire {
            iss: claims.issuer.as_deref(),
            aud: audience,
            sub: &claims.subject,
            iat: claims.issued_at.timestamp(),
            nbf: claims.not_before.timestamp(),
            exp: claims.expires_at.timestamp(),
            jti: &claims.jti,
            data: &claims.data,
        };
        serde_json::to_vec(&wire).map_err(|err| AuthError::EncodingError(err.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> AuthResult<Claims> {
        let repr: ClaimsRepr = serde_json::from_slice(bytes)
            .map_err(|err| AuthError::MalformedClaims(err.to_string()))?;
        Claims::try_from(repr)
    }
}

#[derive(Serialize)]
struct ClaimsWire<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    iss: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aud: Option<AudienceRepr>,
    sub: &'a str,
    iat: i64,
    nbf: i64,
    exp: i64,
    jti: &'a str,
    #[serde(skip_serializing_if = "no_data")]
    data: &'a ClaimData,
}

fn no_data(data: &&ClaimData) -> bool {
    data.is_empty()
}

#[derive(Debug, Deserialize)]
struct ClaimsRepr {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<AudienceRepr>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iat: Option<NumericDate>,
    #[serde(default)]
    nbf: Option<NumericDate>,
    #[serde(default)]
    exp: Option<NumericDate>,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default)]
    data: ClaimData,
}

/// RFC 7519 NumericDate. Other issuers may send fractional seconds; those are
/// truncated to whole seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum NumericDate {
    Whole(i64),
    Fractional(f64),
}

impl NumericDate {
    fn whole_seconds(self) -> Option<i64> {
        match self {
            NumericDate::Whole(seconds) => Some(seconds),
            NumericDate::Fractional(seconds)
                if seconds.is_finite()
                    && seconds >= i64::MIN as f64
                    && seconds < i64::MAX as f64 =>
            {
                Some(seconds.trunc() as i64)
            }
            NumericDate::Fractional(_) => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum AudienceRepr {
    Single(String),
    Many(Vec<String>),
}

impl TryFrom<ClaimsRepr> for Claims {
    type Error = AuthError;

    fn try_from(value: ClaimsRepr) -> AuthResult<Self> {
        let subject = value.sub.ok_or_else(|| missing("sub"))?;
        let jti = value.jti.ok_or_else(|| missing("jti"))?;
        let issued_at = timestamp("iat", value.iat.ok_or_else(|| missing("iat"))?)?;
        let expires_at = timestamp("exp", value.exp.ok_or_else(|| missing("exp"))?)?;
        let not_before = match value.nbf {
            Some(nbf) => timestamp("nbf", nbf)?,
            None => issued_at,
        };

        let audience = match value.aud {
            Some(AudienceRepr::Single(item)) => vec![item],
            Some(AudienceRepr::Many(items)) => items,
            None => Vec::new(),
        };

        Ok(Claims::new(subject, issued_at, not_before, expires_at, jti)?
            .with_issuer(value.iss)
            .with_audience(audience)
            .with_data(value.data))
    }
}

fn missing(claim: &'static str) -> AuthError {
    AuthError::MalformedClaims(format!("missing required claim '{claim}'"))
}

fn timestamp(claim: &'static str, value: NumericDate) -> AuthResult<DateTime<Utc>> {
    value
        .whole_seconds()
        .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
        .ok_or_else(|| AuthError::MalformedClaims(format!("claim '{claim}' out of range")))
}
