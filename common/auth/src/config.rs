use chrono::Duration;

/// Runtime configuration for issuing and verifying JWTs.
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Issuer claim (iss) stamped on issued tokens and required on verified ones.
    pub issuer: Option<String>,
    /// Audience claim (aud) stamped on issued tokens and required on verified ones.
    pub audience: Option<String>,
    /// Lifetime used when the caller does not pick one.
    pub default_ttl_seconds: i64,
    /// Allowable clock skew in seconds when validating exp/nbf.
    pub leeway_seconds: u32,
    /// Upper bound on a single revocation store call.
    pub revocation_timeout_ms: u64,
    /// How long a rotated-out signing key still verifies tokens.
    pub key_grace_seconds: i64,
    /// Retired keys kept after rotation, newest first.
    pub max_retired_keys: usize,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: None,
            default_ttl_seconds: 3600,
            leeway_seconds: 0,
            revocation_timeout_ms: 250,
            key_grace_seconds: 300,
            max_retired_keys: 3,
        }
    }
}

impl JwtConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn with_default_ttl(mut self, seconds: i64) -> Self {
        self.default_ttl_seconds = seconds;
        self
    }

    /// Adjust the allowed leeway.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    pub fn with_revocation_timeout_ms(mut self, millis: u64) -> Self {
        self.revocation_timeout_ms = millis;
        self
    }

    pub fn with_key_grace(mut self, seconds: i64) -> Self {
        self.key_grace_seconds = seconds;
        self
    }

    pub fn with_max_retired_keys(mut self, count: usize) -> Self {
        self.max_retired_keys = count;
        self
    }

    /// Saturates at [`Duration::MAX`]; issuing with such a lifetime fails
    /// with `InvalidTtl` instead.
    pub fn default_ttl(&self) -> Duration {
        saturating_seconds(self.default_ttl_seconds)
    }

    pub fn leeway(&self) -> Duration {
        Duration::seconds(i64::from(self.leeway_seconds))
    }

    pub fn revocation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.revocation_timeout_ms)
    }

    pub fn key_grace(&self) -> Duration {
        saturating_seconds(self.key_grace_seconds)
    }
}

fn saturating_seconds(seconds: i64) -> Duration {
    Duration::try_seconds(seconds).unwrap_or(if seconds < 0 {
        Duration::MIN
    } else {
        Duration::MAX
    })
}
