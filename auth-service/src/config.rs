use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use common_auth::{Algorithm, JwtConfig, KeyPair};

const DEFAULT_KEY_ID: &str = "primary";
/// Upper bound on configured lifetimes and grace periods: one hundred years.
pub const MAX_LIFETIME_SECONDS: i64 = 100 * 366 * 86_400;

/// Where the signing key comes from.
#[derive(Clone)]
pub enum KeySource {
    Secret(String),
    PrivateKeyPem(String),
    PrivateKeyPath(PathBuf),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Secret(_) => f.write_str("Secret(***redacted***)"),
            KeySource::PrivateKeyPem(_) => f.write_str("PrivateKeyPem(***redacted***)"),
            KeySource::PrivateKeyPath(path) => f.debug_tuple("PrivateKeyPath").field(path).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub jwt: JwtConfig,
    pub algorithm: Algorithm,
    pub key_id: String,
    pub key_source: KeySource,
    pub debug_errors: bool,
}

impl ServiceConfig {
    /// Loads the configured signing key.
    pub fn key_pair(&self) -> Result<KeyPair> {
        let pem = match (&self.key_source, self.algorithm) {
            (KeySource::Secret(secret), Algorithm::HS256) => {
                return Ok(KeyPair::hmac(
                    self.key_id.clone(),
                    secret.as_bytes().to_vec(),
                )?);
            }
            (KeySource::Secret(_), algorithm) => {
                bail!("{algorithm} needs JWT_PRIVATE_KEY_PEM or JWT_PRIVATE_KEY_PATH")
            }
            (_, Algorithm::HS256) => bail!("HS256 needs JWT_SECRET, not a private key"),
            (KeySource::PrivateKeyPem(pem), _) => pem.clone(),
            (KeySource::PrivateKeyPath(path), _) => fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
        };

        let key = if self.algorithm == Algorithm::RS256 {
            KeyPair::rsa_from_pem(self.key_id.clone(), &pem)?
        } else {
            KeyPair::ec_from_pem(self.key_id.clone(), &pem)?
        };
        Ok(key)
    }
}

pub fn load_service_config() -> Result<ServiceConfig> {
    load_from(|key| env::var(key).ok())
}

/// Builds the configuration from any variable lookup; `load_service_config`
/// passes the process environment.
pub fn load_from<F>(lookup: F) -> Result<ServiceConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).and_then(|value| normalize_optional(&value));

    let algorithm = var("JWT_ALGORITHM")
        .map(|value| value.parse::<Algorithm>())
        .transpose()
        .context("Failed to parse JWT_ALGORITHM")?
        .unwrap_or(Algorithm::HS256);

    let key_source = if let Some(path) = var("JWT_PRIVATE_KEY_PATH") {
        KeySource::PrivateKeyPath(PathBuf::from(path))
    } else if let Some(pem) = var("JWT_PRIVATE_KEY_PEM") {
        KeySource::PrivateKeyPem(pem.replace("\\n", "\n"))
    } else if let Some(secret) = var("JWT_SECRET") {
        KeySource::Secret(secret)
    } else {
        return Err(anyhow!(
            "One of JWT_SECRET, JWT_PRIVATE_KEY_PEM or JWT_PRIVATE_KEY_PATH must be set"
        ));
    };

    let key_id = var("JWT_KEY_ID").unwrap_or_else(|| DEFAULT_KEY_ID.to_string());

    let mut jwt = JwtConfig::new();
    if let Some(ttl) = parse_number::<i64>(&var, "JWT_TTL_SECONDS")? {
        if ttl <= 0 || ttl > MAX_LIFETIME_SECONDS {
            bail!("JWT_TTL_SECONDS must be positive and at most {MAX_LIFETIME_SECONDS}, got {ttl}");
        }
        jwt = jwt.with_default_ttl(ttl);
    }
    if let Some(leeway) = parse_number::<u32>(&var, "JWT_LEEWAY_SECONDS")? {
        jwt = jwt.with_leeway(leeway);
    }
    if let Some(timeout) = parse_number::<u64>(&var, "JWT_REVOCATION_TIMEOUT_MS")? {
        jwt = jwt.with_revocation_timeout_ms(timeout);
    }
    if let Some(grace) = parse_number::<i64>(&var, "JWT_KEY_GRACE_SECONDS")? {
        if !(0..=MAX_LIFETIME_SECONDS).contains(&grace) {
            bail!("JWT_KEY_GRACE_SECONDS must lie within 0..={MAX_LIFETIME_SECONDS}, got {grace}");
        }
        jwt = jwt.with_key_grace(grace);
    }
    if let Some(issuer) = var("JWT_ISSUER") {
        jwt = jwt.with_issuer(issuer);
    }
    if let Some(audience) = var("JWT_AUDIENCE") {
        jwt = jwt.with_audience(audience);
    }

    let debug_errors = var("AUTH_DEBUG_ERRORS")
        .map(|value| parse_bool(&value))
        .unwrap_or(false);

    Ok(ServiceConfig {
        jwt,
        algorithm,
        key_id,
        key_source,
        debug_errors,
    })
}

fn parse_number<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|value| value.parse::<T>())
        .transpose()
        .with_context(|| format!("Failed to parse {key}"))
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
