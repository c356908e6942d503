use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use p256::ecdsa::{
    Signature as EcSignature, SigningKey as EcSigningKey, VerifyingKey as EcVerifyingKey,
};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs1v15::{
    Signature as RsaSignature, SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey,
};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{SignatureEncoding, Signer as _, Verifier as _};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

/// Signature algorithms accepted in the `alg` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    HS256,
    RS256,
    ES256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::HS256 => "HS256",
            Algorithm::RS256 => "RS256",
            Algorithm::ES256 => "ES256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = AuthError;

    fn from_str(value: &str) -> AuthResult<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Algorithm::HS256),
            "RS256" => Ok(Algorithm::RS256),
            "ES256" => Ok(Algorithm::ES256),
            other => Err(AuthError::KeyParse(format!(
                "unsupported algorithm '{other}'. Use HS256, RS256, or ES256."
            ))),
        }
    }
}

/// Symmetric key bytes, wiped on drop.
#[derive(Clone)]
pub struct Secret(Zeroizing<Vec<u8>>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Zeroizing::new(bytes.into()))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("bytes", &"***redacted***")
            .finish()
    }
}

/// Private half used to produce signatures.
#[derive(Clone)]
pub enum SigningKey {
    Hmac(Secret),
    Rsa(Box<RsaPrivateKey>),
    Ec(EcSigningKey),
}

impl SigningKey {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            SigningKey::Hmac(_) => Algorithm::HS256,
            SigningKey::Rsa(_) => Algorithm::RS256,
            SigningKey::Ec(_) => Algorithm::ES256,
        }
    }

    fn verifying_key(&self) -> VerifyingKey {
        match self {
            SigningKey::Hmac(secret) => VerifyingKey::Hmac(secret.clone()),
            SigningKey::Rsa(private) => VerifyingKey::Rsa(private.to_public_key()),
            SigningKey::Ec(private) => VerifyingKey::Ec(EcVerifyingKey::from(private)),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey")
            .field(&self.algorithm())
            .finish()
    }
}

/// Public half (or shared secret) used to check signatures.
#[derive(Clone)]
pub enum VerifyingKey {
    Hmac(Secret),
    Rsa(RsaPublicKey),
    Ec(EcVerifyingKey),
}

impl VerifyingKey {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            VerifyingKey::Hmac(_) => Algorithm::HS256,
            VerifyingKey::Rsa(_) => Algorithm::RS256,
            VerifyingKey::Ec(_) => Algorithm::ES256,
        }
    }

    pub fn rsa_from_pem(pem: &str) -> AuthResult<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|err| AuthError::KeyParse(format!("RSA public key: {err}")))?;
        Ok(VerifyingKey::Rsa(key))
    }

    pub fn ec_from_pem(pem: &str) -> AuthResult<Self> {
        let key = <EcVerifyingKey as p256::pkcs8::DecodePublicKey>::from_public_key_pem(pem)
            .map_err(|err| AuthError::KeyParse(format!("P-256 public key: {err}")))?;
        Ok(VerifyingKey::Ec(key))
    }
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("VerifyingKey")
            .field(&self.algorithm())
            .finish()
    }
}

/// Signing key, its verifying half and the `kid` advertised in headers.
#[derive(Clone, Debug)]
pub struct KeyPair {
    kid: String,
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl KeyPair {
    pub fn new(kid: impl Into<String>, signing: SigningKey) -> Self {
        let verifying = signing.verifying_key();
        Self {
            kid: kid.into(),
            signing,
            verifying,
        }
    }

    /// HS256 key. Empty secrets are refused.
    pub fn hmac(kid: impl Into<String>, secret: impl Into<Vec<u8>>) -> AuthResult<Self> {
        let secret = Secret::new(secret);
        if secret.is_empty() {
            return Err(AuthError::KeyParse("HMAC secret must not be empty".into()));
        }
        Ok(Self::new(kid, SigningKey::Hmac(secret)))
    }

    /// RS256 key from a PKCS#8 or PKCS#1 private key PEM.
    pub fn rsa_from_pem(kid: impl Into<String>, pem: &str) -> AuthResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|err| AuthError::KeyParse(format!("RSA private key: {err}")))?;
        Ok(Self::new(kid, SigningKey::Rsa(Box::new(private))))
    }

    /// ES256 key from a PKCS#8 private key PEM.
    pub fn ec_from_pem(kid: impl Into<String>, pem: &str) -> AuthResult<Self> {
        let private = <EcSigningKey as p256::pkcs8::DecodePrivateKey>::from_pkcs8_pem(pem)
            .map_err(|err| AuthError::KeyParse(format!("P-256 private key: {err}")))?;
        Ok(Self::new(kid, SigningKey::Ec(private)))
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Algorithm {
        self.signing.algorithm()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    pub(crate) fn into_shared(self) -> Arc<KeyPair> {
        Arc::new(self)
    }
}

/// Rejects a declared `alg` that differs from the key's algorithm, before
/// any signature bytes are looked at.
pub fn check_algorithm(declared: &str, key: &VerifyingKey) -> AuthResult<()> {
    let expected = key.algorithm();
    if declared == expected.as_str() {
        Ok(())
    } else {
        Err(AuthError::AlgorithmMismatch {
            expected,
            found: declared.to_string(),
        })
    }
}

/// Signs the JWS signing input `b64(header) "." b64(payload)`.
pub fn sign(header: &[u8], payload: &[u8], key: &SigningKey) -> AuthResult<Vec<u8>> {
    let message = signing_input(header, payload);
    match key {
        SigningKey::Hmac(secret) => {
            let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.expose())
                .map_err(|_| AuthError::KeyParse("invalid HMAC key length".into()))?;
            mac.update(&message);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        SigningKey::Rsa(private) => {
            let signer = RsaSigningKey::<Sha256>::new(private.as_ref().clone());
            let signature = signer
                .try_sign(&message)
                .map_err(|err| AuthError::EncodingError(format!("RS256 signing failed: {err}")))?;
            Ok(signature.to_vec())
        }
        SigningKey::Ec(private) => {
            let signature: EcSignature = private
                .try_sign(&message)
                .map_err(|err| AuthError::EncodingError(format!("ES256 signing failed: {err}")))?;
            Ok(signature.to_bytes().to_vec())
        }
    }
}

/// Checks a signature produced by [`sign`]. Any mismatch, including a
/// truncated or oversized signature, yields `false`.
pub fn verify(header: &[u8], payload: &[u8], signature: &[u8], key: &VerifyingKey) -> bool {
    let message = signing_input(header, payload);
    match key {
        VerifyingKey::Hmac(secret) => {
            let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret.expose()) else {
                return false;
            };
            mac.update(&message);
            // verify_slice compares in constant time
            mac.verify_slice(signature).is_ok()
        }
        VerifyingKey::Rsa(public) => {
            let Ok(signature) = RsaSignature::try_from(signature) else {
                return false;
            };
            RsaVerifyingKey::<Sha256>::new(public.clone())
                .verify(&message, &signature)
                .is_ok()
        }
        VerifyingKey::Ec(public) => {
            let Ok(signature) = EcSignature::from_slice(signature) else {
                return false;
            };
            public.verify(&message, &signature).is_ok()
        }
    }
}

fn signing_input(header: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut message = URL_SAFE_NO_PAD.encode(header).into_bytes();
    message.push(b'.');
    message.extend_from_slice(URL_SAFE_NO_PAD.encode(payload).as_bytes());
    message
}
