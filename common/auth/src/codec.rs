use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, AuthResult};
use crate::signer::Algorithm;

pub const TOKEN_TYPE: &str = "JWT";

/// JOSE header of tokens produced by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    alg: Algorithm,
    typ: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl Header {
    pub fn new(alg: Algorithm) -> Self {
        Self {
            alg,
            typ: TOKEN_TYPE,
            kid: None,
        }
    }

    pub fn with_kid(mut self, kid: impl Into<String>) -> Self {
        self.kid = Some(kid.into());
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.alg
    }

    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn to_bytes(&self) -> AuthResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Header as received, before its `alg` has been checked against a key.
#[derive(Debug, Clone, Deserialize)]
pub struct UnverifiedHeader {
    pub alg: String,
    #[serde(default)]
    pub typ: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
}

impl UnverifiedHeader {
    /// A header that cannot be read cannot be matched to a key, so it is
    /// reported as a rejected signature.
    pub fn parse(bytes: &[u8]) -> AuthResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| AuthError::InvalidSignature(format!("unreadable header: {err}")))
    }
}

/// Decoded bytes of the three compact segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenParts {
    pub header: Vec<u8>,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Compact serialization: `b64(header).b64(payload).b64(signature)`, each
/// segment Base64URL without padding.
pub struct TokenCodec;

impl TokenCodec {
    pub fn assemble(header: &Header, payload: &[u8], signature: &[u8]) -> AuthResult<String> {
        let header = header.to_bytes()?;
        Ok(Self::assemble_raw(&header, payload, signature))
    }

    pub fn assemble_raw(header: &[u8], payload: &[u8], signature: &[u8]) -> String {
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode(signature)
        )
    }

    pub fn split(token: &str) -> AuthResult<TokenParts> {
        let mut segments = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(AuthError::MalformedToken(
                "expected three dot-separated segments".into(),
            ));
        };

        Ok(TokenParts {
            header: decode_segment("header", header)?,
            payload: decode_segment("payload", payload)?,
            signature: decode_segment("signature", signature)?,
        })
    }
}

fn decode_segment(name: &'static str, segment: &str) -> AuthResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|err| AuthError::MalformedToken(format!("{name} segment: {err}")))
}
