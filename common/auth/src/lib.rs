pub mod claims;
pub mod codec;
pub mod config;
pub mod error;
pub mod signer;
pub mod verifier;

pub use claims::{ClaimData, Claims, ClaimsCodec};
pub use codec::{Header, TokenCodec, TokenParts, UnverifiedHeader};
pub use config::JwtConfig;
pub use error::{AuthError, AuthResult};
pub use signer::{Algorithm, KeyPair, Secret, SigningKey, VerifyingKey};
pub use verifier::{encode_token, EncodedToken, InMemoryKeyStore, JwtVerifier, KeyRing};
