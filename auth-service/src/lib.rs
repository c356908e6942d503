pub mod app;
pub mod authenticator;
pub mod config;
pub mod credentials;
pub mod extractors;
pub mod metrics;
pub mod revocation;
pub mod tokens;

pub use app::AppState;
pub use authenticator::{AuthFailure, AuthRejection, Authenticator};
pub use config::{load_service_config, ServiceConfig};
pub use credentials::{
    CredentialError, CredentialVerifier, Credentials, ExternalIdpVerifier, PasswordHashVerifier,
    Principal,
};
pub use extractors::AuthContext;
pub use revocation::{InMemoryRevocationStore, RevocationEntry, RevocationError, RevocationStore};
pub use tokens::{SignedToken, TokenService};
