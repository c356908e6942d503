use std::sync::Arc;

use anyhow::Result;
use axum::extract::FromRef;

use crate::authenticator::Authenticator;
use crate::config::ServiceConfig;
use crate::credentials::CredentialVerifier;
use crate::metrics::AuthMetrics;
use crate::revocation::{InMemoryRevocationStore, RevocationStore};
use crate::tokens::TokenService;

/// State shared by the handlers of the service that mounts the authenticator.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub tokens: Arc<TokenService>,
    pub metrics: Arc<AuthMetrics>,
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.authenticator.clone()
    }
}

impl AppState {
    /// Wires a token service and authenticator from configuration, backed by
    /// the in-memory revocation store.
    pub fn from_config(
        config: &ServiceConfig,
        credentials: Arc<dyn CredentialVerifier>,
    ) -> Result<Self> {
        Self::with_revocation_store(
            config,
            credentials,
            Arc::new(InMemoryRevocationStore::new()),
        )
    }

    pub fn with_revocation_store(
        config: &ServiceConfig,
        credentials: Arc<dyn CredentialVerifier>,
        revocations: Arc<dyn RevocationStore>,
    ) -> Result<Self> {
        let metrics = Arc::new(AuthMetrics::new()?);
        let tokens = Arc::new(
            TokenService::new(config.jwt.clone(), config.key_pair()?, revocations)
                .with_metrics(metrics.clone()),
        );
        let authenticator = Arc::new(
            Authenticator::new(credentials, tokens.clone())
                .with_metrics(metrics.clone())
                .with_debug_errors(config.debug_errors),
        );

        Ok(Self {
            authenticator,
            tokens,
            metrics,
        })
    }

    pub fn render_metrics(&self) -> Result<String> {
        self.metrics.render()
    }
}
