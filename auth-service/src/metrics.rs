use anyhow::Result;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct AuthMetrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    tokens_issued: IntCounterVec,
    verifications: IntCounterVec,
    revocations: IntCounterVec,
}

impl AuthMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "auth_login_attempts_total",
                "Count of login attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let tokens_issued = IntCounterVec::new(
            Opts::new("auth_tokens_issued_total", "Count of signed tokens issued"),
            &["algorithm"],
        )?;
        registry.register(Box::new(tokens_issued.clone()))?;

        let verifications = IntCounterVec::new(
            Opts::new(
                "auth_token_verifications_total",
                "Count of token verifications grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(verifications.clone()))?;

        let revocations = IntCounterVec::new(
            Opts::new(
                "auth_token_revocations_total",
                "Count of revocation requests grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(revocations.clone()))?;

        Ok(Self {
            registry,
            login_attempts,
            tokens_issued,
            verifications,
            revocations,
        })
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn token_issued(&self, algorithm: &str) {
        self.tokens_issued.with_label_values(&[algorithm]).inc();
    }

    pub fn verification(&self, outcome: &str) {
        self.verifications.with_label_values(&[outcome]).inc();
    }

    pub fn revocation(&self, outcome: &str) {
        self.revocations.with_label_values(&[outcome]).inc();
    }

    /// Prometheus text exposition of every registered counter.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
