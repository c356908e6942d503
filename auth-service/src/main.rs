use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use auth_service::config::{load_service_config, MAX_LIFETIME_SECONDS};
use auth_service::revocation::InMemoryRevocationStore;
use auth_service::tokens::TokenService;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use common_auth::{ClaimData, ClaimsCodec, TokenCodec};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Issue and check tokens with the key configured in the environment.
#[derive(Parser)]
#[command(name = "jwtctl", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign a new token and print it.
    Issue {
        #[arg(long)]
        sub: String,
        /// Custom claim as key=value; JSON values are kept typed.
        #[arg(long = "data", value_parser = parse_claim)]
        data: Vec<(String, Value)>,
        /// Lifetime in seconds; defaults to JWT_TTL_SECONDS.
        #[arg(long, value_parser = parse_seconds)]
        ttl: Option<Duration>,
        /// Seconds until the token becomes valid.
        #[arg(long, value_parser = parse_seconds, default_value = "0")]
        nbf: Duration,
    },
    /// Verify a token and print its claims.
    Verify { token: String },
    /// Print header and claims without checking anything.
    Inspect { token: String },
}

fn parse_claim(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("claim name must not be empty".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    let seconds: i64 = raw
        .trim()
        .parse()
        .map_err(|err| format!("expected whole seconds, got '{raw}': {err}"))?;
    if seconds.unsigned_abs() > MAX_LIFETIME_SECONDS.unsigned_abs() {
        return Err(format!("{seconds}s is beyond the {MAX_LIFETIME_SECONDS}s limit"));
    }
    Duration::try_seconds(seconds).ok_or_else(|| format!("{seconds}s is out of range"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Inspect { token } => inspect(&token),
        command => {
            let config = load_service_config()?;
            let key = config.key_pair().context("Failed to load signing key")?;
            info!(algorithm = %key.algorithm(), kid = key.kid(), "loaded signing key");
            let service = TokenService::new(
                config.jwt.clone(),
                key,
                Arc::new(InMemoryRevocationStore::new()),
            );
            run(&service, command).await
        }
    }
}

async fn run(service: &TokenService, command: Command) -> Result<()> {
    match command {
        Command::Issue { sub, data, ttl, nbf } => {
            let ttl = ttl.unwrap_or_else(|| service.config().default_ttl());
            let data: ClaimData = data.into_iter().collect();
            let token = service.issue(sub, data, ttl, nbf)?;
            info!(jti = token.claims().jti(), "issued token");
            println!("{token}");
        }
        Command::Verify { token } => {
            let claims = service
                .verify(&token, Utc::now())
                .await
                .map_err(|err| anyhow!("token rejected ({}): {err}", err.kind()))?;
            let payload: Value = serde_json::from_slice(&ClaimsCodec::encode(&claims)?)?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Command::Inspect { token } => inspect(&token)?,
    }
    Ok(())
}

fn inspect(token: &str) -> Result<()> {
    let parts = TokenCodec::split(token)?;
    let header: Value =
        serde_json::from_slice(&parts.header).context("Header is not valid JSON")?;
    let payload: Value =
        serde_json::from_slice(&parts.payload).context("Payload is not valid JSON")?;
    let view = serde_json::json!({
        "header": header,
        "claims": payload,
        "signature_bytes": parts.signature.len(),
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}
