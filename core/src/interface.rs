//! Configuration, booking requests and JSON (de)serialization helpers.

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Reads a JSON-encoded file from the given `path` and deserializes into type `T`.
///
/// # Errors
///
/// Returns an `anyhow::Error` if the file cannot be opened, read, or parsed.
pub fn load_escrow_data<P, T>(path: P) -> anyhow::Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("loading escrow data: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("parsing JSON from {:?}", path))
}

/// Writes `data` as pretty-printed JSON to `path`, creating parent directories.
///
/// # Errors
///
/// Returns an `anyhow::Error` if the file cannot be created or data cannot be serialized.
pub fn save_escrow_data<P, T>(path: P, data: &T) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {:?}", parent))?;
    }
    let file = File::create(path).with_context(|| format!("creating file {:?}", path))?;
    serde_json::to_writer_pretty(file, data)
        .with_context(|| format!("serializing to JSON to {:?}", path))
}

/// Deployment environment. Mock conditions are refused in `Production`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Production,
    Sandbox,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl AsRef<str> for Environment {
    fn as_ref(&self) -> &str {
        match self {
            Self::Production => "production",
            Self::Sandbox => "sandbox",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    /// Case-insensitive; `prod`/`dev` are accepted as aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "sandbox" | "dev" => Ok(Self::Sandbox),
            "test" => Ok(Self::Test),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscrowConfig {
    #[serde(default)]
    pub environment: Environment,

    /// Ceiling for any single escrow, in whole units.
    #[serde(default = "default_max_amount", with = "rust_decimal::serde::str")]
    pub max_amount: Decimal,

    /// Upper bound on any single call to the signing service.
    #[serde(default = "default_signing_timeout_secs")]
    pub signing_timeout_secs: u64,

    /// How long a signing request stays answerable, in minutes.
    #[serde(default = "default_signing_window_mins")]
    pub signing_window_mins: u32,

    /// Grace after `finish_after` before an unsettled escrow is marked expired.
    #[serde(default = "default_expiry_grace_secs")]
    pub expiry_grace_secs: u64,

    pub signer: SignerConfig,

    pub ledger: LedgerConfig,
}

impl EscrowConfig {
    pub fn signing_timeout(&self) -> Duration {
        Duration::from_secs(self.signing_timeout_secs)
    }

    pub fn signing_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.signing_window_mins))
    }

    pub fn expiry_grace(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.expiry_grace_secs).unwrap_or(i64::MAX))
    }
}

/// Delegated-signing provider credentials.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignerConfig {
    /// Base URL of the provider's REST API.
    pub api_url: String,
    pub api_key: String,
    pub api_secret: String,
}

impl std::fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignerConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Read-only ledger access.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,
}

fn default_max_amount() -> Decimal {
    Decimal::from(100_000)
}

fn default_signing_timeout_secs() -> u64 {
    30
}

fn default_signing_window_mins() -> u32 {
    10
}

fn default_expiry_grace_secs() -> u64 {
    24 * 60 * 60
}

/// A booking's request to pay through an escrow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRequest {
    /// Payer's classic address.
    pub from: String,
    /// Provider's classic address.
    pub to: String,
    /// Decimal amount in whole units.
    pub amount: String,
    pub booking_id: String,
    #[serde(default)]
    pub purpose: Option<String>,
    #[serde(default)]
    pub finish_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub destination_tag: Option<u32>,
}
