use anyhow::{Context, Result, bail};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::gateway::ConfirmationPolicy;
use crate::models::Identity;
use crate::orchestrator::{DEFAULT_GAS_LIMIT, OrchestratorSettings};
use crate::units::{DEFAULT_PRECISION, MAX_PRECISION};

pub const DEFAULT_APP_NAME: &str = "Product Tracking Dapp";
pub const DEFAULT_SYNC_SCHEDULE: &str = "0 */1 * * * *";

/// Deployment configuration loaded from environment variables. Fixed for the
/// lifetime of the process.
#[derive(Clone)]
pub struct Config {
    pub app_name: String,
    pub ledger_endpoint: String,
    pub ledger_api_key: Option<String>,
    pub contract_address: Identity,
    pub abi_path: Option<PathBuf>,
    pub precision: u32,
    pub gas_limit: u64,
    pub confirmation: ConfirmationPolicy,
    pub request_timeout: Duration,
    pub wallet_keys: Vec<String>,
    pub sync_schedule: String,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// # Environment Variables
    /// - `LEDGER_ENDPOINT`: Required - JSON-RPC URL of the ledger node
    /// - `CONTRACT_ADDRESS`: Required - Tracking contract address (0x-prefixed hex)
    /// - `CONTRACT_ABI_PATH`: Optional - Interface schema file (default: bundled Tracking ABI)
    /// - `LEDGER_API_KEY`: Optional - API key sent to the ledger node
    /// - `AMOUNT_PRECISION`: Optional - Fractional digits of amounts (default: 18)
    /// - `GAS_LIMIT`: Optional - Gas ceiling for lifecycle transitions (default: 300000)
    /// - `CONFIRMATION_TIMEOUT_SECS`: Optional - Confirmation wait bound (default: 120)
    /// - `CONFIRMATION_POLL_MS`: Optional - Receipt polling interval (default: 1500)
    /// - `REQUEST_TIMEOUT_SECS`: Optional - Per-request HTTP timeout (default: 30)
    /// - `WALLET_KEYS`: Optional - Comma-separated hex ed25519 keys; unset means no wallet
    /// - `SYNC_SCHEDULE`: Optional - Cron expression for `watch` (default: "0 */1 * * * *")
    /// - `APP_NAME`: Optional - Application name (default: "Product Tracking Dapp")
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Parse ledger endpoint (required, no implicit local default)
        let ledger_endpoint = required(&lookup, "LEDGER_ENDPOINT")?;
        if !ledger_endpoint.starts_with("http://") && !ledger_endpoint.starts_with("https://") {
            bail!("LEDGER_ENDPOINT must be an http(s) URL");
        }

        // Parse contract address (required)
        let contract_address = Identity::parse(&required(&lookup, "CONTRACT_ADDRESS")?)
            .context("CONTRACT_ADDRESS is not a valid address")?;

        let ledger_api_key = optional(&lookup, "LEDGER_API_KEY");
        let abi_path = optional(&lookup, "CONTRACT_ABI_PATH").map(PathBuf::from);

        let precision = parsed(&lookup, "AMOUNT_PRECISION", DEFAULT_PRECISION)?;
        if precision > MAX_PRECISION {
            bail!("AMOUNT_PRECISION cannot exceed {}", MAX_PRECISION);
        }

        let gas_limit = parsed(&lookup, "GAS_LIMIT", DEFAULT_GAS_LIMIT)?;
        if gas_limit == 0 {
            bail!("GAS_LIMIT must be positive");
        }

        let defaults = ConfirmationPolicy::default();
        let confirmation_timeout = parsed(&lookup, "CONFIRMATION_TIMEOUT_SECS", defaults.timeout.as_secs())?;
        let confirmation_poll = parsed(
            &lookup,
            "CONFIRMATION_POLL_MS",
            defaults.poll_interval.as_millis() as u64,
        )?;
        if confirmation_timeout == 0 || confirmation_poll == 0 {
            bail!("CONFIRMATION_TIMEOUT_SECS and CONFIRMATION_POLL_MS must be positive");
        }

        let request_timeout = parsed(&lookup, "REQUEST_TIMEOUT_SECS", 30u64)?;

        // Parse wallet keys (optional, absent means no wallet provider)
        let wallet_keys = optional(&lookup, "WALLET_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|key| !key.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let sync_schedule = optional(&lookup, "SYNC_SCHEDULE")
            .unwrap_or_else(|| DEFAULT_SYNC_SCHEDULE.to_string());
        let app_name = optional(&lookup, "APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_string());

        Ok(Config {
            app_name,
            ledger_endpoint,
            ledger_api_key,
            contract_address,
            abi_path,
            precision,
            gas_limit,
            confirmation: ConfirmationPolicy {
                timeout: Duration::from_secs(confirmation_timeout),
                poll_interval: Duration::from_millis(confirmation_poll),
            },
            request_timeout: Duration::from_secs(request_timeout),
            wallet_keys,
            sync_schedule,
        })
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            precision: self.precision,
            gas_limit: self.gas_limit,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("app_name", &self.app_name)
            .field("ledger_endpoint", &self.ledger_endpoint)
            .field("ledger_api_key", &self.ledger_api_key.as_ref().map(|_| "<redacted>"))
            .field("contract_address", &self.contract_address)
            .field("abi_path", &self.abi_path)
            .field("precision", &self.precision)
            .field("gas_limit", &self.gas_limit)
            .field("confirmation", &self.confirmation)
            .field("request_timeout", &self.request_timeout)
            .field("wallet_keys", &format_args!("<{} keys>", self.wallet_keys.len()))
            .field("sync_schedule", &self.sync_schedule)
            .finish()
    }
}

fn required<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Result<String> {
    let value = lookup(key).with_context(|| format!("{} not set", key))?;
    if value.trim().is_empty() {
        bail!("{} cannot be empty", key);
    }
    Ok(value.trim().to_string())
}

fn optional<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parsed<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(lookup, key) {
        Some(value) => value
            .parse()
            .with_context(|| format!("{} is not a valid value: {}", key, value)),
        None => Ok(default),
    }
}
