use crate::progression::BlockProgression;
use config::{Config, Environment, File};
use log::debug;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_PREFIX: &str = "BRIDGE_ORACLE";
pub const CONFIG_PATH_ENV: &str = "BRIDGE_ORACLE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "/config/bridge-oracle.toml";

/// Largest tree depth the circuit can be built for. A deeper tree could never be filled anyway.
pub const MAX_SUPPORTED_DEPTH: usize = 64;

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct OracleConfig {
    /// Websocket endpoint of the chain emitting deposits.
    #[serde(default)]
    pub source_rpc_url: String,
    /// HTTP endpoint of the chain hosting the verifier.
    #[serde(default)]
    pub destination_rpc_url: String,
    #[serde(default)]
    pub source_contract: String,
    #[serde(default)]
    pub verifier_contract: String,
    /// Hex encoded secp256k1 key used to sign verifier calls.
    #[serde(default)]
    pub signing_key: String,
    #[serde(default = "default_destination_chain_id")]
    pub destination_chain_id: u64,
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_accumulator_db_path")]
    pub accumulator_db_path: String,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: String,
    #[serde(default = "default_max_tree_depth")]
    pub max_tree_depth: usize,
    #[serde(default)]
    pub block_progression: BlockProgression,
    #[serde(default = "default_source_request_timeout_secs")]
    pub source_request_timeout_secs: u64,
    #[serde(default = "default_destination_request_timeout_secs")]
    pub destination_request_timeout_secs: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_max_resubmissions")]
    pub max_resubmissions: u32,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    #[serde(default = "default_gas_bump_percent")]
    pub gas_bump_percent: u64,
    #[serde(default = "default_max_attempts")]
    pub max_proving_attempts: u32,
    #[serde(default = "default_max_submission_attempts")]
    pub max_submission_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Consecutive reconnects before the watcher is given up on. Zero retries forever.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_destination_chain_id() -> u64 { 97 }
fn default_accumulator_db_path() -> String { "data/accumulator".to_string() }
fn default_artifacts_dir() -> String { "data/artifacts".to_string() }
fn default_max_tree_depth() -> usize { 32 }
fn default_source_request_timeout_secs() -> u64 { 30 }
fn default_destination_request_timeout_secs() -> u64 { 30 }
fn default_confirmation_timeout_secs() -> u64 { 120 }
fn default_receipt_poll_interval_ms() -> u64 { 2_000 }
fn default_max_resubmissions() -> u32 { 3 }
fn default_gas_limit() -> u64 { 500_000 }
fn default_gas_bump_percent() -> u64 { 15 }
fn default_max_attempts() -> u32 { 3 }
fn default_max_submission_attempts() -> u32 { 5 }
fn default_retry_backoff_ms() -> u64 { 1_000 }
fn default_max_backoff_secs() -> u64 { 60 }
fn default_event_buffer() -> usize { 64 }

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            source_rpc_url: String::new(),
            destination_rpc_url: String::new(),
            source_contract: String::new(),
            verifier_contract: String::new(),
            signing_key: String::new(),
            destination_chain_id: default_destination_chain_id(),
            start_block: 0,
            accumulator_db_path: default_accumulator_db_path(),
            artifacts_dir: default_artifacts_dir(),
            max_tree_depth: default_max_tree_depth(),
            block_progression: BlockProgression::default(),
            source_request_timeout_secs: default_source_request_timeout_secs(),
            destination_request_timeout_secs: default_destination_request_timeout_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            max_resubmissions: default_max_resubmissions(),
            gas_limit: default_gas_limit(),
            gas_bump_percent: default_gas_bump_percent(),
            max_proving_attempts: default_max_attempts(),
            max_submission_attempts: default_max_submission_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_secs: default_max_backoff_secs(),
            max_reconnect_attempts: 0,
            event_buffer: default_event_buffer(),
        }
    }
}

impl OracleConfig {

    /// Reads the optional file at `path` and overlays `BRIDGE_ORACLE_*` environment variables.
    pub fn load(path: &str) -> Result<OracleConfig, ConfigError> {
        debug!("Loading configuration from {} (exists: {})", path, Path::new(path).exists());
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let oracle_config: OracleConfig = config.try_deserialize()?;
        oracle_config.validate()?;
        Ok(oracle_config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("source_rpc_url", &self.source_rpc_url),
            ("destination_rpc_url", &self.destination_rpc_url),
            ("source_contract", &self.source_contract),
            ("verifier_contract", &self.verifier_contract),
            ("signing_key", &self.signing_key),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Missing(name.to_string()));
        }
        if self.max_tree_depth == 0 || self.max_tree_depth > MAX_SUPPORTED_DEPTH {
            return Err(ConfigError::Invalid(format!(
                "max_tree_depth must be between 1 and {}, got {}",
                MAX_SUPPORTED_DEPTH, self.max_tree_depth
            )));
        }
        if self.max_proving_attempts == 0 || self.max_submission_attempts == 0 {
            return Err(ConfigError::Invalid("retry attempts must be at least 1".to_string()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn source_request_timeout(&self) -> Duration {
        Duration::from_secs(self.source_request_timeout_secs)
    }

    pub fn destination_request_timeout(&self) -> Duration {
        Duration::from_secs(self.destination_request_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Error loading configuration: {0}")]
    Loading(#[from] config::ConfigError),
    #[error("Missing configuration value: {0}")]
    Missing(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
