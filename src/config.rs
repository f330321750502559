use alloy::primitives::{Address, B256, U256};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;
use url::Url;

use crate::processor::ProcessorSettings;
use crate::telemetry::{TelemetryConfig, TelemetryCtx, TelemetrySecrets};

const MAX_QUOTA_BPS: u32 = 10_000;

#[derive(Parser, Debug)]
pub struct Env {
    /// Path to plaintext TOML configuration file
    #[clap(long)]
    pub config: PathBuf,
    /// Path to TOML secrets file
    #[clap(long)]
    pub secrets: PathBuf,
}

/// Non-secret settings deserialized from the plaintext config TOML.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Config {
    log_level: Option<LogLevel>,
    chain_id: u64,
    required_confirmations: Option<u64>,
    data_sources: DataSources,
    contracts: Contracts,
    #[serde(default)]
    rebalance: RebalanceConfig,
    #[serde(default)]
    reporting: ReportingConfig,
    timing: TimingConfig,
    #[serde(rename = "hyperdx")]
    telemetry: Option<TelemetryConfig>,
}

/// Secret credentials deserialized from the secrets TOML.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Secrets {
    l1_rpc_url: Url,
    private_key: B256,
    #[serde(rename = "hyperdx")]
    telemetry: Option<TelemetrySecrets>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSources {
    pub beacon_api_url: Url,
    pub staking_graphql_url: Url,
    pub ipfs_base_url: Url,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Contracts {
    pub yield_manager: Address,
    pub lazy_oracle: Address,
    pub vault_hub: Address,
    pub message_service: Address,
    pub yield_provider: Address,
    pub l2_yield_recipient: Address,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RebalanceConfig {
    pub quota_window_size_in_cycles: usize,
    pub quota_bps: u32,
    pub tolerance_amount_wei: U256,
    pub min_withdrawal_threshold_eth: u64,
    pub max_validator_withdrawal_requests_per_transaction: usize,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            quota_window_size_in_cycles: 24,
            quota_bps: 1800,
            tolerance_amount_wei: U256::ZERO,
            min_withdrawal_threshold_eth: 1,
            max_validator_withdrawal_requests_per_transaction: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReportingConfig {
    pub should_submit_vault_report: bool,
    pub should_report_yield: bool,
    pub is_unpause_staking_enabled: bool,
    pub min_positive_yield_to_report_wei: U256,
    pub min_unpaid_protocol_fees_to_report_wei: U256,
    pub min_negative_yield_diff_to_report_wei: Option<U256>,
    pub cycles_per_yield_report: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            should_submit_vault_report: true,
            should_report_yield: true,
            is_unpause_staking_enabled: true,
            // Unset thresholds are unreachable so reporting needs explicit opt-in.
            min_positive_yield_to_report_wei: U256::MAX,
            min_unpaid_protocol_fees_to_report_wei: U256::MAX,
            min_negative_yield_diff_to_report_wei: None,
            cycles_per_yield_report: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingConfig {
    pub trigger_max_inaction_secs: u64,
    pub gauge_poll_interval_secs: Option<u64>,
}

// ===== Runtime types (assembled from Config + Secrets) =====

/// Combined runtime context for the service.
#[derive(Clone)]
pub struct Ctx {
    pub log_level: LogLevel,
    pub(crate) chain_id: u64,
    pub(crate) required_confirmations: u64,
    pub(crate) l1_rpc_url: Url,
    pub(crate) private_key: B256,
    pub(crate) data_sources: DataSources,
    pub(crate) contracts: Contracts,
    pub(crate) rebalance: RebalanceConfig,
    pub(crate) reporting: ReportingConfig,
    pub(crate) trigger_max_inaction: Duration,
    pub(crate) gauge_poll_interval: Duration,
    pub telemetry: Option<TelemetryCtx>,
}

impl std::fmt::Debug for Ctx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("log_level", &self.log_level)
            .field("chain_id", &self.chain_id)
            .field("required_confirmations", &self.required_confirmations)
            .field("l1_rpc_url", &"[REDACTED]")
            .field("private_key", &"[REDACTED]")
            .field("data_sources", &self.data_sources)
            .field("contracts", &self.contracts)
            .field("rebalance", &self.rebalance)
            .field("reporting", &self.reporting)
            .field("trigger_max_inaction", &self.trigger_max_inaction)
            .field("gauge_poll_interval", &self.gauge_poll_interval)
            .field("telemetry", &self.telemetry)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        (&log_level).into()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML")]
    Toml(#[from] toml::de::Error),
    #[error("quota_bps {0} exceeds {MAX_QUOTA_BPS}")]
    InvalidQuotaBps(u32),
    #[error("gauge_poll_interval_secs must be at least 1")]
    ZeroGaugePollInterval,
    #[error("telemetry config present in config but telemetry secrets missing")]
    TelemetrySecretsMissing,
    #[error("telemetry secrets present but telemetry config missing in config")]
    TelemetryConfigMissing,
}

#[cfg(test)]
impl ConfigError {
    fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "failed to read config file",
            Self::Toml(_) => "failed to parse TOML",
            Self::InvalidQuotaBps(_) => "invalid quota bps",
            Self::ZeroGaugePollInterval => "zero gauge poll interval",
            Self::TelemetrySecretsMissing => "telemetry secrets missing",
            Self::TelemetryConfigMissing => "telemetry config missing",
        }
    }
}

fn assemble_telemetry(
    config: Option<TelemetryConfig>,
    secrets: Option<TelemetrySecrets>,
    log_level: LogLevel,
) -> Result<Option<TelemetryCtx>, ConfigError> {
    match (config, secrets) {
        (Some(config), Some(secrets)) => {
            Ok(Some(TelemetryCtx::new(config, secrets, log_level.into())))
        }
        (Some(_), None) => Err(ConfigError::TelemetrySecretsMissing),
        (None, Some(_)) => Err(ConfigError::TelemetryConfigMissing),
        (None, None) => Ok(None),
    }
}

impl Ctx {
    pub fn load_files(config: &Path, secrets: &Path) -> Result<Self, ConfigError> {
        let config_str = std::fs::read_to_string(config)?;
        let secrets_str = std::fs::read_to_string(secrets)?;
        Self::from_toml(&config_str, &secrets_str)
    }

    pub fn from_toml(config_toml: &str, secrets_toml: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(config_toml)?;
        let secrets: Secrets = toml::from_str(secrets_toml)?;

        if config.rebalance.quota_bps > MAX_QUOTA_BPS {
            return Err(ConfigError::InvalidQuotaBps(config.rebalance.quota_bps));
        }

        let gauge_poll_interval_secs = config.timing.gauge_poll_interval_secs.unwrap_or(60);
        if gauge_poll_interval_secs == 0 {
            return Err(ConfigError::ZeroGaugePollInterval);
        }

        let log_level = config.log_level.unwrap_or(LogLevel::Debug);
        let telemetry = assemble_telemetry(config.telemetry, secrets.telemetry, log_level)?;

        Ok(Self {
            log_level,
            chain_id: config.chain_id,
            required_confirmations: config.required_confirmations.unwrap_or(1),
            l1_rpc_url: secrets.l1_rpc_url,
            private_key: secrets.private_key,
            data_sources: config.data_sources,
            contracts: config.contracts,
            rebalance: config.rebalance,
            reporting: config.reporting,
            trigger_max_inaction: Duration::from_secs(config.timing.trigger_max_inaction_secs),
            gauge_poll_interval: Duration::from_secs(gauge_poll_interval_secs),
            telemetry,
        })
    }

    pub(crate) fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            yield_provider: self.contracts.yield_provider,
            l2_yield_recipient: self.contracts.l2_yield_recipient,
            max_inaction: self.trigger_max_inaction,
            should_submit_vault_report: self.reporting.should_submit_vault_report,
            should_report_yield: self.reporting.should_report_yield,
            is_unpause_staking_enabled: self.reporting.is_unpause_staking_enabled,
            min_positive_yield_to_report_wei: self.reporting.min_positive_yield_to_report_wei,
            min_unpaid_protocol_fees_to_report_wei: self
                .reporting
                .min_unpaid_protocol_fees_to_report_wei,
            min_negative_yield_diff_to_report_wei: self
                .reporting
                .min_negative_yield_diff_to_report_wei,
            cycles_per_yield_report: self.reporting.cycles_per_yield_report,
        }
    }
}

pub(crate) fn default_filter(level: Level) -> String {
    format!("native_yield={level},native_yield_evm={level}")
}

pub fn setup_tracing(log_level: &LogLevel) {
    let level: Level = log_level.into();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(level).into()),
        )
        .init();
}
