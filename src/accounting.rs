//! Lido vault accounting: the LazyOracle report tree and VaultHub fee
//! and freshness reads.
//!
//! Each oracle report publishes an OpenZeppelin standard-merkle-tree dump
//! to IPFS. Submitting a vault's report means locating its leaf in that
//! dump, rebuilding the inclusion proof from the flat tree, and calling
//! `LazyOracle.updateVaultData`.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, B256, Bytes, TxHash, U256, keccak256};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use native_yield_evm::{EvmError, Wallet};

use crate::bindings::{ILazyOracle, IVaultHub};

#[derive(Debug, thiserror::Error)]
pub enum AccountingError {
    #[error(transparent)]
    Evm(#[from] EvmError),
    #[error("contract call failed: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("failed to decode call result: {0}")]
    Decode(#[from] alloy::sol_types::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("IPFS gateway error (status {status}): {message}")]
    Ipfs { status: StatusCode, message: String },
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("vault {0} not found in report {1}")]
    VaultNotInReport(Address, String),
    #[error("malformed report tree: {0}")]
    MalformedTree(String),
}

/// The most recent report anchored on the LazyOracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportData {
    pub timestamp: U256,
    pub ref_slot: U256,
    pub tree_root: B256,
    pub report_cid: String,
}

/// Arguments to `LazyOracle.updateVaultData` for one vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultReportParams {
    pub vault: Address,
    pub total_value: U256,
    pub cumulative_lido_fees: U256,
    pub liability_shares: U256,
    pub max_liability_shares: U256,
    pub slashing_reserve: U256,
    pub proof: Vec<B256>,
}

#[async_trait]
pub trait VaultAccounting: Send + Sync {
    async fn latest_report_data(&self) -> Result<ReportData, AccountingError>;

    async fn get_latest_submit_vault_report_params(
        &self,
        vault: Address,
    ) -> Result<VaultReportParams, AccountingError>;

    async fn submit_latest_vault_report(&self, vault: Address) -> Result<TxHash, AccountingError>;

    /// Lido fees the vault could settle right now; `None` when unreadable.
    async fn peek_unpaid_protocol_fees(&self, vault: Address) -> Option<U256>;

    async fn is_report_fresh(&self, vault: Address) -> Result<bool, AccountingError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TreeValue {
    value: Vec<String>,
    tree_index: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StandardMerkleTreeDump {
    format: String,
    tree: Vec<B256>,
    values: Vec<TreeValue>,
}

fn parse_uint(raw: &str) -> Result<U256, AccountingError> {
    U256::from_str(raw).map_err(|error| AccountingError::MalformedTree(format!("{raw}: {error}")))
}

/// Standard-merkle-tree leaf: `keccak256(keccak256(abi.encode(values)))`.
fn leaf_hash(params: &VaultReportParams) -> B256 {
    let encoded = (
        params.vault,
        params.total_value,
        params.cumulative_lido_fees,
        params.liability_shares,
        params.max_liability_shares,
        params.slashing_reserve,
    )
        .abi_encode_params();

    keccak256(keccak256(encoded))
}

fn sibling_index(index: usize) -> usize {
    if index % 2 == 1 { index + 1 } else { index - 1 }
}

const fn parent_index(index: usize) -> usize {
    (index - 1) / 2
}

/// Sibling hashes from `tree_index` up to (excluding) the root.
fn build_proof(tree: &[B256], tree_index: usize) -> Result<Vec<B256>, AccountingError> {
    if tree_index >= tree.len() {
        return Err(AccountingError::MalformedTree(format!(
            "tree index {tree_index} out of bounds for {} nodes",
            tree.len()
        )));
    }

    let mut proof = Vec::new();
    let mut index = tree_index;

    while index > 0 {
        let sibling = sibling_index(index);
        let node = tree.get(sibling).ok_or_else(|| {
            AccountingError::MalformedTree(format!("missing sibling {sibling} of node {index}"))
        })?;
        proof.push(*node);
        index = parent_index(index);
    }

    Ok(proof)
}

fn vault_params_from_dump(
    dump: &StandardMerkleTreeDump,
    vault: Address,
    cid: &str,
) -> Result<VaultReportParams, AccountingError> {
    if dump.format != "standard-v1" {
        warn!(format = %dump.format, "Unexpected report tree format");
    }

    for entry in &dump.values {
        let [raw_vault, total_value, fees, liability, max_liability, slashing] = entry.value.as_slice()
        else {
            return Err(AccountingError::MalformedTree(format!(
                "leaf at {} has {} values",
                entry.tree_index,
                entry.value.len()
            )));
        };

        let leaf_vault = Address::from_str(raw_vault)
            .map_err(|error| AccountingError::MalformedTree(format!("{raw_vault}: {error}")))?;
        if leaf_vault != vault {
            continue;
        }

        let mut params = VaultReportParams {
            vault,
            total_value: parse_uint(total_value)?,
            cumulative_lido_fees: parse_uint(fees)?,
            liability_shares: parse_uint(liability)?,
            max_liability_shares: parse_uint(max_liability)?,
            slashing_reserve: parse_uint(slashing)?,
            proof: Vec::new(),
        };

        let expected = leaf_hash(&params);
        if dump.tree.get(entry.tree_index) != Some(&expected) {
            return Err(AccountingError::MalformedTree(format!(
                "leaf hash mismatch at index {}",
                entry.tree_index
            )));
        }

        params.proof = build_proof(&dump.tree, entry.tree_index)?;
        return Ok(params);
    }

    Err(AccountingError::VaultNotInReport(vault, cid.to_string()))
}

fn update_vault_data_calldata(params: &VaultReportParams) -> Bytes {
    Bytes::from(
        ILazyOracle::updateVaultDataCall {
            _vault: params.vault,
            _totalValue: params.total_value,
            _cumulativeLidoFees: params.cumulative_lido_fees,
            _liabilityShares: params.liability_shares,
            _maxLiabilityShares: params.max_liability_shares,
            _slashingReserve: params.slashing_reserve,
            _proof: params.proof.clone(),
        }
        .abi_encode(),
    )
}

/// Fetches report tree dumps from an IPFS gateway.
pub(crate) struct ReportTreeSource {
    http: Client,
    ipfs_base_url: Url,
    retry: ExponentialBuilder,
}

impl ReportTreeSource {
    pub(crate) fn new(ipfs_base_url: Url) -> Self {
        Self {
            http: Client::new(),
            ipfs_base_url,
            retry: ExponentialBuilder::default()
                .with_max_times(3)
                .with_min_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(15)),
        }
    }

    pub(crate) fn with_retry(mut self, retry: ExponentialBuilder) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch(&self, cid: &str) -> Result<StandardMerkleTreeDump, AccountingError> {
        let url = Url::parse(&format!(
            "{}/{cid}",
            self.ipfs_base_url.as_str().trim_end_matches('/')
        ))?;

        let fetch = || async {
            let response = self.http.get(url.clone()).send().await?;

            if !response.status().is_success() {
                let status = response.status();
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(AccountingError::Ipfs { status, message });
            }

            Ok(response.json::<StandardMerkleTreeDump>().await?)
        };

        fetch
            .retry(self.retry)
            .when(|error| match error {
                AccountingError::Ipfs { status, .. } => status.is_server_error(),
                AccountingError::Reqwest(error) => error.is_timeout() || error.is_connect(),
                _ => false,
            })
            .notify(|error, delay| warn!(?error, ?delay, cid, "Retrying report tree fetch"))
            .await
    }
}

pub struct VaultAccountingClient<W: Wallet> {
    wallet: W,
    lazy_oracle: Address,
    vault_hub: Address,
    report_trees: ReportTreeSource,
}

impl<W: Wallet> VaultAccountingClient<W> {
    pub fn new(wallet: W, lazy_oracle: Address, vault_hub: Address, ipfs_base_url: Url) -> Self {
        Self {
            wallet,
            lazy_oracle,
            vault_hub,
            report_trees: ReportTreeSource::new(ipfs_base_url),
        }
    }
}

#[async_trait]
impl<W: Wallet> VaultAccounting for VaultAccountingClient<W> {
    async fn latest_report_data(&self) -> Result<ReportData, AccountingError> {
        let report = ILazyOracle::new(self.lazy_oracle, self.wallet.provider().clone())
            .latestReportData()
            .call()
            .await?;

        Ok(ReportData {
            timestamp: report.timestamp,
            ref_slot: report.refSlot,
            tree_root: report.treeRoot,
            report_cid: report.reportCid,
        })
    }

    async fn get_latest_submit_vault_report_params(
        &self,
        vault: Address,
    ) -> Result<VaultReportParams, AccountingError> {
        let report = self.latest_report_data().await?;
        let dump = self.report_trees.fetch(&report.report_cid).await?;

        if dump.tree.first() != Some(&report.tree_root) {
            return Err(AccountingError::MalformedTree(format!(
                "root of {} does not match on-chain root {}",
                report.report_cid, report.tree_root
            )));
        }

        let params = vault_params_from_dump(&dump, vault, &report.report_cid)?;
        debug!(%vault, cid = %report.report_cid, proof_len = params.proof.len(), "Built vault report params");

        Ok(params)
    }

    async fn submit_latest_vault_report(&self, vault: Address) -> Result<TxHash, AccountingError> {
        let params = self.get_latest_submit_vault_report_params(vault).await?;

        let receipt = self
            .wallet
            .send(self.lazy_oracle, update_vault_data_calldata(&params), "updateVaultData")
            .await?;

        info!(%vault, total_value = %params.total_value, tx_hash = %receipt.transaction_hash, "Submitted vault report");

        Ok(receipt.transaction_hash)
    }

    async fn peek_unpaid_protocol_fees(&self, vault: Address) -> Option<U256> {
        let fees = IVaultHub::new(self.vault_hub, self.wallet.provider().clone())
            .settleableLidoFeesValue(vault)
            .call()
            .await;

        match fees {
            Ok(fees) => Some(fees),
            Err(error) => {
                debug!(?error, %vault, "settleableLidoFeesValue failed");
                None
            }
        }
    }

    async fn is_report_fresh(&self, vault: Address) -> Result<bool, AccountingError> {
        let calldata = IVaultHub::isReportFreshCall { _vault: vault }.abi_encode();
        let returned = self.wallet.call(self.vault_hub, Bytes::from(calldata)).await?;

        Ok(IVaultHub::isReportFreshCall::abi_decode_returns(&returned)?)
    }
}
