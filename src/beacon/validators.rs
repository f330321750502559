//! Validator data for withdrawal planning.
//!
//! Active validators come from the staking GraphQL API, the pending
//! partial withdrawal queue and current epoch from a beacon node.

use std::collections::HashMap;
use std::time::Duration;

use alloy::primitives::{Bytes, U256};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;

use super::{ValidatorRecord, total_pending_partial_withdrawals_wei};

/// Epochs a validator must be active before it may request withdrawals.
pub const SHARD_COMMITTEE_PERIOD: u64 = 256;

const SLOTS_PER_EPOCH: u64 = 32;

const ACTIVE_VALIDATORS_QUERY: &str = "query AllValidatorsByLargestBalance { \
    allHeadValidators(condition: { state: ACTIVE_ONGOING }, orderBy: BALANCE_DESC) { \
        nodes { balance effectiveBalance publicKey validatorIndex activationEpoch } \
    } \
}";

#[derive(Debug, thiserror::Error)]
pub enum ValidatorDataError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("API error (status {status}): {message}")]
    Api { status: StatusCode, message: String },
    #[error("GraphQL error: {0}")]
    GraphQl(String),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid numeric field: {0}")]
    InvalidNumber(String),
}

#[async_trait]
pub trait ValidatorDataSource: Send + Sync {
    /// Withdrawal-eligible validators, ascending by withdrawable amount.
    async fn validators_for_withdrawal_requests_ascending(
        &self,
    ) -> Result<Vec<ValidatorRecord>, ValidatorDataError>;

    fn total_pending_partial_withdrawals_wei(&self, validators: &[ValidatorRecord]) -> U256 {
        total_pending_partial_withdrawals_wei(validators)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActiveValidator {
    pub(crate) public_key: Bytes,
    pub(crate) validator_index: u64,
    pub(crate) balance_gwei: u64,
    pub(crate) effective_balance_gwei: u64,
    pub(crate) activation_epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PendingPartialWithdrawal {
    pub(crate) validator_index: u64,
    pub(crate) amount_gwei: u64,
}

fn number_from_string_or_int<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Int(value) => Ok(value),
        Raw::Str(value) => value.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlValidator {
    #[serde(deserialize_with = "number_from_string_or_int")]
    balance: u64,
    #[serde(deserialize_with = "number_from_string_or_int")]
    effective_balance: u64,
    public_key: Bytes,
    #[serde(deserialize_with = "number_from_string_or_int")]
    validator_index: u64,
    #[serde(deserialize_with = "number_from_string_or_int")]
    activation_epoch: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlNodes {
    nodes: Option<Vec<GraphQlValidator>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphQlData {
    all_head_validators: Option<GraphQlNodes>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct BeaconResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct BeaconPendingWithdrawal {
    #[serde(deserialize_with = "number_from_string_or_int")]
    validator_index: u64,
    #[serde(deserialize_with = "number_from_string_or_int")]
    amount: u64,
}

#[derive(Deserialize)]
struct BeaconHeaderMessage {
    #[serde(deserialize_with = "number_from_string_or_int")]
    slot: u64,
}

#[derive(Deserialize)]
struct BeaconSignedHeader {
    message: BeaconHeaderMessage,
}

#[derive(Deserialize)]
struct BeaconHeader {
    header: BeaconSignedHeader,
}

/// Joins validators with their aggregated pending withdrawals, drops
/// validators still inside the shard committee period (when the epoch is
/// known) and sorts ascending by withdrawable amount.
pub(crate) fn join_validators_with_pending_withdrawals(
    validators: Vec<ActiveValidator>,
    pending: &[PendingPartialWithdrawal],
    current_epoch: Option<u64>,
) -> Vec<ValidatorRecord> {
    let mut pending_by_index: HashMap<u64, u64> = HashMap::new();
    for withdrawal in pending {
        let entry = pending_by_index.entry(withdrawal.validator_index).or_default();
        *entry = entry.saturating_add(withdrawal.amount_gwei);
    }

    let mut joined: Vec<ValidatorRecord> = validators
        .into_iter()
        .filter(|validator| match current_epoch {
            Some(epoch) => validator.activation_epoch.saturating_add(SHARD_COMMITTEE_PERIOD) <= epoch,
            None => true,
        })
        .map(|validator| {
            let pending_withdrawal_gwei = pending_by_index
                .get(&validator.validator_index)
                .copied()
                .unwrap_or(0);

            ValidatorRecord {
                withdrawable_gwei: ValidatorRecord::withdrawable_after(
                    validator.balance_gwei,
                    pending_withdrawal_gwei,
                ),
                public_key: validator.public_key,
                validator_index: validator.validator_index,
                balance_gwei: validator.balance_gwei,
                effective_balance_gwei: validator.effective_balance_gwei,
                pending_withdrawal_gwei,
            }
        })
        .collect();

    joined.sort_by_key(|validator| validator.withdrawable_gwei);
    joined
}

#[derive(Clone)]
pub struct HttpValidatorDataSource {
    client: Client,
    graphql_url: Url,
    beacon_url: Url,
    retry: ExponentialBuilder,
}

impl HttpValidatorDataSource {
    pub fn new(graphql_url: Url, beacon_url: Url) -> Self {
        Self {
            client: Client::new(),
            graphql_url,
            beacon_url,
            retry: ExponentialBuilder::default()
                .with_max_times(3)
                .with_min_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(10)),
        }
    }

    pub fn with_retry(mut self, retry: ExponentialBuilder) -> Self {
        self.retry = retry;
        self
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ValidatorDataError> {
        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(ValidatorDataError::Api { status, message });
        }

        Ok(response.json().await?)
    }

    async fn beacon_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ValidatorDataError> {
        let url = self.beacon_url.join(path)?;

        let fetch = || async {
            let response = self.client.get(url.clone()).send().await?;
            Self::read_json::<BeaconResponse<T>>(response).await
        };

        Ok(fetch
            .retry(self.retry)
            .when(is_retryable)
            .notify(|error, delay| warn!(?error, ?delay, path, "Retrying beacon node request"))
            .await?
            .data)
    }

    pub(crate) async fn active_validators(&self) -> Result<Vec<ActiveValidator>, ValidatorDataError> {
        let fetch = || async {
            let response = self
                .client
                .post(self.graphql_url.clone())
                .json(&json!({ "query": ACTIVE_VALIDATORS_QUERY }))
                .send()
                .await?;
            Self::read_json::<GraphQlResponse>(response).await
        };

        let response = fetch
            .retry(self.retry)
            .when(is_retryable)
            .notify(|error, delay| warn!(?error, ?delay, "Retrying active validators query"))
            .await?;

        if let Some(errors) = response.errors.filter(|errors| !errors.is_empty()) {
            let messages: Vec<String> = errors.into_iter().map(|error| error.message).collect();
            return Err(ValidatorDataError::GraphQl(messages.join("; ")));
        }

        let validators: Vec<ActiveValidator> = response
            .data
            .and_then(|data| data.all_head_validators)
            .and_then(|validators| validators.nodes)
            .unwrap_or_default()
            .into_iter()
            .map(|validator| ActiveValidator {
                public_key: validator.public_key,
                validator_index: validator.validator_index,
                balance_gwei: validator.balance,
                effective_balance_gwei: validator.effective_balance,
                activation_epoch: validator.activation_epoch,
            })
            .collect();

        info!(validator_count = validators.len(), "Fetched active validators");

        Ok(validators)
    }

    pub(crate) async fn pending_partial_withdrawals(
        &self,
    ) -> Result<Vec<PendingPartialWithdrawal>, ValidatorDataError> {
        let withdrawals: Vec<BeaconPendingWithdrawal> = self
            .beacon_get("eth/v1/beacon/states/head/pending_partial_withdrawals")
            .await?;

        Ok(withdrawals
            .into_iter()
            .map(|withdrawal| PendingPartialWithdrawal {
                validator_index: withdrawal.validator_index,
                amount_gwei: withdrawal.amount,
            })
            .collect())
    }

    pub(crate) async fn current_epoch(&self) -> Result<u64, ValidatorDataError> {
        let header: BeaconHeader = self.beacon_get("eth/v1/beacon/headers/head").await?;
        Ok(header.header.message.slot / SLOTS_PER_EPOCH)
    }
}

fn is_retryable(error: &ValidatorDataError) -> bool {
    match error {
        ValidatorDataError::Reqwest(error) => error.is_timeout() || error.is_connect(),
        ValidatorDataError::Api { status, .. } => status.is_server_error(),
        _ => false,
    }
}

#[async_trait]
impl ValidatorDataSource for HttpValidatorDataSource {
    async fn validators_for_withdrawal_requests_ascending(
        &self,
    ) -> Result<Vec<ValidatorRecord>, ValidatorDataError> {
        let (validators, pending, epoch) = tokio::join!(
            self.active_validators(),
            self.pending_partial_withdrawals(),
            self.current_epoch(),
        );

        let validators = validators?;
        let pending = pending?;
        let epoch = match epoch {
            Ok(epoch) => Some(epoch),
            Err(error) => {
                warn!(?error, "Current epoch unavailable, skipping activation age filter");
                None
            }
        };

        let joined = join_validators_with_pending_withdrawals(validators, &pending, epoch);
        debug!(
            joined = joined.len(),
            with_pending = joined.iter().filter(|v| v.pending_withdrawal_gwei > 0).count(),
            "Joined validators with pending withdrawals"
        );

        Ok(joined)
    }
}
