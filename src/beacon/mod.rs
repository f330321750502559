//! Beacon-chain withdrawal request batching.
//!
//! Two modes share one per-transaction validator budget: amount-driven
//! partial withdrawals (skimming balance above the activation floor) and
//! full exits of validators sitting exactly at the floor.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, TxHash, U256, hex};
use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use crate::metrics::{YieldMetrics, gwei_to_wei, wei_to_gwei};
use crate::yield_manager::{YieldManager, YieldManagerError};

pub mod validators;
#[cfg(test)]
pub(crate) mod mock;

pub use validators::{HttpValidatorDataSource, ValidatorDataError, ValidatorDataSource};

/// 32 ETH in gwei; the effective balance of a validator with nothing to skim.
pub const MINIMUM_ACTIVATION_BALANCE_GWEI: u64 = 32_000_000_000;

const GWEI_PER_ETH: u64 = 1_000_000_000;

/// A validator's withdrawal-relevant state, recomputed on every fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorRecord {
    pub public_key: Bytes,
    pub validator_index: u64,
    pub balance_gwei: u64,
    pub effective_balance_gwei: u64,
    pub pending_withdrawal_gwei: u64,
    /// `balance - pending - 32 ETH`, floored at zero.
    pub withdrawable_gwei: u64,
}

impl ValidatorRecord {
    pub fn withdrawable_after(balance_gwei: u64, pending_withdrawal_gwei: u64) -> u64 {
        balance_gwei
            .saturating_sub(pending_withdrawal_gwei)
            .saturating_sub(MINIMUM_ACTIVATION_BALANCE_GWEI)
    }

    fn pubkey_label(&self) -> String {
        hex::encode_prefixed(&self.public_key)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InvalidBatch {
    #[error("withdrawal batch has no validators")]
    Empty,
    #[error("partial withdrawal batch has {pubkeys} pubkeys but {amounts} amounts")]
    LengthMismatch { pubkeys: usize, amounts: usize },
}

/// Pubkeys plus per-validator gwei amounts for partial withdrawals, or
/// pubkeys with no amounts for full exits. The two never mix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalRequestBatch {
    pubkeys: Vec<Bytes>,
    amounts_gwei: Vec<u64>,
}

impl WithdrawalRequestBatch {
    pub fn partial(pubkeys: Vec<Bytes>, amounts_gwei: Vec<u64>) -> Result<Self, InvalidBatch> {
        if pubkeys.is_empty() {
            return Err(InvalidBatch::Empty);
        }

        if pubkeys.len() != amounts_gwei.len() {
            return Err(InvalidBatch::LengthMismatch {
                pubkeys: pubkeys.len(),
                amounts: amounts_gwei.len(),
            });
        }

        Ok(Self {
            pubkeys,
            amounts_gwei,
        })
    }

    pub fn full_exit(pubkeys: Vec<Bytes>) -> Result<Self, InvalidBatch> {
        if pubkeys.is_empty() {
            return Err(InvalidBatch::Empty);
        }

        Ok(Self {
            pubkeys,
            amounts_gwei: Vec::new(),
        })
    }

    pub fn pubkeys(&self) -> &[Bytes] {
        &self.pubkeys
    }

    pub fn amounts_gwei(&self) -> &[u64] {
        &self.amounts_gwei
    }

    pub fn is_full_exit(&self) -> bool {
        self.amounts_gwei.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pubkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pubkeys.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BeaconStakingError {
    #[error(transparent)]
    YieldManager(#[from] YieldManagerError),
    #[error(transparent)]
    InvalidBatch(#[from] InvalidBatch),
}

/// Batches submitted by [`WithdrawalRequester::submit_max_available_withdrawal_requests`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaxWithdrawalOutcome {
    pub partial_tx: Option<TxHash>,
    pub exit_tx: Option<TxHash>,
}

#[async_trait]
pub trait WithdrawalRequester: Send + Sync {
    /// Requests partial withdrawals covering `amount_wei`, net of
    /// withdrawals already pending. `None` when nothing was submitted.
    async fn submit_withdrawal_requests_to_fulfil_amount(
        &self,
        amount_wei: U256,
    ) -> Result<Option<TxHash>, BeaconStakingError>;

    /// Requests every available partial withdrawal, then fills the
    /// remaining validator slots with full exits.
    async fn submit_max_available_withdrawal_requests(
        &self,
    ) -> Result<MaxWithdrawalOutcome, BeaconStakingError>;
}

struct PartialAllocation {
    pubkeys: Vec<Bytes>,
    amounts_gwei: Vec<u64>,
    indices: Vec<usize>,
}

/// Greedy walk over `validators`, taking `min(withdrawable, remaining)`
/// from each until `remaining` or `slots` runs out.
fn allocate_partial(
    validators: &[ValidatorRecord],
    amount_gwei: u64,
    slots: usize,
    min_threshold_gwei: u64,
) -> PartialAllocation {
    let mut allocation = PartialAllocation {
        pubkeys: Vec::new(),
        amounts_gwei: Vec::new(),
        indices: Vec::new(),
    };
    let mut remaining = amount_gwei;

    for (index, validator) in validators.iter().enumerate() {
        if allocation.pubkeys.len() >= slots || remaining == 0 {
            break;
        }

        let take = validator.withdrawable_gwei.min(remaining);
        if take == 0 || take < min_threshold_gwei {
            continue;
        }

        allocation.pubkeys.push(validator.public_key.clone());
        allocation.amounts_gwei.push(take);
        allocation.indices.push(index);
        remaining -= take;
    }

    allocation
}

/// Validators eligible for a full exit, skipping `exclude` and anything
/// with a pending withdrawal. Skipped validators do not consume slots.
fn select_exits(validators: &[ValidatorRecord], slots: usize, exclude: &[usize]) -> Vec<Bytes> {
    let mut selected = Vec::new();

    for (index, validator) in validators.iter().enumerate() {
        if selected.len() >= slots {
            break;
        }

        if exclude.contains(&index) {
            continue;
        }

        if validator.pending_withdrawal_gwei > 0 {
            debug!(
                pubkey = %validator.pubkey_label(),
                pending_withdrawal_gwei = validator.pending_withdrawal_gwei,
                "Skipping exit for validator with pending withdrawal"
            );
            continue;
        }

        if validator.effective_balance_gwei == MINIMUM_ACTIVATION_BALANCE_GWEI {
            selected.push(validator.public_key.clone());
        }
    }

    selected
}

pub struct BeaconChainStakingClient<V, Y, M> {
    validators: V,
    yield_manager: Arc<Y>,
    metrics: M,
    yield_provider: Address,
    max_validators_per_transaction: usize,
    min_withdrawal_threshold_gwei: u64,
}

impl<V, Y, M> BeaconChainStakingClient<V, Y, M>
where
    V: ValidatorDataSource,
    Y: YieldManager,
    M: YieldMetrics,
{
    pub fn new(
        validators: V,
        yield_manager: Arc<Y>,
        metrics: M,
        yield_provider: Address,
        max_validators_per_transaction: usize,
        min_withdrawal_threshold_eth: u64,
    ) -> Self {
        Self {
            validators,
            yield_manager,
            metrics,
            yield_provider,
            max_validators_per_transaction,
            min_withdrawal_threshold_gwei: min_withdrawal_threshold_eth.saturating_mul(GWEI_PER_ETH),
        }
    }

    /// Unavailable validator data degrades to an empty list.
    async fn fetch_validators(&self) -> Vec<ValidatorRecord> {
        match self.validators.validators_for_withdrawal_requests_ascending().await {
            Ok(validators) => validators,
            Err(error) => {
                error!(?error, "Failed to fetch validators, treating as no usable data");
                Vec::new()
            }
        }
    }

    async fn submit_partial(
        &self,
        validators: &[ValidatorRecord],
        allocation: &PartialAllocation,
    ) -> Result<Option<TxHash>, BeaconStakingError> {
        if allocation.pubkeys.is_empty() {
            return Ok(None);
        }

        let batch =
            WithdrawalRequestBatch::partial(allocation.pubkeys.clone(), allocation.amounts_gwei.clone())?;
        let tx = self.yield_manager.unstake(self.yield_provider, &batch).await?;

        for (&index, &amount) in allocation.indices.iter().zip(&allocation.amounts_gwei) {
            self.metrics
                .add_validator_partial_unstake_amount(&validators[index].pubkey_label(), amount);
        }

        info!(
            %tx,
            validators = batch.len(),
            total_gwei = allocation.amounts_gwei.iter().sum::<u64>(),
            "Submitted partial withdrawal requests"
        );

        Ok(Some(tx))
    }
}

#[async_trait]
impl<V, Y, M> WithdrawalRequester for BeaconChainStakingClient<V, Y, M>
where
    V: ValidatorDataSource,
    Y: YieldManager + 'static,
    M: YieldMetrics,
{
    #[instrument(skip_all, fields(%amount_wei))]
    async fn submit_withdrawal_requests_to_fulfil_amount(
        &self,
        amount_wei: U256,
    ) -> Result<Option<TxHash>, BeaconStakingError> {
        let validators = self.fetch_validators().await;
        let pending_wei = self.validators.total_pending_partial_withdrawals_wei(&validators);
        self.metrics
            .set_last_total_pending_partial_withdrawals_gwei(wei_to_gwei(pending_wei));

        let remaining_wei = amount_wei.saturating_sub(pending_wei);
        let remaining_gwei = wei_to_gwei(remaining_wei);

        if remaining_gwei == 0 {
            info!(%pending_wei, "Pending withdrawals already cover the requested amount");
            return Ok(None);
        }

        let allocation = allocate_partial(
            &validators,
            remaining_gwei,
            self.max_validators_per_transaction,
            self.min_withdrawal_threshold_gwei,
        );

        let allocated: u64 = allocation.amounts_gwei.iter().sum();
        if allocated < remaining_gwei {
            warn!(
                requested_gwei = remaining_gwei,
                allocated_gwei = allocated,
                "Withdrawable validator balance does not cover the requested amount"
            );
        }

        self.submit_partial(&validators, &allocation).await
    }

    #[instrument(skip_all)]
    async fn submit_max_available_withdrawal_requests(
        &self,
    ) -> Result<MaxWithdrawalOutcome, BeaconStakingError> {
        let validators = self.fetch_validators().await;

        let allocation = allocate_partial(
            &validators,
            u64::MAX,
            self.max_validators_per_transaction,
            self.min_withdrawal_threshold_gwei,
        );
        let partial_tx = self.submit_partial(&validators, &allocation).await?;

        let remaining_slots = self
            .max_validators_per_transaction
            .saturating_sub(allocation.pubkeys.len());

        let exits = select_exits(&validators, remaining_slots, &allocation.indices);
        if exits.is_empty() {
            debug!(remaining_slots, "No validators eligible for full exit");
            return Ok(MaxWithdrawalOutcome {
                partial_tx,
                exit_tx: None,
            });
        }

        let batch = WithdrawalRequestBatch::full_exit(exits)?;
        let exit_tx = self.yield_manager.unstake(self.yield_provider, &batch).await?;

        for pubkey in batch.pubkeys() {
            self.metrics
                .increment_validator_exit(&hex::encode_prefixed(pubkey));
        }

        info!(%exit_tx, validators = batch.len(), "Submitted full exit requests");

        Ok(MaxWithdrawalOutcome {
            partial_tx,
            exit_tx: Some(exit_tx),
        })
    }
}

/// Sum of pending partial withdrawals across `validators`, in wei.
pub fn total_pending_partial_withdrawals_wei(validators: &[ValidatorRecord]) -> U256 {
    validators
        .iter()
        .map(|validator| gwei_to_wei(validator.pending_withdrawal_gwei))
        .fold(U256::ZERO, |acc, pending| acc + pending)
}
