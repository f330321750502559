//! YieldManager access: the reads the rebalance calculator needs, the
//! writes each cycle step performs, and the idempotent composites built
//! on top of them.

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use tracing::{debug, info};

use native_yield_evm::EvmError;

use crate::beacon::WithdrawalRequestBatch;

mod contract;
#[cfg(test)]
pub(crate) mod mock;

pub use contract::YieldManagerContractClient;

pub(crate) const WEI_PER_ETH: u64 = 1_000_000_000_000_000_000;

#[derive(Debug, thiserror::Error)]
pub enum YieldManagerError {
    #[error(transparent)]
    Evm(#[from] EvmError),
    #[error("contract call failed: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("failed to encode withdrawal params: {0}")]
    Encoding(#[from] alloy::sol_types::Error),
}

/// Simulated (non-committing) outcome of `reportYield`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YieldReport {
    pub yield_amount: U256,
    pub outstanding_negative_yield: U256,
    pub yield_provider: Address,
}

impl YieldReport {
    pub(crate) const fn empty(yield_provider: Address) -> Self {
        Self {
            yield_amount: U256::ZERO,
            outstanding_negative_yield: U256::ZERO,
            yield_provider,
        }
    }
}

/// A submitted withdrawal reserve top-up and the amount actually moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReserveTopUp {
    pub tx: TxHash,
    pub amount: U256,
}

/// The subset of on-chain yield provider state the controller reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct YieldProviderState {
    pub is_staking_paused: bool,
    pub is_ossification_initiated: bool,
    pub is_ossified: bool,
    pub dashboard: Address,
    pub staking_vault: Address,
    pub user_funds: U256,
    pub last_reported_negative_yield: U256,
}

#[async_trait]
pub trait YieldManager: Send + Sync {
    /// Minimum balance worth moving into the withdrawal reserve.
    fn min_withdrawal_threshold_wei(&self) -> U256;

    /// ETH held by the L1 message service (the reserve).
    async fn l1_message_service_balance(&self) -> Result<U256, YieldManagerError>;

    /// ETH held by the YieldManager itself.
    async fn balance(&self) -> Result<U256, YieldManagerError>;

    async fn total_system_balance(&self) -> Result<U256, YieldManagerError>;

    async fn effective_target_withdrawal_reserve(&self) -> Result<U256, YieldManagerError>;

    async fn target_reserve_deficit(&self) -> Result<U256, YieldManagerError>;

    async fn user_funds(&self, yield_provider: Address) -> Result<U256, YieldManagerError>;

    async fn withdrawable_value(&self, yield_provider: Address) -> Result<U256, YieldManagerError>;

    async fn yield_provider_state(
        &self,
        yield_provider: Address,
    ) -> Result<YieldProviderState, YieldManagerError>;

    /// Total value reported by the provider's dashboard.
    async fn dashboard_total_value(&self, yield_provider: Address)
    -> Result<U256, YieldManagerError>;

    /// Simulates `reportYield`; `None` when the simulation fails.
    async fn peek_yield_report(
        &self,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Option<YieldReport>;

    async fn fund_yield_provider(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TxHash, YieldManagerError>;

    async fn safe_add_to_withdrawal_reserve(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TxHash, YieldManagerError>;

    async fn safe_withdraw_from_yield_provider(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TxHash, YieldManagerError>;

    async fn pause_staking(&self, yield_provider: Address) -> Result<TxHash, YieldManagerError>;

    async fn unpause_staking(&self, yield_provider: Address) -> Result<TxHash, YieldManagerError>;

    async fn unstake(
        &self,
        yield_provider: Address,
        batch: &WithdrawalRequestBatch,
    ) -> Result<TxHash, YieldManagerError>;

    async fn report_yield(
        &self,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Result<TxHash, YieldManagerError>;

    async fn staking_vault(&self, yield_provider: Address) -> Result<Address, YieldManagerError> {
        Ok(self.yield_provider_state(yield_provider).await?.staking_vault)
    }

    async fn is_staking_paused(&self, yield_provider: Address) -> Result<bool, YieldManagerError> {
        Ok(self.yield_provider_state(yield_provider).await?.is_staking_paused)
    }

    /// YieldManager balance plus what the provider can release right now.
    async fn available_unstaking_rebalance_balance(
        &self,
        yield_provider: Address,
    ) -> Result<U256, YieldManagerError> {
        let (balance, withdrawable) =
            tokio::try_join!(self.balance(), self.withdrawable_value(yield_provider))?;

        Ok(balance.saturating_add(withdrawable))
    }

    async fn pause_staking_if_not_already(
        &self,
        yield_provider: Address,
    ) -> Result<Option<TxHash>, YieldManagerError> {
        if self.is_staking_paused(yield_provider).await? {
            info!(%yield_provider, "Already paused staking, skipping");
            return Ok(None);
        }

        self.pause_staking(yield_provider).await.map(Some)
    }

    async fn unpause_staking_if_not_already(
        &self,
        yield_provider: Address,
    ) -> Result<Option<TxHash>, YieldManagerError> {
        if !self.is_staking_paused(yield_provider).await? {
            info!(%yield_provider, "Already resumed staking, skipping");
            return Ok(None);
        }

        self.unpause_staking(yield_provider).await.map(Some)
    }

    /// Tops up the withdrawal reserve by at most `amount`, bounded by what
    /// is available. Skips when the available balance is under the
    /// minimum withdrawal threshold.
    async fn safe_add_to_withdrawal_reserve_if_above_threshold(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<Option<ReserveTopUp>, YieldManagerError> {
        let available = self.available_unstaking_rebalance_balance(yield_provider).await?;
        let threshold = self.min_withdrawal_threshold_wei();

        if available < threshold {
            debug!(
                %yield_provider,
                %available,
                %threshold,
                "Available unstaking balance below threshold, skipping withdrawal reserve top-up"
            );
            return Ok(None);
        }

        let amount = amount.min(available);
        let tx = self.safe_add_to_withdrawal_reserve(yield_provider, amount).await?;

        Ok(Some(ReserveTopUp { tx, amount }))
    }

    /// Moves everything available into the withdrawal reserve.
    async fn safe_max_add_to_withdrawal_reserve(
        &self,
        yield_provider: Address,
    ) -> Result<Option<TxHash>, YieldManagerError> {
        let available = self.available_unstaking_rebalance_balance(yield_provider).await?;
        let threshold = self.min_withdrawal_threshold_wei();

        if available.is_zero() || available < threshold {
            debug!(%yield_provider, %available, "Nothing to add to withdrawal reserve");
            return Ok(None);
        }

        self.safe_add_to_withdrawal_reserve(yield_provider, available)
            .await
            .map(Some)
    }
}
