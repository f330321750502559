use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use tracing::{debug, info};

use native_yield_evm::Wallet;

use super::{YieldManager, YieldManagerError, YieldProviderState, YieldReport};
use crate::beacon::WithdrawalRequestBatch;
use crate::bindings::{IDashboard, IStakingVault, IYieldManager, WithdrawalParams};

/// [`YieldManager`] backed by the deployed contract.
///
/// Reads go through the wallet's provider; writes are signed and
/// submitted by the wallet.
pub struct YieldManagerContractClient<W: Wallet> {
    wallet: W,
    address: Address,
    min_withdrawal_threshold_wei: U256,
}

impl<W: Wallet> YieldManagerContractClient<W> {
    pub fn new(wallet: W, address: Address, min_withdrawal_threshold_eth: u64) -> Self {
        Self {
            wallet,
            address,
            min_withdrawal_threshold_wei: U256::from(min_withdrawal_threshold_eth)
                * U256::from(super::WEI_PER_ETH),
        }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    fn instance(&self) -> IYieldManager::IYieldManagerInstance<W::Provider> {
        IYieldManager::new(self.address, self.wallet.provider().clone())
    }

    async fn submit(&self, calldata: Vec<u8>, note: &str) -> Result<TxHash, YieldManagerError> {
        debug!(note, "YieldManager write started");
        let receipt = self.wallet.send(self.address, Bytes::from(calldata), note).await?;
        info!(note, tx_hash = %receipt.transaction_hash, "YieldManager write succeeded");
        Ok(receipt.transaction_hash)
    }
}

#[async_trait]
impl<W: Wallet> YieldManager for YieldManagerContractClient<W> {
    fn min_withdrawal_threshold_wei(&self) -> U256 {
        self.min_withdrawal_threshold_wei
    }

    async fn l1_message_service_balance(&self) -> Result<U256, YieldManagerError> {
        let message_service = self.instance().L1_MESSAGE_SERVICE().call().await?;
        Ok(self.wallet.balance_of(message_service).await?)
    }

    async fn balance(&self) -> Result<U256, YieldManagerError> {
        Ok(self.wallet.balance_of(self.address).await?)
    }

    async fn total_system_balance(&self) -> Result<U256, YieldManagerError> {
        Ok(self.instance().getTotalSystemBalance().call().await?)
    }

    async fn effective_target_withdrawal_reserve(&self) -> Result<U256, YieldManagerError> {
        Ok(self.instance().getEffectiveTargetWithdrawalReserve().call().await?)
    }

    async fn target_reserve_deficit(&self) -> Result<U256, YieldManagerError> {
        Ok(self.instance().getTargetReserveDeficit().call().await?)
    }

    async fn user_funds(&self, yield_provider: Address) -> Result<U256, YieldManagerError> {
        Ok(self.instance().userFunds(yield_provider).call().await?)
    }

    async fn withdrawable_value(&self, yield_provider: Address) -> Result<U256, YieldManagerError> {
        // Non-view on chain; simulated from the signer.
        Ok(self
            .instance()
            .withdrawableValue(yield_provider)
            .from(self.wallet.address())
            .call()
            .await?)
    }

    async fn yield_provider_state(
        &self,
        yield_provider: Address,
    ) -> Result<YieldProviderState, YieldManagerError> {
        let data = self.instance().getYieldProviderData(yield_provider).call().await?;

        Ok(YieldProviderState {
            is_staking_paused: data.isStakingPaused,
            is_ossification_initiated: data.isOssificationInitiated,
            is_ossified: data.isOssified,
            dashboard: data.primaryEntrypoint,
            staking_vault: data.ossifiedEntrypoint,
            user_funds: data.userFunds,
            last_reported_negative_yield: data.lastReportedNegativeYield,
        })
    }

    async fn is_staking_paused(&self, yield_provider: Address) -> Result<bool, YieldManagerError> {
        Ok(self.instance().isStakingPaused(yield_provider).call().await?)
    }

    async fn dashboard_total_value(
        &self,
        yield_provider: Address,
    ) -> Result<U256, YieldManagerError> {
        let dashboard = self.yield_provider_state(yield_provider).await?.dashboard;
        let dashboard = IDashboard::new(dashboard, self.wallet.provider().clone());

        Ok(dashboard.totalValue().call().await?)
    }

    async fn peek_yield_report(
        &self,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Option<YieldReport> {
        let simulated = self
            .instance()
            .reportYield(yield_provider, l2_yield_recipient)
            .from(self.wallet.address())
            .call()
            .await;

        match simulated {
            Ok(report) => Some(YieldReport {
                yield_amount: report.newReportedYield,
                outstanding_negative_yield: report.outstandingNegativeYield,
                yield_provider,
            }),
            Err(error) => {
                debug!(?error, %yield_provider, %l2_yield_recipient, "peekYieldReport failed");
                None
            }
        }
    }

    async fn fund_yield_provider(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TxHash, YieldManagerError> {
        let calldata = IYieldManager::fundYieldProviderCall {
            _yieldProvider: yield_provider,
            _amount: amount,
        }
        .abi_encode();

        self.submit(calldata, "fundYieldProvider").await
    }

    async fn safe_add_to_withdrawal_reserve(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TxHash, YieldManagerError> {
        let calldata = IYieldManager::safeAddToWithdrawalReserveCall {
            _yieldProvider: yield_provider,
            _amount: amount,
        }
        .abi_encode();

        self.submit(calldata, "safeAddToWithdrawalReserve").await
    }

    async fn safe_withdraw_from_yield_provider(
        &self,
        yield_provider: Address,
        amount: U256,
    ) -> Result<TxHash, YieldManagerError> {
        let calldata = IYieldManager::safeWithdrawFromYieldProviderCall {
            _yieldProvider: yield_provider,
            _amount: amount,
        }
        .abi_encode();

        self.submit(calldata, "safeWithdrawFromYieldProvider").await
    }

    async fn pause_staking(&self, yield_provider: Address) -> Result<TxHash, YieldManagerError> {
        let calldata = IYieldManager::pauseStakingCall {
            _yieldProvider: yield_provider,
        }
        .abi_encode();

        self.submit(calldata, "pauseStaking").await
    }

    async fn unpause_staking(&self, yield_provider: Address) -> Result<TxHash, YieldManagerError> {
        let calldata = IYieldManager::unpauseStakingCall {
            _yieldProvider: yield_provider,
        }
        .abi_encode();

        self.submit(calldata, "unpauseStaking").await
    }

    async fn unstake(
        &self,
        yield_provider: Address,
        batch: &WithdrawalRequestBatch,
    ) -> Result<TxHash, YieldManagerError> {
        debug!(%yield_provider, validators = batch.len(), "unstake started");

        let staking_vault = self.staking_vault(yield_provider).await?;
        let fee = IStakingVault::new(staking_vault, self.wallet.provider().clone())
            .calculateValidatorWithdrawalFee(U256::from(batch.len()))
            .call()
            .await?;

        let calldata = unstake_calldata(yield_provider, batch, self.address);

        let receipt = self
            .wallet
            .send_payable(self.address, Bytes::from(calldata), fee, "unstake")
            .await?;

        info!(%yield_provider, %fee, tx_hash = %receipt.transaction_hash, "unstake succeeded");

        Ok(receipt.transaction_hash)
    }

    async fn report_yield(
        &self,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Result<TxHash, YieldManagerError> {
        let calldata = IYieldManager::reportYieldCall {
            _yieldProvider: yield_provider,
            _l2YieldRecipient: l2_yield_recipient,
        }
        .abi_encode();

        self.submit(calldata, "reportYield").await
    }
}

/// `unstake(provider, abi.encode(WithdrawalParams))`, refunding excess
/// fees to the YieldManager itself.
fn unstake_calldata(
    yield_provider: Address,
    batch: &WithdrawalRequestBatch,
    refund_recipient: Address,
) -> Vec<u8> {
    let params = WithdrawalParams {
        pubkeys: batch.pubkeys().to_vec(),
        amounts: batch.amounts_gwei().to_vec(),
        refundRecipient: refund_recipient,
    };

    IYieldManager::unstakeCall {
        _yieldProvider: yield_provider,
        _withdrawalParams: Bytes::from(params.abi_encode()),
    }
    .abi_encode()
}
