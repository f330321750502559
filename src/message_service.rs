//! L1 message service: holds the reserve and releases surplus to the
//! YieldManager.

use alloy::primitives::{Address, Bytes, TxHash, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use tracing::info;

use native_yield_evm::{EvmError, Wallet};

use crate::bindings::ILineaRollupYieldExtension;

#[derive(Debug, thiserror::Error)]
pub enum MessageServiceError {
    #[error(transparent)]
    Evm(#[from] EvmError),
}

#[async_trait]
pub trait MessageService: Send + Sync {
    /// Moves `amount` from the reserve to the YieldManager.
    async fn transfer_funds_for_native_yield(&self, amount: U256)
    -> Result<TxHash, MessageServiceError>;

    /// Current reserve balance.
    async fn balance(&self) -> Result<U256, MessageServiceError>;
}

pub struct MessageServiceContractClient<W: Wallet> {
    wallet: W,
    address: Address,
}

impl<W: Wallet> MessageServiceContractClient<W> {
    pub fn new(wallet: W, address: Address) -> Self {
        Self { wallet, address }
    }
}

fn transfer_calldata(amount: U256) -> Bytes {
    Bytes::from(ILineaRollupYieldExtension::transferFundsForNativeYieldCall { _amount: amount }.abi_encode())
}

#[async_trait]
impl<W: Wallet> MessageService for MessageServiceContractClient<W> {
    async fn transfer_funds_for_native_yield(
        &self,
        amount: U256,
    ) -> Result<TxHash, MessageServiceError> {
        let receipt = self
            .wallet
            .send(self.address, transfer_calldata(amount), "transferFundsForNativeYield")
            .await?;

        info!(%amount, tx_hash = %receipt.transaction_hash, "Transferred reserve funds for native yield");

        Ok(receipt.transaction_hash)
    }

    async fn balance(&self) -> Result<U256, MessageServiceError> {
        Ok(self.wallet.balance_of(self.address).await?)
    }
}
