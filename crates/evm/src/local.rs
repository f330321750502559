//! Local signer implementation.
//!
//! `LocalSignerWallet` wraps an alloy provider with an embedded
//! `EthereumWallet` and submits transactions directly. Only compiled
//! when the `local-signer` feature is enabled.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder, WalletProvider};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use tracing::info;
use url::Url;

use crate::error_decoding::decode_contract_error;
use crate::{Evm, EvmError, Wallet};

/// Local wallet that signs and submits transactions directly.
///
/// Wraps a provider that includes a wallet filler. The wallet address
/// is derived from the provider's default signer.
pub struct LocalSignerWallet<P> {
    provider: P,
    required_confirmations: u64,
}

impl<P> LocalSignerWallet<P> {
    pub fn new(provider: P, required_confirmations: u64) -> Self {
        Self {
            provider,
            required_confirmations,
        }
    }
}

/// Builds an HTTP provider signing with `private_key` and wraps it.
///
/// No connection is made until the first request.
pub fn connect_http(
    rpc_url: Url,
    private_key: &B256,
    required_confirmations: u64,
) -> Result<LocalSignerWallet<impl Provider + WalletProvider + Clone + 'static>, EvmError> {
    let signer = PrivateKeySigner::from_bytes(private_key)?;
    let wallet = EthereumWallet::from(signer);

    let provider = ProviderBuilder::new().wallet(wallet).connect_http(rpc_url);

    Ok(LocalSignerWallet::new(provider, required_confirmations))
}

#[async_trait]
impl<P> Evm for LocalSignerWallet<P>
where
    P: Provider + WalletProvider + Clone + Send + Sync + 'static,
{
    type Provider = P;

    fn provider(&self) -> &P {
        &self.provider
    }
}

#[async_trait]
impl<P> Wallet for LocalSignerWallet<P>
where
    P: Provider + WalletProvider + Clone + Send + Sync + 'static,
{
    fn address(&self) -> Address {
        self.provider.default_signer_address()
    }

    async fn send_payable(
        &self,
        contract: Address,
        calldata: Bytes,
        value: U256,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError> {
        info!(%contract, %value, note, "Submitting contract call");

        let tx = alloy::rpc::types::TransactionRequest::default()
            .to(contract)
            .value(value)
            .input(calldata.into());

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|error| {
                decode_contract_error(alloy::contract::Error::TransportError(error))
            })?;

        info!(tx_hash = %pending.tx_hash(), note, "Transaction submitted");

        let receipt = pending
            .with_required_confirmations(self.required_confirmations)
            .get_receipt()
            .await?;

        if !receipt.status() {
            return Err(EvmError::Reverted {
                tx_hash: receipt.transaction_hash,
            });
        }

        info!(tx_hash = %receipt.transaction_hash, note, "Transaction confirmed");

        Ok(receipt)
    }
}
