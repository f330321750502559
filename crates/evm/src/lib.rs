//! EVM chain interaction abstraction.
//!
//! This crate provides two traits for interacting with EVM chains:
//!
//! - [`Evm`]: read-only chain access. Provides the underlying provider
//!   and a `call` method that decodes `Error(string)` revert reasons.
//!
//! - [`Wallet`]: extends `Evm` with a signing identity and
//!   transaction submission, including value-carrying calls needed to
//!   pay beacon-chain withdrawal fees.
//!
//! [`LocalSignerWallet`](local::LocalSignerWallet) signs with a raw
//! private key held by the process.

use std::sync::Arc;

use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::rpc::types::TransactionReceipt;
use async_trait::async_trait;

pub mod error_decoding;

#[cfg(feature = "local-signer")]
pub mod local;

/// Errors that can occur during EVM operations.
#[derive(Debug, thiserror::Error)]
pub enum EvmError {
    #[error("transaction error: {0}")]
    Transaction(#[from] alloy::providers::PendingTransactionError),
    #[error("transport error: {0}")]
    Transport(#[from] alloy::transports::RpcError<alloy::transports::TransportErrorKind>),
    #[error("contract error: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("execution reverted: {reason}")]
    DecodedRevert { reason: String },
    #[error("transaction reverted: {tx_hash}")]
    Reverted { tx_hash: alloy::primitives::TxHash },
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[from] alloy::signers::k256::ecdsa::Error),
}

/// Read-only EVM chain access with revert-decoded view calls.
///
/// Implementations only need to supply the provider; `call` has a
/// default implementation that handles revert decoding.
#[async_trait]
pub trait Evm: Send + Sync + 'static {
    /// The provider type used for chain access.
    type Provider: Provider + Clone + Send + Sync;

    /// Returns the underlying provider for direct chain queries.
    fn provider(&self) -> &Self::Provider;

    /// Execute a view call, decoding a string revert reason on failure.
    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError> {
        let tx = alloy::rpc::types::TransactionRequest::default()
            .to(contract)
            .input(calldata.into());

        match self.provider().call(tx).await {
            Ok(result) => Ok(result),
            Err(rpc_err) => Err(error_decoding::decode_contract_error(
                alloy::contract::Error::TransportError(rpc_err),
            )),
        }
    }

    /// Native balance of `address` at the latest block.
    async fn balance_of(&self, address: Address) -> Result<U256, EvmError> {
        Ok(self.provider().get_balance(address).await?)
    }
}

/// Signing wallet on an EVM chain.
///
/// `send` and `send_payable` submit a signed transaction and wait for
/// a receipt with the implementation's confirmation depth.
#[async_trait]
pub trait Wallet: Evm {
    /// Returns the address this wallet signs transactions from.
    fn address(&self) -> Address;

    /// Submit a signed contract call carrying `value` wei.
    ///
    /// - `contract`: target contract address
    /// - `calldata`: ABI-encoded function call
    /// - `value`: native value attached to the call
    /// - `note`: human-readable operation description used for logging
    async fn send_payable(
        &self,
        contract: Address,
        calldata: Bytes,
        value: U256,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError>;

    /// Submit a signed contract call without value.
    async fn send(
        &self,
        contract: Address,
        calldata: Bytes,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError> {
        self.send_payable(contract, calldata, U256::ZERO, note).await
    }
}

#[async_trait]
impl<T: Evm> Evm for Arc<T> {
    type Provider = T::Provider;

    fn provider(&self) -> &Self::Provider {
        (**self).provider()
    }

    async fn call(&self, contract: Address, calldata: Bytes) -> Result<Bytes, EvmError> {
        (**self).call(contract, calldata).await
    }
}

#[async_trait]
impl<T: Wallet> Wallet for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn send_payable(
        &self,
        contract: Address,
        calldata: Bytes,
        value: U256,
        note: &str,
    ) -> Result<TransactionReceipt, EvmError> {
        (**self).send_payable(contract, calldata, value, note).await
    }
}
