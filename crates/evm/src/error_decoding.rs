//! Contract error decoding utilities.
//!
//! Solidity `Error(string)` and `Panic(uint256)` reverts are turned into
//! readable reasons. Custom errors fall through as raw contract errors.

use alloy::sol_types::decode_revert_reason;
use tracing::debug;

use crate::EvmError;

/// Converts a contract error into an [`EvmError`], decoding the revert
/// reason when the error carries revert data.
pub fn decode_contract_error(err: alloy::contract::Error) -> EvmError {
    if let Some(revert_data) = err.as_revert_data() {
        if let Some(reason) = decode_revert_reason(revert_data.as_ref()) {
            return EvmError::DecodedRevert { reason };
        }
        debug!("Failed to decode revert data");
    }

    EvmError::Contract(err)
}
