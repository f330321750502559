use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use alloy::primitives::{TxHash, U256};
use async_trait::async_trait;
use reqwest::StatusCode;

use super::validators::{ValidatorDataError, ValidatorDataSource};
use super::{BeaconStakingError, InvalidBatch, MaxWithdrawalOutcome, ValidatorRecord, WithdrawalRequester};

/// Serves a fixed validator list, or fails every fetch.
pub(crate) struct MockValidatorSource {
    validators: Option<Vec<ValidatorRecord>>,
}

impl MockValidatorSource {
    pub(crate) fn with_validators(validators: Vec<ValidatorRecord>) -> Self {
        Self {
            validators: Some(validators),
        }
    }

    pub(crate) fn failing() -> Self {
        Self { validators: None }
    }
}

#[async_trait]
impl ValidatorDataSource for MockValidatorSource {
    async fn validators_for_withdrawal_requests_ascending(
        &self,
    ) -> Result<Vec<ValidatorRecord>, ValidatorDataError> {
        self.validators.clone().ok_or_else(|| ValidatorDataError::Api {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: "mock validator source unavailable".to_string(),
        })
    }
}

/// Records requested amounts in place of submitting withdrawal requests.
#[derive(Default)]
pub(crate) struct MockStakingSubmitter {
    requested: Mutex<Vec<U256>>,
    fail: AtomicBool,
}

impl MockStakingSubmitter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn requested(&self) -> Vec<U256> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl WithdrawalRequester for MockStakingSubmitter {
    async fn submit_withdrawal_requests_to_fulfil_amount(
        &self,
        amount_wei: U256,
    ) -> Result<Option<TxHash>, BeaconStakingError> {
        self.requested.lock().unwrap().push(amount_wei);

        if self.fail.load(Ordering::SeqCst) {
            return Err(InvalidBatch::Empty.into());
        }

        Ok(Some(TxHash::with_last_byte(0xcc)))
    }

    async fn submit_max_available_withdrawal_requests(
        &self,
    ) -> Result<MaxWithdrawalOutcome, BeaconStakingError> {
        Ok(MaxWithdrawalOutcome::default())
    }
}
