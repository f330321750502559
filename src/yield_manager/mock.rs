//! Mock implementation of the YieldManager trait for testing.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;

use native_yield_evm::EvmError;

use super::{YieldManager, YieldManagerError, YieldProviderState, YieldReport};
use crate::beacon::WithdrawalRequestBatch;

/// Values returned by the mock's read methods.
#[derive(Debug, Clone, Default)]
pub(crate) struct Reads {
    pub(crate) reserve_balance: U256,
    pub(crate) yield_manager_balance: U256,
    pub(crate) total_system_balance: U256,
    pub(crate) target_reserve: U256,
    pub(crate) target_reserve_deficit: U256,
    pub(crate) user_funds: U256,
    pub(crate) withdrawable_value: U256,
    pub(crate) dashboard_total_value: U256,
    pub(crate) provider_state: YieldProviderState,
    pub(crate) peeked: Option<YieldReport>,
}

/// A write captured by the mock, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WriteCall {
    FundYieldProvider(U256),
    SafeAddToWithdrawalReserve(U256),
    SafeWithdrawFromYieldProvider(U256),
    PauseStaking,
    UnpauseStaking,
    Unstake(WithdrawalRequestBatch),
    ReportYield,
}

impl WriteCall {
    fn name(&self) -> &'static str {
        match self {
            Self::FundYieldProvider(_) => "fund_yield_provider",
            Self::SafeAddToWithdrawalReserve(_) => "safe_add_to_withdrawal_reserve",
            Self::SafeWithdrawFromYieldProvider(_) => "safe_withdraw_from_yield_provider",
            Self::PauseStaking => "pause_staking",
            Self::UnpauseStaking => "unpause_staking",
            Self::Unstake(_) => "unstake",
            Self::ReportYield => "report_yield",
        }
    }
}

pub(crate) fn mock_failure(what: &str) -> YieldManagerError {
    YieldManagerError::Evm(EvmError::DecodedRevert {
        reason: format!("mock failure: {what}"),
    })
}

/// Mock YieldManager with settable reads, optional per-call reserve
/// balances, and per-write failure toggles.
pub(crate) struct MockYieldManager {
    reads: Mutex<Reads>,
    reserve_script: Mutex<VecDeque<U256>>,
    writes: Mutex<Vec<WriteCall>>,
    failing_writes: Mutex<HashSet<&'static str>>,
    fail_reads: AtomicBool,
    peek_count: AtomicUsize,
    min_withdrawal_threshold_wei: U256,
}

impl MockYieldManager {
    /// Creates a mock that returns zeroed reads and succeeds on all writes.
    pub(crate) fn new() -> Self {
        Self {
            reads: Mutex::new(Reads::default()),
            reserve_script: Mutex::new(VecDeque::new()),
            writes: Mutex::new(Vec::new()),
            failing_writes: Mutex::new(HashSet::new()),
            fail_reads: AtomicBool::new(false),
            peek_count: AtomicUsize::new(0),
            min_withdrawal_threshold_wei: U256::ZERO,
        }
    }

    pub(crate) fn with_min_withdrawal_threshold(mut self, threshold: U256) -> Self {
        self.min_withdrawal_threshold_wei = threshold;
        self
    }

    pub(crate) fn set_reads(&self, update: impl FnOnce(&mut Reads)) {
        update(&mut self.reads.lock().unwrap());
    }

    /// Successive `l1_message_service_balance` calls return these values
    /// in order before falling back to `Reads::reserve_balance`.
    pub(crate) fn script_reserve_balances(&self, balances: impl IntoIterator<Item = U256>) {
        self.reserve_script.lock().unwrap().extend(balances);
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_write(&self, name: &'static str) {
        self.failing_writes.lock().unwrap().insert(name);
    }

    pub(crate) fn writes(&self) -> Vec<WriteCall> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn peek_calls(&self) -> usize {
        self.peek_count.load(Ordering::SeqCst)
    }

    fn read<T>(&self, get: impl FnOnce(&Reads) -> T) -> Result<T, YieldManagerError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(mock_failure("read"));
        }

        Ok(get(&self.reads.lock().unwrap()))
    }

    fn write(&self, call: WriteCall) -> Result<TxHash, YieldManagerError> {
        let name = call.name();

        match &call {
            WriteCall::PauseStaking => {
                self.reads.lock().unwrap().provider_state.is_staking_paused = true;
            }
            WriteCall::UnpauseStaking => {
                self.reads.lock().unwrap().provider_state.is_staking_paused = false;
            }
            _ => {}
        }

        let index = {
            let mut writes = self.writes.lock().unwrap();
            writes.push(call);
            writes.len()
        };

        if self.failing_writes.lock().unwrap().contains(name) {
            return Err(mock_failure(name));
        }

        Ok(TxHash::with_last_byte(u8::try_from(index).unwrap_or(u8::MAX)))
    }
}

#[async_trait]
impl YieldManager for MockYieldManager {
    fn min_withdrawal_threshold_wei(&self) -> U256 {
        self.min_withdrawal_threshold_wei
    }

    async fn l1_message_service_balance(&self) -> Result<U256, YieldManagerError> {
        let scripted = self.reserve_script.lock().unwrap().pop_front();
        match scripted {
            Some(balance) => self.read(|_| balance),
            None => self.read(|reads| reads.reserve_balance),
        }
    }

    async fn balance(&self) -> Result<U256, YieldManagerError> {
        self.read(|reads| reads.yield_manager_balance)
    }

    async fn total_system_balance(&self) -> Result<U256, YieldManagerError> {
        self.read(|reads| reads.total_system_balance)
    }

    async fn effective_target_withdrawal_reserve(&self) -> Result<U256, YieldManagerError> {
        self.read(|reads| reads.target_reserve)
    }

    async fn target_reserve_deficit(&self) -> Result<U256, YieldManagerError> {
        self.read(|reads| reads.target_reserve_deficit)
    }

    async fn user_funds(&self, _yield_provider: Address) -> Result<U256, YieldManagerError> {
        self.read(|reads| reads.user_funds)
    }

    async fn withdrawable_value(&self, _yield_provider: Address) -> Result<U256, YieldManagerError> {
        self.read(|reads| reads.withdrawable_value)
    }

    async fn yield_provider_state(
        &self,
        _yield_provider: Address,
    ) -> Result<YieldProviderState, YieldManagerError> {
        self.read(|reads| reads.provider_state)
    }

    async fn dashboard_total_value(
        &self,
        _yield_provider: Address,
    ) -> Result<U256, YieldManagerError> {
        self.read(|reads| reads.dashboard_total_value)
    }

    async fn peek_yield_report(
        &self,
        _yield_provider: Address,
        _l2_yield_recipient: Address,
    ) -> Option<YieldReport> {
        self.peek_count.fetch_add(1, Ordering::SeqCst);
        self.read(|reads| reads.peeked).ok().flatten()
    }

    async fn fund_yield_provider(
        &self,
        _yield_provider: Address,
        amount: U256,
    ) -> Result<TxHash, YieldManagerError> {
        self.write(WriteCall::FundYieldProvider(amount))
    }

    async fn safe_add_to_withdrawal_reserve(
        &self,
        _yield_provider: Address,
        amount: U256,
    ) -> Result<TxHash, YieldManagerError> {
        self.write(WriteCall::SafeAddToWithdrawalReserve(amount))
    }

    async fn safe_withdraw_from_yield_provider(
        &self,
        _yield_provider: Address,
        amount: U256,
    ) -> Result<TxHash, YieldManagerError> {
        self.write(WriteCall::SafeWithdrawFromYieldProvider(amount))
    }

    async fn pause_staking(&self, _yield_provider: Address) -> Result<TxHash, YieldManagerError> {
        self.write(WriteCall::PauseStaking)
    }

    async fn unpause_staking(&self, _yield_provider: Address) -> Result<TxHash, YieldManagerError> {
        self.write(WriteCall::UnpauseStaking)
    }

    async fn unstake(
        &self,
        _yield_provider: Address,
        batch: &WithdrawalRequestBatch,
    ) -> Result<TxHash, YieldManagerError> {
        self.write(WriteCall::Unstake(batch.clone()))
    }

    async fn report_yield(
        &self,
        _yield_provider: Address,
        _l2_yield_recipient: Address,
    ) -> Result<TxHash, YieldManagerError> {
        self.write(WriteCall::ReportYield)
    }
}
