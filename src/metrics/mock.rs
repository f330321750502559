//! Recording implementation of [`YieldMetrics`] for tests.

use std::sync::Mutex;

use alloy::primitives::Address;

use super::YieldMetrics;
use crate::rebalance::RebalanceDirection;

/// One call made against [`RecordingMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MetricEvent {
    Rebalance(RebalanceDirection, u64),
    QuotaExceeded(Address),
    ActualRequirement(RebalanceDirection, u64),
    ReportedRequirement(RebalanceDirection, u64),
    PartialUnstake(String, u64),
    ValidatorExit(String),
    PendingPartialWithdrawals(u64),
    VaultAccountingReport(Address),
    ReportYield(Address),
    PeekedPositiveYield(u64),
    PeekedNegativeYield(u64),
    UnpaidProtocolFees(u64),
    StepFailure(&'static str),
    CycleDuration,
    TotalValidatorBalance(u64),
    YieldManagerBalance(u64),
}

/// Captures every metric call in order.
pub(crate) struct RecordingMetrics {
    events: Mutex<Vec<MetricEvent>>,
}

impl RecordingMetrics {
    pub(crate) fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, predicate: impl Fn(&MetricEvent) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
    }

    pub(crate) fn step_failures(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                MetricEvent::StepFailure(step) => Some(*step),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: MetricEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl YieldMetrics for RecordingMetrics {
    fn record_rebalance(&self, direction: RebalanceDirection, amount_gwei: u64) {
        self.push(MetricEvent::Rebalance(direction, amount_gwei));
    }

    fn increment_quota_exceeded(&self, vault: Address) {
        self.push(MetricEvent::QuotaExceeded(vault));
    }

    fn set_actual_rebalance_requirement(
        &self,
        _vault: Address,
        direction: RebalanceDirection,
        amount_gwei: u64,
    ) {
        self.push(MetricEvent::ActualRequirement(direction, amount_gwei));
    }

    fn set_reported_rebalance_requirement(
        &self,
        _vault: Address,
        direction: RebalanceDirection,
        amount_gwei: u64,
    ) {
        self.push(MetricEvent::ReportedRequirement(direction, amount_gwei));
    }

    fn add_validator_partial_unstake_amount(&self, pubkey: &str, amount_gwei: u64) {
        self.push(MetricEvent::PartialUnstake(pubkey.to_string(), amount_gwei));
    }

    fn increment_validator_exit(&self, pubkey: &str) {
        self.push(MetricEvent::ValidatorExit(pubkey.to_string()));
    }

    fn set_last_total_pending_partial_withdrawals_gwei(&self, amount_gwei: u64) {
        self.push(MetricEvent::PendingPartialWithdrawals(amount_gwei));
    }

    fn increment_vault_accounting_report(&self, vault: Address) {
        self.push(MetricEvent::VaultAccountingReport(vault));
    }

    fn increment_report_yield(&self, vault: Address) {
        self.push(MetricEvent::ReportYield(vault));
    }

    fn set_last_peeked_positive_yield(&self, _vault: Address, amount_gwei: u64) {
        self.push(MetricEvent::PeekedPositiveYield(amount_gwei));
    }

    fn set_last_peeked_negative_yield(&self, _vault: Address, amount_gwei: u64) {
        self.push(MetricEvent::PeekedNegativeYield(amount_gwei));
    }

    fn set_last_unpaid_protocol_fees(&self, _vault: Address, amount_gwei: u64) {
        self.push(MetricEvent::UnpaidProtocolFees(amount_gwei));
    }

    fn increment_step_failure(&self, step: &'static str) {
        self.push(MetricEvent::StepFailure(step));
    }

    fn record_cycle_duration(&self, _seconds: f64) {
        self.push(MetricEvent::CycleDuration);
    }

    fn set_total_validator_balance_gwei(&self, amount_gwei: u64) {
        self.push(MetricEvent::TotalValidatorBalance(amount_gwei));
    }

    fn set_yield_manager_balance_gwei(&self, amount_gwei: u64) {
        self.push(MetricEvent::YieldManagerBalance(amount_gwei));
    }
}
