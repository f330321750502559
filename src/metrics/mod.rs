//! Observability surface for the automation service.
//!
//! [`YieldMetrics`] is the seam every component records through.
//! [`PrometheusStyleMetrics`] forwards to the `metrics` facade so any
//! installed recorder (Prometheus exporter, OTLP bridge) picks them up.

use alloy::primitives::{Address, U256};

use crate::rebalance::RebalanceDirection;

#[cfg(test)]
pub(crate) mod mock;

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Converts wei to whole gwei, saturating at `u64::MAX`.
pub(crate) fn wei_to_gwei(wei: U256) -> u64 {
    let gwei = wei / U256::from(WEI_PER_GWEI);
    u64::try_from(gwei).unwrap_or(u64::MAX)
}

pub(crate) fn gwei_to_wei(gwei: u64) -> U256 {
    U256::from(gwei) * U256::from(WEI_PER_GWEI)
}

pub trait YieldMetrics: Send + Sync {
    /// Funds actually moved in `direction` during a cycle.
    fn record_rebalance(&self, direction: RebalanceDirection, amount_gwei: u64);

    fn increment_quota_exceeded(&self, vault: Address);

    /// Pre-quota, pre-tolerance requirement.
    fn set_actual_rebalance_requirement(
        &self,
        vault: Address,
        direction: RebalanceDirection,
        amount_gwei: u64,
    );

    /// Requirement returned to the cycle after quota and tolerance.
    fn set_reported_rebalance_requirement(
        &self,
        vault: Address,
        direction: RebalanceDirection,
        amount_gwei: u64,
    );

    fn add_validator_partial_unstake_amount(&self, pubkey: &str, amount_gwei: u64);

    fn increment_validator_exit(&self, pubkey: &str);

    fn set_last_total_pending_partial_withdrawals_gwei(&self, amount_gwei: u64);

    fn increment_vault_accounting_report(&self, vault: Address);

    fn increment_report_yield(&self, vault: Address);

    fn set_last_peeked_positive_yield(&self, vault: Address, amount_gwei: u64);

    fn set_last_peeked_negative_yield(&self, vault: Address, amount_gwei: u64);

    fn set_last_unpaid_protocol_fees(&self, vault: Address, amount_gwei: u64);

    fn increment_step_failure(&self, step: &'static str);

    fn record_cycle_duration(&self, seconds: f64);

    fn set_total_validator_balance_gwei(&self, amount_gwei: u64);

    fn set_yield_manager_balance_gwei(&self, amount_gwei: u64);
}

/// [`YieldMetrics`] backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrometheusStyleMetrics;

impl YieldMetrics for PrometheusStyleMetrics {
    fn record_rebalance(&self, direction: RebalanceDirection, amount_gwei: u64) {
        ::metrics::counter!("native_yield_rebalance_amount_gwei_total", "direction" => direction.as_str())
            .increment(amount_gwei);
    }

    fn increment_quota_exceeded(&self, vault: Address) {
        ::metrics::counter!("native_yield_staking_deposit_quota_exceeded_total", "vault" => vault.to_string())
            .increment(1);
    }

    fn set_actual_rebalance_requirement(
        &self,
        vault: Address,
        direction: RebalanceDirection,
        amount_gwei: u64,
    ) {
        ::metrics::gauge!(
            "native_yield_actual_rebalance_requirement_gwei",
            "vault" => vault.to_string(),
            "direction" => direction.as_str()
        )
        .set(amount_gwei as f64);
    }

    fn set_reported_rebalance_requirement(
        &self,
        vault: Address,
        direction: RebalanceDirection,
        amount_gwei: u64,
    ) {
        ::metrics::gauge!(
            "native_yield_reported_rebalance_requirement_gwei",
            "vault" => vault.to_string(),
            "direction" => direction.as_str()
        )
        .set(amount_gwei as f64);
    }

    fn add_validator_partial_unstake_amount(&self, pubkey: &str, amount_gwei: u64) {
        ::metrics::counter!("native_yield_validator_partial_unstake_gwei_total", "pubkey" => pubkey.to_string())
            .increment(amount_gwei);
    }

    fn increment_validator_exit(&self, pubkey: &str) {
        ::metrics::counter!("native_yield_validator_exit_total", "pubkey" => pubkey.to_string())
            .increment(1);
    }

    fn set_last_total_pending_partial_withdrawals_gwei(&self, amount_gwei: u64) {
        ::metrics::gauge!("native_yield_total_pending_partial_withdrawals_gwei").set(amount_gwei as f64);
    }

    fn increment_vault_accounting_report(&self, vault: Address) {
        ::metrics::counter!("native_yield_vault_accounting_report_total", "vault" => vault.to_string())
            .increment(1);
    }

    fn increment_report_yield(&self, vault: Address) {
        ::metrics::counter!("native_yield_report_yield_total", "vault" => vault.to_string()).increment(1);
    }

    fn set_last_peeked_positive_yield(&self, vault: Address, amount_gwei: u64) {
        ::metrics::gauge!("native_yield_last_peeked_positive_yield_gwei", "vault" => vault.to_string())
            .set(amount_gwei as f64);
    }

    fn set_last_peeked_negative_yield(&self, vault: Address, amount_gwei: u64) {
        ::metrics::gauge!("native_yield_last_peeked_negative_yield_gwei", "vault" => vault.to_string())
            .set(amount_gwei as f64);
    }

    fn set_last_unpaid_protocol_fees(&self, vault: Address, amount_gwei: u64) {
        ::metrics::gauge!("native_yield_last_unpaid_protocol_fees_gwei", "vault" => vault.to_string())
            .set(amount_gwei as f64);
    }

    fn increment_step_failure(&self, step: &'static str) {
        ::metrics::counter!("native_yield_step_failures_total", "step" => step).increment(1);
    }

    fn record_cycle_duration(&self, seconds: f64) {
        ::metrics::histogram!("native_yield_cycle_duration_seconds", "mode" => "yield_reporting")
            .record(seconds);
    }

    fn set_total_validator_balance_gwei(&self, amount_gwei: u64) {
        ::metrics::gauge!("native_yield_total_validator_balance_gwei").set(amount_gwei as f64);
    }

    fn set_yield_manager_balance_gwei(&self, amount_gwei: u64) {
        ::metrics::gauge!("native_yield_yield_manager_balance_gwei").set(amount_gwei as f64);
    }
}

impl<T: YieldMetrics + ?Sized> YieldMetrics for std::sync::Arc<T> {
    fn record_rebalance(&self, direction: RebalanceDirection, amount_gwei: u64) {
        (**self).record_rebalance(direction, amount_gwei);
    }

    fn increment_quota_exceeded(&self, vault: Address) {
        (**self).increment_quota_exceeded(vault);
    }

    fn set_actual_rebalance_requirement(
        &self,
        vault: Address,
        direction: RebalanceDirection,
        amount_gwei: u64,
    ) {
        (**self).set_actual_rebalance_requirement(vault, direction, amount_gwei);
    }

    fn set_reported_rebalance_requirement(
        &self,
        vault: Address,
        direction: RebalanceDirection,
        amount_gwei: u64,
    ) {
        (**self).set_reported_rebalance_requirement(vault, direction, amount_gwei);
    }

    fn add_validator_partial_unstake_amount(&self, pubkey: &str, amount_gwei: u64) {
        (**self).add_validator_partial_unstake_amount(pubkey, amount_gwei);
    }

    fn increment_validator_exit(&self, pubkey: &str) {
        (**self).increment_validator_exit(pubkey);
    }

    fn set_last_total_pending_partial_withdrawals_gwei(&self, amount_gwei: u64) {
        (**self).set_last_total_pending_partial_withdrawals_gwei(amount_gwei);
    }

    fn increment_vault_accounting_report(&self, vault: Address) {
        (**self).increment_vault_accounting_report(vault);
    }

    fn increment_report_yield(&self, vault: Address) {
        (**self).increment_report_yield(vault);
    }

    fn set_last_peeked_positive_yield(&self, vault: Address, amount_gwei: u64) {
        (**self).set_last_peeked_positive_yield(vault, amount_gwei);
    }

    fn set_last_peeked_negative_yield(&self, vault: Address, amount_gwei: u64) {
        (**self).set_last_peeked_negative_yield(vault, amount_gwei);
    }

    fn set_last_unpaid_protocol_fees(&self, vault: Address, amount_gwei: u64) {
        (**self).set_last_unpaid_protocol_fees(vault, amount_gwei);
    }

    fn increment_step_failure(&self, step: &'static str) {
        (**self).increment_step_failure(step);
    }

    fn record_cycle_duration(&self, seconds: f64) {
        (**self).record_cycle_duration(seconds);
    }

    fn set_total_validator_balance_gwei(&self, amount_gwei: u64) {
        (**self).set_total_validator_balance_gwei(amount_gwei);
    }

    fn set_yield_manager_balance_gwei(&self, amount_gwei: u64) {
        (**self).set_yield_manager_balance_gwei(amount_gwei);
    }
}
