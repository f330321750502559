//! Sliding-window rate limit on STAKE-direction rebalances.

use std::collections::VecDeque;

use alloy::primitives::{Address, U256};
use tracing::{debug, info, warn};

use super::mul_div;
use crate::metrics::YieldMetrics;

const BASIS_POINTS: u64 = 10_000;

/// Rolling sum over the last `capacity` pushed values.
#[derive(Debug, Clone)]
pub(crate) struct SlidingWindowAccumulator {
    capacity: usize,
    entries: VecDeque<U256>,
    total: U256,
}

impl SlidingWindowAccumulator {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            total: U256::ZERO,
        }
    }

    /// Appends `value`, evicting the oldest entry once the window is full.
    pub(crate) fn push(&mut self, value: U256) {
        if self.capacity == 0 {
            return;
        }

        if self.entries.len() == self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                self.total -= evicted;
            }
        }

        self.entries.push_back(value);
        self.total += value;
    }

    pub(crate) fn total(&self) -> U256 {
        self.total
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Clamps STAKE-direction rebalances to `quota_bps` of the total system
/// balance accumulated over the last `window_size` cycles.
///
/// Each call consumes exactly one window slot. A window size of zero
/// disables the quota entirely.
pub struct RebalanceQuotaService<M> {
    metrics: M,
    window: SlidingWindowAccumulator,
    window_size: usize,
    quota_bps: u32,
    tolerance_wei: U256,
}

impl<M: YieldMetrics> RebalanceQuotaService<M> {
    pub fn new(metrics: M, window_size: usize, quota_bps: u32, tolerance_wei: U256) -> Self {
        info!(
            window_size,
            quota_bps,
            %tolerance_wei,
            "RebalanceQuotaService initialized for STAKE direction"
        );

        Self {
            metrics,
            window: SlidingWindowAccumulator::new(window_size),
            window_size,
            quota_bps,
            tolerance_wei,
        }
    }

    /// Returns how much of `requested_wei` may be staked this cycle.
    pub fn rebalance_amount_after_quota(
        &mut self,
        vault: Address,
        total_system_balance: U256,
        requested_wei: U256,
    ) -> U256 {
        if self.window_size == 0 {
            return requested_wei;
        }

        let quota_wei = mul_div(
            total_system_balance,
            U256::from(self.quota_bps),
            U256::from(BASIS_POINTS),
        );

        if requested_wei < self.tolerance_wei {
            debug!(
                %requested_wei,
                tolerance_wei = %self.tolerance_wei,
                "Requested amount below tolerance threshold, consuming empty quota slot"
            );
            self.window.push(U256::ZERO);
            return U256::ZERO;
        }

        let prev_total = self.window.total();
        let new_total = prev_total.saturating_add(requested_wei);

        if new_total <= quota_wei {
            self.window.push(requested_wei);
            debug!(%requested_wei, %new_total, %quota_wei, "Rebalance within quota");
            return requested_wei;
        }

        self.window.push(requested_wei);
        self.metrics.increment_quota_exceeded(vault);

        if prev_total < quota_wei {
            let remainder = quota_wei - prev_total;
            warn!(
                %vault,
                %requested_wei,
                %prev_total,
                %quota_wei,
                allowed_wei = %remainder,
                "Rebalance crosses quota, returning remainder"
            );
            remainder
        } else {
            warn!(
                %vault,
                %requested_wei,
                %prev_total,
                %quota_wei,
                "Quota already exhausted, rebalance blocked"
            );
            U256::ZERO
        }
    }

    #[cfg(test)]
    pub(crate) fn window_total(&self) -> U256 {
        self.window.total()
    }
}
