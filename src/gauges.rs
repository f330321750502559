//! Periodic gauge updates independent of the cycle loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::beacon::ValidatorDataSource;
use crate::metrics::{YieldMetrics, wei_to_gwei};
use crate::yield_manager::YieldManager;

pub struct GaugeMetricsPoller<V, Y, M> {
    validators: V,
    yield_manager: Arc<Y>,
    metrics: M,
    interval: Duration,
}

impl<V, Y, M> GaugeMetricsPoller<V, Y, M>
where
    V: ValidatorDataSource,
    Y: YieldManager,
    M: YieldMetrics,
{
    pub fn new(validators: V, yield_manager: Arc<Y>, metrics: M, interval: Duration) -> Self {
        Self {
            validators,
            yield_manager,
            metrics,
            interval,
        }
    }

    /// Fetches every source concurrently; a failed source is logged and
    /// its gauges are left untouched.
    pub async fn poll(&self) {
        let (validators, balance) = tokio::join!(
            self.validators.validators_for_withdrawal_requests_ascending(),
            self.yield_manager.balance(),
        );

        match validators {
            Ok(validators) => {
                let total_balance_gwei = validators
                    .iter()
                    .fold(0u64, |acc, validator| acc.saturating_add(validator.balance_gwei));
                let pending_wei = self.validators.total_pending_partial_withdrawals_wei(&validators);

                self.metrics.set_total_validator_balance_gwei(total_balance_gwei);
                self.metrics
                    .set_last_total_pending_partial_withdrawals_gwei(wei_to_gwei(pending_wei));

                debug!(
                    validators = validators.len(),
                    total_balance_gwei,
                    %pending_wei,
                    "Updated validator gauges"
                );
            }
            Err(error) => error!(?error, "Failed to fetch validators for gauges"),
        }

        match balance {
            Ok(balance) => self.metrics.set_yield_manager_balance_gwei(wei_to_gwei(balance)),
            Err(error) => error!(?error, "Failed to fetch YieldManager balance for gauges"),
        }
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "Starting gauge metrics poller");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            ticker.tick().await;
            self.poll().await;
        }
    }
}
