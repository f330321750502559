//! Rebalance requirement calculation.
//!
//! Compares the L1 message service reserve against the target
//! withdrawal reserve, scaled down by the share of the system balance
//! that is already owed elsewhere (system obligations). Surpluses are
//! staked through the [`RebalanceQuotaService`], deficits are unstaked
//! without a quota.

use std::fmt;

use alloy::primitives::{Address, U256, U512};
use tracing::{debug, info, instrument};

use crate::metrics::{YieldMetrics, wei_to_gwei};
use crate::yield_manager::{YieldManager, YieldManagerError, YieldReport};

pub mod quota;

pub use quota::RebalanceQuotaService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RebalanceDirection {
    None,
    Stake,
    Unstake,
}

impl RebalanceDirection {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Stake => "STAKE",
            Self::Unstake => "UNSTAKE",
        }
    }
}

impl fmt::Display for RebalanceDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction and size of the rebalance a cycle should perform.
///
/// The amount is zero exactly when the direction is [`RebalanceDirection::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceRequirement {
    direction: RebalanceDirection,
    amount: U256,
}

impl RebalanceRequirement {
    pub const NONE: Self = Self {
        direction: RebalanceDirection::None,
        amount: U256::ZERO,
    };

    /// A zero amount or a `None` direction both collapse to [`Self::NONE`].
    pub fn new(direction: RebalanceDirection, amount: U256) -> Self {
        if amount.is_zero() || direction == RebalanceDirection::None {
            return Self::NONE;
        }

        Self { direction, amount }
    }

    pub const fn direction(&self) -> RebalanceDirection {
        self.direction
    }

    pub const fn amount(&self) -> U256 {
        self.amount
    }

    pub fn is_unstake(&self) -> bool {
        self.direction == RebalanceDirection::Unstake
    }
}

impl fmt::Display for RebalanceRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} wei", self.direction, self.amount)
    }
}

/// Point-in-time reads the requirement is computed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceInputs {
    pub total_system_balance: U256,
    pub reserve_balance: U256,
    pub target_reserve: U256,
    pub user_funds: U256,
    pub dashboard_total_value: U256,
    pub peeked_yield: U256,
    pub peeked_negative_yield: U256,
}

/// `a * b / d` without intermediate overflow. Returns zero when `d` is zero.
pub(crate) fn mul_div(a: U256, b: U256, d: U256) -> U256 {
    if d.is_zero() {
        return U256::ZERO;
    }

    let wide = U512::from(a) * U512::from(b) / U512::from(d);
    if wide > U512::from(U256::MAX) {
        U256::MAX
    } else {
        wide.to::<U256>()
    }
}

/// Funds in the provider that are owed elsewhere and must not be
/// counted towards the reserve target.
///
/// With positive peeked yield the not-yet-reported yield is excluded;
/// otherwise outstanding negative yield is added back.
pub fn system_obligations(inputs: &RebalanceInputs) -> U256 {
    if !inputs.peeked_yield.is_zero() {
        inputs
            .dashboard_total_value
            .saturating_sub(inputs.peeked_yield)
            .saturating_sub(inputs.user_funds)
    } else {
        inputs
            .peeked_negative_yield
            .saturating_add(inputs.dashboard_total_value)
            .saturating_sub(inputs.user_funds)
    }
}

/// Target reserve scaled by the share of the system balance that is
/// not already an obligation.
pub fn target_ex_obligations(inputs: &RebalanceInputs, obligations: U256) -> U256 {
    mul_div(
        inputs.target_reserve,
        inputs.total_system_balance.saturating_sub(obligations),
        inputs.total_system_balance,
    )
}

/// Owns the per-vault quota state and turns chain reads into a
/// [`RebalanceRequirement`].
pub struct RebalanceCalculator<M> {
    quota: RebalanceQuotaService<M>,
    metrics: M,
    tolerance_wei: U256,
}

impl<M: YieldMetrics + Clone> RebalanceCalculator<M> {
    pub fn new(metrics: M, window_size: usize, quota_bps: u32, tolerance_wei: U256) -> Self {
        Self {
            quota: RebalanceQuotaService::new(metrics.clone(), window_size, quota_bps, tolerance_wei),
            metrics,
            tolerance_wei,
        }
    }
}

impl<M: YieldMetrics> RebalanceCalculator<M> {
    /// Reads the current balances concurrently and computes the
    /// requirement, consuming a quota slot on a STAKE result.
    ///
    /// Read failures propagate; containment is the caller's job.
    #[instrument(skip_all, fields(%yield_provider), err)]
    pub async fn rebalance_requirements<Y: YieldManager + ?Sized>(
        &mut self,
        yield_manager: &Y,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Result<RebalanceRequirement, YieldManagerError> {
        let (vault, inputs) = read_inputs(yield_manager, yield_provider, l2_yield_recipient).await?;
        Ok(self.compute_requirement(vault, &inputs))
    }

    /// Like [`Self::rebalance_requirements`] but leaves the quota window
    /// untouched. Used for the mid-cycle and end-of-cycle checks, which
    /// only act on deficits.
    #[instrument(skip_all, fields(%yield_provider), err)]
    pub async fn recheck_requirements<Y: YieldManager + ?Sized>(
        &mut self,
        yield_manager: &Y,
        yield_provider: Address,
        l2_yield_recipient: Address,
    ) -> Result<RebalanceRequirement, YieldManagerError> {
        let (vault, inputs) = read_inputs(yield_manager, yield_provider, l2_yield_recipient).await?;
        Ok(self.evaluate(vault, &inputs, false))
    }

    /// Applies obligations, quota, tolerance and the staking ceiling to
    /// `inputs`. Each call consumes one quota slot when the raw
    /// direction is STAKE.
    pub fn compute_requirement(
        &mut self,
        vault: Address,
        inputs: &RebalanceInputs,
    ) -> RebalanceRequirement {
        self.evaluate(vault, inputs, true)
    }

    fn evaluate(
        &mut self,
        vault: Address,
        inputs: &RebalanceInputs,
        metered: bool,
    ) -> RebalanceRequirement {
        if inputs.total_system_balance.is_zero() {
            debug!("Total system balance is zero, nothing to rebalance");
            self.metrics
                .set_reported_rebalance_requirement(vault, RebalanceDirection::None, 0);
            return RebalanceRequirement::NONE;
        }

        let obligations = system_obligations(inputs);
        let target_ex_obligations = target_ex_obligations(inputs, obligations);

        let direction = if inputs.reserve_balance < target_ex_obligations {
            RebalanceDirection::Unstake
        } else {
            RebalanceDirection::Stake
        };

        let absolute = inputs
            .reserve_balance
            .abs_diff(target_ex_obligations)
            .saturating_add(obligations);

        self.metrics
            .set_actual_rebalance_requirement(vault, direction, wei_to_gwei(absolute));

        let amount = match direction {
            RebalanceDirection::Stake if metered => {
                self.quota
                    .rebalance_amount_after_quota(vault, inputs.total_system_balance, absolute)
            }
            _ => absolute,
        };

        let requirement = if amount < self.tolerance_wei {
            RebalanceRequirement::NONE
        } else if direction == RebalanceDirection::Unstake {
            RebalanceRequirement::new(direction, amount)
        } else {
            let staking_ceiling = inputs.reserve_balance.saturating_sub(inputs.target_reserve);
            RebalanceRequirement::new(direction, amount.min(staking_ceiling))
        };

        info!(
            %vault,
            reserve_balance = %inputs.reserve_balance,
            target_reserve = %inputs.target_reserve,
            %target_ex_obligations,
            %obligations,
            raw_direction = %direction,
            %requirement,
            "Computed rebalance requirement"
        );

        self.metrics.set_reported_rebalance_requirement(
            vault,
            requirement.direction(),
            wei_to_gwei(requirement.amount()),
        );

        requirement
    }
}

async fn read_inputs<Y: YieldManager + ?Sized>(
    yield_manager: &Y,
    yield_provider: Address,
    l2_yield_recipient: Address,
) -> Result<(Address, RebalanceInputs), YieldManagerError> {
    let (
        reserve_balance,
        total_system_balance,
        target_reserve,
        dashboard_total_value,
        peeked,
        user_funds,
        vault,
    ) = tokio::try_join!(
        yield_manager.l1_message_service_balance(),
        yield_manager.total_system_balance(),
        yield_manager.effective_target_withdrawal_reserve(),
        yield_manager.dashboard_total_value(yield_provider),
        async {
            Ok::<_, YieldManagerError>(
                yield_manager
                    .peek_yield_report(yield_provider, l2_yield_recipient)
                    .await,
            )
        },
        yield_manager.user_funds(yield_provider),
        yield_manager.staking_vault(yield_provider),
    )?;

    let peeked = peeked.unwrap_or(YieldReport::empty(yield_provider));

    Ok((
        vault,
        RebalanceInputs {
            total_system_balance,
            reserve_balance,
            target_reserve,
            user_funds,
            dashboard_total_value,
            peeked_yield: peeked.yield_amount,
            peeked_negative_yield: peeked.outstanding_negative_yield,
        },
    ))
}
