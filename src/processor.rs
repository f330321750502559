//! One yield-reporting cycle per trigger.
//!
//! A cycle waits for a LazyOracle report (or the inaction timeout), then:
//!
//! 1. computes the initial rebalance requirement, pausing staking on a deficit
//! 2. runs the STAKE, UNSTAKE or NONE branch, each ending in report submission
//! 3. re-checks the requirement and, if a deficit appeared mid-cycle, tops up
//!    the withdrawal reserve without reporting yield a second time
//! 4. unpauses staking once no deficit remains
//! 5. requests beacon-chain withdrawals for any deficit left at the end
//!
//! Every on-chain step is best-effort: its result lands in the
//! [`CycleReport`] and a failure never stops the steps after it.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use tracing::{error, info, instrument, warn};

use crate::accounting::VaultAccounting;
use crate::beacon::WithdrawalRequester;
use crate::message_service::MessageService;
use crate::metrics::{YieldMetrics, wei_to_gwei};
use crate::rebalance::{RebalanceCalculator, RebalanceDirection, RebalanceRequirement};
use crate::trigger::{TriggerError, TriggerOutcome, VaultReportEvents, wait_for_trigger};
use crate::yield_manager::YieldManager;

/// Result of one best-effort step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: &'static str,
    pub result: Result<(), String>,
}

/// Everything a cycle attempted, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle: u64,
    pub trigger: TriggerOutcome,
    pub initial: Option<RebalanceRequirement>,
    pub post_rebalance: Option<RebalanceRequirement>,
    pub ending: Option<RebalanceRequirement>,
    pub steps: Vec<StepOutcome>,
}

impl CycleReport {
    fn new(cycle: u64, trigger: TriggerOutcome) -> Self {
        Self {
            cycle,
            trigger,
            initial: None,
            post_rebalance: None,
            ending: None,
            steps: Vec::new(),
        }
    }

    pub fn failed_steps(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|outcome| outcome.result.is_err())
            .map(|outcome| outcome.step)
            .collect()
    }

    pub fn attempted(&self, step: &str) -> bool {
        self.steps.iter().any(|outcome| outcome.step == step)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub yield_provider: Address,
    pub l2_yield_recipient: Address,
    pub max_inaction: Duration,
    pub should_submit_vault_report: bool,
    pub should_report_yield: bool,
    pub is_unpause_staking_enabled: bool,
    pub min_positive_yield_to_report_wei: U256,
    pub min_unpaid_protocol_fees_to_report_wei: U256,
    pub min_negative_yield_diff_to_report_wei: Option<U256>,
    /// Report yield every N cycles regardless of thresholds; 0 disables.
    pub cycles_per_yield_report: u64,
}

pub struct ProcessorDeps<Y, S, A, B, T, M> {
    pub yield_manager: Arc<Y>,
    pub message_service: Arc<S>,
    pub accounting: Arc<A>,
    pub withdrawals: Arc<B>,
    pub trigger: Arc<T>,
    pub metrics: M,
    pub calculator: RebalanceCalculator<M>,
}

pub struct YieldReportingProcessor<Y, S, A, B, T, M> {
    yield_manager: Arc<Y>,
    message_service: Arc<S>,
    accounting: Arc<A>,
    withdrawals: Arc<B>,
    trigger: Arc<T>,
    metrics: M,
    calculator: RebalanceCalculator<M>,
    settings: ProcessorSettings,
    cycle_count: u64,
}

impl<Y, S, A, B, T, M> YieldReportingProcessor<Y, S, A, B, T, M>
where
    Y: YieldManager,
    S: MessageService,
    A: VaultAccounting,
    B: WithdrawalRequester,
    T: VaultReportEvents,
    M: YieldMetrics,
{
    pub fn new(deps: ProcessorDeps<Y, S, A, B, T, M>, settings: ProcessorSettings) -> Self {
        Self {
            yield_manager: deps.yield_manager,
            message_service: deps.message_service,
            accounting: deps.accounting,
            withdrawals: deps.withdrawals,
            trigger: deps.trigger,
            metrics: deps.metrics,
            calculator: deps.calculator,
            settings,
            cycle_count: 0,
        }
    }

    /// Waits for the next trigger and runs exactly one cycle.
    ///
    /// Only the trigger wait can fail; step failures are reported in the
    /// returned [`CycleReport`].
    pub async fn process(&mut self) -> Result<CycleReport, TriggerError> {
        let trigger = wait_for_trigger(&*self.trigger, self.settings.max_inaction).await?;

        let started = Instant::now();
        let report = self.run_cycle(trigger).await;
        self.metrics
            .record_cycle_duration(started.elapsed().as_secs_f64());

        let failed = report.failed_steps();
        if failed.is_empty() {
            info!(cycle = report.cycle, steps = report.steps.len(), "Cycle completed");
        } else {
            warn!(cycle = report.cycle, ?failed, "Cycle completed with failed steps");
        }

        Ok(report)
    }

    #[instrument(skip_all, fields(cycle = self.cycle_count + 1, yield_provider = %self.settings.yield_provider))]
    async fn run_cycle(&mut self, trigger: TriggerOutcome) -> CycleReport {
        self.cycle_count += 1;
        let mut report = CycleReport::new(self.cycle_count, trigger);
        let provider = self.settings.yield_provider;
        let recipient = self.settings.l2_yield_recipient;

        let vault = self.step(
            &mut report,
            "resolve_vault",
            self.yield_manager.staking_vault(provider).await,
        );

        let mut staking_paused = self
            .step(
                &mut report,
                "read_staking_state",
                self.yield_manager.is_staking_paused(provider).await,
            )
            .unwrap_or(false);

        let initial = {
            let assessed = self
                .calculator
                .rebalance_requirements(&*self.yield_manager, provider, recipient)
                .await;
            self.step(&mut report, "initial_assessment", assessed)
        };
        report.initial = initial;
        info!(?initial, "Initial rebalance requirement");

        if let Some(requirement) = initial {
            if requirement.is_unstake() {
                let paused = self.step(
                    &mut report,
                    "pause_staking",
                    self.yield_manager.pause_staking_if_not_already(provider).await,
                );
                staking_paused |= paused.is_some();
            }

            match requirement.direction() {
                RebalanceDirection::Stake => {
                    self.handle_staking_rebalance(&mut report, vault, requirement.amount())
                        .await;
                }
                RebalanceDirection::Unstake => {
                    self.handle_unstaking_rebalance(&mut report, vault, requirement.amount(), true)
                        .await;
                }
                RebalanceDirection::None => self.handle_no_rebalance(&mut report, vault).await,
            }
        } else {
            warn!("Initial assessment unavailable, skipping rebalance branch");
        }

        let post = {
            let assessed = self
                .calculator
                .recheck_requirements(&*self.yield_manager, provider, recipient)
                .await;
            self.step(&mut report, "amendment_check", assessed)
        };
        report.post_rebalance = post;

        if let Some(post) = post {
            let initially_unstaking = initial.is_some_and(|initial| initial.is_unstake());

            if post.is_unstake() && !initially_unstaking {
                info!(%post, "Deficit emerged mid-cycle, amending with unstake");
                self.handle_unstaking_rebalance(&mut report, vault, post.amount(), false)
                    .await;
            } else if !post.is_unstake() && staking_paused {
                if self.settings.is_unpause_staking_enabled {
                    self.step(
                        &mut report,
                        "unpause_staking",
                        self.yield_manager.unpause_staking_if_not_already(provider).await,
                    );
                } else {
                    info!("Unpause staking disabled, leaving staking paused");
                }
            }
        }

        let ending = {
            let assessed = self
                .calculator
                .recheck_requirements(&*self.yield_manager, provider, recipient)
                .await;
            self.step(&mut report, "ending_check", assessed)
        };
        report.ending = ending;

        if let Some(ending) = ending.filter(RebalanceRequirement::is_unstake) {
            info!(%ending, "Deficit remains, requesting beacon chain withdrawals");
            self.step(
                &mut report,
                "beacon_withdrawal",
                self.withdrawals
                    .submit_withdrawal_requests_to_fulfil_amount(ending.amount())
                    .await,
            );
        }

        report
    }

    /// Surplus: reserve to YieldManager, then YieldManager to provider.
    /// The second leg only runs when the first succeeded.
    #[instrument(skip_all, fields(%amount))]
    async fn handle_staking_rebalance(
        &self,
        report: &mut CycleReport,
        vault: Option<Address>,
        amount: U256,
    ) {
        let transferred = self.step(
            report,
            "transfer_funds",
            self.message_service.transfer_funds_for_native_yield(amount).await,
        );

        if transferred.is_some() {
            self.metrics
                .record_rebalance(RebalanceDirection::Stake, wei_to_gwei(amount));
            self.step(
                report,
                "fund_yield_provider",
                self.yield_manager
                    .fund_yield_provider(self.settings.yield_provider, amount)
                    .await,
            );
        }

        self.handle_report_submission(report, vault).await;
    }

    /// Deficit: optionally report first, then top up the withdrawal reserve.
    #[instrument(skip_all, fields(%amount, report_first))]
    async fn handle_unstaking_rebalance(
        &self,
        report: &mut CycleReport,
        vault: Option<Address>,
        amount: U256,
        report_first: bool,
    ) {
        if report_first {
            self.handle_report_submission(report, vault).await;
        }

        let added = self.step(
            report,
            "safe_add_to_withdrawal_reserve",
            self.yield_manager
                .safe_add_to_withdrawal_reserve_if_above_threshold(self.settings.yield_provider, amount)
                .await,
        );

        if let Some(Some(top_up)) = added {
            info!(
                tx = %top_up.tx,
                requested = %amount,
                added = %top_up.amount,
                "Withdrawal reserve topped up"
            );
            self.metrics
                .record_rebalance(RebalanceDirection::Unstake, wei_to_gwei(top_up.amount));
        }
    }

    /// Balanced reserve: push any funds stranded on the YieldManager into
    /// the provider, then report.
    #[instrument(skip_all)]
    async fn handle_no_rebalance(&self, report: &mut CycleReport, vault: Option<Address>) {
        let provider = self.settings.yield_provider;

        let reads = self.step(
            report,
            "sweep_reads",
            tokio::try_join!(
                self.yield_manager.balance(),
                self.yield_manager.target_reserve_deficit()
            ),
        );

        if let Some((balance, deficit)) = reads
            && balance > self.yield_manager.min_withdrawal_threshold_wei()
        {
            if !deficit.is_zero() {
                self.step(
                    report,
                    "sweep_withdraw",
                    self.yield_manager
                        .safe_withdraw_from_yield_provider(provider, deficit)
                        .await,
                );
            }

            self.step(
                report,
                "sweep_fund",
                self.yield_manager.fund_yield_provider(provider, balance).await,
            );
        }

        self.handle_report_submission(report, vault).await;
    }

    #[instrument(skip_all)]
    async fn handle_report_submission(&self, report: &mut CycleReport, vault: Option<Address>) {
        if let Some(vault) = vault {
            self.submit_vault_report_if_not_fresh(report, vault).await;
        }

        if self.should_report_yield(vault).await {
            let reported = self.step(
                report,
                "report_yield",
                self.yield_manager
                    .report_yield(self.settings.yield_provider, self.settings.l2_yield_recipient)
                    .await,
            );

            if let Some(tx) = reported {
                info!(%tx, "Yield reported");
                self.metrics.increment_report_yield(self.settings.yield_provider);
            }
        }
    }

    async fn submit_vault_report_if_not_fresh(&self, report: &mut CycleReport, vault: Address) {
        if !self.settings.should_submit_vault_report {
            info!("Vault report submission disabled, skipping");
            return;
        }

        match self.accounting.is_report_fresh(vault).await {
            Ok(true) => {
                info!(%vault, "Vault report is fresh, skipping submission");
                return;
            }
            Ok(false) => {}
            Err(error) => {
                warn!(?error, %vault, "Report freshness unknown, submitting anyway");
            }
        }

        let submitted = self.step(
            report,
            "submit_vault_report",
            self.accounting.submit_latest_vault_report(vault).await,
        );

        if submitted.is_some() {
            self.metrics.increment_vault_accounting_report(vault);
        }
    }

    async fn should_report_yield(&self, vault: Option<Address>) -> bool {
        if !self.settings.should_report_yield {
            info!("Yield reporting disabled");
            return false;
        }

        let provider = self.settings.yield_provider;
        let (peeked, unpaid_fees, provider_state) = tokio::join!(
            self.yield_manager
                .peek_yield_report(provider, self.settings.l2_yield_recipient),
            async {
                match vault {
                    Some(vault) => self.accounting.peek_unpaid_protocol_fees(vault).await,
                    None => None,
                }
            },
            self.yield_manager.yield_provider_state(provider),
        );

        let gauge_vault = vault.unwrap_or(provider);
        if let Some(peeked) = &peeked {
            self.metrics
                .set_last_peeked_positive_yield(gauge_vault, wei_to_gwei(peeked.yield_amount));
            self.metrics.set_last_peeked_negative_yield(
                gauge_vault,
                wei_to_gwei(peeked.outstanding_negative_yield),
            );
        }
        if let Some(fees) = unpaid_fees {
            self.metrics
                .set_last_unpaid_protocol_fees(gauge_vault, wei_to_gwei(fees));
        }

        let positive_yield = peeked.map_or(U256::ZERO, |peeked| peeked.yield_amount);
        let fees = unpaid_fees.unwrap_or(U256::ZERO);

        let positive_met = positive_yield >= self.settings.min_positive_yield_to_report_wei;
        let fees_met = fees >= self.settings.min_unpaid_protocol_fees_to_report_wei;

        let negative_yield_diff = match (&peeked, &provider_state) {
            (Some(peeked), Ok(state)) => Some(
                peeked
                    .outstanding_negative_yield
                    .saturating_sub(state.last_reported_negative_yield),
            ),
            _ => None,
        };
        let negative_met = match (self.settings.min_negative_yield_diff_to_report_wei, negative_yield_diff) {
            (Some(min), Some(diff)) => diff >= min,
            _ => false,
        };

        let cycle_due = self.settings.cycles_per_yield_report > 0
            && self.cycle_count % self.settings.cycles_per_yield_report == 0;

        let decision = positive_met || fees_met || negative_met || cycle_due;

        info!(
            decision,
            %positive_yield,
            %fees,
            ?negative_yield_diff,
            cycle = self.cycle_count,
            cycle_due,
            "Evaluated yield report thresholds"
        );

        decision
    }

    /// Records a step's result and returns its value on success.
    fn step<V, E: fmt::Debug + fmt::Display>(
        &self,
        report: &mut CycleReport,
        step: &'static str,
        result: Result<V, E>,
    ) -> Option<V> {
        match result {
            Ok(value) => {
                report.steps.push(StepOutcome {
                    step,
                    result: Ok(()),
                });
                Some(value)
            }
            Err(error) => {
                error!(?error, step, "Cycle step failed (tolerated)");
                self.metrics.increment_step_failure(step);
                report.steps.push(StepOutcome {
                    step,
                    result: Err(error.to_string()),
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use tracing_test::traced_test;

    use super::*;
    use crate::accounting::mock::MockAccounting;
    use crate::beacon::mock::MockStakingSubmitter;
    use crate::message_service::mock::MockMessageService;
    use crate::metrics::mock::{MetricEvent, RecordingMetrics};
    use crate::trigger::mock::{MockVaultReportEvents, Script};
    use crate::trigger::VaultReportUpdate;
    use crate::yield_manager::YieldReport;
    use crate::yield_manager::mock::{MockYieldManager, WriteCall};

    const PROVIDER: Address = address!("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    const RECIPIENT: Address = address!("0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb");
    const VAULT: Address = address!("0x8888888888888888888888888888888888888888");

    fn eth(n: u64) -> U256 {
        U256::from(n) * U256::from(10u64).pow(U256::from(18))
    }

    fn settings() -> ProcessorSettings {
        ProcessorSettings {
            yield_provider: PROVIDER,
            l2_yield_recipient: RECIPIENT,
            max_inaction: Duration::from_millis(5),
            should_submit_vault_report: true,
            should_report_yield: true,
            is_unpause_staking_enabled: true,
            min_positive_yield_to_report_wei: eth(1),
            min_unpaid_protocol_fees_to_report_wei: eth(1),
            min_negative_yield_diff_to_report_wei: None,
            cycles_per_yield_report: 0,
        }
    }

    type TestProcessor = YieldReportingProcessor<
        MockYieldManager,
        MockMessageService,
        MockAccounting,
        MockStakingSubmitter,
        MockVaultReportEvents,
        Arc<RecordingMetrics>,
    >;

    struct Harness {
        processor: TestProcessor,
        yield_manager: Arc<MockYieldManager>,
        message_service: Arc<MockMessageService>,
        accounting: Arc<MockAccounting>,
        withdrawals: Arc<MockStakingSubmitter>,
        trigger: Arc<MockVaultReportEvents>,
        metrics: Arc<RecordingMetrics>,
    }

    fn harness_with(settings: ProcessorSettings, trigger: MockVaultReportEvents) -> Harness {
        let yield_manager = Arc::new(MockYieldManager::new());
        yield_manager.set_reads(|reads| {
            reads.total_system_balance = eth(1000);
            reads.target_reserve = eth(100);
            reads.reserve_balance = eth(100);
            reads.user_funds = eth(900);
            reads.dashboard_total_value = eth(900);
            reads.withdrawable_value = eth(500);
            reads.provider_state.staking_vault = VAULT;
        });

        let message_service = Arc::new(MockMessageService::new());
        let accounting = Arc::new(MockAccounting::new());
        let withdrawals = Arc::new(MockStakingSubmitter::new());
        let trigger = Arc::new(trigger);
        let metrics = Arc::new(RecordingMetrics::new());

        let processor = YieldReportingProcessor::new(
            ProcessorDeps {
                yield_manager: yield_manager.clone(),
                message_service: message_service.clone(),
                accounting: accounting.clone(),
                withdrawals: withdrawals.clone(),
                trigger: trigger.clone(),
                metrics: metrics.clone(),
                calculator: RebalanceCalculator::new(metrics.clone(), 24, 1800, eth(1)),
            },
            settings,
        );

        Harness {
            processor,
            yield_manager,
            message_service,
            accounting,
            withdrawals,
            trigger,
            metrics,
        }
    }

    fn harness() -> Harness {
        harness_with(settings(), MockVaultReportEvents::silent())
    }

    fn reportable_yield(yield_manager: &MockYieldManager) {
        yield_manager.set_reads(|reads| {
            reads.peeked = Some(YieldReport {
                yield_amount: eth(2),
                outstanding_negative_yield: U256::ZERO,
                yield_provider: PROVIDER,
            });
        });
    }

    fn count_writes(yield_manager: &MockYieldManager, matches: impl Fn(&WriteCall) -> bool) -> usize {
        yield_manager.writes().iter().filter(|call| matches(call)).count()
    }

    #[tokio::test]
    async fn surplus_transfers_funds_and_reports() {
        let mut h = harness();
        h.yield_manager.set_reads(|reads| reads.reserve_balance = eth(400));
        reportable_yield(&h.yield_manager);

        let report = h.processor.process().await.unwrap();

        // raw surplus 300, clamped to the 180 quota
        assert_eq!(
            report.initial,
            Some(RebalanceRequirement::new(RebalanceDirection::Stake, eth(180)))
        );
        assert_eq!(h.message_service.transfers(), vec![eth(180)]);
        assert_eq!(
            h.yield_manager.writes(),
            vec![WriteCall::FundYieldProvider(eth(180)), WriteCall::ReportYield]
        );
        assert_eq!(h.accounting.submissions(), 1);
        assert!(h.withdrawals.requested().is_empty());
        assert!(report.failed_steps().is_empty());
        assert!(
            h.metrics
                .events()
                .contains(&MetricEvent::Rebalance(RebalanceDirection::Stake, wei_to_gwei(eth(180))))
        );
    }

    #[traced_test]
    #[tokio::test]
    async fn failed_transfer_skips_funding_but_still_reports() {
        let mut h = harness();
        h.yield_manager.set_reads(|reads| reads.reserve_balance = eth(400));
        reportable_yield(&h.yield_manager);
        h.message_service.fail_transfers();

        let report = h.processor.process().await.unwrap();

        assert_eq!(report.failed_steps(), vec!["transfer_funds"]);
        assert!(!report.attempted("fund_yield_provider"));
        assert_eq!(h.yield_manager.writes(), vec![WriteCall::ReportYield]);
        assert_eq!(h.metrics.step_failures(), vec!["transfer_funds"]);
        assert_eq!(h.metrics.count(|e| matches!(e, MetricEvent::Rebalance(..))), 0);
        assert!(logs_contain("Cycle step failed (tolerated)"));
    }

    #[tokio::test]
    async fn failed_funding_does_not_roll_back_transfer() {
        let mut h = harness();
        h.yield_manager.set_reads(|reads| reads.reserve_balance = eth(400));
        reportable_yield(&h.yield_manager);
        h.yield_manager.fail_write("fund_yield_provider");

        let report = h.processor.process().await.unwrap();

        assert_eq!(h.message_service.transfers(), vec![eth(180)]);
        assert_eq!(report.failed_steps(), vec!["fund_yield_provider"]);
        assert!(report.attempted("report_yield"));
        assert_eq!(count_writes(&h.yield_manager, |c| *c == WriteCall::ReportYield), 1);
    }

    #[tokio::test]
    async fn mid_cycle_deficit_amends_without_reporting_or_unpausing() {
        let mut h = harness();
        reportable_yield(&h.yield_manager);
        h.yield_manager.set_reads(|reads| {
            reads.reserve_balance = eth(2);
            reads.provider_state.is_staking_paused = true;
        });
        // initial read sees a surplus; later reads see the drained reserve
        h.yield_manager.script_reserve_balances([eth(400)]);

        let report = h.processor.process().await.unwrap();

        assert_eq!(report.initial.map(|r| r.direction()), Some(RebalanceDirection::Stake));
        assert_eq!(
            report.post_rebalance,
            Some(RebalanceRequirement::new(RebalanceDirection::Unstake, eth(98)))
        );
        assert_eq!(
            h.yield_manager.writes(),
            vec![
                WriteCall::FundYieldProvider(eth(180)),
                WriteCall::ReportYield,
                WriteCall::SafeAddToWithdrawalReserve(eth(98)),
            ]
        );
        assert!(!report.attempted("unpause_staking"));
        assert_eq!(h.withdrawals.requested(), vec![eth(98)]);
    }

    #[tokio::test]
    async fn initial_deficit_pauses_first_and_reports_before_top_up() {
        let mut h = harness();
        reportable_yield(&h.yield_manager);
        h.yield_manager.set_reads(|reads| reads.reserve_balance = eth(2));

        let report = h.processor.process().await.unwrap();

        assert_eq!(
            h.yield_manager.writes(),
            vec![
                WriteCall::PauseStaking,
                WriteCall::ReportYield,
                WriteCall::SafeAddToWithdrawalReserve(eth(98)),
            ]
        );
        assert!(!report.attempted("unpause_staking"));
        assert_eq!(h.withdrawals.requested(), vec![eth(98)]);
    }

    #[tokio::test]
    async fn unstake_metric_records_amount_actually_added() {
        let mut h = harness();
        h.yield_manager.set_reads(|reads| {
            reads.reserve_balance = eth(2);
            reads.yield_manager_balance = eth(10);
            reads.withdrawable_value = eth(20);
        });

        let report = h.processor.process().await.unwrap();

        assert_eq!(
            report.initial,
            Some(RebalanceRequirement::new(RebalanceDirection::Unstake, eth(98)))
        );
        assert_eq!(
            count_writes(&h.yield_manager, |c| *c
                == WriteCall::SafeAddToWithdrawalReserve(eth(30))),
            1
        );
        assert_eq!(
            h.metrics.count(|e| matches!(e, MetricEvent::Rebalance(RebalanceDirection::Unstake, _))),
            1
        );
        assert!(
            h.metrics
                .events()
                .contains(&MetricEvent::Rebalance(RebalanceDirection::Unstake, wei_to_gwei(eth(30))))
        );
    }

    #[tokio::test]
    async fn resolved_deficit_unpauses_staking() {
        let mut h = harness();
        h.yield_manager.set_reads(|reads| reads.reserve_balance = eth(100));
        h.yield_manager.script_reserve_balances([eth(2)]);

        let report = h.processor.process().await.unwrap();

        assert_eq!(h.yield_manager.writes().first(), Some(&WriteCall::PauseStaking));
        assert_eq!(h.yield_manager.writes().last(), Some(&WriteCall::UnpauseStaking));
        assert!(report.attempted("unpause_staking"));
        assert!(h.withdrawals.requested().is_empty());
    }

    #[tokio::test]
    async fn unpause_respects_feature_switch() {
        let mut h = harness_with(
            ProcessorSettings {
                is_unpause_staking_enabled: false,
                ..settings()
            },
            MockVaultReportEvents::silent(),
        );
        h.yield_manager
            .set_reads(|reads| reads.provider_state.is_staking_paused = true);

        h.processor.process().await.unwrap();

        assert_eq!(count_writes(&h.yield_manager, |c| *c == WriteCall::UnpauseStaking), 0);
    }

    #[tokio::test]
    async fn balanced_reserve_unpauses_staking_paused_before_cycle() {
        let mut h = harness();
        h.yield_manager
            .set_reads(|reads| reads.provider_state.is_staking_paused = true);

        h.processor.process().await.unwrap();

        assert_eq!(h.yield_manager.writes(), vec![WriteCall::UnpauseStaking]);
    }

    #[tokio::test]
    async fn balanced_reserve_sweeps_stranded_yield_manager_funds() {
        let mut h = harness_with(settings(), MockVaultReportEvents::silent());
        h.yield_manager.set_reads(|reads| {
            reads.yield_manager_balance = eth(5);
            reads.target_reserve_deficit = eth(2);
        });

        let report = h.processor.process().await.unwrap();

        assert_eq!(report.initial, Some(RebalanceRequirement::NONE));
        assert_eq!(
            h.yield_manager.writes(),
            vec![
                WriteCall::SafeWithdrawFromYieldProvider(eth(2)),
                WriteCall::FundYieldProvider(eth(5)),
            ]
        );
    }

    #[tokio::test]
    async fn sweep_skips_dust_balance() {
        let mut h = harness();
        let yield_manager = Arc::new(MockYieldManager::new().with_min_withdrawal_threshold(eth(1)));
        yield_manager.set_reads(|reads| {
            reads.total_system_balance = eth(1000);
            reads.target_reserve = eth(100);
            reads.reserve_balance = eth(100);
            reads.user_funds = eth(900);
            reads.dashboard_total_value = eth(900);
            reads.yield_manager_balance = eth(1);
        });
        h.processor.yield_manager = yield_manager.clone();

        h.processor.process().await.unwrap();

        assert!(yield_manager.writes().is_empty());
    }

    #[tokio::test]
    async fn yield_below_thresholds_is_not_reported() {
        let mut h = harness();
        h.yield_manager.set_reads(|reads| {
            reads.peeked = Some(YieldReport {
                yield_amount: eth(1) - U256::from(1),
                outstanding_negative_yield: U256::ZERO,
                yield_provider: PROVIDER,
            });
        });
        h.accounting.set_unpaid_fees(Some(U256::from(10)));

        let report = h.processor.process().await.unwrap();

        assert!(!report.attempted("report_yield"));
        assert!(h.metrics.events().contains(&MetricEvent::UnpaidProtocolFees(0)));
    }

    #[tokio::test]
    async fn unpaid_fees_alone_trigger_yield_report() {
        let mut h = harness();
        h.accounting.set_unpaid_fees(Some(eth(3)));

        let report = h.processor.process().await.unwrap();

        assert!(report.attempted("report_yield"));
        assert_eq!(h.metrics.count(|e| matches!(e, MetricEvent::ReportYield(_))), 1);
    }

    #[tokio::test]
    async fn negative_yield_growth_triggers_yield_report() {
        let mut h = harness_with(
            ProcessorSettings {
                min_negative_yield_diff_to_report_wei: Some(eth(1)),
                ..settings()
            },
            MockVaultReportEvents::silent(),
        );
        h.yield_manager.set_reads(|reads| {
            reads.peeked = Some(YieldReport {
                yield_amount: U256::ZERO,
                outstanding_negative_yield: eth(4),
                yield_provider: PROVIDER,
            });
            reads.provider_state.last_reported_negative_yield = eth(2);
        });

        let report = h.processor.process().await.unwrap();

        assert!(report.attempted("report_yield"));
    }

    #[tokio::test]
    async fn cycle_based_reporting_fires_every_n_cycles() {
        let mut h = harness_with(
            ProcessorSettings {
                cycles_per_yield_report: 2,
                ..settings()
            },
            MockVaultReportEvents::silent(),
        );

        let first = h.processor.process().await.unwrap();
        let second = h.processor.process().await.unwrap();

        assert!(!first.attempted("report_yield"));
        assert!(second.attempted("report_yield"));
        assert_eq!(second.cycle, 2);
    }

    #[tokio::test]
    async fn default_reporting_config_skips_zero_yield() {
        let defaults = crate::config::ReportingConfig::default();
        let mut h = harness_with(
            ProcessorSettings {
                min_positive_yield_to_report_wei: defaults.min_positive_yield_to_report_wei,
                min_unpaid_protocol_fees_to_report_wei: defaults
                    .min_unpaid_protocol_fees_to_report_wei,
                ..settings()
            },
            MockVaultReportEvents::silent(),
        );
        h.yield_manager.set_reads(|reads| {
            reads.peeked = Some(YieldReport {
                yield_amount: U256::ZERO,
                outstanding_negative_yield: U256::ZERO,
                yield_provider: PROVIDER,
            });
        });
        h.accounting.set_unpaid_fees(Some(U256::ZERO));

        for _ in 0..3 {
            let report = h.processor.process().await.unwrap();
            assert!(!report.attempted("report_yield"));
        }

        assert_eq!(count_writes(&h.yield_manager, |c| *c == WriteCall::ReportYield), 0);
    }

    #[tokio::test]
    async fn master_switch_disables_yield_reporting() {
        let mut h = harness_with(
            ProcessorSettings {
                should_report_yield: false,
                ..settings()
            },
            MockVaultReportEvents::silent(),
        );
        reportable_yield(&h.yield_manager);

        let report = h.processor.process().await.unwrap();

        assert!(!report.attempted("report_yield"));
        assert!(h.yield_manager.writes().is_empty());
    }

    #[tokio::test]
    async fn fresh_vault_report_is_not_resubmitted() {
        let mut h = harness();
        h.accounting.set_fresh(true);

        let report = h.processor.process().await.unwrap();

        assert_eq!(h.accounting.submissions(), 0);
        assert!(!report.attempted("submit_vault_report"));
    }

    #[tokio::test]
    async fn failed_vault_report_does_not_block_yield_report() {
        let mut h = harness();
        reportable_yield(&h.yield_manager);
        h.accounting.fail_submit();

        let report = h.processor.process().await.unwrap();

        assert_eq!(report.failed_steps(), vec!["submit_vault_report"]);
        assert!(report.attempted("report_yield"));
        assert_eq!(
            h.metrics
                .count(|e| matches!(e, MetricEvent::VaultAccountingReport(_))),
            0
        );
    }

    #[tokio::test]
    async fn vault_report_submission_can_be_disabled() {
        let mut h = harness_with(
            ProcessorSettings {
                should_submit_vault_report: false,
                ..settings()
            },
            MockVaultReportEvents::silent(),
        );

        h.processor.process().await.unwrap();

        assert_eq!(h.accounting.submissions(), 0);
    }

    #[tokio::test]
    async fn failed_beacon_withdrawal_is_recorded() {
        let mut h = harness();
        h.yield_manager.set_reads(|reads| reads.reserve_balance = eth(2));
        h.withdrawals.fail();

        let report = h.processor.process().await.unwrap();

        assert_eq!(report.failed_steps(), vec!["beacon_withdrawal"]);
        assert_eq!(h.metrics.step_failures(), vec!["beacon_withdrawal"]);
    }

    #[tokio::test]
    async fn read_failures_are_contained() {
        let mut h = harness();
        h.yield_manager.fail_reads(true);

        let report = h.processor.process().await.unwrap();

        assert!(report.failed_steps().contains(&"initial_assessment"));
        assert!(report.failed_steps().contains(&"ending_check"));
        assert!(h.yield_manager.writes().is_empty());
        assert!(h.withdrawals.requested().is_empty());
        assert_eq!(h.metrics.count(|e| *e == MetricEvent::CycleDuration), 1);
    }

    #[tokio::test]
    async fn cycle_duration_is_recorded() {
        let mut h = harness();

        h.processor.process().await.unwrap();

        assert_eq!(h.metrics.count(|e| *e == MetricEvent::CycleDuration), 1);
    }

    #[tokio::test]
    async fn event_trigger_starts_cycle() {
        let update = VaultReportUpdate {
            timestamp: U256::from(1),
            ref_slot: U256::from(2),
            root: alloy::primitives::B256::ZERO,
            cid: "bafy".to_string(),
        };
        let mut h = harness_with(
            ProcessorSettings {
                max_inaction: Duration::from_secs(3600),
                ..settings()
            },
            MockVaultReportEvents::new(vec![Script::Event(update.clone())]),
        );

        let report = h.processor.process().await.unwrap();

        assert_eq!(report.trigger, TriggerOutcome::Event(update));
        assert_eq!(h.trigger.released.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn trigger_failure_aborts_before_any_step() {
        let mut h = harness_with(
            ProcessorSettings {
                max_inaction: Duration::from_secs(3600),
                ..settings()
            },
            MockVaultReportEvents::new(vec![Script::Ended]),
        );

        let result = h.processor.process().await;

        assert!(matches!(result, Err(TriggerError::StreamEnded)));
        assert_eq!(h.yield_manager.peek_calls(), 0);
        assert_eq!(h.trigger.released.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
