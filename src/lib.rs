use std::sync::Arc;
use std::time::Duration;

use alloy::providers::Provider;
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{error, info, info_span, warn};

use native_yield_evm::local::connect_http;
use native_yield_evm::{Evm, Wallet};

pub mod accounting;
pub mod beacon;
mod bindings;
pub mod config;
pub mod gauges;
pub mod message_service;
pub mod metrics;
pub mod processor;
pub mod rebalance;
mod telemetry;
pub mod trigger;
pub mod yield_manager;

pub use config::{Ctx, Env, LogLevel, setup_tracing};
pub use telemetry::{TelemetryError, TelemetryGuard};

use crate::accounting::VaultAccountingClient;
use crate::beacon::{BeaconChainStakingClient, HttpValidatorDataSource};
use crate::gauges::GaugeMetricsPoller;
use crate::message_service::MessageServiceContractClient;
use crate::metrics::PrometheusStyleMetrics;
use crate::processor::{ProcessorDeps, YieldReportingProcessor};
use crate::rebalance::RebalanceCalculator;
use crate::trigger::{LazyOracleEvents, TriggerError};
use crate::yield_manager::{YieldManager, YieldManagerContractClient};

/// Pause after a failed trigger wait before watching again.
const TRIGGER_RETRY_DELAY: Duration = Duration::from_secs(12);

pub async fn launch(ctx: Ctx) -> anyhow::Result<()> {
    let launch_span = info_span!("launch");
    let _enter = launch_span.enter();

    let wallet = Arc::new(connect_http(
        ctx.l1_rpc_url.clone(),
        &ctx.private_key,
        ctx.required_confirmations,
    )?);

    let chain_id = wallet.provider().get_chain_id().await?;
    if chain_id != ctx.chain_id {
        anyhow::bail!("RPC chain id {chain_id} does not match configured {}", ctx.chain_id);
    }

    info!(
        signer = %wallet.address(),
        chain_id,
        yield_provider = %ctx.contracts.yield_provider,
        "Starting native yield automation"
    );

    let metrics = PrometheusStyleMetrics;

    let yield_manager = Arc::new(YieldManagerContractClient::new(
        wallet.clone(),
        ctx.contracts.yield_manager,
        ctx.rebalance.min_withdrawal_threshold_eth,
    ));

    let validators = HttpValidatorDataSource::new(
        ctx.data_sources.staking_graphql_url.clone(),
        ctx.data_sources.beacon_api_url.clone(),
    );

    let withdrawals = BeaconChainStakingClient::new(
        validators.clone(),
        yield_manager.clone(),
        metrics,
        ctx.contracts.yield_provider,
        ctx.rebalance.max_validator_withdrawal_requests_per_transaction,
        ctx.rebalance.min_withdrawal_threshold_eth,
    );

    let deps = ProcessorDeps {
        yield_manager: yield_manager.clone(),
        message_service: Arc::new(MessageServiceContractClient::new(
            wallet.clone(),
            ctx.contracts.message_service,
        )),
        accounting: Arc::new(VaultAccountingClient::new(
            wallet.clone(),
            ctx.contracts.lazy_oracle,
            ctx.contracts.vault_hub,
            ctx.data_sources.ipfs_base_url.clone(),
        )),
        withdrawals: Arc::new(withdrawals),
        trigger: Arc::new(LazyOracleEvents::new(
            wallet.provider().clone(),
            ctx.contracts.lazy_oracle,
        )),
        metrics,
        calculator: RebalanceCalculator::new(
            metrics,
            ctx.rebalance.quota_window_size_in_cycles,
            ctx.rebalance.quota_bps,
            ctx.rebalance.tolerance_amount_wei,
        ),
    };

    let processor = YieldReportingProcessor::new(deps, ctx.processor_settings());
    let poller = GaugeMetricsPoller::new(validators, yield_manager, metrics, ctx.gauge_poll_interval);

    let gauge_task = tokio::spawn(poller.run());
    let processor_task = tokio::spawn(run_processor(processor));

    await_shutdown(gauge_task, processor_task).await;

    info!("Shutdown complete");
    Ok(())
}

/// Runs cycles until aborted. A failed trigger wait is logged and the
/// next cycle starts after [`TRIGGER_RETRY_DELAY`].
async fn run_processor<Y, S, A, B, T, M>(mut processor: YieldReportingProcessor<Y, S, A, B, T, M>)
where
    Y: YieldManager,
    S: message_service::MessageService,
    A: accounting::VaultAccounting,
    B: beacon::WithdrawalRequester,
    T: trigger::VaultReportEvents,
    M: metrics::YieldMetrics,
{
    loop {
        if let Err(error) = processor.process().await {
            log_trigger_failure(&error);
            tokio::time::sleep(TRIGGER_RETRY_DELAY).await;
        }
    }
}

fn log_trigger_failure(error: &TriggerError) {
    error!(?error, retry_in = ?TRIGGER_RETRY_DELAY, "Cycle aborted waiting for trigger");
}

async fn await_shutdown(gauge_task: JoinHandle<()>, processor_task: JoinHandle<()>) {
    let gauge_abort = gauge_task.abort_handle();
    let processor_abort = processor_task.abort_handle();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            abort_task("gauge poller", &gauge_abort);
            abort_task("processor", &processor_abort);
        }
        result = processor_task => {
            log_task_exit("processor", result);
            abort_task("gauge poller", &gauge_abort);
        }
        result = gauge_task => {
            log_task_exit("gauge poller", result);
            abort_task("processor", &processor_abort);
        }
    }
}

fn abort_task(name: &str, handle: &AbortHandle) {
    info!("Aborting {name} task");
    handle.abort();
}

fn log_task_exit(name: &str, result: Result<(), JoinError>) {
    match result {
        Ok(()) => warn!("{name} task exited unexpectedly"),
        Err(error) => error!(?error, "{name} task failed"),
    }
}
