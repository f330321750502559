//! Cycle trigger: the next `VaultsReportDataUpdated` event on the
//! LazyOracle, or the max-inaction timeout, whichever comes first.

use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use alloy::providers::Provider;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tracing::{debug, info, warn};

use crate::bindings::ILazyOracle;

#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("failed to install event watcher: {0}")]
    Transport(#[from] alloy::transports::TransportError),
    #[error("failed to decode event: {0}")]
    Decode(#[from] alloy::sol_types::Error),
    #[error("event stream ended")]
    StreamEnded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultReportUpdate {
    pub timestamp: U256,
    pub ref_slot: U256,
    pub root: B256,
    pub cid: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Event(VaultReportUpdate),
    Timeout,
}

pub type VaultReportStream = BoxStream<'static, Result<VaultReportUpdate, TriggerError>>;

#[async_trait]
pub trait VaultReportEvents: Send + Sync {
    /// Installs a watcher. Dropping the stream uninstalls it.
    async fn watch(&self) -> Result<VaultReportStream, TriggerError>;
}

pub struct LazyOracleEvents<P> {
    provider: P,
    lazy_oracle: Address,
}

impl<P> LazyOracleEvents<P> {
    pub fn new(provider: P, lazy_oracle: Address) -> Self {
        Self {
            provider,
            lazy_oracle,
        }
    }
}

#[async_trait]
impl<P> VaultReportEvents for LazyOracleEvents<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    async fn watch(&self) -> Result<VaultReportStream, TriggerError> {
        let oracle = ILazyOracle::new(self.lazy_oracle, self.provider.clone());
        let stream = oracle
            .VaultsReportDataUpdated_filter()
            .watch()
            .await?
            .into_stream();

        Ok(stream
            .map(|result| {
                result
                    .map(|(event, _log)| VaultReportUpdate {
                        timestamp: event.timestamp,
                        ref_slot: event.refSlot,
                        root: event.root,
                        cid: event.cid,
                    })
                    .map_err(TriggerError::from)
            })
            .boxed())
    }
}

/// Races the next report event against `max_inaction`. The watcher is
/// dropped before returning on every path.
pub async fn wait_for_trigger<E: VaultReportEvents + ?Sized>(
    events: &E,
    max_inaction: Duration,
) -> Result<TriggerOutcome, TriggerError> {
    let mut stream = events.watch().await?;
    debug!(?max_inaction, "Waiting for VaultsReportDataUpdated event");

    let outcome = tokio::select! {
        next = stream.next() => match next {
            Some(Ok(update)) => {
                info!(cid = %update.cid, ref_slot = %update.ref_slot, "VaultsReportDataUpdated received");
                Ok(TriggerOutcome::Event(update))
            }
            Some(Err(error)) => Err(error),
            None => Err(TriggerError::StreamEnded),
        },
        () = tokio::time::sleep(max_inaction) => {
            info!(?max_inaction, "Max inaction timeout reached, triggering cycle");
            Ok(TriggerOutcome::Timeout)
        }
    };

    drop(stream);
    if let Err(error) = &outcome {
        warn!(?error, "Trigger wait failed");
    }
    debug!("Event watcher released");

    outcome
}
