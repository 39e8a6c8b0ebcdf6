//! New-block monitor.
//!
//! Subscribes to new heads over WebSocket RPC and runs the block pipeline for
//! every block, one at a time, in arrival order.
//!
//! Features:
//! - Automatic reconnection with URL rotation and exponential backoff
//! - Block ordering guard: duplicates are skipped, gaps are reported loudly
//!   (missed blocks are not backfilled), a tip re-announced with a new hash is
//!   checked again
//! - Per-block processing latency fed into [`MonitorMetrics`]

use crate::alert::{Alert, AlertDispatcher, Severity};
use crate::config::RpcConfig;
use crate::metrics::MonitorMetrics;
use crate::onchain::source::{PoolSource, RpcPoolSource};
use crate::pipeline::{Admission, BlockPipeline, BlockReport, BlockSequencer};

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Sequencing and bookkeeping around [`BlockPipeline::process_block`].
/// Survives reconnects, so ordering is enforced across sessions.
pub struct BlockDriver {
    sequencer: BlockSequencer,
    metrics: Arc<Mutex<MonitorMetrics>>,
}

impl BlockDriver {
    pub fn new(metrics: Arc<Mutex<MonitorMetrics>>) -> Self {
        Self {
            sequencer: BlockSequencer::new(),
            metrics,
        }
    }

    pub fn last_processed(&self) -> Option<u64> {
        self.sequencer.last_processed()
    }

    /// Run one block through the pipeline. Failures are logged and counted
    /// but never propagate: the next block is processed regardless.
    pub async fn handle_block<S: PoolSource>(
        &mut self,
        pipeline: &BlockPipeline<S>,
        block_number: u64,
        block_hash: Option<B256>,
    ) -> Option<BlockReport> {
        info!(block = block_number, hash = ?block_hash, "new block found");

        match self.sequencer.admit(block_number, block_hash) {
            Admission::Stale { last_processed } if block_number < last_processed => {
                warn!(
                    block = block_number,
                    last_processed, "older block re-announced, possible deep reorg, skipping"
                );
                self.metrics.lock().await.record_stale();
                return None;
            }
            Admission::Stale { last_processed } => {
                debug!(block = block_number, last_processed, "block already processed, skipping");
                self.metrics.lock().await.record_stale();
                return None;
            }
            Admission::Reorg { .. } => {
                warn!(
                    block = block_number,
                    hash = ?block_hash,
                    "block re-announced with a new hash, checking the canonical block again"
                );
                self.metrics.lock().await.record_reorg();
            }
            Admission::Gap { from, to } => {
                let missed = to - from + 1;
                error!(
                    block = block_number,
                    missed_from = from,
                    missed_to = to,
                    missed,
                    "block gap: blocks were not processed and will not be backfilled"
                );
                self.metrics.lock().await.record_gap(missed);
                pipeline.alert(Alert::new(
                    Severity::Error,
                    format!(
                        "⚠️ Block gap: blocks {from}..={to} ({missed}) were not checked \
                         before block {block_number}"
                    ),
                ));
            }
            Admission::First | Admission::Next => {}
        }

        let started = Instant::now();
        match pipeline.process_block(block_number).await {
            Ok(report) => {
                self.sequencer.mark_processed(block_number, block_hash);
                self.metrics
                    .lock()
                    .await
                    .record_block(&report, started.elapsed());
                Some(report)
            }
            Err(e) => {
                error!(
                    block = block_number,
                    error = %e,
                    "block processing failed, block not marked processed"
                );
                self.metrics.lock().await.record_failure();
                None
            }
        }
    }
}

/// The monitor that subscribes to new blocks and drives the pipeline.
pub struct BlockMonitor {
    config: RpcConfig,
    pool_address: Address,
    dispatcher: AlertDispatcher,
    verbose: bool,
    driver: BlockDriver,
}

impl BlockMonitor {
    pub fn new(
        config: RpcConfig,
        pool_address: Address,
        dispatcher: AlertDispatcher,
        verbose: bool,
        metrics: Arc<Mutex<MonitorMetrics>>,
    ) -> Self {
        Self {
            config,
            pool_address,
            dispatcher,
            verbose,
            driver: BlockDriver::new(metrics),
        }
    }

    /// Start the monitor in a background task. Returns immediately.
    /// The monitor will reconnect automatically on WebSocket failures.
    pub fn start(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_forever().await;
        })
    }

    /// Build the list of WebSocket URLs to rotate through: primary first, then fallbacks.
    fn ws_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        if !self.config.ws_url.is_empty() {
            urls.push(self.config.ws_url.clone());
        }
        for url in &self.config.fallback_ws_urls {
            if !url.is_empty() && !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }

    /// Main loop: connect, subscribe, process blocks, reconnect on failure.
    async fn run_forever(&mut self) {
        let urls = self.ws_urls();
        if urls.is_empty() {
            error!("no WebSocket RPC URLs configured (primary or fallback)");
            return;
        }
        let mut url_index = 0;
        let mut consecutive_failures: usize = 0;

        loop {
            let url = urls[url_index].clone();
            info!(
                url = %url,
                provider = url_index + 1,
                total = urls.len(),
                "connecting to WebSocket RPC"
            );

            match self.run_session_with_url(&url).await {
                Ok(()) => {
                    info!("block subscription ended cleanly");
                    consecutive_failures = 0;
                }
                Err(e) => {
                    error!(url = %url, error = %e, "WebSocket session error");
                    consecutive_failures += 1;
                    url_index = (url_index + 1) % urls.len();
                }
            }

            let backoff = reconnect_backoff(
                consecutive_failures,
                urls.len(),
                Duration::from_secs(self.config.max_backoff_secs),
            );
            info!(
                backoff_secs = backoff.as_secs(),
                next_url = %urls[url_index],
                failures = consecutive_failures,
                "reconnecting to WebSocket RPC"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    /// A single WebSocket session: connect, subscribe, process live blocks.
    async fn run_session_with_url(&mut self, url: &str) -> anyhow::Result<()> {
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(url))
            .await?
            .erased();

        let current_block = provider.get_block_number().await?;
        info!(
            block = current_block,
            last_processed = ?self.driver.last_processed(),
            "connected, streaming new blocks forward"
        );

        let source = RpcPoolSource::new(
            self.pool_address,
            provider.clone(),
            Duration::from_secs(self.config.request_timeout_secs),
        );
        let pipeline = BlockPipeline::new(source, self.dispatcher.clone(), self.verbose);

        let sub = provider.subscribe_blocks().await?;
        let mut stream = sub.into_stream();
        info!(pool = %self.pool_address, "subscribed to new blocks");

        while let Some(header) = stream.next().await {
            self.driver
                .handle_block(&pipeline, header.number, Some(header.hash))
                .await;
        }

        warn!("block stream ended");
        Ok(())
    }
}

/// Backoff scales with how many providers have failed in a row. Untried
/// providers in the current rotation are attempted quickly; a real backoff
/// only starts once all have failed.
fn reconnect_backoff(consecutive_failures: usize, providers: usize, max: Duration) -> Duration {
    if consecutive_failures == 0 {
        Duration::from_secs(1)
    } else if consecutive_failures < providers {
        Duration::from_secs(2)
    } else {
        let cycle = consecutive_failures / providers.max(1);
        let secs = 2u64.pow(cycle.min(5) as u32).min(max.as_secs());
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::tests::RecordingTransport;
    use crate::alert::AlertTransport;
    use crate::onchain::source::SourceError;
    use crate::onchain::types::{EventLocation, EventPayload, Liquidity, PoolEvent};
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Every block has one Mint; blocks listed in `broken` fail their state query.
    #[derive(Default)]
    struct FlakyPool {
        broken: HashSet<u64>,
    }

    #[async_trait]
    impl PoolSource for FlakyPool {
        async fn pool_liquidity_at(&self, block_number: u64) -> Result<Liquidity, SourceError> {
            if self.broken.contains(&(block_number + 1)) {
                return Err(SourceError::Timeout {
                    what: "pool state query",
                    after: Duration::from_secs(1),
                });
            }
            Ok(100)
        }

        async fn pool_events_in_block(
            &self,
            block_number: u64,
        ) -> Result<Vec<PoolEvent>, SourceError> {
            Ok(vec![PoolEvent::new(
                EventLocation::new(block_number, 0, 0),
                EventPayload::Mint { liquidity_delta: 1 },
            )])
        }

        async fn position_locked_liquidity(
            &self,
            _key: B256,
            _block: u64,
        ) -> Result<Liquidity, SourceError> {
            Ok(0)
        }
    }

    fn metrics() -> Arc<Mutex<MonitorMetrics>> {
        Arc::new(Mutex::new(MonitorMetrics::new()))
    }

    #[tokio::test]
    async fn test_driver_skips_stale_and_counts() {
        let metrics = metrics();
        let mut driver = BlockDriver::new(metrics.clone());
        let pipeline = BlockPipeline::new(
            FlakyPool::default(),
            AlertDispatcher::disabled(Severity::Error),
            false,
        );

        assert!(driver.handle_block(&pipeline, 10, None).await.is_some());
        assert!(driver.handle_block(&pipeline, 11, None).await.is_some());
        assert!(driver.handle_block(&pipeline, 11, None).await.is_none());
        assert!(driver.handle_block(&pipeline, 9, None).await.is_none());

        let m = metrics.lock().await;
        assert_eq!(m.blocks_processed, 2);
        assert_eq!(m.blocks_stale, 2);
        assert_eq!(m.last_block, Some(11));
    }

    #[tokio::test]
    async fn test_failed_block_alerts_gap_at_default_threshold() {
        let metrics = metrics();
        let mut driver = BlockDriver::new(metrics.clone());

        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, handle) = AlertDispatcher::spawn(
            Some(transport.clone() as Arc<dyn AlertTransport>),
            Severity::Error,
        );
        let pool = FlakyPool {
            broken: HashSet::from([21]),
        };
        let pipeline = BlockPipeline::new(pool, dispatcher, false);

        assert!(driver.handle_block(&pipeline, 20, None).await.is_some());
        assert!(driver.handle_block(&pipeline, 21, None).await.is_none());
        assert_eq!(driver.last_processed(), Some(20));
        assert!(driver.handle_block(&pipeline, 22, None).await.is_some());

        {
            let m = metrics.lock().await;
            assert_eq!(m.blocks_failed, 1);
            assert_eq!(m.gaps, 1);
            assert_eq!(m.blocks_missed, 1);
        }

        drop(pipeline);
        handle.unwrap().await.unwrap();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("blocks 21..=21"));
    }

    #[tokio::test]
    async fn test_reannounced_tip_with_new_hash_is_processed_again() {
        let metrics = metrics();
        let mut driver = BlockDriver::new(metrics.clone());
        let pipeline = BlockPipeline::new(
            FlakyPool::default(),
            AlertDispatcher::disabled(Severity::Error),
            false,
        );
        let original = Some(B256::repeat_byte(0xa1));
        let canonical = Some(B256::repeat_byte(0xb2));

        assert!(driver.handle_block(&pipeline, 30, original).await.is_some());
        assert!(driver.handle_block(&pipeline, 30, original).await.is_none());
        assert!(driver.handle_block(&pipeline, 30, canonical).await.is_some());
        assert!(driver.handle_block(&pipeline, 30, canonical).await.is_none());
        assert!(driver.handle_block(&pipeline, 31, None).await.is_some());

        let m = metrics.lock().await;
        assert_eq!(m.reorgs, 1);
        assert_eq!(m.blocks_processed, 3);
        assert_eq!(m.blocks_stale, 2);
        assert_eq!(m.gaps, 0);
    }

    #[test]
    fn test_backoff_rotates_fast_then_grows() {
        let max = Duration::from_secs(60);
        assert_eq!(reconnect_backoff(0, 3, max), Duration::from_secs(1));
        assert_eq!(reconnect_backoff(2, 3, max), Duration::from_secs(2));
        assert_eq!(reconnect_backoff(3, 3, max), Duration::from_secs(2));
        assert_eq!(reconnect_backoff(6, 3, max), Duration::from_secs(4));
        assert_eq!(reconnect_backoff(300, 3, max), Duration::from_secs(32));
        assert_eq!(
            reconnect_backoff(300, 3, Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }
}
