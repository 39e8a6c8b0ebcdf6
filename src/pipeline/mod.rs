//! Per-block processing pipeline.
//!
//! `Fetch → Sort → Replay (+ check each close) → Summarize → Dispatch`
//!
//! Each block independently reads the pool liquidity at the end of the prior
//! block, so nothing is carried over in memory between invocations. A failed
//! query aborts the block before any alert is sent or summary returned.

pub mod sequencer;

use crate::alert::{Alert, AlertDispatcher};
use crate::invariant::{InvariantChecker, InvariantError, InvariantResult};
use crate::onchain::source::{PoolSource, SourceError};
use crate::replay::{self, ReplayError};
use crate::summary::BlockSummary;
use futures::future::try_join_all;
use thiserror::Error;
use tracing::{debug, error, info};

pub use sequencer::{Admission, BlockSequencer};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("block 0 has no prior block to read liquidity from")]
    GenesisBlock,
    #[error("chain query failed: {0}")]
    Source(#[from] SourceError),
    #[error("replay failed: {0}")]
    Replay(#[from] ReplayError),
}

impl From<InvariantError> for PipelineError {
    fn from(e: InvariantError) -> Self {
        match e {
            InvariantError::GenesisBlock => PipelineError::GenesisBlock,
            InvariantError::Source(e) => PipelineError::Source(e),
        }
    }
}

/// What a processed block hands back to the caller.
#[derive(Debug, Clone)]
pub struct BlockReport {
    pub summary: BlockSummary,
    pub checks: Vec<InvariantResult>,
}

impl BlockReport {
    pub fn breaches(&self) -> usize {
        self.checks.iter().filter(|c| c.is_breach()).count()
    }
}

pub struct BlockPipeline<S: PoolSource> {
    source: S,
    dispatcher: AlertDispatcher,
    /// Log passing checks at info instead of debug.
    verbose: bool,
}

impl<S: PoolSource> BlockPipeline<S> {
    pub fn new(source: S, dispatcher: AlertDispatcher, verbose: bool) -> Self {
        Self {
            source,
            dispatcher,
            verbose,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn process_block(&self, block_number: u64) -> Result<BlockReport, PipelineError> {
        let prior_block = block_number
            .checked_sub(1)
            .ok_or(PipelineError::GenesisBlock)?;

        // Pool state via eth_call reflects every transaction in the block.
        let liquidity_start = self.source.pool_liquidity_at(prior_block).await?;
        debug!(
            block = block_number,
            prior_block,
            liquidity = liquidity_start,
            "pool liquidity at end of prior block"
        );

        let mut events = self.source.pool_events_in_block(block_number).await?;
        replay::sort_events(&mut events);

        let replay = replay::replay(block_number, &events, liquidity_start)?;

        // Distinct positions are independent; results stay in event order.
        let checker = InvariantChecker::new(&self.source);
        let checks = try_join_all(
            replay
                .closes
                .iter()
                .map(|close| checker.check_close(*close)),
        )
        .await?;

        for check in &checks {
            self.report_check(check);
        }

        let summary = replay.summary;
        info!(
            block = block_number,
            events = summary.counts.total(),
            opened = summary.opened,
            closed = summary.closed,
            liquidity_delta = summary.liquidity_delta,
            "{}",
            summary
        );

        Ok(BlockReport { summary, checks })
    }

    fn report_check(&self, check: &InvariantResult) {
        let c = &check.close;
        if check.is_breach() {
            error!(
                block = c.block_number,
                event = %c.kind,
                position = %c.id,
                owner = %c.owner,
                key = %check.position_key,
                locked = check.liquidity_locked,
                returned = check.liquidity_returned,
                lost = check.liquidity_lost().unwrap_or_default(),
                "INVARIANT BREACH: position closed with less liquidity than locked"
            );
        } else if self.verbose {
            info!(
                block = c.block_number,
                event = %c.kind,
                position = %c.id,
                locked = check.liquidity_locked,
                returned = check.liquidity_returned,
                ratio = ?check.ratio,
                "position close invariant holds"
            );
        } else {
            debug!(
                block = c.block_number,
                event = %c.kind,
                position = %c.id,
                ratio = ?check.ratio,
                "position close invariant holds"
            );
        }

        self.dispatcher.dispatch(check.to_alert());
    }

    /// Forward an out-of-band alert (gaps, failures) through the same filter.
    pub fn alert(&self, alert: Alert) -> bool {
        self.dispatcher.dispatch(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::tests::RecordingTransport;
    use crate::alert::{AlertTransport, Severity};
    use crate::onchain::types::{EventLocation, EventPayload, Liquidity, PoolEvent};
    use crate::position::derive_position_key;
    use alloy::primitives::aliases::U96;
    use alloy::primitives::{Address, B256};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// In-memory pool keyed by block number.
    #[derive(Default)]
    struct FakePool {
        liquidity: HashMap<u64, Liquidity>,
        events: HashMap<u64, Vec<PoolEvent>>,
        locked: HashMap<(B256, u64), Liquidity>,
        fail_positions: bool,
        position_queries: Mutex<Vec<(B256, u64)>>,
    }

    #[async_trait]
    impl PoolSource for FakePool {
        async fn pool_liquidity_at(&self, block_number: u64) -> Result<Liquidity, SourceError> {
            Ok(self.liquidity.get(&block_number).copied().unwrap_or_default())
        }

        async fn pool_events_in_block(
            &self,
            block_number: u64,
        ) -> Result<Vec<PoolEvent>, SourceError> {
            Ok(self.events.get(&block_number).cloned().unwrap_or_default())
        }

        async fn position_locked_liquidity(
            &self,
            key: B256,
            block_number: u64,
        ) -> Result<Liquidity, SourceError> {
            self.position_queries.lock().unwrap().push((key, block_number));
            if self.fail_positions {
                return Err(SourceError::MalformedEvent("node unavailable".to_string()));
            }
            Ok(self.locked.get(&(key, block_number)).copied().unwrap_or_default())
        }
    }

    const BLOCK: u64 = 500;

    fn owner() -> Address {
        Address::repeat_byte(0x5e)
    }

    fn ev(tx: u64, log: u64, payload: EventPayload) -> PoolEvent {
        PoolEvent::new(EventLocation::new(BLOCK, tx, log), payload)
    }

    type Recording = (Arc<RecordingTransport>, AlertDispatcher, tokio::task::JoinHandle<()>);

    fn open(id: U96, liquidity_after: Liquidity) -> EventPayload {
        EventPayload::Open { owner: owner(), id, liquidity_after }
    }

    fn settle(id: U96, liquidity_after: Liquidity) -> EventPayload {
        EventPayload::Settle { owner: owner(), id, liquidity_after }
    }

    fn liquidate(id: U96, liquidity_after: Liquidity) -> EventPayload {
        EventPayload::Liquidate { owner: owner(), id, liquidity_after }
    }

    fn recording(threshold: Severity) -> Recording {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, handle) =
            AlertDispatcher::spawn(Some(transport.clone() as Arc<dyn AlertTransport>), threshold);
        (transport, dispatcher, handle.unwrap())
    }

    #[tokio::test]
    async fn test_single_open_block() {
        let mut pool = FakePool::default();
        pool.liquidity.insert(BLOCK - 1, 400);
        pool.events.insert(
            BLOCK,
            vec![ev(0, 0, open(U96::from(1u64), 1000))],
        );

        let pipeline = BlockPipeline::new(pool, AlertDispatcher::disabled(Severity::Debug), false);
        let report = pipeline.process_block(BLOCK).await.unwrap();

        assert_eq!(report.summary.opened, 1);
        assert_eq!(report.summary.closed, 0);
        assert_eq!(report.summary.liquidity_delta, 600);
        assert!(report.checks.is_empty());
    }

    #[tokio::test]
    async fn test_breach_is_alerted_at_error() {
        let id = U96::from(7u64);
        let key = derive_position_key(owner(), id);

        let mut pool = FakePool::default();
        pool.liquidity.insert(BLOCK - 1, 500);
        pool.events.insert(
            BLOCK,
            vec![ev(3, 1, settle(id, 480))],
        );
        pool.locked.insert((key, BLOCK - 1), 50);

        let (transport, dispatcher, handle) = recording(Severity::Error);
        let pipeline = BlockPipeline::new(pool, dispatcher, false);
        let report = pipeline.process_block(BLOCK).await.unwrap();

        assert_eq!(report.breaches(), 1);
        assert_eq!(report.checks[0].liquidity_returned, -20);
        assert_eq!(
            *pipeline.source().position_queries.lock().unwrap(),
            vec![(key, BLOCK - 1)]
        );

        drop(pipeline);
        handle.await.unwrap();
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("URGENT"));
    }

    #[tokio::test]
    async fn test_pass_respects_threshold() {
        let id = U96::from(9u64);
        let key = derive_position_key(owner(), id);

        let build = || {
            let mut pool = FakePool::default();
            pool.liquidity.insert(BLOCK - 1, 500);
            pool.events.insert(
                BLOCK,
                vec![ev(0, 0, liquidate(id, 600))],
            );
            pool.locked.insert((key, BLOCK - 1), 80);
            pool
        };

        let (quiet, dispatcher, handle) = recording(Severity::Error);
        let pipeline = BlockPipeline::new(build(), dispatcher, false);
        let report = pipeline.process_block(BLOCK).await.unwrap();
        assert_eq!(report.breaches(), 0);
        assert_eq!(report.checks[0].ratio, Some(1.25));
        drop(pipeline);
        handle.await.unwrap();
        assert!(quiet.sent.lock().unwrap().is_empty());

        let (loud, dispatcher, handle) = recording(Severity::Success);
        let pipeline = BlockPipeline::new(build(), dispatcher, true);
        pipeline.process_block(BLOCK).await.unwrap();
        drop(pipeline);
        handle.await.unwrap();
        let sent = loud.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("OK"));
    }

    #[tokio::test]
    async fn test_unsorted_logs_are_replayed_in_execution_order() {
        let mut pool = FakePool::default();
        pool.liquidity.insert(BLOCK - 1, 1_000);
        pool.events.insert(
            BLOCK,
            vec![
                ev(1, 4, EventPayload::Burn { liquidity_delta: 200 }),
                ev(0, 9, EventPayload::Mint { liquidity_delta: 200 }),
                ev(0, 2, EventPayload::Swap { liquidity: 1_500 }),
            ],
        );

        let pipeline = BlockPipeline::new(pool, AlertDispatcher::disabled(Severity::Error), false);
        let report = pipeline.process_block(BLOCK).await.unwrap();

        // swap -> 1500, mint -> 1700, burn -> 1500
        assert_eq!(report.summary.liquidity_end, 1_500);
        assert_eq!(report.summary.liquidity_delta, 500);
    }

    #[tokio::test]
    async fn test_query_failure_aborts_without_alerts() {
        let mut pool = FakePool::default();
        pool.liquidity.insert(BLOCK - 1, 500);
        pool.events.insert(
            BLOCK,
            vec![
                ev(0, 0, settle(U96::from(1u64), 100)),
                ev(0, 1, settle(U96::from(2u64), 50)),
            ],
        );
        pool.fail_positions = true;

        let (transport, dispatcher, handle) = recording(Severity::Debug);
        let pipeline = BlockPipeline::new(pool, dispatcher, false);
        let err = pipeline.process_block(BLOCK).await.unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));

        drop(pipeline);
        handle.await.unwrap();
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_genesis_block_rejected() {
        let pipeline = BlockPipeline::new(
            FakePool::default(),
            AlertDispatcher::disabled(Severity::Error),
            false,
        );
        assert!(matches!(
            pipeline.process_block(0).await,
            Err(PipelineError::GenesisBlock)
        ));
    }

    #[tokio::test]
    async fn test_breach_does_not_stop_remaining_checks() {
        let a = U96::from(1u64);
        let b = U96::from(2u64);

        let mut pool = FakePool::default();
        pool.liquidity.insert(BLOCK - 1, 1_000);
        pool.events.insert(
            BLOCK,
            vec![
                ev(0, 0, settle(a, 900)),
                ev(1, 0, liquidate(b, 1_000)),
            ],
        );
        pool.locked.insert((derive_position_key(owner(), a), BLOCK - 1), 10);
        pool.locked.insert((derive_position_key(owner(), b), BLOCK - 1), 100);

        let (transport, dispatcher, handle) = recording(Severity::Success);
        let pipeline = BlockPipeline::new(pool, dispatcher, false);
        let report = pipeline.process_block(BLOCK).await.unwrap();

        assert_eq!(report.checks.len(), 2);
        assert!(report.checks[0].is_breach());
        assert!(!report.checks[1].is_breach());
        assert_eq!(report.checks[0].close.id, a);

        drop(pipeline);
        handle.await.unwrap();
        let sent = transport.sent.lock().unwrap();
        assert!(sent[0].contains("URGENT"));
        assert!(sent[1].contains("OK"));
    }
}
