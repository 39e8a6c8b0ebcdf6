//! Watcher metrics tracking.
//!
//! Tracks what the monitor has seen since startup:
//! - Blocks processed, failed, skipped as stale, gaps and reorgs
//! - Positions closed and invariant breaches
//! - Time to process a block (fetch + replay + checks)

use crate::pipeline::BlockReport;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::info;

/// Maximum history entries per metric.
const MAX_HISTORY: usize = 1000;

/// A single block processing measurement.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub block_number: u64,
    pub events: usize,
    pub closed: usize,
    pub breaches: usize,
    pub elapsed: Duration,
    pub recorded_at: Instant,
}

/// Aggregate metrics over a time window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowMetrics {
    pub blocks: usize,
    pub events: usize,
    pub closed: usize,
    pub breaches: usize,
    pub avg_latency_ms: f64,
}

/// The metrics tracker.
#[derive(Debug, Default)]
pub struct MonitorMetrics {
    history: VecDeque<BlockRecord>,
    pub blocks_processed: u64,
    pub blocks_failed: u64,
    pub blocks_stale: u64,
    pub gaps: u64,
    pub blocks_missed: u64,
    pub reorgs: u64,
    pub positions_closed: u64,
    pub breaches: u64,
    pub last_block: Option<u64>,
}

impl MonitorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successfully processed block.
    pub fn record_block(&mut self, report: &BlockReport, elapsed: Duration) {
        let summary = &report.summary;
        let breaches = report.breaches();

        self.blocks_processed += 1;
        self.positions_closed += summary.closed as u64;
        self.breaches += breaches as u64;
        self.last_block = Some(summary.block_number);

        if self.history.len() >= MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(BlockRecord {
            block_number: summary.block_number,
            events: summary.counts.total(),
            closed: summary.closed,
            breaches,
            elapsed,
            recorded_at: Instant::now(),
        });
    }

    pub fn record_failure(&mut self) {
        self.blocks_failed += 1;
    }

    pub fn record_stale(&mut self) {
        self.blocks_stale += 1;
    }

    /// Record a gap of `missed` unprocessed blocks.
    pub fn record_gap(&mut self, missed: u64) {
        self.gaps += 1;
        self.blocks_missed += missed;
    }

    /// Record a height re-announced with a new hash.
    pub fn record_reorg(&mut self) {
        self.reorgs += 1;
    }

    /// Compute aggregate metrics over the last `window` duration.
    pub fn window_metrics(&self, window: Duration) -> WindowMetrics {
        let now = Instant::now();
        let recent: Vec<&BlockRecord> = self
            .history
            .iter()
            .filter(|r| now.duration_since(r.recorded_at) <= window)
            .collect();

        let blocks = recent.len();
        let avg_latency_ms = if blocks > 0 {
            recent
                .iter()
                .map(|r| r.elapsed.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / blocks as f64
        } else {
            0.0
        };

        WindowMetrics {
            blocks,
            events: recent.iter().map(|r| r.events).sum(),
            closed: recent.iter().map(|r| r.closed).sum(),
            breaches: recent.iter().map(|r| r.breaches).sum(),
            avg_latency_ms,
        }
    }

    /// Log a summary of metrics (called periodically and on shutdown).
    pub fn log_summary(&self) {
        let m5 = self.window_metrics(Duration::from_secs(300));

        info!(
            blocks_5m = m5.blocks,
            events_5m = m5.events,
            closed_5m = m5.closed,
            breaches_5m = m5.breaches,
            latency_5m = format!("{:.1}ms", m5.avg_latency_ms),
            "metrics (5min window)"
        );

        info!(
            processed = self.blocks_processed,
            failed = self.blocks_failed,
            stale = self.blocks_stale,
            gaps = self.gaps,
            missed = self.blocks_missed,
            reorgs = self.reorgs,
            closed = self.positions_closed,
            breaches = self.breaches,
            last_block = ?self.last_block,
            "metrics (since startup)"
        );
    }
}
