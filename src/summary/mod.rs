//! Per-block aggregation of pool activity.

use crate::onchain::types::{EventKind, Liquidity, PoolEvent};

/// Event counts per variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub open: usize,
    pub settle: usize,
    pub liquidate: usize,
    pub swap: usize,
    pub mint: usize,
    pub burn: usize,
}

impl EventCounts {
    pub fn record(&mut self, kind: EventKind) {
        match kind {
            EventKind::Open => self.open += 1,
            EventKind::Settle => self.settle += 1,
            EventKind::Liquidate => self.liquidate += 1,
            EventKind::Swap => self.swap += 1,
            EventKind::Mint => self.mint += 1,
            EventKind::Burn => self.burn += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.open + self.settle + self.liquidate + self.swap + self.mint + self.burn
    }
}

/// Summary of one block's replay. Created fresh per block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSummary {
    pub block_number: u64,
    pub counts: EventCounts,
    pub liquidity_start: Liquidity,
    pub liquidity_end: Liquidity,
    pub opened: usize,
    pub closed: usize,
    pub liquidity_delta: i128,
}

/// Aggregate an already-replayed event stream.
pub fn summarize(
    block_number: u64,
    events: &[PoolEvent],
    liquidity_start: Liquidity,
    liquidity_end: Liquidity,
) -> BlockSummary {
    let mut counts = EventCounts::default();
    for event in events {
        counts.record(event.kind());
    }

    BlockSummary {
        block_number,
        counts,
        liquidity_start,
        liquidity_end,
        opened: counts.open,
        closed: counts.settle + counts.liquidate,
        liquidity_delta: liquidity_diff(liquidity_end, liquidity_start),
    }
}

/// Signed `after - before`, saturating at the `i128` bounds.
pub fn liquidity_diff(after: Liquidity, before: Liquidity) -> i128 {
    if after >= before {
        i128::try_from(after - before).unwrap_or(i128::MAX)
    } else {
        i128::try_from(before - after)
            .map(|d| -d)
            .unwrap_or(i128::MIN)
    }
}

impl std::fmt::Display for BlockSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let c = &self.counts;
        write!(
            f,
            "Block {}: {} events (open={} settle={} liquidate={} swap={} mint={} burn={}), \
             positions opened={} closed={}, liquidity {} -> {} (delta {:+})",
            self.block_number,
            c.total(),
            c.open,
            c.settle,
            c.liquidate,
            c.swap,
            c.mint,
            c.burn,
            self.opened,
            self.closed,
            self.liquidity_start,
            self.liquidity_end,
            self.liquidity_delta
        )
    }
}
