//! Block ordering guard.
//!
//! Blocks must be observed in non-decreasing order and each at most once.
//! Only successfully processed blocks advance the sequencer, so a failed
//! block shows up as a gap when the next head arrives. The hash of the last
//! processed block is kept so a reorg that re-announces that height with a
//! different hash is processed again.

use alloy::primitives::B256;

/// How a newly announced block relates to the last processed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// No block processed yet.
    First,
    /// Exactly one past the last processed block.
    Next,
    /// Blocks `from..=to` were never processed. They are not backfilled.
    Gap { from: u64, to: u64 },
    /// Same height as the last processed block but a different hash.
    Reorg { block_number: u64 },
    /// Already processed, or older than the last processed block.
    Stale { last_processed: u64 },
}

impl Admission {
    pub fn should_process(&self) -> bool {
        !matches!(self, Admission::Stale { .. })
    }
}

#[derive(Debug, Default)]
pub struct BlockSequencer {
    last_processed: Option<u64>,
    last_hash: Option<B256>,
}

impl BlockSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_processed(&self) -> Option<u64> {
        self.last_processed
    }

    /// `block_hash` is optional; without it a repeated height is always stale.
    pub fn admit(&self, block_number: u64, block_hash: Option<B256>) -> Admission {
        match self.last_processed {
            None => Admission::First,
            Some(last)
                if block_number == last
                    && block_hash.is_some()
                    && self.last_hash.is_some()
                    && block_hash != self.last_hash =>
            {
                Admission::Reorg { block_number }
            }
            Some(last) if block_number <= last => Admission::Stale {
                last_processed: last,
            },
            Some(last) if block_number == last + 1 => Admission::Next,
            Some(last) => Admission::Gap {
                from: last + 1,
                to: block_number - 1,
            },
        }
    }

    /// Record a successfully processed block.
    pub fn mark_processed(&mut self, block_number: u64, block_hash: Option<B256>) {
        if self.last_processed.map_or(true, |last| block_number >= last) {
            self.last_processed = Some(block_number);
            self.last_hash = block_hash;
        }
    }
}
