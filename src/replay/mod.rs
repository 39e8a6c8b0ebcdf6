//! Liquidity replay.
//!
//! Reconstructs the pool's running liquidity counter across one block by
//! applying each event in execution order, starting from the pool liquidity
//! at the end of the prior block. Settle and Liquidate events are collected
//! as [`PositionClose`] hand-offs for the invariant checker; the check itself
//! never feeds back into the counter.

use crate::onchain::types::{EventKind, EventLocation, Liquidity, LiquidityEffect, PoolEvent};
use crate::summary::{self, BlockSummary};
use alloy::primitives::aliases::U96;
use alloy::primitives::Address;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReplayError {
    #[error("event at {found:?} belongs to another block than {block_number}")]
    WrongBlock {
        block_number: u64,
        found: EventLocation,
    },
    #[error("events out of order: {previous:?} is not before {next:?}")]
    OutOfOrder {
        previous: EventLocation,
        next: EventLocation,
    },
    #[error("Mint at {location:?} overflows liquidity {before} + {delta}")]
    Overflow {
        location: EventLocation,
        before: Liquidity,
        delta: Liquidity,
    },
    #[error("Burn at {location:?} underflows liquidity {before} - {delta}")]
    Underflow {
        location: EventLocation,
        before: Liquidity,
        delta: Liquidity,
    },
}

/// How a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Settle,
    Liquidate,
}

impl std::fmt::Display for CloseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseKind::Settle => write!(f, "Settle"),
            CloseKind::Liquidate => write!(f, "Liquidate"),
        }
    }
}

/// A position-closing event with the counter values around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionClose {
    pub block_number: u64,
    pub kind: CloseKind,
    pub owner: Address,
    pub id: U96,
    pub liquidity_before: Liquidity,
    pub liquidity_after: Liquidity,
    pub location: EventLocation,
}

/// One replayed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStep {
    pub event: PoolEvent,
    pub liquidity_before: Liquidity,
    pub liquidity_after: Liquidity,
}

/// Result of replaying a whole block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReplay {
    pub block_number: u64,
    pub liquidity_start: Liquidity,
    pub liquidity_end: Liquidity,
    pub steps: Vec<ReplayStep>,
    pub closes: Vec<PositionClose>,
    pub summary: BlockSummary,
}

impl BlockReplay {
    /// Liquidity after each event, in replay order.
    pub fn liquidity_after(&self) -> Vec<Liquidity> {
        self.steps.iter().map(|s| s.liquidity_after).collect()
    }
}

/// Sort events into execution order: `(transaction_index, log_index)`.
/// Logs are not guaranteed to be returned in that order by the node.
pub fn sort_events(events: &mut [PoolEvent]) {
    events.sort_by_key(|e| e.location.order_key());
}

/// Apply one event to the counter.
pub fn apply(event: &PoolEvent, before: Liquidity) -> Result<Liquidity, ReplayError> {
    match event.payload.liquidity_effect() {
        LiquidityEffect::After(after) | LiquidityEffect::Absolute(after) => Ok(after),
        LiquidityEffect::Add(delta) => before.checked_add(delta).ok_or(ReplayError::Overflow {
            location: event.location,
            before,
            delta,
        }),
        LiquidityEffect::Remove(delta) => {
            before.checked_sub(delta).ok_or(ReplayError::Underflow {
                location: event.location,
                before,
                delta,
            })
        }
    }
}

/// Replay `events` (already sorted, all from `block_number`) starting from
/// `liquidity_start`.
pub fn replay(
    block_number: u64,
    events: &[PoolEvent],
    liquidity_start: Liquidity,
) -> Result<BlockReplay, ReplayError> {
    let mut steps = Vec::with_capacity(events.len());
    let mut closes = Vec::new();
    let mut liquidity = liquidity_start;
    let mut previous: Option<EventLocation> = None;

    for event in events {
        let location = event.location;
        if location.block_number != block_number {
            return Err(ReplayError::WrongBlock {
                block_number,
                found: location,
            });
        }
        if let Some(prev) = previous {
            if prev.order_key() >= location.order_key() {
                return Err(ReplayError::OutOfOrder {
                    previous: prev,
                    next: location,
                });
            }
        }
        previous = Some(location);

        let liquidity_after = apply(event, liquidity)?;

        let close_kind = match event.kind() {
            EventKind::Settle => Some(CloseKind::Settle),
            EventKind::Liquidate => Some(CloseKind::Liquidate),
            _ => None,
        };
        if let (Some(kind), Some((owner, id))) = (close_kind, event.payload.position()) {
            closes.push(PositionClose {
                block_number,
                kind,
                owner,
                id,
                liquidity_before: liquidity,
                liquidity_after,
                location,
            });
        }

        steps.push(ReplayStep {
            event: *event,
            liquidity_before: liquidity,
            liquidity_after,
        });
        liquidity = liquidity_after;
    }

    let summary = summary::summarize(block_number, events, liquidity_start, liquidity);

    Ok(BlockReplay {
        block_number,
        liquidity_start,
        liquidity_end: liquidity,
        steps,
        closes,
        summary,
    })
}
