//! Typed pool events decoded from Marginal v1 logs.

use alloy::primitives::aliases::U96;
use alloy::primitives::Address;

/// Pool liquidity, as stored on-chain (`uint128`).
pub type Liquidity = u128;

/// Where an event sits on-chain. `(transaction_index, log_index)` is the
/// execution order within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventLocation {
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl EventLocation {
    pub fn new(block_number: u64, transaction_index: u64, log_index: u64) -> Self {
        Self {
            block_number,
            transaction_index,
            log_index,
        }
    }

    /// Intra-block sort key.
    pub fn order_key(&self) -> (u64, u64) {
        (self.transaction_index, self.log_index)
    }
}

/// The six liquidity-changing pool events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Open,
    Settle,
    Liquidate,
    Swap,
    Mint,
    Burn,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Open => write!(f, "Open"),
            EventKind::Settle => write!(f, "Settle"),
            EventKind::Liquidate => write!(f, "Liquidate"),
            EventKind::Swap => write!(f, "Swap"),
            EventKind::Mint => write!(f, "Mint"),
            EventKind::Burn => write!(f, "Burn"),
        }
    }
}

/// Event-specific payload. Only the fields the watcher consumes are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPayload {
    /// A leveraged position was opened, locking liquidity.
    Open {
        owner: Address,
        id: U96,
        liquidity_after: Liquidity,
    },
    /// A position was settled by its owner.
    Settle {
        owner: Address,
        id: U96,
        liquidity_after: Liquidity,
    },
    /// A position was liquidated.
    Liquidate {
        owner: Address,
        id: U96,
        liquidity_after: Liquidity,
    },
    /// A swap reports the absolute pool liquidity after execution.
    Swap { liquidity: Liquidity },
    /// LP liquidity added.
    Mint { liquidity_delta: Liquidity },
    /// LP liquidity removed.
    Burn { liquidity_delta: Liquidity },
}

/// How an event moves the pool's liquidity counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidityEffect {
    /// Event reports the liquidity after it executed.
    After(Liquidity),
    /// Event reports the absolute pool liquidity.
    Absolute(Liquidity),
    /// Counter increases by the delta.
    Add(Liquidity),
    /// Counter decreases by the delta.
    Remove(Liquidity),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Open { .. } => EventKind::Open,
            EventPayload::Settle { .. } => EventKind::Settle,
            EventPayload::Liquidate { .. } => EventKind::Liquidate,
            EventPayload::Swap { .. } => EventKind::Swap,
            EventPayload::Mint { .. } => EventKind::Mint,
            EventPayload::Burn { .. } => EventKind::Burn,
        }
    }

    /// Classify the event's liquidity semantics. "Liquidity after" takes
    /// priority over absolute liquidity, which takes priority over deltas.
    pub fn liquidity_effect(&self) -> LiquidityEffect {
        match *self {
            EventPayload::Open { liquidity_after, .. }
            | EventPayload::Settle { liquidity_after, .. }
            | EventPayload::Liquidate { liquidity_after, .. } => {
                LiquidityEffect::After(liquidity_after)
            }
            EventPayload::Swap { liquidity } => LiquidityEffect::Absolute(liquidity),
            EventPayload::Mint { liquidity_delta } => LiquidityEffect::Add(liquidity_delta),
            EventPayload::Burn { liquidity_delta } => LiquidityEffect::Remove(liquidity_delta),
        }
    }

    /// `(owner, id)` of the position this event refers to, if any.
    pub fn position(&self) -> Option<(Address, U96)> {
        match *self {
            EventPayload::Open { owner, id, .. }
            | EventPayload::Settle { owner, id, .. }
            | EventPayload::Liquidate { owner, id, .. } => Some((owner, id)),
            _ => None,
        }
    }
}

/// A decoded pool event. Immutable once observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolEvent {
    pub location: EventLocation,
    pub payload: EventPayload,
}

impl PoolEvent {
    pub fn new(location: EventLocation, payload: EventPayload) -> Self {
        Self { location, payload }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl std::fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let loc = &self.location;
        match self.payload {
            EventPayload::Open { id, liquidity_after, .. }
            | EventPayload::Settle { id, liquidity_after, .. }
            | EventPayload::Liquidate { id, liquidity_after, .. } => write!(
                f,
                "{}(id={}, liquidity_after={}) @{}:{}:{}",
                self.kind(),
                id,
                liquidity_after,
                loc.block_number,
                loc.transaction_index,
                loc.log_index
            ),
            EventPayload::Swap { liquidity } => write!(
                f,
                "Swap(liquidity={}) @{}:{}:{}",
                liquidity, loc.block_number, loc.transaction_index, loc.log_index
            ),
            EventPayload::Mint { liquidity_delta } | EventPayload::Burn { liquidity_delta } => {
                write!(
                    f,
                    "{}(delta={}) @{}:{}:{}",
                    self.kind(),
                    liquidity_delta,
                    loc.block_number,
                    loc.transaction_index,
                    loc.log_index
                )
            }
        }
    }
}
