//! Solvency check on position close.
//!
//! When a position is settled or liquidated, the liquidity it hands back to
//! the pool must cover the liquidity locked when it was opened:
//!
//! ```text
//! liquidity_returned = liquidity_after - liquidity_before >= position.liquidityLocked
//! ```
//!
//! A shortfall means LPs absorbed bad debt. It should only happen under
//! extreme funding conditions and is reported as an urgent alert, not an
//! error.

use crate::alert::{Alert, Severity};
use crate::onchain::source::{PoolSource, SourceError};
use crate::onchain::types::Liquidity;
use crate::position::derive_position_key;
use crate::replay::PositionClose;
use crate::summary::liquidity_diff;
use alloy::primitives::B256;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InvariantError {
    #[error("close at block 0 has no prior block to read the position from")]
    GenesisBlock,
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Breach,
}

/// Outcome of checking a single close.
#[derive(Debug, Clone, PartialEq)]
pub struct InvariantResult {
    pub close: PositionClose,
    pub position_key: B256,
    pub liquidity_locked: Liquidity,
    pub liquidity_returned: i128,
    /// `liquidity_returned / liquidity_locked`; `None` when nothing was locked.
    pub ratio: Option<f64>,
    pub verdict: Verdict,
}

impl InvariantResult {
    pub fn is_breach(&self) -> bool {
        self.verdict == Verdict::Breach
    }

    pub fn severity(&self) -> Severity {
        match self.verdict {
            Verdict::Breach => Severity::Error,
            Verdict::Pass => Severity::Success,
        }
    }

    /// Shortfall `locked - returned`, for breaches only.
    pub fn liquidity_lost(&self) -> Option<i128> {
        if !self.is_breach() {
            return None;
        }
        let locked = i128::try_from(self.liquidity_locked).unwrap_or(i128::MAX);
        Some(locked.saturating_sub(self.liquidity_returned))
    }

    pub fn message(&self) -> String {
        let c = &self.close;
        let ratio = self
            .ratio
            .map(|r| format!(", ratio {:.4}", r))
            .unwrap_or_default();

        match self.verdict {
            Verdict::Breach => format!(
                "🚨 URGENT: Pool {} on position {} (owner {}) at block number {} \
                 lost liquidity: {} (returned {} of {} locked{})",
                c.kind,
                c.id,
                c.owner,
                c.block_number,
                self.liquidity_lost().unwrap_or_default(),
                self.liquidity_returned,
                self.liquidity_locked,
                ratio
            ),
            Verdict::Pass => format!(
                "✅ OK: Pool {} on position {} (owner {}) at block number {} \
                 returned {} of {} locked liquidity{}",
                c.kind,
                c.id,
                c.owner,
                c.block_number,
                self.liquidity_returned,
                self.liquidity_locked,
                ratio
            ),
        }
    }

    pub fn to_alert(&self) -> Alert {
        Alert::new(self.severity(), self.message())
    }
}

/// Classify a close against the position's locked liquidity. Pure.
pub fn evaluate(close: PositionClose, liquidity_locked: Liquidity) -> InvariantResult {
    let liquidity_returned = liquidity_diff(close.liquidity_after, close.liquidity_before);

    // A negative return is always below any (unsigned) lock.
    let breach = match u128::try_from(liquidity_returned) {
        Ok(returned) => returned < liquidity_locked,
        Err(_) => true,
    };

    let ratio = if liquidity_locked == 0 {
        None
    } else {
        Some(liquidity_returned as f64 / liquidity_locked as f64)
    };

    InvariantResult {
        close,
        position_key: derive_position_key(close.owner, close.id),
        liquidity_locked,
        liquidity_returned,
        ratio,
        verdict: if breach { Verdict::Breach } else { Verdict::Pass },
    }
}

/// Reads locked liquidity for closing positions and classifies them.
pub struct InvariantChecker<'a, S: PoolSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: PoolSource + ?Sized> InvariantChecker<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    /// Check one close. The position is read as of the block before the
    /// close, since the closing transaction has already cleared it by the end
    /// of its own block.
    pub async fn check_close(
        &self,
        close: PositionClose,
    ) -> Result<InvariantResult, InvariantError> {
        let prior_block = close
            .block_number
            .checked_sub(1)
            .ok_or(InvariantError::GenesisBlock)?;
        let key = derive_position_key(close.owner, close.id);
        let locked = self
            .source
            .position_locked_liquidity(key, prior_block)
            .await?;
        Ok(evaluate(close, locked))
    }
}
