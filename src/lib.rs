//! Liquidity monitor for a Marginal v1 pool.
//!
//! Replays every pool event in each new block, checks that closed positions
//! returned at least the liquidity they had locked, and routes alerts by
//! severity. Shared by the `marginal-watch` daemon and the `check_block` tool.

pub mod alert;
pub mod config;
pub mod invariant;
pub mod metrics;
pub mod onchain;
pub mod pipeline;
pub mod position;
pub mod replay;
pub mod summary;
