//! On-chain access for a Marginal v1 pool.
//!
//! - `abi`: contract bindings and event topics
//! - `types`: decoded pool events and their positions within a block
//! - `source`: the [`PoolSource`] seam and its RPC-backed implementation
//! - `monitor`: WebSocket new-head subscription driving the block pipeline

pub mod abi;
pub mod monitor;
pub mod source;
pub mod types;

pub use monitor::{BlockDriver, BlockMonitor};
pub use source::{PoolSource, RpcPoolSource, SourceError};
pub use types::{EventKind, EventLocation, EventPayload, Liquidity, PoolEvent};
