//! Pool state and log queries.
//!
//! [`PoolSource`] is the seam between the block pipeline and the chain. The
//! production implementation, [`RpcPoolSource`], reads the Marginal v1 pool
//! through an alloy provider; tests substitute in-memory fakes.

use crate::onchain::abi::{liquidity_event_topics, IMarginalV1Pool};
use crate::onchain::types::{EventLocation, EventPayload, Liquidity, PoolEvent};

use alloy::eips::BlockId;
use alloy::primitives::{Address, B256};
use alloy::providers::{DynProvider, Provider};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("rpc transport error: {0}")]
    Transport(#[from] alloy::transports::TransportError),
    #[error("contract call failed: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },
    #[error("malformed pool event: {0}")]
    MalformedEvent(String),
}

/// Read access to the monitored pool.
#[async_trait]
pub trait PoolSource: Send + Sync {
    /// Pool-wide liquidity as of the end of `block_number`.
    async fn pool_liquidity_at(&self, block_number: u64) -> Result<Liquidity, SourceError>;

    /// Every liquidity-changing event emitted in `block_number`, in no
    /// particular order.
    async fn pool_events_in_block(&self, block_number: u64) -> Result<Vec<PoolEvent>, SourceError>;

    /// `liquidityLocked` of the position stored under `key`, as of the end of
    /// `block_number`.
    async fn position_locked_liquidity(
        &self,
        key: B256,
        block_number: u64,
    ) -> Result<Liquidity, SourceError>;
}

/// [`PoolSource`] backed by an Ethereum JSON-RPC provider.
pub struct RpcPoolSource {
    pool: IMarginalV1Pool::IMarginalV1PoolInstance<DynProvider>,
    request_timeout: Duration,
}

impl RpcPoolSource {
    pub fn new(pool_address: Address, provider: DynProvider, request_timeout: Duration) -> Self {
        Self {
            pool: IMarginalV1Pool::new(pool_address, provider),
            request_timeout,
        }
    }

    pub fn pool_address(&self) -> Address {
        *self.pool.address()
    }

    async fn timed<T, F>(&self, what: &'static str, fut: F) -> Result<T, SourceError>
    where
        F: Future<Output = Result<T, SourceError>>,
    {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                what,
                after: self.request_timeout,
            }),
        }
    }
}

#[async_trait]
impl PoolSource for RpcPoolSource {
    async fn pool_liquidity_at(&self, block_number: u64) -> Result<Liquidity, SourceError> {
        self.timed("pool state query", async {
            let state = self
                .pool
                .state()
                .block(BlockId::number(block_number))
                .call()
                .await?;
            Ok::<_, SourceError>(state.liquidity)
        })
        .await
    }

    async fn pool_events_in_block(&self, block_number: u64) -> Result<Vec<PoolEvent>, SourceError> {
        let filter = Filter::new()
            .address(self.pool_address())
            .event_signature(liquidity_event_topics())
            .from_block(block_number)
            .to_block(block_number);

        let logs = self
            .timed("pool log query", async {
                Ok::<_, SourceError>(self.pool.provider().get_logs(&filter).await?)
            })
            .await?;

        debug!(block = block_number, logs = logs.len(), "fetched pool logs");
        logs.iter().map(decode_log).collect()
    }

    async fn position_locked_liquidity(
        &self,
        key: B256,
        block_number: u64,
    ) -> Result<Liquidity, SourceError> {
        self.timed("position query", async {
            let position = self
                .pool
                .positions(key)
                .block(BlockId::number(block_number))
                .call()
                .await?;
            Ok::<_, SourceError>(position.liquidityLocked)
        })
        .await
    }
}

fn malformed(reason: impl std::fmt::Display) -> SourceError {
    SourceError::MalformedEvent(reason.to_string())
}

fn decode<E: SolEvent>(log: &Log) -> Result<E, SourceError> {
    log.log_decode::<E>()
        .map(|decoded| decoded.inner.data)
        .map_err(|e| malformed(format!("{}: {e}", E::SIGNATURE)))
}

/// Decode a raw pool log into a [`PoolEvent`].
///
/// Logs from pending blocks (no block number, transaction index or log
/// index) cannot be ordered and are rejected, as are unknown topics.
pub fn decode_log(log: &Log) -> Result<PoolEvent, SourceError> {
    let block_number = log
        .block_number
        .ok_or_else(|| malformed("log has no block number"))?;
    let transaction_index = log
        .transaction_index
        .ok_or_else(|| malformed("log has no transaction index"))?;
    let log_index = log
        .log_index
        .ok_or_else(|| malformed("log has no log index"))?;
    let topic0 = *log.topic0().ok_or_else(|| malformed("log has no topic0"))?;

    let payload = match topic0 {
        t if t == IMarginalV1Pool::Open::SIGNATURE_HASH => {
            let ev = decode::<IMarginalV1Pool::Open>(log)?;
            EventPayload::Open {
                owner: ev.owner,
                id: ev.id,
                liquidity_after: ev.liquidityAfter,
            }
        }
        t if t == IMarginalV1Pool::Settle::SIGNATURE_HASH => {
            let ev = decode::<IMarginalV1Pool::Settle>(log)?;
            EventPayload::Settle {
                owner: ev.owner,
                id: ev.id,
                liquidity_after: ev.liquidityAfter,
            }
        }
        t if t == IMarginalV1Pool::Liquidate::SIGNATURE_HASH => {
            let ev = decode::<IMarginalV1Pool::Liquidate>(log)?;
            EventPayload::Liquidate {
                owner: ev.owner,
                id: ev.id,
                liquidity_after: ev.liquidityAfter,
            }
        }
        t if t == IMarginalV1Pool::Swap::SIGNATURE_HASH => {
            let ev = decode::<IMarginalV1Pool::Swap>(log)?;
            EventPayload::Swap {
                liquidity: ev.liquidity,
            }
        }
        t if t == IMarginalV1Pool::Mint::SIGNATURE_HASH => {
            let ev = decode::<IMarginalV1Pool::Mint>(log)?;
            EventPayload::Mint {
                liquidity_delta: ev.liquidityDelta,
            }
        }
        t if t == IMarginalV1Pool::Burn::SIGNATURE_HASH => {
            let ev = decode::<IMarginalV1Pool::Burn>(log)?;
            EventPayload::Burn {
                liquidity_delta: ev.liquidityDelta,
            }
        }
        other => return Err(malformed(format!("unrecognised event topic {other}"))),
    };

    Ok(PoolEvent::new(
        EventLocation::new(block_number, transaction_index, log_index),
        payload,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::aliases::U96;
    use alloy::primitives::{Log as PrimitiveLog, LogData, U256};

    fn rpc_log(data: LogData, tx: Option<u64>) -> Log {
        Log {
            inner: PrimitiveLog {
                address: Address::repeat_byte(0x99),
                data,
            },
            block_number: Some(123),
            transaction_index: tx,
            log_index: Some(4),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_mint() {
        let event = IMarginalV1Pool::Mint {
            sender: Address::repeat_byte(1),
            owner: Address::repeat_byte(2),
            liquidityDelta: 200,
            amount0: U256::from(1u64),
            amount1: U256::from(2u64),
        };
        let decoded = decode_log(&rpc_log(event.encode_log_data(), Some(7))).unwrap();
        assert_eq!(decoded.location, EventLocation::new(123, 7, 4));
        assert_eq!(decoded.payload, EventPayload::Mint { liquidity_delta: 200 });
    }

    #[test]
    fn test_decode_liquidate() {
        let event = IMarginalV1Pool::Liquidate {
            owner: Address::repeat_byte(3),
            id: U96::from(11u64),
            recipient: Address::repeat_byte(4),
            liquidityAfter: 600,
            sqrtPriceX96After: Default::default(),
            rewards: U256::ZERO,
        };
        let decoded = decode_log(&rpc_log(event.encode_log_data(), Some(0))).unwrap();
        assert_eq!(
            decoded.payload,
            EventPayload::Liquidate {
                owner: Address::repeat_byte(3),
                id: U96::from(11u64),
                liquidity_after: 600,
            }
        );
    }

    #[test]
    fn test_unknown_topic_is_malformed() {
        let data = LogData::new_unchecked(vec![B256::repeat_byte(0xee)], Default::default());
        let err = decode_log(&rpc_log(data, Some(0))).unwrap_err();
        assert!(matches!(err, SourceError::MalformedEvent(_)));
    }

    #[test]
    fn test_missing_transaction_index_is_malformed() {
        let event = IMarginalV1Pool::Burn {
            owner: Address::ZERO,
            recipient: Address::ZERO,
            liquidityDelta: 1,
            amount0: U256::ZERO,
            amount1: U256::ZERO,
        };
        let err = decode_log(&rpc_log(event.encode_log_data(), None)).unwrap_err();
        assert!(matches!(err, SourceError::MalformedEvent(_)));
    }
}
