//! Marginal v1 pool contract ABI and hashing helpers.
//!
//! We define a minimal ABI covering just the pool views and events the
//! watcher reads. Topic0 hashes come from the generated event types, so the
//! log filter can never drift from the decoder.

use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    #[sol(rpc)]
    interface IMarginalV1Pool {
        event Open(
            address sender,
            address indexed owner,
            uint96 indexed id,
            int24 tick,
            uint128 liquidityAfter,
            uint160 sqrtPriceX96After,
            uint128 margin
        );

        event Settle(
            address sender,
            address indexed owner,
            uint96 indexed id,
            address recipient,
            int256 amount0,
            int256 amount1,
            uint128 liquidityAfter,
            uint160 sqrtPriceX96After,
            uint256 rewards
        );

        event Liquidate(
            address indexed owner,
            uint96 indexed id,
            address recipient,
            uint128 liquidityAfter,
            uint160 sqrtPriceX96After,
            uint256 rewards
        );

        event Swap(
            address indexed sender,
            address indexed recipient,
            int256 amount0,
            int256 amount1,
            uint160 sqrtPriceX96,
            uint128 liquidity,
            int24 tick
        );

        event Mint(
            address sender,
            address indexed owner,
            uint128 liquidityDelta,
            uint256 amount0,
            uint256 amount1
        );

        event Burn(
            address indexed owner,
            address recipient,
            uint128 liquidityDelta,
            uint256 amount0,
            uint256 amount1
        );

        function state() external view returns (
            uint160 sqrtPriceX96,
            uint96 totalPositions,
            uint128 liquidity,
            int24 tick,
            uint32 blockTimestamp,
            int56 tickCumulative,
            uint8 feeProtocol,
            bool initialized
        );

        function positions(bytes32 key) external view returns (
            uint96 size,
            uint96 debt0,
            uint96 debt1,
            uint128 insurance0,
            uint128 insurance1,
            bool zeroForOne,
            bool liquidated,
            int24 tick,
            uint32 blockTimestamp,
            int56 tickCumulativeDelta,
            uint128 margin,
            uint128 liquidityLocked,
            uint256 rewards
        );
    }
}

/// Topic0 of every pool event that changes liquidity, in a stable order.
pub fn liquidity_event_topics() -> Vec<B256> {
    vec![
        IMarginalV1Pool::Open::SIGNATURE_HASH,
        IMarginalV1Pool::Settle::SIGNATURE_HASH,
        IMarginalV1Pool::Liquidate::SIGNATURE_HASH,
        IMarginalV1Pool::Swap::SIGNATURE_HASH,
        IMarginalV1Pool::Mint::SIGNATURE_HASH,
        IMarginalV1Pool::Burn::SIGNATURE_HASH,
    ]
}

/// Compute keccak256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> B256 {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    B256::from(output)
}
