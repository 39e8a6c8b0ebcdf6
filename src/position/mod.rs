//! Position key derivation.
//!
//! The pool stores positions under `keccak256(abi.encodePacked(owner, id))`
//! where `owner` is a 20-byte address and `id` a `uint96`. Packed, the two
//! fill exactly one 32-byte word.

use crate::onchain::abi::keccak256;
use alloy::primitives::aliases::U96;
use alloy::primitives::{Address, B256};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("position id {0} does not fit in uint96")]
    IdOutOfRange(u128),
}

/// Derive the on-chain position key for `(owner, id)`.
pub fn derive_position_key(owner: Address, id: U96) -> B256 {
    let mut packed = [0u8; 32];
    packed[..20].copy_from_slice(owner.as_slice());
    packed[20..].copy_from_slice(&id.to_be_bytes::<12>());
    keccak256(&packed)
}

/// Same as [`derive_position_key`] for ids held as plain integers.
pub fn position_key_from_u128(owner: Address, id: u128) -> Result<B256, KeyError> {
    let id = U96::try_from(id).map_err(|_| KeyError::IdOutOfRange(id))?;
    Ok(derive_position_key(owner, id))
}
