//! Emulates how the EVM lays out `bytes` and `string` values in storage.
//!
//! A value shorter than `32` bytes is stored inline at its slot, left aligned,
//! with `len * 2` in the lowest byte. A longer value stores `len * 2 + 1` at
//! its slot and the data in consecutive `32` byte chunks starting at slot
//! `keccak(slot)`. Every slot `s` lives in the trie at path `keccak(s)`.

use ethereum_types::{H256, U256};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    coder::MAX_LENGTH,
    nibbles::Nibbles,
    node::MaybeNode,
    trie_ops::{delete, get, insert, TrieOpError},
    utils::{hash_bytes, increment_be, left_aligned_word, right_aligned_word, trim_leading_zeros},
};

/// Stores the result of a storage layout operation.
pub type KvResult<T> = Result<T, KvError>;

/// Errors encountered while writing or reading values.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum KvError {
    /// The underlying trie operation failed.
    #[error(transparent)]
    Trie(#[from] TrieOpError),

    /// A long value is missing one of its data slots.
    #[error("Long value is missing its data chunk {index}")]
    MissingChunk {
        /// Index of the chunk, counting from the first data slot.
        index: usize,
    },

    /// The slot holds something that is not a valid value header.
    #[error("Slot does not hold a valid value header (0x{0})")]
    MalformedHeader(String),
}

/// How slots that a new value no longer uses are treated.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum StorageMode {
    /// Surplus slots are set to the empty value, which is what the EVM does.
    /// This is the only mode whose root hashes match a real node.
    #[default]
    Zero,

    /// Surplus slots are removed from the trie, as is an empty short value.
    /// This keeps the trie smaller, but the root no longer matches a node.
    Delete,

    /// The previous value is never looked at, so slots it used past the new
    /// value are left untouched.
    Overwrite,
}

/// The trie path of a storage slot.
pub fn slot_path(slot: &H256) -> Nibbles {
    Nibbles::from_h256_be(hash_bytes(slot))
}

/// The slot of `key` in a mapping declared at slot `base`, as laid out by
/// Solidity (`keccak(key ++ base)`).
pub fn mapping_slot(base: U256, key: &[u8]) -> H256 {
    let mut preimage = Vec::with_capacity(key.len() + 32);
    preimage.extend_from_slice(key);
    preimage.extend_from_slice(&u256_to_be_word(base));

    hash_bytes(preimage)
}

/// Writes `value` at `slot`, returning the new root.
pub fn insert_bytes(
    root: &MaybeNode,
    slot: H256,
    value: &[u8],
    mode: StorageMode,
) -> KvResult<MaybeNode> {
    let mut key = hash_bytes(slot);
    let path = Nibbles::from_h256_be(key);

    let old_size = match mode {
        StorageMode::Overwrite => 0,
        StorageMode::Zero | StorageMode::Delete => prior_long_size(root, &path),
    };

    let mut root = root.clone();
    let mut pos = 0;

    if value.len() < 32 {
        debug!(
            "Writing short value ({} bytes) at slot {:x}",
            value.len(),
            slot
        );

        root = match value.is_empty() && mode == StorageMode::Delete {
            true => delete(&root, path),
            false => {
                let mut word = left_aligned_word(value);
                word[31] = (value.len() << 1) as u8;
                Some(insert(&root, path, trim_leading_zeros(&word))?)
            }
        };
    } else {
        debug!(
            "Writing long value ({} bytes, {} chunks) at slot {:x}",
            value.len(),
            value.len().div_ceil(32),
            slot
        );

        let header = (U256::from(value.len()) << 1) | U256::one();
        root = Some(insert(&root, path, trim_leading_zeros(&u256_to_be_word(header)))?);

        for chunk in value.chunks(32) {
            let word = left_aligned_word(chunk);
            root = Some(insert(&root, chunk_path(&key), trim_leading_zeros(&word))?);

            increment_be(&mut key);
            pos += 32;
        }
    }

    if pos < old_size {
        debug!(
            "Clearing {} surplus chunks of slot {:x} ({:?})",
            (old_size - pos).div_ceil(32),
            slot,
            mode
        );
    }

    while pos < old_size {
        let chunk = chunk_path(&key);
        root = match mode {
            StorageMode::Delete => delete(&root, chunk),
            StorageMode::Zero | StorageMode::Overwrite => Some(insert(&root, chunk, &[])?),
        };

        increment_be(&mut key);
        pos += 32;
    }

    Ok(root)
}

/// Reads back a value written by [`insert_bytes`]. Returns `None` if the slot
/// has never been written.
pub fn read_bytes(root: &MaybeNode, slot: H256) -> KvResult<Option<Vec<u8>>> {
    let mut key = hash_bytes(slot);
    let Some(header) = get(root, &Nibbles::from_h256_be(key)) else {
        return Ok(None);
    };

    let word = word_from_leaf(header)?;
    if word[31] & 1 == 0 {
        let len = (word[31] >> 1) as usize;
        if len >= 32 {
            return Err(KvError::MalformedHeader(hex::encode(header)));
        }

        return Ok(Some(word[..len].to_vec()));
    }

    let len = U256::from_big_endian(&word) >> 1;
    if len > U256::from(MAX_LENGTH) {
        return Err(KvError::MalformedHeader(hex::encode(header)));
    }

    let len = len.as_usize();
    let mut value = Vec::with_capacity(len.next_multiple_of(32));
    for index in 0..len.div_ceil(32) {
        let chunk = get(root, &chunk_path(&key)).ok_or(KvError::MissingChunk { index })?;
        value.extend_from_slice(&word_from_leaf(chunk)?);

        increment_be(&mut key);
    }

    value.truncate(len);
    Ok(Some(value))
}

/// Stores a single word at `slot` like a raw `sstore`. A zero word is stored
/// as the empty value, or removed in [`StorageMode::Delete`].
pub fn insert_word(
    root: &MaybeNode,
    slot: H256,
    value: U256,
    mode: StorageMode,
) -> KvResult<MaybeNode> {
    let path = slot_path(&slot);
    if value.is_zero() && mode == StorageMode::Delete {
        return Ok(delete(root, path));
    }

    Ok(Some(insert(root, path, trim_leading_zeros(&u256_to_be_word(value)))?))
}

/// Reads the word at `slot`, which is zero if the slot was never written.
pub fn read_word(root: &MaybeNode, slot: H256) -> KvResult<U256> {
    match get(root, &slot_path(&slot)) {
        Some(v) => Ok(U256::from_big_endian(&word_from_leaf(v)?)),
        None => Ok(U256::zero()),
    }
}

fn chunk_path(data_slot: &H256) -> Nibbles {
    slot_path(data_slot)
}

/// Byte length of the long value currently at `path`, or `0` if it holds a
/// short value or nothing.
fn prior_long_size(root: &MaybeNode, path: &Nibbles) -> usize {
    let Some(prior) = get(root, path) else {
        return 0;
    };

    if prior.last().map_or(true, |b| b & 1 == 0) {
        return 0;
    }

    let size = U256::from_big_endian(&right_aligned_word(prior)) >> 1;
    if size > U256::from(MAX_LENGTH) {
        warn!(
            "Previous value header at {} claims {} bytes, which is likely an encoding error",
            path, size
        );
    }

    match size > U256::from(usize::MAX) {
        false => size.as_usize(),
        true => usize::MAX,
    }
}

fn word_from_leaf(v: &[u8]) -> KvResult<[u8; 32]> {
    match v.len() > 32 {
        false => Ok(right_aligned_word(v)),
        true => Err(KvError::MalformedHeader(hex::encode(v))),
    }
}

fn u256_to_be_word(v: U256) -> [u8; 32] {
    let mut word = [0; 32];
    v.to_big_endian(&mut word);

    word
}
