//! Utilities and types for rebuilding a contract's Ethereum storage trie in
//! memory.
//!
//! Given the sequence of storage writes a contract performed, this library
//! produces the same storage root and the same `eth_getProof` storage proofs
//! that a node would, without needing access to one.
//!
//! The trie itself is persistent: [`trie_ops::insert`] and
//! [`trie_ops::delete`] return a new root and leave the old one untouched,
//! sharing every subtree that did not change. [`StorageTrie`] is a small
//! owning handle over such a root.
//!
//! On top of the trie, [`kv`] lays out `bytes` and `string` values across
//! storage slots the way the EVM does, and [`coder`] serializes a whole trie
//! into a compact binary snapshot.
//!
//! [`StorageTrie`]: storage_trie::StorageTrie

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]

pub mod coder;
pub mod kv;
pub mod nibbles;
pub mod node;
pub mod proof;
pub mod rlp_encoding;
pub mod storage_trie;
pub mod trie_hashing;
pub mod trie_ops;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing_utils;
