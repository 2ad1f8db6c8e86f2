//! Various types and logic that don't fit well into any other module.

use std::fmt::{self, Display};

use ethereum_types::H256;
use keccak_hash::keccak;
use serde::{Deserialize, Serialize};

use crate::node::Node;

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
/// Simplified trie node type to make logging cleaner.
pub enum TrieNodeType {
    /// Absent subtree.
    Empty,

    /// The canonical empty leaf.
    EmptyLeaf,

    /// Branch node.
    Branch,

    /// Extension node.
    Extension,

    /// Leaf node.
    Leaf,
}

impl From<&Node> for TrieNodeType {
    fn from(node: &Node) -> Self {
        match node {
            Node::EmptyLeaf => Self::EmptyLeaf,
            Node::Branch { .. } => Self::Branch,
            Node::Extension { .. } => Self::Extension,
            Node::Leaf { .. } => Self::Leaf,
        }
    }
}

impl<N: AsRef<Node>> From<&Option<N>> for TrieNodeType {
    fn from(node: &Option<N>) -> Self {
        node.as_ref()
            .map_or(Self::Empty, |n| Self::from(n.as_ref()))
    }
}

impl Display for TrieNodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrieNodeType::Empty => "Empty",
            TrieNodeType::EmptyLeaf => "EmptyLeaf",
            TrieNodeType::Branch => "Branch",
            TrieNodeType::Extension => "Extension",
            TrieNodeType::Leaf => "Leaf",
        };

        write!(f, "{}", s)
    }
}

pub(crate) const fn is_even(num: usize) -> bool {
    num & 1 == 0
}

/// Keccak-256 of `bytes`.
pub fn hash_bytes(bytes: impl AsRef<[u8]>) -> H256 {
    keccak(bytes)
}

/// Drops every leading zero byte, giving the minimal big-endian form. An
/// all-zero input trims to an empty slice.
pub fn trim_leading_zeros(v: &[u8]) -> &[u8] {
    let first_non_zero = v.iter().position(|b| *b != 0).unwrap_or(v.len());
    &v[first_non_zero..]
}

/// Increments a 32-byte word as a big-endian counter, wrapping to zero on
/// overflow. This is how consecutive storage slots are allocated.
pub fn increment_be(word: &mut H256) {
    for b in word.0.iter_mut().rev() {
        let (next, overflow) = b.overflowing_add(1);
        *b = next;

        if !overflow {
            return;
        }
    }
}

/// Right-pads `v` with zeros into a 32-byte word.
///
/// # Panics
/// Panics if `v` is longer than 32 bytes.
pub(crate) fn left_aligned_word(v: &[u8]) -> [u8; 32] {
    let mut word = [0; 32];
    word[..v.len()].copy_from_slice(v);

    word
}

/// Left-pads `v` with zeros into a 32-byte big-endian word, keeping only the
/// lowest 32 bytes if `v` is longer.
pub(crate) fn right_aligned_word(v: &[u8]) -> [u8; 32] {
    let v = &v[v.len().saturating_sub(32)..];
    let mut word = [0; 32];
    word[32 - v.len()..].copy_from_slice(v);

    word
}
