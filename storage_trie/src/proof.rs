//! Storage proofs in the shape `eth_getProof` returns them, and a verifier
//! that checks a proof against nothing but a root hash.

use bytes::Bytes;
use ethereum_types::{H256, U256};
use log::trace;
use rlp::{DecoderError, Rlp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    kv::slot_path,
    nibbles::{FromHexPrefixError, Nibbles},
    node::{MaybeNode, Node},
    rlp_encoding::RLP_EMPTY_LEAF_REF,
    trie_hashing::{get_proof, rlp_encode_node},
    trie_ops::{get, TrieOpResult},
    utils::{hash_bytes, right_aligned_word},
};

/// The proof of a single storage slot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProof {
    /// The slot being proven.
    pub key: H256,
    /// The word stored at the slot, zero if it is absent.
    pub value: U256,
    /// Encodings of every node on the way to the slot, from the root down.
    #[serde(with = "prefixed_hex_list")]
    pub proof: Vec<Bytes>,
}

/// Errors returned when a proof does not check out.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ProofError {
    /// A proof node is not valid RLP.
    #[error(transparent)]
    Rlp(#[from] DecoderError),

    /// The proof stops before the path reaches a leaf or a dead end.
    #[error("Proof ended before the path was resolved")]
    MissingNode,

    /// A node does not match the reference its parent holds.
    #[error("Proof node at depth {depth} does not match the reference of its parent")]
    HashMismatch {
        /// Index of the offending node in the proof.
        depth: usize,
    },

    /// A leaf or extension has a malformed path.
    #[error(transparent)]
    InvalidPath(#[from] FromHexPrefixError),

    /// A node that can not appear at this point of a storage trie.
    #[error("Unexpected node with {items} items at depth {depth}")]
    UnexpectedNode {
        /// Index of the offending node in the proof.
        depth: usize,
        /// Number of RLP list items the node has.
        items: usize,
    },

    /// More nodes follow the one that resolved the path.
    #[error("Proof has nodes past the one that resolved the path")]
    TrailingNodes,
}

/// Builds the proof for `slot`, whose trie path is `keccak(slot)`.
pub fn storage_proof(root: &MaybeNode, slot: H256) -> TrieOpResult<StorageProof> {
    let path = slot_path(&slot);
    let value = get(root, &path)
        .map(|v| U256::from_big_endian(&right_aligned_word(v)))
        .unwrap_or_default();

    Ok(StorageProof {
        key: slot,
        value,
        proof: get_proof(root, &path)?,
    })
}

/// What the next proof node has to match.
enum NodeRef {
    Hash(H256),
    Inline(Vec<u8>),
    EmptyLeaf,
}

enum Step {
    Next(NodeRef),
    Done(Option<Vec<u8>>),
}

/// Checks `proof` against `root_hash` and returns the value at `path`, or
/// `None` if the proof shows that nothing is stored there.
pub fn verify_proof(
    root_hash: H256,
    path: &Nibbles,
    proof: &[Bytes],
) -> Result<Option<Vec<u8>>, ProofError> {
    let mut path = *path;
    let mut expected = NodeRef::Hash(root_hash);

    for (depth, node) in proof.iter().enumerate() {
        let matches = match &expected {
            NodeRef::Hash(h) => hash_bytes(node) == *h,
            NodeRef::Inline(raw) => node.as_ref() == raw.as_slice(),
            NodeRef::EmptyLeaf => *node == rlp_encode_node(&Node::EmptyLeaf),
        };

        if !matches {
            return Err(ProofError::HashMismatch { depth });
        }

        match step(&Rlp::new(node), &mut path, depth)? {
            Step::Next(next) => expected = next,
            Step::Done(value) => {
                return match depth + 1 == proof.len() {
                    true => Ok(value),
                    false => Err(ProofError::TrailingNodes),
                };
            }
        }
    }

    Err(ProofError::MissingNode)
}

fn step(node: &Rlp, path: &mut Nibbles, depth: usize) -> Result<Step, ProofError> {
    if node.is_data() {
        // Only an empty trie has a null node as its proof.
        return match depth == 0 && node.data()?.is_empty() {
            true => Ok(Step::Done(None)),
            false => Err(ProofError::UnexpectedNode { depth, items: 0 }),
        };
    }

    match node.item_count()? {
        17 => {
            if path.is_empty() {
                return Err(ProofError::UnexpectedNode { depth, items: 17 });
            }

            let nibble = path.pop_next_nibble_front();
            trace!("Verifying branch (nibble: {:x})", nibble);

            child_ref(&node.at(nibble as usize)?)
        }
        2 => {
            let (nibbles, is_leaf) = Nibbles::from_hex_prefix_encoding(node.at(0)?.data()?)?;

            if is_leaf {
                trace!("Verifying leaf (nibbles: {})", nibbles);
                if *path != nibbles {
                    return Ok(Step::Done(None));
                }

                let value = Rlp::new(node.at(1)?.data()?).data()?;
                return Ok(Step::Done(Some(value.to_vec())));
            }

            trace!("Verifying extension (nibbles: {})", nibbles);
            if !path.starts_with(&nibbles) {
                return Ok(Step::Done(None));
            }

            path.truncate_n_nibbles_front_mut(nibbles.count());
            child_ref(&node.at(1)?)
        }
        items => Err(ProofError::UnexpectedNode { depth, items }),
    }
}

fn child_ref(child: &Rlp) -> Result<Step, ProofError> {
    if child.is_list() {
        let raw = child.as_raw();
        return Ok(Step::Next(match raw == RLP_EMPTY_LEAF_REF {
            true => NodeRef::EmptyLeaf,
            false => NodeRef::Inline(raw.to_vec()),
        }));
    }

    match child.data()? {
        [] => Ok(Step::Done(None)),
        h if h.len() == 32 => Ok(Step::Next(NodeRef::Hash(H256::from_slice(h)))),
        _ => Err(DecoderError::RlpInvalidLength.into()),
    }
}

/// (De)serializes a list of byte strings as `0x` prefixed hex strings.
mod prefixed_hex_list {
    use bytes::Bytes;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(v: &[Bytes], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(v.iter().map(|b| format!("0x{}", hex::encode(b))))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Bytes>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| {
                let s = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                hex::decode(s).map(Bytes::from).map_err(D::Error::custom)
            })
            .collect()
    }
}
