//! RLP node encodings, node references, root hashes and proofs.

use bytes::Bytes;
use enum_as_inner::EnumAsInner;
use ethereum_types::H256;
use keccak_hash::KECCAK_NULL_RLP;
use log::trace;

use crate::{
    nibbles::Nibbles,
    node::{MaybeNode, Node},
    rlp_encoding::{encode_bytes, encode_list, RLP_EMPTY_LEAF_REF, RLP_NULL},
    trie_ops::{TrieOpError, TrieOpResult},
    utils::hash_bytes,
};

/// How a node is referenced from its parent, and what a root hashes to.
#[derive(Clone, Debug, EnumAsInner, Eq, Hash, PartialEq)]
pub enum EncodedNode {
    /// Node that is RLPed but not hashed. Only encodings shorter than `32`
    /// bytes are referenced this way.
    Raw(Bytes),
    /// Node that is hashed.
    Hashed([u8; 32]),
}

impl From<&EncodedNode> for H256 {
    /// Always gives a `32` byte digest, hashing raw encodings.
    fn from(v: &EncodedNode) -> Self {
        match v {
            EncodedNode::Raw(b) => hash_bytes(b),
            EncodedNode::Hashed(h) => H256(*h),
        }
    }
}

impl AsRef<[u8]> for EncodedNode {
    fn as_ref(&self) -> &[u8] {
        match self {
            EncodedNode::Raw(b) => b.as_ref(),
            EncodedNode::Hashed(h) => h.as_slice(),
        }
    }
}

impl EncodedNode {
    /// The item this reference contributes to its parent's RLP list: raw
    /// encodings are embedded as is, hashes as a `32` byte string.
    fn to_rlp_item(&self) -> Bytes {
        match self {
            EncodedNode::Raw(b) => b.clone(),
            EncodedNode::Hashed(h) => encode_bytes(h),
        }
    }
}

/// RLP encoding of a (possibly absent) node.
pub fn encode_node(node: &MaybeNode) -> Bytes {
    match node {
        Some(n) => rlp_encode_node(n),
        None => Bytes::from_static(&RLP_NULL),
    }
}

pub(crate) fn rlp_encode_node(node: &Node) -> Bytes {
    match node {
        Node::Branch { children, encoding } => {
            if let Some(enc) = encoding.get() {
                return enc;
            }

            let items: Vec<Bytes> = children
                .iter()
                .map(|c| encode_node_ref(c).to_rlp_item())
                .chain(std::iter::once(Bytes::from_static(&RLP_NULL)))
                .collect();

            let enc = encode_list(&items);
            encoding.set(enc.clone());

            enc
        }
        Node::Extension { nibbles, child } => encode_list(&[
            encode_bytes(&nibbles.to_hex_prefix_encoding(false)),
            encode_node_ref_intern(child).to_rlp_item(),
        ]),
        Node::Leaf { nibbles, value } => encode_leaf(nibbles, value),
        Node::EmptyLeaf => encode_leaf(&Nibbles::default(), &[]),
    }
}

fn encode_leaf(nibbles: &Nibbles, value: &[u8]) -> Bytes {
    // The trie stores the RLP of the slot value, which is then encoded again as
    // the second list item.
    encode_list(&[
        encode_bytes(&nibbles.to_hex_prefix_encoding(true)),
        encode_bytes(&encode_bytes(value)),
    ])
}

/// Reference to `node` as it appears inside a parent.
///
/// Absent nodes are the RLP null and the canonical empty leaf is always the
/// fixed `0xc1c0`. Any other node is inlined if its encoding is shorter than
/// `32` bytes and hashed otherwise.
pub fn encode_node_ref(node: &MaybeNode) -> EncodedNode {
    match node {
        Some(n) => encode_node_ref_intern(n),
        None => EncodedNode::Raw(Bytes::from_static(&RLP_NULL)),
    }
}

fn encode_node_ref_intern(node: &Node) -> EncodedNode {
    match node {
        Node::EmptyLeaf => EncodedNode::Raw(Bytes::from_static(&RLP_EMPTY_LEAF_REF)),
        _ => hash_bytes_if_large_enough(rlp_encode_node(node)),
    }
}

fn hash_bytes_if_large_enough(bytes: Bytes) -> EncodedNode {
    match bytes.len() >= 32 {
        false => EncodedNode::Raw(bytes),
        true => EncodedNode::Hashed(hash_bytes(&bytes).0),
    }
}

/// The root hash of a trie.
///
/// The empty trie hashes to `keccak(0x80)`. A root whose encoding is shorter
/// than `32` bytes is returned raw instead of hashed.
pub fn root_hash(root: &MaybeNode) -> EncodedNode {
    match root {
        Some(n) => hash_bytes_if_large_enough(rlp_encode_node(n)),
        None => EncodedNode::Hashed(KECCAK_NULL_RLP.0),
    }
}

/// Collects the encodings of every node visited while walking `path`, from
/// the root down.
///
/// The walk stops at a leaf, at an absent branch child or at the first
/// extension that does not match, so the same list serves as an inclusion or
/// an exclusion proof. An absent root gives `[0x80]`.
pub fn get_proof(root: &MaybeNode, path: &Nibbles) -> TrieOpResult<Vec<Bytes>> {
    let Some(mut curr_node) = root.as_deref() else {
        return Ok(vec![Bytes::from_static(&RLP_NULL)]);
    };

    let mut path = *path;
    let mut proof = Vec::new();

    loop {
        proof.push(rlp_encode_node(curr_node));

        match curr_node {
            Node::Branch { children, .. } => {
                if path.is_empty() {
                    return Err(TrieOpError::PathExhausted {
                        node: curr_node.into(),
                        remaining: path,
                    });
                }

                let nibble = path.pop_next_nibble_front();
                trace!("Proof traversed Branch (nibble: {:x})", nibble);

                match children[nibble as usize].as_deref() {
                    Some(child) => curr_node = child,
                    None => break,
                }
            }
            Node::Extension { nibbles, child } => {
                trace!("Proof traversed Extension (nibbles: {})", nibbles);
                if !path.starts_with(nibbles) {
                    break;
                }

                path.truncate_n_nibbles_front_mut(nibbles.count());
                curr_node = child.as_ref();
            }
            Node::Leaf { .. } | Node::EmptyLeaf => break,
        }
    }

    Ok(proof)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use eth_trie::Trie;
    use ethereum_types::H256;
    use hex_literal::hex;
    use keccak_hash::KECCAK_NULL_RLP;
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    use super::{encode_node, encode_node_ref, get_proof, root_hash, EncodedNode};
    use crate::{
        nibbles::Nibbles,
        node::{MaybeNode, Node},
        rlp_encoding::RLP_NULL,
        testing_utils::{
            common_setup, create_truth_trie, entry, generate_n_random_fixed_trie_value_entries,
            large_entry, nibs, trie_from_entries, truth_root_hash,
        },
        trie_ops::{delete, insert, TrieOpError, TrieOpResult},
        utils::hash_bytes,
    };

    const NUM_INSERTS_FOR_ETH_TRIE_CRATE_MASSIVE_TEST: usize = 1000;

    fn our_hash(root: &MaybeNode) -> H256 {
        (&root_hash(root)).into()
    }

    #[test]
    fn empty_hash_is_correct() {
        common_setup();

        assert_eq!(root_hash(&None), EncodedNode::Hashed(KECCAK_NULL_RLP.0));
        assert_eq!(our_hash(&None), hash_bytes(RLP_NULL));
        assert_eq!(encode_node(&None).as_ref(), &RLP_NULL);
    }

    #[test]
    fn short_root_is_not_hashed() -> TrieOpResult<()> {
        common_setup();

        let root = trie_from_entries(&[(nibs("0x1"), vec![1])])?;
        let expected = hex!("c23101");

        assert_eq!(root_hash(&root), EncodedNode::Raw(expected.to_vec().into()));
        assert_eq!(our_hash(&root), hash_bytes(expected));

        Ok(())
    }

    #[test]
    fn single_leaf_hash_is_correct_and_stable() -> TrieOpResult<()> {
        common_setup();

        let entries: Vec<_> = generate_n_random_fixed_trie_value_entries(1, 1).collect();
        let root = trie_from_entries(&entries)?;

        let h = root_hash(&root);
        assert!(h.is_hashed());
        assert_ne!(h, EncodedNode::Hashed(KECCAK_NULL_RLP.0));
        assert_eq!(h, root_hash(&root));
        assert_eq!(our_hash(&root), truth_root_hash(&entries));

        Ok(())
    }

    #[test]
    fn empty_leaf_is_referenced_by_fixed_constant() -> TrieOpResult<()> {
        common_setup();

        let root = trie_from_entries(&[(nibs("0x10"), vec![]), (nibs("0x11"), vec![1])])?;

        let mut expected = hex!("d611d4c1c0c22001").to_vec();
        expected.extend([0x80; 15]);

        assert_eq!(encode_node(&root), expected);
        assert_eq!(root_hash(&root), EncodedNode::Raw(expected.into()));

        // The empty leaf encodes normally, only its reference is special.
        let empty_leaf: MaybeNode = Some(Arc::new(Node::EmptyLeaf));
        assert_eq!(encode_node(&empty_leaf).as_ref(), &hex!("c3208180"));
        assert_eq!(
            encode_node_ref(&empty_leaf),
            EncodedNode::Raw(hex!("c1c0").to_vec().into())
        );

        Ok(())
    }

    #[test]
    fn large_nodes_are_referenced_by_hash() -> TrieOpResult<()> {
        common_setup();

        let root = trie_from_entries(&[large_entry("0x12"), large_entry("0x13")])?;
        let Some(Node::Extension { child, .. }) = root.as_deref() else {
            panic!("Expected an extension at the root");
        };
        let Node::Branch { children, .. } = child.as_ref() else {
            panic!("Expected a branch under the extension");
        };

        let child_ref = encode_node_ref(&children[2]);
        let child_enc = encode_node(&children[2]);
        assert!(child_enc.len() >= 32);
        assert_eq!(child_ref, EncodedNode::Hashed(hash_bytes(&child_enc).0));

        Ok(())
    }

    #[test]
    fn branch_encoding_is_cached() -> TrieOpResult<()> {
        common_setup();

        let root = trie_from_entries(&[entry("0x12"), entry("0x34")])?;
        let Some(Node::Branch { encoding, .. }) = root.as_deref() else {
            panic!("Expected a branch at the root");
        };

        assert!(encoding.get().is_none());
        let enc = encode_node(&root);
        assert_eq!(encoding.get(), Some(enc.clone()));
        assert_eq!(encode_node(&root), enc);

        Ok(())
    }

    #[test]
    fn massive_random_data_insert_hashes_agree_with_eth_trie() -> TrieOpResult<()> {
        common_setup();

        let entries: Vec<_> =
            generate_n_random_fixed_trie_value_entries(NUM_INSERTS_FOR_ETH_TRIE_CRATE_MASSIVE_TEST, 0)
                .collect();

        let mut truth_trie = create_truth_trie();
        let mut root = None;

        for (k, v) in entries.iter() {
            root = Some(insert(&root, *k, v)?);
            truth_trie
                .insert(&k.bytes_be(), &rlp::encode(&v.as_slice()))
                .unwrap();

            assert_eq!(our_hash(&root), H256(truth_trie.root_hash().unwrap().0));
        }

        Ok(())
    }

    #[test]
    fn massive_trie_data_deletion_agrees_with_eth_trie() -> Result<(), Box<dyn std::error::Error>> {
        common_setup();

        let entries: Vec<_> =
            generate_n_random_fixed_trie_value_entries(NUM_INSERTS_FOR_ETH_TRIE_CRATE_MASSIVE_TEST, 8)
                .collect();

        let mut root = trie_from_entries(&entries)?;
        let mut truth_trie = create_truth_trie();

        for (k, v) in entries.iter() {
            truth_trie.insert(&k.bytes_be(), &rlp::encode(&v.as_slice()))?;
        }

        let half_entries = entries.len() / 2;
        for (k, _) in entries.iter().take(half_entries) {
            root = delete(&root, *k);
            truth_trie.remove(&k.bytes_be())?;

            let truth_root_hash = H256(truth_trie.root_hash()?.0);
            assert_eq!(our_hash(&root), truth_root_hash);
        }

        Ok(())
    }

    #[test]
    fn root_hash_is_independent_of_insert_order() -> TrieOpResult<()> {
        common_setup();

        let mut entries: Vec<_> = generate_n_random_fixed_trie_value_entries(300, 4).collect();
        let expected = root_hash(&trie_from_entries(&entries)?);

        let mut rng = StdRng::seed_from_u64(4);
        for _ in 0..5 {
            entries.shuffle(&mut rng);
            assert_eq!(root_hash(&trie_from_entries(&entries)?), expected);
        }

        Ok(())
    }

    #[test]
    fn proof_of_empty_trie_is_null() -> TrieOpResult<()> {
        common_setup();

        let proof = get_proof(&None, &nibs("0x1234"))?;
        assert_eq!(proof.len(), 1);
        assert_eq!(proof[0].as_ref(), &RLP_NULL);

        Ok(())
    }

    #[test]
    fn proof_walks_from_root_to_leaf() -> TrieOpResult<()> {
        common_setup();

        let root = trie_from_entries(&[entry("0x1234"), entry("0x1256"), entry("0x2000")])?;

        // Branch -> Extension -> Branch -> Leaf
        let proof = get_proof(&root, &nibs("0x1234"))?;
        assert_eq!(proof.len(), 4);
        assert_eq!(proof[0], encode_node(&root));

        // Missing branch child stops right at the branch.
        let proof = get_proof(&root, &nibs("0x3000"))?;
        assert_eq!(proof, vec![encode_node(&root)]);

        // Extension mismatch stops at the extension.
        let proof = get_proof(&root, &nibs("0x1300"))?;
        assert_eq!(proof.len(), 2);

        Ok(())
    }

    #[test]
    fn proof_reaching_branch_with_empty_path_errors() -> TrieOpResult<()> {
        common_setup();

        let root = trie_from_entries(&[entry("0x1234"), entry("0x2234")])?;
        assert!(matches!(
            get_proof(&root, &Nibbles::default()),
            Err(TrieOpError::PathExhausted { .. })
        ));

        Ok(())
    }
}
