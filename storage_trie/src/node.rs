//! Definitions for the core node types [`Node`], [`WrappedNode`] and
//! [`MaybeNode`].

use std::{fmt::Debug, sync::Arc};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::{
    nibbles::Nibbles,
    trie_ops::{TrieOpError, TrieOpResult},
};

/// Alias for a node shared between every root that references it.
pub type WrappedNode = Arc<Node>;

/// A reference to a subtree, or `None` for an absent (empty) subtree.
///
/// Absent is different from [`Node::EmptyLeaf`]: absent means nothing is
/// stored under this prefix, while the empty leaf is an entry holding an
/// explicitly zeroed value.
pub type MaybeNode = Option<WrappedNode>;

/// Write-once memo of a branch's own RLP encoding.
///
/// Nodes are never mutated after construction, so once set the encoding
/// stays valid for the lifetime of the node.
#[derive(Default)]
pub struct EncodingCache(RwLock<Option<Bytes>>);

impl EncodingCache {
    pub(crate) fn get(&self) -> Option<Bytes> {
        self.0.read().clone()
    }

    pub(crate) fn set(&self, v: Bytes) {
        *self.0.write() = Some(v);
    }
}

impl Clone for EncodingCache {
    fn clone(&self) -> Self {
        Self(RwLock::new(self.get()))
    }
}

impl Debug for EncodingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &*self.0.read() {
            Some(enc) => write!(f, "Cached({} bytes)", enc.len()),
            None => write!(f, "Uncached"),
        }
    }
}

#[derive(Clone, Debug)]
/// A node of the storage trie. This mirrors the structure of an Ethereum
/// trie, except that branches never hold a value: every key is a `64` nibble
/// hash, so all values live in leaves.
pub enum Node {
    /// The distinguished leaf with an empty path and an empty value.
    EmptyLeaf,
    /// A branch node, which consists of 16 children.
    Branch {
        /// The 16 children of this branch node, indexed by the next nibble.
        children: Box<[MaybeNode; 16]>,
        /// Memoised RLP encoding of this branch.
        encoding: EncodingCache,
    },
    /// An extension node, which consists of a list of nibbles and a single
    /// child.
    Extension {
        /// The path of this extension. Never empty.
        nibbles: Nibbles,
        /// The child of this extension node.
        child: WrappedNode,
    },
    /// A leaf node, which consists of a list of nibbles and a value.
    Leaf {
        /// The remaining path of this leaf node.
        nibbles: Nibbles,
        /// The payload of this node. Empty or without a leading zero byte.
        value: Vec<u8>,
    },
}

impl Eq for Node {}

/// Node equality means all nodes through the trie are equivalent. Cached
/// encodings are ignored.
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::EmptyLeaf, Node::EmptyLeaf) => true,
            (Node::Branch { children: c1, .. }, Node::Branch { children: c2, .. }) => c1 == c2,
            (
                Node::Extension {
                    nibbles: n1,
                    child: c1,
                },
                Node::Extension {
                    nibbles: n2,
                    child: c2,
                },
            ) => n1 == n2 && c1 == c2,
            (
                Node::Leaf {
                    nibbles: n1,
                    value: v1,
                },
                Node::Leaf {
                    nibbles: n2,
                    value: v2,
                },
            ) => n1 == n2 && v1 == v2,
            (_, _) => false,
        }
    }
}

impl Node {
    /// Creates a leaf, enforcing the canonical value rules.
    ///
    /// An empty value under an empty path yields [`Node::EmptyLeaf`]. A value
    /// with a leading zero byte is rejected, since leaf values are hashed in
    /// their minimal big-endian form.
    pub fn leaf(nibbles: Nibbles, value: &[u8]) -> TrieOpResult<Self> {
        match value.first() {
            None if nibbles.is_empty() => Ok(Node::EmptyLeaf),
            Some(0) => Err(TrieOpError::NonCanonicalValue(hex::encode(value))),
            _ => Ok(Node::Leaf {
                nibbles,
                value: value.to_vec(),
            }),
        }
    }

    /// Creates a branch from its children.
    pub fn branch(children: [MaybeNode; 16]) -> Self {
        Node::Branch {
            children: Box::new(children),
            encoding: EncodingCache::default(),
        }
    }

    /// Creates an extension node.
    ///
    /// # Panics
    /// Panics if `nibbles` is empty.
    pub fn extension(nibbles: Nibbles, child: WrappedNode) -> Self {
        assert!(
            !nibbles.is_empty(),
            "Attempted to create an extension with an empty path"
        );

        Node::Extension { nibbles, child }
    }

    /// Returns the remaining path and value if this node holds one.
    pub fn leaf_parts(&self) -> Option<(Nibbles, &[u8])> {
        match self {
            Node::EmptyLeaf => Some((Nibbles::default(), &[])),
            Node::Leaf { nibbles, value } => Some((*nibbles, value)),
            Node::Branch { .. } | Node::Extension { .. } => None,
        }
    }

    /// Returns the value if this node is a leaf.
    pub fn leaf_value(&self) -> Option<&[u8]> {
        self.leaf_parts().map(|(_, v)| v)
    }

    /// `true` for [`Node::EmptyLeaf`].
    pub const fn is_empty_leaf(&self) -> bool {
        matches!(self, Node::EmptyLeaf)
    }
}

pub(crate) fn new_branch_child_arr() -> [MaybeNode; 16] {
    Default::default()
}

#[cfg(test)]
mod tests {
    use std::{str::FromStr, sync::Arc};

    use super::{new_branch_child_arr, Node};
    use crate::{nibbles::Nibbles, trie_ops::TrieOpError};

    #[test]
    fn empty_path_and_value_is_the_empty_leaf() {
        assert_eq!(Node::leaf(Nibbles::default(), &[]), Ok(Node::EmptyLeaf));

        let n = Node::leaf(Nibbles::from_str("0x1").unwrap(), &[]).unwrap();
        assert!(!n.is_empty_leaf());
        assert_eq!(n.leaf_value(), Some([].as_slice()));
    }

    #[test]
    fn leading_zero_values_are_rejected() {
        assert!(matches!(
            Node::leaf(Nibbles::default(), &[0, 1]),
            Err(TrieOpError::NonCanonicalValue(_))
        ));
        assert!(Node::leaf(Nibbles::default(), &[1, 0]).is_ok());
    }

    #[test]
    fn branch_equality_ignores_cache() {
        let mut children = new_branch_child_arr();
        children[3] = Some(Arc::new(Node::EmptyLeaf));

        let a = Node::branch(children.clone());
        let b = Node::branch(children);

        if let Node::Branch { encoding, .. } = &a {
            encoding.set(vec![1, 2, 3].into());
        }

        assert_eq!(a, b);
    }

    #[test]
    #[should_panic]
    fn empty_extension_panics() {
        Node::extension(Nibbles::default(), Arc::new(Node::EmptyLeaf));
    }
}
