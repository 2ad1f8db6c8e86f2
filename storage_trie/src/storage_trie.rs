//! An owning handle over a storage trie root.
//!
//! The free functions in [`trie_ops`](crate::trie_ops) and [`kv`](crate::kv)
//! never modify a trie, they return a new root instead. [`StorageTrie`] holds
//! the current root and swaps it on every write, so older handles obtained
//! through [`Clone`] keep seeing the trie as it was.

use bytes::Bytes;
use ethereum_types::{H256, U256};

use crate::{
    coder::{decode_snapshot, encode_snapshot, CoderResult, LengthEncoding},
    kv::{self, KvResult, StorageMode},
    nibbles::Nibbles,
    node::{MaybeNode, Node},
    proof::{self, StorageProof},
    trie_hashing::{get_proof, root_hash, EncodedNode},
    trie_ops::{self, TrieOpResult},
};

/// A storage trie together with the [`StorageMode`] used by its byte-string
/// writes.
#[derive(Clone, Debug, Default)]
pub struct StorageTrie {
    root: MaybeNode,
    mode: StorageMode,
}

impl StorageTrie {
    /// Creates an empty trie whose byte-string writes use `mode`.
    pub fn new(mode: StorageMode) -> Self {
        Self { root: None, mode }
    }

    /// Wraps an existing root.
    pub fn from_root(root: MaybeNode, mode: StorageMode) -> Self {
        Self { root, mode }
    }

    /// The current root.
    pub fn root(&self) -> &MaybeNode {
        &self.root
    }

    /// The mode used by [`Self::insert_bytes`].
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// `true` if nothing is stored in the trie.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Inserts a raw value at `k`.
    pub fn insert<K: Into<Nibbles>>(&mut self, k: K, v: &[u8]) -> TrieOpResult<()> {
        self.root = Some(trie_ops::insert(&self.root, k.into(), v)?);
        Ok(())
    }

    /// Inserts every entry of `entries`, stopping at the first failure.
    pub fn extend<K, V, I>(&mut self, entries: I) -> TrieOpResult<()>
    where
        K: Into<Nibbles>,
        V: AsRef<[u8]>,
        I: IntoIterator<Item = (K, V)>,
    {
        for (k, v) in entries {
            self.insert(k, v.as_ref())?;
        }

        Ok(())
    }

    /// Removes the entry at `k`, returning its value if there was one.
    pub fn delete<K: Into<Nibbles>>(&mut self, k: K) -> Option<Vec<u8>> {
        let k = k.into();
        let old = self.get(k).map(<[u8]>::to_vec);
        self.root = trie_ops::delete(&self.root, k);

        old
    }

    /// Removes every entry whose path starts with `prefix`.
    pub fn delete_prefix<K: Into<Nibbles>>(&mut self, prefix: K) {
        self.root = trie_ops::delete_prefix(&self.root, prefix.into());
    }

    /// The value at `k`, if any.
    pub fn get<K: Into<Nibbles>>(&self, k: K) -> Option<&[u8]> {
        trie_ops::get(&self.root, &k.into())
    }

    /// The leaf node reached by `k`, if any.
    pub fn find_leaf<K: Into<Nibbles>>(&self, k: K) -> Option<&Node> {
        trie_ops::find_leaf(&self.root, &k.into())
    }

    /// `true` if a value is stored at `k`.
    pub fn contains<K: Into<Nibbles>>(&self, k: K) -> bool {
        self.get(k).is_some()
    }

    /// Every entry of the trie, in path order.
    pub fn items(&self) -> Vec<(Nibbles, Vec<u8>)> {
        trie_ops::items(&self.root)
    }

    /// Writes a `bytes` or `string` value at `slot` using this trie's mode.
    pub fn insert_bytes(&mut self, slot: H256, value: &[u8]) -> KvResult<()> {
        self.root = kv::insert_bytes(&self.root, slot, value, self.mode)?;
        Ok(())
    }

    /// Reads back a value written by [`Self::insert_bytes`].
    pub fn read_bytes(&self, slot: H256) -> KvResult<Option<Vec<u8>>> {
        kv::read_bytes(&self.root, slot)
    }

    /// Stores a single word at `slot`.
    pub fn insert_word(&mut self, slot: H256, value: U256) -> KvResult<()> {
        self.root = kv::insert_word(&self.root, slot, value, self.mode)?;
        Ok(())
    }

    /// Reads a single word from `slot`.
    pub fn read_word(&self, slot: H256) -> KvResult<U256> {
        kv::read_word(&self.root, slot)
    }

    /// The storage root as it would appear in an account.
    pub fn hash(&self) -> H256 {
        H256::from(&self.root_hash())
    }

    /// The root reference, which is left raw if the root encodes to fewer
    /// than `32` bytes.
    pub fn root_hash(&self) -> EncodedNode {
        root_hash(&self.root)
    }

    /// Node encodings along the path `k`, from the root down.
    pub fn proof<K: Into<Nibbles>>(&self, k: K) -> TrieOpResult<Vec<Bytes>> {
        get_proof(&self.root, &k.into())
    }

    /// The proof of `slot`, in the shape returned by `eth_getProof`.
    pub fn storage_proof(&self, slot: H256) -> TrieOpResult<StorageProof> {
        proof::storage_proof(&self.root, slot)
    }

    /// Serializes the whole trie.
    pub fn to_snapshot(&self, length_encoding: LengthEncoding) -> CoderResult<Vec<u8>> {
        encode_snapshot(&self.root, length_encoding)
    }

    /// Restores a trie written by [`Self::to_snapshot`].
    pub fn from_snapshot(
        bytes: &[u8],
        length_encoding: LengthEncoding,
        mode: StorageMode,
    ) -> CoderResult<Self> {
        Ok(Self::from_root(decode_snapshot(bytes, length_encoding)?, mode))
    }
}

impl Eq for StorageTrie {}
impl PartialEq for StorageTrie {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl From<MaybeNode> for StorageTrie {
    fn from(root: MaybeNode) -> Self {
        Self::from_root(root, StorageMode::default())
    }
}
