use std::{
    iter::{once, repeat},
    str::FromStr,
    sync::Arc,
};

use eth_trie::{EthTrie, MemoryDB, Trie};
use ethereum_types::H256;
use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use crate::{
    nibbles::Nibbles,
    node::MaybeNode,
    trie_ops::{insert, TrieOpResult},
};

pub(crate) type TestInsertValEntry = (Nibbles, Vec<u8>);

pub(crate) fn common_setup() {
    // Try init since multiple tests calling `init` will cause an error.
    let _ = pretty_env_logger::try_init();
}

pub(crate) fn nibs(s: &str) -> Nibbles {
    Nibbles::from_str(s).unwrap()
}

pub(crate) fn entry(k: &str) -> TestInsertValEntry {
    (nibs(k), vec![2])
}

pub(crate) fn entry_with_value(k: &str, v: u8) -> TestInsertValEntry {
    (nibs(k), vec![v])
}

/// Needed when a test relies on a leaf being >= 32 bytes when RLP encoded.
pub(crate) fn large_entry(k: &str) -> TestInsertValEntry {
    (nibs(k), once(2).chain(repeat(255).take(32)).collect())
}

/// Random full length (`64` nibble) paths with random canonical values.
pub(crate) fn generate_n_random_fixed_trie_value_entries(
    n: usize,
    seed: u64,
) -> impl Iterator<Item = TestInsertValEntry> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(move |_| {
        (
            Nibbles::from_h256_be(H256(rng.gen())),
            gen_rand_canonical_value(&mut rng),
        )
    })
}

/// Random slots with values of mixed short and long form.
pub(crate) fn generate_n_random_storage_entries(
    n: usize,
    seed: u64,
) -> impl Iterator<Item = (H256, Vec<u8>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(move |_| {
        let len = rng.gen_range(0..100);
        let mut v = vec![0; len];
        rng.fill_bytes(&mut v);

        (H256(rng.gen()), v)
    })
}

fn gen_rand_canonical_value(rng: &mut StdRng) -> Vec<u8> {
    let len = rng.gen_range(1..=32);
    let mut buf = vec![0; len];
    rng.fill_bytes(&mut buf);
    buf[0] = rng.gen_range(1..=255);

    buf
}

pub(crate) fn trie_from_entries<'a>(
    entries: impl IntoIterator<Item = &'a TestInsertValEntry>,
) -> TrieOpResult<MaybeNode> {
    let mut root = None;
    for (k, v) in entries {
        root = Some(insert(&root, *k, v)?);
    }

    Ok(root)
}

pub(crate) fn create_truth_trie() -> EthTrie<MemoryDB> {
    let db = Arc::new(MemoryDB::new(true));
    EthTrie::new(db)
}

/// Root hash of the same entries according to an established eth trie
/// library. Leaf payloads are stored RLP encoded, which is what our leaves
/// hash to.
pub(crate) fn truth_root_hash<'a>(
    entries: impl IntoIterator<Item = &'a TestInsertValEntry>,
) -> H256 {
    let mut truth_trie = create_truth_trie();
    for (k, v) in entries {
        truth_trie
            .insert(&k.bytes_be(), &rlp::encode(&v.as_slice()))
            .unwrap();
    }

    // Both of these types are identical except that one is re-exported.
    H256(truth_trie.root_hash().unwrap().0)
}
