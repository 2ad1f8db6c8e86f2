//! Simple example showing off the basics of the library.

use std::str::FromStr;

use ethereum_types::{H256, U256};
use storage_trie::{
    coder::LengthEncoding,
    kv::{mapping_slot, slot_path, StorageMode},
    nibbles::Nibbles,
    proof::verify_proof,
    storage_trie::StorageTrie,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Construct an empty trie. Byte-string writes zero any slots a value no
    // longer uses, just like the EVM does:
    let mut trie = StorageTrie::new(StorageMode::Zero);

    // Raw values can be inserted at any path. Values must be in their minimal
    // big-endian form (no leading zero byte):
    trie.insert(Nibbles::from_str("0x1234")?, &[1, 2, 3])?;
    assert_eq!(trie.get(Nibbles::from_str("0x1234")?), Some([1, 2, 3].as_slice()));
    assert_eq!(trie.delete(Nibbles::from_str("0x1234")?), Some(vec![1, 2, 3]));

    // In a real contract every slot lives at `keccak(slot)`. Single words are
    // written like an `sstore`:
    trie.insert_word(H256::from_low_u64_be(0), U256::from(42))?;
    assert_eq!(trie.read_word(H256::from_low_u64_be(0))?, U256::from(42));

    // `bytes` and `string` values are split across chained slots once they
    // reach 32 bytes:
    let slot = H256::from_low_u64_be(1);
    trie.insert_bytes(slot, &[0xab; 65])?;
    assert_eq!(trie.read_bytes(slot)?, Some(vec![0xab; 65]));

    // Mapping entries use the Solidity slot derivation:
    let owner = H256::repeat_byte(0x11);
    trie.insert_word(mapping_slot(U256::from(2), owner.as_bytes()), U256::from(1000))?;

    // The storage root is what an account would commit to:
    let hash = trie.hash();
    println!("storage root: {:x}", hash);

    // Proofs come in the shape `eth_getProof` returns and can be checked
    // against the root alone:
    let proof = trie.storage_proof(slot)?;
    println!("{}", serde_json::to_string_pretty(&proof)?);
    assert!(verify_proof(hash, &slot_path(&slot), &proof.proof)?.is_some());

    // Whole tries can be snapshotted and restored:
    let snapshot = trie.to_snapshot(LengthEncoding::VarInt)?;
    let restored = StorageTrie::from_snapshot(&snapshot, LengthEncoding::VarInt, trie.mode())?;
    assert_eq!(restored.hash(), hash);

    Ok(())
}
