//! The two RLP primitives node encodings are built from.
//!
//! These are only used to produce the bytes that get hashed; snapshots of the
//! node graph go through [`coder`](crate::coder) instead.

use bytes::Bytes;
use rlp::RlpStream;

/// RLP of the empty byte string. Encodes an absent node.
pub const RLP_NULL: [u8; 1] = [0x80];

/// Reference encoding of the canonical empty leaf: a list holding one empty
/// list. This is what a node produces for slots that were explicitly zeroed.
pub const RLP_EMPTY_LEAF_REF: [u8; 2] = [0xc1, 0xc0];

/// Encodes a byte string.
///
/// A single byte below `0x80` is its own encoding, anything else gets a
/// length prefix (`0x80 + len` up to 55 bytes, `0xb7 + len_of_len` followed
/// by the big-endian length above that).
pub fn encode_bytes(v: &[u8]) -> Bytes {
    rlp::encode(&v).freeze()
}

/// Wraps already encoded items into a list, using the same length prefix
/// scheme with bases `0xc0` / `0xf7`.
pub fn encode_list<T: AsRef<[u8]>>(items: &[T]) -> Bytes {
    let mut stream = RlpStream::new_list(items.len());
    for item in items {
        stream.append_raw(item.as_ref(), 1);
    }

    stream.out().freeze()
}
