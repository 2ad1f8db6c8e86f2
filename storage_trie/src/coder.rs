//! A compact binary snapshot format for the node graph.
//!
//! This is independent from the RLP encoding used for hashing. Each node is
//! written as a one byte type tag followed by its contents:
//!
//! | tag | node        | contents                                   |
//! |-----|-------------|--------------------------------------------|
//! | `0` | absent      |                                            |
//! | `1` | branch      | 16 children, in nibble order               |
//! | `2` | extension   | path, child (never absent)                 |
//! | `3` | empty leaf  |                                            |
//! | `4` | leaf        | path, value length, value bytes            |
//!
//! Paths are a nibble count byte followed by the packed nibble pairs, with the
//! last low nibble zeroed when the count is odd.

use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::{
    nibbles::{Nibbles, MAX_NIBBLES},
    node::{new_branch_child_arr, MaybeNode, Node},
    trie_ops::TrieOpError,
};

/// Largest value length a [`LengthEncoding::VarInt`] can hold.
pub const MAX_LENGTH: usize = (1 << 22) - 1;

const DEFAULT_CAPACITY: usize = 1024;

const TY_NULL: u8 = 0;
const TY_BRANCH: u8 = 1;
const TY_EXTENSION: u8 = 2;
const TY_EMPTY_LEAF: u8 = 3;
const TY_LEAF: u8 = 4;

// A valid trie never nests deeper than one node per nibble plus the leaf.
const MAX_DEPTH: usize = MAX_NIBBLES + 1;

/// Stores the result of encoding or decoding a snapshot.
pub type CoderResult<T> = Result<T, CoderError>;

/// Errors encountered while writing or reading a snapshot.
#[derive(Clone, Debug, Eq, Error, Hash, PartialEq)]
pub enum CoderError {
    /// Tried to read past the end of the buffer.
    #[error("Unexpected end of buffer (needed: {needed}, len: {len})")]
    EndOfBuffer {
        /// Position the read would have ended at.
        needed: usize,
        /// Length of the buffer.
        len: usize,
    },

    /// The type tag of a node is not one we know about.
    #[error("Unknown node type tag: {0}")]
    UnknownType(u8),

    /// An extension was followed by an absent child.
    #[error("Decoded an extension node without a child")]
    ExtensionWithoutChild,

    /// An extension was stored with a zero length path.
    #[error("Decoded an extension node with an empty path")]
    EmptyExtensionPath,

    /// A value is too long for the chosen length encoding.
    #[error("Value length {len} does not fit in the length encoding (max: {max})")]
    LengthOverflow {
        /// The length that was written.
        len: usize,
        /// The largest length the encoding supports.
        max: usize,
    },

    /// A stored path claimed more nibbles than a trie path can hold.
    #[error("Decoded a path of {0} nibbles (max: 64)")]
    PathTooLong(usize),

    /// Nodes were nested deeper than any trie allows.
    #[error("Nodes are nested deeper than {0} levels")]
    TooDeep(usize),

    /// A decoded leaf failed validation.
    #[error(transparent)]
    InvalidNode(#[from] TrieOpError),

    /// Bytes were left over after the root node.
    #[error("Found {0} unread bytes after the root node")]
    TrailingBytes(usize),
}

/// How leaf value lengths are written.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum LengthEncoding {
    /// A single byte. Values can be at most `255` bytes long.
    Byte,

    /// One to three bytes. The first two bytes carry `7` bits each with the
    /// high bit flagging that another byte follows, and the third carries a
    /// full `8` bits, giving a maximum of [`MAX_LENGTH`].
    #[default]
    VarInt,
}

impl LengthEncoding {
    /// The largest length this encoding can represent.
    pub const fn max_length(self) -> usize {
        match self {
            LengthEncoding::Byte => u8::MAX as usize,
            LengthEncoding::VarInt => MAX_LENGTH,
        }
    }
}

/// A cursor over a growable byte buffer that nodes are written to and read
/// from.
#[derive(Clone, Debug)]
pub struct NodeCoder {
    buf: Vec<u8>,
    pos: usize,
    length_encoding: LengthEncoding,
}

impl Default for NodeCoder {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, LengthEncoding::default())
    }
}

impl NodeCoder {
    /// Creates an empty coder whose buffer starts at `capacity` bytes. The
    /// buffer doubles whenever a write does not fit.
    pub fn with_capacity(capacity: usize, length_encoding: LengthEncoding) -> Self {
        Self {
            buf: vec![0; capacity.max(1)],
            pos: 0,
            length_encoding,
        }
    }

    /// Creates a coder positioned at the start of `bytes`, ready to read.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, length_encoding: LengthEncoding) -> Self {
        Self {
            buf: bytes.into(),
            pos: 0,
            length_encoding,
        }
    }

    /// Everything written so far (or read so far when decoding).
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    /// Current position of the cursor.
    pub const fn pos(&self) -> usize {
        self.pos
    }

    /// Number of bytes past the cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Moves the cursor back to the start of the buffer.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    fn expand(&mut self, need: usize) {
        let required = self.pos + need;
        let mut size = self.buf.len();
        if required <= size {
            return;
        }

        while size < required {
            size <<= 1;
        }

        self.buf.resize(size, 0);
    }

    fn require(&self, need: usize) -> CoderResult<()> {
        match self.pos + need > self.buf.len() {
            false => Ok(()),
            true => Err(CoderError::EndOfBuffer {
                needed: self.pos + need,
                len: self.buf.len(),
            }),
        }
    }

    fn read_byte(&mut self) -> CoderResult<u8> {
        self.require(1)?;
        let b = self.buf[self.pos];
        self.pos += 1;

        Ok(b)
    }

    fn write_byte(&mut self, b: u8) {
        self.expand(1);
        self.buf[self.pos] = b;
        self.pos += 1;
    }

    fn read_bytes(&mut self, n: usize) -> CoderResult<&[u8]> {
        self.require(n)?;
        let start = self.pos;
        self.pos += n;

        Ok(&self.buf[start..self.pos])
    }

    fn write_bytes(&mut self, v: &[u8]) {
        self.expand(v.len());
        self.buf[self.pos..self.pos + v.len()].copy_from_slice(v);
        self.pos += v.len();
    }

    fn read_length(&mut self) -> CoderResult<usize> {
        let first = self.read_byte()? as usize;
        if self.length_encoding == LengthEncoding::Byte || first & 0x80 == 0 {
            return Ok(first);
        }

        let second = self.read_byte()? as usize;
        let mut len = (first & 0x7f) | ((second & 0x7f) << 7);
        if second & 0x80 != 0 {
            len |= (self.read_byte()? as usize) << 14;
        }

        Ok(len)
    }

    fn write_length(&mut self, len: usize) -> CoderResult<()> {
        let max = self.length_encoding.max_length();
        if len > max {
            return Err(CoderError::LengthOverflow { len, max });
        }

        if self.length_encoding == LengthEncoding::Byte || len < 0x80 {
            self.write_byte(len as u8);
            return Ok(());
        }

        self.write_byte((len as u8 & 0x7f) | 0x80);
        let len = len >> 7;
        if len < 0x80 {
            self.write_byte(len as u8);
            return Ok(());
        }

        self.write_byte((len as u8 & 0x7f) | 0x80);
        self.write_byte((len >> 7) as u8);

        Ok(())
    }

    fn read_path(&mut self) -> CoderResult<Nibbles> {
        let count = self.read_byte()? as usize;
        if count > MAX_NIBBLES {
            return Err(CoderError::PathTooLong(count));
        }

        let packed = self.read_bytes((count + 1) / 2)?;
        Ok(Nibbles::from_packed(count, packed))
    }

    fn write_path(&mut self, path: &Nibbles) {
        // `count` is at most 64, so it always fits in the byte.
        self.write_byte(path.count() as u8);
        self.write_bytes(path.packed_bytes());
    }

    /// Writes `node` and all of its descendants at the cursor.
    pub fn write_node(&mut self, node: &MaybeNode) -> CoderResult<()> {
        match node {
            Some(n) => self.write_present_node(n),
            None => {
                self.write_byte(TY_NULL);
                Ok(())
            }
        }
    }

    fn write_present_node(&mut self, node: &Node) -> CoderResult<()> {
        match node {
            Node::Branch { children, .. } => {
                self.write_byte(TY_BRANCH);
                for c in children.iter() {
                    self.write_node(c)?;
                }
            }
            Node::Extension { nibbles, child } => {
                self.write_byte(TY_EXTENSION);
                self.write_path(nibbles);
                self.write_present_node(child)?;
            }
            Node::EmptyLeaf => self.write_byte(TY_EMPTY_LEAF),
            Node::Leaf { nibbles, value } => {
                self.write_byte(TY_LEAF);
                self.write_path(nibbles);
                self.write_length(value.len())?;
                self.write_bytes(value);
            }
        }

        Ok(())
    }

    /// Reads one node (and its descendants) at the cursor.
    pub fn read_node(&mut self) -> CoderResult<MaybeNode> {
        self.read_node_intern(0)
    }

    fn read_node_intern(&mut self, depth: usize) -> CoderResult<MaybeNode> {
        if depth > MAX_DEPTH {
            return Err(CoderError::TooDeep(MAX_DEPTH));
        }

        let node = match self.read_byte()? {
            TY_NULL => return Ok(None),
            TY_BRANCH => {
                let mut children = new_branch_child_arr();
                for c in children.iter_mut() {
                    *c = self.read_node_intern(depth + 1)?;
                }

                Node::branch(children)
            }
            TY_EXTENSION => {
                let nibbles = self.read_path()?;
                if nibbles.is_empty() {
                    return Err(CoderError::EmptyExtensionPath);
                }

                let child = self
                    .read_node_intern(depth + 1)?
                    .ok_or(CoderError::ExtensionWithoutChild)?;

                Node::extension(nibbles, child)
            }
            TY_EMPTY_LEAF => Node::EmptyLeaf,
            TY_LEAF => {
                let nibbles = self.read_path()?;
                let len = self.read_length()?;
                let value = self.read_bytes(len)?;

                Node::leaf(nibbles, value)?
            }
            ty => return Err(CoderError::UnknownType(ty)),
        };

        Ok(Some(Arc::new(node)))
    }
}

/// Serializes a whole trie into a fresh buffer.
pub fn encode_snapshot(root: &MaybeNode, length_encoding: LengthEncoding) -> CoderResult<Vec<u8>> {
    let mut coder = NodeCoder::with_capacity(DEFAULT_CAPACITY, length_encoding);
    coder.write_node(root)?;
    debug!("Encoded trie snapshot ({} bytes)", coder.pos());

    Ok(coder.bytes().to_vec())
}

/// Restores a trie written by [`encode_snapshot`]. The buffer must hold
/// exactly one root node.
pub fn decode_snapshot(bytes: &[u8], length_encoding: LengthEncoding) -> CoderResult<MaybeNode> {
    let mut coder = NodeCoder::from_bytes(bytes, length_encoding);
    let root = coder.read_node()?;

    match coder.remaining() {
        0 => {
            debug!("Decoded trie snapshot ({} bytes)", bytes.len());
            Ok(root)
        }
        n => Err(CoderError::TrailingBytes(n)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        decode_snapshot, encode_snapshot, CoderError, CoderResult, LengthEncoding, NodeCoder,
        MAX_LENGTH,
    };
    use crate::{
        node::{MaybeNode, Node},
        testing_utils::{
            common_setup, entry, generate_n_random_fixed_trie_value_entries, nibs,
            trie_from_entries,
        },
        trie_ops::{TrieOpError, TrieOpResult},
    };

    fn round_trip(root: &MaybeNode, length_encoding: LengthEncoding) {
        let bytes = encode_snapshot(root, length_encoding).unwrap();
        assert_eq!(&decode_snapshot(&bytes, length_encoding).unwrap(), root);
    }

    #[test]
    fn random_tries_round_trip() -> TrieOpResult<()> {
        common_setup();

        for seed in 0..20 {
            let entries: Vec<_> = generate_n_random_fixed_trie_value_entries(200, seed).collect();
            let root = trie_from_entries(&entries)?;

            round_trip(&root, LengthEncoding::Byte);
            round_trip(&root, LengthEncoding::VarInt);
        }

        Ok(())
    }

    #[test]
    fn odd_paths_and_empty_leaves_round_trip() -> TrieOpResult<()> {
        common_setup();

        let root = trie_from_entries(&[
            (nibs("0x10"), vec![]),
            (nibs("0x11"), vec![1]),
            entry("0x234"),
            entry("0x2567"),
        ])?;

        round_trip(&root, LengthEncoding::VarInt);
        round_trip(&None, LengthEncoding::VarInt);
        round_trip(&Some(Arc::new(Node::EmptyLeaf)), LengthEncoding::Byte);

        Ok(())
    }

    #[test]
    fn snapshot_layout_is_stable() -> TrieOpResult<()> {
        common_setup();

        let root = trie_from_entries(&[entry("0x123")])?;
        let bytes = encode_snapshot(&root, LengthEncoding::VarInt).unwrap();

        assert_eq!(bytes, vec![4, 3, 0x12, 0x30, 1, 2]);
        assert_eq!(encode_snapshot(&None, LengthEncoding::Byte).unwrap(), vec![0]);

        Ok(())
    }

    #[test]
    fn long_values_round_trip_with_var_int_lengths() {
        common_setup();

        for len in [127, 128, 300, 16383, 16384, 70000] {
            let mut value = vec![0xab; len];
            value[0] = 1;
            let root = Some(Arc::new(Node::leaf(nibs("0x1"), &value).unwrap()));

            round_trip(&root, LengthEncoding::VarInt);
        }
    }

    #[test]
    fn var_int_boundaries() {
        common_setup();

        let cases: [(usize, &[u8]); 6] = [
            (0, &[0x00]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (16383, &[0xff, 0x7f]),
            (16384, &[0x80, 0x80, 0x01]),
            (MAX_LENGTH, &[0xff, 0xff, 0xff]),
        ];

        for (len, expected) in cases {
            let mut coder = NodeCoder::default();
            coder.write_length(len).unwrap();
            assert_eq!(coder.bytes(), expected);

            coder.rewind();
            assert_eq!(coder.read_length(), Ok(len));
        }

        let mut coder = NodeCoder::default();
        assert_eq!(
            coder.write_length(MAX_LENGTH + 1),
            Err(CoderError::LengthOverflow {
                len: MAX_LENGTH + 1,
                max: MAX_LENGTH
            })
        );
    }

    #[test]
    fn byte_length_rejects_long_values() {
        common_setup();

        let mut value = vec![0xff; 256];
        value[0] = 1;
        let root = Some(Arc::new(Node::leaf(nibs("0x1"), &value).unwrap()));

        assert_eq!(
            encode_snapshot(&root, LengthEncoding::Byte),
            Err(CoderError::LengthOverflow { len: 256, max: 255 })
        );
    }

    #[test]
    fn buffer_grows_on_demand() -> TrieOpResult<()> {
        common_setup();

        let entries: Vec<_> = generate_n_random_fixed_trie_value_entries(100, 5).collect();
        let root = trie_from_entries(&entries)?;

        let mut coder = NodeCoder::with_capacity(1, LengthEncoding::VarInt);
        coder.write_node(&root).unwrap();
        assert!(coder.pos() > 1);

        let written = coder.bytes().to_vec();
        coder.rewind();
        assert_eq!(coder.read_node(), Ok(root));
        assert_eq!(coder.bytes(), written.as_slice());

        Ok(())
    }

    #[test]
    fn decoding_errors() {
        common_setup();

        fn decode(b: &[u8]) -> CoderResult<MaybeNode> {
            decode_snapshot(b, LengthEncoding::VarInt)
        }

        assert_eq!(
            decode(&[]),
            Err(CoderError::EndOfBuffer { needed: 1, len: 0 })
        );
        assert_eq!(
            decode(&[4, 2, 0x12, 3, 1]),
            Err(CoderError::EndOfBuffer { needed: 7, len: 5 })
        );
        assert_eq!(decode(&[9]), Err(CoderError::UnknownType(9)));
        assert_eq!(
            decode(&[2, 1, 0x10, 0]),
            Err(CoderError::ExtensionWithoutChild)
        );
        assert_eq!(decode(&[2, 0, 3]), Err(CoderError::EmptyExtensionPath));
        assert_eq!(decode(&[4, 65]), Err(CoderError::PathTooLong(65)));
        assert_eq!(decode(&[3, 3]), Err(CoderError::TrailingBytes(1)));
        assert_eq!(
            decode(&[4, 1, 0x10, 2, 0, 1]),
            Err(CoderError::InvalidNode(TrieOpError::NonCanonicalValue(
                "0001".to_string()
            )))
        );
        assert!(matches!(
            decode(&[1; 200]),
            Err(CoderError::TooDeep(_))
        ));
    }

    #[test]
    fn leaf_with_empty_path_and_value_decodes_as_empty_leaf() {
        common_setup();

        let root = decode_snapshot(&[4, 0, 0], LengthEncoding::Byte).unwrap();
        assert_eq!(root.as_deref(), Some(&Node::EmptyLeaf));
        assert_eq!(
            decode_snapshot(&[3], LengthEncoding::Byte).unwrap(),
            Some(Arc::new(Node::EmptyLeaf))
        );
    }
}
