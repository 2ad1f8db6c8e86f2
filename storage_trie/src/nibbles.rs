//! Define [`Nibbles`], the path type used to walk the storage trie, and how
//! to convert bytes, hex strings and hex prefix encodings into nibbles.

use std::{
    fmt::{self, Debug, Display, LowerHex},
    str::FromStr,
};

use bytes::{BufMut, Bytes, BytesMut};
use ethereum_types::H256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::utils::is_even;

// Use a whole byte for a Nibble just for convenience
/// A Nibble has 4 bits and is stored as `u8`.
pub type Nibble = u8;

/// Keys are always `keccak` hashes, so no path is ever longer than this.
pub const MAX_NIBBLES: usize = 64;

const PACKED_BYTES: usize = MAX_NIBBLES / 2;

const TOO_MANY_NIBBLES_ERR_MSG: &str = "Attempted to create a nibbles sequence longer than 64!";
const NIBBLE_TOO_LARGE_ERR_MSG: &str = "Attempted to append a single nibble that was greater than 15!";

#[derive(Clone, Debug, Eq, Error, PartialEq, Hash)]
/// Errors encountered when converting from bytes to `Nibbles`.
pub enum BytesToNibblesError {
    #[error("Tried constructing `Nibbles` from a byte slice with more than 32 bytes (len: {0})")]
    /// The slice is too large.
    TooManyBytes(usize),
}

#[derive(Clone, Debug, Eq, Error, PartialEq, Hash)]
/// Errors encountered when converting a hex prefix encoding to nibbles.
pub enum FromHexPrefixError {
    #[error("Tried to convert an empty byte string from hex prefix encoding")]
    /// There is no flag byte.
    Empty,

    #[error("Tried to convert a hex prefix byte string into `Nibbles` with invalid flags at the start: {0:#06b}")]
    /// The hex prefix encoding flag is invalid.
    InvalidFlags(Nibble),

    #[error("Tried to convert a hex prefix byte string into `Nibbles` that was longer than 33 bytes: (bytes: {0}, length: {1})")]
    /// The hex prefix encoding is too large.
    TooLong(String, usize),
}

#[derive(Clone, Debug, Eq, Error, PartialEq, Hash)]
/// Errors encountered when parsing a hex string into `Nibbles`.
pub enum StrToNibblesError {
    #[error("Invalid hex character in nibble string: {0:?}")]
    /// A character was not a hex digit.
    InvalidChar(char),

    #[error("Nibble string has more than 64 digits (len: {0})")]
    /// The string does not fit in a path.
    TooLong(usize),
}

#[derive(Copy, Clone, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
/// A sequence of nibbles which is used as the path to a value in the trie.
///
/// Nibbles are packed two to a byte with the front `Nibble` in the high half
/// of byte `0`. Every nibble past `count` is kept zeroed, so two `Nibbles`
/// compare equal exactly when they hold the same path.
///
/// ```rust
/// # use storage_trie::nibbles::Nibbles;
/// let n = Nibbles::from_bytes_be(&[0x12, 0x34]).unwrap();
///
/// assert_eq!(n.count(), 4);
/// assert_eq!(n.get_nibble(1), 0x2);
/// assert_eq!(format!("{:x}", n), "0x1234");
/// ```
///
/// Leading zero nibbles are significant: `0x0012` and `0x12` are different
/// paths.
pub struct Nibbles {
    /// The number of nibbles in this sequence.
    pub(crate) count: usize,
    /// Front-aligned packed nibbles.
    pub(crate) packed: [u8; PACKED_BYTES],
}

impl Display for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as LowerHex>::fmt(self, f)
    }
}

// Manual impl in order to print `packed` nicely.
impl Debug for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nibbles")
            .field("count", &self.count)
            .field("packed", &format!("{self:x}"))
            .finish()
    }
}

impl LowerHex for Nibbles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for nib in self.iter() {
            write!(f, "{nib:x}")?;
        }

        Ok(())
    }
}

impl FromStr for Nibbles {
    type Err = StrToNibblesError;

    /// Parses a hex string with or without a preceding "0x". Every character
    /// becomes one nibble, so leading zeros are kept.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped_str = s.strip_prefix("0x").unwrap_or(s);
        if stripped_str.len() > MAX_NIBBLES {
            return Err(StrToNibblesError::TooLong(stripped_str.len()));
        }

        stripped_str
            .chars()
            .map(|c| {
                c.to_digit(16)
                    .map(|d| d as Nibble)
                    .ok_or(StrToNibblesError::InvalidChar(c))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|nibs| Self::from_nibble_slice(&nibs))
    }
}

impl From<H256> for Nibbles {
    fn from(v: H256) -> Self {
        Self::from_h256_be(v)
    }
}

impl FromIterator<Nibble> for Nibbles {
    /// # Panics
    /// Panics if the iterator yields more than `64` nibbles or a nibble
    /// greater than `0xf`.
    fn from_iter<T: IntoIterator<Item = Nibble>>(iter: T) -> Self {
        let mut nibbles = Nibbles::default();
        for nib in iter {
            nibbles.push_nibble_back(nib);
        }

        nibbles
    }
}

impl Nibbles {
    /// Creates `Nibbles` from big endian bytes. Every byte becomes two
    /// nibbles, high half first.
    ///
    /// Returns an error if the byte slice is longer than `32` bytes.
    pub fn from_bytes_be(bytes: &[u8]) -> Result<Self, BytesToNibblesError> {
        if bytes.len() > PACKED_BYTES {
            return Err(BytesToNibblesError::TooManyBytes(bytes.len()));
        }

        let mut packed = [0; PACKED_BYTES];
        packed[..bytes.len()].copy_from_slice(bytes);

        Ok(Self {
            count: bytes.len() * 2,
            packed,
        })
    }

    /// Creates the full `64` nibble path of a big endian `H256`.
    pub const fn from_h256_be(v: H256) -> Self {
        Self {
            count: MAX_NIBBLES,
            packed: v.0,
        }
    }

    /// Rebuilds `Nibbles` from `count` and packed nibble pairs, as laid out by
    /// [`Nibbles::packed_bytes`]. Any bits past `count` are dropped.
    ///
    /// # Panics
    /// Panics if `count` is greater than `64` or `bytes` holds fewer than
    /// `count` nibbles.
    pub fn from_packed(count: usize, bytes: &[u8]) -> Self {
        assert!(count <= MAX_NIBBLES, "{}", TOO_MANY_NIBBLES_ERR_MSG);

        let num_bytes = (count + 1) / 2;
        let mut packed = [0; PACKED_BYTES];
        packed[..num_bytes].copy_from_slice(&bytes[..num_bytes]);

        if !is_even(count) {
            packed[num_bytes - 1] &= 0xf0;
        }

        Self { count, packed }
    }

    /// Creates `Nibbles` from a slice where each element is a single nibble.
    ///
    /// # Panics
    /// Panics if there are more than `64` elements or any element is greater
    /// than `0xf`.
    pub fn from_nibble_slice(nibs: &[Nibble]) -> Self {
        nibs.iter().copied().collect()
    }

    /// Creates a new `Nibbles` from a single `Nibble`.
    ///
    /// # Panics
    /// Panics if the nibble is > `0xf`.
    pub fn from_nibble(n: Nibble) -> Self {
        let mut nibbles = Self::default();
        nibbles.push_nibble_back(n);

        nibbles
    }

    /// The number of nibbles in the path.
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Returns whether or not this `Nibbles` contains actual nibbles.
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Gets the nth nibble. The front `Nibble` is at idx `0`.
    ///
    /// # Panics
    /// Panics if `idx` is out of range.
    pub fn get_nibble(&self, idx: usize) -> Nibble {
        assert!(
            idx < self.count,
            "Nibble index {idx} out of range for {self:x}"
        );

        let byte = self.packed[idx / 2];
        match is_even(idx) {
            true => byte >> 4,
            false => byte & 0x0f,
        }
    }

    fn set_nibble(&mut self, idx: usize, n: Nibble) {
        let byte = &mut self.packed[idx / 2];
        *byte = match is_even(idx) {
            true => (*byte & 0x0f) | (n << 4),
            false => (*byte & 0xf0) | n,
        };
    }

    /// Iterates over the nibbles from front to back.
    pub fn iter(&self) -> impl Iterator<Item = Nibble> + '_ {
        (0..self.count).map(|i| self.get_nibble(i))
    }

    /// Pops the nibble at the front (the next nibble).
    ///
    /// # Panics
    /// Panics if the `Nibbles` is empty.
    pub fn pop_next_nibble_front(&mut self) -> Nibble {
        let n = self.get_nibble(0);
        self.truncate_n_nibbles_front_mut(1);

        n
    }

    /// Appends a nibble to the back.
    ///
    /// # Panics
    /// Panics if the `Nibbles` is already `64` long or `n` > `0xf`.
    pub fn push_nibble_back(&mut self, n: Nibble) {
        assert!(self.count < MAX_NIBBLES, "{}", TOO_MANY_NIBBLES_ERR_MSG);
        assert!(n < 16, "{}", NIBBLE_TOO_LARGE_ERR_MSG);

        self.set_nibble(self.count, n);
        self.count += 1;
    }

    /// Drops the first `n` nibbles.
    ///
    /// # Panics
    /// Panics if `n` is larger than the number of nibbles contained.
    pub fn truncate_n_nibbles_front(&self, n: usize) -> Nibbles {
        self.get_nibble_range(n, self.count)
    }

    /// In place version of [`Nibbles::truncate_n_nibbles_front`].
    pub fn truncate_n_nibbles_front_mut(&mut self, n: usize) {
        *self = self.truncate_n_nibbles_front(n);
    }

    /// Returns the nibbles in `[start, end)`.
    ///
    /// # Panics
    /// Panics if the range is out of bounds.
    pub fn get_nibble_range(&self, start: usize, end: usize) -> Nibbles {
        assert!(
            start <= end && end <= self.count,
            "Nibble range {start}..{end} out of range for {self:x}"
        );

        (start..end).map(|i| self.get_nibble(i)).collect()
    }

    /// Splits the `Nibbles` at the given index, returning two `Nibbles`.
    /// Specifically, if `0x1234` is split at `1`, we get `0x1` and `0x234`.
    ///
    /// # Panics
    /// Panics if the `idx` is out of range.
    pub fn split_at_idx(&self, idx: usize) -> (Nibbles, Nibbles) {
        (self.split_at_idx_prefix(idx), self.split_at_idx_postfix(idx))
    }

    /// Split the `Nibbles` at the given index but only return the prefix.
    pub fn split_at_idx_prefix(&self, idx: usize) -> Nibbles {
        self.get_nibble_range(0, idx)
    }

    /// Split the `Nibbles` at the given index but only return the postfix.
    pub fn split_at_idx_postfix(&self, idx: usize) -> Nibbles {
        self.get_nibble_range(idx, self.count)
    }

    /// Merge two `Nibbles` together. `self` will be the prefix.
    ///
    /// # Panics
    /// Panics if merging the `Nibbles` causes an overflow (total nibbles > 64).
    pub fn merge_nibbles(&self, post: &Nibbles) -> Nibbles {
        assert!(
            self.count + post.count <= MAX_NIBBLES,
            "{}",
            TOO_MANY_NIBBLES_ERR_MSG
        );

        let mut merged = *self;
        for nib in post.iter() {
            merged.push_nibble_back(nib);
        }

        merged
    }

    /// Prefixes a single nibble in front of `self`.
    pub fn push_nibble_front(&self, n: Nibble) -> Nibbles {
        Self::from_nibble(n).merge_nibbles(self)
    }

    /// Returns the length of the longest shared prefix of `self` and `other`.
    pub fn common_prefix_len(&self, other: &Nibbles) -> usize {
        let min_count = self.count.min(other.count);

        (0..min_count)
            .find(|&i| self.get_nibble(i) != other.get_nibble(i))
            .unwrap_or(min_count)
    }

    /// Returns `true` if `prefix` is a (not necessarily strict) prefix of
    /// `self`.
    pub fn starts_with(&self, prefix: &Nibbles) -> bool {
        prefix.count <= self.count && self.common_prefix_len(prefix) == prefix.count
    }

    /// The packed nibble pairs covering `count` nibbles. If `count` is odd,
    /// the low half of the last byte is zero.
    pub fn packed_bytes(&self) -> &[u8] {
        &self.packed[..self.min_bytes()]
    }

    /// Returns the minimum number of bytes needed to represent these `Nibbles`.
    pub const fn min_bytes(&self) -> usize {
        (self.count + 1) / 2
    }

    /// Converts [`Nibbles`] to hex-prefix encoding (AKA "compact").
    ///
    /// The high nibble of the first byte holds the flags (`0b10` for a leaf,
    /// `0b01` for an odd length). An odd path folds its first nibble into the
    /// low half of that byte; the rest is packed two per byte.
    pub fn to_hex_prefix_encoding(&self, is_leaf: bool) -> Bytes {
        let odd = !is_even(self.count);
        let term_bit: u8 = match is_leaf {
            false => 0,
            true => 0b10,
        };

        let mut bytes = BytesMut::with_capacity(1 + self.count / 2);
        let mut nibs = self.iter();

        match odd {
            false => bytes.put_u8(term_bit << 4),
            true => {
                let first = nibs.next().unwrap_or_default();
                bytes.put_u8(((term_bit | 1) << 4) | first);
            }
        }

        while let (Some(hi), Some(lo)) = (nibs.next(), nibs.next()) {
            bytes.put_u8((hi << 4) | lo);
        }

        bytes.freeze()
    }

    /// Converts a hex prefix byte string (AKA "compact") into `Nibbles`, also
    /// returning whether the leaf flag was set.
    pub fn from_hex_prefix_encoding(
        hex_prefix_bytes: &[u8],
    ) -> Result<(Self, bool), FromHexPrefixError> {
        let Some((&flag_byte, rest)) = hex_prefix_bytes.split_first() else {
            return Err(FromHexPrefixError::Empty);
        };

        if hex_prefix_bytes.len() > PACKED_BYTES + 1 {
            return Err(FromHexPrefixError::TooLong(
                hex::encode(hex_prefix_bytes),
                hex_prefix_bytes.len(),
            ));
        }

        // is_odd --> 0b01
        // is_leaf --> 0b10
        let flag_bits = flag_byte >> 4;
        let (is_leaf, is_odd) = match flag_bits {
            0b00 => (false, false),
            0b01 => (false, true),
            0b10 => (true, false),
            0b11 => (true, true),
            _ => return Err(FromHexPrefixError::InvalidFlags(flag_bits)),
        };

        // An even path still has a padding nibble in the flag byte, and it
        // must be zero.
        if !is_odd && flag_byte & 0x0f != 0 {
            return Err(FromHexPrefixError::InvalidFlags(flag_byte));
        }

        if is_odd && rest.len() == PACKED_BYTES {
            return Err(FromHexPrefixError::TooLong(
                hex::encode(hex_prefix_bytes),
                hex_prefix_bytes.len(),
            ));
        }

        let mut nibbles = Nibbles::default();
        if is_odd {
            nibbles.push_nibble_back(flag_byte & 0x0f);
        }

        for b in rest {
            nibbles.push_nibble_back(b >> 4);
            nibbles.push_nibble_back(b & 0x0f);
        }

        Ok((nibbles, is_leaf))
    }

    /// Returns the nibbles bytes in big-endian format. An odd trailing nibble
    /// sits in the high half of the last byte.
    pub fn bytes_be(&self) -> Vec<u8> {
        self.packed_bytes().to_vec()
    }
}
