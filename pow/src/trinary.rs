//! Balanced-ternary codec.
//!
//! The accelerator represents each trit on two wires, `hi` and `lo`:
//!
//! | trit | hi | lo |
//! |------|----|----|
//! |  0   | 1  | 1  |
//! |  1   | 1  | 0  |
//! | -1   | 0  | 1  |
//!
//! `hi = lo = 0` never encodes a trit; the hardware uses it for "unknown".

use std::sync::OnceLock;

use crate::register::Command;

/// Balanced ternary digit, one of -1, 0, 1.
pub type Trit = i8;

/// Tryte alphabet, `9` = 0, `A`..`M` = 1..13, `N`..`Z` = -13..-1.
pub const ALPHABET: &[u8; 27] = b"9ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Trits per tryte.
pub const TRYTE_WIDTH: usize = 3;
/// Trits carried by one data word on the bus (three trytes).
pub const WORD_TRITS: usize = 9;
/// Number of distinct three-tryte groups.
pub const TABLE_SIZE: usize = 27 * 27 * 27;

const DATA_MASK: u32 = 0x1ff;

/// Encode a trit on the hi/lo wires. Anything outside -1..=1 is rejected.
#[inline]
pub const fn trit_to_bits(trit: Trit) -> Option<(bool, bool)> {
    match trit {
        0 => Some((true, true)),
        1 => Some((true, false)),
        -1 => Some((false, true)),
        _ => None,
    }
}

/// Decode the hi/lo wires. `None` is the hardware's "unknown" (0, 0).
#[inline]
pub const fn bits_to_trit(hi: bool, lo: bool) -> Option<Trit> {
    match (hi, lo) {
        (true, true) => Some(0),
        (true, false) => Some(1),
        (false, true) => Some(-1),
        (false, false) => None,
    }
}

/// Value of a tryte character, -13..=13.
#[inline]
pub fn tryte_value(tryte: u8) -> Option<i8> {
    let index = ALPHABET.iter().position(|&c| c == tryte)? as i8;
    Some(if index > 13 { index - 27 } else { index })
}

/// Little-endian trits of a tryte character.
pub fn tryte_to_trits(tryte: u8) -> Option<[Trit; TRYTE_WIDTH]> {
    let mut value = tryte_value(tryte)?;
    let mut trits = [0; TRYTE_WIDTH];
    for trit in trits.iter_mut() {
        *trit = (value + 1).rem_euclid(3) - 1;
        value = (value - *trit) / 3;
    }
    Some(trits)
}

pub fn trytes_to_trits(trytes: &[u8]) -> Option<Vec<Trit>> {
    let mut trits = Vec::with_capacity(trytes.len() * TRYTE_WIDTH);
    for &tryte in trytes {
        trits.extend_from_slice(&tryte_to_trits(tryte)?);
    }
    Some(trits)
}

/// Group trits by three into tryte characters.
///
/// Fails on a length that is not a multiple of three, or on a non-trit value.
pub fn trits_to_trytes(trits: &[Trit]) -> Option<String> {
    if trits.len() % TRYTE_WIDTH != 0 {
        return None;
    }
    trits
        .chunks(TRYTE_WIDTH)
        .map(|chunk| {
            let mut value = 0i8;
            for &trit in chunk.iter().rev() {
                trit_to_bits(trit)?;
                value = 3 * value + trit;
            }
            Some(ALPHABET[value.rem_euclid(27) as usize] as char)
        })
        .collect()
}

/// Precomputed `WriteData` command words for every three-tryte group.
///
/// Bits 0..9 hold the `lo` wires of the group's nine trits, bits 9..18 the
/// `hi` wires, the opcode sits on top.
pub struct TryteTable {
    words: Vec<u32>,
}

static TABLE: OnceLock<TryteTable> = OnceLock::new();

/// The process-wide table, built on first use.
pub fn table() -> &'static TryteTable {
    TABLE.get_or_init(TryteTable::build)
}

#[cfg(test)]
pub(crate) fn table_built() -> bool {
    TABLE.get().is_some()
}

impl TryteTable {
    pub fn build() -> Self {
        let mut words = Vec::with_capacity(TABLE_SIZE);
        for &a in ALPHABET {
            for &b in ALPHABET {
                for &c in ALPHABET {
                    let (mut lo, mut hi) = (0u32, 0u32);
                    let trits = [a, b, c].into_iter().filter_map(tryte_to_trits).flatten();
                    for (i, trit) in trits.enumerate() {
                        let (h, l) = trit_to_bits(trit).unwrap_or((false, false));
                        lo |= (l as u32) << i;
                        hi |= (h as u32) << i;
                    }
                    words.push(Command::WriteData as u32 | lo | hi << WORD_TRITS);
                }
            }
        }
        Self { words }
    }

    /// Position of a three-tryte group in the table.
    #[inline]
    pub fn index(group: &[u8]) -> Option<usize> {
        let position = |tryte: u8| ALPHABET.iter().position(|&c| c == tryte);
        match group {
            &[a, b, c] => Some(position(a)? * 729 + position(b)? * 27 + position(c)?),
            _ => None,
        }
    }

    /// Command word for a three-tryte group.
    #[inline]
    pub fn word(&self, group: &[u8]) -> Option<u32> {
        Some(self.words[Self::index(group)?])
    }

    /// Command word byte-order-swapped for [`fpga::Bus::send_block`].
    #[inline]
    pub fn bus_word(&self, group: &[u8]) -> Option<u32> {
        self.word(group).map(u32::to_be)
    }

    /// Command words for a run of trytes, three at a time.
    pub fn encode(&self, trytes: &[u8]) -> Option<Vec<u32>> {
        if trytes.len() % TRYTE_WIDTH != 0 {
            return None;
        }
        trytes.chunks(TRYTE_WIDTH).map(|group| self.word(group)).collect()
    }
}

/// Trits carried in the data bits of a `WriteData` word.
pub fn decode_word(word: u32) -> Option<[Trit; WORD_TRITS]> {
    let lo = word & DATA_MASK;
    let hi = (word >> WORD_TRITS) & DATA_MASK;
    let mut trits = [0; WORD_TRITS];
    for (i, trit) in trits.iter_mut().enumerate() {
        *trit = bits_to_trit(hi >> i & 1 != 0, lo >> i & 1 != 0)?;
    }
    Some(trits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trit_bits_round_trip() {
        for trit in -1..=1 {
            let (hi, lo) = trit_to_bits(trit).unwrap();
            assert_eq!(bits_to_trit(hi, lo), Some(trit));
        }
        assert_eq!(trit_to_bits(2), None);
        assert_eq!(trit_to_bits(-128), None);
        assert_eq!(bits_to_trit(false, false), None);
    }

    #[test]
    fn tryte_values() {
        assert_eq!(tryte_value(b'9'), Some(0));
        assert_eq!(tryte_value(b'A'), Some(1));
        assert_eq!(tryte_value(b'M'), Some(13));
        assert_eq!(tryte_value(b'N'), Some(-13));
        assert_eq!(tryte_value(b'Z'), Some(-1));
        assert_eq!(tryte_value(b'a'), None);
        assert_eq!(tryte_to_trits(b'M'), Some([1, 1, 1]));
        assert_eq!(tryte_to_trits(b'N'), Some([-1, -1, -1]));
        assert_eq!(tryte_to_trits(b'Y'), Some([1, -1, 0]));
    }

    #[test]
    fn trytes_round_trip() {
        let trytes = ALPHABET;
        let trits = trytes_to_trits(trytes).unwrap();
        assert_eq!(trits.len(), 81);
        assert_eq!(trits_to_trytes(&trits).unwrap().as_bytes(), trytes);
        assert_eq!(trits_to_trytes(&[0, 0]), None);
        assert_eq!(trits_to_trytes(&[0, 2, 0]), None);
    }

    #[test]
    fn known_words() {
        let table = table();
        assert_eq!(table.word(b"999"), Some(0x1003_ffff));
        assert_eq!(table.word(b"ABC"), Some(0x1003_ef6e));
        assert_eq!(table.word(b"MNZ"), Some(0x1003_0ff8));
        assert_eq!(table.word(b"99"), None);
        assert_eq!(table.word(b"9a9"), None);
        assert_eq!(
            table.bus_word(b"ABC").map(u32::from_be),
            Some(0x1003_ef6e)
        );
    }

    #[test]
    fn every_group_decodes_to_itself() {
        let table = TryteTable::build();
        for &a in ALPHABET {
            for &b in ALPHABET {
                for &c in ALPHABET {
                    let group = [a, b, c];
                    let word = table.word(&group).unwrap();
                    assert_eq!(word & 0xfc00_0000, Command::WriteData as u32);
                    let trits = decode_word(word).unwrap();
                    assert_eq!(trits_to_trytes(&trits).unwrap().as_bytes(), &group);
                }
            }
        }
    }
}
