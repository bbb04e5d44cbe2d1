//! Integrity checks shared with the accelerator.
//!
//! - CRC-32/MPEG-2 (poly 0x04c11db7, init 0xffffffff, no reflection, no
//!   final xor) over bulk midstate transfers,
//! - CRC-8 (poly 0xd5, init 0, no reflection) over framed payloads. The
//!   device computes it bit by bit, shifting each message byte in and then
//!   eight zero bits; for a zero initial value that equals the direct
//!   table-driven form used here.

use crc::{Crc, CRC_32_MPEG_2, CRC_8_DVB_S2};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_DVB_S2);
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

#[inline]
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// CRC-32 of 32-bit words as they appear on the wire, most significant
/// byte first.
pub fn crc32_words(words: impl IntoIterator<Item = u32>) -> u32 {
    let mut digest = CRC32.digest();
    for word in words {
        digest.update(&word.to_be_bytes());
    }
    digest.finalize()
}
