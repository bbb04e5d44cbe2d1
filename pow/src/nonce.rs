//! Ternary nonce assembly.
//!
//! The accelerator searches a binary counter. The 81-trit nonce it stands
//! for is laid out as
//!
//! - trits 0..24: signature of the accelerator family,
//! - trits 24..24+log2(lanes): index of the lane that found the nonce,
//! - trits 49..81: the counter,
//!
//! with every other trit 0. Lane index and counter bits are written on the
//! hi/lo wires as complement and value, so a set bit reads as -1 and a clear
//! bit as 1.

use crate::{
    error::{Fault, Result},
    trinary::{bits_to_trit, trits_to_trytes, Trit},
};

/// Trits of a nonce.
pub const NONCE_TRITS: usize = 81;
/// Trytes of a nonce.
pub const NONCE_TRYTES: usize = NONCE_TRITS / 3;

const SIGNATURE_TRITS: usize = 24;
const LANE_OFFSET: usize = SIGNATURE_TRITS;
const COUNTER_TRITS: usize = 32;
const COUNTER_OFFSET: usize = NONCE_TRITS - COUNTER_TRITS;

/// Most lanes any bitstream has.
pub const MAX_LANES: u32 = 8;

/// Signature and lane layout of an accelerator family.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NonceLayout {
    /// FPGA accelerators, signature `PIDIVER`, lane index after the signature
    Fpga,
    /// PoW chip, signature `POWCHIP`, no lane index
    PowChip,
}

impl NonceLayout {
    /// (hi, lo) wire bits of the signature, bit `i` for trit `i`
    const fn signature(self) -> (u32, u32) {
        match self {
            NonceLayout::Fpga => (0x00ee_3ff9, 0x00fd_c71e),
            NonceLayout::PowChip => (0x00e7_ef09, 0x00f9_bbfe),
        }
    }

    const fn has_lane_index(self) -> bool {
        matches!(self, NonceLayout::Fpga)
    }
}

/// Wire bits of a nonce under construction.
struct Wires {
    hi: [bool; NONCE_TRITS],
    lo: [bool; NONCE_TRITS],
}

impl Wires {
    fn new() -> Self {
        Self {
            hi: [true; NONCE_TRITS],
            lo: [true; NONCE_TRITS],
        }
    }

    /// Raw wire bits, bit `i` of each word at trit `offset + i`.
    fn raw(&mut self, offset: usize, width: usize, hi: u32, lo: u32) {
        for i in 0..width {
            self.hi[offset + i] = hi >> i & 1 != 0;
            self.lo[offset + i] = lo >> i & 1 != 0;
        }
    }

    /// Binary value, one bit per trit, least significant first.
    fn binary(&mut self, offset: usize, width: usize, value: u32) {
        self.raw(offset, width, !value, value)
    }

    fn trits(&self) -> Option<Vec<Trit>> {
        self.hi
            .iter()
            .zip(&self.lo)
            .map(|(&hi, &lo)| bits_to_trit(hi, lo))
            .collect()
    }
}

/// `log2` of a lane count, if it is a power of two in `1..=MAX_LANES`.
///
/// This is also the number of lane-index trits written into the nonce, so a
/// single lane writes none and trit 24 stays 0. The pidiver firmware's host
/// code writes `max(1, log2)` trits and sets trit 24 to 1 for one lane, so
/// single-lane nonces from such a core differ in that trit.
pub fn lane_bits(lanes: u32) -> Result<u32> {
    if lanes == 0 || lanes > MAX_LANES || !lanes.is_power_of_two() {
        return Err(Fault::InvalidLaneCount(lanes).into());
    }
    Ok(lanes.trailing_zeros())
}

/// Lowest lane below `lanes` whose bit is set in `mask`.
pub fn winning_lane(mask: u32, lanes: u32) -> Result<u32> {
    if mask == 0 {
        return Err(Fault::ZeroLaneMask.into());
    }
    match (0..lanes).find(|lane| mask >> lane & 1 != 0) {
        Some(lane) => Ok(lane),
        None => Err(Fault::MaskOutsideLanes { mask, lanes }.into()),
    }
}

/// Nonce trytes for a binary search result.
///
/// The lane index takes [`lane_bits`] trits from `LANE_OFFSET`, none for a
/// single lane.
pub fn assemble(nonce: u32, mask: u32, lanes: u32, layout: NonceLayout) -> Result<String> {
    let mut wires = Wires::new();
    let (hi, lo) = layout.signature();
    wires.raw(0, SIGNATURE_TRITS, hi, lo);

    if layout.has_lane_index() {
        let width = lane_bits(lanes)?;
        let lane = winning_lane(mask, lanes)?;
        wires.binary(LANE_OFFSET, width as usize, lane);
    }
    wires.binary(COUNTER_OFFSET, COUNTER_TRITS, nonce);

    let trits = wires.trits().ok_or(Fault::MalformedNonce)?;
    Ok(trits_to_trytes(&trits).ok_or(Fault::MalformedNonce)?)
}

/// Binary value of up to 32 trits written by [`assemble`], if every trit is
/// 1 or -1.
pub fn decode_binary(trits: &[Trit]) -> Option<u32> {
    if trits.len() > COUNTER_TRITS {
        return None;
    }
    trits.iter().enumerate().try_fold(0u32, |value, (i, &trit)| match trit {
        1 => Some(value),
        -1 => Some(value | 1 << i),
        _ => None,
    })
}
