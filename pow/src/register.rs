//! Register command protocol of the direct bus.
//!
//! Every transfer is a single 32-bit word, opcode in the top six bits. Writes
//! carry their argument in the low bits, reads clock the register content
//! back in a second word.

use std::{
    thread,
    time::{Duration, Instant},
};

use fpga::Bus;
use tracing::{debug, trace, warn};

use crate::{
    checksum::crc32_words,
    error::{Checksum, Context as _, Error, Fault, Result},
    reservation::Owner,
    trinary::{self, TRYTE_WIDTH},
};

#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Nop = 0x0000_0000,
    WriteFlags = 0x0400_0000,
    ResetWritePointer = 0x0800_0000,
    WriteData = 0x1000_0000,
    WriteMinWeightMagnitude = 0x2000_0000,
    ReadFlags = 0x8400_0000,
    ReadNonce = 0x8800_0000,
    ReadCrc32 = 0x9000_0000,
}

/// Mask of the opcode bits of a command word.
pub const OPCODE_MASK: u32 = 0xfc00_0000;

/// Bits of a [`Command::WriteFlags`] argument.
pub mod flag {
    pub const START: u32 = 1 << 0;
    pub const CURL_RESET: u32 = 1 << 1;
    pub const CURL_WRITE: u32 = 1 << 2;
    pub const DO_CURL: u32 = 1 << 3;

    /// two-bit owner id of a reservation request
    pub const RESERVATION_SHIFT: u32 = 23;
    pub const RESERVATION_WRITE: u32 = 0b11 << RESERVATION_SHIFT;
    pub const RESERVATION_RESET: u32 = 1 << 25;
}

/// Highest difficulty the search core can be programmed with.
///
/// Calibration value of the current bitstream, not a protocol constant.
pub const MAX_DIFFICULTY: u32 = 26;

/// The nonce counter runs this far ahead of the nonce that matched.
///
/// Calibration value of the current bitstream, not a protocol constant.
pub const PIPELINE_DEPTH: u32 = 2;

/// Data words of one midstate block.
pub const BLOCK_WORDS: usize = 27;
/// Trytes of one midstate block.
pub const BLOCK_TRYTES: usize = BLOCK_WORDS * TRYTE_WIDTH;
/// Midstate blocks of one transaction.
pub const BLOCKS: usize = 33;

/// Content of the flags register.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Status(pub u32);

impl Status {
    pub const RUNNING: u32 = 1 << 0;
    pub const FOUND: u32 = 1 << 1;
    pub const OVERFLOW: u32 = 1 << 2;
    pub const CURL_FINISHED: u32 = 1 << 3;

    const LANES_SHIFT: u32 = 4;
    const MASK_SHIFT: u32 = 8;
    const OWNER_SHIFT: u32 = 22;

    #[inline]
    pub fn running(self) -> bool {
        self.0 & Self::RUNNING != 0
    }

    #[inline]
    pub fn found(self) -> bool {
        self.0 & Self::FOUND != 0
    }

    #[inline]
    pub fn overflow(self) -> bool {
        self.0 & Self::OVERFLOW != 0
    }

    #[inline]
    pub fn curl_finished(self) -> bool {
        self.0 & Self::CURL_FINISHED != 0
    }

    /// Search has stopped, with or without a result.
    #[inline]
    pub fn done(self) -> bool {
        !self.running() && (self.found() || self.overflow())
    }

    /// Number of parallel search lanes of the bitstream.
    #[inline]
    pub fn lane_count(self) -> u32 {
        (self.0 >> Self::LANES_SHIFT) & 0xf
    }

    /// Lanes that found a nonce, restricted to the first `lanes`.
    #[inline]
    pub fn lane_mask(self, lanes: u32) -> u32 {
        (self.0 >> Self::MASK_SHIFT) & lane_bits(lanes)
    }

    /// Current holder of the reservation; `None` for the undefined id 3.
    #[inline]
    pub fn owner(self) -> Option<Owner> {
        Owner::from_bits((self.0 >> Self::OWNER_SHIFT) & 0b11)
    }
}

#[inline]
fn lane_bits(lanes: u32) -> u32 {
    1u32.checked_shl(lanes).map_or(u32::MAX, |bit| bit - 1)
}

/// Word the accelerator feeds into its CRC-32 for the `index`-th data word
/// of a block: the 18 data bits, with the write address on top.
#[inline]
pub fn verify_word(word: u32, index: usize) -> u32 {
    (word & 0x3_ffff) | (index as u32) << 18
}

/// CRC-32 the accelerator computes over a block of data words.
pub fn block_crc(words: &[u32]) -> u32 {
    crc32_words(
        words
            .iter()
            .enumerate()
            .map(|(index, &word)| verify_word(word, index)),
    )
}

/// Data words for a midstate block of trytes.
pub fn encode_block(trytes: &[u8]) -> Result<[u32; BLOCK_WORDS]> {
    if trytes.len() != BLOCK_TRYTES {
        return Err(Error::InvalidInput(format!(
            "midstate block of {} trytes",
            trytes.len()
        )));
    }
    let table = trinary::table();
    let mut words = [0u32; BLOCK_WORDS];
    for (word, group) in words.iter_mut().zip(trytes.chunks(TRYTE_WIDTH)) {
        *word = table.word(group).ok_or_else(|| {
            Error::InvalidInput(format!(
                "not a tryte group: {:?}",
                String::from_utf8_lossy(group)
            ))
        })?;
    }
    Ok(words)
}

/// How midstate blocks are moved across the bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transfer {
    /// compare every block against the accelerator's CRC-32
    pub use_crc: bool,
    /// sends per block before a CRC-32 mismatch is reported
    pub attempts: usize,
}

impl Default for Transfer {
    fn default() -> Self {
        Self {
            use_crc: true,
            attempts: 3,
        }
    }
}

/// Binary result of a search.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Found {
    /// nonce counter, pipeline correction applied
    pub nonce: u32,
    pub mask: u32,
}

/// Register-level view of an accelerator on a [`Bus`].
pub struct Registers<B> {
    bus: B,
}

impl<B: Bus> Registers<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }

    #[inline]
    fn write(&mut self, command: Command, argument: u32, op: &'static str) -> Result<()> {
        let word = command as u32 | argument;
        trace!("{op}: {:#010x}", word);
        self.bus.send(word).op(op)
    }

    #[inline]
    fn read(&mut self, command: Command, op: &'static str) -> Result<u32> {
        let value = self.bus.send_receive(command as u32).op(op)?;
        trace!("{op}: {:#010x}", value);
        Ok(value)
    }

    pub fn write_flags(&mut self, flags: u32) -> Result<()> {
        self.write(Command::WriteFlags, flags, "write flags")
    }

    pub fn reset_write_pointer(&mut self) -> Result<()> {
        self.write(Command::ResetWritePointer, 0, "reset write pointer")
    }

    /// Rewind the write pointer and stream a block of data words.
    pub fn send_midstate_block(&mut self, words: &[u32]) -> Result<()> {
        self.reset_write_pointer()?;
        let mut block = [0u32; BLOCK_WORDS];
        for (bus, &word) in block.iter_mut().zip(words) {
            *bus = word.to_be();
        }
        self.bus
            .send_block(&block[..words.len().min(BLOCK_WORDS)])
            .op("send midstate block")
    }

    /// Program the difficulty, clamped to [`MAX_DIFFICULTY`].
    pub fn set_difficulty(&mut self, bits: u32) -> Result<()> {
        let bits = bits.min(MAX_DIFFICULTY);
        self.write(
            Command::WriteMinWeightMagnitude,
            (1 << bits) - 1,
            "write min weight magnitude",
        )
    }

    pub fn start(&mut self) -> Result<()> {
        self.write_flags(flag::START)
    }

    pub fn read_status(&mut self) -> Result<Status> {
        self.read(Command::ReadFlags, "read flags").map(Status)
    }

    /// Raw nonce counter, without pipeline correction.
    pub fn read_nonce(&mut self) -> Result<u32> {
        self.read(Command::ReadNonce, "read nonce")
    }

    pub fn read_crc32(&mut self) -> Result<u32> {
        self.read(Command::ReadCrc32, "read crc32")
    }

    pub fn read_lane_count(&mut self) -> Result<u32> {
        Ok(self.read_status()?.lane_count())
    }

    pub fn read_lane_mask(&mut self, lanes: u32) -> Result<u32> {
        Ok(self.read_status()?.lane_mask(lanes))
    }

    pub fn curl_reset(&mut self) -> Result<()> {
        self.write_flags(flag::CURL_RESET)
    }

    /// Hand the transferred block to curl; `absorb` runs the transform.
    ///
    /// Curl takes well under a microsecond, the status is checked right away.
    pub fn curl_write(&mut self, block: usize, absorb: bool) -> Result<()> {
        let flags = if absorb {
            flag::CURL_WRITE | flag::DO_CURL
        } else {
            flag::CURL_WRITE
        };
        self.write_flags(flags)?;
        if !self.read_status()?.curl_finished() {
            return Err(Fault::CurlNotFinished(block).into());
        }
        Ok(())
    }

    /// Send one block, resending while the accelerator's CRC-32 disagrees.
    pub fn transfer_block(&mut self, block: usize, words: &[u32], transfer: Transfer) -> Result<()> {
        if !transfer.use_crc {
            return self.send_midstate_block(words);
        }
        let expected = block_crc(words);
        let mut actual = expected;
        for attempt in 1..=transfer.attempts.max(1) {
            self.send_midstate_block(words)?;
            actual = self.read_crc32()?;
            if actual == expected {
                return Ok(());
            }
            warn!(
                block,
                "transfer error ({attempt}/{}): crc32 {:#010x}, expected {:#010x}",
                transfer.attempts,
                actual,
                expected
            );
        }
        Err(Error::ChecksumMismatch {
            kind: Checksum::Crc32,
            expected,
            actual,
        })
    }

    /// Stream a whole transaction through curl, leaving the midstate loaded.
    ///
    /// All blocks but the last are absorbed.
    pub fn absorb(&mut self, trytes: &[u8], transfer: Transfer) -> Result<()> {
        if trytes.len() != BLOCKS * BLOCK_TRYTES {
            return Err(Error::InvalidInput(format!(
                "transaction of {} trytes",
                trytes.len()
            )));
        }
        self.curl_reset()?;
        for (block, chunk) in trytes.chunks(BLOCK_TRYTES).enumerate() {
            let words = encode_block(chunk)?;
            self.transfer_block(block, &words, transfer)?;
            self.curl_write(block, block + 1 < BLOCKS)?;
        }
        debug!("midstate loaded");
        Ok(())
    }

    /// Program the difficulty, start the search and poll until it stops.
    ///
    /// Overflow without a match is a valid outcome, reported in the status.
    pub fn search(&mut self, difficulty: u32, interval: Duration, timeout: Duration) -> Result<Status> {
        self.set_difficulty(difficulty)?;
        self.start()?;

        let deadline = Instant::now() + timeout;
        loop {
            let status = self.read_status()?;
            if status.done() {
                return Ok(status);
            }
            if Instant::now() > deadline {
                return Err(Error::TransportTimeout {
                    op: "search",
                    timeout,
                });
            }
            thread::sleep(interval);
        }
    }

    /// Nonce and lane mask of a finished search.
    pub fn read_result(&mut self, lanes: u32) -> Result<Found> {
        let nonce = self.read_nonce()?.wrapping_sub(PIPELINE_DEPTH);
        let mask = self.read_lane_mask(lanes)?;
        debug!("found nonce: {:#010x} (mask: {:#010x})", nonce, mask);
        Ok(Found { nonce, mask })
    }

    /// Ask for the reservation on behalf of `owner`.
    pub fn request_reservation(&mut self, owner: Owner) -> Result<()> {
        self.write_flags((owner as u32) << flag::RESERVATION_SHIFT & flag::RESERVATION_WRITE)
    }

    pub fn reset_reservation(&mut self) -> Result<()> {
        self.write_flags(flag::RESERVATION_RESET)
    }
}
