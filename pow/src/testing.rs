//! Simulated accelerators and test inputs.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use byteorder::{ByteOrder, LittleEndian};
use fpga::{Bus, Input, Output, Pins, Port};

use crate::{
    device::{PowResult, FLASH_SIZE, META_PAGE, PAGE_SIZE, POW_PAYLOAD_LEN},
    error::Result,
    framed::{Frame, FrameParser, Opcode, FAULT_BYTE},
    register::{block_crc, flag, Command, Status, OPCODE_MASK, PIPELINE_DEPTH},
    reservation::{Owner, ReservationRegister},
    transaction::TRANSACTION_TRYTES,
    trinary::ALPHABET,
};

pub fn random_transaction() -> Vec<u8> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::from_entropy();

    (0..TRANSACTION_TRYTES)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
        .collect()
}

pub fn zero_transaction() -> Vec<u8> {
    vec![b'9'; TRANSACTION_TRYTES]
}

/// Register-bus accelerator.
///
/// Checksums what it receives like the real core, reports a fixed search
/// result a couple of polls after the start.
pub struct SimBus {
    lanes: u32,
    block: Vec<u32>,
    flags: u32,
    /// raw nonce counter and lane mask, `None` runs into overflow
    result: Option<(u32, u32)>,
    polls_left: u32,
    stalled: bool,
    difficulty: u32,
    absorbed: usize,
    bad_crcs: usize,
    owner: Owner,
    reservations: usize,
}

impl SimBus {
    pub fn new(lanes: u32) -> Self {
        Self {
            lanes,
            block: Vec::new(),
            flags: 0,
            result: Some((PIPELINE_DEPTH, 1)),
            polls_left: 0,
            stalled: false,
            difficulty: 0,
            absorbed: 0,
            bad_crcs: 0,
            owner: Owner::None,
            reservations: 0,
        }
    }

    /// Report `raw_nonce` (as read from the counter) found by the lanes in `mask`.
    pub fn with_result(mut self, raw_nonce: u32, mask: u32) -> Self {
        self.result = Some((raw_nonce, mask));
        self
    }

    /// Searches run out of nonces.
    pub fn exhausted(mut self) -> Self {
        self.result = None;
        self
    }

    /// Searches keep running until the host gives up.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// Report a wrong checksum for the next `count` blocks.
    pub fn with_bad_crcs(mut self, count: usize) -> Self {
        self.bad_crcs = count;
        self
    }

    /// Last programmed difficulty mask.
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Blocks run through curl since the last reset.
    pub fn blocks_absorbed(&self) -> usize {
        self.absorbed
    }

    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// Reservation requests seen.
    pub fn reservations(&self) -> usize {
        self.reservations
    }

    fn write_flags(&mut self, flags: u32) {
        if flags & flag::RESERVATION_RESET != 0 {
            self.owner = Owner::None;
        } else if flags & flag::RESERVATION_WRITE != 0 {
            self.reservations += 1;
            let requested = (flags & flag::RESERVATION_WRITE) >> flag::RESERVATION_SHIFT;
            if self.owner == Owner::None {
                self.owner = Owner::from_bits(requested).unwrap_or(Owner::None);
            }
        }

        if flags & flag::CURL_RESET != 0 {
            self.absorbed = 0;
            self.flags &= !Status::CURL_FINISHED;
        }
        if flags & flag::CURL_WRITE != 0 {
            if flags & flag::DO_CURL != 0 {
                self.absorbed += 1;
            }
            self.flags |= Status::CURL_FINISHED;
        }
        if flags & flag::START != 0 {
            self.flags &= !(Status::FOUND | Status::OVERFLOW);
            self.flags |= Status::RUNNING;
            self.polls_left = 2;
        }
    }

    fn status(&mut self) -> u32 {
        if self.flags & Status::RUNNING != 0 && !self.stalled {
            if self.polls_left == 0 {
                self.flags &= !Status::RUNNING;
                self.flags |= match self.result {
                    Some(_) => Status::FOUND,
                    None => Status::OVERFLOW,
                };
            } else {
                self.polls_left -= 1;
            }
        }
        let mask = match self.result {
            Some((_, mask)) if self.flags & Status::FOUND != 0 => mask,
            _ => 0,
        };
        self.flags | (self.lanes & 0xf) << 4 | mask << 8 | (self.owner as u32) << 22
    }

    fn crc32(&mut self) -> u32 {
        let crc = block_crc(&self.block);
        if self.bad_crcs > 0 {
            self.bad_crcs -= 1;
            return !crc;
        }
        crc
    }
}

impl Bus for SimBus {
    fn send(&mut self, word: u32) -> fpga::Result<()> {
        let argument = word & !OPCODE_MASK;
        match word & OPCODE_MASK {
            op if op == Command::WriteFlags as u32 => self.write_flags(argument),
            op if op == Command::ResetWritePointer as u32 => self.block.clear(),
            op if op == Command::WriteData as u32 => self.block.push(word),
            op if op == Command::WriteMinWeightMagnitude as u32 => self.difficulty = argument,
            _ => {}
        }
        Ok(())
    }

    fn send_receive(&mut self, word: u32) -> fpga::Result<u32> {
        Ok(match word & OPCODE_MASK {
            op if op == Command::ReadFlags as u32 => self.status(),
            op if op == Command::ReadNonce as u32 => self.result.map_or(0, |(nonce, _)| nonce),
            op if op == Command::ReadCrc32 as u32 => self.crc32(),
            _ => 0,
        })
    }
}

/// Passive-serial configuration lines of an FPGA.
pub struct SimPins {
    config: bool,
    data: bool,
    clock: bool,
    bits: usize,
    needed: usize,
    done: bool,
    image: Vec<u8>,
}

impl SimPins {
    /// FPGA already running an application image.
    pub fn configured() -> Self {
        Self {
            done: true,
            ..Self::blank(1)
        }
    }

    /// Unconfigured FPGA, done after `needed` bytes.
    pub fn blank(needed: usize) -> Self {
        Self {
            config: true,
            data: false,
            clock: false,
            bits: 0,
            needed: needed.max(1),
            done: false,
            image: Vec::new(),
        }
    }

    /// Bytes clocked in since the last reset.
    pub fn clocked(&self) -> usize {
        self.bits / 8
    }

    /// Bytes received, least significant bit first.
    pub fn image(&self) -> &[u8] {
        &self.image
    }
}

impl Pins for SimPins {
    fn set(&mut self, pin: Output, high: bool) -> fpga::Result<()> {
        match pin {
            Output::Config => {
                if !high {
                    self.bits = 0;
                    self.done = false;
                    self.image.clear();
                }
                self.config = high;
            }
            Output::Data => self.data = high,
            Output::Clock => {
                if high && !self.clock && self.config && !self.done {
                    if self.bits % 8 == 0 {
                        self.image.push(0);
                    }
                    if let Some(byte) = self.image.last_mut() {
                        *byte |= (self.data as u8) << (self.bits % 8);
                    }
                    self.bits += 1;
                    self.done = self.bits >= 8 * self.needed;
                }
                self.clock = high;
            }
        }
        Ok(())
    }

    fn level(&mut self, pin: Input) -> fpga::Result<bool> {
        Ok(match pin {
            Input::Status => self.config,
            Input::ConfigDone => self.done,
        })
    }
}

/// Framed-protocol accelerator with flash.
///
/// Protocol errors are answered with the fault byte, as the firmware does.
pub struct SimDevice {
    parser: FrameParser,
    outbox: VecDeque<u8>,
    configured: bool,
    flash: Vec<u8>,
    page: usize,
    erases: usize,
    corrupt: Option<usize>,
    image: Vec<u8>,
    result: PowResult,
    last_difficulty: Option<u32>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    /// Unconfigured, with erased flash.
    pub fn new() -> Self {
        Self::with_flash(Vec::new())
    }

    /// Unconfigured, with the given flash content.
    pub fn with_flash(mut flash: Vec<u8>) -> Self {
        flash.resize(FLASH_SIZE, 0xff);
        Self {
            parser: FrameParser::new(),
            outbox: VecDeque::new(),
            configured: false,
            flash,
            page: 0,
            erases: 0,
            corrupt: None,
            image: Vec::new(),
            result: PowResult {
                nonce: 0,
                mask: 1,
                lanes: 1,
                elapsed_ms: 1,
            },
            last_difficulty: None,
        }
    }

    pub fn configured() -> Self {
        Self {
            configured: true,
            ..Self::new()
        }
    }

    pub fn with_result(mut self, nonce: u32, mask: u32, lanes: u32) -> Self {
        self.result = PowResult {
            nonce,
            mask,
            lanes,
            elapsed_ms: 1,
        };
        self
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn erases(&self) -> usize {
        self.erases
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Image streamed in since the last configure start.
    pub fn configured_image(&self) -> &[u8] {
        &self.image
    }

    /// Difficulty of the last search request.
    pub fn last_difficulty(&self) -> Option<u32> {
        self.last_difficulty
    }

    /// Flip the byte at `offset` whenever its page is read.
    pub fn corrupt(&mut self, offset: usize) {
        self.corrupt = Some(offset);
    }

    fn meta_present(&self) -> bool {
        let meta = META_PAGE as usize * PAGE_SIZE;
        self.flash[meta..meta + 8].iter().any(|&b| b != 0xff)
    }

    fn respond(&mut self, request: Frame) -> Result<()> {
        let reply = match Opcode::from_u8(request.opcode) {
            Some(opcode) => self.handle(opcode, &request.payload),
            None => None,
        };
        match reply {
            Some(payload) => {
                let frame = Frame::new(request.id, request.opcode, payload)?;
                self.outbox.extend(frame.encode());
            }
            None => self.outbox.push_back(FAULT_BYTE),
        }
        Ok(())
    }

    fn handle(&mut self, opcode: Opcode, payload: &[u8]) -> Option<Vec<u8>> {
        let ack = vec![0];
        Some(match opcode {
            Opcode::GetVersion => {
                let mut version = vec![0u8; 8];
                LittleEndian::write_u32_into(&[1, 1], &mut version);
                version
            }
            Opcode::ReadStatus => vec![self.configured as u8],
            Opcode::FlashErase => {
                self.flash.iter_mut().for_each(|b| *b = 0xff);
                self.erases += 1;
                ack
            }
            Opcode::SetPage => {
                if payload.len() < 4 {
                    return None;
                }
                let page = LittleEndian::read_u32(payload) as usize;
                if page * PAGE_SIZE >= FLASH_SIZE {
                    return None;
                }
                self.page = page;
                ack
            }
            Opcode::WritePage => {
                if payload.len() != PAGE_SIZE {
                    return None;
                }
                let start = self.page * PAGE_SIZE;
                self.flash[start..start + PAGE_SIZE].copy_from_slice(payload);
                ack
            }
            Opcode::ReadPage => {
                let start = self.page * PAGE_SIZE;
                let mut page = self.flash[start..start + PAGE_SIZE].to_vec();
                if let Some(offset) = self.corrupt {
                    if (start..start + PAGE_SIZE).contains(&offset) {
                        page[offset - start] ^= 0xff;
                    }
                }
                page
            }
            Opcode::ConfigureFromFlash => {
                self.configured = self.meta_present();
                ack
            }
            Opcode::ConfigureStart => {
                self.image.clear();
                self.configured = false;
                ack
            }
            Opcode::ConfigureBlock => {
                self.image.extend_from_slice(payload);
                self.configured = true;
                ack
            }
            Opcode::DoPow => {
                if payload.len() != POW_PAYLOAD_LEN || !self.configured {
                    return None;
                }
                self.last_difficulty = Some(LittleEndian::read_u32(&payload[POW_PAYLOAD_LEN - 4..]));
                self.result.to_bytes().to_vec()
            }
            Opcode::Loopback => payload.to_vec(),
        })
    }
}

impl Port for SimDevice {
    fn read(&mut self, buf: &mut [u8]) -> fpga::Result<usize> {
        let n = buf.len().min(self.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> fpga::Result<()> {
        for &byte in data {
            match self.parser.push(byte) {
                Ok(Some(request)) => {
                    if self.respond(request).is_err() {
                        self.outbox.push_back(FAULT_BYTE);
                    }
                }
                Ok(None) => {}
                Err(_) => self.outbox.push_back(FAULT_BYTE),
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Shared {
    owner: Owner,
    pinned: bool,
}

/// Reservation bits of an accelerator shared by several hosts.
#[derive(Clone, Debug)]
pub struct SharedStatus {
    state: Arc<Mutex<Shared>>,
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStatus {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(Shared {
                owner: Owner::None,
                pinned: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One host's view of the register.
    pub fn host(&self) -> SharedHost {
        SharedHost {
            status: self.clone(),
        }
    }

    pub fn current(&self) -> Owner {
        self.lock().owner
    }

    /// Give the reservation to `owner` for good; requests and resets are ignored.
    pub fn pin(&self, owner: Owner) {
        let mut state = self.lock();
        state.owner = owner;
        state.pinned = true;
    }
}

/// Host attached to a [`SharedStatus`].
#[derive(Clone, Debug)]
pub struct SharedHost {
    status: SharedStatus,
}

impl ReservationRegister for SharedHost {
    fn request(&mut self, owner: Owner) -> Result<()> {
        let mut state = self.status.lock();
        if !state.pinned && state.owner == Owner::None {
            state.owner = owner;
        }
        Ok(())
    }

    fn owner(&mut self) -> Result<Option<Owner>> {
        Ok(Some(self.status.lock().owner))
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = self.status.lock();
        if !state.pinned {
            state.owner = Owner::None;
        }
        Ok(())
    }
}
