//! Request/response framing over a byte stream.
//!
//! A frame is `id, opcode, crc8, length (u16 LE), payload`. The device echoes
//! the request id in its response. A lone `'X'` where a frame should start
//! is the device reporting a protocol fault.

use std::{
    thread,
    time::{Duration, Instant},
};

use fpga::Port;
use tracing::{debug, trace};

use crate::{
    checksum::crc8,
    error::{Checksum, Context as _, Error, Result, Violation},
};

/// Largest payload of a frame.
pub const MAX_PAYLOAD: usize = 8192;
/// Bytes ahead of the payload.
pub const HEADER_LEN: usize = 5;
/// Sent by the device instead of a response it cannot give.
pub const FAULT_BYTE: u8 = b'X';

const READ_CHUNK: usize = 128;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Opcode {
    GetVersion = 0x01,
    FlashErase = 0x10,
    SetPage = 0x11,
    WritePage = 0x12,
    ReadPage = 0x13,
    ConfigureFromFlash = 0x14,
    ReadStatus = 0x15,
    ConfigureBlock = 0x16,
    ConfigureStart = 0x17,
    DoPow = 0x20,
    Loopback = 0xaa,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        use Opcode::*;
        Some(match value {
            0x01 => GetVersion,
            0x10 => FlashErase,
            0x11 => SetPage,
            0x12 => WritePage,
            0x13 => ReadPage,
            0x14 => ConfigureFromFlash,
            0x15 => ReadStatus,
            0x16 => ConfigureBlock,
            0x17 => ConfigureStart,
            0x20 => DoPow,
            0xaa => Loopback,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            GetVersion => "get version",
            FlashErase => "flash erase",
            SetPage => "set page",
            WritePage => "write page",
            ReadPage => "read page",
            ConfigureFromFlash => "configure from flash",
            ReadStatus => "read status",
            ConfigureBlock => "configure block",
            ConfigureStart => "configure start",
            DoPow => "do pow",
            Loopback => "loopback",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub id: u8,
    pub opcode: u8,
    pub crc8: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Frame with the checksum of `payload`.
    pub fn new(id: u8, opcode: u8, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Violation::Oversized(payload.len()).into());
        }
        Ok(Self {
            id,
            opcode,
            crc8: crc8(&payload),
            payload,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let len = self.payload.len() as u16;
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.payload.len());
        bytes.extend_from_slice(&[self.id, self.opcode, self.crc8]);
        bytes.extend_from_slice(&len.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn verify(&self) -> Result<()> {
        let expected = crc8(&self.payload);
        if expected != self.crc8 {
            return Err(Error::ChecksumMismatch {
                kind: Checksum::Crc8,
                expected: expected as u32,
                actual: self.crc8 as u32,
            });
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Id,
    Opcode,
    Crc8,
    LenLo,
    LenHi,
    Data,
}

/// Byte-at-a-time frame decoder.
#[derive(Debug)]
pub struct FrameParser {
    state: State,
    id: u8,
    opcode: u8,
    crc8: u8,
    len: usize,
    payload: Vec<u8>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            state: State::Id,
            id: 0,
            opcode: 0,
            crc8: 0,
            len: 0,
            payload: Vec::new(),
        }
    }

    /// A frame has started but is not complete.
    pub fn in_frame(&self) -> bool {
        self.state != State::Id
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.state = State::Id;
        self.payload.clear();
    }

    /// Feed one byte, returning the frame it completes.
    ///
    /// Errors leave the parser ready for the next frame.
    pub fn push(&mut self, byte: u8) -> Result<Option<Frame>> {
        match self.state {
            State::Id => {
                if byte == FAULT_BYTE {
                    return Err(Violation::DeviceFault.into());
                }
                self.id = byte;
                self.state = State::Opcode;
            }
            State::Opcode => {
                self.opcode = byte;
                self.state = State::Crc8;
            }
            State::Crc8 => {
                self.crc8 = byte;
                self.state = State::LenLo;
            }
            State::LenLo => {
                self.len = byte as usize;
                self.state = State::LenHi;
            }
            State::LenHi => {
                self.len |= (byte as usize) << 8;
                if self.len > MAX_PAYLOAD {
                    let len = self.len;
                    self.reset();
                    return Err(Violation::Oversized(len).into());
                }
                self.payload = Vec::with_capacity(self.len);
                if self.len == 0 {
                    return self.complete().map(Some);
                }
                self.state = State::Data;
            }
            State::Data => {
                self.payload.push(byte);
                if self.payload.len() == self.len {
                    return self.complete().map(Some);
                }
            }
        }
        Ok(None)
    }

    fn complete(&mut self) -> Result<Frame> {
        self.state = State::Id;
        let frame = Frame {
            id: self.id,
            opcode: self.opcode,
            crc8: self.crc8,
            payload: core::mem::take(&mut self.payload),
        };
        frame.verify()?;
        Ok(frame)
    }
}

/// Request/response channel to a framed-protocol device.
pub struct Transport<P> {
    port: P,
    last_id: u8,
    parser: FrameParser,
}

impl<P: Port> Transport<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            last_id: 0,
            parser: FrameParser::new(),
        }
    }

    pub fn port(&mut self) -> &mut P {
        &mut self.port
    }

    /// Next sequence id, never the fault byte.
    fn next_id(&mut self) -> u8 {
        self.last_id = self.last_id.wrapping_add(1);
        if self.last_id == FAULT_BYTE {
            self.last_id = self.last_id.wrapping_add(1);
        }
        self.last_id
    }

    /// Send a request and wait for its response.
    ///
    /// `timeout` runs from the request until the first response byte, and
    /// again from that byte until the frame is complete.
    pub fn request(&mut self, opcode: Opcode, payload: &[u8], timeout: Duration) -> Result<Frame> {
        let id = self.next_id();
        let request = Frame::new(id, opcode as u8, payload.to_vec())?;
        let bytes = request.encode();
        debug!(id, op = opcode.name(), len = payload.len(), "request");
        trace!("> {}", hex::encode(&bytes[..bytes.len().min(64)]));
        self.port.write_all(&bytes).op("write request")?;

        self.parser.reset();
        let mut deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if Instant::now() > deadline {
                self.parser.reset();
                return Err(Error::TransportTimeout {
                    op: opcode.name(),
                    timeout,
                });
            }
            let n = self.port.read(&mut buf).op("read response")?;
            if n == 0 {
                thread::sleep(IDLE_SLEEP);
                continue;
            }
            trace!("< {}", hex::encode(&buf[..n]));
            for &byte in &buf[..n] {
                let started = !self.parser.in_frame();
                if let Some(response) = self.parser.push(byte)? {
                    return check_echo(&request, response);
                }
                if started {
                    deadline = Instant::now() + timeout;
                }
            }
        }
    }
}

fn check_echo(request: &Frame, response: Frame) -> Result<Frame> {
    if response.id != request.id {
        return Err(Violation::IdMismatch {
            sent: request.id,
            got: response.id,
        }
        .into());
    }
    if response.opcode != request.opcode {
        return Err(Violation::OpcodeMismatch {
            sent: request.opcode,
            got: response.opcode,
        }
        .into());
    }
    debug!(id = response.id, len = response.payload.len(), "response");
    Ok(response)
}
