//! Command set of framed-protocol accelerators.
//!
//! Commands without arguments carry a single zero byte. Records are packed
//! little endian.

use std::{fmt, time::Duration};

use byteorder::{ByteOrder, LittleEndian};
use fpga::Port;
use tracing::{debug, info};

use crate::{
    error::{Error, Fault, Result, Violation},
    framed::{Opcode, Transport, MAX_PAYLOAD},
    register::{block_crc, BLOCKS, BLOCK_WORDS},
    trinary::{self, TRYTE_WIDTH},
    transaction::TRANSACTION_TRYTES,
};

/// Flash of the accelerator board.
pub const FLASH_SIZE: usize = 1024 * 1024;
pub const PAGE_SIZE: usize = 256;
pub const PAGES: u32 = (FLASH_SIZE / PAGE_SIZE) as u32;
/// Last page, reserved for [`Meta`].
pub const META_PAGE: u32 = PAGES - 1;

/// Data words of a transaction.
pub const POW_WORDS: usize = TRANSACTION_TRYTES / TRYTE_WIDTH;
/// Payload of a do-PoW request: words, block checksums, difficulty.
pub const POW_PAYLOAD_LEN: usize = (POW_WORDS + BLOCKS + 1) * 4;

const NO_ARGUMENT: [u8; 1] = [0];

/// Deadlines of framed commands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// plain commands
    pub command: Duration,
    /// configuring from flash
    pub upload: Duration,
    /// a full search
    pub pow: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command: Duration::from_secs(1),
            upload: Duration::from_secs(40),
            pow: Duration::from_secs(60),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceStatus {
    /// the FPGA runs an application image
    pub configured: bool,
}

/// Description of the image stored in flash, kept in [`META_PAGE`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Meta {
    /// milliseconds since the epoch at programming time
    pub timestamp: u64,
    /// NUL-padded, at most 31 bytes used
    pub filename: [u8; 32],
    pub filesize: u32,
    pub autoconf: u8,
}

impl Meta {
    pub const LEN: usize = 8 + 32 + 4 + 1;

    pub fn new(timestamp: u64, filename: &str, filesize: u32) -> Self {
        let mut name = [0u8; 32];
        let bytes = filename.as_bytes();
        let len = bytes.len().min(31);
        name[..len].copy_from_slice(&bytes[..len]);
        Self {
            timestamp,
            filename: name,
            filesize,
            autoconf: 0,
        }
    }

    /// Erased flash reads all ones.
    pub fn is_empty(&self) -> bool {
        self.timestamp == u64::MAX
    }

    pub fn filename(&self) -> String {
        let end = self.filename.iter().position(|&b| b == 0).unwrap_or(32);
        String::from_utf8_lossy(&self.filename[..end]).into_owned()
    }

    /// Page image, padded with zeros.
    pub fn to_page(&self) -> [u8; PAGE_SIZE] {
        let mut page = [0u8; PAGE_SIZE];
        LittleEndian::write_u64(&mut page[0..8], self.timestamp);
        page[8..40].copy_from_slice(&self.filename);
        LittleEndian::write_u32(&mut page[40..44], self.filesize);
        page[44] = self.autoconf;
        page
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        expect_len("meta", bytes, Self::LEN)?;
        let mut filename = [0u8; 32];
        filename.copy_from_slice(&bytes[8..40]);
        Ok(Self {
            timestamp: LittleEndian::read_u64(&bytes[0..8]),
            filename,
            filesize: LittleEndian::read_u32(&bytes[40..44]),
            autoconf: bytes[44],
        })
    }
}

/// Result record of a framed search.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PowResult {
    pub nonce: u32,
    pub mask: u32,
    pub lanes: u32,
    pub elapsed_ms: u32,
}

impl PowResult {
    pub const LEN: usize = 16;

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        expect_len("pow result", bytes, Self::LEN)?;
        Ok(Self {
            nonce: LittleEndian::read_u32(&bytes[0..4]),
            mask: LittleEndian::read_u32(&bytes[4..8]),
            lanes: LittleEndian::read_u32(&bytes[8..12]),
            elapsed_ms: LittleEndian::read_u32(&bytes[12..16]),
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        LittleEndian::write_u32_into(
            &[self.nonce, self.mask, self.lanes, self.elapsed_ms],
            &mut bytes,
        );
        bytes
    }

    /// Hashes per second over all lanes.
    pub fn hash_rate(&self) -> f64 {
        self.nonce as f64 * self.lanes as f64 / ((self.elapsed_ms as f64 + 1.0) / 1000.0)
    }
}

fn expect_len(what: &'static str, bytes: &[u8], len: usize) -> Result<()> {
    if bytes.len() < len {
        return Err(Violation::ShortPayload {
            what,
            len: bytes.len(),
        }
        .into());
    }
    Ok(())
}

/// Payload of a do-PoW request.
///
/// Per-block CRC-32s let the device check the transfer; zero disables the
/// check.
pub fn pow_payload(trytes: &[u8], difficulty: u32, use_crc: bool) -> Result<Vec<u8>> {
    if trytes.len() != TRANSACTION_TRYTES {
        return Err(Error::InvalidInput(format!(
            "transaction of {} trytes",
            trytes.len()
        )));
    }
    let words = trinary::table()
        .encode(trytes)
        .ok_or_else(|| Error::InvalidInput("not a tryte string".into()))?;

    let mut checksums = [0u32; BLOCKS];
    if use_crc {
        for (crc, block) in checksums.iter_mut().zip(words.chunks(BLOCK_WORDS)) {
            *crc = block_crc(block);
        }
    }

    let mut payload = vec![0u8; POW_PAYLOAD_LEN];
    let (data, rest) = payload.split_at_mut(POW_WORDS * 4);
    let (crcs, mwm) = rest.split_at_mut(BLOCKS * 4);
    LittleEndian::write_u32_into(&words, data);
    LittleEndian::write_u32_into(&checksums, crcs);
    LittleEndian::write_u32(mwm, difficulty);
    Ok(payload)
}

/// Framed-protocol accelerator.
pub struct Device<P> {
    transport: Transport<P>,
    timeouts: Timeouts,
}

impl<P: Port> Device<P> {
    pub fn new(port: P, timeouts: Timeouts) -> Self {
        Self {
            transport: Transport::new(port),
            timeouts,
        }
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn port(&mut self) -> &mut P {
        self.transport.port()
    }

    fn command(&mut self, opcode: Opcode, payload: &[u8]) -> Result<Vec<u8>> {
        let timeout = self.timeouts.command;
        self.command_within(opcode, payload, timeout)
    }

    fn command_within(&mut self, opcode: Opcode, payload: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        Ok(self.transport.request(opcode, payload, timeout)?.payload)
    }

    pub fn get_version(&mut self) -> Result<Version> {
        let bytes = self.command(Opcode::GetVersion, &NO_ARGUMENT)?;
        expect_len("version", &bytes, 8)?;
        Ok(Version {
            major: LittleEndian::read_u32(&bytes[0..4]),
            minor: LittleEndian::read_u32(&bytes[4..8]),
        })
    }

    pub fn read_status(&mut self) -> Result<DeviceStatus> {
        let bytes = self.command(Opcode::ReadStatus, &NO_ARGUMENT)?;
        expect_len("status", &bytes, 1)?;
        Ok(DeviceStatus {
            configured: bytes[0] != 0,
        })
    }

    pub fn is_configured(&mut self) -> Result<bool> {
        Ok(self.read_status()?.configured)
    }

    pub fn flash_erase(&mut self) -> Result<()> {
        self.command(Opcode::FlashErase, &NO_ARGUMENT).map(drop)
    }

    pub fn set_page(&mut self, page: u32) -> Result<()> {
        self.command(Opcode::SetPage, &page.to_le_bytes()).map(drop)
    }

    /// Write the addressed page; short data is padded with zeros.
    pub fn write_page(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > PAGE_SIZE {
            return Err(Error::InvalidInput(format!("page of {} bytes", data.len())));
        }
        let mut page = [0u8; PAGE_SIZE];
        page[..data.len()].copy_from_slice(data);
        self.command(Opcode::WritePage, &page).map(drop)
    }

    pub fn read_page(&mut self) -> Result<[u8; PAGE_SIZE]> {
        let bytes = self.command(Opcode::ReadPage, &[0u8; PAGE_SIZE])?;
        expect_len("page", &bytes, PAGE_SIZE)?;
        let mut page = [0u8; PAGE_SIZE];
        page.copy_from_slice(&bytes[..PAGE_SIZE]);
        Ok(page)
    }

    pub fn write_page_number(&mut self, page: u32, data: &[u8]) -> Result<()> {
        self.set_page(page)?;
        self.write_page(data)
    }

    pub fn read_page_number(&mut self, page: u32) -> Result<[u8; PAGE_SIZE]> {
        self.set_page(page)?;
        self.read_page()
    }

    pub fn read_meta(&mut self) -> Result<Meta> {
        Meta::from_bytes(&self.read_page_number(META_PAGE)?)
    }

    pub fn write_meta(&mut self, meta: &Meta) -> Result<()> {
        self.write_page_number(META_PAGE, &meta.to_page())
    }

    /// Load the FPGA from the image in flash.
    pub fn configure_from_flash(&mut self) -> Result<()> {
        let timeout = self.timeouts.upload;
        self.command_within(Opcode::ConfigureFromFlash, &NO_ARGUMENT, timeout)
            .map(drop)
    }

    /// Reset the configuration logic ahead of [`Device::configure_block`].
    pub fn configure_start(&mut self) -> Result<()> {
        self.command(Opcode::ConfigureStart, &NO_ARGUMENT).map(drop)
    }

    pub fn configure_block(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_PAYLOAD {
            return Err(Violation::Oversized(data.len()).into());
        }
        self.command(Opcode::ConfigureBlock, data).map(drop)
    }

    /// Search a nonce for a transaction.
    pub fn do_pow(&mut self, trytes: &[u8], difficulty: u32, use_crc: bool) -> Result<PowResult> {
        let payload = pow_payload(trytes, difficulty, use_crc)?;
        let timeout = self.timeouts.pow;
        let result = PowResult::from_bytes(&self.command_within(Opcode::DoPow, &payload, timeout)?)?;
        info!(
            "found nonce: {:#010x} (mask: {:#010x}), {} ms, {:.2} MH/s",
            result.nonce,
            result.mask,
            result.elapsed_ms,
            result.hash_rate() / 1e6
        );
        Ok(result)
    }

    /// Round trip of a full-size frame; returns bytes per second.
    pub fn loopback(&mut self) -> Result<f64> {
        let timeout = self.timeouts.command;
        let (echo, elapsed) = crate::timing::measured(|| {
            self.command_within(Opcode::Loopback, &[0u8; MAX_PAYLOAD], timeout)
        });
        let echo = echo?;
        if echo.len() != MAX_PAYLOAD {
            return Err(Violation::ShortPayload {
                what: "loopback",
                len: echo.len(),
            }
            .into());
        }
        let rate = 2.0 * MAX_PAYLOAD as f64 / elapsed.as_secs_f64().max(1e-6);
        debug!("loopback: {:?}, {:.0} B/s", elapsed, rate);
        Ok(rate)
    }

    /// Whether the image in flash is missing or differs from `meta`.
    pub fn needs_flash(&mut self, filename: &str, filesize: u32) -> Result<bool> {
        let stored = self.read_meta()?;
        if stored.is_empty() {
            info!("flash is empty");
            return Ok(true);
        }
        info!(
            "configuration in flash: {} ({} bytes, timestamp {})",
            stored.filename(),
            stored.filesize,
            stored.timestamp
        );
        Ok(stored.filename() != Meta::new(0, filename, 0).filename() || stored.filesize != filesize)
    }

    /// Fail with a verify fault unless `page` reads back as `expected`.
    pub fn verify_page(&mut self, page: u32, expected: &[u8]) -> Result<()> {
        let read = self.read_page_number(page)?;
        if read[..expected.len()] != *expected {
            return Err(Fault::VerifyMismatch(page).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SimDevice;

    #[test]
    fn payload_layout() {
        let trytes = vec![b'9'; TRANSACTION_TRYTES];
        let payload = pow_payload(&trytes, 14, true).unwrap();
        assert_eq!(payload.len(), 3700);
        assert_eq!(payload[..4], 0x1003_ffffu32.to_le_bytes());
        assert_eq!(
            payload[POW_WORDS * 4..POW_WORDS * 4 + 4],
            0x1d3f_bc95u32.to_le_bytes()
        );
        assert_eq!(payload[3696..], 14u32.to_le_bytes());

        let unchecked = pow_payload(&trytes, 14, false).unwrap();
        assert!(unchecked[POW_WORDS * 4..3696].iter().all(|&b| b == 0));
        assert!(pow_payload(&trytes[1..], 14, true).is_err());
    }

    #[test]
    fn meta_page_layout() {
        let meta = Meta::new(0x0102_0304_0506_0708, "pidiver.rbf", 368_011);
        let page = meta.to_page();
        assert_eq!(page[..8], [8, 7, 6, 5, 4, 3, 2, 1]);
        assert_eq!(&page[8..19], b"pidiver.rbf");
        assert_eq!(page[40..44], 368_011u32.to_le_bytes());
        assert_eq!(Meta::from_bytes(&page).unwrap(), meta);
        assert_eq!(meta.filename(), "pidiver.rbf");
        assert!(Meta::from_bytes(&[0xff; PAGE_SIZE]).unwrap().is_empty());
        assert!(Meta::from_bytes(&page[..44]).is_err());
    }

    #[test]
    fn long_filenames_are_truncated() {
        let meta = Meta::new(0, &"x".repeat(40), 0);
        assert_eq!(meta.filename().len(), 31);
        assert_eq!(meta.filename[31], 0);
    }

    #[test]
    fn commands_against_simulated_device() {
        let mut device = Device::new(SimDevice::new(), Timeouts::default());
        assert_eq!(device.get_version().unwrap(), Version { major: 1, minor: 1 });
        assert!(!device.is_configured().unwrap());

        device.write_page_number(3, &[1, 2, 3]).unwrap();
        let page = device.read_page_number(3).unwrap();
        assert_eq!(page[..4], [1, 2, 3, 0]);
        device.verify_page(3, &page).unwrap();
        assert!(matches!(
            device.verify_page(3, &[9; PAGE_SIZE]),
            Err(Error::HardwareFault(Fault::VerifyMismatch(3)))
        ));

        assert!(device.read_meta().unwrap().is_empty());
        assert!(device.needs_flash("image.rbf", 10).unwrap());
        device.write_meta(&Meta::new(1, "image.rbf", 10)).unwrap();
        assert!(!device.needs_flash("image.rbf", 10).unwrap());
        assert!(device.needs_flash("image.rbf", 11).unwrap());

        device.flash_erase().unwrap();
        assert!(device.read_meta().unwrap().is_empty());
        assert!(device.loopback().unwrap() > 0.0);
    }

    #[test]
    fn version_display() {
        assert_eq!(Version { major: 1, minor: 2 }.to_string(), "1.2");
    }
}
