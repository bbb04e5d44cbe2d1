//! # fpga
//!
//! Rust traits to interact with ternary proof-of-work accelerators.
//!
//! The host side of an accelerator is reached over one of two capabilities:
//! a synchronous register bus ([`Bus`], typically SPI) or an asynchronous byte
//! stream ([`Port`], typically USB-CDC). Accelerators without persistent flash
//! are configured over a set of dedicated configuration lines ([`Pins`]).
//!
//! Implemented for serial character devices ([`Tty`]) and a mock ([`Null`]).

use thiserror::Error;

pub mod null;
pub use null::Null;

pub mod passive;

#[cfg(unix)]
pub mod tty;
#[cfg(unix)]
pub use tty::Tty;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{op} failed: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("configuration failed: {0}")]
    ConfigurationFailed(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;

/// Bus parameters handed to [`Bus::init`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BusConfig {
    /// serial clock in Hz
    pub clock_hz: u32,
    /// chip select is driven by the host rather than the controller
    pub manual_chip_select: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        // 250 MHz core clock divided by 32
        Self {
            clock_hz: 7_812_500,
            manual_chip_select: true,
        }
    }
}

/// Word-oriented register bus.
///
/// Every transfer is one 32-bit command word; the accelerator decodes the
/// opcode from the top bits.
pub trait Bus {
    /// bring up the bus
    fn init(&mut self, _config: &BusConfig) -> Result<()> {
        Ok(())
    }

    /// transmit one word, most significant byte first
    fn send(&mut self, word: u32) -> Result<()>;

    /// Transmit a block of words in memory order.
    ///
    /// Words are expected to be byte-swapped already (see
    /// `TryteTable::bus_word`), so a little-endian host puts them on the wire
    /// most significant byte first without touching each word again.
    fn send_block(&mut self, words: &[u32]) -> Result<()> {
        for word in words {
            self.send(u32::from_be(*word))?;
        }
        Ok(())
    }

    /// transmit a word, then clock in the accelerator's reply
    fn send_receive(&mut self, word: u32) -> Result<u32>;
}

/// Byte stream to a framed-protocol device.
pub trait Port {
    /// Read whatever is available.
    ///
    /// Returns `Ok(0)` if nothing arrived within the port's poll interval;
    /// this is not an error, the caller owns the overall deadline.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// write all bytes, in order, as one request
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
}

/// Configuration outputs of a passive-serial FPGA.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Output {
    /// nCONFIG, active low reset of the configuration logic
    Config,
    /// DATA0
    Data,
    /// DCLK
    Clock,
}

/// Configuration inputs of a passive-serial FPGA.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Input {
    /// nSTATUS
    Status,
    /// CONF_DONE
    ConfigDone,
}

/// GPIO lines used to stream a configuration image.
pub trait Pins {
    fn set(&mut self, pin: Output, high: bool) -> Result<()>;
    fn level(&mut self, pin: Input) -> Result<bool>;

    /// CONF_DONE high means the FPGA runs an application image
    fn is_configured(&mut self) -> Result<bool> {
        self.level(Input::ConfigDone)
    }
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn init(&mut self, config: &BusConfig) -> Result<()> {
        (**self).init(config)
    }
    fn send(&mut self, word: u32) -> Result<()> {
        (**self).send(word)
    }
    fn send_block(&mut self, words: &[u32]) -> Result<()> {
        (**self).send_block(words)
    }
    fn send_receive(&mut self, word: u32) -> Result<u32> {
        (**self).send_receive(word)
    }
}

impl<P: Port + ?Sized> Port for &mut P {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        (**self).write_all(data)
    }
}
