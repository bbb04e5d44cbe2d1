//! Passive-serial configuration: stream an image straight into the FPGA's
//! configuration logic over [`Pins`].

use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{Error, Input, Output, Pins, Result};

/// time nCONFIG is held low to reset the configuration logic
const RESET_PULSE: Duration = Duration::from_millis(10);
/// upper bound for nSTATUS to follow nCONFIG
const HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(500);

fn wait_for<P: Pins>(
    pins: &mut P,
    what: &'static str,
    mut done: impl FnMut(&mut P) -> Result<bool>,
) -> Result<()> {
    let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
    loop {
        if done(pins)? {
            return Ok(());
        }
        if Instant::now() > deadline {
            return Err(Error::Timeout(what));
        }
        thread::yield_now();
    }
}

/// Reset the configuration logic and clock in `image`, least significant bit
/// of each byte first.
///
/// Streaming stops early once CONF_DONE rises. Returns the number of bytes
/// clocked in.
pub fn configure<P: Pins>(pins: &mut P, image: &[u8]) -> Result<usize> {
    pins.set(Output::Clock, false)?;

    pins.set(Output::Config, false)?;
    thread::sleep(RESET_PULSE);
    wait_for(pins, "nSTATUS low", |pins| {
        Ok(!(pins.level(Input::Status)? && pins.level(Input::ConfigDone)?))
    })?;

    pins.set(Output::Config, true)?;
    wait_for(pins, "nSTATUS high", |pins| pins.level(Input::Status))?;

    let mut sent = 0;
    for &byte in image {
        for bit in 0..8 {
            pins.set(Output::Data, (byte >> bit) & 1 != 0)?;
            pins.set(Output::Clock, true)?;
            pins.set(Output::Clock, false)?;
        }
        sent += 1;
        if pins.level(Input::ConfigDone)? {
            break;
        }
    }

    if !pins.level(Input::ConfigDone)? {
        return Err(Error::ConfigurationFailed("CONF_DONE low after image"));
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shift register that raises CONF_DONE after `needed` bytes.
    struct Recorder {
        config: bool,
        data: bool,
        clock: bool,
        bits: Vec<bool>,
        needed: usize,
    }

    impl Recorder {
        fn new(needed: usize) -> Self {
            Self {
                config: true,
                data: false,
                clock: false,
                bits: Vec::new(),
                needed,
            }
        }

        fn bytes(&self) -> Vec<u8> {
            self.bits
                .chunks(8)
                .map(|chunk| {
                    chunk
                        .iter()
                        .enumerate()
                        .fold(0u8, |acc, (i, &bit)| acc | (bit as u8) << i)
                })
                .collect()
        }
    }

    impl Pins for Recorder {
        fn set(&mut self, pin: Output, high: bool) -> Result<()> {
            match pin {
                Output::Config => {
                    if !high {
                        self.bits.clear();
                    }
                    self.config = high;
                }
                Output::Data => self.data = high,
                Output::Clock => {
                    if high && !self.clock && self.config {
                        self.bits.push(self.data);
                    }
                    self.clock = high;
                }
            }
            Ok(())
        }

        fn level(&mut self, pin: Input) -> Result<bool> {
            Ok(match pin {
                Input::Status => self.config,
                Input::ConfigDone => self.bits.len() >= 8 * self.needed,
            })
        }
    }

    #[test]
    fn clocks_lsb_first_until_done() {
        let image = [0x01, 0x80, 0xa5, 0x3c];
        let mut pins = Recorder::new(3);
        let sent = configure(&mut pins, &image).unwrap();
        assert_eq!(sent, 3);
        assert_eq!(pins.bytes(), &image[..3]);
    }

    #[test]
    fn short_image_fails() {
        let mut pins = Recorder::new(8);
        assert!(matches!(
            configure(&mut pins, &[0u8; 4]),
            Err(Error::ConfigurationFailed(_))
        ));
    }
}
