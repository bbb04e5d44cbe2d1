//! Driver settings, owned by whoever loads the process configuration.

use std::{path::PathBuf, time::Duration};

use crate::{device::Timeouts, register::Transfer, reservation::ReservationPolicy};

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// serial device of a framed accelerator
    pub device: PathBuf,
    /// baud rate of `device`; ignored by USB-CDC but must be valid
    pub baud: u32,
    /// configuration image
    pub image: PathBuf,
    /// the board keeps its image in flash rather than taking it on every start
    pub flash: bool,
    /// reprogram the flash even if its meta page matches the image
    pub force_flash: bool,
    /// configure the FPGA even if it reports being configured
    pub force_configure: bool,
    /// check midstate transfers against the accelerator's CRC-32
    pub use_crc: bool,
    /// take the reservation around every job; the accelerator has two hosts
    pub use_shared_lock: bool,
    /// sends per midstate block before a CRC-32 mismatch fails the job
    pub transfer_attempts: usize,
    /// status polling period while a search runs
    pub poll_interval: Duration,
    /// longest search
    pub pow_timeout: Duration,
    /// plain framed commands
    pub command_timeout: Duration,
    /// configuring from flash
    pub upload_timeout: Duration,
    pub reservation: ReservationPolicy,
    /// use this lane count instead of the one the accelerator reports
    pub lanes_override: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/ttyACM0"),
            baud: 115_200,
            image: PathBuf::from("pidiver.rbf"),
            flash: false,
            force_flash: false,
            force_configure: false,
            use_crc: true,
            use_shared_lock: false,
            transfer_attempts: 3,
            poll_interval: Duration::from_millis(1),
            pow_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(1),
            upload_timeout: Duration::from_secs(40),
            reservation: ReservationPolicy::default(),
            lanes_override: None,
        }
    }
}

impl Config {
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            command: self.command_timeout,
            upload: self.upload_timeout,
            pow: self.pow_timeout,
        }
    }

    pub fn transfer(&self) -> Transfer {
        Transfer {
            use_crc: self.use_crc,
            attempts: self.transfer_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.transfer(), Transfer::default());
        assert_eq!(config.timeouts(), Timeouts::default());
        assert_eq!(config.reservation.backoff, Duration::from_millis(50));
        assert!(!config.use_shared_lock);
    }
}
