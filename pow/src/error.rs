//! Error kinds surfaced by the driver.

use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::reservation::Owner;

/// Which integrity check failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Checksum {
    /// per-frame check of the framed transport
    Crc8,
    /// bulk midstate transfer on the register bus
    Crc32,
}

/// Framing or protocol rule broken by either side.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Violation {
    #[error("payload length {0} exceeds the frame maximum")]
    Oversized(usize),
    #[error("device reported a protocol fault")]
    DeviceFault,
    #[error("response id {got} does not echo request id {sent}")]
    IdMismatch { sent: u8, got: u8 },
    #[error("response opcode {got:#04x} to request {sent:#04x}")]
    OpcodeMismatch { sent: u8, got: u8 },
    #[error("{what} payload too short: {len} bytes")]
    ShortPayload { what: &'static str, len: usize },
}

/// The accelerator misbehaved or reported an impossible result.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Fault {
    #[error("lane mask is zero")]
    ZeroLaneMask,
    #[error("lane mask {mask:#x} has no lane below {lanes}")]
    MaskOutsideLanes { mask: u32, lanes: u32 },
    #[error("lane count {0} is not a power of two in 1..=8")]
    InvalidLaneCount(u32),
    #[error("curl did not finish midstate block {0}")]
    CurlNotFinished(usize),
    #[error("flash verify mismatch at page {0}")]
    VerifyMismatch(u32),
    #[error("flash meta page does not read back as written")]
    MetaMismatch,
    #[error("configuration image of {size} bytes exceeds {max} bytes")]
    ImageTooLarge { size: usize, max: usize },
    #[error("assembled nonce contains an unknown trit")]
    MalformedNonce,
    #[error("nonce rejected by verifier")]
    NonceRejected,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{op} timed out after {timeout:?}")]
    TransportTimeout { op: &'static str, timeout: Duration },

    #[error("{kind:?} mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        kind: Checksum,
        expected: u32,
        actual: u32,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),

    #[error("reservation as {owner:?} not acquired within {waited:?}")]
    ReservationTimeout { owner: Owner, waited: Duration },

    #[error("hardware fault: {0}")]
    HardwareFault(#[from] Fault),

    #[error("accelerator is not configured")]
    ConfigurationRequired,

    #[error("search space exhausted without a nonce")]
    NonceNotFound,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{op}: {source}")]
    Bus {
        op: &'static str,
        #[source]
        source: fpga::Error,
    },

    #[error("reading {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("worker pool is shutting down")]
    ShuttingDown,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Tag capability errors with the operation that failed.
pub(crate) trait Context<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> Context<T> for fpga::Result<T> {
    #[inline]
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|source| Error::Bus { op, source })
    }
}

impl Error {
    /// Checksum and timeout errors fail a single job; resubmitting may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::TransportTimeout { .. }
                | Error::ChecksumMismatch { .. }
                | Error::ReservationTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_errors_carry_the_operation() {
        let failed: fpga::Result<u32> = Err(fpga::Error::Unsupported("send_receive"));
        let err = failed.op("read status").unwrap_err();
        assert_eq!(
            err.to_string(),
            "read status: send_receive is not supported by this backend"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn checksum_display() {
        let err = Error::ChecksumMismatch {
            kind: Checksum::Crc8,
            expected: 0xbc,
            actual: 0x12,
        };
        assert_eq!(err.to_string(), "Crc8 mismatch: expected 0xbc, got 0x12");
        assert!(err.is_transient());
    }
}
