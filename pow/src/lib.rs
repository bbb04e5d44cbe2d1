//! Host-side driver for ternary Curl proof-of-work accelerators.
//!
//! The accelerator absorbs a 2673-tryte transaction into its Curl midstate,
//! then searches a binary nonce counter on several lanes in parallel until the
//! hash has the requested number of trailing zero trits.
//!
//! Two transports are supported:
//! - a register bus (SPI), configured over passive-serial pins on every start
//! - a framed byte stream (USB-CDC), configured from on-board flash or by
//!   direct upload
//!
//! Steps of a job:
//! - encode the trytes to hi/lo words with a precomputed table
//! - stream the midstate blocks, checked by CRC-32
//! - program the difficulty, start, poll
//! - assemble the nonce trytes from counter, lane mask and signature
//!
//! The tryte table and CRC tables are built once and shared read-only.

pub mod backend;
pub use backend::{Backend, DirectBus, FramedSerial};

pub mod checksum;

pub mod config;
pub use config::Config;

pub mod device;

pub mod driver;
pub use driver::{Driver, Verifier};

pub mod error;
pub use error::{Error, Result};

pub mod framed;

pub mod nonce;

pub mod pool;
pub use pool::Pool;

pub mod program;

pub mod register;

pub mod reservation;

pub mod testing;

pub mod timing;

pub mod transaction;

pub mod trinary;

pub use fpga;
