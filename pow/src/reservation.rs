//! Mutual exclusion between two hosts sharing one accelerator.
//!
//! The accelerator keeps a two-bit owner id in its status register. A host
//! asks for the reservation, reads the owner back, and owns the accelerator
//! once it reads its own id. The id is cleared by an explicit reset.

use std::{
    ops::{Deref, DerefMut},
    thread,
    time::{Duration, Instant},
};

use fpga::Bus;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    register::Registers,
};

/// Host holding the reservation.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Owner {
    None = 0,
    /// host wired to the register bus
    Controller = 1,
    /// host attached over USB
    Usb = 2,
}

impl Owner {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Owner::None),
            1 => Some(Owner::Controller),
            2 => Some(Owner::Usb),
            _ => None,
        }
    }
}

/// Access to the reservation bits of an accelerator.
pub trait ReservationRegister {
    fn request(&mut self, owner: Owner) -> Result<()>;
    fn owner(&mut self) -> Result<Option<Owner>>;
    fn reset(&mut self) -> Result<()>;
}

impl<B: Bus> ReservationRegister for Registers<B> {
    fn request(&mut self, owner: Owner) -> Result<()> {
        self.request_reservation(owner)
    }

    fn owner(&mut self) -> Result<Option<Owner>> {
        Ok(self.read_status()?.owner())
    }

    fn reset(&mut self) -> Result<()> {
        self.reset_reservation()
    }
}

impl<R: ReservationRegister + ?Sized> ReservationRegister for &mut R {
    fn request(&mut self, owner: Owner) -> Result<()> {
        (**self).request(owner)
    }
    fn owner(&mut self) -> Result<Option<Owner>> {
        (**self).owner()
    }
    fn reset(&mut self) -> Result<()> {
        (**self).reset()
    }
}

/// Timing of the acquisition loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ReservationPolicy {
    /// sleep between two attempts
    pub backoff: Duration,
    /// give up after this long, per round
    pub timeout: Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(50),
            timeout: Duration::from_secs(5),
        }
    }
}

fn try_acquire<R: ReservationRegister + ?Sized>(
    register: &mut R,
    owner: Owner,
    policy: ReservationPolicy,
) -> Result<()> {
    let start = Instant::now();
    loop {
        register.request(owner)?;
        if register.owner()? == Some(owner) {
            return Ok(());
        }
        let waited = start.elapsed();
        if waited >= policy.timeout {
            return Err(Error::ReservationTimeout { owner, waited });
        }
        thread::sleep(policy.backoff);
    }
}

/// Wait for the reservation as `owner`.
///
/// If the other host does not let go in time, its reservation is reset and
/// the wait starts over once. The returned guard releases on drop.
pub fn acquire<R: ReservationRegister>(
    mut register: R,
    owner: Owner,
    policy: ReservationPolicy,
) -> Result<Reservation<R>> {
    match try_acquire(&mut register, owner, policy) {
        Err(Error::ReservationTimeout { waited, .. }) => {
            warn!(?owner, ?waited, "reservation not released, resetting");
            register.reset()?;
            try_acquire(&mut register, owner, policy)?;
        }
        result => result?,
    }
    debug!(?owner, "reservation acquired");
    Ok(Reservation { register, owner })
}

/// Held reservation, released when dropped.
///
/// Dereferences to the register it guards.
pub struct Reservation<R: ReservationRegister> {
    register: R,
    owner: Owner,
}

impl<R: ReservationRegister> Reservation<R> {
    pub fn holder(&self) -> Owner {
        self.owner
    }
}

impl<R: ReservationRegister> Deref for Reservation<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.register
    }
}

impl<R: ReservationRegister> DerefMut for Reservation<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.register
    }
}

impl<R: ReservationRegister> Drop for Reservation<R> {
    fn drop(&mut self) {
        match self.register.reset() {
            Ok(()) => debug!(owner = ?self.owner, "reservation released"),
            Err(err) => warn!(owner = ?self.owner, "releasing reservation failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SharedStatus;

    fn quick() -> ReservationPolicy {
        ReservationPolicy {
            backoff: Duration::from_millis(1),
            timeout: Duration::from_millis(20),
        }
    }

    #[test]
    fn owner_bits() {
        assert_eq!(Owner::from_bits(0), Some(Owner::None));
        assert_eq!(Owner::from_bits(2), Some(Owner::Usb));
        assert_eq!(Owner::from_bits(3), None);
    }

    #[test]
    fn free_register_is_acquired_and_released() {
        let shared = SharedStatus::new();
        let mut host = shared.host();
        {
            let mut held = acquire(&mut host, Owner::Controller, quick()).unwrap();
            assert_eq!(held.holder(), Owner::Controller);
            assert_eq!(held.owner().unwrap(), Some(Owner::Controller));
        }
        assert_eq!(shared.current(), Owner::None);
    }

    #[test]
    fn stuck_owner_is_reset_once() {
        let shared = SharedStatus::new();
        let mut usb = shared.host();
        usb.request(Owner::Usb).unwrap();

        let mut controller = shared.host();
        let held = acquire(&mut controller, Owner::Controller, quick()).unwrap();
        assert_eq!(shared.current(), Owner::Controller);
        drop(held);
        assert_eq!(shared.current(), Owner::None);
    }

    #[test]
    fn gives_up_after_the_retry() {
        let shared = SharedStatus::new();
        shared.pin(Owner::Usb);

        let mut controller = shared.host();
        let start = Instant::now();
        match acquire(&mut controller, Owner::Controller, quick()) {
            Err(Error::ReservationTimeout { owner, .. }) => assert_eq!(owner, Owner::Controller),
            Err(err) => panic!("unexpected error {}", err),
            Ok(_) => panic!("acquired a pinned reservation"),
        }
        assert!(start.elapsed() >= 2 * quick().timeout);
    }
}
