//! One accelerator behind the job interface: trytes and difficulty in,
//! nonce trytes out.

use fpga::{Bus, Pins, Port};
use tracing::{debug, info, warn};

use crate::{
    backend::{Backend, DirectBus, FramedSerial},
    config::Config,
    error::{Error, Fault, Result},
    timing::always_timed,
    transaction, trinary,
};

/// Second opinion on a nonce.
///
/// Gets the transaction with the nonce attached and the requested difficulty.
pub trait Verifier: Send {
    fn verify(&mut self, transaction: &str, difficulty: u32) -> bool;
}

impl<F: FnMut(&str, u32) -> bool + Send> Verifier for F {
    fn verify(&mut self, transaction: &str, difficulty: u32) -> bool {
        self(transaction, difficulty)
    }
}

pub struct Driver<B> {
    backend: B,
    verifier: Option<Box<dyn Verifier>>,
    jobs: u64,
}

impl<B: Bus + Send, G: Pins + Send> Driver<DirectBus<B, G>> {
    /// Accelerator on a register bus.
    pub fn direct(bus: B, pins: G, config: Config) -> Self {
        Self::new(DirectBus::new(bus, pins, config))
    }
}

impl<P: Port + Send> Driver<FramedSerial<P>> {
    /// Accelerator behind a framed byte stream.
    pub fn framed(port: P, config: Config) -> Self {
        Self::new(FramedSerial::new(port, config))
    }
}

#[cfg(unix)]
impl Driver<FramedSerial<fpga::Tty>> {
    /// Framed accelerator on the serial device of `config`.
    pub fn open(config: Config) -> Result<Self> {
        let tty = fpga::Tty::open(&config.device, config.baud).map_err(|source| Error::Bus {
            op: "open serial device",
            source,
        })?;
        Ok(Self::framed(tty, config))
    }
}

impl<B: Backend> Driver<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            verifier: None,
            jobs: 0,
        }
    }

    /// Check every nonce before handing it out.
    pub fn with_verifier(mut self, verifier: impl Verifier + 'static) -> Self {
        self.verifier = Some(Box::new(verifier));
        self
    }

    pub fn backend(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Jobs that returned a nonce.
    pub fn jobs(&self) -> u64 {
        self.jobs
    }

    /// Bring the accelerator up. Jobs fail with
    /// [`Error::ConfigurationRequired`] until this succeeds.
    pub fn init(&mut self) -> Result<()> {
        trinary::table();
        let name = self.backend.name();
        always_timed(&format!("initializing {}", name), || self.backend.init())
    }

    /// Search a nonce for `trytes` with at least `difficulty` trailing zero trits.
    pub fn do_pow(&mut self, trytes: &str, difficulty: u32) -> Result<String> {
        transaction::validate(trytes)?;
        debug!(difficulty, backend = self.backend.name(), "pow");
        let nonce = self.backend.search(trytes.as_bytes(), difficulty)?;

        if let Some(verifier) = self.verifier.as_mut() {
            let attached = transaction::attach_nonce(trytes, &nonce)?;
            if !verifier.verify(&attached, difficulty) {
                warn!(%nonce, difficulty, "nonce rejected");
                return Err(Fault::NonceRejected.into());
            }
        }

        self.jobs += 1;
        info!(%nonce, "pow finished");
        Ok(nonce)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use super::*;
    use crate::{
        device::PAGE_SIZE,
        testing::{zero_transaction, SimBus, SimDevice, SimPins},
    };

    fn zero_trytes() -> String {
        String::from_utf8(zero_transaction()).unwrap()
    }

    #[test]
    fn init_builds_the_tryte_table() {
        let mut driver = Driver::direct(SimBus::new(1), SimPins::configured(), Config::default());
        driver.init().unwrap();
        assert!(trinary::table_built());
    }

    #[test]
    fn direct_jobs_need_a_successful_init() {
        let bus = SimBus::new(1).with_result(44, 1);
        let mut driver = Driver::direct(bus, SimPins::configured(), Config::default());
        assert!(matches!(
            driver.do_pow(&zero_trytes(), 1),
            Err(Error::ConfigurationRequired)
        ));
        assert_eq!(driver.backend().registers().bus().blocks_absorbed(), 0);
        assert_eq!(driver.backend().registers().bus().difficulty(), 0);

        // a failed init leaves it unusable too
        let mut driver = Driver::direct(SimBus::new(3), SimPins::configured(), Config::default());
        assert!(driver.init().is_err());
        assert!(matches!(
            driver.do_pow(&zero_trytes(), 1),
            Err(Error::ConfigurationRequired)
        ));
        assert_eq!(driver.backend().registers().bus().blocks_absorbed(), 0);
    }

    #[test]
    fn failed_flashing_leaves_the_device_unusable() {
        let path = std::env::temp_dir().join(format!("tritium-{}-verify.rbf", std::process::id()));
        std::fs::write(&path, [0x6b; 1000]).unwrap();
        let config = Config {
            image: path.clone(),
            flash: true,
            force_flash: true,
            ..Config::default()
        };

        let mut sim = SimDevice::configured().with_result(42, 1, 1);
        sim.corrupt(2 * PAGE_SIZE + 5);
        let mut driver = Driver::framed(sim, config.clone());
        assert!(matches!(driver.init(), Err(Error::HardwareFault(_))));
        assert!(matches!(
            driver.do_pow(&zero_trytes(), 14),
            Err(Error::ConfigurationRequired)
        ));
        assert_eq!(driver.backend().device().port().last_difficulty(), None);

        // a clean retry brings it back
        let sim = SimDevice::configured().with_result(42, 1, 1);
        let mut driver = Driver::framed(sim, config);
        driver.init().unwrap();
        assert!(driver.do_pow(&zero_trytes(), 14).is_ok());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn direct_driver_end_to_end() {
        let bus = SimBus::new(1).with_result(44, 1);
        let mut driver = Driver::direct(bus, SimPins::configured(), Config::default());
        driver.init().unwrap();
        let nonce = driver.do_pow(&zero_trytes(), 1).unwrap();
        assert_eq!(nonce, "PIDIVER999999999UGKMMMMMMMM");
        assert_eq!(driver.jobs(), 1);
    }

    #[test]
    fn invalid_transactions_never_reach_the_backend() {
        let mut driver = Driver::framed(SimDevice::configured(), Config::default());
        driver.init().unwrap();
        assert!(matches!(
            driver.do_pow("ABC", 14),
            Err(Error::InvalidInput(_))
        ));
        let mut lowercase = zero_trytes();
        lowercase.replace_range(0..1, "a");
        assert!(matches!(
            driver.do_pow(&lowercase, 14),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(driver.backend().device().port().last_difficulty(), None);
    }

    #[test]
    fn verifier_sees_the_attached_nonce() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        let sim = SimDevice::configured().with_result(42, 1, 1);
        let mut driver = Driver::framed(sim, Config::default()).with_verifier(
            move |transaction: &str, difficulty: u32| {
                seen.fetch_add(1, Ordering::SeqCst);
                difficulty == 9 && transaction.ends_with("PIDIVER999999999UGKMMMMMMMM")
            },
        );
        driver.init().unwrap();
        driver.do_pow(&zero_trytes(), 9).unwrap();
        assert!(matches!(
            driver.do_pow(&zero_trytes(), 10),
            Err(Error::HardwareFault(Fault::NonceRejected))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(driver.jobs(), 1);
    }
}
