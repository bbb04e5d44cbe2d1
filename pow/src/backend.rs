//! The two ways of reaching an accelerator, behind one interface.

use fpga::{passive, Bus, BusConfig, Pins, Port};
use tracing::info;

use crate::{
    config::Config,
    device::{Device, Version},
    error::{Context as _, Error, Result},
    nonce::{self, NonceLayout},
    program::{self, Image},
    register::{Registers, Status},
    reservation::{self, Owner},
    timing::timed,
};

/// An accelerator able to search nonces.
pub trait Backend: Send {
    /// Bring the accelerator up, configuring it if needed.
    fn init(&mut self) -> Result<()>;

    /// Nonce trytes for a validated transaction.
    ///
    /// Fails with [`Error::ConfigurationRequired`] until the last `init`
    /// succeeded.
    fn search(&mut self, trytes: &[u8], difficulty: u32) -> Result<String>;

    fn name(&self) -> &'static str;
}

impl<T: Backend + ?Sized> Backend for Box<T> {
    fn init(&mut self) -> Result<()> {
        (**self).init()
    }
    fn search(&mut self, trytes: &[u8], difficulty: u32) -> Result<String> {
        (**self).search(trytes, difficulty)
    }
    fn name(&self) -> &'static str {
        (**self).name()
    }
}

fn log_progress(phase: program::Phase, percent: u8) {
    if percent % 10 == 0 {
        info!("{:?} {}%", phase, percent);
    }
}

/// Accelerator on a register bus, configured over passive-serial pins.
pub struct DirectBus<B, G> {
    registers: Registers<B>,
    pins: G,
    config: Config,
    lanes: u32,
    ready: bool,
}

impl<B: Bus + Send, G: Pins + Send> DirectBus<B, G> {
    pub fn new(bus: B, pins: G, config: Config) -> Self {
        Self {
            registers: Registers::new(bus),
            pins,
            config,
            lanes: 0,
            ready: false,
        }
    }

    /// Lane count found by [`Backend::init`].
    pub fn lanes(&self) -> u32 {
        self.lanes
    }

    pub fn registers(&mut self) -> &mut Registers<B> {
        &mut self.registers
    }

    fn bring_up(&mut self) -> Result<()> {
        let configured = self.pins.is_configured().op("read CONF_DONE")?;
        if self.config.force_configure || !configured {
            info!("fpga not configured (or configuring forced), configuring");
            let image = Image::load(&self.config.image)?;
            let sent = timed("configuring", || passive::configure(&mut self.pins, &image.data))
                .op("configure")?;
            info!("configured with {} of {} bytes", sent, image.len());
        }
        if !self.pins.is_configured().op("read CONF_DONE")? {
            return Err(Error::ConfigurationRequired);
        }

        self.registers
            .bus()
            .init(&BusConfig::default())
            .op("bus init")?;
        self.lanes = match self.config.lanes_override {
            Some(lanes) => lanes,
            None => self.registers.read_lane_count()?,
        };
        nonce::lane_bits(self.lanes)?;
        info!("lanes: {}", self.lanes);
        Ok(())
    }
}

fn run<B: Bus>(
    registers: &mut Registers<B>,
    config: &Config,
    lanes: u32,
    trytes: &[u8],
    difficulty: u32,
) -> Result<String> {
    timed("midstate", || registers.absorb(trytes, config.transfer()))?;
    let status: Status = timed("search", || {
        registers.search(difficulty, config.poll_interval, config.pow_timeout)
    })?;
    if !status.found() {
        return Err(Error::NonceNotFound);
    }
    let found = registers.read_result(lanes)?;
    nonce::assemble(found.nonce, found.mask, lanes, NonceLayout::Fpga)
}

impl<B: Bus + Send, G: Pins + Send> Backend for DirectBus<B, G> {
    fn init(&mut self) -> Result<()> {
        self.ready = false;
        self.bring_up()?;
        self.ready = true;
        Ok(())
    }

    fn search(&mut self, trytes: &[u8], difficulty: u32) -> Result<String> {
        if !self.ready {
            return Err(Error::ConfigurationRequired);
        }
        if self.config.use_shared_lock {
            let mut held =
                reservation::acquire(&mut self.registers, Owner::Controller, self.config.reservation)?;
            run(&mut **held, &self.config, self.lanes, trytes, difficulty)
        } else {
            run(&mut self.registers, &self.config, self.lanes, trytes, difficulty)
        }
    }

    fn name(&self) -> &'static str {
        "direct bus"
    }
}

/// Accelerator behind a framed byte stream.
pub struct FramedSerial<P> {
    device: Device<P>,
    config: Config,
    layout: NonceLayout,
    version: Option<Version>,
    ready: bool,
}

impl<P: Port + Send> FramedSerial<P> {
    pub fn new(port: P, config: Config) -> Self {
        Self::with_layout(port, config, NonceLayout::Fpga)
    }

    /// Accelerator family with a different nonce signature.
    pub fn with_layout(port: P, config: Config, layout: NonceLayout) -> Self {
        let timeouts = config.timeouts();
        Self {
            device: Device::new(port, timeouts),
            config,
            layout,
            version: None,
            ready: false,
        }
    }

    /// Firmware version read by [`Backend::init`].
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn device(&mut self) -> &mut Device<P> {
        &mut self.device
    }

    fn prepare_flash(&mut self, configured: bool) -> Result<()> {
        let image = Image::load(&self.config.image)?;
        if self.config.force_flash || self.device.needs_flash(&image.name, image.len() as u32)? {
            info!("flashing {}", image.name);
            program::flash(&mut self.device, &image, log_progress)?;
        }
        if self.config.force_configure || !configured {
            info!("configuring from flash");
            timed("configuring", || self.device.configure_from_flash())?;
        }
        Ok(())
    }

    fn bring_up(&mut self) -> Result<()> {
        let version = self.device.get_version()?;
        info!("firmware version: {}", version);
        self.version = Some(version);

        let configured = self.device.is_configured()?;
        if self.config.flash {
            self.prepare_flash(configured)?;
        } else if self.config.force_configure || !configured {
            info!("fpga not configured (or configuring forced), uploading");
            let image = Image::load(&self.config.image)?;
            program::upload(&mut self.device, &image, log_progress)?;
        }

        if !self.device.is_configured()? {
            return Err(Error::ConfigurationRequired);
        }
        info!("ready for pow");
        Ok(())
    }
}

impl<P: Port + Send> Backend for FramedSerial<P> {
    fn init(&mut self) -> Result<()> {
        self.ready = false;
        self.bring_up()?;
        self.ready = true;
        Ok(())
    }

    fn search(&mut self, trytes: &[u8], difficulty: u32) -> Result<String> {
        if !self.ready {
            return Err(Error::ConfigurationRequired);
        }
        let result = timed("pow", || self.device.do_pow(trytes, difficulty, self.config.use_crc))?;
        nonce::assemble(result.nonce, result.mask, result.lanes, self.layout)
    }

    fn name(&self) -> &'static str {
        "framed serial"
    }
}
