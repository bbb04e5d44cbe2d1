use std::path::PathBuf;

use argh::FromArgs;
use fpga::Port;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tritium_pow::{
    device::Version,
    program::{self, Image},
    testing::{random_transaction, zero_transaction, SimDevice},
    timing::always_timed,
    transaction, Backend, Config, Driver, FramedSerial, Pool, Result,
};

#[derive(FromArgs)]
/// Drive a framed proof-of-work accelerator
struct Args {
    /// serial device of the accelerator
    #[argh(option, default = "PathBuf::from(\"/dev/ttyACM0\")")]
    device: PathBuf,

    /// configuration image
    #[argh(option, default = "PathBuf::from(\"pidiver.rbf\")")]
    image: PathBuf,

    /// board keeps the image in flash
    #[argh(switch)]
    flash: bool,

    /// reprogram the flash even if it holds the image
    #[argh(switch)]
    force_flash: bool,

    /// configure even if the FPGA reports being configured
    #[argh(switch)]
    force_configure: bool,

    /// skip the per-block CRC-32 check
    #[argh(switch)]
    no_crc: bool,

    /// use a simulated accelerator
    #[argh(switch)]
    sim: bool,

    /// verbose output
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    subcommand: Subcommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Subcommand {
    Pow(Pow),
    Loopback(Loopback),
    Flash(Flash),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "pow")]
/// Search nonces for generated transactions
struct Pow {
    /// min weight magnitude
    #[argh(option, short = 'm', default = "14")]
    mwm: u32,

    /// number of jobs
    #[argh(option, short = 'n', default = "1")]
    count: usize,

    /// all-9 transaction instead of a random one
    #[argh(switch)]
    zero: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "loopback")]
/// Measure frame round trips
struct Loopback {
    /// number of round trips
    #[argh(option, short = 'n', default = "10")]
    count: usize,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "flash")]
/// Program the image into flash
struct Flash {}

impl Args {
    fn config(&self) -> Config {
        Config {
            device: self.device.clone(),
            image: self.image.clone(),
            flash: self.flash,
            force_flash: self.force_flash,
            force_configure: self.force_configure,
            use_crc: !self.no_crc,
            ..Config::default()
        }
    }
}

fn pow<P: Port + Send + 'static>(backend: FramedSerial<P>, args: &Pow) -> Result<()> {
    let mut driver = Driver::new(backend);
    driver.init()?;
    let pool = Pool::new(vec![driver], 1);
    for job in 0..args.count {
        let trytes = if args.zero {
            zero_transaction()
        } else {
            random_transaction()
        };
        let trytes = String::from_utf8_lossy(&trytes).into_owned();
        let nonce = always_timed(&format!("job {}", job), || pool.submit(&trytes, args.mwm))?;
        let attached = transaction::attach_nonce(&trytes, &nonce)?;
        info!("nonce: {}", nonce);
        info!("tail: {}", &attached[transaction::TAG.start..]);
    }
    pool.shutdown();
    Ok(())
}

fn loopback<P: Port + Send>(mut backend: FramedSerial<P>, args: &Loopback) -> Result<()> {
    backend.init()?;
    let device = backend.device();
    let mut total = 0.0;
    for _ in 0..args.count {
        total += device.loopback()?;
    }
    info!(
        "loopback: {:.1} kB/s",
        total / args.count.max(1) as f64 / 1000.0
    );
    Ok(())
}

fn flash<P: Port + Send>(mut backend: FramedSerial<P>, config: &Config) -> Result<()> {
    let version: Version = backend.device().get_version()?;
    info!("firmware version: {}", version);
    let image = Image::load(&config.image)?;
    let meta = program::flash(backend.device(), &image, |phase, percent| {
        if percent % 10 == 0 {
            info!("{:?} {}%", phase, percent);
        }
    })?;
    info!("flashed {} ({} bytes)", meta.filename(), meta.filesize);
    Ok(())
}

fn run<P: Port + Send + 'static>(backend: FramedSerial<P>, args: &Args, config: &Config) -> Result<()> {
    match &args.subcommand {
        Subcommand::Pow(pow_args) => pow(backend, pow_args),
        Subcommand::Loopback(loopback_args) => loopback(backend, loopback_args),
        Subcommand::Flash(_) => flash(backend, config),
    }
}

#[cfg(unix)]
fn open(config: &Config) -> Result<FramedSerial<fpga::Tty>> {
    Ok(Driver::open(config.clone())?.into_backend())
}

#[cfg(not(unix))]
fn open(_: &Config) -> Result<FramedSerial<fpga::Null>> {
    Err(tritium_pow::Error::Bus {
        op: "open serial device",
        source: fpga::Error::Unsupported("serial devices"),
    })
}

fn main() {
    let args: Args = argh::from_env();

    let default_filter = if args.verbose {
        "tritium_pow=debug"
    } else {
        "tritium_pow=info"
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.config();
    let result = if args.sim {
        let backend = FramedSerial::new(SimDevice::configured(), config.clone());
        info!("using {}", backend.name());
        run(backend, &args, &config)
    } else {
        open(&config).and_then(|backend| run(backend, &args, &config))
    };

    if let Err(err) = result {
        error!("{}", err);
        std::process::exit(1);
    }
}
