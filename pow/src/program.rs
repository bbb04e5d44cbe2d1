//! Getting a configuration image onto the accelerator.
//!
//! Boards with flash keep the image across power cycles: the flash is
//! erased, written page by page, read back, and finally tagged with a
//! [`Meta`] page. Boards without flash get the image streamed straight into
//! the configuration logic on every start.

use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use fpga::Port;
use tracing::{debug, info};

use crate::{
    device::{Device, Meta, FLASH_SIZE, META_PAGE, PAGE_SIZE},
    error::{Error, Fault, Result},
    framed::MAX_PAYLOAD,
    timing::timed,
};

/// Largest image that fits in front of the meta page.
pub const MAX_FLASH_IMAGE: usize = META_PAGE as usize * PAGE_SIZE;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Flashing,
    Verifying,
    Configuring,
}

/// Configuration image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    /// recorded in the meta page
    pub name: String,
    pub data: Vec<u8>,
}

impl Image {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| Error::Io {
            path: PathBuf::from(path),
            source,
        })?;
        debug!("read {} bytes from {:?}", data.len(), path);
        Ok(Self::new(path.to_string_lossy(), data))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Reports each whole percent once.
struct Percent<F> {
    phase: Phase,
    total: usize,
    last: Option<u8>,
    report: F,
}

impl<F: FnMut(Phase, u8)> Percent<F> {
    fn new(phase: Phase, total: usize, report: F) -> Self {
        Self {
            phase,
            total,
            last: None,
            report,
        }
    }

    fn update(&mut self, done: usize) {
        let percent = (done * 100 / self.total.max(1)).min(100) as u8;
        if self.last != Some(percent) {
            self.last = Some(percent);
            debug!("{:?} {}%", self.phase, percent);
            (self.report)(self.phase, percent);
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Erase, write, and verify the flash, then tag it with a meta page.
///
/// Any mismatch leaves the flash in an unknown state; it must be programmed
/// again from the start.
pub fn flash<P: Port>(
    device: &mut Device<P>,
    image: &Image,
    mut progress: impl FnMut(Phase, u8),
) -> Result<Meta> {
    if image.len() > MAX_FLASH_IMAGE {
        return Err(Fault::ImageTooLarge {
            size: image.len(),
            max: MAX_FLASH_IMAGE,
        }
        .into());
    }

    let mut data = image.data.clone();
    data.resize((data.len() + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE, 0);
    let pages = data.len() / PAGE_SIZE;

    info!("erasing flash");
    device.flash_erase()?;

    info!("flashing {} pages", pages);
    timed("flashing", || -> Result<()> {
        let mut percent = Percent::new(Phase::Flashing, pages, &mut progress);
        for (page, chunk) in data.chunks(PAGE_SIZE).enumerate() {
            percent.update(page);
            device.write_page_number(page as u32, chunk)?;
        }
        percent.update(pages);
        Ok(())
    })?;

    info!("verifying flash");
    timed("verifying", || -> Result<()> {
        let mut percent = Percent::new(Phase::Verifying, pages, &mut progress);
        for (page, chunk) in data.chunks(PAGE_SIZE).enumerate() {
            percent.update(page);
            device.verify_page(page as u32, chunk)?;
        }
        percent.update(pages);
        Ok(())
    })?;

    let meta = Meta::new(now_ms(), &image.name, image.len() as u32);
    info!("writing meta page");
    device.write_meta(&meta)?;
    if device.read_meta()? != meta {
        return Err(Fault::MetaMismatch.into());
    }
    info!("flashed {} ({} bytes)", meta.filename(), meta.filesize);
    Ok(meta)
}

/// Stream an image into the configuration logic.
pub fn upload<P: Port>(
    device: &mut Device<P>,
    image: &Image,
    progress: impl FnMut(Phase, u8),
) -> Result<()> {
    if image.len() > FLASH_SIZE {
        return Err(Fault::ImageTooLarge {
            size: image.len(),
            max: FLASH_SIZE,
        }
        .into());
    }

    info!("configuring from {} ({} bytes)", image.name, image.len());
    device.configure_start()?;
    let mut percent = Percent::new(Phase::Configuring, image.len(), progress);
    let mut offset = 0;
    timed("configuring", || -> Result<()> {
        for chunk in image.data.chunks(MAX_PAYLOAD) {
            percent.update(offset);
            device.configure_block(chunk)?;
            offset += chunk.len();
        }
        Ok(())
    })?;
    percent.update(offset);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::Timeouts, testing::SimDevice};

    fn image(len: usize) -> Image {
        Image::new("test.rbf", (0..len).map(|i| (i * 7 + 3) as u8).collect())
    }

    #[test]
    fn flash_programs_and_tags() {
        let mut device = Device::new(SimDevice::new(), Timeouts::default());
        let image = image(3 * PAGE_SIZE + 17);
        let mut reports = Vec::new();
        let meta = flash(&mut device, &image, |phase, percent| reports.push((phase, percent))).unwrap();

        assert_eq!(meta.filesize as usize, image.len());
        assert_eq!(device.read_meta().unwrap(), meta);
        assert!(!device.needs_flash("test.rbf", image.len() as u32).unwrap());

        let sim = device.port();
        assert_eq!(&sim.flash()[..image.len()], &image.data[..]);
        assert!(sim.flash()[image.len()..4 * PAGE_SIZE].iter().all(|&b| b == 0));

        assert_eq!(reports.first(), Some(&(Phase::Flashing, 0)));
        assert!(reports.contains(&(Phase::Flashing, 100)));
        assert_eq!(reports.last(), Some(&(Phase::Verifying, 100)));
    }

    #[test]
    fn flash_rejects_oversized_images() {
        let mut device = Device::new(SimDevice::new(), Timeouts::default());
        match flash(&mut device, &image(MAX_FLASH_IMAGE + 1), |_, _| {}) {
            Err(Error::HardwareFault(Fault::ImageTooLarge { max, .. })) => {
                assert_eq!(max, MAX_FLASH_IMAGE)
            }
            other => panic!("unexpected {:?}", other.map(|meta| meta.filesize)),
        }
        assert_eq!(device.port().erases(), 0);
    }

    #[test]
    fn flash_verify_failure_is_fatal() {
        let mut device = Device::new(SimDevice::new(), Timeouts::default());
        device.port().corrupt(2 * PAGE_SIZE + 5);
        assert!(matches!(
            flash(&mut device, &image(4 * PAGE_SIZE), |_, _| {}),
            Err(Error::HardwareFault(Fault::VerifyMismatch(2)))
        ));
        assert!(device.read_meta().unwrap().is_empty());
    }

    #[test]
    fn upload_streams_chunks() {
        let mut device = Device::new(SimDevice::new(), Timeouts::default());
        let image = image(2 * MAX_PAYLOAD + 100);
        let mut last = 0;
        upload(&mut device, &image, |_, percent| last = percent).unwrap();
        assert_eq!(last, 100);

        let sim = device.port();
        assert_eq!(sim.configured_image(), &image.data[..]);
        assert!(sim.is_configured());
    }

    #[test]
    fn missing_image_file() {
        match Image::load("/nonexistent/image.rbf") {
            Err(Error::Io { path, .. }) => assert_eq!(path, PathBuf::from("/nonexistent/image.rbf")),
            other => panic!("unexpected {:?}", other.map(|image| image.len())),
        }
    }
}
