use tritium_pow::{
    device::{Device, Timeouts, META_PAGE, PAGE_SIZE},
    error::{Checksum, Violation},
    framed::{Frame, Opcode, Transport},
    program::{self, Image},
    testing::SimDevice,
    Error,
};

/// Answers every request with a canned byte sequence.
struct Canned(Vec<u8>);

impl fpga::Port for Canned {
    fn read(&mut self, buf: &mut [u8]) -> fpga::Result<usize> {
        let n = buf.len().min(self.0.len());
        buf[..n].copy_from_slice(&self.0[..n]);
        self.0.drain(..n);
        Ok(n)
    }

    fn write_all(&mut self, _: &[u8]) -> fpga::Result<()> {
        Ok(())
    }
}

fn timeout() -> std::time::Duration {
    std::time::Duration::from_millis(50)
}

#[test]
fn fault_byte_aborts_the_request() {
    let mut transport = Transport::new(Canned(vec![b'X']));
    assert!(matches!(
        transport.request(Opcode::GetVersion, &[0], timeout()),
        Err(Error::ProtocolViolation(Violation::DeviceFault))
    ));
}

#[test]
fn response_must_echo_the_request() {
    let reply = Frame::new(2, Opcode::GetVersion as u8, vec![0; 8]).unwrap();
    let mut transport = Transport::new(Canned(reply.encode()));
    assert!(matches!(
        transport.request(Opcode::GetVersion, &[0], timeout()),
        Err(Error::ProtocolViolation(Violation::IdMismatch { sent: 1, got: 2 }))
    ));

    let reply = Frame::new(1, Opcode::ReadStatus as u8, vec![1]).unwrap();
    let mut transport = Transport::new(Canned(reply.encode()));
    assert!(matches!(
        transport.request(Opcode::GetVersion, &[0], timeout()),
        Err(Error::ProtocolViolation(Violation::OpcodeMismatch { .. }))
    ));
}

#[test]
fn corrupted_response_is_a_checksum_error() {
    let mut bytes = Frame::new(1, Opcode::ReadStatus as u8, vec![1]).unwrap().encode();
    bytes[2] ^= 1;
    let mut transport = Transport::new(Canned(bytes));
    assert!(matches!(
        transport.request(Opcode::ReadStatus, &[0], timeout()),
        Err(Error::ChecksumMismatch {
            kind: Checksum::Crc8,
            ..
        })
    ));
}

#[test]
fn truncated_response_times_out() {
    let bytes = Frame::new(1, Opcode::ReadPage as u8, vec![7; PAGE_SIZE]).unwrap().encode();
    let mut transport = Transport::new(Canned(bytes[..100].to_vec()));
    assert!(matches!(
        transport.request(Opcode::ReadPage, &[0; PAGE_SIZE], timeout()),
        Err(Error::TransportTimeout { op: "read page", .. })
    ));
}

#[test]
fn flash_then_reuse_the_meta_page() {
    let image = Image::new("pidiver.rbf", (0..5000).map(|i| (i % 251) as u8).collect());
    let mut device = Device::new(SimDevice::new(), Timeouts::default());
    let meta = program::flash(&mut device, &image, |_, _| {}).unwrap();
    assert_eq!(meta.filename(), "pidiver.rbf");

    let flash = device.port().flash().to_vec();
    assert_eq!(flash[..5000], image.data[..]);
    let meta_page = &flash[META_PAGE as usize * PAGE_SIZE..];
    assert_eq!(meta_page[40..44], 5000u32.to_le_bytes());

    let mut rebooted = Device::new(SimDevice::with_flash(flash), Timeouts::default());
    assert!(!rebooted.needs_flash("pidiver.rbf", 5000).unwrap());
    assert!(rebooted.needs_flash("other.rbf", 5000).unwrap());
    rebooted.configure_from_flash().unwrap();
    assert!(rebooted.is_configured().unwrap());
}
