use std::{
    fs::{File, OpenOptions},
    io::{self, Read as _, Write as _},
    os::unix::{fs::OpenOptionsExt as _, io::AsRawFd as _},
    path::Path,
};

use crate::{Error, Port, Result};

/// tenths of a second a read waits for the first byte
const POLL_DECISECONDS: libc::cc_t = 5;

/// Serial or USB-CDC character device in raw mode.
///
/// Reads return after at most 500 ms, with whatever arrived. The baud rate
/// is ignored by USB-CDC devices but still has to be a valid setting.
pub struct Tty {
    file: File,
}

fn speed(baud: u32) -> Result<libc::speed_t> {
    Ok(match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        _ => return Err(Error::Unsupported("baud rate")),
    })
}

fn check(op: &'static str, ret: libc::c_int) -> Result<()> {
    if ret != 0 {
        return Err(Error::Io {
            op,
            source: io::Error::last_os_error(),
        });
    }
    Ok(())
}

impl Tty {
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self> {
        let speed = speed(baud)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(path)
            .map_err(|source| Error::Io { op: "open", source })?;

        let fd = file.as_raw_fd();
        unsafe {
            let mut termios: libc::termios = core::mem::zeroed();
            check("tcgetattr", libc::tcgetattr(fd, &mut termios))?;
            libc::cfmakeraw(&mut termios);
            check("cfsetspeed", libc::cfsetspeed(&mut termios, speed))?;
            termios.c_cflag |= libc::CLOCAL | libc::CREAD;
            termios.c_cc[libc::VMIN] = 0;
            termios.c_cc[libc::VTIME] = POLL_DECISECONDS;
            check("tcsetattr", libc::tcsetattr(fd, libc::TCSANOW, &termios))?;
            check("tcflush", libc::tcflush(fd, libc::TCIOFLUSH))?;
        }

        Ok(Self { file })
    }
}

impl Port for Tty {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.file.read(buf) {
            Ok(n) => Ok(n),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(0)
            }
            Err(source) => Err(Error::Io { op: "read", source }),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .and_then(|()| self.file.flush())
            .map_err(|source| Error::Io { op: "write", source })
    }
}
