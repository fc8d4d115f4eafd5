use std::io;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Timeout,
    HangUp,
}

/// Byte channel to the bridge. Implementations must not translate or buffer
/// bytes; the link above does its own batching.
pub trait Transport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// `None` waits forever.
    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Readiness>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        (**self).write(bytes)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Readiness> {
        (**self).poll(timeout)
    }
}

#[cfg(unix)]
pub use self::serial::Serial;

#[cfg(unix)]
mod serial {
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;
    use std::time::Duration;

    use super::{Readiness, Transport};

    /// A character device that has already been put into raw mode.
    pub struct Serial {
        file: File,
    }

    impl Serial {
        pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            Ok(Self::from_file(file))
        }

        pub fn from_file(file: File) -> Self {
            Self { file }
        }
    }

    fn timeout_millis(timeout: Option<Duration>) -> libc::c_int {
        match timeout {
            None => -1,
            Some(t) => t.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
        }
    }

    impl Transport for Serial {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            self.file.write(bytes)
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.file.read(buf)
        }

        fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Readiness> {
            let mut pfd = libc::pollfd {
                fd: self.file.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };

            let result = unsafe { libc::poll(&mut pfd, 1, timeout_millis(timeout)) };
            if result < 0 {
                return Err(io::Error::last_os_error());
            }
            if result == 0 {
                return Ok(Readiness::Timeout);
            }

            if pfd.revents & libc::POLLHUP != 0 {
                Ok(Readiness::HangUp)
            } else if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    "poll reported an error condition on the device",
                ))
            } else if pfd.revents & libc::POLLIN != 0 {
                Ok(Readiness::Readable)
            } else {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    "cannot read from file descriptor",
                ))
            }
        }
    }

}
