use std::time::Duration;

use log::{trace, warn};

use crate::codec::{self, ByteSource};
use crate::receive_buffer::ReceiveBuffer;
use crate::transport::{Readiness, Transport};
use crate::{Error, Result};

pub const READ_BUFFER_SIZE: usize = 256;

/// A transport plus the read buffer that batches incoming bytes.
pub struct Link<T: Transport> {
    transport: T,
    receive_buffer: ReceiveBuffer<READ_BUFFER_SIZE>,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            receive_buffer: ReceiveBuffer::default(),
        }
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let written = self.transport.write(bytes)?;
        if written != bytes.len() {
            return Err(Error::ShortWrite {
                written,
                expected: bytes.len(),
            });
        }
        Ok(())
    }

    pub fn read_one(&mut self) -> Result<u8> {
        if self.receive_buffer.is_empty() {
            let transport = &mut self.transport;
            let n = self.receive_buffer.fill(|buf| transport.read(buf))?;
            trace!("refilled read buffer with {} bytes", n);
            if n == 0 {
                return Err(Error::Closed);
            }
        }

        self.receive_buffer.take().ok_or(Error::Closed)
    }

    /// A buffered header byte counts as readable. Payload bytes left in the
    /// buffer ahead of it are noise and are dropped here, so the transport is
    /// polled with the caller's timeout whenever no header is buffered.
    pub fn poll_readable(&mut self, timeout: Option<Duration>) -> Result<Readiness> {
        while let Some(byte) = self.receive_buffer.peek() {
            if codec::is_header(byte) {
                return Ok(Readiness::Readable);
            }
            warn!("skipping unexpected non-header byte {:#04x}", byte);
            self.receive_buffer.take();
        }
        Ok(self.transport.poll(timeout)?)
    }

    pub fn buffered(&self) -> usize {
        self.receive_buffer.remaining()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl<T: Transport> ByteSource for Link<T> {
    fn next_byte(&mut self) -> Result<u8> {
        self.read_one()
    }
}
