use heapless::Vec;

use crate::{Error, Result};

/// Fixed-capacity assembly buffer for one outgoing message.
pub struct SendBuffer<const BUFSIZE: usize> {
    buf: Vec<u8, BUFSIZE>,
}

impl<const BUFSIZE: usize> SendBuffer<BUFSIZE> {
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn push(&mut self, byte: u8) -> Result<()> {
        self.buf.push(byte).map_err(|_| Error::BufferFull)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

impl<const BUFSIZE: usize> Default for SendBuffer<BUFSIZE> {
    fn default() -> Self {
        Self::new()
    }
}
