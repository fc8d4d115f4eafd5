use std::io;

/// Fill-then-drain byte buffer: one `fill` replaces the whole content, `take`
/// hands the bytes out in order until the buffer is drained again.
pub struct ReceiveBuffer<const BUFSIZE: usize> {
    buf: [u8; BUFSIZE],
    pos: usize,
    size: usize,
}

impl<const BUFSIZE: usize> ReceiveBuffer<BUFSIZE> {
    pub const fn new() -> Self {
        Self {
            buf: [0; BUFSIZE],
            pos: 0,
            size: 0,
        }
    }

    /// Refills the buffer with a single call to `read`. Only valid once drained.
    pub fn fill<F>(&mut self, read: F) -> io::Result<usize>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        debug_assert!(self.is_empty(), "Receive buffer must be drained before a refill");

        self.pos = 0;
        self.size = 0;

        let n = read(&mut self.buf)?.min(BUFSIZE);
        self.size = n;
        Ok(n)
    }

    pub fn take(&mut self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            self.pos += 1;
            Some(self.buf[self.pos - 1])
        }
    }

    pub fn remaining(&self) -> usize {
        self.size - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.size
    }

    pub fn peek(&self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            Some(self.buf[self.pos])
        }
    }
}

impl<const BUFSIZE: usize> Default for ReceiveBuffer<BUFSIZE> {
    fn default() -> Self {
        Self::new()
    }
}
