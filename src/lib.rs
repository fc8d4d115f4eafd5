//! Host side of the WBP protocol: Wishbone register access over a serial link
//! to an FPGA bridge, with delta-compressed commands and servicing of
//! bridge-initiated slave requests.

mod bridge;
pub mod codec;
mod events;
mod link;
mod mirror;
mod receive_buffer;
mod send_buffer;
mod slave;
mod transport;

use core::fmt;
use std::io;

pub use bridge::{Device, RESET_REPEAT};
pub use link::{Link, READ_BUFFER_SIZE};
pub use mirror::Mirror;
pub use receive_buffer::ReceiveBuffer;
pub use send_buffer::SendBuffer;
pub use slave::{ChannelHandler, FnHandler, LoggingHandler, SlaveHandler, SlaveRequest};
pub use transport::{Readiness, Transport};

#[cfg(unix)]
pub use transport::Serial;

#[cfg(feature = "dump")]
pub use bridge::StateDump;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Response {
    Ack = 1,
    Err = 2,
    Rty = 3,
    StallTimeout = 4,
    /// Returned by writes while the bridge is configured not to acknowledge them.
    Unknown = 8,
}

impl Response {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Response::Ack),
            2 => Some(Response::Err),
            3 => Some(Response::Rty),
            4 => Some(Response::StallTimeout),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Response::Ack => "ack",
            Response::Err => "err",
            Response::Rty => "rty",
            Response::StallTimeout => "stall_timeout",
            Response::Unknown => "unknown (response deactivated)",
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Config: u8 {
        /// The host answers every slave write request with a response byte.
        const HOST_SENDS_WRITE_RESPONSE = 1;
        /// The bridge answers every host write with a write response header.
        const FPGA_SENDS_WRITE_RESPONSE = 2;
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::HOST_SENDS_WRITE_RESPONSE | Config::FPGA_SENDS_WRITE_RESPONSE
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("short write: {written} of {expected} bytes accepted")]
    ShortWrite { written: usize, expected: usize },
    #[error("device closed the stream")]
    Closed,
    #[error("device hung up")]
    HangUp,
    #[error("address step {0} is out of bounds [-16, 12]")]
    AddressStepOutOfRange(i32),
    #[error("select mask {0:#x} does not fit in 4 bits")]
    SelectOutOfRange(u8),
    #[error("unclassifiable header byte {0:#04x}")]
    UnknownHeader(u8),
    #[error("unexpected {0} response outside of a transaction")]
    UnexpectedResponse(Response),
    #[error("message does not fit in its buffer")]
    BufferFull,
}
