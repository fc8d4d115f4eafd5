use std::time::Duration;

use log::{debug, warn};

use crate::{
    bridge::Device,
    codec::{self, Command, Header},
    send_buffer::SendBuffer,
    slave::SlaveHandler,
    transport::{Readiness, Transport},
    Config, Error, Response, Result,
};

/// `set_dat` with all four lanes plus the response byte.
const READ_REPLY_SIZE: usize = 6;

/// Outcome of reading one header from the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Incoming {
    /// A slave request was decoded and answered.
    Serviced,
    WriteResponse(Response),
    /// The data payload is still unread.
    ReadResponse { response: Response, msb: u8 },
}

impl<T: Transport, H: SlaveHandler> Device<T, H> {
    fn read_header(&mut self) -> Result<Header> {
        loop {
            let byte = self.link.read_one()?;
            if !codec::is_header(byte) {
                warn!("skipping unexpected non-header byte {:#04x}", byte);
                continue;
            }

            #[cfg(feature = "dump")]
            self.record_header(byte);

            return Header::try_from(byte);
        }
    }

    /// Reads and classifies one header, servicing it if it is a slave request.
    pub(crate) fn next_incoming(&mut self) -> Result<Incoming> {
        match self.read_header()? {
            Header::WriteResponse(response) => Ok(Incoming::WriteResponse(response)),
            Header::ReadResponse { response, msb } => Ok(Incoming::ReadResponse { response, msb }),
            Header::WriteRequest { sel, respond } => {
                self.service_slave_write(sel, respond)?;
                Ok(Incoming::Serviced)
            }
            Header::ReadRequest { sel } => {
                self.service_slave_read(sel)?;
                Ok(Incoming::Serviced)
            }
        }
    }

    fn service_slave_write(&mut self, sel: u8, respond: bool) -> Result<()> {
        let (adr, dat) = codec::decode_write_request(sel, &mut self.link)?;
        debug!(
            "slave write request: sel={:#x} adr={:#010x} dat={:#010x}",
            sel, adr, dat
        );

        let response = self.handler.on_slave_write(sel, adr, dat);

        if respond && self.config.contains(Config::HOST_SENDS_WRITE_RESPONSE) {
            let mut msg = SendBuffer::<1>::new();
            Command::Respond(response).encode(&mut msg)?;
            self.send(&msg)?;
        }
        Ok(())
    }

    /// The reply loads only the data lanes the bridge does not already hold,
    /// then terminates the slave cycle with the handler's response.
    fn service_slave_read(&mut self, sel: u8) -> Result<()> {
        let adr = codec::decode_read_request(&mut self.link)?;
        debug!("slave read request: sel={:#x} adr={:#010x}", sel, adr);

        let (response, dat) = self.handler.on_slave_read(sel, adr);

        let mut msg = SendBuffer::<READ_REPLY_SIZE>::new();
        if let Some(command) = self.mirror.dat_delta(sel, dat) {
            command.encode(&mut msg)?;
        }
        Command::Respond(response).encode(&mut msg)?;
        self.send(&msg)?;

        self.mirror.commit_dat(sel, dat);
        Ok(())
    }

    /// Services at most one slave request.
    ///
    /// Returns `false` if nothing arrived within `timeout` (`None` waits
    /// forever). A response header here means the bridge answered a
    /// transaction nobody is waiting for, which fails with
    /// [`Error::UnexpectedResponse`].
    pub fn wait_single(&mut self, timeout: Option<Duration>) -> Result<bool> {
        match self.link.poll_readable(timeout)? {
            Readiness::Timeout => Ok(false),
            Readiness::HangUp => Err(Error::HangUp),
            Readiness::Readable => match self.next_incoming()? {
                Incoming::Serviced => Ok(true),
                Incoming::WriteResponse(response) | Incoming::ReadResponse { response, .. } => {
                    Err(Error::UnexpectedResponse(response))
                }
            },
        }
    }

    /// Waits up to `timeout` for a slave request, then drains every request
    /// already queued behind it without blocking. Returns how many were
    /// serviced.
    ///
    /// Only the first wait can fail. An error while draining ends the drain
    /// and is logged; the count so far is still returned.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<usize> {
        if !self.wait_single(timeout)? {
            return Ok(0);
        }

        let mut serviced = 1;
        loop {
            match self.wait_single(Some(Duration::ZERO)) {
                Ok(true) => serviced += 1,
                Ok(false) => break,
                Err(err) => {
                    warn!("stopped draining after {} requests: {}", serviced, err);
                    break;
                }
            }
        }
        Ok(serviced)
    }
}
