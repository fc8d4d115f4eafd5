#[cfg(feature = "dump")]
use heapless::{Deque, Vec};
use log::{debug, info, warn};

use crate::{
    codec::{self, Command, Strobe, MAX_COMMAND_SIZE},
    events::Incoming,
    link::Link,
    mirror::Mirror,
    send_buffer::SendBuffer,
    slave::{LoggingHandler, SlaveHandler},
    transport::Transport,
    Config, Error, Response, Result,
};

/// How often the reset opcode is repeated, so a single corrupted byte on the
/// line cannot keep the bridge out of its reset state.
pub const RESET_REPEAT: usize = 5;

#[cfg(feature = "dump")]
pub const HEADER_HISTORY_SIZE: usize = 8;

#[cfg(feature = "dump")]
#[derive(Debug, Clone)]
pub struct StateDump {
    pub mirror: Mirror,
    pub config: Config,
    /// Oldest first.
    pub header_history: Vec<u8, HEADER_HISTORY_SIZE>,
}

/// One open connection to a bridge.
pub struct Device<T: Transport, H: SlaveHandler = LoggingHandler> {
    pub(crate) link: Link<T>,
    pub(crate) mirror: Mirror,
    pub(crate) config: Config,
    pub(crate) handler: H,

    #[cfg(feature = "dump")]
    pub(crate) header_history: Deque<u8, HEADER_HISTORY_SIZE>,
}

impl<T: Transport> Device<T, LoggingHandler> {
    pub fn open(transport: T) -> Result<Self> {
        Self::with_handler(transport, LoggingHandler)
    }
}

#[cfg(unix)]
impl Device<crate::transport::Serial, LoggingHandler> {
    /// Opens a device node that has already been configured as a raw serial line.
    pub fn open_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::open(crate::transport::Serial::open(path)?)
    }
}

impl<T: Transport, H: SlaveHandler> Device<T, H> {
    /// Puts the bridge into its reset state before anything else is sent.
    pub fn with_handler(transport: T, handler: H) -> Result<Self> {
        let mut device = Self {
            link: Link::new(transport),
            mirror: Mirror::new(),
            config: Config::default(),
            handler,
            #[cfg(feature = "dump")]
            header_history: Deque::new(),
        };
        device.reset()?;
        info!("bridge connection open");
        Ok(device)
    }

    pub(crate) fn send<const N: usize>(&mut self, msg: &SendBuffer<N>) -> Result<()> {
        debug!("-> {:02x?}", msg.as_slice());
        self.link.write_all(msg.as_slice())
    }

    fn send_command(&mut self, command: Command) -> Result<()> {
        let mut msg = SendBuffer::<MAX_COMMAND_SIZE>::new();
        command.encode(&mut msg)?;
        self.send(&msg)
    }

    pub fn reset(&mut self) -> Result<()> {
        let mut msg = SendBuffer::<RESET_REPEAT>::new();
        for _ in 0..RESET_REPEAT {
            Command::Reset.encode(&mut msg)?;
        }
        self.send(&msg)?;

        self.mirror.reset();
        self.config = Config::default();
        info!("bridge reset");
        Ok(())
    }

    pub fn configure(&mut self, flags: Config) -> Result<()> {
        self.send_command(Command::Configure(flags))?;
        self.config = flags;
        Ok(())
    }

    /// Cycles the bridge waits on a stalled slave before answering
    /// `stall_timeout`; 0 disables the timeout.
    pub fn set_stall_timeout(&mut self, cycles: u32) -> Result<()> {
        self.send_command(Command::SetTimeout(cycles))
    }

    pub fn set_gpo_bits(&mut self, bits: u32) -> Result<()> {
        self.send_command(Command::SetGpoBits(bits))
    }

    /// Wishbone write of the lanes in `sel`.
    ///
    /// Only registers that differ from the mirror are sent. Blocks for the
    /// bridge's write response if it is configured to send one, and returns
    /// [`Response::Unknown`] otherwise. Slave requests arriving meanwhile are
    /// serviced.
    pub fn write(
        &mut self,
        sel: u8,
        adr: u32,
        dat: u32,
        address_step: i32,
        keep_cycle: bool,
    ) -> Result<Response> {
        let strobe = Strobe::new(address_step, keep_cycle)?;
        check_sel(sel)?;

        let mut msg = SendBuffer::<MAX_COMMAND_SIZE>::new();
        for command in [
            self.mirror.sel_delta(sel),
            self.mirror.dat_delta(sel, dat),
            self.mirror.adr_delta(adr),
            Some(Command::WriteStb(strobe)),
        ]
        .into_iter()
        .flatten()
        {
            command.encode(&mut msg)?;
        }
        self.send(&msg)?;

        self.mirror.commit_strobe(sel, adr, strobe.word_step());
        self.mirror.commit_dat(sel, dat);

        if !self.config.contains(Config::FPGA_SENDS_WRITE_RESPONSE) {
            return Ok(Response::Unknown);
        }

        loop {
            match self.next_incoming()? {
                Incoming::WriteResponse(response) => return Ok(response),
                Incoming::ReadResponse { response, .. } => {
                    warn!("write: expected a write response, got read {}", response);
                }
                Incoming::Serviced => {}
            }
        }
    }

    /// Wishbone read of the lanes in `sel`; unselected lanes read as zero.
    pub fn read(
        &mut self,
        sel: u8,
        adr: u32,
        address_step: i32,
        keep_cycle: bool,
    ) -> Result<(Response, u32)> {
        let strobe = Strobe::new(address_step, keep_cycle)?;
        check_sel(sel)?;

        let mut msg = SendBuffer::<MAX_COMMAND_SIZE>::new();
        for command in [
            self.mirror.sel_delta(sel),
            self.mirror.adr_delta(adr),
            Some(Command::ReadStb(strobe)),
        ]
        .into_iter()
        .flatten()
        {
            command.encode(&mut msg)?;
        }
        self.send(&msg)?;

        self.mirror.commit_strobe(sel, adr, strobe.word_step());

        loop {
            match self.next_incoming()? {
                Incoming::ReadResponse { response, msb } => {
                    let dat = codec::decode_read_data(sel, msb, &mut self.link)?;
                    debug!("read {:#010x}: {} {:#010x}", adr, response, dat);
                    return Ok((response, dat));
                }
                Incoming::WriteResponse(response) => {
                    warn!("read: expected a read response, got write {}", response);
                }
                Incoming::Serviced => {}
            }
        }
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.link.transport_mut()
    }

    pub fn into_transport(self) -> T {
        self.link.into_transport()
    }

    #[cfg(feature = "dump")]
    pub(crate) fn record_header(&mut self, header: u8) {
        if self.header_history.is_full() {
            self.header_history.pop_front();
        }
        let _ = self.header_history.push_back(header);
    }

    #[cfg(feature = "dump")]
    pub fn dump_state(&self) -> StateDump {
        let mut header_history = Vec::new();
        for &header in self.header_history.iter() {
            let _ = header_history.push(header);
        }

        StateDump {
            mirror: self.mirror,
            config: self.config,
            header_history,
        }
    }
}

fn check_sel(sel: u8) -> Result<()> {
    if sel > codec::ALL_LANES {
        return Err(Error::SelectOutOfRange(sel));
    }
    Ok(())
}
