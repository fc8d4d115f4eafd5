#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use uart_wbp::codec::{self, MAX_FRAME_SIZE};
use uart_wbp::{Readiness, Response, SendBuffer, SlaveHandler, Transport};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const HOST_SENDS_WRITE_RESPONSE: u8 = 1;
const FPGA_SENDS_WRITE_RESPONSE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// The bridge's own master strobe, wired back to its slave port.
    Loopback,
    /// An agent on the Wishbone side that is not the host.
    External,
}

#[derive(Debug, Clone, Copy)]
enum Awaiting {
    SlaveWrite(Origin),
    SlaveRead { sel: u8, origin: Origin },
}

#[derive(Debug, Clone, Copy)]
struct LoadLanes {
    opcode: u8,
    mask: u8,
    next: usize,
    value: u32,
}

/// In-memory bridge with its master port looped back to its slave port, so
/// every host write or read comes back to the host as a slave request.
///
/// Host commands are parsed byte by byte the way the FPGA does it, and every
/// byte is recorded in both directions.
pub struct SimBridge {
    pub sent: Vec<u8>,
    pub received: Vec<u8>,
    outbox: VecDeque<u8>,
    loading: Option<LoadLanes>,
    awaiting: Option<Awaiting>,

    pub sel: u8,
    pub adr: u32,
    pub dat: u32,
    pub config: u8,
    pub stall_timeout: u32,
    pub gpo: u32,
    pub resets: usize,

    /// Results the host gave to external requests, in order.
    pub external_writes: Vec<Response>,
    pub external_reads: Vec<(Response, u32)>,

    pub hang_up: bool,
    /// Upper bound on bytes handed out per read call.
    pub chunk: usize,
    /// Bytes accepted per write call.
    pub accept: usize,
}

impl SimBridge {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            received: Vec::new(),
            outbox: VecDeque::new(),
            loading: None,
            awaiting: None,
            sel: 0,
            adr: 0,
            dat: 0,
            config: HOST_SENDS_WRITE_RESPONSE | FPGA_SENDS_WRITE_RESPONSE,
            stall_timeout: 0,
            gpo: 0,
            resets: 0,
            external_writes: Vec::new(),
            external_reads: Vec::new(),
            hang_up: false,
            chunk: usize::MAX,
            accept: usize::MAX,
        }
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    pub fn emit(&mut self, bytes: &[u8]) {
        self.outbox.extend(bytes.iter().copied());
        self.received.extend_from_slice(bytes);
    }

    fn emit_frame(&mut self, frame: &SendBuffer<MAX_FRAME_SIZE>) {
        let bytes = frame.as_slice().to_vec();
        self.emit(&bytes);
    }

    /// An external agent writes the slave port.
    pub fn external_write(&mut self, sel: u8, adr: u32, dat: u32, respond: bool) {
        let mut frame = SendBuffer::new();
        codec::encode_write_request(sel, adr, dat, respond, &mut frame).unwrap();
        self.emit_frame(&frame);
        if respond {
            self.awaiting = Some(Awaiting::SlaveWrite(Origin::External));
        }
    }

    /// An external agent reads the slave port.
    pub fn external_read(&mut self, sel: u8, adr: u32) {
        let mut frame = SendBuffer::new();
        codec::encode_read_request(sel, adr, &mut frame).unwrap();
        self.emit_frame(&frame);
        self.awaiting = Some(Awaiting::SlaveRead {
            sel,
            origin: Origin::External,
        });
    }

    fn feed(&mut self, byte: u8) {
        if let Some(mut load) = self.loading.take() {
            let lane = codec::lanes(load.mask).nth(load.next).unwrap();
            load.value = (load.value & !(0xff << (8 * lane))) | (u32::from(byte) << (8 * lane));
            load.next += 1;
            if load.next == codec::lanes(load.mask).count() {
                self.finish_load(load);
            } else {
                self.loading = Some(load);
            }
            return;
        }

        let opcode = byte & 0x0f;
        let flags = byte >> 4;
        match opcode {
            0 => self.config = flags,
            1 => self.sel = flags,
            2 | 3 | 6 | 10 => {
                assert_ne!(flags, 0, "register load without lanes: {byte:#04x}");
                let value = match opcode {
                    2 => self.dat,
                    3 => self.adr,
                    _ => 0,
                };
                self.loading = Some(LoadLanes {
                    opcode,
                    mask: flags,
                    next: 0,
                    value,
                });
            }
            4 => self.write_strobe(flags),
            5 => self.read_strobe(flags),
            7 => self.respond(Response::Ack),
            8 => self.respond(Response::Err),
            9 => self.respond(Response::Rty),
            11 => {
                self.sel = 0;
                self.adr = 0;
                self.dat = 0;
                self.config = HOST_SENDS_WRITE_RESPONSE | FPGA_SENDS_WRITE_RESPONSE;
                self.awaiting = None;
                self.resets += 1;
            }
            _ => panic!("bridge got unknown command byte {byte:#04x}"),
        }
    }

    fn finish_load(&mut self, load: LoadLanes) {
        match load.opcode {
            2 => self.dat = load.value,
            3 => self.adr = load.value,
            6 => self.stall_timeout = load.value,
            10 => self.gpo = load.value,
            _ => unreachable!(),
        }
    }

    fn step_address(&mut self, flags: u8) {
        // sign-extend the 3-bit word step
        let step = ((flags << 5) as i8) >> 5;
        self.adr = self.adr.wrapping_add((i32::from(step) * 4) as u32);
    }

    fn write_strobe(&mut self, flags: u8) {
        assert!(self.awaiting.is_none(), "write strobe while a slave cycle is open");
        let mut frame = SendBuffer::new();
        codec::encode_write_request(self.sel, self.adr, self.dat, true, &mut frame).unwrap();
        self.emit_frame(&frame);
        self.step_address(flags);

        if self.config & HOST_SENDS_WRITE_RESPONSE != 0 {
            self.awaiting = Some(Awaiting::SlaveWrite(Origin::Loopback));
        } else {
            self.complete_write(Response::Ack, Origin::Loopback);
        }
    }

    fn read_strobe(&mut self, flags: u8) {
        assert!(self.awaiting.is_none(), "read strobe while a slave cycle is open");
        let mut frame = SendBuffer::new();
        codec::encode_read_request(self.sel, self.adr, &mut frame).unwrap();
        self.emit_frame(&frame);
        self.awaiting = Some(Awaiting::SlaveRead {
            sel: self.sel,
            origin: Origin::Loopback,
        });
        self.step_address(flags);
    }

    fn complete_write(&mut self, response: Response, origin: Origin) {
        match origin {
            Origin::Loopback => {
                if self.config & FPGA_SENDS_WRITE_RESPONSE != 0 {
                    self.emit(&[codec::write_response_header(response)]);
                }
            }
            Origin::External => self.external_writes.push(response),
        }
    }

    fn respond(&mut self, response: Response) {
        match self.awaiting.take() {
            Some(Awaiting::SlaveWrite(origin)) => self.complete_write(response, origin),
            Some(Awaiting::SlaveRead { sel, origin }) => {
                let dat = self.dat & codec::lane_mask(sel);
                match origin {
                    Origin::Loopback => {
                        let mut frame = SendBuffer::new();
                        codec::encode_read_response(response, sel, dat, &mut frame).unwrap();
                        self.emit_frame(&frame);
                    }
                    Origin::External => self.external_reads.push((response, dat)),
                }
            }
            None => panic!("host sent a {response} response with no slave cycle open"),
        }
    }
}

impl Transport for SimBridge {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let n = bytes.len().min(self.accept);
        for &b in &bytes[..n] {
            self.sent.push(b);
            self.feed(b);
        }
        Ok(n)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk).min(self.outbox.len());
        for slot in &mut buf[..n] {
            *slot = self.outbox.pop_front().unwrap();
        }
        Ok(n)
    }

    fn poll(&mut self, _timeout: Option<Duration>) -> io::Result<Readiness> {
        Ok(if self.hang_up {
            Readiness::HangUp
        } else if self.outbox.is_empty() {
            Readiness::Timeout
        } else {
            Readiness::Readable
        })
    }
}

/// Backs the slave port with a word-addressed memory, lane by lane.
#[derive(Debug, Default)]
pub struct Memory {
    pub words: std::collections::HashMap<u32, u32>,
    pub write_response: Option<Response>,
    pub read_response: Option<Response>,
}

impl SlaveHandler for Memory {
    fn on_slave_write(&mut self, sel: u8, adr: u32, dat: u32) -> Response {
        let mask = codec::lane_mask(sel);
        let word = self.words.entry(adr).or_insert(0);
        *word = (*word & !mask) | (dat & mask);
        self.write_response.unwrap_or(Response::Ack)
    }

    fn on_slave_read(&mut self, sel: u8, adr: u32) -> (Response, u32) {
        let word = self.words.get(&adr).copied().unwrap_or(0);
        (
            self.read_response.unwrap_or(Response::Ack),
            word & codec::lane_mask(sel),
        )
    }
}

/// Checks each request against what the test expects to arrive next.
#[derive(Debug, Default)]
pub struct Expect {
    pub sel: u8,
    pub adr: u32,
    pub dat: u32,
    pub response: Option<Response>,
    pub writes: usize,
    pub reads: usize,
}

impl Expect {
    pub fn set(&mut self, sel: u8, adr: u32, dat: u32, response: Response) {
        self.sel = sel;
        self.adr = adr;
        self.dat = dat;
        self.response = Some(response);
    }
}

impl SlaveHandler for Expect {
    fn on_slave_write(&mut self, sel: u8, adr: u32, dat: u32) -> Response {
        let mask = codec::lane_mask(sel);
        assert_eq!(sel, self.sel);
        assert_eq!(adr, self.adr);
        assert_eq!(dat & mask, self.dat & mask);
        self.writes += 1;
        self.response.unwrap()
    }

    fn on_slave_read(&mut self, sel: u8, adr: u32) -> (Response, u32) {
        assert_eq!(sel, self.sel);
        assert_eq!(adr, self.adr);
        self.reads += 1;
        (self.response.unwrap(), self.dat)
    }
}
