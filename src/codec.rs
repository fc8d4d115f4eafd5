//! Wire vocabulary of the WBP protocol.
//!
//! Host to bridge, every command starts with a byte carrying a 4-bit opcode in
//! its low nibble and 4 inline flag bits in its high nibble, followed by one
//! raw byte per flagged lane for the register-loading commands.
//!
//! Bridge to host, the stream is self-framing: header bytes have bit 7 set and
//! payload bytes have it clear. Data bytes therefore lose their top bit on the
//! wire; it travels in a per-lane flag nibble in front of the payload and is
//! merged back on decode. Addresses are sent as word addresses in 6-bit
//! groups, least significant first, with bit 6 of each byte flagging that
//! another group follows.

use core::slice;

use crate::send_buffer::SendBuffer;
use crate::{Config, Error, Response, Result};

pub const HEADER_MARK: u8 = 0x80;
pub const PAYLOAD_MASK: u8 = 0x7f;
pub const CONTINUE: u8 = 0x40;
pub const ALL_LANES: u8 = 0x0f;

/// Largest host message: set_sel, set_dat with 4 lanes, set_adr with 4 lanes
/// and the strobe.
pub const MAX_COMMAND_SIZE: usize = 12;
/// Largest bridge frame: a write request with a full address and 4 data lanes.
pub const MAX_FRAME_SIZE: usize = 16;

const GROUP_BITS: u32 = 6;
const GROUP_MASK: u8 = 0x3f;
/// Address bits 0 and 1 select a byte inside a word and are never sent.
const WORD_SHIFT: u32 = 2;
const WRITE_REQUEST_FIRST_GROUP: u32 = 2;
const READ_REQUEST_FIRST_GROUP: u32 = 6;

pub fn is_header(byte: u8) -> bool {
    byte & HEADER_MARK != 0
}

pub fn lane(word: u32, index: usize) -> u8 {
    (word >> (8 * index)) as u8
}

pub fn lanes(mask: u8) -> impl Iterator<Item = usize> {
    (0..4).filter(move |&i| mask & (1u8 << i) != 0)
}

/// Byte mask of the lanes in `sel`, e.g. `0b0101` gives `0x00ff_00ff`.
pub fn lane_mask(sel: u8) -> u32 {
    lanes(sel).fold(0, |mask, i| mask | (0xffu32 << (8 * i)))
}

pub fn changed_lanes(a: u32, b: u32) -> u8 {
    (0..4)
        .filter(|&i| lane(a, i) != lane(b, i))
        .fold(0, |mask, i| mask | (1u8 << i))
}

fn msb_flags(sel: u8, dat: u32) -> u8 {
    lanes(sel)
        .filter(|&i| is_header(lane(dat, i)))
        .fold(0, |flags, i| flags | (1u8 << i))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Config = 0,
    SetSel = 1,
    SetDat = 2,
    SetAdr = 3,
    WriteStb = 4,
    ReadStb = 5,
    SetTimeout = 6,
    RespondAck = 7,
    RespondErr = 8,
    RespondRty = 9,
    SetGpoBits = 10,
    Reset = 11,
}

impl Opcode {
    fn with_flags(self, flags: u8) -> u8 {
        self as u8 | ((flags & 0x0f) << 4)
    }

    /// The bridge only understands ack, err and rty; anything else is sent as err.
    fn respond(response: Response) -> Self {
        match response {
            Response::Ack => Opcode::RespondAck,
            Response::Rty => Opcode::RespondRty,
            Response::Err | Response::StallTimeout | Response::Unknown => Opcode::RespondErr,
        }
    }
}

/// Strobe flags: keep the Wishbone cycle open afterwards, and the signed word
/// increment the bridge applies to its address register after the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strobe {
    word_step: i8,
    keep_cycle: bool,
}

impl Strobe {
    /// `address_step` is in bytes; divided by 4 it has to land in [-4, 3].
    pub fn new(address_step: i32, keep_cycle: bool) -> Result<Self> {
        let word_step = address_step / 4;
        if !(-4..=3).contains(&word_step) {
            return Err(Error::AddressStepOutOfRange(address_step));
        }
        Ok(Self {
            word_step: word_step as i8,
            keep_cycle,
        })
    }

    pub fn word_step(&self) -> i8 {
        self.word_step
    }

    fn flags(&self) -> u8 {
        let keep = if self.keep_cycle { 0x8 } else { 0x0 };
        keep | (self.word_step as u8 & 0x7)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Configure(Config),
    SetSel(u8),
    SetDat { lanes: u8, dat: u32 },
    SetAdr { lanes: u8, adr: u32 },
    WriteStb(Strobe),
    ReadStb(Strobe),
    SetTimeout(u32),
    SetGpoBits(u32),
    Reset,
    Respond(Response),
}

impl Command {
    pub fn encode<const N: usize>(&self, out: &mut SendBuffer<N>) -> Result<()> {
        match *self {
            Command::Configure(config) => out.push(Opcode::Config.with_flags(config.bits())),
            Command::SetSel(sel) => out.push(Opcode::SetSel.with_flags(sel)),
            Command::SetDat { lanes, dat } => encode_lanes(Opcode::SetDat, lanes, dat, out),
            Command::SetAdr { lanes, adr } => encode_lanes(Opcode::SetAdr, lanes, adr, out),
            Command::WriteStb(strobe) => out.push(Opcode::WriteStb.with_flags(strobe.flags())),
            Command::ReadStb(strobe) => out.push(Opcode::ReadStb.with_flags(strobe.flags())),
            Command::SetTimeout(cycles) => encode_lanes(Opcode::SetTimeout, ALL_LANES, cycles, out),
            Command::SetGpoBits(bits) => encode_lanes(Opcode::SetGpoBits, ALL_LANES, bits, out),
            Command::Reset => out.push(Opcode::Reset as u8),
            Command::Respond(response) => out.push(Opcode::respond(response) as u8),
        }
    }
}

fn encode_lanes<const N: usize>(
    opcode: Opcode,
    mask: u8,
    word: u32,
    out: &mut SendBuffer<N>,
) -> Result<()> {
    out.push(opcode.with_flags(mask))?;
    for i in lanes(mask) {
        out.push(lane(word, i))?;
    }
    Ok(())
}

/// Header class, bits 6..4 of a bridge header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    WriteResponse,
    Ack,
    Err,
    Rty,
    StallTimeout,
    WriteRequest,
    WriteReqNoRsp,
    ReadRequest,
}

const CLASSES: [Class; 8] = [
    Class::WriteResponse,
    Class::Ack,
    Class::Err,
    Class::Rty,
    Class::StallTimeout,
    Class::WriteRequest,
    Class::WriteReqNoRsp,
    Class::ReadRequest,
];

impl Class {
    fn of(header: u8) -> Self {
        CLASSES[usize::from((header >> 4) & 0x7)]
    }

    fn bits(self) -> u8 {
        (HEADER_MARK | ((self as u8) << 4)) & 0xf0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    /// Completes a host write.
    WriteResponse(Response),
    /// Completes a host read; `msb` holds bit 7 of each data lane.
    ReadResponse { response: Response, msb: u8 },
    /// An external agent wrote the bridge's slave port. `respond` is false for
    /// requests that never take a response byte.
    WriteRequest { sel: u8, respond: bool },
    /// An external agent read the bridge's slave port.
    ReadRequest { sel: u8 },
}

impl TryFrom<u8> for Header {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self> {
        if !is_header(byte) {
            return Err(Error::UnknownHeader(byte));
        }

        let low = byte & 0x0f;
        let read_response = |response| Header::ReadResponse { response, msb: low };

        Ok(match Class::of(byte) {
            Class::WriteResponse => Header::WriteResponse(
                Response::from_code(byte & 0x7).ok_or(Error::UnknownHeader(byte))?,
            ),
            Class::Ack => read_response(Response::Ack),
            Class::Err => read_response(Response::Err),
            Class::Rty => read_response(Response::Rty),
            Class::StallTimeout => read_response(Response::StallTimeout),
            Class::WriteRequest => Header::WriteRequest {
                sel: low,
                respond: true,
            },
            Class::WriteReqNoRsp => Header::WriteRequest {
                sel: low,
                respond: false,
            },
            Class::ReadRequest => Header::ReadRequest { sel: low },
        })
    }
}

pub trait ByteSource {
    fn next_byte(&mut self) -> Result<u8>;
}

impl ByteSource for slice::Iter<'_, u8> {
    fn next_byte(&mut self) -> Result<u8> {
        self.next().copied().ok_or(Error::Closed)
    }
}

fn encode_address<const N: usize>(
    adr: u32,
    first_group: u32,
    shared: u8,
    out: &mut SendBuffer<N>,
) -> Result<()> {
    let mut rest = adr >> WORD_SHIFT;
    let mut bits = first_group;
    let mut byte = shared;

    loop {
        let group = (rest & ((1u32 << bits) - 1)) as u8;
        rest >>= bits;

        byte |= group << (GROUP_BITS - bits);
        if rest != 0 {
            byte |= CONTINUE;
        }
        out.push(byte)?;

        if rest == 0 {
            return Ok(());
        }
        byte = 0;
        bits = GROUP_BITS;
    }
}

/// `byte` is the first address byte, already read by the caller.
fn decode_address<S: ByteSource + ?Sized>(
    mut byte: u8,
    first_group: u32,
    src: &mut S,
) -> Result<u32> {
    let mut adr = 0u32;
    let mut shift = WORD_SHIFT;
    let mut bits = first_group;

    loop {
        let group = u32::from((byte & GROUP_MASK) >> (GROUP_BITS - bits));
        adr |= group.checked_shl(shift).unwrap_or(0);
        shift = shift.saturating_add(bits);

        if byte & CONTINUE == 0 {
            return Ok(adr);
        }
        byte = src.next_byte()?;
        bits = GROUP_BITS;
    }
}

fn decode_lanes<S: ByteSource + ?Sized>(sel: u8, msb: u8, src: &mut S) -> Result<u32> {
    let mut dat = 0u32;
    for i in lanes(sel) {
        let mut byte = src.next_byte()? & PAYLOAD_MASK;
        if msb & (1u8 << i) != 0 {
            byte |= HEADER_MARK;
        }
        dat |= u32::from(byte) << (8 * i);
    }
    Ok(dat)
}

/// Payload of a write request: address and the selected data lanes.
pub fn decode_write_request<S: ByteSource + ?Sized>(sel: u8, src: &mut S) -> Result<(u32, u32)> {
    let first = src.next_byte()?;
    let adr = decode_address(first, WRITE_REQUEST_FIRST_GROUP, src)?;
    let dat = decode_lanes(sel, first & 0x0f, src)?;
    Ok((adr, dat))
}

/// Payload of a read request: the address only.
pub fn decode_read_request<S: ByteSource + ?Sized>(src: &mut S) -> Result<u32> {
    let first = src.next_byte()?;
    decode_address(first, READ_REQUEST_FIRST_GROUP, src)
}

/// Payload of a read response. Lanes outside `sel` stay zero.
pub fn decode_read_data<S: ByteSource + ?Sized>(sel: u8, msb: u8, src: &mut S) -> Result<u32> {
    decode_lanes(sel, msb, src)
}

// Bridge-side framing: what the FPGA emits towards the host.

pub fn write_response_header(response: Response) -> u8 {
    let code = match response {
        Response::Unknown => Response::Err as u8,
        other => other as u8,
    };
    Class::WriteResponse.bits() | code
}

pub fn encode_write_request<const N: usize>(
    sel: u8,
    adr: u32,
    dat: u32,
    respond: bool,
    out: &mut SendBuffer<N>,
) -> Result<()> {
    let sel = sel & ALL_LANES;
    let class = if respond {
        Class::WriteRequest
    } else {
        Class::WriteReqNoRsp
    };
    out.push(class.bits() | sel)?;
    encode_address(adr, WRITE_REQUEST_FIRST_GROUP, msb_flags(sel, dat), out)?;
    for i in lanes(sel) {
        out.push(lane(dat, i) & PAYLOAD_MASK)?;
    }
    Ok(())
}

pub fn encode_read_request<const N: usize>(
    sel: u8,
    adr: u32,
    out: &mut SendBuffer<N>,
) -> Result<()> {
    out.push(Class::ReadRequest.bits() | (sel & ALL_LANES))?;
    encode_address(adr, READ_REQUEST_FIRST_GROUP, 0, out)
}

pub fn encode_read_response<const N: usize>(
    response: Response,
    sel: u8,
    dat: u32,
    out: &mut SendBuffer<N>,
) -> Result<()> {
    let class = match response {
        Response::Ack => Class::Ack,
        Response::Rty => Class::Rty,
        Response::StallTimeout => Class::StallTimeout,
        Response::Err | Response::Unknown => Class::Err,
    };
    let sel = sel & ALL_LANES;
    out.push(class.bits() | msb_flags(sel, dat))?;
    for i in lanes(sel) {
        out.push(lane(dat, i) & PAYLOAD_MASK)?;
    }
    Ok(())
}
