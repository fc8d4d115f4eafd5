use std::sync::mpsc::{self, Sender};

use log::{info, warn};

use crate::Response;

/// Data the stock handler answers every slave read with.
pub const DEFAULT_READ_DATA: u32 = 0xab12_affe;

/// Services requests an external agent makes on the bridge's slave port.
///
/// Both methods run synchronously inside whatever device call happened to read
/// the request header, including `write` and `read`.
pub trait SlaveHandler {
    fn on_slave_write(&mut self, sel: u8, adr: u32, dat: u32) -> Response;

    fn on_slave_read(&mut self, sel: u8, adr: u32) -> (Response, u32);
}

impl<H: SlaveHandler + ?Sized> SlaveHandler for &mut H {
    fn on_slave_write(&mut self, sel: u8, adr: u32, dat: u32) -> Response {
        (**self).on_slave_write(sel, adr, dat)
    }

    fn on_slave_read(&mut self, sel: u8, adr: u32) -> (Response, u32) {
        (**self).on_slave_read(sel, adr)
    }
}

impl<H: SlaveHandler + ?Sized> SlaveHandler for Box<H> {
    fn on_slave_write(&mut self, sel: u8, adr: u32, dat: u32) -> Response {
        (**self).on_slave_write(sel, adr, dat)
    }

    fn on_slave_read(&mut self, sel: u8, adr: u32) -> (Response, u32) {
        (**self).on_slave_read(sel, adr)
    }
}

/// Logs every request, acks writes and answers reads with [`DEFAULT_READ_DATA`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl SlaveHandler for LoggingHandler {
    fn on_slave_write(&mut self, sel: u8, adr: u32, dat: u32) -> Response {
        info!("slave write: sel={:#x} adr={:#010x} dat={:#010x}", sel, adr, dat);
        Response::Ack
    }

    fn on_slave_read(&mut self, sel: u8, adr: u32) -> (Response, u32) {
        info!("slave read: sel={:#x} adr={:#010x}", sel, adr);
        (Response::Ack, DEFAULT_READ_DATA)
    }
}

pub struct FnHandler<W, R> {
    write: W,
    read: R,
}

impl<W, R> FnHandler<W, R>
where
    W: FnMut(u8, u32, u32) -> Response,
    R: FnMut(u8, u32) -> (Response, u32),
{
    pub fn new(write: W, read: R) -> Self {
        Self { write, read }
    }
}

impl<W, R> SlaveHandler for FnHandler<W, R>
where
    W: FnMut(u8, u32, u32) -> Response,
    R: FnMut(u8, u32) -> (Response, u32),
{
    fn on_slave_write(&mut self, sel: u8, adr: u32, dat: u32) -> Response {
        (self.write)(sel, adr, dat)
    }

    fn on_slave_read(&mut self, sel: u8, adr: u32) -> (Response, u32) {
        (self.read)(sel, adr)
    }
}

#[derive(Debug)]
pub enum SlaveRequest {
    Write {
        sel: u8,
        adr: u32,
        dat: u32,
        reply: Sender<Response>,
    },
    Read {
        sel: u8,
        adr: u32,
        reply: Sender<(Response, u32)>,
    },
}

/// Hands each request to another thread and blocks until it replies.
///
/// If the other side has gone away the request is answered with `err`.
pub struct ChannelHandler {
    tx: Sender<SlaveRequest>,
}

impl ChannelHandler {
    pub fn new(tx: Sender<SlaveRequest>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::Receiver<SlaveRequest>) {
        let (tx, rx) = mpsc::channel();
        (Self::new(tx), rx)
    }
}

impl SlaveHandler for ChannelHandler {
    fn on_slave_write(&mut self, sel: u8, adr: u32, dat: u32) -> Response {
        let (reply, rx) = mpsc::channel();
        let request = SlaveRequest::Write {
            sel,
            adr,
            dat,
            reply,
        };
        if self.tx.send(request).is_err() {
            warn!("slave write at {:#010x} dropped, no receiver", adr);
            return Response::Err;
        }
        rx.recv().unwrap_or_else(|_| {
            warn!("slave write at {:#010x} got no reply", adr);
            Response::Err
        })
    }

    fn on_slave_read(&mut self, sel: u8, adr: u32) -> (Response, u32) {
        let (reply, rx) = mpsc::channel();
        if self.tx.send(SlaveRequest::Read { sel, adr, reply }).is_err() {
            warn!("slave read at {:#010x} dropped, no receiver", adr);
            return (Response::Err, 0);
        }
        rx.recv().unwrap_or_else(|_| {
            warn!("slave read at {:#010x} got no reply", adr);
            (Response::Err, 0)
        })
    }
}
