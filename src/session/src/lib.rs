// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Buffered bi-directional communication on top of a `net::Stream`. The
//! read side assembles bytes into a contiguous buffer for the protocol
//! layer to slice packets from. The write side is an ordered pipeline which
//! mixes copied bytes with zero-copy references to externally owned
//! payloads.

#[macro_use]
extern crate log;

mod buffer;
mod pipeline;

pub use buffer::Buffer;
pub use pipeline::{HeapSendBuffer, SendBuffer, SendPipeline};

use bytes::buf::UninitSlice;
use bytes::{Buf, BufMut};
use core::borrow::Borrow;
use core::fmt::Debug;
use metriken::*;
use net::*;
use std::io::{ErrorKind, Read, Result};
use std::net::SocketAddr;

#[metric(name = "session_recv", description = "number of reads from sessions")]
pub static SESSION_RECV: Counter = Counter::new();

#[metric(name = "session_recv_byte", description = "number of bytes read from sessions")]
pub static SESSION_RECV_BYTE: Counter = Counter::new();

#[metric(name = "session_send", description = "number of writes to sessions")]
pub static SESSION_SEND: Counter = Counter::new();

#[metric(name = "session_send_byte", description = "number of bytes written to sessions")]
pub static SESSION_SEND_BYTE: Counter = Counter::new();

// The size of one kilobyte, in bytes
const KB: usize = 1024;

// If the read buffer has less than this amount available before a read, we
// will grow the read buffer. Set to the size of a single page.
const BUFFER_MIN_FREE: usize = 4 * KB;

// The target size of the read operations, the selected value is the
// upper-bound on TLS fragment size as per RFC 5246
const TARGET_READ_SIZE: usize = 16 * KB;

/// A `Session` is an underlying `Stream` with its read buffer and send
/// pipeline. Incoming bytes are buffered so that the protocol layer can
/// inspect complete packets in place; outgoing bytes are either copied into
/// the pipeline's ring or chained from external storage.
pub struct Session {
    stream: Stream,
    read_buffer: Buffer,
    pipeline: SendPipeline,
}

impl Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::result::Result<(), std::fmt::Error> {
        write!(f, "{:?}", self.stream)
    }
}

impl Session {
    pub fn new(stream: Stream) -> Self {
        Self {
            stream,
            read_buffer: Buffer::new(TARGET_READ_SIZE),
            pipeline: SendPipeline::new(TARGET_READ_SIZE),
        }
    }

    /// Return the event `Interest`s for the `Session`.
    pub fn interest(&self) -> Interest {
        if !self.pipeline.is_empty() {
            self.stream.interest().add(Interest::WRITABLE)
        } else {
            self.stream.interest()
        }
    }

    pub fn is_handshaking(&self) -> bool {
        self.stream.is_handshaking()
    }

    pub fn do_handshake(&mut self) -> Result<()> {
        self.stream.do_handshake()
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.stream.local_addr()
    }

    pub fn shutdown_read(&self) -> Result<()> {
        self.stream.shutdown_read()
    }

    /// Fill the read buffer by reading from the stream until the read would
    /// block. `Ok(0)` indicates the remote side closed the stream.
    pub fn fill(&mut self) -> Result<usize> {
        SESSION_RECV.increment();
        let mut read = 0;

        loop {
            if self.read_buffer.writable_len() < BUFFER_MIN_FREE {
                self.read_buffer.reserve(TARGET_READ_SIZE);
            }

            match self.stream.read(self.read_buffer.writable()) {
                Ok(0) => {
                    return Ok(0);
                }
                Ok(n) => {
                    self.read_buffer.advance_write(n);
                    read += n;
                }
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => {
                        if read == 0 {
                            return Err(e);
                        } else {
                            SESSION_RECV_BYTE.add(read as _);
                            return Ok(read);
                        }
                    }
                    ErrorKind::Interrupted => {}
                    _ => {
                        return Err(e);
                    }
                },
            }
        }
    }

    /// The bytes currently buffered on the read side.
    pub fn read_buffer(&self) -> &[u8] {
        self.read_buffer.chunk()
    }

    /// Mark `amt` bytes as consumed from the read buffer.
    pub fn consume(&mut self, amt: usize) {
        self.read_buffer.advance(amt)
    }

    /// Splice externally owned bytes into the send pipeline.
    pub fn chain(&mut self, buf: Box<dyn SendBuffer>) {
        self.pipeline.chain(buf)
    }

    /// Bytes queued for transmission.
    pub fn send_queue_size(&self) -> usize {
        self.pipeline.queued()
    }

    /// Attempt to flush the send pipeline to the underlying stream.
    pub fn flush(&mut self) -> Result<usize> {
        SESSION_SEND.increment();
        match self.pipeline.flush(&mut self.stream) {
            Ok(flushed) => {
                SESSION_SEND_BYTE.add(flushed as _);
                Ok(flushed)
            }
            Err(e) => {
                if e.kind() != ErrorKind::WouldBlock {
                    trace!("session flush error: {}", e);
                }
                Err(e)
            }
        }
    }
}

impl From<Stream> for Session {
    fn from(stream: Stream) -> Self {
        Self::new(stream)
    }
}

impl Borrow<[u8]> for Session {
    fn borrow(&self) -> &[u8] {
        self.read_buffer.chunk()
    }
}

impl Buf for Session {
    fn remaining(&self) -> usize {
        self.read_buffer.remaining()
    }

    fn chunk(&self) -> &[u8] {
        self.read_buffer.chunk()
    }

    fn advance(&mut self, amt: usize) {
        self.read_buffer.advance(amt)
    }
}

unsafe impl BufMut for Session {
    fn remaining_mut(&self) -> usize {
        self.pipeline.remaining_mut()
    }

    unsafe fn advance_mut(&mut self, amt: usize) {
        self.pipeline.advance_mut(amt)
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        self.pipeline.chunk_mut()
    }

    #[allow(unused_mut)]
    fn put<T: Buf>(&mut self, mut src: T)
    where
        Self: Sized,
    {
        self.pipeline.put(src)
    }

    fn put_slice(&mut self, src: &[u8]) {
        self.pipeline.put_slice(src)
    }
}

impl event::Source for Session {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        self.stream.register(registry, token, interest)
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        self.stream.reregister(registry, token, interest)
    }

    fn deregister(&mut self, registry: &Registry) -> Result<()> {
        self.stream.deregister(registry)
    }
}
