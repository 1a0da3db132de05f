// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;
use core::fmt::Debug;
use std::io::{Error, ErrorKind, Read, Write};
use std::net::SocketAddr;

/// A wrapper type that unifies plaintext TCP streams and TLS/SSL over TCP.
/// This allows dynamic behaviors at runtime, such as enabling TLS/SSL
/// through configuration.
pub struct Stream {
    inner: StreamType,
}

enum StreamType {
    Tcp(TcpStream),
    #[cfg(feature = "boringssl")]
    TlsTcp(TlsTcpStream),
}

impl Stream {
    pub fn interest(&self) -> Interest {
        match &self.inner {
            StreamType::Tcp(s) => {
                if !s.is_established() {
                    Interest::READABLE.add(Interest::WRITABLE)
                } else {
                    Interest::READABLE
                }
            }
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.interest(),
        }
    }

    pub fn is_established(&self) -> bool {
        match &self.inner {
            StreamType::Tcp(s) => s.is_established(),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => !s.is_handshaking(),
        }
    }

    pub fn is_handshaking(&self) -> bool {
        match &self.inner {
            StreamType::Tcp(_) => false,
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.is_handshaking(),
        }
    }

    /// Drive any in-progress TLS handshake. A plaintext stream is always
    /// considered handshaken.
    pub fn do_handshake(&mut self) -> Result<()> {
        match &mut self.inner {
            StreamType::Tcp(_) => Ok(()),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.do_handshake(),
        }
    }

    pub fn is_tls(&self) -> bool {
        match &self.inner {
            StreamType::Tcp(_) => false,
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(_) => true,
        }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            StreamType::Tcp(s) => s.peer_addr(),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.peer_addr(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.inner {
            StreamType::Tcp(s) => s.local_addr(),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.local_addr(),
        }
    }

    /// Shut down the read half, leaving queued writes flushable.
    pub fn shutdown_read(&self) -> Result<()> {
        match &self.inner {
            StreamType::Tcp(s) => s.shutdown(Shutdown::Read),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.shutdown_read(),
        }
    }
}

impl Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            StreamType::Tcp(s) => write!(f, "{:?}", s),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<TcpStream> for Stream {
    fn from(other: TcpStream) -> Self {
        Self {
            inner: StreamType::Tcp(other),
        }
    }
}

#[cfg(feature = "boringssl")]
impl From<TlsTcpStream> for Stream {
    fn from(other: TlsTcpStream) -> Self {
        Self {
            inner: StreamType::TlsTcp(other),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.inner {
            StreamType::Tcp(s) => s.read(buf),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match &mut self.inner {
            StreamType::Tcp(s) => s.write(buf),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match &mut self.inner {
            StreamType::Tcp(s) => s.flush(),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.flush(),
        }
    }
}

impl event::Source for Stream {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        match &mut self.inner {
            StreamType::Tcp(s) => s.register(registry, token, interest),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.register(registry, token, interest),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        match &mut self.inner {
            StreamType::Tcp(s) => s.reregister(registry, token, interest),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.reregister(registry, token, interest),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> Result<()> {
        match &mut self.inner {
            StreamType::Tcp(s) => s.deregister(registry),
            #[cfg(feature = "boringssl")]
            StreamType::TlsTcp(s) => s.deregister(registry),
        }
    }
}

#[cfg(feature = "boringssl")]
pub(crate) fn would_block() -> Error {
    Error::from(ErrorKind::WouldBlock)
}
