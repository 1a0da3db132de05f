// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;
use std::net::SocketAddr;

/// A listener which produces `Stream`s: either plaintext, or TLS when an
/// acceptor has been configured.
pub enum Listener {
    Plain(TcpListener),
    #[cfg(feature = "boringssl")]
    Tls(TcpListener, TlsTcpAcceptor),
}

impl Listener {
    /// Accept one connection. TLS streams come back mid-handshake; the
    /// caller is expected to poll `do_handshake` until established.
    pub fn accept(&self) -> Result<(Stream, SocketAddr)> {
        match self {
            Listener::Plain(listener) => {
                let (stream, addr) = listener.accept()?;
                Ok((Stream::from(stream), addr))
            }
            #[cfg(feature = "boringssl")]
            Listener::Tls(listener, acceptor) => {
                let (stream, addr) = listener.accept()?;
                Ok((Stream::from(acceptor.accept(stream)?), addr))
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        match self {
            Listener::Plain(listener) => listener.local_addr(),
            #[cfg(feature = "boringssl")]
            Listener::Tls(listener, _) => listener.local_addr(),
        }
    }
}

impl From<TcpListener> for Listener {
    fn from(listener: TcpListener) -> Self {
        Listener::Plain(listener)
    }
}

#[cfg(feature = "boringssl")]
impl From<(TcpListener, TlsTcpAcceptor)> for Listener {
    fn from(parts: (TcpListener, TlsTcpAcceptor)) -> Self {
        Listener::Tls(parts.0, parts.1)
    }
}

impl event::Source for Listener {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        match self {
            Listener::Plain(listener) => listener.register(registry, token, interest),
            #[cfg(feature = "boringssl")]
            Listener::Tls(listener, _) => listener.register(registry, token, interest),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        match self {
            Listener::Plain(listener) => listener.reregister(registry, token, interest),
            #[cfg(feature = "boringssl")]
            Listener::Tls(listener, _) => listener.reregister(registry, token, interest),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> Result<()> {
        match self {
            Listener::Plain(listener) => listener.deregister(registry),
            #[cfg(feature = "boringssl")]
            Listener::Tls(listener, _) => listener.deregister(registry),
        }
    }
}
