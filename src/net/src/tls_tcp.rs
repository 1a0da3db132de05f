// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;
use boring::ssl::{
    ErrorCode, HandshakeError, MidHandshakeSslStream, SslAcceptor, SslFiletype, SslMethod,
    SslStream,
};
use core::fmt::Debug;
use std::io::{Error, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Wraps a TLS/SSL stream so that negotiated and handshaking sessions have a
/// uniform type.
pub struct TlsTcpStream {
    inner: TlsState,
}

enum TlsState {
    Handshaking(Option<MidHandshakeSslStream<TcpStream>>),
    Negotiated(SslStream<TcpStream>),
}

impl TlsTcpStream {
    pub fn is_handshaking(&self) -> bool {
        matches!(self.inner, TlsState::Handshaking(_))
    }

    pub fn interest(&self) -> Interest {
        if self.is_handshaking() {
            Interest::READABLE.add(Interest::WRITABLE)
        } else {
            Interest::READABLE
        }
    }

    /// Attempt to advance the handshake. Returns `WouldBlock` while more
    /// negotiation traffic is needed.
    pub fn do_handshake(&mut self) -> Result<()> {
        if let TlsState::Handshaking(stream) = &mut self.inner {
            let stream = stream.take().ok_or_else(|| {
                Error::new(ErrorKind::Other, "tls handshake already poisoned")
            })?;
            match stream.handshake() {
                Ok(negotiated) => {
                    self.inner = TlsState::Negotiated(negotiated);
                    Ok(())
                }
                Err(HandshakeError::WouldBlock(mid)) => {
                    self.inner = TlsState::Handshaking(Some(mid));
                    Err(would_block())
                }
                Err(_) => Err(Error::new(ErrorKind::Other, "tls handshake failed")),
            }
        } else {
            Ok(())
        }
    }

    pub fn peer_addr(&self) -> Result<SocketAddr> {
        self.tcp_stream().peer_addr()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.tcp_stream().local_addr()
    }

    pub fn shutdown_read(&self) -> Result<()> {
        self.tcp_stream().shutdown(Shutdown::Read)
    }

    fn tcp_stream(&self) -> &TcpStream {
        match &self.inner {
            TlsState::Handshaking(Some(s)) => s.get_ref(),
            TlsState::Handshaking(None) => unreachable!("poisoned tls stream"),
            TlsState::Negotiated(s) => s.get_ref(),
        }
    }
}

impl Debug for TlsTcpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TlsTcpStream {{ handshaking: {} }}", self.is_handshaking())
    }
}

impl Read for TlsTcpStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match &mut self.inner {
            TlsState::Handshaking(_) => Err(would_block()),
            TlsState::Negotiated(s) => match s.ssl_read(buf) {
                Ok(amt) => Ok(amt),
                Err(e) => match e.code() {
                    ErrorCode::WANT_READ | ErrorCode::WANT_WRITE => Err(would_block()),
                    ErrorCode::ZERO_RETURN => Ok(0),
                    _ => Err(Error::new(ErrorKind::Other, "tls read failed")),
                },
            },
        }
    }
}

impl Write for TlsTcpStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match &mut self.inner {
            TlsState::Handshaking(_) => Err(would_block()),
            TlsState::Negotiated(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match &mut self.inner {
            TlsState::Handshaking(_) => Err(would_block()),
            TlsState::Negotiated(s) => s.flush(),
        }
    }
}

impl event::Source for TlsTcpStream {
    fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        match &mut self.inner {
            TlsState::Handshaking(Some(s)) => s.get_mut().register(registry, token, interest),
            TlsState::Handshaking(None) => Err(Error::new(ErrorKind::Other, "poisoned")),
            TlsState::Negotiated(s) => s.get_mut().register(registry, token, interest),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interest: Interest) -> Result<()> {
        match &mut self.inner {
            TlsState::Handshaking(Some(s)) => s.get_mut().reregister(registry, token, interest),
            TlsState::Handshaking(None) => Err(Error::new(ErrorKind::Other, "poisoned")),
            TlsState::Negotiated(s) => s.get_mut().reregister(registry, token, interest),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> Result<()> {
        match &mut self.inner {
            TlsState::Handshaking(Some(s)) => s.get_mut().deregister(registry),
            TlsState::Handshaking(None) => Err(Error::new(ErrorKind::Other, "poisoned")),
            TlsState::Negotiated(s) => s.get_mut().deregister(registry),
        }
    }
}

/// Server-side acceptor which wraps freshly accepted TCP streams in TLS.
pub struct TlsTcpAcceptor {
    inner: SslAcceptor,
}

impl TlsTcpAcceptor {
    pub fn mozilla_intermediate_v5() -> Result<TlsTcpAcceptorBuilder> {
        let inner = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls_server())
            .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;

        Ok(TlsTcpAcceptorBuilder {
            inner,
            ca_file: None,
            certificate_file: None,
            certificate_chain_file: None,
            private_key_file: None,
        })
    }

    pub fn accept(&self, stream: TcpStream) -> Result<TlsTcpStream> {
        match self.inner.accept(stream) {
            Ok(negotiated) => Ok(TlsTcpStream {
                inner: TlsState::Negotiated(negotiated),
            }),
            Err(HandshakeError::WouldBlock(mid)) => Ok(TlsTcpStream {
                inner: TlsState::Handshaking(Some(mid)),
            }),
            Err(_) => Err(Error::new(ErrorKind::Other, "tls accept failed")),
        }
    }
}

pub struct TlsTcpAcceptorBuilder {
    inner: boring::ssl::SslAcceptorBuilder,
    ca_file: Option<PathBuf>,
    certificate_file: Option<PathBuf>,
    certificate_chain_file: Option<PathBuf>,
    private_key_file: Option<PathBuf>,
}

impl TlsTcpAcceptorBuilder {
    pub fn build(mut self) -> Result<TlsTcpAcceptor> {
        if let Some(f) = self.ca_file {
            self.inner
                .set_ca_file(f)
                .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
        }
        if let Some(f) = self.certificate_file {
            self.inner
                .set_certificate_file(f, SslFiletype::PEM)
                .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
        }
        if let Some(f) = self.certificate_chain_file {
            self.inner
                .set_certificate_chain_file(f)
                .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?;
        }
        match self.private_key_file {
            Some(f) => self
                .inner
                .set_private_key_file(f, SslFiletype::PEM)
                .map_err(|e| Error::new(ErrorKind::Other, e.to_string()))?,
            None => {
                return Err(Error::new(ErrorKind::Other, "no private key file provided"));
            }
        }

        Ok(TlsTcpAcceptor {
            inner: self.inner.build(),
        })
    }

    pub fn ca_file<T: Into<PathBuf>>(mut self, file: T) -> Self {
        self.ca_file = Some(file.into());
        self
    }

    pub fn certificate_file<T: Into<PathBuf>>(mut self, file: T) -> Self {
        self.certificate_file = Some(file.into());
        self
    }

    pub fn certificate_chain_file<T: Into<PathBuf>>(mut self, file: T) -> Self {
        self.certificate_chain_file = Some(file.into());
        self
    }

    pub fn private_key_file<T: Into<PathBuf>>(mut self, file: T) -> Self {
        self.private_key_file = Some(file.into());
        self
    }
}
