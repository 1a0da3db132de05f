// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Networking primitives for the event-driven server cores: thin wrappers
//! around mio's TCP types, a unified `Stream` which hides whether TLS is in
//! use, and a `Listener` which produces such streams.

pub use mio::{Events, Interest, Poll, Registry, Token, Waker};

pub mod event {
    pub use mio::event::*;
}

mod listener;
mod stream;
mod tcp;

#[cfg(feature = "boringssl")]
mod tls_tcp;

pub use listener::*;
pub use stream::*;
pub use tcp::*;

#[cfg(feature = "boringssl")]
pub use tls_tcp::*;

/// A stand-in so that `Option<TlsTcpAcceptor>` keeps its shape in builds
/// without TLS support. It has no values.
#[cfg(not(feature = "boringssl"))]
pub enum TlsTcpAcceptor {}

type Result<T> = std::io::Result<T>;
