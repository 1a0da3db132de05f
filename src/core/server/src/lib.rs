// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The MCBP connection frontend: a listener thread accepting sockets and
//! handing them round-robin to a fixed pool of worker threads, each running
//! a cooperative event loop over its own set of connections. Every
//! connection is driven by an explicit state machine; storage engine calls
//! which cannot complete synchronously suspend the in-flight command and
//! are resumed through a cross-thread notification onto the owning worker.

#[macro_use]
extern crate log;

use common::signal::Signal;
use net::Token;

mod auth;
mod bucket;
mod cluster;
mod connection;
mod context;
mod cookie;
mod dcp;
mod dispatch;
mod executors;
mod extauth;
mod listener;
mod notify;
mod process;
mod server_event;
mod settings;
mod statemachine;
mod subdoc;
mod timings;
mod validators;

pub use bucket::{Bucket, BucketState};
pub use context::ServerContext;
pub use process::{Process, ProcessBuilder};
pub use settings::Settings;

pub(crate) use connection::Connection;
pub(crate) use cookie::Cookie;
pub(crate) use notify::{CookieIoHandle, WorkerShared};
pub(crate) use statemachine::State;

mod privileges;
mod worker;

pub use privileges::{Privilege, PrivilegeDb};

pub(crate) type Result<T> = std::io::Result<T>;

pub(crate) const WAKER_TOKEN: Token = Token(usize::MAX);
pub(crate) const LISTENER_TOKEN: Token = Token(usize::MAX - 1);

pub(crate) const THREAD_PREFIX: &str = "mcbpserver";

/// Upper bound on cookies in flight on one connection when unordered
/// execution has been negotiated.
pub(crate) const MAX_INFLIGHT_COOKIES: usize = 16;
