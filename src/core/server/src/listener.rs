// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The dispatcher thread: accepts sockets and hands them to the worker
//! pool round-robin. Workers own connections for their entire lifetime;
//! the listener never touches a connection again after the handoff.

use crate::notify::WorkerShared;
use crate::{Signal, LISTENER_TOKEN, WAKER_TOKEN};
use common::ssl::tls_acceptor;
use config::{ServerConfig, TlsConfig};
use crossbeam_channel::Receiver;
use net::event::Source;
use net::{Events, Interest, Poll, TcpListener, Waker};
use session::Session;
use std::io::{Error, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct ListenerBuilder {
    listener: net::Listener,
    poll: Poll,
    waker: Arc<Waker>,
    timeout: Duration,
}

impl ListenerBuilder {
    pub fn new<T: ServerConfig + TlsConfig>(config: &T) -> crate::Result<Self> {
        let tls_config = config.tls();
        let config = config.server();

        let addr = config.socket_addr().map_err(|e| {
            error!("{}", e);
            Error::new(ErrorKind::Other, "bad listen address")
        })?;

        let tcp_listener = TcpListener::bind(addr)?;

        let mut listener = match tls_acceptor(tls_config)? {
            #[cfg(feature = "boringssl")]
            Some(acceptor) => net::Listener::from((tcp_listener, acceptor)),
            _ => net::Listener::from(tcp_listener),
        };

        let poll = Poll::new()?;
        listener.register(poll.registry(), LISTENER_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let timeout = Duration::from_millis(config.timeout() as u64);

        Ok(Self { listener, poll, waker, timeout })
    }

    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub fn build(
        self,
        workers: Vec<Arc<WorkerShared>>,
        signal_rx: Receiver<Signal>,
    ) -> Listener {
        Listener {
            listener: self.listener,
            poll: self.poll,
            timeout: self.timeout,
            workers,
            next_worker: 0,
            signal_rx,
        }
    }
}

pub(crate) struct Listener {
    listener: net::Listener,
    poll: Poll,
    timeout: Duration,
    workers: Vec<Arc<WorkerShared>>,
    next_worker: usize,
    signal_rx: Receiver<Signal>,
}

impl Listener {
    /// Accept until the socket would block, distributing round-robin.
    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    trace!("accepted connection from {}", addr);
                    let worker = &self.workers[self.next_worker];
                    self.next_worker = (self.next_worker + 1) % self.workers.len();
                    worker.send_connection(Session::new(stream));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("accept failed: {}", e);
                    break;
                }
            }
        }
    }

    pub fn run(&mut self) {
        let mut events = Events::with_capacity(1024);

        loop {
            if self.poll.poll(&mut events, Some(self.timeout)).is_err() {
                error!("error polling listener");
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept(),
                    WAKER_TOKEN => {}
                    _ => {}
                }
            }

            while let Ok(signal) = self.signal_rx.try_recv() {
                match signal {
                    Signal::FlushAll => {}
                    Signal::Shutdown => {
                        return;
                    }
                }
            }
        }
    }
}
