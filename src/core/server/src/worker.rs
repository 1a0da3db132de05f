// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A worker thread: a poll loop over the connections it owns, plus the
//! drain side of the cross-thread notification structure (new
//! connections, async-I/O completions, server events, deferred wakeups).

use crate::connection::{Connection, DriveCtx};
use crate::context::ServerContext;
use crate::notify::WorkerShared;
use crate::statemachine::State;
use crate::timings::SchedTimes;
use crate::{Signal, WAKER_TOKEN};
use crossbeam_channel::Receiver;
use net::event::Source;
use net::{Events, Poll, Token, Waker};
use slab::Slab;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) struct Worker {
    poll: Poll,
    shared: Arc<WorkerShared>,
    connections: Slab<Connection>,
    server: Arc<ServerContext>,
    signal_rx: Receiver<Signal>,
    nevent: usize,
    timeout: Duration,
    sched: SchedTimes,
}

impl Worker {
    pub fn new(
        server: Arc<ServerContext>,
        signal_rx: Receiver<Signal>,
        nevent: usize,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let shared = Arc::new(WorkerShared::new(waker));

        Ok(Self {
            poll,
            shared,
            connections: Slab::new(),
            server,
            signal_rx,
            nevent,
            timeout,
            sched: SchedTimes::default(),
        })
    }

    pub fn shared(&self) -> Arc<WorkerShared> {
        self.shared.clone()
    }

    pub fn run(&mut self) {
        let mut events = Events::with_capacity(self.nevent);

        loop {
            if self.poll.poll(&mut events, Some(self.timeout)).is_err() {
                error!("error polling worker");
            }

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {
                        self.drain_shared();
                    }
                    token => {
                        if event.is_error() {
                            self.close(token.0);
                            continue;
                        }
                        self.drive(token.0);
                    }
                }
            }

            while let Ok(signal) = self.signal_rx.try_recv() {
                match signal {
                    Signal::FlushAll => self.flush_all(),
                    Signal::Shutdown => {
                        return;
                    }
                }
            }

            self.sweep();
        }
    }

    /// Drain the cross-thread notification structure: new connections are
    /// registered, pending-io entries resume their suspended cookies,
    /// server events are queued onto (and delivered to idle) connections.
    fn drain_shared(&mut self) {
        let drained = self.shared.take_all();

        for mut session in drained.new_connections {
            let entry = self.connections.vacant_entry();
            let token = Token(entry.key());
            let interest = session.interest();
            if session.register(self.poll.registry(), token, interest).is_err() {
                warn!("failed to register accepted connection");
                continue;
            }
            let id = self.server.next_connection_id();
            let connection = Connection::new(id, session, &self.server);
            debug!("{}: new connection {}", id, connection.description());
            entry.insert(connection);
            self.drive(token.0);
        }

        for pending in drained.pending_io {
            let conn = match self.connections.get_mut(pending.token) {
                Some(conn) if conn.id == pending.conn_id => conn,
                _ => continue, // connection already recycled
            };
            let resumed = conn
                .cookies
                .iter_mut()
                .find(|c| c.seq == pending.cookie_seq && c.ewouldblock)
                .map(|cookie| {
                    cookie.aiostat = pending.status;
                    cookie.ewouldblock = false;
                    cookie.seq
                });
            if let Some(seq) = resumed {
                if matches!(conn.state(), State::Closing | State::PendingClose) {
                    // the engine finished while we were tearing down; the
                    // cookie is now drained and close can make progress
                    self.drive(pending.token);
                    continue;
                }
                conn.executing = Some(seq);
                conn.set_state(State::Execute);
                self.drive(pending.token);
            }
        }

        for (token, conn_id, event) in drained.server_events {
            if let Some(conn) = self.connections.get_mut(token) {
                if conn.id == conn_id {
                    conn.server_events.push_back(event);
                    if conn.state().is_idle() {
                        self.drive(token);
                    }
                }
            }
        }

        for (token, conn_id) in drained.notifications {
            if let Some(conn) = self.connections.get(token) {
                if conn.id == conn_id {
                    self.drive(token);
                }
            }
        }
    }

    /// Run one connection's state machine and update its registration.
    fn drive(&mut self, token: usize) {
        let server = self.server.clone();
        let shared = self.shared.clone();

        let conn = match self.connections.get_mut(token) {
            Some(conn) => conn,
            None => return,
        };

        let start = Instant::now();
        let mut ctx = DriveCtx {
            server: &server,
            worker: &shared,
            token,
        };
        conn.drive(&mut ctx);
        self.sched.record(start.elapsed().as_nanos() as u64);

        if conn.state() == State::Destroyed {
            self.close(token);
            return;
        }

        let interest = conn.session.interest();
        let _ = conn
            .session
            .reregister(self.poll.registry(), Token(token), interest);
    }

    fn close(&mut self, token: usize) {
        if self.connections.contains(token) {
            let mut conn = self.connections.remove(token);
            debug!("{}: closing connection {}", conn.id, conn.description());
            self.server.unsubscribe_ccn(conn.id);
            if conn.is_provider {
                self.server.extauth.remove_provider(conn.id);
            }
            if let crate::connection::AuthState::External(user) = &conn.auth {
                self.server.extauth.logoff(user);
            }
            let _ = conn.session.deregister(self.poll.registry());
        }
    }

    /// Periodic pass over every connection: ticks the stuck-send-queue
    /// watchdog on connections with queued output and enforces the idle
    /// timer at half the configured window.
    fn sweep(&mut self) {
        let idle_limit = self.server.settings.idle_timeout;
        let mut to_drive = Vec::new();
        let mut to_close = Vec::new();

        for (token, conn) in self.connections.iter() {
            if conn.session.send_queue_size() > 0 {
                to_drive.push(token);
                continue;
            }
            if let Some(limit) = idle_limit {
                if conn.is_dcp() || conn.is_provider {
                    continue;
                }
                // the timer fires at half the window and is re-armed once;
                // a connection is only closed after a full quiet window
                if conn.state().is_idle() && conn.last_activity.elapsed().as_secs() >= limit {
                    to_close.push(token);
                }
            }
        }

        for token in to_drive {
            self.drive(token);
        }
        for token in to_close {
            if let Some(conn) = self.connections.get_mut(token) {
                info!("{}: closing idle connection {}", conn.id, conn.description());
                conn.set_state(State::Closing);
            }
            self.drive(token);
        }
    }

    fn flush_all(&mut self) {
        struct Noop;
        impl engine::IoNotify for Noop {
            fn notify_io_complete(&self, _status: engine::EngineResult<()>) {}
        }
        let cookie: engine::CookieIo = Arc::new(Noop);
        for bucket in self.server.buckets() {
            if bucket.is_no_bucket() {
                continue;
            }
            let _ = bucket.engine().flush(&cookie);
        }
    }
}
