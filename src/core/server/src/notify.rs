// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Cross-thread notification into a worker. Exactly three things cross a
//! worker boundary: new connections from the listener, async-I/O
//! completions from engine threads, and server events from the external
//! auth manager (or another worker pushing a clustermap notification). All
//! of them take the worker mutex, mutate the shared structure, and wake the
//! worker's poll loop.

use crate::server_event::ServerEvent;
use crate::subdoc::{JsonSubdocOperator, SubdocOperator};
use engine::{EngineResult, IoNotify};
use net::Waker;
use session::Session;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub(crate) struct PendingIo {
    pub token: usize,
    pub conn_id: u64,
    pub cookie_seq: u64,
    pub status: EngineResult<()>,
}

#[derive(Default)]
pub(crate) struct SharedInner {
    pub new_connections: VecDeque<Session>,
    pub pending_io: Vec<PendingIo>,
    pub server_events: Vec<(usize, u64, ServerEvent)>,
    pub notifications: Vec<(usize, u64)>,
}

pub(crate) struct WorkerShared {
    waker: Waker,
    inner: Mutex<SharedInner>,
    /// The sub-document operator instance shared by this worker's
    /// connections.
    pub operator: Arc<dyn SubdocOperator>,
}

impl WorkerShared {
    pub fn new(waker: Waker) -> Self {
        Self {
            waker,
            inner: Mutex::new(SharedInner::default()),
            operator: Arc::new(JsonSubdocOperator),
        }
    }

    pub fn wake(&self) {
        let _ = self.waker.wake();
    }

    pub fn send_connection(&self, session: Session) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.new_connections.push_back(session);
        }
        self.wake();
    }

    pub fn notify_io(&self, token: usize, conn_id: u64, cookie_seq: u64, status: EngineResult<()>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.pending_io.push(PendingIo { token, conn_id, cookie_seq, status });
        }
        self.wake();
    }

    pub fn send_server_event(&self, token: usize, conn_id: u64, event: ServerEvent) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.server_events.push((token, conn_id, event));
        }
        self.wake();
    }

    /// Ask the worker to re-drive a connection on its next tick.
    pub fn notify_connection(&self, token: usize, conn_id: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.notifications.push((token, conn_id));
        }
        self.wake();
    }

    /// Drain everything that has been queued. Called by the owning worker
    /// when its waker fires.
    pub fn take_all(&self) -> SharedInner {
        match self.inner.lock() {
            Ok(mut inner) => std::mem::take(&mut *inner),
            Err(_) => SharedInner::default(),
        }
    }
}

/// The engine-facing resumption token for one suspended cookie. The cookie
/// sequence number is validated on delivery so that a notify raced against
/// connection teardown (or a recycled slab slot) cannot touch the wrong
/// request.
pub(crate) struct CookieIoHandle {
    pub shared: Arc<WorkerShared>,
    pub token: usize,
    pub conn_id: u64,
    pub cookie_seq: u64,
}

impl IoNotify for CookieIoHandle {
    fn notify_io_complete(&self, status: EngineResult<()>) {
        self.shared
            .notify_io(self.token, self.conn_id, self.cookie_seq, status);
    }
}
