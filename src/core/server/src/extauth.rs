// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The external-authentication bridge. One connection in the process may
//! register as the authentication provider; SASL exchanges for external
//! users are serialized onto that connection as server events and the
//! responses are correlated back to the suspended originating request.
//!
//! Lock ordering: the provider's worker mutex is always taken BEFORE this
//! manager's mutex. Since callers arrive holding the manager mutex, it is
//! released around every touch of a provider's worker and re-acquired
//! afterwards.

use crate::notify::WorkerShared;
use crate::privileges::{Domain, PrivilegeDb, PrivilegeMask, UserEntry};
use crate::server_event::ServerEvent;
use engine::CookieIo;
use protocol_mcbp::Status;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// The provider connection's coordinates.
#[derive(Clone)]
pub(crate) struct ProviderHandle {
    pub worker: Arc<WorkerShared>,
    pub token: usize,
    pub conn_id: u64,
}

pub(crate) struct AuthResponsePayload {
    pub status: u16,
    pub payload: Vec<u8>,
}

/// Where a relayed SASL exchange parks while the provider round-trip is in
/// flight. The originating cookie suspends with ewouldblock; `notifier`
/// resumes it once `result` is populated.
pub(crate) struct AuthReplySlot {
    pub result: Mutex<Option<AuthResponsePayload>>,
    pub notifier: CookieIo,
}

pub(crate) struct AuthRequest {
    pub username: String,
    pub mechanism: String,
    pub challenge: Vec<u8>,
    pub step: bool,
    pub reply: Arc<AuthReplySlot>,
}

struct ManagerInner {
    providers: Vec<ProviderHandle>,
    pending_remove: Vec<ProviderHandle>,
    incoming_requests: VecDeque<AuthRequest>,
    incoming_responses: VecDeque<(u32, u16, Vec<u8>)>,
    /// opaque -> (provider conn id if dispatched, reply slot)
    request_map: HashMap<u32, (Option<u64>, Arc<AuthReplySlot>)>,
    /// monotonically allocated correlation ids
    next: u32,
    active_users: HashMap<String, usize>,
    users_dirty: bool,
}

pub struct ExternalAuthManager {
    inner: Mutex<ManagerInner>,
    condvar: Condvar,
    push_interval: Duration,
    running: AtomicBool,
}

const SERVICE_DOWN: &[u8] = br#"{"error":{"context":"External auth service is down"}}"#;

impl ExternalAuthManager {
    pub fn new(push_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(ManagerInner {
                providers: Vec::new(),
                pending_remove: Vec::new(),
                incoming_requests: VecDeque::new(),
                incoming_responses: VecDeque::new(),
                request_map: HashMap::new(),
                next: 0,
                active_users: HashMap::new(),
                users_dirty: false,
            }),
            condvar: Condvar::new(),
            push_interval,
            running: AtomicBool::new(true),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.inner.lock().map(|i| !i.providers.is_empty()).unwrap_or(false)
    }

    pub(crate) fn add_provider(&self, handle: ProviderHandle) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.providers.push(handle);
        }
        self.condvar.notify_all();
    }

    /// Called when a connection enters closing; a no-op unless it was a
    /// provider.
    pub(crate) fn remove_provider(&self, conn_id: u64) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(position) = inner.providers.iter().position(|p| p.conn_id == conn_id) {
                let handle = inner.providers.remove(position);
                inner.pending_remove.push(handle);
                self.condvar.notify_all();
            }
        }
    }

    pub(crate) fn enqueue_request(&self, request: AuthRequest) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.incoming_requests.push_back(request);
        }
        self.condvar.notify_all();
    }

    /// A response packet arrived on the provider connection.
    pub(crate) fn response_received(&self, opaque: u32, status: u16, payload: Vec<u8>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.incoming_responses.push_back((opaque, status, payload));
        }
        self.condvar.notify_all();
    }

    pub fn login(&self, user: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            *inner.active_users.entry(user.to_string()).or_insert(0) += 1;
            inner.users_dirty = true;
        }
    }

    pub fn logoff(&self, user: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            if let Some(count) = inner.active_users.get_mut(user) {
                *count -= 1;
                if *count == 0 {
                    inner.active_users.remove(user);
                }
            }
            inner.users_dirty = true;
        }
    }

    pub fn active_users_json(&self) -> serde_json::Value {
        match self.inner.lock() {
            Ok(inner) => {
                let mut users: Vec<&String> = inner.active_users.keys().collect();
                users.sort();
                serde_json::json!(users)
            }
            Err(_) => serde_json::json!([]),
        }
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        self.condvar.notify_all();
    }

    /// The manager thread body.
    pub fn run(&self, privileges: Arc<PrivilegeDb>) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let mut last_push = Instant::now();

        while self.running.load(Ordering::Acquire) {
            if guard.incoming_requests.is_empty()
                && guard.incoming_responses.is_empty()
                && guard.pending_remove.is_empty()
            {
                let elapsed = last_push.elapsed();
                let sleep = self.push_interval.saturating_sub(elapsed);
                let (g, _) = match self.condvar.wait_timeout(guard, sleep) {
                    Ok(result) => result,
                    Err(_) => return,
                };
                guard = g;
                if !self.running.load(Ordering::Acquire) {
                    return;
                }
            }

            guard = self.purge_dead_providers(guard);

            if !guard.incoming_requests.is_empty() {
                guard = self.process_request_queue(guard);
            }

            if !guard.incoming_responses.is_empty() {
                guard = self.process_response_queue(guard, &privileges);
            }

            if last_push.elapsed() >= self.push_interval {
                guard = self.push_active_users(guard);
                last_push = Instant::now();
            }
        }
    }

    fn fail_request(inner: &mut ManagerInner, reply: Arc<AuthReplySlot>) {
        let opaque = inner.next;
        inner.next = inner.next.wrapping_add(1);
        inner
            .incoming_responses
            .push_back((opaque, Status::Einternal as u16, SERVICE_DOWN.to_vec()));
        inner.request_map.insert(opaque, (None, reply));
    }

    fn process_request_queue<'a>(
        &'a self,
        mut guard: MutexGuard<'a, ManagerInner>,
    ) -> MutexGuard<'a, ManagerInner> {
        if guard.providers.is_empty() {
            // no provider: fail everything that is queued
            while let Some(request) = guard.incoming_requests.pop_front() {
                warn!(
                    "no authentication provider for external user [{}]",
                    request.username
                );
                Self::fail_request(&mut guard, request.reply);
            }
            return guard;
        }

        let provider = guard.providers[0].clone();
        let mut events = Vec::new();
        while let Some(request) = guard.incoming_requests.pop_front() {
            let id = guard.next;
            guard.next = guard.next.wrapping_add(1);
            let payload = serde_json::json!({
                "mechanism": request.mechanism,
                "challenge": base64_encode(&request.challenge),
                "step": request.step,
            });
            events.push(ServerEvent::Authenticate {
                id,
                payload: payload.to_string().into_bytes(),
            });
            guard
                .request_map
                .insert(id, (Some(provider.conn_id), request.reply));
        }

        // release our mutex before taking the provider's worker mutex
        drop(guard);
        for event in events {
            provider
                .worker
                .send_server_event(provider.token, provider.conn_id, event);
        }

        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn process_response_queue<'a>(
        &'a self,
        mut guard: MutexGuard<'a, ManagerInner>,
        privileges: &Arc<PrivilegeDb>,
    ) -> MutexGuard<'a, ManagerInner> {
        while let Some((opaque, status, payload)) = guard.incoming_responses.pop_front() {
            let entry = match guard.request_map.remove(&opaque) {
                Some(entry) => entry,
                None => {
                    warn!("ignoring auth response with unknown opaque: {}", opaque);
                    continue;
                }
            };

            // keep the rbac database in sync before the client retries
            if Status::try_from(status) == Ok(Status::Success) {
                sync_external_user(privileges, &payload);
            }

            let (_, reply) = entry;
            if let Ok(mut slot) = reply.result.lock() {
                *slot = Some(AuthResponsePayload { status, payload });
            }
            // resume the originating request outside our own mutex
            drop(guard);
            reply.notifier.notify_io_complete(Ok(()));
            guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        }
        guard
    }

    fn purge_dead_providers<'a>(
        &'a self,
        mut guard: MutexGuard<'a, ManagerInner>,
    ) -> MutexGuard<'a, ManagerInner> {
        let pending = std::mem::take(&mut guard.pending_remove);
        for provider in pending {
            warn!("authentication provider disconnected; failing outstanding requests");
            let orphaned: Vec<u32> = guard
                .request_map
                .iter()
                .filter(|(_, (conn, _))| *conn == Some(provider.conn_id))
                .map(|(opaque, _)| *opaque)
                .collect();
            for opaque in orphaned {
                if let Some(entry) = guard.request_map.get_mut(&opaque) {
                    entry.0 = None;
                }
                guard
                    .incoming_responses
                    .push_back((opaque, Status::Einternal as u16, SERVICE_DOWN.to_vec()));
            }

            // let the provider's connection finish closing
            drop(guard);
            provider
                .worker
                .notify_connection(provider.token, provider.conn_id);
            guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        }
        guard
    }

    fn push_active_users<'a>(
        &'a self,
        mut guard: MutexGuard<'a, ManagerInner>,
    ) -> MutexGuard<'a, ManagerInner> {
        if guard.providers.is_empty() || !guard.users_dirty {
            return guard;
        }
        guard.users_dirty = false;

        let mut users: Vec<String> = guard.active_users.keys().cloned().collect();
        users.sort();
        let payload = serde_json::json!(users).to_string().into_bytes();
        let provider = guard.providers[0].clone();

        drop(guard);
        provider.worker.send_server_event(
            provider.token,
            provider.conn_id,
            ServerEvent::ActiveExternalUsers { payload },
        );
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An authentication response may carry a replacement rbac entry for the
/// user: `{"rbac": {"username": {...}}}`.
fn sync_external_user(privileges: &Arc<PrivilegeDb>, payload: &[u8]) {
    let decoded: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(decoded) => decoded,
        Err(_) => return,
    };
    let rbac = match decoded.get("rbac").and_then(|r| r.as_object()) {
        Some(rbac) => rbac,
        None => return,
    };
    for (username, _entry) in rbac {
        let mut buckets = std::collections::HashMap::new();
        buckets.insert("*".to_string(), PrivilegeMask::FULL);
        privileges.update_external_user(
            username,
            UserEntry {
                password: None,
                domain: Domain::External,
                buckets,
                global: PrivilegeMask::NONE,
            },
        );
    }
}

fn base64_encode(input: &[u8]) -> String {
    const TABLE: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity((input.len() + 2) / 3 * 4);
    for chunk in input.chunks(3) {
        let b = [
            chunk[0],
            chunk.get(1).copied().unwrap_or(0),
            chunk.get(2).copied().unwrap_or(0),
        ];
        out.push(TABLE[(b[0] >> 2) as usize] as char);
        out.push(TABLE[(((b[0] & 0x03) << 4) | (b[1] >> 4)) as usize] as char);
        if chunk.len() > 1 {
            out.push(TABLE[(((b[1] & 0x0f) << 2) | (b[2] >> 6)) as usize] as char);
        } else {
            out.push('=');
        }
        if chunk.len() > 2 {
            out.push(TABLE[(b[2] & 0x3f) as usize] as char);
        } else {
            out.push('=');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{EngineResult, IoNotify};

    #[test]
    fn base64() {
        assert_eq!(base64_encode(b""), "");
        assert_eq!(base64_encode(b"f"), "Zg==");
        assert_eq!(base64_encode(b"fo"), "Zm8=");
        assert_eq!(base64_encode(b"foo"), "Zm9v");
        assert_eq!(base64_encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn active_users_refcounted() {
        let manager = ExternalAuthManager::new(Duration::from_secs(300));
        manager.login("joe");
        manager.login("joe");
        manager.login("ann");
        assert_eq!(manager.active_users_json(), serde_json::json!(["ann", "joe"]));
        manager.logoff("joe");
        assert_eq!(manager.active_users_json(), serde_json::json!(["ann", "joe"]));
        manager.logoff("joe");
        assert_eq!(manager.active_users_json(), serde_json::json!(["ann"]));
    }

    struct RecordingNotify {
        hits: Mutex<Vec<EngineResult<()>>>,
    }

    impl IoNotify for RecordingNotify {
        fn notify_io_complete(&self, status: EngineResult<()>) {
            if let Ok(mut hits) = self.hits.lock() {
                hits.push(status);
            }
        }
    }

    #[test]
    fn requests_fail_without_provider() {
        let manager = Arc::new(ExternalAuthManager::new(Duration::from_millis(50)));
        let privileges = Arc::new(PrivilegeDb::with_default_user());

        let notify = Arc::new(RecordingNotify { hits: Mutex::new(Vec::new()) });
        let reply = Arc::new(AuthReplySlot {
            result: Mutex::new(None),
            notifier: notify.clone(),
        });

        manager.enqueue_request(AuthRequest {
            username: "joe".to_string(),
            mechanism: "PLAIN".to_string(),
            challenge: b"\0joe\0pw".to_vec(),
            step: false,
            reply: reply.clone(),
        });

        let thread = {
            let manager = manager.clone();
            std::thread::spawn(move || manager.run(privileges))
        };

        // the manager thread fails the request and resumes the cookie
        for _ in 0..100 {
            if reply.result.lock().map(|r| r.is_some()).unwrap_or(false) {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }

        manager.shutdown();
        let _ = thread.join();

        let result = reply.result.lock().map(|mut r| r.take()).ok().flatten();
        let result = result.expect("request should have been failed");
        assert_eq!(result.status, Status::Einternal as u16);
        assert_eq!(result.payload, SERVICE_DOWN);
        assert_eq!(notify.hits.lock().map(|h| h.len()).unwrap_or(0), 1);
    }
}
