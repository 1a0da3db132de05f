// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::bucket::Bucket;
use crate::cluster::ClusterMap;
use crate::extauth::ExternalAuthManager;
use crate::notify::WorkerShared;
use crate::privileges::PrivilegeDb;
use crate::settings::Settings;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Process-wide state handed to every worker at startup. Hot paths take
/// immutable references; the few mutable pieces are atomics or behind their
/// own locks.
pub struct ServerContext {
    pub settings: Settings,
    buckets: Vec<Arc<Bucket>>,
    pub privileges: Arc<PrivilegeDb>,
    pub cluster: ClusterMap,
    pub extauth: Arc<ExternalAuthManager>,
    pub error_map: Arc<Vec<u8>>,
    connection_ids: AtomicU64,
    /// Connections which negotiated clustermap change notifications.
    ccn_subscribers: Mutex<Vec<(Arc<WorkerShared>, usize, u64)>>,
}

impl ServerContext {
    pub(crate) fn new(
        settings: Settings,
        buckets: Vec<Arc<Bucket>>,
        privileges: Arc<PrivilegeDb>,
        extauth: Arc<ExternalAuthManager>,
    ) -> Self {
        Self {
            settings,
            buckets,
            privileges,
            cluster: ClusterMap::new(),
            extauth,
            error_map: Arc::new(build_error_map()),
            connection_ids: AtomicU64::new(1),
            ccn_subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn next_connection_id(&self) -> u64 {
        self.connection_ids.fetch_add(1, Ordering::Relaxed)
    }

    /// Index 0 is the no-bucket placeholder.
    pub fn bucket(&self, index: usize) -> &Arc<Bucket> {
        self.buckets.get(index).unwrap_or(&self.buckets[0])
    }

    pub fn buckets(&self) -> &[Arc<Bucket>] {
        &self.buckets
    }

    pub fn find_bucket(&self, name: &str) -> Option<usize> {
        if name.is_empty() {
            return Some(0);
        }
        self.buckets
            .iter()
            .position(|bucket| bucket.name() == name)
    }

    pub(crate) fn subscribe_ccn(&self, worker: Arc<WorkerShared>, token: usize, conn_id: u64) {
        if let Ok(mut subscribers) = self.ccn_subscribers.lock() {
            subscribers.push((worker, token, conn_id));
        }
    }

    pub(crate) fn unsubscribe_ccn(&self, conn_id: u64) {
        if let Ok(mut subscribers) = self.ccn_subscribers.lock() {
            subscribers.retain(|(_, _, id)| *id != conn_id);
        }
    }

    pub(crate) fn ccn_subscribers(&self) -> Vec<(Arc<WorkerShared>, usize, u64)> {
        self.ccn_subscribers
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// The GetErrorMap payload: protocol status codes with names, built once at
/// startup.
fn build_error_map() -> Vec<u8> {
    let mut errors = serde_json::Map::new();
    for code in 0u16..=0x00ff {
        if let Ok(status) = protocol_mcbp::Status::try_from(code) {
            errors.insert(
                format!("{:x}", code),
                serde_json::json!({ "name": format!("{:?}", status) }),
            );
        }
    }
    serde_json::json!({
        "version": 1,
        "revision": 1,
        "errors": errors,
    })
    .to_string()
    .into_bytes()
}
