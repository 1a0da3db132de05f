// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

/// Revision used before any cluster map has been pushed. Dedup is disabled
/// while the revision is this value.
pub const CLUSTER_MAP_NO_REVISION: i64 = -1;

/// The current cluster configuration blob and its revision. Connections
/// remember the last revision they were sent so that repeated
/// not-my-vbucket responses can omit the (large) map body.
pub struct ClusterMap {
    revision: AtomicI64,
    payload: RwLock<Arc<Vec<u8>>>,
}

impl ClusterMap {
    pub fn new() -> Self {
        Self {
            revision: AtomicI64::new(CLUSTER_MAP_NO_REVISION),
            payload: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn revision(&self) -> i64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn get(&self) -> (i64, Arc<Vec<u8>>) {
        let payload = self
            .payload
            .read()
            .map(|p| p.clone())
            .unwrap_or_else(|_| Arc::new(Vec::new()));
        (self.revision(), payload)
    }

    pub fn set(&self, revision: i64, payload: Vec<u8>) {
        if let Ok(mut guard) = self.payload.write() {
            *guard = Arc::new(payload);
            self.revision.store(revision, Ordering::Release);
        }
    }
}

impl Default for ClusterMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_without_revision() {
        let map = ClusterMap::new();
        assert_eq!(map.revision(), CLUSTER_MAP_NO_REVISION);
        assert!(map.get().1.is_empty());
    }

    #[test]
    fn set_and_get() {
        let map = ClusterMap::new();
        map.set(7, b"{\"rev\":7}".to_vec());
        let (revision, payload) = map.get();
        assert_eq!(revision, 7);
        assert_eq!(&payload[..], b"{\"rev\":7}");
    }
}
