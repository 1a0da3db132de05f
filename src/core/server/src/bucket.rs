// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::timings::CommandTimings;
use engine::{CookieIo, DcpConnection, DocState, DocStateFilter, EngineError, EngineResult, Item,
    KvEngine, StoreResult, StoreSemantics};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BucketState {
    Creating = 0,
    Ready = 1,
    Stopping = 2,
    Destroying = 3,
}

impl From<u8> for BucketState {
    fn from(value: u8) -> Self {
        match value {
            0 => BucketState::Creating,
            1 => BucketState::Ready,
            2 => BucketState::Stopping,
            _ => BucketState::Destroying,
        }
    }
}

/// A named engine instance plus its observability state. Index 0 of the
/// process-wide bucket array is the "no bucket" placeholder whose engine
/// fails every call.
pub struct Bucket {
    name: String,
    state: AtomicU8,
    engine: Arc<dyn KvEngine>,
    pub timings: CommandTimings,
    /// responses sent, indexed by the low byte of the status code
    response_counters: [AtomicU64; 256],
}

impl Bucket {
    pub fn new(name: &str, engine: Arc<dyn KvEngine>) -> Self {
        Self {
            name: name.to_string(),
            state: AtomicU8::new(BucketState::Creating as u8),
            engine,
            timings: CommandTimings::new(),
            response_counters: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// The no-bucket placeholder.
    pub fn no_bucket() -> Self {
        let bucket = Self::new("", Arc::new(NoBucketEngine));
        bucket.set_state(BucketState::Ready);
        bucket
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_no_bucket(&self) -> bool {
        self.name.is_empty()
    }

    pub fn engine(&self) -> &Arc<dyn KvEngine> {
        &self.engine
    }

    // single-byte atomic; readers tolerate racing a lifecycle transition
    pub fn state(&self) -> BucketState {
        BucketState::from(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: BucketState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub fn count_response(&self, status: u16) {
        self.response_counters[(status & 0xff) as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn response_count(&self, status: u16) -> u64 {
        self.response_counters[(status & 0xff) as usize].load(Ordering::Relaxed)
    }
}

/// The engine backing the no-bucket slot.
struct NoBucketEngine;

impl KvEngine for NoBucketEngine {
    fn get(
        &self,
        _cookie: &CookieIo,
        _key: &[u8],
        _vbucket: u16,
        _filter: DocStateFilter,
    ) -> EngineResult<Item> {
        Err(EngineError::NoBucket)
    }

    fn get_locked(
        &self,
        _cookie: &CookieIo,
        _key: &[u8],
        _vbucket: u16,
        _lock_seconds: u32,
    ) -> EngineResult<Item> {
        Err(EngineError::NoBucket)
    }

    fn unlock(&self, _cookie: &CookieIo, _key: &[u8], _vbucket: u16, _cas: u64) -> EngineResult<()> {
        Err(EngineError::NoBucket)
    }

    fn store(
        &self,
        _cookie: &CookieIo,
        _item: &Item,
        _cas: u64,
        _semantics: StoreSemantics,
        _durability: Option<engine::DurabilityRequirement>,
        _document_state: DocState,
    ) -> EngineResult<StoreResult> {
        Err(EngineError::NoBucket)
    }

    fn remove(
        &self,
        _cookie: &CookieIo,
        _key: &[u8],
        _vbucket: u16,
        _cas: u64,
        _durability: Option<engine::DurabilityRequirement>,
    ) -> EngineResult<StoreResult> {
        Err(EngineError::NoBucket)
    }

    fn arithmetic(
        &self,
        _cookie: &CookieIo,
        _key: &[u8],
        _vbucket: u16,
        _args: engine::ArithmeticArgs,
    ) -> EngineResult<(u64, StoreResult)> {
        Err(EngineError::NoBucket)
    }

    fn touch(
        &self,
        _cookie: &CookieIo,
        _key: &[u8],
        _vbucket: u16,
        _expiry: u32,
    ) -> EngineResult<Item> {
        Err(EngineError::NoBucket)
    }

    fn flush(&self, _cookie: &CookieIo) -> EngineResult<()> {
        Err(EngineError::NoBucket)
    }

    fn vbucket_uuid(&self, _vbucket: u16) -> EngineResult<u64> {
        Err(EngineError::NoBucket)
    }

    fn dcp_open(
        &self,
        _cookie: &CookieIo,
        _flags: u32,
        _name: &[u8],
    ) -> EngineResult<Box<dyn DcpConnection>> {
        Err(EngineError::NoBucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_bucket_engine_rejects_everything() {
        let bucket = Bucket::no_bucket();
        assert!(bucket.is_no_bucket());
        assert_eq!(bucket.state(), BucketState::Ready);

        struct Noop;
        impl engine::IoNotify for Noop {
            fn notify_io_complete(&self, _status: EngineResult<()>) {}
        }
        let cookie: CookieIo = Arc::new(Noop);
        assert_eq!(
            bucket
                .engine()
                .get(&cookie, b"k", 0, DocStateFilter::Alive)
                .unwrap_err(),
            EngineError::NoBucket
        );
    }

    #[test]
    fn response_counters() {
        let bucket = Bucket::no_bucket();
        bucket.count_response(0x00);
        bucket.count_response(0x00);
        bucket.count_response(0x01);
        assert_eq!(bucket.response_count(0x00), 2);
        assert_eq!(bucket.response_count(0x01), 1);
    }
}
