// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The storage-engine seam. The server core drives engines exclusively
//! through the traits in this crate; an engine which cannot complete a call
//! synchronously returns `EngineError::WouldBlock` and later resumes the
//! request through the `IoNotify` handle it was given.

mod dcp;
mod error;
mod item;
pub mod memory;

pub use dcp::*;
pub use error::*;
pub use item::*;

use std::sync::Arc;

/// Resumption handle for a suspended request. Engines clone this when they
/// return `WouldBlock` and invoke it exactly once from whatever thread
/// completes the background work.
pub trait IoNotify: Send + Sync {
    fn notify_io_complete(&self, status: EngineResult<()>);
}

pub type CookieIo = Arc<dyn IoNotify>;

/// How a store call resolves an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreSemantics {
    /// Store only if the key does not exist.
    Add,
    /// Store unconditionally.
    Set,
    /// Store only if the key exists.
    Replace,
    /// Store only if the CAS matches the provided value.
    Cas,
}

/// Filter for fetches which may want to see deleted documents (whose
/// extended attributes outlive the body).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStateFilter {
    Alive,
    AliveOrDeleted,
}

/// The state a mutation leaves the document in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocState {
    Alive,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationDescr {
    pub vbucket_uuid: u64,
    pub seqno: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreResult {
    pub cas: u64,
    pub mutation: MutationDescr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurabilityRequirement {
    pub level: protocol_mcbp::DurabilityLevel,
    pub timeout_ms: Option<u16>,
}

/// Parameters for the increment/decrement commands.
#[derive(Debug, Clone, Copy)]
pub struct ArithmeticArgs {
    /// Signed so that decrement is a negative delta.
    pub delta: i64,
    pub initial: u64,
    /// `0xffff_ffff` means "do not create on miss".
    pub expiry: u32,
}

pub trait KvEngine: Send + Sync {
    fn get(
        &self,
        cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        filter: DocStateFilter,
    ) -> EngineResult<Item>;

    fn get_locked(
        &self,
        cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        lock_seconds: u32,
    ) -> EngineResult<Item>;

    fn unlock(&self, cookie: &CookieIo, key: &[u8], vbucket: u16, cas: u64) -> EngineResult<()>;

    /// Store `item`. `cas` of zero means "no CAS check" for Set/Replace;
    /// `StoreSemantics::Cas` requires a non-zero value.
    fn store(
        &self,
        cookie: &CookieIo,
        item: &Item,
        cas: u64,
        semantics: StoreSemantics,
        durability: Option<DurabilityRequirement>,
        document_state: DocState,
    ) -> EngineResult<StoreResult>;

    fn remove(
        &self,
        cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        cas: u64,
        durability: Option<DurabilityRequirement>,
    ) -> EngineResult<StoreResult>;

    /// Returns the post-operation counter value along with the mutation
    /// result.
    fn arithmetic(
        &self,
        cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        args: ArithmeticArgs,
    ) -> EngineResult<(u64, StoreResult)>;

    fn touch(&self, cookie: &CookieIo, key: &[u8], vbucket: u16, expiry: u32)
        -> EngineResult<Item>;

    fn flush(&self, cookie: &CookieIo) -> EngineResult<()>;

    fn vbucket_uuid(&self, vbucket: u16) -> EngineResult<u64>;

    /// Open a DCP connection against this engine. `None` from an engine
    /// without replication support.
    fn dcp_open(
        &self,
        cookie: &CookieIo,
        flags: u32,
        name: &[u8],
    ) -> EngineResult<Box<dyn DcpConnection>>;
}
