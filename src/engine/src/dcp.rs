// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;

/// DCP open flags (a subset of the wire-defined bits).
pub const DCP_OPEN_PRODUCER: u32 = 0x01;
pub const DCP_OPEN_INCLUDE_XATTRS: u32 = 0x04;
pub const DCP_OPEN_NO_VALUE: u32 = 0x08;

/// The serialization side of the DCP producer: the engine calls back into
/// one of these methods from `step()` to emit at most one message. The
/// implementation formats the message into the connection's send pipeline,
/// chaining item values from engine-owned storage.
pub trait DcpMessageProducers {
    #[allow(clippy::too_many_arguments)]
    fn mutation(
        &mut self,
        opaque: u32,
        item: &Item,
        vbucket: u16,
        by_seqno: u64,
        rev_seqno: u64,
        lock_time: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()>;

    fn deletion(
        &mut self,
        opaque: u32,
        item: &Item,
        vbucket: u16,
        by_seqno: u64,
        rev_seqno: u64,
        delete_time: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()>;

    fn expiration(
        &mut self,
        opaque: u32,
        item: &Item,
        vbucket: u16,
        by_seqno: u64,
        rev_seqno: u64,
        delete_time: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()>;

    fn snapshot_marker(
        &mut self,
        opaque: u32,
        vbucket: u16,
        start_seqno: u64,
        end_seqno: u64,
        flags: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()>;

    fn stream_end(
        &mut self,
        opaque: u32,
        vbucket: u16,
        flags: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()>;

    fn set_vbucket_state(&mut self, opaque: u32, vbucket: u16, state: u8) -> EngineResult<()>;

    fn noop(&mut self, opaque: u32) -> EngineResult<()>;

    fn buffer_acknowledgement(
        &mut self,
        opaque: u32,
        vbucket: u16,
        buffer_bytes: u32,
    ) -> EngineResult<()>;

    fn control(&mut self, opaque: u32, key: &[u8], value: &[u8]) -> EngineResult<()>;

    fn system_event(
        &mut self,
        opaque: u32,
        vbucket: u16,
        event: u32,
        by_seqno: u64,
        key: &[u8],
        data: &[u8],
    ) -> EngineResult<()>;

    #[allow(clippy::too_many_arguments)]
    fn prepare(
        &mut self,
        opaque: u32,
        item: &Item,
        vbucket: u16,
        by_seqno: u64,
        rev_seqno: u64,
        durability_level: u8,
        stream_id: Option<u16>,
    ) -> EngineResult<()>;

    fn commit(
        &mut self,
        opaque: u32,
        vbucket: u16,
        key: &[u8],
        prepared_seqno: u64,
        commit_seqno: u64,
    ) -> EngineResult<()>;

    fn abort(
        &mut self,
        opaque: u32,
        vbucket: u16,
        key: &[u8],
        prepared_seqno: u64,
        abort_seqno: u64,
    ) -> EngineResult<()>;

    fn seqno_acknowledged(
        &mut self,
        opaque: u32,
        vbucket: u16,
        prepared_seqno: u64,
    ) -> EngineResult<()>;
}

/// A response received on a DCP connection (the consumer direction of the
/// full-duplex dialog), handed back to the engine.
#[derive(Debug, Clone, Copy)]
pub struct DcpResponse {
    pub opcode: u8,
    pub status: u16,
    pub opaque: u32,
}

/// Per-connection DCP state. Owned by the connection which performed the
/// DCP open, honoring the single-owner model.
pub trait DcpConnection: Send {
    fn is_producer(&self) -> bool;

    /// Emit at most one message through `producers`. `Ok(())` means a
    /// message was produced and more may follow; `Err(WouldBlock)` parks
    /// the connection until the engine notifies.
    fn step(&mut self, producers: &mut dyn DcpMessageProducers) -> EngineResult<()>;

    #[allow(clippy::too_many_arguments)]
    fn stream_req(
        &mut self,
        opaque: u32,
        vbucket: u16,
        flags: u32,
        start_seqno: u64,
        end_seqno: u64,
        vbucket_uuid: u64,
        snap_start: u64,
        snap_end: u64,
    ) -> EngineResult<Vec<(u64, u64)>>;

    fn close_stream(&mut self, opaque: u32, vbucket: u16, stream_id: Option<u16>)
        -> EngineResult<()>;

    fn get_failover_log(&mut self, opaque: u32, vbucket: u16) -> EngineResult<Vec<(u64, u64)>>;

    fn buffer_acknowledgement(
        &mut self,
        opaque: u32,
        vbucket: u16,
        buffer_bytes: u32,
    ) -> EngineResult<()>;

    fn control(&mut self, opaque: u32, key: &[u8], value: &[u8]) -> EngineResult<()>;

    fn noop(&mut self, opaque: u32) -> EngineResult<()>;

    /// An ack from the peer, parsed off the wire by the frontend.
    fn response(&mut self, response: DcpResponse) -> EngineResult<()>;
}
