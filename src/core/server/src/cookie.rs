// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use engine::{DurabilityRequirement, EngineError, EngineResult};
use protocol_mcbp::*;
use std::any::Any;
use std::time::Instant;

/// Per-request state: the packet, the async-I/O status used across
/// engine-induced suspensions, error context destined for the client, and
/// the executor's own resumable context. A cookie lives from the moment a
/// complete packet has been assembled until its response bytes have been
/// moved into the session's send pipeline.
pub(crate) struct Cookie {
    pub seq: u64,
    packet: OwnedPacket,
    /// Status stored by `notify_io_complete`, consumed on re-entry.
    pub aiostat: EngineResult<()>,
    pub ewouldblock: bool,
    /// Set when the request carried the Reorder frame info.
    pub reorder: bool,
    pub durability: Option<DurabilityRequirement>,
    pub stream_id: Option<u16>,
    pub tracing_context: Option<Vec<u8>>,
    /// CAS to return in the response.
    pub cas: u64,
    error_context: Option<String>,
    event_id: Option<String>,
    context: Option<Box<dyn Any + Send>>,
    /// Buffered response bytes; moved to the session in cookie-creation
    /// order (or immediately when reordering applies).
    pub response: Vec<u8>,
    pub response_complete: bool,
    pub started: Instant,
    refcount: u8,
}

impl Cookie {
    pub fn new(seq: u64, packet: OwnedPacket) -> Self {
        Self {
            seq,
            packet,
            aiostat: Ok(()),
            ewouldblock: false,
            reorder: false,
            durability: None,
            stream_id: None,
            tracing_context: None,
            cas: 0,
            error_context: None,
            event_id: None,
            context: None,
            response: Vec::new(),
            response_complete: false,
            started: Instant::now(),
            refcount: 0,
        }
    }

    pub fn request(&self) -> PacketRef<'_> {
        self.packet.as_ref()
    }

    pub fn header(&self) -> PacketHeader {
        self.packet.header()
    }

    pub fn opaque(&self) -> u32 {
        self.packet.header().opaque
    }

    pub fn opcode(&self) -> Result<Opcode, u8> {
        Opcode::try_from(self.packet.header().opcode)
    }

    /// Replace-and-return the async status stored by the engine callback.
    pub fn swap_aiostat(&mut self) -> EngineResult<()> {
        std::mem::replace(&mut self.aiostat, Ok(()))
    }

    pub fn reserve(&mut self) {
        self.refcount += 1;
    }

    pub fn release(&mut self) {
        self.refcount = self.refcount.saturating_sub(1);
    }

    pub fn is_reserved(&self) -> bool {
        self.refcount > 0
    }

    /// Fetch the executor's resumable context, constructing it on first
    /// use. A context of a different type (left over from an earlier
    /// opcode on a recycled cookie) is discarded.
    pub fn obtain_context<T: Any + Send, F: FnOnce() -> T>(&mut self, init: F) -> &mut T {
        let matches = self
            .context
            .as_ref()
            .map(|c| c.is::<T>())
            .unwrap_or(false);
        if !matches {
            self.context = Some(Box::new(init()));
        }
        match self.context.as_mut().and_then(|c| c.downcast_mut::<T>()) {
            Some(context) => context,
            None => unreachable!("command context type confusion"),
        }
    }

    /// Remove and return the context when it holds a `T`. Executors take
    /// their context out, run, and store it back if they suspend; this
    /// keeps the borrow on the cookie short.
    pub fn take_context<T: Any + Send>(&mut self) -> Option<T> {
        let matches = self
            .context
            .as_ref()
            .map(|c| c.is::<T>())
            .unwrap_or(false);
        if !matches {
            return None;
        }
        self.context
            .take()
            .and_then(|c| c.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn store_context<T: Any + Send>(&mut self, context: T) {
        self.context = Some(Box::new(context));
    }

    pub fn clear_context(&mut self) {
        self.context = None;
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn set_error_context(&mut self, message: impl Into<String>) {
        self.error_context = Some(message.into());
    }

    pub fn error_context(&self) -> Option<&str> {
        self.error_context.as_deref()
    }

    /// Assign (once) a correlation id for log messages about this request.
    pub fn ensure_event_id(&mut self) -> &str {
        if self.event_id.is_none() {
            self.event_id = Some(uuid::Uuid::new_v4().to_string());
        }
        match self.event_id.as_deref() {
            Some(id) => id,
            None => unreachable!(),
        }
    }

    /// The optional `{"error": {...}}` value body for failure responses.
    pub fn error_json(&self) -> Option<Vec<u8>> {
        if self.error_context.is_none() && self.event_id.is_none() {
            return None;
        }
        let mut error = serde_json::Map::new();
        if let Some(context) = &self.error_context {
            error.insert("context".to_string(), serde_json::json!(context));
        }
        if let Some(id) = &self.event_id {
            error.insert("ref".to_string(), serde_json::json!(id));
        }
        Some(
            serde_json::json!({ "error": error })
                .to_string()
                .into_bytes(),
        )
    }

    /// Debug snapshot used by diagnostics and by the exception handler at
    /// the FSM boundary.
    pub fn to_json(&self) -> serde_json::Value {
        let header = self.packet.header();
        serde_json::json!({
            "opcode": header.opcode,
            "opaque": header.opaque,
            "cas": header.cas,
            "ewouldblock": self.ewouldblock,
            "reorder": self.reorder,
            "refcount": self.refcount,
            "complete": self.response_complete,
            "error_context": self.error_context,
            "event_id": self.event_id,
        })
    }
}

/// Map an engine status onto the protocol status that goes in a response
/// header. `WouldBlock` and `Disconnect` never reach this table.
pub(crate) fn status_for_engine_error(error: EngineError) -> Status {
    match error {
        EngineError::KeyNotFound => Status::KeyEnoent,
        EngineError::KeyExists => Status::KeyEexists,
        EngineError::TooBig => Status::E2big,
        EngineError::Invalid => Status::Einval,
        EngineError::NotStored => Status::NotStored,
        EngineError::DeltaBadval => Status::DeltaBadval,
        EngineError::NotMyVbucket => Status::NotMyVbucket,
        EngineError::NoBucket => Status::NoBucket,
        EngineError::Locked => Status::Locked,
        EngineError::LockedTmpfail => Status::Etmpfail,
        EngineError::AuthStale => Status::AuthStale,
        EngineError::Erange => Status::Erange,
        EngineError::Rollback => Status::Rollback,
        EngineError::Eaccess => Status::Eaccess,
        EngineError::OutOfMemory => Status::Enomem,
        EngineError::NotSupported => Status::NotSupported,
        EngineError::Internal => Status::Einternal,
        EngineError::Busy => Status::Ebusy,
        EngineError::TempFail => Status::Etmpfail,
        EngineError::UnknownCollection => Status::UnknownCollection,
        EngineError::DurabilityInvalidLevel => Status::DurabilityInvalidLevel,
        EngineError::DurabilityImpossible => Status::DurabilityImpossible,
        EngineError::SyncWriteInProgress => Status::SyncWriteInProgress,
        EngineError::SyncWriteAmbiguous => Status::SyncWriteAmbiguous,
        EngineError::SyncWriteReCommitInProgress => Status::SyncWriteReCommitInProgress,
        EngineError::DcpStreamIdInvalid => Status::DcpStreamIdInvalid,
        EngineError::PredicateFailed => Status::Einternal,
        EngineError::Failed => Status::Einternal,
        EngineError::WouldBlock | EngineError::Disconnect => Status::Einternal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie() -> Cookie {
        let mut wire = Vec::new();
        PacketHeader {
            magic: Magic::ClientRequest,
            opcode: Opcode::Get as u8,
            framing_extras_len: 0,
            key_len: 1,
            extras_len: 0,
            datatype: Datatype::RAW,
            vbucket_or_status: 0,
            body_len: 1,
            opaque: 0x42,
            cas: 0,
        }
        .compose(&mut wire);
        wire.push(b'k');
        Cookie::new(1, OwnedPacket::from_wire(wire).unwrap())
    }

    #[test]
    fn context_replaced_on_type_change() {
        let mut cookie = cookie();
        *cookie.obtain_context(|| 1u32) = 7;
        assert_eq!(*cookie.obtain_context(|| 2u32), 7);
        // different type: prior context is dropped
        assert_eq!(*cookie.obtain_context(|| "fresh".to_string()), "fresh");
    }

    #[test]
    fn aiostat_swap() {
        let mut cookie = cookie();
        cookie.aiostat = Err(EngineError::KeyNotFound);
        assert_eq!(cookie.swap_aiostat(), Err(EngineError::KeyNotFound));
        assert_eq!(cookie.swap_aiostat(), Ok(()));
    }

    #[test]
    fn error_json_shape() {
        let mut cookie = cookie();
        assert!(cookie.error_json().is_none());
        cookie.set_error_context("bad things");
        cookie.ensure_event_id();
        let value: serde_json::Value =
            serde_json::from_slice(&cookie.error_json().unwrap()).unwrap();
        assert_eq!(value["error"]["context"], "bad things");
        assert!(value["error"]["ref"].is_string());
    }

    #[test]
    fn event_id_stable() {
        let mut cookie = cookie();
        let first = cookie.ensure_event_id().to_string();
        assert_eq!(cookie.ensure_event_id(), first);
    }
}
