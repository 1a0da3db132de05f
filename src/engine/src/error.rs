// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use thiserror::Error;

/// Status codes an engine may return. `WouldBlock` is the cooperative
/// suspension signal and `Disconnect` unconditionally tears the connection
/// down; everything else maps onto a protocol status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("key not found")]
    KeyNotFound,
    #[error("key exists")]
    KeyExists,
    #[error("value too big")]
    TooBig,
    #[error("invalid arguments")]
    Invalid,
    #[error("not stored")]
    NotStored,
    #[error("bad value for delta operation")]
    DeltaBadval,
    #[error("not my vbucket")]
    NotMyVbucket,
    #[error("no bucket selected")]
    NoBucket,
    #[error("document is locked")]
    Locked,
    #[error("document is locked, retryable")]
    LockedTmpfail,
    #[error("authentication context is stale")]
    AuthStale,
    #[error("out of range")]
    Erange,
    #[error("rollback required")]
    Rollback,
    #[error("access denied")]
    Eaccess,
    #[error("out of memory")]
    OutOfMemory,
    #[error("not supported")]
    NotSupported,
    #[error("internal error")]
    Internal,
    #[error("busy")]
    Busy,
    #[error("temporary failure")]
    TempFail,
    #[error("unknown collection")]
    UnknownCollection,
    #[error("durability level invalid")]
    DurabilityInvalidLevel,
    #[error("durability requirement impossible")]
    DurabilityImpossible,
    #[error("sync write in progress")]
    SyncWriteInProgress,
    #[error("sync write ambiguous")]
    SyncWriteAmbiguous,
    #[error("sync write re-commit in progress")]
    SyncWriteReCommitInProgress,
    #[error("dcp stream id invalid")]
    DcpStreamIdInvalid,
    #[error("predicate failed")]
    PredicateFailed,
    #[error("operation would block")]
    WouldBlock,
    #[error("disconnect the client")]
    Disconnect,
    #[error("generic failure")]
    Failed,
}

pub type EngineResult<T> = Result<T, EngineError>;
