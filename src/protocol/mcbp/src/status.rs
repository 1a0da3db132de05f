// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use core::fmt::{Display, Formatter};

/// Response status codes. The numbering is part of the wire contract and is
/// reproduced from the protocol definition; new codes may only be appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    Success = 0x00,
    KeyEnoent = 0x01,
    KeyEexists = 0x02,
    E2big = 0x03,
    Einval = 0x04,
    NotStored = 0x05,
    DeltaBadval = 0x06,
    NotMyVbucket = 0x07,
    NoBucket = 0x08,
    Locked = 0x09,
    AuthStale = 0x1f,
    AuthError = 0x20,
    AuthContinue = 0x21,
    Erange = 0x22,
    Rollback = 0x23,
    Eaccess = 0x24,
    NotInitialized = 0x25,
    UnknownFrameInfo = 0x26,
    UnknownCommand = 0x81,
    Enomem = 0x82,
    NotSupported = 0x83,
    Einternal = 0x84,
    Ebusy = 0x85,
    Etmpfail = 0x86,
    UnknownCollection = 0x88,
    DcpStreamIdInvalid = 0x8d,
    DurabilityInvalidLevel = 0xa0,
    DurabilityImpossible = 0xa1,
    SyncWriteInProgress = 0xa2,
    SyncWriteAmbiguous = 0xa3,
    SyncWriteReCommitInProgress = 0xa4,
    SubdocPathEnoent = 0xc0,
    SubdocPathMismatch = 0xc1,
    SubdocPathEinval = 0xc2,
    SubdocPathE2big = 0xc3,
    SubdocDocE2deep = 0xc4,
    SubdocValueCantinsert = 0xc5,
    SubdocDocNotJson = 0xc6,
    SubdocNumErange = 0xc7,
    SubdocDeltaEinval = 0xc8,
    SubdocPathEexists = 0xc9,
    SubdocValueEtoodeep = 0xca,
    SubdocInvalidCombo = 0xcb,
    SubdocMultiPathFailure = 0xcc,
    SubdocSuccessDeleted = 0xcd,
    SubdocXattrInvalidFlagCombo = 0xce,
    SubdocXattrInvalidKeyCombo = 0xcf,
    SubdocXattrUnknownMacro = 0xd0,
    SubdocXattrUnknownVattr = 0xd1,
    SubdocXattrCantModifyVattr = 0xd2,
    SubdocMultiPathFailureDeleted = 0xd3,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success | Status::SubdocSuccessDeleted)
    }

    /// Statuses for which a per-request error-info JSON object must not be
    /// attached to the response value (their bodies have other meanings).
    pub fn suppresses_error_json(self) -> bool {
        matches!(
            self,
            Status::Success
                | Status::SubdocSuccessDeleted
                | Status::SubdocMultiPathFailure
                | Status::Rollback
                | Status::NotMyVbucket
        )
    }
}

impl TryFrom<u16> for Status {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        use Status::*;
        Ok(match value {
            0x00 => Success,
            0x01 => KeyEnoent,
            0x02 => KeyEexists,
            0x03 => E2big,
            0x04 => Einval,
            0x05 => NotStored,
            0x06 => DeltaBadval,
            0x07 => NotMyVbucket,
            0x08 => NoBucket,
            0x09 => Locked,
            0x1f => AuthStale,
            0x20 => AuthError,
            0x21 => AuthContinue,
            0x22 => Erange,
            0x23 => Rollback,
            0x24 => Eaccess,
            0x25 => NotInitialized,
            0x26 => UnknownFrameInfo,
            0x81 => UnknownCommand,
            0x82 => Enomem,
            0x83 => NotSupported,
            0x84 => Einternal,
            0x85 => Ebusy,
            0x86 => Etmpfail,
            0x88 => UnknownCollection,
            0x8d => DcpStreamIdInvalid,
            0xa0 => DurabilityInvalidLevel,
            0xa1 => DurabilityImpossible,
            0xa2 => SyncWriteInProgress,
            0xa3 => SyncWriteAmbiguous,
            0xa4 => SyncWriteReCommitInProgress,
            0xc0 => SubdocPathEnoent,
            0xc1 => SubdocPathMismatch,
            0xc2 => SubdocPathEinval,
            0xc3 => SubdocPathE2big,
            0xc4 => SubdocDocE2deep,
            0xc5 => SubdocValueCantinsert,
            0xc6 => SubdocDocNotJson,
            0xc7 => SubdocNumErange,
            0xc8 => SubdocDeltaEinval,
            0xc9 => SubdocPathEexists,
            0xca => SubdocValueEtoodeep,
            0xcb => SubdocInvalidCombo,
            0xcc => SubdocMultiPathFailure,
            0xcd => SubdocSuccessDeleted,
            0xce => SubdocXattrInvalidFlagCombo,
            0xcf => SubdocXattrInvalidKeyCombo,
            0xd0 => SubdocXattrUnknownMacro,
            0xd1 => SubdocXattrUnknownVattr,
            0xd2 => SubdocXattrCantModifyVattr,
            0xd3 => SubdocMultiPathFailureDeleted,
            other => return Err(other),
        })
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} (0x{:02x})", self, *self as u16)
    }
}
