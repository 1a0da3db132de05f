// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use core::fmt::{Display, Formatter};

/// Client command opcodes. The enumeration is closed and reproduced
/// verbatim from the protocol definition; gaps are values that were never
/// assigned, and 0xff is reserved to signal an invalid opcode. Opcodes the
/// server recognizes but does not implement answer not-supported through
/// the default executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Add = 0x02,
    Replace = 0x03,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    Quit = 0x07,
    Flush = 0x08,
    Getq = 0x09,
    Noop = 0x0a,
    Version = 0x0b,
    Getk = 0x0c,
    Getkq = 0x0d,
    Append = 0x0e,
    Prepend = 0x0f,
    Stat = 0x10,
    Setq = 0x11,
    Addq = 0x12,
    Replaceq = 0x13,
    Deleteq = 0x14,
    Incrementq = 0x15,
    Decrementq = 0x16,
    Quitq = 0x17,
    Flushq = 0x18,
    Appendq = 0x19,
    Prependq = 0x1a,
    Verbosity = 0x1b,
    Touch = 0x1c,
    Gat = 0x1d,
    Gatq = 0x1e,
    Hello = 0x1f,
    SaslListMechs = 0x20,
    SaslAuth = 0x21,
    SaslStep = 0x22,
    IoctlGet = 0x23,
    IoctlSet = 0x24,
    ConfigValidate = 0x25,
    ConfigReload = 0x26,
    AuditPut = 0x27,
    AuditConfigReload = 0x28,
    Shutdown = 0x29,
    // the range operations exist in the numbering but are not expected to
    // be implemented by the server itself
    Rget = 0x30,
    Rset = 0x31,
    Rsetq = 0x32,
    Rappend = 0x33,
    Rappendq = 0x34,
    Rprepend = 0x35,
    Rprependq = 0x36,
    Rdelete = 0x37,
    Rdeleteq = 0x38,
    Rincr = 0x39,
    Rincrq = 0x3a,
    Rdecr = 0x3b,
    Rdecrq = 0x3c,
    SetVbucket = 0x3d,
    GetVbucket = 0x3e,
    DelVbucket = 0x3f,
    // the legacy TAP replication protocol
    TapConnect = 0x40,
    TapMutation = 0x41,
    TapDelete = 0x42,
    TapFlush = 0x43,
    TapOpaque = 0x44,
    TapVbucketSet = 0x45,
    TapCheckpointStart = 0x46,
    TapCheckpointEnd = 0x47,
    GetAllVbSeqnos = 0x48,
    DcpOpen = 0x50,
    DcpAddStream = 0x51,
    DcpCloseStream = 0x52,
    DcpStreamReq = 0x53,
    DcpGetFailoverLog = 0x54,
    DcpStreamEnd = 0x55,
    DcpSnapshotMarker = 0x56,
    DcpMutation = 0x57,
    DcpDeletion = 0x58,
    DcpExpiration = 0x59,
    // 0x5a was DcpFlush
    DcpSetVbucketState = 0x5b,
    DcpNoop = 0x5c,
    DcpBufferAcknowledgement = 0x5d,
    DcpControl = 0x5e,
    DcpSystemEvent = 0x5f,
    DcpPrepare = 0x60,
    DcpSeqnoAcknowledged = 0x61,
    DcpCommit = 0x62,
    DcpAbort = 0x63,
    StopPersistence = 0x80,
    StartPersistence = 0x81,
    SetParam = 0x82,
    GetReplica = 0x83,
    CreateBucket = 0x85,
    DeleteBucket = 0x86,
    ListBuckets = 0x87,
    SelectBucket = 0x89,
    ObserveSeqno = 0x91,
    Observe = 0x92,
    EvictKey = 0x93,
    GetLocked = 0x94,
    UnlockKey = 0x95,
    GetFailoverLog = 0x96,
    LastClosedCheckpoint = 0x97,
    DeregisterTapClient = 0x9e,
    ResetReplicationChain = 0x9f,
    GetMeta = 0xa0,
    GetqMeta = 0xa1,
    SetWithMeta = 0xa2,
    SetqWithMeta = 0xa3,
    AddWithMeta = 0xa4,
    AddqWithMeta = 0xa5,
    SnapshotVbStates = 0xa6,
    VbucketBatchCount = 0xa7,
    DelWithMeta = 0xa8,
    DelqWithMeta = 0xa9,
    CreateCheckpoint = 0xaa,
    NotifyVbucketUpdate = 0xac,
    EnableTraffic = 0xad,
    DisableTraffic = 0xae,
    ChangeVbFilter = 0xb0,
    CheckpointPersistence = 0xb1,
    ReturnMeta = 0xb2,
    CompactDb = 0xb3,
    SetClusterConfig = 0xb4,
    GetClusterConfig = 0xb5,
    GetRandomKey = 0xb6,
    SeqnoPersistence = 0xb7,
    GetKeys = 0xb8,
    CollectionsSetManifest = 0xb9,
    CollectionsGetManifest = 0xba,
    CollectionsGetID = 0xbb,
    CollectionsGetScopeID = 0xbc,
    SetDriftCounterState = 0xc1,
    GetAdjustedTime = 0xc2,
    SubdocGet = 0xc5,
    SubdocExists = 0xc6,
    SubdocDictAdd = 0xc7,
    SubdocDictUpsert = 0xc8,
    SubdocDelete = 0xc9,
    SubdocReplace = 0xca,
    SubdocArrayPushLast = 0xcb,
    SubdocArrayPushFirst = 0xcc,
    SubdocArrayInsert = 0xcd,
    SubdocArrayAddUnique = 0xce,
    SubdocCounter = 0xcf,
    SubdocMultiLookup = 0xd0,
    SubdocMultiMutation = 0xd1,
    SubdocGetCount = 0xd2,
    Scrub = 0xf0,
    IsaslRefresh = 0xf1,
    SslCertsRefresh = 0xf2,
    GetCmdTimer = 0xf3,
    SetCtrlToken = 0xf4,
    GetCtrlToken = 0xf5,
    UpdateExternalUserPermissions = 0xf6,
    RbacRefresh = 0xf7,
    AuthProvider = 0xf8,
    DropPrivilege = 0xfb,
    AdjustTimeofday = 0xfc,
    EwouldblockCtl = 0xfd,
    GetErrorMap = 0xfe,
    /// Reserved for being able to signal an invalid opcode. Never parsed
    /// off the wire: 0xff fails `try_from` and answers unknown-command.
    Invalid = 0xff,
}

/// Server-initiated request opcodes. These live in a separate numbering
/// space and are only valid with the server magics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerOpcode {
    ClustermapChangeNotification = 0x01,
    Authenticate = 0x02,
    ActiveExternalUsers = 0x03,
}

impl Opcode {
    /// True for the "quiet" variants which suppress most responses.
    pub fn is_quiet(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Getq | Getkq
                | Setq
                | Addq
                | Replaceq
                | Deleteq
                | Incrementq
                | Decrementq
                | Quitq
                | Flushq
                | Appendq
                | Prependq
                | Gatq
                | GetqMeta
        )
    }

    pub fn is_dcp(self) -> bool {
        (self as u8) >= 0x50 && (self as u8) <= 0x63
    }

    pub fn is_subdoc(self) -> bool {
        (self as u8) >= 0xc5 && (self as u8) <= 0xd2
    }

    /// The opcodes which accept a DurabilityRequirement frame info. Durability
    /// only makes sense for operations which mutate a document.
    pub fn supports_durability(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Set | Setq
                | Add
                | Addq
                | Replace
                | Replaceq
                | Delete
                | Deleteq
                | Increment
                | Incrementq
                | Decrement
                | Decrementq
                | Append
                | Appendq
                | Prepend
                | Prependq
                | Touch
                | Gat
                | Gatq
                | SubdocDictAdd
                | SubdocDictUpsert
                | SubdocDelete
                | SubdocReplace
                | SubdocArrayPushLast
                | SubdocArrayPushFirst
                | SubdocArrayInsert
                | SubdocArrayAddUnique
                | SubdocCounter
                | SubdocMultiMutation
        )
    }

    /// Opcodes whose completion may be reordered on a connection that has
    /// negotiated unordered execution: plain reads, most mutations, and the
    /// sub-document family. Connection-scoped commands (HELLO, SASL, bucket
    /// selection, ...), commands with cross-request effects and every DCP
    /// message must complete in order.
    pub fn is_reorder_safe(self) -> bool {
        use Opcode::*;
        if self.is_dcp() {
            return false;
        }
        match self {
            Get | Getq | Getk | Getkq | GetLocked | UnlockKey | Touch | Gat | Gatq | Delete
            | Deleteq | Increment | Decrement | Incrementq | Decrementq | Version | GetErrorMap
            | EvictKey | GetReplica | GetMeta | GetqMeta | GetRandomKey | GetCmdTimer
            | SetClusterConfig | GetClusterConfig | Add | Addq | Replace | Replaceq | Set
            | Setq | Append | Appendq | Prepend | Prependq | Verbosity | SaslListMechs
            | SubdocGet | SubdocExists | SubdocDictAdd | SubdocDictUpsert | SubdocDelete
            | SubdocReplace | SubdocArrayPushLast | SubdocArrayPushFirst | SubdocArrayInsert
            | SubdocArrayAddUnique | SubdocCounter | SubdocMultiLookup | SubdocMultiMutation
            | SubdocGetCount => true,
            _ => false,
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        use Opcode::*;
        Ok(match value {
            0x00 => Get,
            0x01 => Set,
            0x02 => Add,
            0x03 => Replace,
            0x04 => Delete,
            0x05 => Increment,
            0x06 => Decrement,
            0x07 => Quit,
            0x08 => Flush,
            0x09 => Getq,
            0x0a => Noop,
            0x0b => Version,
            0x0c => Getk,
            0x0d => Getkq,
            0x0e => Append,
            0x0f => Prepend,
            0x10 => Stat,
            0x11 => Setq,
            0x12 => Addq,
            0x13 => Replaceq,
            0x14 => Deleteq,
            0x15 => Incrementq,
            0x16 => Decrementq,
            0x17 => Quitq,
            0x18 => Flushq,
            0x19 => Appendq,
            0x1a => Prependq,
            0x1b => Verbosity,
            0x1c => Touch,
            0x1d => Gat,
            0x1e => Gatq,
            0x1f => Hello,
            0x20 => SaslListMechs,
            0x21 => SaslAuth,
            0x22 => SaslStep,
            0x23 => IoctlGet,
            0x24 => IoctlSet,
            0x25 => ConfigValidate,
            0x26 => ConfigReload,
            0x27 => AuditPut,
            0x28 => AuditConfigReload,
            0x29 => Shutdown,
            0x30 => Rget,
            0x31 => Rset,
            0x32 => Rsetq,
            0x33 => Rappend,
            0x34 => Rappendq,
            0x35 => Rprepend,
            0x36 => Rprependq,
            0x37 => Rdelete,
            0x38 => Rdeleteq,
            0x39 => Rincr,
            0x3a => Rincrq,
            0x3b => Rdecr,
            0x3c => Rdecrq,
            0x3d => SetVbucket,
            0x3e => GetVbucket,
            0x3f => DelVbucket,
            0x40 => TapConnect,
            0x41 => TapMutation,
            0x42 => TapDelete,
            0x43 => TapFlush,
            0x44 => TapOpaque,
            0x45 => TapVbucketSet,
            0x46 => TapCheckpointStart,
            0x47 => TapCheckpointEnd,
            0x48 => GetAllVbSeqnos,
            0x50 => DcpOpen,
            0x51 => DcpAddStream,
            0x52 => DcpCloseStream,
            0x53 => DcpStreamReq,
            0x54 => DcpGetFailoverLog,
            0x55 => DcpStreamEnd,
            0x56 => DcpSnapshotMarker,
            0x57 => DcpMutation,
            0x58 => DcpDeletion,
            0x59 => DcpExpiration,
            0x5b => DcpSetVbucketState,
            0x5c => DcpNoop,
            0x5d => DcpBufferAcknowledgement,
            0x5e => DcpControl,
            0x5f => DcpSystemEvent,
            0x60 => DcpPrepare,
            0x61 => DcpSeqnoAcknowledged,
            0x62 => DcpCommit,
            0x63 => DcpAbort,
            0x80 => StopPersistence,
            0x81 => StartPersistence,
            0x82 => SetParam,
            0x83 => GetReplica,
            0x85 => CreateBucket,
            0x86 => DeleteBucket,
            0x87 => ListBuckets,
            0x89 => SelectBucket,
            0x91 => ObserveSeqno,
            0x92 => Observe,
            0x93 => EvictKey,
            0x94 => GetLocked,
            0x95 => UnlockKey,
            0x96 => GetFailoverLog,
            0x97 => LastClosedCheckpoint,
            0x9e => DeregisterTapClient,
            0x9f => ResetReplicationChain,
            0xa0 => GetMeta,
            0xa1 => GetqMeta,
            0xa2 => SetWithMeta,
            0xa3 => SetqWithMeta,
            0xa4 => AddWithMeta,
            0xa5 => AddqWithMeta,
            0xa6 => SnapshotVbStates,
            0xa7 => VbucketBatchCount,
            0xa8 => DelWithMeta,
            0xa9 => DelqWithMeta,
            0xaa => CreateCheckpoint,
            0xac => NotifyVbucketUpdate,
            0xad => EnableTraffic,
            0xae => DisableTraffic,
            0xb0 => ChangeVbFilter,
            0xb1 => CheckpointPersistence,
            0xb2 => ReturnMeta,
            0xb3 => CompactDb,
            0xb4 => SetClusterConfig,
            0xb5 => GetClusterConfig,
            0xb6 => GetRandomKey,
            0xb7 => SeqnoPersistence,
            0xb8 => GetKeys,
            0xb9 => CollectionsSetManifest,
            0xba => CollectionsGetManifest,
            0xbb => CollectionsGetID,
            0xbc => CollectionsGetScopeID,
            0xc1 => SetDriftCounterState,
            0xc2 => GetAdjustedTime,
            0xc5 => SubdocGet,
            0xc6 => SubdocExists,
            0xc7 => SubdocDictAdd,
            0xc8 => SubdocDictUpsert,
            0xc9 => SubdocDelete,
            0xca => SubdocReplace,
            0xcb => SubdocArrayPushLast,
            0xcc => SubdocArrayPushFirst,
            0xcd => SubdocArrayInsert,
            0xce => SubdocArrayAddUnique,
            0xcf => SubdocCounter,
            0xd0 => SubdocMultiLookup,
            0xd1 => SubdocMultiMutation,
            0xd2 => SubdocGetCount,
            0xf0 => Scrub,
            0xf1 => IsaslRefresh,
            0xf2 => SslCertsRefresh,
            0xf3 => GetCmdTimer,
            0xf4 => SetCtrlToken,
            0xf5 => GetCtrlToken,
            0xf6 => UpdateExternalUserPermissions,
            0xf7 => RbacRefresh,
            0xf8 => AuthProvider,
            0xfb => DropPrivilege,
            0xfc => AdjustTimeofday,
            0xfd => EwouldblockCtl,
            0xfe => GetErrorMap,
            other => return Err(other),
        })
    }
}

impl TryFrom<u8> for ServerOpcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0x01 => ServerOpcode::ClustermapChangeNotification,
            0x02 => ServerOpcode::Authenticate,
            0x03 => ServerOpcode::ActiveExternalUsers,
            other => return Err(other),
        })
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl Display for ServerOpcode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        for byte in 0u8..=0xff {
            if let Ok(opcode) = Opcode::try_from(byte) {
                assert_eq!(opcode as u8, byte);
            }
        }
    }

    #[test]
    fn enumeration_is_closed() {
        // the verbatim client opcode table holds 160 entries: 159 wire
        // opcodes plus the reserved Invalid sentinel, which never parses
        let assigned = (0u8..=0xff).filter(|b| Opcode::try_from(*b).is_ok()).count();
        assert_eq!(assigned, 159);
        assert_eq!(Opcode::Invalid as u8, 0xff);
    }

    #[test]
    fn unassigned_opcodes_rejected() {
        // gaps in the numbering, the removed DcpFlush slot, and the
        // reserved invalid-opcode sentinel must not parse
        assert!(Opcode::try_from(0x2a).is_err());
        assert!(Opcode::try_from(0x49).is_err());
        assert!(Opcode::try_from(0x5a).is_err());
        assert!(Opcode::try_from(0x84).is_err());
        assert!(Opcode::try_from(0x9d).is_err());
        assert!(Opcode::try_from(0xab).is_err());
        assert!(Opcode::try_from(0xc4).is_err());
        assert!(Opcode::try_from(0xff).is_err());
    }

    #[test]
    fn legacy_blocks_parse() {
        assert_eq!(Opcode::try_from(0x30), Ok(Opcode::Rget));
        assert_eq!(Opcode::try_from(0x40), Ok(Opcode::TapConnect));
        assert_eq!(Opcode::try_from(0xa2), Ok(Opcode::SetWithMeta));
        assert_eq!(Opcode::try_from(0xfd), Ok(Opcode::EwouldblockCtl));
    }

    #[test]
    fn reorder_set() {
        assert!(Opcode::Get.is_reorder_safe());
        assert!(Opcode::Set.is_reorder_safe());
        assert!(Opcode::SubdocMultiMutation.is_reorder_safe());
        assert!(!Opcode::Quit.is_reorder_safe());
        assert!(!Opcode::Hello.is_reorder_safe());
        assert!(!Opcode::SaslAuth.is_reorder_safe());
        assert!(!Opcode::SelectBucket.is_reorder_safe());
        assert!(!Opcode::Stat.is_reorder_safe());
        assert!(!Opcode::DcpMutation.is_reorder_safe());
        assert!(!Opcode::Flush.is_reorder_safe());
        assert!(!Opcode::Shutdown.is_reorder_safe());
        assert!(!Opcode::CreateBucket.is_reorder_safe());
        assert!(!Opcode::DeleteBucket.is_reorder_safe());
        assert!(!Opcode::SetWithMeta.is_reorder_safe());
        assert!(!Opcode::TapMutation.is_reorder_safe());
    }

    #[test]
    fn durability_set() {
        assert!(Opcode::Set.supports_durability());
        assert!(Opcode::Delete.supports_durability());
        assert!(Opcode::SubdocMultiMutation.supports_durability());
        assert!(!Opcode::Get.supports_durability());
        assert!(!Opcode::Hello.supports_durability());
        assert!(!Opcode::SubdocGet.supports_durability());
        assert!(!Opcode::SetWithMeta.supports_durability());
    }
}
