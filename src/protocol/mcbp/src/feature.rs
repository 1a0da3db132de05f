// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use core::fmt::{Display, Formatter};

/// Features a client may request in a HELLO packet. The server intersects
/// the requested list with the set it supports and echoes back the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum Feature {
    MutationSeqno = 0x04,
    Xattr = 0x06,
    Xerror = 0x07,
    SelectBucket = 0x08,
    Snappy = 0x0a,
    Json = 0x0b,
    Duplex = 0x0c,
    ClustermapChangeNotification = 0x0d,
    UnorderedExecution = 0x0e,
    Tracing = 0x0f,
    AltRequestSupport = 0x10,
    SyncReplication = 0x11,
    Collections = 0x12,
    OpenTracing = 0x13,
}

impl Feature {
    pub const ALL: &'static [Feature] = &[
        Feature::MutationSeqno,
        Feature::Xattr,
        Feature::Xerror,
        Feature::SelectBucket,
        Feature::Snappy,
        Feature::Json,
        Feature::Duplex,
        Feature::ClustermapChangeNotification,
        Feature::UnorderedExecution,
        Feature::Tracing,
        Feature::AltRequestSupport,
        Feature::SyncReplication,
        Feature::Collections,
        Feature::OpenTracing,
    ];
}

impl TryFrom<u16> for Feature {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        use Feature::*;
        Ok(match value {
            0x04 => MutationSeqno,
            0x06 => Xattr,
            0x07 => Xerror,
            0x08 => SelectBucket,
            0x0a => Snappy,
            0x0b => Json,
            0x0c => Duplex,
            0x0d => ClustermapChangeNotification,
            0x0e => UnorderedExecution,
            0x0f => Tracing,
            0x10 => AltRequestSupport,
            0x11 => SyncReplication,
            0x12 => Collections,
            0x13 => OpenTracing,
            other => return Err(other),
        })
    }
}

impl Display for Feature {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The set of features negotiated on a connection, stored as a bitmask
/// indexed by feature code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSet(u32);

impl FeatureSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, feature: Feature) {
        self.0 |= 1 << (feature as u16);
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0 & (1 << (feature as u16)) != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::ALL.iter().copied().filter(|f| self.contains(*f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        for feature in Feature::ALL {
            assert_eq!(Feature::try_from(*feature as u16), Ok(*feature));
        }
        assert!(Feature::try_from(0x05).is_err());
        assert!(Feature::try_from(0x1234).is_err());
    }

    #[test]
    fn set_operations() {
        let mut set = FeatureSet::new();
        assert!(!set.contains(Feature::Xerror));
        set.insert(Feature::Xerror);
        set.insert(Feature::Snappy);
        assert!(set.contains(Feature::Xerror));
        assert!(set.contains(Feature::Snappy));
        assert!(!set.contains(Feature::Duplex));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Feature::Xerror, Feature::Snappy]);
    }
}
