// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use protocol_mcbp::Datatype;
use std::sync::Arc;

/// A document as seen across the engine interface. The value is reference
/// counted so that it can be spliced into a send pipeline without copying;
/// the engine's storage is released when the last reference drops.
#[derive(Debug, Clone)]
pub struct Item {
    key: Box<[u8]>,
    value: Arc<Vec<u8>>,
    datatype: Datatype,
    flags: u32,
    cas: u64,
    seqno: u64,
    vbucket: u16,
    expiry: u32,
    deleted: bool,
}

impl Item {
    pub fn new(key: &[u8], value: Vec<u8>, datatype: Datatype, flags: u32, vbucket: u16) -> Self {
        Self {
            key: key.into(),
            value: Arc::new(value),
            datatype,
            flags,
            cas: 0,
            seqno: 0,
            vbucket,
            expiry: 0,
            deleted: false,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// A shared handle to the value bytes, for zero-copy transmission.
    pub fn value_handle(&self) -> Arc<Vec<u8>> {
        self.value.clone()
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn cas(&self) -> u64 {
        self.cas
    }

    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    pub fn vbucket(&self) -> u16 {
        self.vbucket
    }

    pub fn expiry(&self) -> u32 {
        self.expiry
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn set_expiry(&mut self, expiry: u32) {
        self.expiry = expiry;
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.flags = flags;
    }

    pub fn set_datatype(&mut self, datatype: Datatype) {
        self.datatype = datatype;
    }

    pub fn set_cas(&mut self, cas: u64) {
        self.cas = cas;
    }

    pub fn set_seqno(&mut self, seqno: u64) {
        self.seqno = seqno;
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }

    pub fn replace_value(&mut self, value: Vec<u8>) {
        self.value = Arc::new(value);
    }

    /// Adopt an already shared value without copying it.
    pub fn share_value(&mut self, value: Arc<Vec<u8>>) {
        self.value = value;
    }

    /// Split an XATTR-bearing value into its xattr blob and user body. The
    /// xattr section is prefixed by its total length as a big-endian u32.
    pub fn split_xattr(value: &[u8], datatype: Datatype) -> (&[u8], &[u8]) {
        if !datatype.is_xattr() || value.len() < 4 {
            return (&[], value);
        }
        let len = u32::from_be_bytes([value[0], value[1], value[2], value[3]]) as usize;
        if value.len() < 4 + len {
            return (&[], value);
        }
        (&value[..4 + len], &value[4 + len..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xattr_split() {
        let mut value = Vec::new();
        let blob = b"\x00\x00\x00\x08xkeyxval";
        value.extend_from_slice(&(blob.len() as u32).to_be_bytes());
        value.extend_from_slice(blob);
        value.extend_from_slice(b"body");

        let (xattrs, body) = Item::split_xattr(&value, Datatype::XATTR);
        assert_eq!(body, b"body");
        assert_eq!(xattrs.len(), 4 + blob.len());

        let (xattrs, body) = Item::split_xattr(b"plain", Datatype::RAW);
        assert!(xattrs.is_empty());
        assert_eq!(body, b"plain");
    }

    #[test]
    fn value_handle_shares_storage() {
        let item = Item::new(b"k", b"value".to_vec(), Datatype::RAW, 0, 0);
        let handle = item.value_handle();
        assert_eq!(Arc::strong_count(&handle), 2);
        drop(item);
        assert_eq!(Arc::strong_count(&handle), 1);
        assert_eq!(&handle[..], b"value");
    }
}
