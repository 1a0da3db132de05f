// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A hash-map backed engine. Complete enough to run the frontend for real:
//! CAS generation, document locks, tombstones which preserve extended
//! attributes, and a DCP producer which backfills the current state of a
//! vbucket. Expiry values are stored but never enforced; there is no clock
//! in here.

use crate::*;
use protocol_mcbp::Datatype;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Largest value accepted by this engine.
const MAX_VALUE_SIZE: usize = 20 * 1024 * 1024;

/// Sentinel expiry meaning "do not create on arithmetic miss".
const ARITHMETIC_NO_CREATE: u32 = 0xffff_ffff;

struct Stored {
    value: Arc<Vec<u8>>,
    datatype: Datatype,
    flags: u32,
    cas: u64,
    seqno: u64,
    expiry: u32,
    deleted: bool,
    locked: bool,
}

struct Vbucket {
    uuid: u64,
    high_seqno: u64,
    items: HashMap<Box<[u8]>, Stored>,
}

struct Shared {
    vbuckets: Vec<Mutex<Vbucket>>,
    cas: AtomicU64,
}

impl Shared {
    fn vbucket(&self, vbucket: u16) -> EngineResult<MutexGuard<'_, Vbucket>> {
        let vb = self
            .vbuckets
            .get(vbucket as usize)
            .ok_or(EngineError::NotMyVbucket)?;
        vb.lock().map_err(|_| EngineError::Internal)
    }

    fn next_cas(&self) -> u64 {
        self.cas.fetch_add(1, Ordering::Relaxed) + 1
    }
}

pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    pub fn new(vbucket_count: u16) -> Self {
        let vbuckets = (0..vbucket_count)
            .map(|vb| {
                Mutex::new(Vbucket {
                    uuid: ((vb as u64 + 1) << 32) | 0xface,
                    high_seqno: 0,
                    items: HashMap::new(),
                })
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                vbuckets,
                cas: AtomicU64::new(0),
            }),
        }
    }
}

fn to_item(key: &[u8], stored: &Stored, vbucket: u16) -> Item {
    let mut item = Item::new(key, (*stored.value).clone(), stored.datatype, stored.flags, vbucket);
    item.set_cas(stored.cas);
    item.set_seqno(stored.seqno);
    item.set_expiry(stored.expiry);
    item.set_deleted(stored.deleted);
    item
}

/// As `to_item` but sharing the stored value instead of copying it. Used on
/// the DCP path where the value may be large.
fn to_item_shared(key: &[u8], stored: &Stored, vbucket: u16) -> Item {
    let mut item = Item::new(key, Vec::new(), stored.datatype, stored.flags, vbucket);
    item.share_value(stored.value.clone());
    item.set_cas(stored.cas);
    item.set_seqno(stored.seqno);
    item.set_expiry(stored.expiry);
    item.set_deleted(stored.deleted);
    item
}

impl KvEngine for MemoryEngine {
    fn get(
        &self,
        _cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        filter: DocStateFilter,
    ) -> EngineResult<Item> {
        let vb = self.shared.vbucket(vbucket)?;
        let stored = vb.items.get(key).ok_or(EngineError::KeyNotFound)?;
        if stored.deleted && filter == DocStateFilter::Alive {
            return Err(EngineError::KeyNotFound);
        }
        Ok(to_item(key, stored, vbucket))
    }

    fn get_locked(
        &self,
        _cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        _lock_seconds: u32,
    ) -> EngineResult<Item> {
        let mut vb = self.shared.vbucket(vbucket)?;
        let cas = self.shared.next_cas();
        let stored = vb.items.get_mut(key).ok_or(EngineError::KeyNotFound)?;
        if stored.deleted {
            return Err(EngineError::KeyNotFound);
        }
        if stored.locked {
            return Err(EngineError::LockedTmpfail);
        }
        stored.locked = true;
        stored.cas = cas;
        Ok(to_item(key, stored, vbucket))
    }

    fn unlock(&self, _cookie: &CookieIo, key: &[u8], vbucket: u16, cas: u64) -> EngineResult<()> {
        let mut vb = self.shared.vbucket(vbucket)?;
        let stored = vb.items.get_mut(key).ok_or(EngineError::KeyNotFound)?;
        if !stored.locked {
            return Err(EngineError::TempFail);
        }
        if stored.cas != cas {
            return Err(EngineError::Locked);
        }
        stored.locked = false;
        Ok(())
    }

    fn store(
        &self,
        _cookie: &CookieIo,
        item: &Item,
        cas: u64,
        semantics: StoreSemantics,
        _durability: Option<DurabilityRequirement>,
        document_state: DocState,
    ) -> EngineResult<StoreResult> {
        if item.value().len() > MAX_VALUE_SIZE {
            return Err(EngineError::TooBig);
        }

        let mut vb = self.shared.vbucket(item.vbucket())?;
        let new_cas = self.shared.next_cas();

        let existing_alive = vb.items.get(item.key()).map(|s| (!s.deleted, s.cas, s.locked));
        match (semantics, existing_alive) {
            (StoreSemantics::Add, Some((true, _, _))) => return Err(EngineError::NotStored),
            (StoreSemantics::Replace, None) | (StoreSemantics::Replace, Some((false, _, _))) => {
                return Err(EngineError::KeyNotFound)
            }
            (StoreSemantics::Cas, None) => return Err(EngineError::KeyNotFound),
            (StoreSemantics::Cas, Some((_, existing_cas, _))) => {
                if existing_cas != cas {
                    return Err(EngineError::KeyExists);
                }
            }
            (StoreSemantics::Set, Some((_, existing_cas, locked)))
            | (StoreSemantics::Replace, Some((_, existing_cas, locked))) => {
                if locked && cas != existing_cas {
                    return Err(EngineError::Locked);
                }
                if cas != 0 && cas != existing_cas {
                    return Err(EngineError::KeyExists);
                }
            }
            (StoreSemantics::Set, None) => {
                if cas != 0 {
                    return Err(EngineError::KeyNotFound);
                }
            }
            (StoreSemantics::Add, _) => {}
        }

        vb.high_seqno += 1;
        let seqno = vb.high_seqno;
        vb.items.insert(
            item.key().into(),
            Stored {
                value: item.value_handle(),
                datatype: item.datatype(),
                flags: item.flags(),
                cas: new_cas,
                seqno,
                expiry: item.expiry(),
                deleted: document_state == DocState::Deleted,
                locked: false,
            },
        );

        Ok(StoreResult {
            cas: new_cas,
            mutation: MutationDescr { vbucket_uuid: vb.uuid, seqno },
        })
    }

    fn remove(
        &self,
        _cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        cas: u64,
        _durability: Option<DurabilityRequirement>,
    ) -> EngineResult<StoreResult> {
        let mut vb = self.shared.vbucket(vbucket)?;
        let new_cas = self.shared.next_cas();

        let stored = vb.items.get_mut(key).ok_or(EngineError::KeyNotFound)?;
        if stored.deleted {
            return Err(EngineError::KeyNotFound);
        }
        if stored.locked && cas != stored.cas {
            return Err(EngineError::Locked);
        }
        if cas != 0 && cas != stored.cas {
            return Err(EngineError::KeyExists);
        }

        // tombstones keep the xattr section so that sub-document operations
        // can still address system attributes on a deleted document
        let (xattrs, _body) = Item::split_xattr(&stored.value, stored.datatype);
        if xattrs.is_empty() {
            stored.value = Arc::new(Vec::new());
            stored.datatype = Datatype::RAW;
        } else {
            stored.value = Arc::new(xattrs.to_vec());
            stored.datatype = Datatype::XATTR;
        }
        stored.deleted = true;
        stored.locked = false;
        stored.cas = new_cas;

        vb.high_seqno += 1;
        let seqno = vb.high_seqno;
        let uuid = vb.uuid;
        if let Some(stored) = vb.items.get_mut(key) {
            stored.seqno = seqno;
        }

        Ok(StoreResult {
            cas: new_cas,
            mutation: MutationDescr { vbucket_uuid: uuid, seqno },
        })
    }

    fn arithmetic(
        &self,
        _cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        args: ArithmeticArgs,
    ) -> EngineResult<(u64, StoreResult)> {
        let mut vb = self.shared.vbucket(vbucket)?;
        let new_cas = self.shared.next_cas();

        let current = match vb.items.get(key) {
            Some(stored) if !stored.deleted => {
                let text = std::str::from_utf8(&stored.value).map_err(|_| EngineError::DeltaBadval)?;
                Some(text.trim().parse::<u64>().map_err(|_| EngineError::DeltaBadval)?)
            }
            _ => None,
        };

        let value = match current {
            Some(current) => {
                if args.delta >= 0 {
                    current.wrapping_add(args.delta as u64)
                } else {
                    current.saturating_sub(args.delta.unsigned_abs())
                }
            }
            None => {
                if args.expiry == ARITHMETIC_NO_CREATE {
                    return Err(EngineError::KeyNotFound);
                }
                args.initial
            }
        };

        vb.high_seqno += 1;
        let seqno = vb.high_seqno;
        let uuid = vb.uuid;
        vb.items.insert(
            key.into(),
            Stored {
                value: Arc::new(value.to_string().into_bytes()),
                datatype: Datatype::RAW,
                flags: 0,
                cas: new_cas,
                seqno,
                expiry: if current.is_none() { args.expiry } else { 0 },
                deleted: false,
                locked: false,
            },
        );

        Ok((
            value,
            StoreResult {
                cas: new_cas,
                mutation: MutationDescr { vbucket_uuid: uuid, seqno },
            },
        ))
    }

    fn touch(
        &self,
        _cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        expiry: u32,
    ) -> EngineResult<Item> {
        let mut vb = self.shared.vbucket(vbucket)?;
        let cas = self.shared.next_cas();
        let stored = vb.items.get_mut(key).ok_or(EngineError::KeyNotFound)?;
        if stored.deleted {
            return Err(EngineError::KeyNotFound);
        }
        stored.expiry = expiry;
        stored.cas = cas;
        Ok(to_item(key, stored, vbucket))
    }

    fn flush(&self, _cookie: &CookieIo) -> EngineResult<()> {
        for vb in &self.shared.vbuckets {
            if let Ok(mut vb) = vb.lock() {
                vb.items.clear();
            }
        }
        Ok(())
    }

    fn vbucket_uuid(&self, vbucket: u16) -> EngineResult<u64> {
        Ok(self.shared.vbucket(vbucket)?.uuid)
    }

    fn dcp_open(
        &self,
        _cookie: &CookieIo,
        flags: u32,
        _name: &[u8],
    ) -> EngineResult<Box<dyn DcpConnection>> {
        Ok(Box::new(MemoryDcpConnection {
            shared: self.shared.clone(),
            producer: flags & DCP_OPEN_PRODUCER != 0,
            queue: VecDeque::new(),
            control: HashMap::new(),
        }))
    }
}

enum QueuedMessage {
    SnapshotMarker { opaque: u32, vbucket: u16, start: u64, end: u64 },
    Mutation { opaque: u32, vbucket: u16, item: Item },
    Deletion { opaque: u32, vbucket: u16, item: Item },
    StreamEnd { opaque: u32, vbucket: u16 },
}

struct MemoryDcpConnection {
    shared: Arc<Shared>,
    producer: bool,
    queue: VecDeque<QueuedMessage>,
    control: HashMap<Vec<u8>, Vec<u8>>,
}

impl DcpConnection for MemoryDcpConnection {
    fn is_producer(&self) -> bool {
        self.producer
    }

    fn step(&mut self, producers: &mut dyn DcpMessageProducers) -> EngineResult<()> {
        let message = self.queue.pop_front().ok_or(EngineError::WouldBlock)?;
        match message {
            QueuedMessage::SnapshotMarker { opaque, vbucket, start, end } => {
                producers.snapshot_marker(opaque, vbucket, start, end, 0, None)
            }
            QueuedMessage::Mutation { opaque, vbucket, item } => {
                let seqno = item.seqno();
                producers.mutation(opaque, &item, vbucket, seqno, 1, 0, None)
            }
            QueuedMessage::Deletion { opaque, vbucket, item } => {
                let seqno = item.seqno();
                producers.deletion(opaque, &item, vbucket, seqno, 1, 0, None)
            }
            QueuedMessage::StreamEnd { opaque, vbucket } => {
                producers.stream_end(opaque, vbucket, 0, None)
            }
        }
    }

    fn stream_req(
        &mut self,
        opaque: u32,
        vbucket: u16,
        _flags: u32,
        start_seqno: u64,
        end_seqno: u64,
        _vbucket_uuid: u64,
        _snap_start: u64,
        _snap_end: u64,
    ) -> EngineResult<Vec<(u64, u64)>> {
        if !self.producer {
            return Err(EngineError::NotSupported);
        }

        let vb = self.shared.vbucket(vbucket)?;

        let mut entries: Vec<(Box<[u8]>, Item, bool)> = vb
            .items
            .iter()
            .filter(|(_, stored)| stored.seqno > start_seqno && stored.seqno <= end_seqno)
            .map(|(key, stored)| {
                (key.clone(), to_item_shared(key, stored, vbucket), stored.deleted)
            })
            .collect();
        entries.sort_by_key(|(_, item, _)| item.seqno());

        let snapshot_end = entries.last().map(|(_, i, _)| i.seqno()).unwrap_or(start_seqno);
        self.queue.push_back(QueuedMessage::SnapshotMarker {
            opaque,
            vbucket,
            start: start_seqno,
            end: snapshot_end,
        });
        for (_key, item, deleted) in entries {
            if deleted {
                self.queue.push_back(QueuedMessage::Deletion { opaque, vbucket, item });
            } else {
                self.queue.push_back(QueuedMessage::Mutation { opaque, vbucket, item });
            }
        }
        self.queue.push_back(QueuedMessage::StreamEnd { opaque, vbucket });

        Ok(vec![(vb.uuid, 0)])
    }

    fn close_stream(
        &mut self,
        _opaque: u32,
        vbucket: u16,
        _stream_id: Option<u16>,
    ) -> EngineResult<()> {
        self.queue.retain(|m| {
            let vb = match m {
                QueuedMessage::SnapshotMarker { vbucket, .. } => *vbucket,
                QueuedMessage::Mutation { vbucket, .. } => *vbucket,
                QueuedMessage::Deletion { vbucket, .. } => *vbucket,
                QueuedMessage::StreamEnd { vbucket, .. } => *vbucket,
            };
            vb != vbucket
        });
        Ok(())
    }

    fn get_failover_log(&mut self, _opaque: u32, vbucket: u16) -> EngineResult<Vec<(u64, u64)>> {
        Ok(vec![(self.shared.vbucket(vbucket)?.uuid, 0)])
    }

    fn buffer_acknowledgement(
        &mut self,
        _opaque: u32,
        _vbucket: u16,
        _buffer_bytes: u32,
    ) -> EngineResult<()> {
        Ok(())
    }

    fn control(&mut self, _opaque: u32, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.control.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn noop(&mut self, _opaque: u32) -> EngineResult<()> {
        Ok(())
    }

    fn response(&mut self, _response: DcpResponse) -> EngineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie() -> CookieIo {
        struct Noop;
        impl IoNotify for Noop {
            fn notify_io_complete(&self, _status: EngineResult<()>) {}
        }
        Arc::new(Noop)
    }

    fn item(key: &[u8], value: &[u8]) -> Item {
        Item::new(key, value.to_vec(), Datatype::RAW, 0, 0)
    }

    #[test]
    fn get_miss_then_hit() {
        let engine = MemoryEngine::new(4);
        let c = cookie();
        assert_eq!(
            engine.get(&c, b"k", 0, DocStateFilter::Alive).unwrap_err(),
            EngineError::KeyNotFound
        );
        engine
            .store(&c, &item(b"k", b"v"), 0, StoreSemantics::Set, None, DocState::Alive)
            .unwrap();
        let fetched = engine.get(&c, b"k", 0, DocStateFilter::Alive).unwrap();
        assert_eq!(fetched.value(), b"v");
        assert_ne!(fetched.cas(), 0);
    }

    #[test]
    fn unowned_vbucket() {
        let engine = MemoryEngine::new(4);
        let c = cookie();
        assert_eq!(
            engine.get(&c, b"k", 100, DocStateFilter::Alive).unwrap_err(),
            EngineError::NotMyVbucket
        );
    }

    #[test]
    fn add_and_replace_semantics() {
        let engine = MemoryEngine::new(1);
        let c = cookie();
        assert_eq!(
            engine
                .store(&c, &item(b"k", b"v"), 0, StoreSemantics::Replace, None, DocState::Alive)
                .unwrap_err(),
            EngineError::KeyNotFound
        );
        engine
            .store(&c, &item(b"k", b"v"), 0, StoreSemantics::Add, None, DocState::Alive)
            .unwrap();
        assert_eq!(
            engine
                .store(&c, &item(b"k", b"v2"), 0, StoreSemantics::Add, None, DocState::Alive)
                .unwrap_err(),
            EngineError::NotStored
        );
    }

    #[test]
    fn cas_mismatch() {
        let engine = MemoryEngine::new(1);
        let c = cookie();
        let first = engine
            .store(&c, &item(b"k", b"v"), 0, StoreSemantics::Set, None, DocState::Alive)
            .unwrap();
        assert_eq!(
            engine
                .store(&c, &item(b"k", b"v2"), first.cas + 1, StoreSemantics::Cas, None, DocState::Alive)
                .unwrap_err(),
            EngineError::KeyExists
        );
        engine
            .store(&c, &item(b"k", b"v2"), first.cas, StoreSemantics::Cas, None, DocState::Alive)
            .unwrap();
    }

    #[test]
    fn seqno_increases() {
        let engine = MemoryEngine::new(1);
        let c = cookie();
        let a = engine
            .store(&c, &item(b"a", b"1"), 0, StoreSemantics::Set, None, DocState::Alive)
            .unwrap();
        let b = engine
            .store(&c, &item(b"b", b"2"), 0, StoreSemantics::Set, None, DocState::Alive)
            .unwrap();
        assert!(b.mutation.seqno > a.mutation.seqno);
        assert_eq!(a.mutation.vbucket_uuid, b.mutation.vbucket_uuid);
    }

    #[test]
    fn arithmetic_create_and_badval() {
        let engine = MemoryEngine::new(1);
        let c = cookie();
        let (value, _) = engine
            .arithmetic(&c, b"ctr", 0, ArithmeticArgs { delta: 5, initial: 10, expiry: 0 })
            .unwrap();
        assert_eq!(value, 10);
        let (value, _) = engine
            .arithmetic(&c, b"ctr", 0, ArithmeticArgs { delta: 5, initial: 10, expiry: 0 })
            .unwrap();
        assert_eq!(value, 15);
        let (value, _) = engine
            .arithmetic(&c, b"ctr", 0, ArithmeticArgs { delta: -20, initial: 0, expiry: 0 })
            .unwrap();
        assert_eq!(value, 0);

        engine
            .store(&c, &item(b"s", b"text"), 0, StoreSemantics::Set, None, DocState::Alive)
            .unwrap();
        assert_eq!(
            engine
                .arithmetic(&c, b"s", 0, ArithmeticArgs { delta: 1, initial: 0, expiry: 0 })
                .unwrap_err(),
            EngineError::DeltaBadval
        );

        assert_eq!(
            engine
                .arithmetic(
                    &c,
                    b"missing",
                    0,
                    ArithmeticArgs { delta: 1, initial: 0, expiry: ARITHMETIC_NO_CREATE }
                )
                .unwrap_err(),
            EngineError::KeyNotFound
        );
    }

    #[test]
    fn remove_preserves_xattrs() {
        let engine = MemoryEngine::new(1);
        let c = cookie();

        let mut value = Vec::new();
        let pair = b"_sys\x00{\"a\":1}\x00";
        let mut blob = Vec::new();
        blob.extend_from_slice(&(pair.len() as u32).to_be_bytes());
        blob.extend_from_slice(pair);
        value.extend_from_slice(&(blob.len() as u32).to_be_bytes());
        value.extend_from_slice(&blob);
        value.extend_from_slice(b"body");

        let doc = Item::new(b"k", value, Datatype::XATTR | Datatype::JSON, 0, 0);
        engine.store(&c, &doc, 0, StoreSemantics::Set, None, DocState::Alive).unwrap();
        engine.remove(&c, b"k", 0, 0, None).unwrap();

        assert_eq!(
            engine.get(&c, b"k", 0, DocStateFilter::Alive).unwrap_err(),
            EngineError::KeyNotFound
        );
        let tombstone = engine.get(&c, b"k", 0, DocStateFilter::AliveOrDeleted).unwrap();
        assert!(tombstone.is_deleted());
        assert!(tombstone.datatype().is_xattr());
        let (xattrs, body) = Item::split_xattr(tombstone.value(), tombstone.datatype());
        assert!(!xattrs.is_empty());
        assert!(body.is_empty());
    }

    #[test]
    fn locked_document() {
        let engine = MemoryEngine::new(1);
        let c = cookie();
        engine
            .store(&c, &item(b"k", b"v"), 0, StoreSemantics::Set, None, DocState::Alive)
            .unwrap();
        let locked = engine.get_locked(&c, b"k", 0, 15).unwrap();
        assert_eq!(
            engine
                .store(&c, &item(b"k", b"v2"), 0, StoreSemantics::Set, None, DocState::Alive)
                .unwrap_err(),
            EngineError::Locked
        );
        engine.unlock(&c, b"k", 0, locked.cas()).unwrap();
        engine
            .store(&c, &item(b"k", b"v2"), 0, StoreSemantics::Set, None, DocState::Alive)
            .unwrap();
    }

    struct RecordingProducers {
        events: Vec<String>,
    }

    impl DcpMessageProducers for RecordingProducers {
        fn mutation(
            &mut self,
            _opaque: u32,
            item: &Item,
            _vbucket: u16,
            by_seqno: u64,
            _rev_seqno: u64,
            _lock_time: u32,
            _stream_id: Option<u16>,
        ) -> EngineResult<()> {
            self.events.push(format!(
                "mutation:{}:{}",
                String::from_utf8_lossy(item.key()),
                by_seqno
            ));
            Ok(())
        }

        fn deletion(
            &mut self,
            _opaque: u32,
            item: &Item,
            _vbucket: u16,
            _by_seqno: u64,
            _rev_seqno: u64,
            _delete_time: u32,
            _stream_id: Option<u16>,
        ) -> EngineResult<()> {
            self.events
                .push(format!("deletion:{}", String::from_utf8_lossy(item.key())));
            Ok(())
        }

        fn expiration(
            &mut self,
            _opaque: u32,
            _item: &Item,
            _vbucket: u16,
            _by_seqno: u64,
            _rev_seqno: u64,
            _delete_time: u32,
            _stream_id: Option<u16>,
        ) -> EngineResult<()> {
            Ok(())
        }

        fn snapshot_marker(
            &mut self,
            _opaque: u32,
            _vbucket: u16,
            start_seqno: u64,
            end_seqno: u64,
            _flags: u32,
            _stream_id: Option<u16>,
        ) -> EngineResult<()> {
            self.events.push(format!("snapshot:{}:{}", start_seqno, end_seqno));
            Ok(())
        }

        fn stream_end(
            &mut self,
            _opaque: u32,
            _vbucket: u16,
            _flags: u32,
            _stream_id: Option<u16>,
        ) -> EngineResult<()> {
            self.events.push("stream_end".to_string());
            Ok(())
        }

        fn set_vbucket_state(&mut self, _opaque: u32, _vbucket: u16, _state: u8) -> EngineResult<()> {
            Ok(())
        }

        fn noop(&mut self, _opaque: u32) -> EngineResult<()> {
            Ok(())
        }

        fn buffer_acknowledgement(
            &mut self,
            _opaque: u32,
            _vbucket: u16,
            _buffer_bytes: u32,
        ) -> EngineResult<()> {
            Ok(())
        }

        fn control(&mut self, _opaque: u32, _key: &[u8], _value: &[u8]) -> EngineResult<()> {
            Ok(())
        }

        fn system_event(
            &mut self,
            _opaque: u32,
            _vbucket: u16,
            _event: u32,
            _by_seqno: u64,
            _key: &[u8],
            _data: &[u8],
        ) -> EngineResult<()> {
            Ok(())
        }

        fn prepare(
            &mut self,
            _opaque: u32,
            _item: &Item,
            _vbucket: u16,
            _by_seqno: u64,
            _rev_seqno: u64,
            _durability_level: u8,
            _stream_id: Option<u16>,
        ) -> EngineResult<()> {
            Ok(())
        }

        fn commit(
            &mut self,
            _opaque: u32,
            _vbucket: u16,
            _key: &[u8],
            _prepared_seqno: u64,
            _commit_seqno: u64,
        ) -> EngineResult<()> {
            Ok(())
        }

        fn abort(
            &mut self,
            _opaque: u32,
            _vbucket: u16,
            _key: &[u8],
            _prepared_seqno: u64,
            _abort_seqno: u64,
        ) -> EngineResult<()> {
            Ok(())
        }

        fn seqno_acknowledged(
            &mut self,
            _opaque: u32,
            _vbucket: u16,
            _prepared_seqno: u64,
        ) -> EngineResult<()> {
            Ok(())
        }
    }

    #[test]
    fn dcp_backfill_in_seqno_order() {
        let engine = MemoryEngine::new(1);
        let c = cookie();
        engine.store(&c, &item(b"a", b"1"), 0, StoreSemantics::Set, None, DocState::Alive).unwrap();
        engine.store(&c, &item(b"b", b"2"), 0, StoreSemantics::Set, None, DocState::Alive).unwrap();

        let mut dcp = engine.dcp_open(&c, DCP_OPEN_PRODUCER, b"test-stream").unwrap();
        assert!(dcp.is_producer());
        let log = dcp
            .stream_req(7, 0, 0, 0, u64::MAX, 0, 0, 0)
            .unwrap();
        assert_eq!(log.len(), 1);

        let mut producers = RecordingProducers { events: Vec::new() };
        while dcp.step(&mut producers).is_ok() {}

        assert_eq!(
            producers.events,
            vec!["snapshot:0:2", "mutation:a:1", "mutation:b:2", "stream_end"]
        );

        // the queue is drained, further steps park the connection
        assert_eq!(dcp.step(&mut producers).unwrap_err(), EngineError::WouldBlock);
    }
}
