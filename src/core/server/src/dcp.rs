// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The producer half of the DCP sub-protocol: serialize the messages the
//! engine emits from `step()` into the session's send pipeline. Large item
//! values are chained from engine-owned storage instead of being copied;
//! the engine's reference is dropped once the bytes are on the wire.

use engine::{DcpMessageProducers, EngineResult, Item};
use protocol_common::Compose;
use protocol_mcbp::*;
use session::{Session, SendBuffer};
use std::sync::Arc;

/// Values at least this large are chained rather than copied.
const CHAIN_THRESHOLD: usize = 4096;

/// A send buffer holding a reference into engine-owned storage. Dropping
/// it releases the engine's item reference.
pub(crate) struct ItemSendBuffer {
    value: Arc<Vec<u8>>,
}

impl SendBuffer for ItemSendBuffer {
    fn payload(&self) -> &[u8] {
        &self.value
    }
}

pub(crate) struct McbpDcpProducers<'a> {
    session: &'a mut Session,
    /// Peer negotiated collections: deletions use the v2 encoding.
    collections: bool,
    /// Engine emits collection-prefixed keys which must be stripped for a
    /// peer without collections.
    collection_prefixed_keys: bool,
}

impl<'a> McbpDcpProducers<'a> {
    pub fn new(session: &'a mut Session, collections: bool) -> Self {
        Self {
            session,
            collections,
            collection_prefixed_keys: false,
        }
    }

    fn framing_extras(stream_id: Option<u16>) -> Vec<u8> {
        let mut buf = Vec::new();
        if let Some(id) = stream_id {
            encode_frame_info(
                u16::from(FrameInfoId::DcpStreamId),
                &id.to_be_bytes(),
                &mut buf,
            );
        }
        buf
    }

    /// Emit a request whose value may be chained from the item.
    fn emit_with_value(&mut self, message: RequestMessage<'_>, item: &Item, value_len: usize) {
        if value_len >= CHAIN_THRESHOLD {
            message.compose_preamble(self.session, value_len);
            self.session.chain(Box::new(ItemSendBuffer {
                value: item.value_handle(),
            }));
        } else {
            let message = RequestMessage { value: item.value(), ..message };
            message.compose(self.session);
        }
    }
}

/// Remove the unsigned-LEB128 collection id from the front of a key.
pub(crate) fn strip_collection_id(key: &[u8]) -> &[u8] {
    let mut index = 0;
    while index < key.len() && key[index] & 0x80 != 0 {
        index += 1;
    }
    if index < key.len() {
        index += 1;
    }
    &key[index..]
}

impl<'a> DcpMessageProducers for McbpDcpProducers<'a> {
    fn mutation(
        &mut self,
        opaque: u32,
        item: &Item,
        vbucket: u16,
        by_seqno: u64,
        rev_seqno: u64,
        lock_time: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()> {
        // by_seqno[8] rev_seqno[8] flags[4] expiration[4] lock_time[4]
        // nmeta[2] nru[1]
        let mut extras = Vec::with_capacity(31);
        extras.extend_from_slice(&by_seqno.to_be_bytes());
        extras.extend_from_slice(&rev_seqno.to_be_bytes());
        extras.extend_from_slice(&item.flags().to_be_bytes());
        extras.extend_from_slice(&item.expiry().to_be_bytes());
        extras.extend_from_slice(&lock_time.to_be_bytes());
        extras.extend_from_slice(&0u16.to_be_bytes());
        extras.push(0);

        let framing_extras = Self::framing_extras(stream_id);
        let message = RequestMessage {
            opaque,
            vbucket,
            cas: item.cas(),
            datatype: item.datatype(),
            framing_extras: &framing_extras,
            extras: &extras,
            key: item.key(),
            ..RequestMessage::client(Opcode::DcpMutation)
        };
        self.emit_with_value(message, item, item.value().len());
        Ok(())
    }

    fn deletion(
        &mut self,
        opaque: u32,
        item: &Item,
        vbucket: u16,
        by_seqno: u64,
        rev_seqno: u64,
        delete_time: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()> {
        let framing_extras = Self::framing_extras(stream_id);
        let mut extras = Vec::with_capacity(20);
        extras.extend_from_slice(&by_seqno.to_be_bytes());
        extras.extend_from_slice(&rev_seqno.to_be_bytes());

        let key;
        if self.collections {
            // v2: carries the delete time and keeps the collection prefix
            extras.extend_from_slice(&delete_time.to_be_bytes());
            key = item.key();
        } else {
            // v1: nmeta trailer, collection prefix stripped
            extras.extend_from_slice(&0u16.to_be_bytes());
            key = if self.collection_prefixed_keys {
                strip_collection_id(item.key())
            } else {
                item.key()
            };
        }

        let message = RequestMessage {
            opaque,
            vbucket,
            cas: item.cas(),
            datatype: item.datatype(),
            framing_extras: &framing_extras,
            extras: &extras,
            key,
            ..RequestMessage::client(Opcode::DcpDeletion)
        };
        self.emit_with_value(message, item, item.value().len());
        Ok(())
    }

    fn expiration(
        &mut self,
        opaque: u32,
        item: &Item,
        vbucket: u16,
        by_seqno: u64,
        rev_seqno: u64,
        delete_time: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()> {
        let framing_extras = Self::framing_extras(stream_id);
        let mut extras = Vec::with_capacity(20);
        extras.extend_from_slice(&by_seqno.to_be_bytes());
        extras.extend_from_slice(&rev_seqno.to_be_bytes());
        extras.extend_from_slice(&delete_time.to_be_bytes());

        let message = RequestMessage {
            opaque,
            vbucket,
            cas: item.cas(),
            framing_extras: &framing_extras,
            extras: &extras,
            key: item.key(),
            ..RequestMessage::client(Opcode::DcpExpiration)
        };
        message.compose(self.session);
        Ok(())
    }

    fn snapshot_marker(
        &mut self,
        opaque: u32,
        vbucket: u16,
        start_seqno: u64,
        end_seqno: u64,
        flags: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()> {
        let framing_extras = Self::framing_extras(stream_id);
        let mut extras = Vec::with_capacity(20);
        extras.extend_from_slice(&start_seqno.to_be_bytes());
        extras.extend_from_slice(&end_seqno.to_be_bytes());
        extras.extend_from_slice(&flags.to_be_bytes());

        let message = RequestMessage {
            opaque,
            vbucket,
            framing_extras: &framing_extras,
            extras: &extras,
            ..RequestMessage::client(Opcode::DcpSnapshotMarker)
        };
        message.compose(self.session);
        Ok(())
    }

    fn stream_end(
        &mut self,
        opaque: u32,
        vbucket: u16,
        flags: u32,
        stream_id: Option<u16>,
    ) -> EngineResult<()> {
        let framing_extras = Self::framing_extras(stream_id);
        let extras = flags.to_be_bytes();
        let message = RequestMessage {
            opaque,
            vbucket,
            framing_extras: &framing_extras,
            extras: &extras,
            ..RequestMessage::client(Opcode::DcpStreamEnd)
        };
        message.compose(self.session);
        Ok(())
    }

    fn set_vbucket_state(&mut self, opaque: u32, vbucket: u16, state: u8) -> EngineResult<()> {
        let extras = [state];
        let message = RequestMessage {
            opaque,
            vbucket,
            extras: &extras,
            ..RequestMessage::client(Opcode::DcpSetVbucketState)
        };
        message.compose(self.session);
        Ok(())
    }

    fn noop(&mut self, opaque: u32) -> EngineResult<()> {
        let message = RequestMessage {
            opaque,
            ..RequestMessage::client(Opcode::DcpNoop)
        };
        message.compose(self.session);
        Ok(())
    }

    fn buffer_acknowledgement(
        &mut self,
        opaque: u32,
        vbucket: u16,
        buffer_bytes: u32,
    ) -> EngineResult<()> {
        let extras = buffer_bytes.to_be_bytes();
        let message = RequestMessage {
            opaque,
            vbucket,
            extras: &extras,
            ..RequestMessage::client(Opcode::DcpBufferAcknowledgement)
        };
        message.compose(self.session);
        Ok(())
    }

    fn control(&mut self, opaque: u32, key: &[u8], value: &[u8]) -> EngineResult<()> {
        let message = RequestMessage {
            opaque,
            key,
            value,
            ..RequestMessage::client(Opcode::DcpControl)
        };
        message.compose(self.session);
        Ok(())
    }

    fn system_event(
        &mut self,
        opaque: u32,
        vbucket: u16,
        event: u32,
        by_seqno: u64,
        key: &[u8],
        data: &[u8],
    ) -> EngineResult<()> {
        // by_seqno[8] event[4] version[1]
        let mut extras = Vec::with_capacity(13);
        extras.extend_from_slice(&by_seqno.to_be_bytes());
        extras.extend_from_slice(&event.to_be_bytes());
        extras.push(0);

        let message = RequestMessage {
            opaque,
            vbucket,
            extras: &extras,
            key,
            value: data,
            ..RequestMessage::client(Opcode::DcpSystemEvent)
        };
        message.compose(self.session);
        Ok(())
    }

    fn prepare(
        &mut self,
        opaque: u32,
        item: &Item,
        vbucket: u16,
        by_seqno: u64,
        rev_seqno: u64,
        durability_level: u8,
        stream_id: Option<u16>,
    ) -> EngineResult<()> {
        // by_seqno[8] rev_seqno[8] flags[4] expiration[4] lock_time[4]
        // nru[1] durability_level[1]
        let mut extras = Vec::with_capacity(30);
        extras.extend_from_slice(&by_seqno.to_be_bytes());
        extras.extend_from_slice(&rev_seqno.to_be_bytes());
        extras.extend_from_slice(&item.flags().to_be_bytes());
        extras.extend_from_slice(&item.expiry().to_be_bytes());
        extras.extend_from_slice(&0u32.to_be_bytes());
        extras.push(0);
        extras.push(durability_level);

        let framing_extras = Self::framing_extras(stream_id);
        let message = RequestMessage {
            opaque,
            vbucket,
            cas: item.cas(),
            datatype: item.datatype(),
            framing_extras: &framing_extras,
            extras: &extras,
            key: item.key(),
            ..RequestMessage::client(Opcode::DcpPrepare)
        };
        self.emit_with_value(message, item, item.value().len());
        Ok(())
    }

    fn commit(
        &mut self,
        opaque: u32,
        vbucket: u16,
        key: &[u8],
        prepared_seqno: u64,
        commit_seqno: u64,
    ) -> EngineResult<()> {
        let mut extras = Vec::with_capacity(16);
        extras.extend_from_slice(&prepared_seqno.to_be_bytes());
        extras.extend_from_slice(&commit_seqno.to_be_bytes());

        let message = RequestMessage {
            opaque,
            vbucket,
            extras: &extras,
            key,
            ..RequestMessage::client(Opcode::DcpCommit)
        };
        message.compose(self.session);
        Ok(())
    }

    fn abort(
        &mut self,
        opaque: u32,
        vbucket: u16,
        key: &[u8],
        prepared_seqno: u64,
        abort_seqno: u64,
    ) -> EngineResult<()> {
        let mut extras = Vec::with_capacity(16);
        extras.extend_from_slice(&prepared_seqno.to_be_bytes());
        extras.extend_from_slice(&abort_seqno.to_be_bytes());

        let message = RequestMessage {
            opaque,
            vbucket,
            extras: &extras,
            key,
            ..RequestMessage::client(Opcode::DcpAbort)
        };
        message.compose(self.session);
        Ok(())
    }

    fn seqno_acknowledged(
        &mut self,
        opaque: u32,
        vbucket: u16,
        prepared_seqno: u64,
    ) -> EngineResult<()> {
        let extras = prepared_seqno.to_be_bytes();
        let message = RequestMessage {
            opaque,
            vbucket,
            extras: &extras,
            ..RequestMessage::client(Opcode::DcpSeqnoAcknowledged)
        };
        message.compose(self.session);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    /// A DCP mutation with a large value is chained from engine-owned
    /// storage; once the socket has taken the bytes the engine observes
    /// exactly one release (the reference count drops to zero).
    #[test]
    fn mutation_value_chained_and_released() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");

        const VALUE_LEN: usize = 1024 * 1024;
        // header + mutation extras + key + value
        let expected = 24 + 31 + 3 + VALUE_LEN;

        let reader = std::thread::spawn(move || {
            let mut stream = std::net::TcpStream::connect(addr).expect("connect");
            let mut bytes = vec![0u8; expected];
            stream.read_exact(&mut bytes).expect("read");
            bytes
        });

        let (server_stream, _) = listener.accept().expect("accept");
        server_stream.set_nonblocking(true).expect("nonblocking");
        let mut session = Session::new(net::Stream::from(net::TcpStream::from_std(server_stream)));

        let value = Arc::new(vec![0xab; VALUE_LEN]);
        let weak = Arc::downgrade(&value);
        let mut item = Item::new(b"key", Vec::new(), protocol_mcbp::Datatype::RAW, 0, 0);
        item.share_value(value);

        {
            let mut producers = McbpDcpProducers::new(&mut session, false);
            producers.mutation(7, &item, 0, 1, 1, 0, None).expect("mutation");
        }
        drop(item);
        assert!(weak.upgrade().is_some(), "chained value held until flushed");

        while session.send_queue_size() > 0 {
            match session.flush() {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(e) => panic!("flush failed: {}", e),
            }
        }

        assert!(weak.upgrade().is_none(), "engine reference released after send");

        let bytes = reader.join().expect("reader");
        let header = PacketHeader::parse(&bytes).expect("header");
        assert_eq!(header.magic, Magic::ClientRequest);
        assert_eq!(header.opcode, Opcode::DcpMutation as u8);
        assert_eq!(header.extras_len, 31);
        assert_eq!(header.key_len, 3);
        assert_eq!(header.value_len(), VALUE_LEN);
        assert_eq!(bytes[24 + 31 + 3], 0xab);
    }

    #[test]
    fn collection_id_stripping() {
        assert_eq!(strip_collection_id(&[0x00, b'k', b'e', b'y']), b"key");
        // multi-byte leb128 prefix
        assert_eq!(strip_collection_id(&[0x80, 0x01, b'k']), b"k");
        assert_eq!(strip_collection_id(&[]), b"");
    }

    #[test]
    fn stream_id_frame_info() {
        let buf = McbpDcpProducers::framing_extras(Some(0x0102));
        assert_eq!(buf, vec![0x22, 0x01, 0x02]);
        assert!(McbpDcpProducers::framing_extras(None).is_empty());
    }
}
