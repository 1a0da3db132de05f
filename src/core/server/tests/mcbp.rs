// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Integration tests which launch a full server process and talk the
//! binary protocol to it over loopback TCP.

use config::McbpserverConfig;
use engine::memory::MemoryEngine;
use engine::{CookieIo, DocStateFilter, EngineError, EngineResult, Item, KvEngine, StoreResult,
    StoreSemantics};
use protocol_common::Compose;
use protocol_mcbp::*;
use server::{Process, ProcessBuilder};
use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config(port: u16) -> McbpserverConfig {
    let mut config: McbpserverConfig = toml::from_str(
        r#"
        [server]
        host = "127.0.0.1"

        [worker]
        threads = 1
        timeout = 10

        [bucket]
        vbuckets = 8
        "#,
    )
    .expect("config parses");
    config.server_mut().set_port(format!("{}", port));
    config
}

fn start(port: u16) -> Process {
    let config = config(port);
    let drain = logger::configure_logging(&config);
    ProcessBuilder::new(&config, drain)
        .expect("launch failed")
        .spawn()
}

fn start_with_engine(port: u16, engine: Arc<dyn KvEngine>) -> Process {
    let config = config(port);
    let drain = logger::configure_logging(&config);
    ProcessBuilder::with_engines(&config, drain, vec![("default".to_string(), engine)])
        .expect("launch failed")
        .spawn()
}

fn connect(port: u16) -> TcpStream {
    // the listener thread may still be coming up
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)) {
            stream
                .set_read_timeout(Some(Duration::from_secs(10)))
                .expect("set timeout");
            stream.set_nodelay(true).expect("set nodelay");
            return stream;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("could not connect to 127.0.0.1:{}", port);
}

fn read_packet(stream: &mut TcpStream) -> (PacketHeader, Vec<u8>) {
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header).expect("read header");
    let header = PacketHeader::parse(&header).expect("parse header");
    let mut body = vec![0u8; header.body_len as usize];
    stream.read_exact(&mut body).expect("read body");
    (header, body)
}

fn value_of(header: &PacketHeader, body: &[u8]) -> Vec<u8> {
    let skip =
        header.framing_extras_len as usize + header.extras_len as usize + header.key_len as usize;
    body[skip..].to_vec()
}

fn set_request(key: &[u8], value: &[u8], opaque: u32) -> Vec<u8> {
    let extras = [0u8; 8];
    let message = RequestMessage {
        opaque,
        extras: &extras,
        key,
        value,
        ..RequestMessage::client(Opcode::Set)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    wire
}

fn get_request(key: &[u8], opaque: u32, vbucket: u16) -> Vec<u8> {
    let message = RequestMessage {
        opaque,
        vbucket,
        key,
        ..RequestMessage::client(Opcode::Get)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    wire
}

fn simple_request(opcode: Opcode, opaque: u32) -> Vec<u8> {
    let message = RequestMessage {
        opaque,
        ..RequestMessage::client(opcode)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    wire
}

#[test]
fn get_hit_roundtrip() {
    let process = start(21251);
    let mut stream = connect(21251);

    stream.write_all(&set_request(b"k", b"hello", 7)).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));
    assert_ne!(header.cas, 0);

    stream.write_all(&get_request(b"k", 0x1, 0)).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.magic, Magic::ClientResponse);
    assert_eq!(header.opcode, Opcode::Get as u8);
    assert_eq!(header.status(), Ok(Status::Success));
    assert_eq!(header.opaque, 0x1);
    assert_eq!(header.extras_len, 4);
    assert_eq!(header.body_len, 9);
    assert_eq!(&body[..4], &[0, 0, 0, 0]);
    assert_eq!(&body[4..], b"hello");

    process.shutdown();
}

#[test]
fn get_miss() {
    let process = start(21252);
    let mut stream = connect(21252);

    stream.write_all(&get_request(b"nope", 9, 0)).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::KeyEnoent));
    assert_eq!(header.opaque, 9);

    process.shutdown();
}

/// A structurally valid durability frame info with level zero is rejected
/// with its own status, and the connection survives.
#[test]
fn durability_level_zero_rejected_without_close() {
    let process = start(21253);
    let mut stream = connect(21253);

    let mut framing_extras = Vec::new();
    encode_frame_info(1, &[0], &mut framing_extras);
    let extras = [0u8; 8];
    let message = RequestMessage {
        opaque: 11,
        framing_extras: &framing_extras,
        extras: &extras,
        key: b"k",
        value: b"v",
        ..RequestMessage::client(Opcode::Set)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    assert_eq!(wire[0], 0x08); // AltClientRequest
    stream.write_all(&wire).unwrap();

    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::DurabilityInvalidLevel));

    // the connection must still be usable
    stream.write_all(&simple_request(Opcode::Noop, 12)).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));
    assert_eq!(header.opaque, 12);

    process.shutdown();
}

/// Durability on an opcode that does not support it is a protocol error
/// and closes the connection.
#[test]
fn durability_on_get_rejected() {
    let process = start(21254);
    let mut stream = connect(21254);

    let mut framing_extras = Vec::new();
    encode_frame_info(1, &[1], &mut framing_extras);
    let message = RequestMessage {
        opaque: 13,
        framing_extras: &framing_extras,
        key: b"k",
        ..RequestMessage::client(Opcode::Get)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();

    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Einval));

    // server closes after the error
    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).unwrap_or(0), 0);

    process.shutdown();
}

#[test]
fn pipelined_responses_keep_request_order() {
    let process = start(21255);
    let mut stream = connect(21255);

    let mut wire = Vec::new();
    wire.extend_from_slice(&set_request(b"a", b"1", 100));
    wire.extend_from_slice(&get_request(b"a", 101, 0));
    wire.extend_from_slice(&get_request(b"missing", 102, 0));
    wire.extend_from_slice(&get_request(b"a", 103, 0));
    stream.write_all(&wire).unwrap();

    let mut opaques = Vec::new();
    for _ in 0..4 {
        let (header, _) = read_packet(&mut stream);
        opaques.push(header.opaque);
    }
    assert_eq!(opaques, vec![100, 101, 102, 103]);

    process.shutdown();
}

#[test]
fn unknown_opcode_answers_without_closing() {
    let process = start(21256);
    let mut stream = connect(21256);

    // 0x5a is the retired DcpFlush slot
    let mut wire = Vec::new();
    PacketHeader {
        magic: Magic::ClientRequest,
        opcode: 0x5a,
        framing_extras_len: 0,
        key_len: 0,
        extras_len: 0,
        datatype: Datatype::RAW,
        vbucket_or_status: 0,
        body_len: 0,
        opaque: 21,
        cas: 0,
    }
    .compose(&mut wire);
    stream.write_all(&wire).unwrap();

    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::UnknownCommand));
    assert_eq!(header.opaque, 21);

    stream.write_all(&simple_request(Opcode::Noop, 22)).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));

    process.shutdown();
}

#[test]
fn invalid_magic_closes_connection() {
    let process = start(21257);
    let mut stream = connect(21257);

    let mut wire = vec![0x42];
    wire.extend_from_slice(&[0u8; 23]);
    stream.write_all(&wire).unwrap();

    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Einval));
    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).unwrap_or(0), 0);

    process.shutdown();
}

#[test]
fn hello_negotiation_echoes_intersection() {
    let process = start(21258);
    let mut stream = connect(21258);

    let mut value = Vec::new();
    for feature in [0x07u16, 0x0b, 0x5555, 0x07] {
        value.extend_from_slice(&feature.to_be_bytes());
    }
    let message = RequestMessage {
        opaque: 31,
        key: b"test-agent",
        value: &value,
        ..RequestMessage::client(Opcode::Hello)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();

    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));
    let features: HashSet<u16> = body
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(features, HashSet::from([0x07, 0x0b]));

    process.shutdown();
}

/// Two back-to-back requests to an unowned vbucket: the first response
/// carries the cluster map, the second omits it because the revision has
/// not changed.
#[test]
fn not_my_vbucket_deduplicates_cluster_map() {
    let process = start(21259);
    let mut stream = connect(21259);

    let map = br#"{"rev":1,"vBucketServerMap":{}}"#;
    let extras = 1u32.to_be_bytes();
    let message = RequestMessage {
        opaque: 40,
        extras: &extras,
        value: map,
        ..RequestMessage::client(Opcode::SetClusterConfig)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));

    stream.write_all(&get_request(b"k", 41, 100)).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::NotMyVbucket));
    assert_eq!(value_of(&header, &body), map.to_vec());

    stream.write_all(&get_request(b"k", 42, 100)).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::NotMyVbucket));
    assert!(value_of(&header, &body).is_empty());

    process.shutdown();
}

#[test]
fn increment_and_decrement() {
    let process = start(21260);
    let mut stream = connect(21260);

    let mut extras = Vec::new();
    extras.extend_from_slice(&5u64.to_be_bytes());
    extras.extend_from_slice(&100u64.to_be_bytes());
    extras.extend_from_slice(&0u32.to_be_bytes());
    let message = RequestMessage {
        opaque: 50,
        extras: &extras,
        key: b"ctr",
        ..RequestMessage::client(Opcode::Increment)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));
    assert_eq!(value_of(&header, &body), 100u64.to_be_bytes().to_vec());

    stream.write_all(&wire).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));
    assert_eq!(value_of(&header, &body), 105u64.to_be_bytes().to_vec());

    process.shutdown();
}

#[test]
fn append_to_missing_is_not_stored() {
    let process = start(21261);
    let mut stream = connect(21261);

    let message = RequestMessage {
        opaque: 60,
        key: b"nothing",
        value: b"tail",
        ..RequestMessage::client(Opcode::Append)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::NotStored));

    process.shutdown();
}

#[test]
fn append_concatenates() {
    let process = start(21262);
    let mut stream = connect(21262);

    stream.write_all(&set_request(b"k", b"hello", 70)).unwrap();
    let _ = read_packet(&mut stream);

    let message = RequestMessage {
        opaque: 71,
        key: b"k",
        value: b" world",
        ..RequestMessage::client(Opcode::Append)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));

    stream.write_all(&get_request(b"k", 72, 0)).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(value_of(&header, &body), b"hello world".to_vec());

    process.shutdown();
}

#[test]
fn subdoc_end_to_end() {
    let process = start(21263);
    let mut stream = connect(21263);

    stream
        .write_all(&set_request(b"doc", br#"{"name":"ann","tags":["a"]}"#, 80))
        .unwrap();
    let _ = read_packet(&mut stream);

    // single-path lookup
    let path = b"name";
    let mut extras = Vec::new();
    extras.extend_from_slice(&(path.len() as u16).to_be_bytes());
    extras.push(0);
    let message = RequestMessage {
        opaque: 81,
        extras: &extras,
        key: b"doc",
        value: path,
        ..RequestMessage::client(Opcode::SubdocGet)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));
    assert_eq!(value_of(&header, &body), b"\"ann\"".to_vec());

    // multi mutation: upsert a field and push a tag
    let mut specs = Vec::new();
    encode_multi_spec(
        &SubdocMultiSpec {
            opcode: Opcode::SubdocDictUpsert,
            path_flags: SubdocPathFlags::NONE,
            path: b"age",
            value: b"3",
        },
        true,
        &mut specs,
    );
    encode_multi_spec(
        &SubdocMultiSpec {
            opcode: Opcode::SubdocArrayPushLast,
            path_flags: SubdocPathFlags::NONE,
            path: b"tags",
            value: b"\"b\"",
        },
        true,
        &mut specs,
    );
    let message = RequestMessage {
        opaque: 82,
        key: b"doc",
        value: &specs,
        ..RequestMessage::client(Opcode::SubdocMultiMutation)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));

    stream.write_all(&get_request(b"doc", 83, 0)).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(
        value_of(&header, &body),
        br#"{"age":3,"name":"ann","tags":["a","b"]}"#.to_vec()
    );

    // multi lookup with a failing op in the middle
    let mut specs = Vec::new();
    for path in [&b"missing"[..], &b"age"[..]] {
        encode_multi_spec(
            &SubdocMultiSpec {
                opcode: Opcode::SubdocGet,
                path_flags: SubdocPathFlags::NONE,
                path,
                value: b"",
            },
            false,
            &mut specs,
        );
    }
    let message = RequestMessage {
        opaque: 84,
        key: b"doc",
        value: &specs,
        ..RequestMessage::client(Opcode::SubdocMultiLookup)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::SubdocMultiPathFailure));
    let value = value_of(&header, &body);
    // entry 0: path-enoent, no result
    assert_eq!(
        u16::from_be_bytes([value[0], value[1]]),
        Status::SubdocPathEnoent as u16
    );
    assert_eq!(u32::from_be_bytes([value[2], value[3], value[4], value[5]]), 0);
    // entry 1: success with the value
    assert_eq!(
        u16::from_be_bytes([value[6], value[7]]),
        Status::Success as u16
    );
    assert_eq!(&value[12..], b"3");

    process.shutdown();
}

#[test]
fn quit_closes_after_response() {
    let process = start(21264);
    let mut stream = connect(21264);

    stream.write_all(&simple_request(Opcode::Quit, 90)).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));
    let mut buf = [0u8; 1];
    assert_eq!(stream.read(&mut buf).unwrap_or(0), 0);

    process.shutdown();
}

/// An engine which suspends the first get for every key and completes it
/// from another thread: the connection must not advance past execute and
/// the resumed response carries the original opaque.
struct BlockingEngine {
    inner: MemoryEngine,
    blocked: Mutex<HashSet<Vec<u8>>>,
    suspensions: AtomicUsize,
}

impl BlockingEngine {
    fn new(vbuckets: u16) -> Self {
        Self {
            inner: MemoryEngine::new(vbuckets),
            blocked: Mutex::new(HashSet::new()),
            suspensions: AtomicUsize::new(0),
        }
    }
}

impl KvEngine for BlockingEngine {
    fn get(
        &self,
        cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        filter: DocStateFilter,
    ) -> EngineResult<Item> {
        let first_time = self
            .blocked
            .lock()
            .map(|mut blocked| blocked.insert(key.to_vec()))
            .unwrap_or(false);
        if first_time {
            self.suspensions.fetch_add(1, Ordering::SeqCst);
            let notify = cookie.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                notify.notify_io_complete(Ok(()));
            });
            return Err(EngineError::WouldBlock);
        }
        self.inner.get(cookie, key, vbucket, filter)
    }

    fn get_locked(
        &self,
        cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        lock_seconds: u32,
    ) -> EngineResult<Item> {
        self.inner.get_locked(cookie, key, vbucket, lock_seconds)
    }

    fn unlock(&self, cookie: &CookieIo, key: &[u8], vbucket: u16, cas: u64) -> EngineResult<()> {
        self.inner.unlock(cookie, key, vbucket, cas)
    }

    fn store(
        &self,
        cookie: &CookieIo,
        item: &Item,
        cas: u64,
        semantics: StoreSemantics,
        durability: Option<engine::DurabilityRequirement>,
        document_state: engine::DocState,
    ) -> EngineResult<StoreResult> {
        self.inner
            .store(cookie, item, cas, semantics, durability, document_state)
    }

    fn remove(
        &self,
        cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        cas: u64,
        durability: Option<engine::DurabilityRequirement>,
    ) -> EngineResult<StoreResult> {
        self.inner.remove(cookie, key, vbucket, cas, durability)
    }

    fn arithmetic(
        &self,
        cookie: &CookieIo,
        key: &[u8],
        vbucket: u16,
        args: engine::ArithmeticArgs,
    ) -> EngineResult<(u64, StoreResult)> {
        self.inner.arithmetic(cookie, key, vbucket, args)
    }

    fn touch(&self, cookie: &CookieIo, key: &[u8], vbucket: u16, expiry: u32) -> EngineResult<Item> {
        self.inner.touch(cookie, key, vbucket, expiry)
    }

    fn flush(&self, cookie: &CookieIo) -> EngineResult<()> {
        self.inner.flush(cookie)
    }

    fn vbucket_uuid(&self, vbucket: u16) -> EngineResult<u64> {
        self.inner.vbucket_uuid(vbucket)
    }

    fn dcp_open(
        &self,
        cookie: &CookieIo,
        flags: u32,
        name: &[u8],
    ) -> EngineResult<Box<dyn engine::DcpConnection>> {
        self.inner.dcp_open(cookie, flags, name)
    }
}

#[test]
fn ewouldblock_resume_preserves_opaque() {
    let engine = Arc::new(BlockingEngine::new(8));
    let process = start_with_engine(21265, engine.clone());
    let mut stream = connect(21265);

    stream.write_all(&set_request(b"k", b"v", 200)).unwrap();
    let _ = read_packet(&mut stream);

    stream.write_all(&get_request(b"k", 201, 0)).unwrap();
    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.opaque, 201);
    assert_eq!(header.status(), Ok(Status::Success));
    assert_eq!(value_of(&header, &body), b"v".to_vec());
    assert_eq!(engine.suspensions.load(Ordering::SeqCst), 1);

    // a second get for the same key completes synchronously
    stream.write_all(&get_request(b"k", 202, 0)).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.opaque, 202);
    assert_eq!(header.status(), Ok(Status::Success));

    process.shutdown();
}

#[test]
fn dcp_backfill_over_the_wire() {
    let process = start(21266);
    let mut stream = connect(21266);

    stream.write_all(&set_request(b"a", b"1", 300)).unwrap();
    let _ = read_packet(&mut stream);
    stream.write_all(&set_request(b"b", b"2", 301)).unwrap();
    let _ = read_packet(&mut stream);

    // open a producer
    let mut extras = Vec::new();
    extras.extend_from_slice(&0u32.to_be_bytes());
    extras.extend_from_slice(&engine::DCP_OPEN_PRODUCER.to_be_bytes());
    let message = RequestMessage {
        opaque: 302,
        extras: &extras,
        key: b"replica-link",
        ..RequestMessage::client(Opcode::DcpOpen)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.status(), Ok(Status::Success));

    // request a stream over everything in vbucket 0
    let mut extras = Vec::new();
    extras.extend_from_slice(&0u32.to_be_bytes()); // flags
    extras.extend_from_slice(&0u32.to_be_bytes()); // reserved
    extras.extend_from_slice(&0u64.to_be_bytes()); // start
    extras.extend_from_slice(&u64::MAX.to_be_bytes()); // end
    extras.extend_from_slice(&0u64.to_be_bytes()); // uuid
    extras.extend_from_slice(&0u64.to_be_bytes()); // snap start
    extras.extend_from_slice(&0u64.to_be_bytes()); // snap end
    let message = RequestMessage {
        opaque: 303,
        extras: &extras,
        ..RequestMessage::client(Opcode::DcpStreamReq)
    };
    let mut wire = Vec::new();
    message.compose(&mut wire);
    stream.write_all(&wire).unwrap();

    let (header, body) = read_packet(&mut stream);
    assert_eq!(header.opcode, Opcode::DcpStreamReq as u8);
    assert_eq!(header.status(), Ok(Status::Success));
    // failover log: pairs of (uuid, seqno)
    assert_eq!(value_of(&header, &body).len() % 16, 0);

    // snapshot marker, both mutations in seqno order, then stream end
    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.opcode, Opcode::DcpSnapshotMarker as u8);
    assert!(header.magic.is_request());

    let mut keys = Vec::new();
    for _ in 0..2 {
        let (header, body) = read_packet(&mut stream);
        assert_eq!(header.opcode, Opcode::DcpMutation as u8);
        let extras_len = header.extras_len as usize;
        let key =
            body[extras_len..extras_len + header.key_len as usize].to_vec();
        keys.push(String::from_utf8(key).unwrap());
    }
    assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

    let (header, _) = read_packet(&mut stream);
    assert_eq!(header.opcode, Opcode::DcpStreamEnd as u8);

    process.shutdown();
}

#[test]
fn stats_terminate_with_empty_packet() {
    let process = start(21267);
    let mut stream = connect(21267);

    stream.write_all(&simple_request(Opcode::Stat, 400)).unwrap();
    let mut saw_terminator = false;
    let mut entries = 0;
    loop {
        let (header, _) = read_packet(&mut stream);
        assert_eq!(header.status(), Ok(Status::Success));
        if header.key_len == 0 && header.body_len == 0 {
            saw_terminator = true;
            break;
        }
        entries += 1;
    }
    assert!(saw_terminator);
    assert!(entries >= 2);

    process.shutdown();
}
