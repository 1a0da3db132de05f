// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::buffer::Buffer;
use bytes::buf::UninitSlice;
use bytes::{Buf, BufMut};
use std::collections::VecDeque;
use std::io::{ErrorKind, Write};

/// Externally owned memory that can be spliced into the send pipeline
/// without copying. The backing storage (and whatever reference it holds,
/// for instance an engine item) is dropped once the payload has been fully
/// flushed to the stream.
pub trait SendBuffer: Send {
    fn payload(&self) -> &[u8];
}

/// A send buffer over plain heap bytes.
pub struct HeapSendBuffer {
    data: Box<[u8]>,
}

impl HeapSendBuffer {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data: data.into_boxed_slice() }
    }
}

impl SendBuffer for HeapSendBuffer {
    fn payload(&self) -> &[u8] {
        &self.data
    }
}

enum Segment {
    /// The next `len` readable bytes of the ring buffer.
    Ring { len: usize },
    /// An external payload, flushed from `offset`.
    External { buf: Box<dyn SendBuffer>, offset: usize },
}

/// The ordered write side of a session: bytes copied into a ring buffer
/// interleaved, in transmit order, with zero-copy references to external
/// storage.
pub struct SendPipeline {
    ring: Buffer,
    segments: VecDeque<Segment>,
    queued: usize,
}

impl SendPipeline {
    pub fn new(target_size: usize) -> Self {
        Self {
            ring: Buffer::new(target_size),
            segments: VecDeque::new(),
            queued: 0,
        }
    }

    /// Total bytes waiting to be flushed.
    pub fn queued(&self) -> usize {
        self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.queued == 0
    }

    fn note_copied(&mut self, len: usize) {
        if len == 0 {
            return;
        }
        self.queued += len;
        if let Some(Segment::Ring { len: tail }) = self.segments.back_mut() {
            *tail += len;
        } else {
            self.segments.push_back(Segment::Ring { len });
        }
    }

    /// Splice externally owned bytes into the pipeline. The storage is
    /// dropped when the final byte has been written to the stream.
    pub fn chain(&mut self, buf: Box<dyn SendBuffer>) {
        let len = buf.payload().len();
        if len == 0 {
            return;
        }
        self.queued += len;
        self.segments.push_back(Segment::External { buf, offset: 0 });
    }

    /// Write as much of the pipeline as the stream will take. Returns the
    /// number of bytes flushed; `WouldBlock` from the stream ends the pass
    /// without error unless nothing at all was written.
    pub fn flush(&mut self, stream: &mut dyn Write) -> std::io::Result<usize> {
        let mut flushed = 0;

        while let Some(front) = self.segments.front_mut() {
            let result = match front {
                Segment::Ring { len } => {
                    let take = std::cmp::min(*len, self.ring.chunk().len());
                    stream.write(&self.ring.chunk()[..take])
                }
                Segment::External { buf, offset } => stream.write(&buf.payload()[*offset..]),
            };

            match result {
                Ok(0) => {
                    return Err(std::io::Error::new(ErrorKind::WriteZero, "stream closed"));
                }
                Ok(amt) => {
                    flushed += amt;
                    self.queued -= amt;
                    match front {
                        Segment::Ring { len } => {
                            self.ring.advance(amt);
                            *len -= amt;
                            if *len == 0 {
                                self.segments.pop_front();
                            }
                        }
                        Segment::External { buf, offset } => {
                            *offset += amt;
                            if *offset == buf.payload().len() {
                                // dropping the segment releases the storage
                                self.segments.pop_front();
                            }
                        }
                    }
                }
                Err(e) => match e.kind() {
                    ErrorKind::WouldBlock => {
                        if flushed == 0 {
                            return Err(e);
                        }
                        return Ok(flushed);
                    }
                    ErrorKind::Interrupted => {}
                    _ => return Err(e),
                },
            }
        }

        Ok(flushed)
    }
}

unsafe impl BufMut for SendPipeline {
    fn remaining_mut(&self) -> usize {
        usize::MAX - self.queued
    }

    unsafe fn advance_mut(&mut self, amt: usize) {
        self.ring.advance_write(amt);
        self.note_copied(amt);
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        self.ring.chunk_mut()
    }

    fn put_slice(&mut self, src: &[u8]) {
        self.ring.put_slice(src);
        self.note_copied(src.len());
    }

    fn put<T: Buf>(&mut self, mut src: T)
    where
        Self: Sized,
    {
        while src.has_remaining() {
            let chunk = src.chunk();
            let len = chunk.len();
            self.put_slice(chunk);
            src.advance(len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSendBuffer {
        data: Vec<u8>,
        releases: Arc<AtomicUsize>,
    }

    impl SendBuffer for CountingSendBuffer {
        fn payload(&self) -> &[u8] {
            &self.data
        }
    }

    impl Drop for CountingSendBuffer {
        fn drop(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A sink which accepts a limited number of bytes per write call.
    struct ThrottledSink {
        written: Vec<u8>,
        per_call: usize,
        block_after: Option<usize>,
    }

    impl Write for ThrottledSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(limit) = self.block_after {
                if self.written.len() >= limit {
                    return Err(std::io::Error::from(ErrorKind::WouldBlock));
                }
            }
            let take = std::cmp::min(self.per_call, buf.len());
            self.written.extend_from_slice(&buf[..take]);
            Ok(take)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn ordering_preserved_across_chain() {
        let mut pipeline = SendPipeline::new(64);
        pipeline.put_slice(b"header");
        pipeline.chain(Box::new(HeapSendBuffer::new(b"value".to_vec())));
        pipeline.put_slice(b"trailer");
        assert_eq!(pipeline.queued(), 18);

        let mut sink = ThrottledSink { written: Vec::new(), per_call: 4, block_after: None };
        let flushed = pipeline.flush(&mut sink).unwrap();
        assert_eq!(flushed, 18);
        assert_eq!(sink.written, b"headervaluetrailer");
        assert!(pipeline.is_empty());
    }

    #[test]
    fn release_fires_exactly_once_after_full_flush() {
        let releases = Arc::new(AtomicUsize::new(0));
        let mut pipeline = SendPipeline::new(16);
        pipeline.put_slice(b"hdr");
        pipeline.chain(Box::new(CountingSendBuffer {
            data: vec![0xaa; 32],
            releases: releases.clone(),
        }));

        // flush part of the chained payload, then stall
        let mut sink = ThrottledSink { written: Vec::new(), per_call: 8, block_after: Some(16) };
        let _ = pipeline.flush(&mut sink).unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 0);
        assert!(!pipeline.is_empty());

        // drain the rest
        sink.block_after = None;
        let _ = pipeline.flush(&mut sink).unwrap();
        assert!(pipeline.is_empty());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert_eq!(sink.written.len(), 35);
    }

    #[test]
    fn would_block_with_no_progress_is_an_error() {
        let mut pipeline = SendPipeline::new(16);
        pipeline.put_slice(b"data");
        let mut sink = ThrottledSink { written: Vec::new(), per_call: 4, block_after: Some(0) };
        let err = pipeline.flush(&mut sink).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
        assert_eq!(pipeline.queued(), 4);
    }

    #[test]
    fn queue_size_accounting() {
        let mut pipeline = SendPipeline::new(16);
        assert!(pipeline.is_empty());
        pipeline.put_slice(b"abcd");
        pipeline.put_slice(b"ef");
        // consecutive copies merge into one ring segment
        assert_eq!(pipeline.segments.len(), 1);
        assert_eq!(pipeline.queued(), 6);

        let mut sink = ThrottledSink { written: Vec::new(), per_call: 3, block_after: Some(3) };
        let _ = pipeline.flush(&mut sink).unwrap();
        assert_eq!(pipeline.queued(), 3);
    }
}
