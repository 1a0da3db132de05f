// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use bytes::buf::UninitSlice;
use bytes::{Buf, BufMut};

/// A simple growable byte buffer, represented as a contiguous range of
/// bytes with separate read and write positions. Grows in multiples of the
/// target size and shrinks back once drained.
pub struct Buffer {
    data: Box<[u8]>,
    read_offset: usize,
    write_offset: usize,
    target_size: usize,
}

impl Buffer {
    pub fn new(target_size: usize) -> Self {
        Self {
            data: vec![0; target_size].into_boxed_slice(),
            read_offset: 0,
            write_offset: 0,
            target_size,
        }
    }

    /// Make room for at least `amt` additional bytes.
    pub fn reserve(&mut self, amt: usize) {
        if self.remaining() == 0 {
            self.read_offset = 0;
            self.write_offset = 0;
        }

        if amt > self.data.len() - self.write_offset {
            // compact first so growth is driven by live bytes, not position
            self.compact();

            if amt > self.data.len() - self.write_offset {
                let needed = self.write_offset + amt;
                let size = ((needed / self.target_size) + 1) * self.target_size;
                let mut data = vec![0; size].into_boxed_slice();
                data[..self.write_offset].copy_from_slice(&self.data[..self.write_offset]);
                self.data = data;
            }
        }
    }

    /// Move live bytes to the front of the buffer.
    fn compact(&mut self) {
        if self.read_offset == 0 {
            return;
        }
        let len = self.remaining();
        self.data.copy_within(self.read_offset..self.write_offset, 0);
        self.read_offset = 0;
        self.write_offset = len;
    }

    /// Reset to empty, shrinking an oversized buffer back to target size.
    pub fn clear(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;
        if self.data.len() > self.target_size {
            self.data = vec![0; self.target_size].into_boxed_slice();
        }
    }

    /// The initialized-but-unwritten area for direct reads from a stream.
    pub fn writable(&mut self) -> &mut [u8] {
        &mut self.data[self.write_offset..]
    }

    pub fn advance_write(&mut self, amt: usize) {
        self.write_offset = std::cmp::min(self.write_offset + amt, self.data.len());
    }

    pub fn writable_len(&self) -> usize {
        self.data.len() - self.write_offset
    }
}

impl std::borrow::Borrow<[u8]> for Buffer {
    fn borrow(&self) -> &[u8] {
        &self.data[self.read_offset..self.write_offset]
    }
}

impl Buf for Buffer {
    fn remaining(&self) -> usize {
        self.write_offset - self.read_offset
    }

    fn chunk(&self) -> &[u8] {
        &self.data[self.read_offset..self.write_offset]
    }

    fn advance(&mut self, amt: usize) {
        self.read_offset = std::cmp::min(self.read_offset + amt, self.write_offset);
        if self.remaining() == 0 {
            self.read_offset = 0;
            self.write_offset = 0;
            if self.data.len() > self.target_size {
                self.data = vec![0; self.target_size].into_boxed_slice();
            }
        }
    }
}

unsafe impl BufMut for Buffer {
    fn remaining_mut(&self) -> usize {
        // growable, so effectively unbounded
        usize::MAX - self.write_offset
    }

    unsafe fn advance_mut(&mut self, amt: usize) {
        self.advance_write(amt);
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        if self.writable_len() == 0 {
            self.reserve(self.target_size);
        }
        UninitSlice::new(self.writable())
    }

    fn put_slice(&mut self, src: &[u8]) {
        self.reserve(src.len());
        self.data[self.write_offset..self.write_offset + src.len()].copy_from_slice(src);
        self.write_offset += src.len();
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

    #[test]
    fn write_then_read() {
        let mut buffer = Buffer::new(16);
        buffer.put_slice(b"hello");
        assert_eq!(buffer.remaining(), 5);
        assert_eq!(buffer.chunk(), b"hello");
        buffer.advance(2);
        assert_eq!(buffer.chunk(), b"llo");
        buffer.advance(3);
        assert_eq!(buffer.remaining(), 0);
    }

    #[test]
    fn grows_past_target() {
        let mut buffer = Buffer::new(8);
        buffer.put_slice(&[0xab; 100]);
        assert_eq!(buffer.remaining(), 100);
        assert_eq!(buffer.chunk(), &[0xab; 100][..]);
    }

    #[test]
    fn compacts_on_reserve() {
        let mut buffer = Buffer::new(8);
        buffer.put_slice(&[1; 6]);
        buffer.advance(5);
        buffer.reserve(7);
        assert_eq!(buffer.remaining(), 1);
        buffer.put_slice(&[2; 7]);
        assert_eq!(buffer.remaining(), 8);
    }

    #[test]
    fn shrinks_when_drained() {
        let mut buffer = Buffer::new(8);
        buffer.put_slice(&[0; 64]);
        buffer.advance(64);
        assert!(buffer.writable_len() <= 8);
    }

    #[test]
    fn direct_write_api() {
        let mut buffer = Buffer::new(8);
        let writable = buffer.writable();
        writable[..3].copy_from_slice(b"abc");
        buffer.advance_write(3);
        assert_eq!(buffer.chunk(), b"abc");
    }
}
