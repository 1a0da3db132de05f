// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;

/// A borrowed view over one complete packet. The body is laid out as
/// `framing_extras || extras || key || value`; the accessors slice those
/// sections out using the header lengths.
#[derive(Debug, Clone, Copy)]
pub struct PacketRef<'a> {
    header: PacketHeader,
    body: &'a [u8],
}

impl<'a> PacketRef<'a> {
    /// Parse a complete packet from `wire`. The buffer must hold the whole
    /// packet; callers are expected to have checked availability with the
    /// header's `total_len()` first.
    pub fn parse(wire: &'a [u8]) -> Result<PacketRef<'a>, HeaderError> {
        let header = PacketHeader::parse(wire)?;
        if wire.len() < header.total_len() {
            return Err(HeaderError::Partial);
        }
        Ok(PacketRef {
            header,
            body: &wire[HEADER_LEN..header.total_len()],
        })
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn opcode(&self) -> Result<Opcode, u8> {
        Opcode::try_from(self.header.opcode)
    }

    pub fn framing_extras(&self) -> &'a [u8] {
        &self.body[..self.header.framing_extras_len as usize]
    }

    pub fn extras(&self) -> &'a [u8] {
        let start = self.header.framing_extras_len as usize;
        &self.body[start..start + self.header.extras_len as usize]
    }

    pub fn key(&self) -> &'a [u8] {
        let start = self.header.framing_extras_len as usize + self.header.extras_len as usize;
        &self.body[start..start + self.header.key_len as usize]
    }

    pub fn value(&self) -> &'a [u8] {
        let start = self.header.framing_extras_len as usize
            + self.header.extras_len as usize
            + self.header.key_len as usize;
        &self.body[start..]
    }
}

/// A packet which owns its bytes. Assembled once the input buffer holds the
/// whole packet; stays valid across engine-induced suspensions regardless of
/// what happens to the input buffer afterwards.
#[derive(Debug, Clone, Default)]
pub struct OwnedPacket {
    wire: Box<[u8]>,
}

impl OwnedPacket {
    pub fn from_wire(wire: Vec<u8>) -> Result<OwnedPacket, HeaderError> {
        // validate eagerly so accessors can't slice out of bounds later
        PacketRef::parse(&wire)?;
        Ok(OwnedPacket { wire: wire.into_boxed_slice() })
    }

    pub fn is_empty(&self) -> bool {
        self.wire.is_empty()
    }

    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    pub fn as_ref(&self) -> PacketRef<'_> {
        // the constructor proved this parses
        PacketRef::parse(&self.wire).unwrap()
    }

    pub fn header(&self) -> PacketHeader {
        *self.as_ref().header()
    }
}
