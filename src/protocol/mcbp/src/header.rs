// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;
use bytes::BufMut;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("invalid magic: {0:#04x}")]
    InvalidMagic(u8),
    #[error("invalid datatype bits: {0:#04x}")]
    InvalidDatatype(u8),
    #[error("body length {body_len} is smaller than the declared sections ({sections})")]
    InvalidBodyLength { body_len: u32, sections: u32 },
    #[error("buffer too small for a packet header")]
    Partial,
}

/// The fixed 24-byte header shared by requests and responses. For the "Alt"
/// magics the two-byte key length field is split into a framing-extras
/// length byte followed by a one-byte key length; this struct hides that
/// difference behind `framing_extras_len` and `key_len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub magic: Magic,
    pub opcode: u8,
    pub framing_extras_len: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub datatype: Datatype,
    /// vbucket id on a request, status code on a response
    pub vbucket_or_status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl PacketHeader {
    /// Parse a header from the front of `buf`. Requires at least
    /// `HEADER_LEN` bytes; performs the cheap structural checks needed
    /// before the body length field may be trusted.
    pub fn parse(buf: &[u8]) -> Result<PacketHeader, HeaderError> {
        if buf.len() < HEADER_LEN {
            return Err(HeaderError::Partial);
        }

        let magic = Magic::try_from(buf[0]).map_err(HeaderError::InvalidMagic)?;

        let (framing_extras_len, key_len) = if magic.has_framing_extras() {
            (buf[2], buf[3] as u16)
        } else {
            (0, u16::from_be_bytes([buf[2], buf[3]]))
        };

        let extras_len = buf[4];
        let datatype = Datatype::from_bits(buf[5]).ok_or(HeaderError::InvalidDatatype(buf[5]))?;
        let vbucket_or_status = u16::from_be_bytes([buf[6], buf[7]]);
        let body_len = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let opaque = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let cas = u64::from_be_bytes([
            buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
        ]);

        let sections = framing_extras_len as u32 + extras_len as u32 + key_len as u32;
        if body_len < sections {
            return Err(HeaderError::InvalidBodyLength { body_len, sections });
        }

        Ok(PacketHeader {
            magic,
            opcode: buf[1],
            framing_extras_len,
            key_len,
            extras_len,
            datatype,
            vbucket_or_status,
            body_len,
            opaque,
            cas,
        })
    }

    pub fn value_len(&self) -> usize {
        self.body_len as usize
            - self.framing_extras_len as usize
            - self.extras_len as usize
            - self.key_len as usize
    }

    /// The number of bytes of the full packet, header included.
    pub fn total_len(&self) -> usize {
        HEADER_LEN + self.body_len as usize
    }

    pub fn status(&self) -> Result<Status, u16> {
        Status::try_from(self.vbucket_or_status)
    }

    pub fn vbucket(&self) -> u16 {
        self.vbucket_or_status
    }

    pub fn compose(&self, dst: &mut dyn BufMut) -> usize {
        dst.put_u8(self.magic as u8);
        dst.put_u8(self.opcode);
        if self.magic.has_framing_extras() {
            dst.put_u8(self.framing_extras_len);
            dst.put_u8(self.key_len as u8);
        } else {
            dst.put_u16(self.key_len);
        }
        dst.put_u8(self.extras_len);
        dst.put_u8(self.datatype.bits());
        dst.put_u16(self.vbucket_or_status);
        dst.put_u32(self.body_len);
        dst.put_u32(self.opaque);
        dst.put_u64(self.cas);
        HEADER_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PacketHeader {
        PacketHeader {
            magic: Magic::ClientRequest,
            opcode: Opcode::Get as u8,
            framing_extras_len: 0,
            key_len: 3,
            extras_len: 0,
            datatype: Datatype::RAW,
            vbucket_or_status: 0x0102,
            body_len: 3,
            opaque: 0xdeadbeef,
            cas: 0x1122334455667788,
        }
    }

    #[test]
    fn roundtrip_classic() {
        let header = sample();
        let mut buf = Vec::new();
        assert_eq!(header.compose(&mut buf), HEADER_LEN);
        assert_eq!(PacketHeader::parse(&buf), Ok(header));
    }

    #[test]
    fn roundtrip_alt() {
        let mut header = sample();
        header.magic = Magic::AltClientRequest;
        header.framing_extras_len = 2;
        header.body_len = 5;
        let mut buf = Vec::new();
        header.compose(&mut buf);
        let parsed = PacketHeader::parse(&buf).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.value_len(), 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = Vec::new();
        sample().compose(&mut buf);
        buf[0] = 0x42;
        assert_eq!(PacketHeader::parse(&buf), Err(HeaderError::InvalidMagic(0x42)));
    }

    #[test]
    fn rejects_short_body() {
        let mut header = sample();
        header.key_len = 10;
        let mut buf = Vec::new();
        header.compose(&mut buf);
        assert!(matches!(
            PacketHeader::parse(&buf),
            Err(HeaderError::InvalidBodyLength { .. })
        ));
    }

    #[test]
    fn rejects_partial() {
        assert_eq!(PacketHeader::parse(&[0x80; 10]), Err(HeaderError::Partial));
    }
}
