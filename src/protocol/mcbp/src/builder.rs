// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::*;
use protocol_common::{BufMut, Compose};

/// A response packet about to be written to the wire. The magic is derived
/// from the presence of framing extras.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseMessage<'a> {
    pub opcode: u8,
    pub status: u16,
    pub datatype: Datatype,
    pub opaque: u32,
    pub cas: u64,
    pub framing_extras: &'a [u8],
    pub extras: &'a [u8],
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> ResponseMessage<'a> {
    pub fn new(opcode: u8, status: Status, opaque: u32) -> Self {
        ResponseMessage {
            opcode,
            status: status as u16,
            opaque,
            ..Default::default()
        }
    }

    fn header(&self, value_len: usize) -> PacketHeader {
        let magic = if self.framing_extras.is_empty() {
            Magic::ClientResponse
        } else {
            Magic::AltClientResponse
        };
        PacketHeader {
            magic,
            opcode: self.opcode,
            framing_extras_len: self.framing_extras.len() as u8,
            key_len: self.key.len() as u16,
            extras_len: self.extras.len() as u8,
            datatype: self.datatype,
            vbucket_or_status: self.status,
            body_len: (self.framing_extras.len() + self.extras.len() + self.key.len() + value_len)
                as u32,
            opaque: self.opaque,
            cas: self.cas,
        }
    }

    /// Compose everything up to (and excluding) the value while declaring
    /// `value_len` bytes of value in the header. Used when the value bytes
    /// are chained into the send pipeline from externally owned storage.
    pub fn compose_preamble(&self, dst: &mut dyn BufMut, value_len: usize) -> usize {
        let mut len = self.header(value_len).compose(dst);
        dst.put_slice(self.framing_extras);
        dst.put_slice(self.extras);
        dst.put_slice(self.key);
        len += self.framing_extras.len() + self.extras.len() + self.key.len();
        len
    }
}

impl<'a> Compose for ResponseMessage<'a> {
    fn compose(&self, dst: &mut dyn BufMut) -> usize {
        let len = self.compose_preamble(dst, self.value.len());
        dst.put_slice(self.value);
        len + self.value.len()
    }
}

/// A request packet originated by this process: server-push messages to the
/// client and DCP producer messages.
#[derive(Debug, Clone, Copy)]
pub struct RequestMessage<'a> {
    pub magic: Magic,
    pub opcode: u8,
    pub datatype: Datatype,
    pub vbucket: u16,
    pub opaque: u32,
    pub cas: u64,
    pub framing_extras: &'a [u8],
    pub extras: &'a [u8],
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> RequestMessage<'a> {
    pub fn client(opcode: Opcode) -> Self {
        Self::with_magic(Magic::ClientRequest, opcode as u8)
    }

    pub fn server(opcode: ServerOpcode) -> Self {
        Self::with_magic(Magic::ServerRequest, opcode as u8)
    }

    fn with_magic(magic: Magic, opcode: u8) -> Self {
        RequestMessage {
            magic,
            opcode,
            datatype: Datatype::RAW,
            vbucket: 0,
            opaque: 0,
            cas: 0,
            framing_extras: &[],
            extras: &[],
            key: &[],
            value: &[],
        }
    }

    fn header(&self, value_len: usize) -> PacketHeader {
        let magic = if self.framing_extras.is_empty() {
            self.magic
        } else {
            Magic::AltClientRequest
        };
        PacketHeader {
            magic,
            opcode: self.opcode,
            framing_extras_len: self.framing_extras.len() as u8,
            key_len: self.key.len() as u16,
            extras_len: self.extras.len() as u8,
            datatype: self.datatype,
            vbucket_or_status: self.vbucket,
            body_len: (self.framing_extras.len() + self.extras.len() + self.key.len() + value_len)
                as u32,
            opaque: self.opaque,
            cas: self.cas,
        }
    }

    /// As for responses: everything but the value, declaring `value_len`
    /// bytes of value in the header.
    pub fn compose_preamble(&self, dst: &mut dyn BufMut, value_len: usize) -> usize {
        let mut len = self.header(value_len).compose(dst);
        dst.put_slice(self.framing_extras);
        dst.put_slice(self.extras);
        dst.put_slice(self.key);
        len += self.framing_extras.len() + self.extras.len() + self.key.len();
        len
    }
}

impl<'a> Compose for RequestMessage<'a> {
    fn compose(&self, dst: &mut dyn BufMut) -> usize {
        let len = self.compose_preamble(dst, self.value.len());
        dst.put_slice(self.value);
        len + self.value.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_roundtrip() {
        let msg = ResponseMessage {
            opcode: Opcode::Get as u8,
            status: Status::Success as u16,
            datatype: Datatype::JSON,
            opaque: 7,
            cas: 42,
            framing_extras: &[],
            extras: &[0, 0, 0, 0],
            key: &[],
            value: b"{}",
        };
        let mut wire = Vec::new();
        let len = msg.compose(&mut wire);
        assert_eq!(len, wire.len());

        let pkt = PacketRef::parse(&wire).unwrap();
        assert_eq!(pkt.header().magic, Magic::ClientResponse);
        assert_eq!(pkt.header().status(), Ok(Status::Success));
        assert_eq!(pkt.header().cas, 42);
        assert_eq!(pkt.extras(), &[0, 0, 0, 0]);
        assert_eq!(pkt.value(), b"{}");
    }

    #[test]
    fn response_with_framing_extras_uses_alt_magic() {
        let mut fe = Vec::new();
        encode_frame_info(0, &[], &mut fe);
        let msg = ResponseMessage {
            framing_extras: &fe,
            ..ResponseMessage::new(Opcode::Set as u8, Status::Success, 1)
        };
        let mut wire = Vec::new();
        msg.compose(&mut wire);
        let pkt = PacketRef::parse(&wire).unwrap();
        assert_eq!(pkt.header().magic, Magic::AltClientResponse);
        assert_eq!(pkt.framing_extras(), &fe[..]);
    }

    #[test]
    fn preamble_declares_chained_value() {
        let msg = ResponseMessage::new(Opcode::Get as u8, Status::Success, 3);
        let mut wire = Vec::new();
        msg.compose_preamble(&mut wire, 1024);
        let header = PacketHeader::parse(&wire).unwrap();
        assert_eq!(header.body_len, 1024);
        assert_eq!(wire.len(), HEADER_LEN);
    }

    #[test]
    fn server_request() {
        let msg = RequestMessage {
            datatype: Datatype::JSON,
            value: b"[]",
            ..RequestMessage::server(ServerOpcode::ActiveExternalUsers)
        };
        let mut wire = Vec::new();
        msg.compose(&mut wire);
        let pkt = PacketRef::parse(&wire).unwrap();
        assert_eq!(pkt.header().magic, Magic::ServerRequest);
        assert_eq!(pkt.header().opcode, ServerOpcode::ActiveExternalUsers as u8);
        assert_eq!(pkt.value(), b"[]");
    }
}
