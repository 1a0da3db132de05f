// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use core::fmt::{Display, Formatter};

/// The first byte of every packet. The magic determines the direction of the
/// message and whether the header carries framing extras (the "Alt"
/// variants, which split the two-byte key length into a one-byte framing
/// extras length and a one-byte key length).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Magic {
    ClientRequest = 0x80,
    AltClientRequest = 0x08,
    ClientResponse = 0x81,
    AltClientResponse = 0x18,
    ServerRequest = 0x82,
    ServerResponse = 0x83,
}

impl Magic {
    pub fn is_request(self) -> bool {
        matches!(
            self,
            Magic::ClientRequest | Magic::AltClientRequest | Magic::ServerRequest
        )
    }

    pub fn is_response(self) -> bool {
        !self.is_request()
    }

    /// Messages initiated by a client (as opposed to server push).
    pub fn is_client(self) -> bool {
        !matches!(self, Magic::ServerRequest | Magic::ServerResponse)
    }

    /// The "Alt" encodings carry framing extras in the header.
    pub fn has_framing_extras(self) -> bool {
        matches!(self, Magic::AltClientRequest | Magic::AltClientResponse)
    }
}

impl TryFrom<u8> for Magic {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            0x80 => Ok(Magic::ClientRequest),
            0x08 => Ok(Magic::AltClientRequest),
            0x81 => Ok(Magic::ClientResponse),
            0x18 => Ok(Magic::AltClientResponse),
            0x82 => Ok(Magic::ServerRequest),
            0x83 => Ok(Magic::ServerResponse),
            other => Err(other),
        }
    }
}

impl Display for Magic {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Magic::ClientRequest => "ClientRequest",
            Magic::AltClientRequest => "AltClientRequest",
            Magic::ClientResponse => "ClientResponse",
            Magic::AltClientResponse => "AltClientResponse",
            Magic::ServerRequest => "ServerRequest",
            Magic::ServerResponse => "ServerResponse",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        for byte in [0x80, 0x08, 0x81, 0x18, 0x82, 0x83] {
            let magic = Magic::try_from(byte).unwrap();
            assert_eq!(magic as u8, byte);
        }
        assert!(Magic::try_from(0x00).is_err());
        assert!(Magic::try_from(0xff).is_err());
    }

    #[test]
    fn classification() {
        assert!(Magic::ClientRequest.is_request());
        assert!(Magic::AltClientRequest.has_framing_extras());
        assert!(Magic::AltClientResponse.is_response());
        assert!(!Magic::ServerRequest.is_client());
        assert!(!Magic::ClientResponse.has_framing_extras());
    }
}
