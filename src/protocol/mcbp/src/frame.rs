// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::Status;
use thiserror::Error;

/// Frame-info identifiers. Each element in the framing-extras region starts
/// with a tag byte whose high nibble is the id and whose low nibble is the
/// payload length, with escape bytes for ids and lengths of 15 or more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInfoId {
    Reorder,
    DurabilityRequirement,
    DcpStreamId,
    OpenTracingContext,
}

impl TryFrom<u16> for FrameInfoId {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        Ok(match value {
            0 => FrameInfoId::Reorder,
            1 => FrameInfoId::DurabilityRequirement,
            2 => FrameInfoId::DcpStreamId,
            3 => FrameInfoId::OpenTracingContext,
            other => return Err(other),
        })
    }
}

impl From<FrameInfoId> for u16 {
    fn from(id: FrameInfoId) -> u16 {
        match id {
            FrameInfoId::Reorder => 0,
            FrameInfoId::DurabilityRequirement => 1,
            FrameInfoId::DcpStreamId => 2,
            FrameInfoId::OpenTracingContext => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DurabilityLevel {
    Majority = 1,
    MajorityAndPersistOnMaster = 2,
    PersistToMajority = 3,
}

impl TryFrom<u8> for DurabilityLevel {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            1 => DurabilityLevel::Majority,
            2 => DurabilityLevel::MajorityAndPersistOnMaster,
            3 => DurabilityLevel::PersistToMajority,
            other => return Err(other),
        })
    }
}

/// A decoded framing-extras element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameInfo<'a> {
    /// Zero length. Marks the request as eligible for out-of-order
    /// completion on connections which negotiated unordered execution.
    Reorder,
    /// One byte (level) or three bytes (level plus a big-endian timeout in
    /// milliseconds).
    DurabilityRequirement {
        level: DurabilityLevel,
        timeout_ms: Option<u16>,
    },
    /// Exactly two bytes, big-endian stream id.
    DcpStreamId(u16),
    /// Opaque tracing context, at least one byte.
    OpenTracingContext(&'a [u8]),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("invalid encoding in frame extras")]
    Malformed,
    #[error("unknown frame info id: {0}")]
    UnknownId(u16),
    #[error("frame info {id:?} has invalid size {len}")]
    InvalidSize { id: FrameInfoId, len: usize },
    #[error("invalid durability level: {0}")]
    InvalidDurabilityLevel(u8),
}

impl FrameError {
    /// The status to put on the wire for a request whose framing extras
    /// failed to parse or validate.
    pub fn status(&self) -> Status {
        match self {
            FrameError::Malformed => Status::Einval,
            FrameError::UnknownId(_) => Status::UnknownFrameInfo,
            FrameError::InvalidSize { .. } => Status::Einval,
            FrameError::InvalidDurabilityLevel(_) => Status::DurabilityInvalidLevel,
        }
    }
}

fn decode(id: u16, payload: &[u8]) -> Result<FrameInfo<'_>, FrameError> {
    let id = FrameInfoId::try_from(id).map_err(FrameError::UnknownId)?;
    match id {
        FrameInfoId::Reorder => {
            if !payload.is_empty() {
                return Err(FrameError::InvalidSize { id, len: payload.len() });
            }
            Ok(FrameInfo::Reorder)
        }
        FrameInfoId::DurabilityRequirement => {
            let (level, timeout_ms) = match payload.len() {
                1 => (payload[0], None),
                3 => (payload[0], Some(u16::from_be_bytes([payload[1], payload[2]]))),
                len => return Err(FrameError::InvalidSize { id, len }),
            };
            let level = DurabilityLevel::try_from(level)
                .map_err(FrameError::InvalidDurabilityLevel)?;
            Ok(FrameInfo::DurabilityRequirement { level, timeout_ms })
        }
        FrameInfoId::DcpStreamId => {
            if payload.len() != 2 {
                return Err(FrameError::InvalidSize { id, len: payload.len() });
            }
            Ok(FrameInfo::DcpStreamId(u16::from_be_bytes([payload[0], payload[1]])))
        }
        FrameInfoId::OpenTracingContext => {
            if payload.is_empty() {
                return Err(FrameError::InvalidSize { id, len: 0 });
            }
            Ok(FrameInfo::OpenTracingContext(payload))
        }
    }
}

/// Iterate the framing-extras region, invoking `f` once per element. Any
/// element whose declared length runs off the end of the region fails the
/// whole parse.
pub fn parse_frame_infos<'a, F>(mut buf: &'a [u8], mut f: F) -> Result<(), FrameError>
where
    F: FnMut(FrameInfo<'a>) -> Result<(), FrameError>,
{
    while !buf.is_empty() {
        let tag = buf[0];
        let mut id = (tag >> 4) as u16;
        let mut len = (tag & 0x0f) as usize;
        let mut offset = 1;

        if id == 0x0f {
            if buf.len() < offset + 1 {
                return Err(FrameError::Malformed);
            }
            id += buf[offset] as u16;
            offset += 1;
        }
        if len == 0x0f {
            if buf.len() < offset + 1 {
                return Err(FrameError::Malformed);
            }
            len += buf[offset] as usize;
            offset += 1;
        }

        if buf.len() < offset + len {
            return Err(FrameError::Malformed);
        }

        f(decode(id, &buf[offset..offset + len])?)?;
        buf = &buf[offset + len..];
    }

    Ok(())
}

/// Encode a single frame-info element, including the escape forms for large
/// ids and payloads.
pub fn encode_frame_info(id: u16, payload: &[u8], dst: &mut Vec<u8>) {
    let tag_index = dst.len();
    if id < 0x0f {
        dst.push((id as u8) << 4);
    } else {
        dst.push(0xf0);
        dst.push((id - 0x0f) as u8);
    }

    if payload.len() < 0x0f {
        dst[tag_index] |= payload.len() as u8;
    } else {
        dst[tag_index] |= 0x0f;
        dst.push((payload.len() - 0x0f) as u8);
    }

    dst.extend_from_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(buf: &[u8]) -> Result<Vec<FrameInfo<'_>>, FrameError> {
        let mut out = Vec::new();
        parse_frame_infos(buf, |info| {
            out.push(info);
            Ok(())
        })?;
        Ok(out)
    }

    #[test]
    fn reorder() {
        let mut buf = Vec::new();
        encode_frame_info(0, &[], &mut buf);
        assert_eq!(buf, vec![0x00]);
        assert_eq!(parse_all(&buf), Ok(vec![FrameInfo::Reorder]));
    }

    #[test]
    fn reorder_with_payload_is_invalid() {
        let mut buf = Vec::new();
        encode_frame_info(0, &[1], &mut buf);
        assert_eq!(
            parse_all(&buf),
            Err(FrameError::InvalidSize { id: FrameInfoId::Reorder, len: 1 })
        );
    }

    #[test]
    fn durability() {
        let mut buf = Vec::new();
        encode_frame_info(1, &[2], &mut buf);
        assert_eq!(
            parse_all(&buf),
            Ok(vec![FrameInfo::DurabilityRequirement {
                level: DurabilityLevel::MajorityAndPersistOnMaster,
                timeout_ms: None,
            }])
        );

        let mut buf = Vec::new();
        encode_frame_info(1, &[1, 0x01, 0x02], &mut buf);
        assert_eq!(
            parse_all(&buf),
            Ok(vec![FrameInfo::DurabilityRequirement {
                level: DurabilityLevel::Majority,
                timeout_ms: Some(0x0102),
            }])
        );
    }

    #[test]
    fn durability_level_zero_rejected() {
        let mut buf = Vec::new();
        encode_frame_info(1, &[0], &mut buf);
        assert_eq!(parse_all(&buf), Err(FrameError::InvalidDurabilityLevel(0)));
        assert_eq!(
            FrameError::InvalidDurabilityLevel(0).status(),
            Status::DurabilityInvalidLevel
        );
    }

    #[test]
    fn durability_bad_sizes_rejected() {
        for len in [2usize, 4] {
            let mut buf = Vec::new();
            encode_frame_info(1, &vec![1; len], &mut buf);
            assert_eq!(
                parse_all(&buf),
                Err(FrameError::InvalidSize {
                    id: FrameInfoId::DurabilityRequirement,
                    len,
                })
            );
        }
    }

    #[test]
    fn dcp_stream_id() {
        let mut buf = Vec::new();
        encode_frame_info(2, &0x1234u16.to_be_bytes(), &mut buf);
        assert_eq!(parse_all(&buf), Ok(vec![FrameInfo::DcpStreamId(0x1234)]));

        let mut buf = Vec::new();
        encode_frame_info(2, &[0; 4], &mut buf);
        assert_eq!(
            parse_all(&buf),
            Err(FrameError::InvalidSize { id: FrameInfoId::DcpStreamId, len: 4 })
        );
    }

    #[test]
    fn tracing_context_escape_forms() {
        // a payload of 20 bytes exercises the length escape byte
        let payload = [0xab; 20];
        let mut buf = Vec::new();
        encode_frame_info(3, &payload, &mut buf);
        assert_eq!(buf[0], 0x3f);
        assert_eq!(buf[1], 20 - 0x0f);
        assert_eq!(parse_all(&buf), Ok(vec![FrameInfo::OpenTracingContext(&payload)]));
    }

    #[test]
    fn unknown_id() {
        let mut buf = Vec::new();
        encode_frame_info(12, &[], &mut buf);
        assert_eq!(parse_all(&buf), Err(FrameError::UnknownId(12)));

        // escaped id form
        let mut buf = Vec::new();
        encode_frame_info(0xff, &[], &mut buf);
        assert_eq!(parse_all(&buf), Err(FrameError::UnknownId(0xff)));
        assert_eq!(FrameError::UnknownId(0xff).status(), Status::UnknownFrameInfo);
    }

    #[test]
    fn declared_length_overflow() {
        // id 1, declared size 1, but no payload present
        assert_eq!(parse_all(&[0x11]), Err(FrameError::Malformed));
        assert_eq!(FrameError::Malformed.status(), Status::Einval);
    }

    #[test]
    fn multiple_elements() {
        let mut buf = Vec::new();
        encode_frame_info(0, &[], &mut buf);
        encode_frame_info(2, &0x0001u16.to_be_bytes(), &mut buf);
        assert_eq!(
            parse_all(&buf),
            Ok(vec![FrameInfo::Reorder, FrameInfo::DcpStreamId(1)])
        );
    }
}
