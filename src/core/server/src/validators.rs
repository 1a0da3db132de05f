// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Per-opcode structural validation, run between packet assembly and
//! execution. A validator failure sends the status back to the client and
//! closes the connection; commands not listed here only get the global
//! header checks.

use crate::Cookie;
use protocol_mcbp::*;

type ValidationResult = Result<(), (Status, &'static str)>;

fn fail(status: Status, context: &'static str) -> ValidationResult {
    Err((status, context))
}

struct Shape<'a> {
    request: &'a PacketRef<'a>,
}

impl<'a> Shape<'a> {
    fn extras(&self, expected: &[usize]) -> Result<(), (Status, &'static str)> {
        if expected.contains(&(self.request.extras().len())) {
            Ok(())
        } else {
            fail(Status::Einval, "invalid extras length")
        }
    }

    fn key_required(&self) -> ValidationResult {
        if self.request.key().is_empty() {
            fail(Status::Einval, "key is required")
        } else {
            Ok(())
        }
    }

    fn no_key(&self) -> ValidationResult {
        if self.request.key().is_empty() {
            Ok(())
        } else {
            fail(Status::Einval, "key is not allowed")
        }
    }

    fn no_value(&self) -> ValidationResult {
        if self.request.value().is_empty() {
            Ok(())
        } else {
            fail(Status::Einval, "value is not allowed")
        }
    }

    fn value_required(&self) -> ValidationResult {
        if self.request.value().is_empty() {
            fail(Status::Einval, "value is required")
        } else {
            Ok(())
        }
    }

    fn cas_required(&self) -> ValidationResult {
        if self.request.header().cas == 0 {
            fail(Status::Einval, "cas is required")
        } else {
            Ok(())
        }
    }
}

/// Validate a request packet. The header itself (magic, section lengths,
/// datatype bits) was checked during packet assembly.
pub(crate) fn validate(
    opcode: Opcode,
    request: &PacketRef<'_>,
    features: &FeatureSet,
) -> ValidationResult {
    let shape = Shape { request };

    // global checks: clients may only send datatypes they negotiated
    let datatype = request.header().datatype;
    if datatype.is_snappy() && !features.contains(Feature::Snappy) {
        return fail(Status::Einval, "snappy datatype was not negotiated");
    }
    if datatype.is_xattr() {
        return fail(Status::Einval, "xattr datatype is not valid on requests");
    }

    use Opcode::*;
    match opcode {
        Get | Getq | Getk | Getkq => {
            shape.extras(&[0])?;
            shape.key_required()?;
            shape.no_value()
        }
        Set | Setq | Add | Addq | Replace | Replaceq => {
            shape.extras(&[8])?;
            shape.key_required()
        }
        Delete | Deleteq => {
            shape.extras(&[0])?;
            shape.key_required()?;
            shape.no_value()
        }
        Increment | Incrementq | Decrement | Decrementq => {
            shape.extras(&[20])?;
            shape.key_required()?;
            shape.no_value()
        }
        Append | Appendq | Prepend | Prependq => {
            shape.extras(&[0])?;
            shape.key_required()?;
            shape.value_required()
        }
        Quit | Quitq | Noop | Version => {
            shape.extras(&[0])?;
            shape.no_key()?;
            shape.no_value()
        }
        Flush | Flushq => {
            shape.extras(&[0, 4])?;
            shape.no_key()?;
            shape.no_value()
        }
        Stat => {
            shape.extras(&[0])?;
            shape.no_value()
        }
        Verbosity => shape.extras(&[4]),
        Touch => {
            shape.extras(&[4])?;
            shape.key_required()?;
            shape.no_value()
        }
        Gat | Gatq => {
            shape.extras(&[4])?;
            shape.key_required()?;
            shape.no_value()
        }
        Hello => {
            shape.extras(&[0])?;
            if request.value().len() % 2 != 0 {
                return fail(Status::Einval, "hello value must be even sized");
            }
            Ok(())
        }
        SaslListMechs => {
            shape.extras(&[0])?;
            shape.no_key()?;
            shape.no_value()
        }
        SaslAuth | SaslStep => {
            shape.extras(&[0])?;
            shape.key_required()
        }
        SelectBucket => {
            shape.extras(&[0])?;
            shape.key_required()?;
            shape.no_value()
        }
        ListBuckets => {
            shape.extras(&[0])?;
            shape.no_key()?;
            shape.no_value()
        }
        GetErrorMap => {
            shape.extras(&[0])?;
            shape.no_key()?;
            if request.value().len() != 2 {
                return fail(Status::Einval, "value must hold the requested version");
            }
            Ok(())
        }
        GetLocked => {
            shape.extras(&[0, 4])?;
            shape.key_required()?;
            shape.no_value()
        }
        UnlockKey => {
            shape.extras(&[0])?;
            shape.key_required()?;
            shape.no_value()?;
            shape.cas_required()
        }
        GetClusterConfig => {
            shape.extras(&[0])?;
            shape.no_key()?;
            shape.no_value()
        }
        SetClusterConfig => {
            shape.extras(&[4])?;
            shape.value_required()
        }
        GetCmdTimer => {
            shape.extras(&[1])?;
            shape.no_value()
        }
        RbacRefresh | AuthProvider => {
            shape.extras(&[0])?;
            shape.no_key()?;
            shape.no_value()
        }
        DropPrivilege => {
            shape.extras(&[0])?;
            shape.key_required()?;
            shape.no_value()
        }
        DcpOpen => {
            shape.extras(&[8])?;
            shape.key_required()
        }
        DcpControl => {
            shape.extras(&[0])?;
            shape.key_required()?;
            shape.value_required()
        }
        DcpBufferAcknowledgement => {
            shape.extras(&[4])?;
            shape.no_key()?;
            shape.no_value()
        }
        DcpNoop => {
            shape.extras(&[0])?;
            shape.no_key()?;
            shape.no_value()
        }
        DcpStreamReq => {
            shape.extras(&[48])?;
            shape.no_key()?;
            shape.no_value()
        }
        DcpCloseStream => {
            shape.extras(&[0])?;
            shape.no_key()?;
            shape.no_value()
        }
        DcpGetFailoverLog | GetFailoverLog => {
            shape.extras(&[0])?;
            shape.no_key()?;
            shape.no_value()
        }
        SubdocGet | SubdocExists | SubdocGetCount => {
            shape.extras(&[3, 4])?;
            shape.key_required()?;
            validate_subdoc_single(request, false)
        }
        SubdocDictAdd | SubdocDictUpsert | SubdocDelete | SubdocReplace
        | SubdocArrayPushLast | SubdocArrayPushFirst | SubdocArrayInsert
        | SubdocArrayAddUnique | SubdocCounter => {
            shape.extras(&[3, 4, 7, 8])?;
            shape.key_required()?;
            validate_subdoc_single(request, true)
        }
        SubdocMultiLookup => {
            shape.extras(&[0, 1])?;
            shape.key_required()?;
            validate_subdoc_multi(request, false)
        }
        SubdocMultiMutation => {
            shape.extras(&[0, 1, 4, 5])?;
            shape.key_required()?;
            validate_subdoc_multi(request, true)
        }
        _ => Ok(()),
    }
}

fn validate_subdoc_single(request: &PacketRef<'_>, mutation: bool) -> ValidationResult {
    let payload = SubdocSinglePayload::parse(request.extras(), request.value())
        .map_err(|_| (Status::Einval, "invalid subdoc payload"))?;
    if payload.path.is_empty() && !payload.path_flags.is_xattr() {
        // an empty path addresses the whole document, which the dedicated
        // whole-document commands already cover for lookups
        if !mutation {
            return fail(Status::SubdocPathEinval, "empty path");
        }
    }
    if payload.path.len() > 1024 {
        return fail(Status::SubdocPathE2big, "path too long");
    }
    if !mutation && !payload.value.is_empty() {
        return fail(Status::Einval, "lookup must not carry a value");
    }
    Ok(())
}

fn validate_subdoc_multi(request: &PacketRef<'_>, mutation: bool) -> ValidationResult {
    SubdocMultiPayload::parse(request.extras())
        .map_err(|_| (Status::Einval, "invalid subdoc extras"))?;
    match parse_multi_specs(request.value(), mutation) {
        Ok(_) => Ok(()),
        Err(Status::SubdocInvalidCombo) => {
            fail(Status::SubdocInvalidCombo, "invalid operation combination")
        }
        Err(Status::SubdocPathEinval) => fail(Status::SubdocPathEinval, "invalid path"),
        Err(Status::SubdocXattrInvalidFlagCombo) => {
            fail(Status::SubdocXattrInvalidFlagCombo, "invalid flag combination")
        }
        Err(_) => fail(Status::Einval, "invalid operation specs"),
    }
}

/// Emit an audit record for a malformed or rejected packet.
pub(crate) fn audit_invalid_packet(connection_id: u64, cookie: &Cookie) {
    let header = cookie.header();
    info!(
        target: "audit",
        "{}",
        serde_json::json!({
            "event": "invalid_packet",
            "connection": connection_id,
            "opcode": header.opcode,
            "opaque": header.opaque,
            "bodylen": header.body_len,
        })
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol_common::Compose;

    fn packet(opcode: Opcode, extras: &[u8], key: &[u8], value: &[u8]) -> Vec<u8> {
        let message = RequestMessage {
            extras,
            key,
            value,
            ..RequestMessage::client(opcode)
        };
        let mut wire = Vec::new();
        message.compose(&mut wire);
        wire
    }

    fn check(opcode: Opcode, extras: &[u8], key: &[u8], value: &[u8]) -> ValidationResult {
        let wire = packet(opcode, extras, key, value);
        let request = PacketRef::parse(&wire).unwrap();
        validate(opcode, &request, &FeatureSet::new())
    }

    #[test]
    fn get_shape() {
        assert!(check(Opcode::Get, &[], b"key", &[]).is_ok());
        assert!(check(Opcode::Get, &[0; 4], b"key", &[]).is_err());
        assert!(check(Opcode::Get, &[], b"", &[]).is_err());
        assert!(check(Opcode::Get, &[], b"key", b"nope").is_err());
    }

    #[test]
    fn set_shape() {
        assert!(check(Opcode::Set, &[0; 8], b"key", b"value").is_ok());
        assert!(check(Opcode::Set, &[0; 4], b"key", b"value").is_err());
        assert!(check(Opcode::Set, &[0; 8], b"", b"value").is_err());
    }

    #[test]
    fn arithmetic_shape() {
        assert!(check(Opcode::Increment, &[0; 20], b"ctr", &[]).is_ok());
        assert!(check(Opcode::Increment, &[0; 8], b"ctr", &[]).is_err());
    }

    #[test]
    fn hello_value_must_be_even() {
        assert!(check(Opcode::Hello, &[], b"agent", &[0, 1, 0, 3]).is_ok());
        assert!(check(Opcode::Hello, &[], b"agent", &[0, 1, 0]).is_err());
    }

    #[test]
    fn unlock_requires_cas() {
        let message = RequestMessage {
            key: b"key",
            cas: 7,
            ..RequestMessage::client(Opcode::UnlockKey)
        };
        let mut wire = Vec::new();
        message.compose(&mut wire);
        let request = PacketRef::parse(&wire).unwrap();
        assert!(validate(Opcode::UnlockKey, &request, &FeatureSet::new()).is_ok());

        assert!(check(Opcode::UnlockKey, &[], b"key", &[]).is_err());
    }

    #[test]
    fn snappy_requires_negotiation() {
        let message = RequestMessage {
            extras: &[0; 8],
            key: b"key",
            value: b"v",
            datatype: Datatype::SNAPPY,
            ..RequestMessage::client(Opcode::Set)
        };
        let mut wire = Vec::new();
        message.compose(&mut wire);
        let request = PacketRef::parse(&wire).unwrap();

        assert!(validate(Opcode::Set, &request, &FeatureSet::new()).is_err());

        let mut features = FeatureSet::new();
        features.insert(Feature::Snappy);
        assert!(validate(Opcode::Set, &request, &features).is_ok());
    }

    #[test]
    fn subdoc_multi_mix_rejected() {
        let mut body = Vec::new();
        encode_multi_spec(
            &SubdocMultiSpec {
                opcode: Opcode::SubdocDictUpsert,
                path_flags: SubdocPathFlags::NONE,
                path: b"p",
                value: b"1",
            },
            false,
            &mut body,
        );
        // mutation spec encoding inside a lookup request
        assert!(check(Opcode::SubdocMultiLookup, &[], b"key", &body).is_err());
    }

    #[test]
    fn dcp_stream_req_shape() {
        assert!(check(Opcode::DcpStreamReq, &[0; 48], b"", &[]).is_ok());
        assert!(check(Opcode::DcpStreamReq, &[0; 40], b"", &[]).is_err());
    }
}
