// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Wire encodings for the sub-document commands: the single-path extras
//! layout, the multi-path operation-spec lists and the path/doc flag bytes.

use crate::*;

/// Upper bound on the number of operation specs in one multi-path request.
pub const SUBDOC_MULTI_MAX_PATHS: usize = 16;

/// Per-path flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubdocPathFlags(u8);

impl SubdocPathFlags {
    pub const NONE: SubdocPathFlags = SubdocPathFlags(0x00);
    /// Create intermediate paths as needed.
    pub const MKDIR_P: SubdocPathFlags = SubdocPathFlags(0x01);
    /// The path addresses the extended-attribute section.
    pub const XATTR_PATH: SubdocPathFlags = SubdocPathFlags(0x04);
    /// Expand `${Mutation.*}` macros in the value. Only valid with
    /// `XATTR_PATH`.
    pub const EXPAND_MACROS: SubdocPathFlags = SubdocPathFlags(0x10);

    const ALL: u8 = 0x15;

    pub fn from_bits(bits: u8) -> Option<SubdocPathFlags> {
        if bits & !Self::ALL == 0 {
            Some(SubdocPathFlags(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn mkdir_p(self) -> bool {
        self.0 & Self::MKDIR_P.0 != 0
    }

    pub fn is_xattr(self) -> bool {
        self.0 & Self::XATTR_PATH.0 != 0
    }

    pub fn expand_macros(self) -> bool {
        self.0 & Self::EXPAND_MACROS.0 != 0
    }
}

impl std::ops::BitOr for SubdocPathFlags {
    type Output = SubdocPathFlags;

    fn bitor(self, rhs: SubdocPathFlags) -> SubdocPathFlags {
        SubdocPathFlags(self.0 | rhs.0)
    }
}

/// Whole-document flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubdocDocFlags(u8);

impl SubdocDocFlags {
    pub const NONE: SubdocDocFlags = SubdocDocFlags(0x00);
    /// Create the document if it does not exist (upsert semantics).
    pub const MKDOC: SubdocDocFlags = SubdocDocFlags(0x01);
    /// Create the document; fail if it already exists.
    pub const ADD: SubdocDocFlags = SubdocDocFlags(0x02);
    /// Operate on deleted documents as well.
    pub const ACCESS_DELETED: SubdocDocFlags = SubdocDocFlags(0x04);

    const ALL: u8 = 0x07;

    pub fn from_bits(bits: u8) -> Option<SubdocDocFlags> {
        if bits & !Self::ALL == 0 {
            Some(SubdocDocFlags(bits))
        } else {
            None
        }
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn mkdoc(self) -> bool {
        self.0 & Self::MKDOC.0 != 0
    }

    pub fn add(self) -> bool {
        self.0 & Self::ADD.0 != 0
    }

    pub fn access_deleted(self) -> bool {
        self.0 & Self::ACCESS_DELETED.0 != 0
    }
}

impl std::ops::BitOr for SubdocDocFlags {
    type Output = SubdocDocFlags;

    fn bitor(self, rhs: SubdocDocFlags) -> SubdocDocFlags {
        SubdocDocFlags(self.0 | rhs.0)
    }
}

/// Classification of opcodes which may appear as an operation spec.
pub fn is_subdoc_lookup_op(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Get | Opcode::SubdocGet | Opcode::SubdocExists | Opcode::SubdocGetCount
    )
}

pub fn is_subdoc_mutation_op(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Set
            | Opcode::Delete
            | Opcode::SubdocDictAdd
            | Opcode::SubdocDictUpsert
            | Opcode::SubdocDelete
            | Opcode::SubdocReplace
            | Opcode::SubdocArrayPushLast
            | Opcode::SubdocArrayPushFirst
            | Opcode::SubdocArrayInsert
            | Opcode::SubdocArrayAddUnique
            | Opcode::SubdocCounter
    )
}

/// Ops which address the whole document rather than a path within it.
pub fn is_wholedoc_op(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::Get | Opcode::Set | Opcode::Delete)
}

/// The decoded extras + body of a single-path request.
#[derive(Debug, PartialEq, Eq)]
pub struct SubdocSinglePayload<'a> {
    pub path: &'a [u8],
    pub path_flags: SubdocPathFlags,
    pub doc_flags: SubdocDocFlags,
    pub expiry: Option<u32>,
    /// Mutation value (empty for lookups).
    pub value: &'a [u8],
}

impl<'a> SubdocSinglePayload<'a> {
    /// Extras: `path_len[2] || path_flags[1]` optionally followed by
    /// `expiry[4]` and/or `doc_flags[1]`. The body value starts with the
    /// path itself.
    pub fn parse(extras: &[u8], body_value: &'a [u8]) -> Result<SubdocSinglePayload<'a>, Status> {
        let (fixed, rest) = match extras.len() {
            3 | 4 | 7 | 8 => extras.split_at(3),
            _ => return Err(Status::Einval),
        };

        let path_len = u16::from_be_bytes([fixed[0], fixed[1]]) as usize;
        let path_flags = SubdocPathFlags::from_bits(fixed[2]).ok_or(Status::Einval)?;

        let (expiry, doc_flags) = match rest.len() {
            0 => (None, SubdocDocFlags::NONE),
            1 => (None, SubdocDocFlags::from_bits(rest[0]).ok_or(Status::Einval)?),
            4 => (
                Some(u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]])),
                SubdocDocFlags::NONE,
            ),
            5 => (
                Some(u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]])),
                SubdocDocFlags::from_bits(rest[4]).ok_or(Status::Einval)?,
            ),
            _ => return Err(Status::Einval),
        };

        if body_value.len() < path_len {
            return Err(Status::Einval);
        }
        let (path, value) = body_value.split_at(path_len);

        if path_flags.expand_macros() && !path_flags.is_xattr() {
            return Err(Status::SubdocXattrInvalidFlagCombo);
        }
        if doc_flags.mkdoc() && doc_flags.add() {
            return Err(Status::Einval);
        }

        Ok(SubdocSinglePayload {
            path,
            path_flags,
            doc_flags,
            expiry,
            value,
        })
    }
}

/// One operation in a multi-path request.
#[derive(Debug, PartialEq, Eq)]
pub struct SubdocMultiSpec<'a> {
    pub opcode: Opcode,
    pub path_flags: SubdocPathFlags,
    pub path: &'a [u8],
    pub value: &'a [u8],
}

/// The decoded extras of a multi-path request.
#[derive(Debug, PartialEq, Eq)]
pub struct SubdocMultiPayload {
    pub doc_flags: SubdocDocFlags,
    pub expiry: Option<u32>,
}

impl SubdocMultiPayload {
    /// Extras: optional `expiry[4]`, optional trailing `doc_flags[1]`.
    pub fn parse(extras: &[u8]) -> Result<SubdocMultiPayload, Status> {
        let (expiry, doc_flags) = match extras.len() {
            0 => (None, SubdocDocFlags::NONE),
            1 => (None, SubdocDocFlags::from_bits(extras[0]).ok_or(Status::Einval)?),
            4 => (
                Some(u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]])),
                SubdocDocFlags::NONE,
            ),
            5 => (
                Some(u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]])),
                SubdocDocFlags::from_bits(extras[4]).ok_or(Status::Einval)?,
            ),
            _ => return Err(Status::Einval),
        };

        if doc_flags.mkdoc() && doc_flags.add() {
            return Err(Status::Einval);
        }

        Ok(SubdocMultiPayload { doc_flags, expiry })
    }
}

/// Parse the operation specs from a multi-path request body. Lookup specs
/// are `opcode[1] || flags[1] || path_len[2] || path`; mutation specs add a
/// `value_len[4]` and the value bytes. Lookups and mutations may not mix;
/// `mutation` selects which family is legal.
pub fn parse_multi_specs(mut body: &[u8], mutation: bool) -> Result<Vec<SubdocMultiSpec<'_>>, Status> {
    let mut specs = Vec::new();

    while !body.is_empty() {
        if specs.len() == SUBDOC_MULTI_MAX_PATHS {
            return Err(Status::SubdocInvalidCombo);
        }
        let fixed = if mutation { 8 } else { 4 };
        if body.len() < fixed {
            return Err(Status::Einval);
        }

        let opcode = Opcode::try_from(body[0]).map_err(|_| Status::UnknownCommand)?;
        let path_flags = SubdocPathFlags::from_bits(body[1]).ok_or(Status::Einval)?;
        let path_len = u16::from_be_bytes([body[2], body[3]]) as usize;
        let value_len = if mutation {
            u32::from_be_bytes([body[4], body[5], body[6], body[7]]) as usize
        } else {
            0
        };

        let legal = if mutation {
            is_subdoc_mutation_op(opcode)
        } else {
            is_subdoc_lookup_op(opcode)
        };
        if !legal {
            return Err(Status::SubdocInvalidCombo);
        }
        if path_flags.expand_macros() && !path_flags.is_xattr() {
            return Err(Status::SubdocXattrInvalidFlagCombo);
        }
        if is_wholedoc_op(opcode) && path_len != 0 {
            return Err(Status::SubdocPathEinval);
        }

        if body.len() < fixed + path_len + value_len {
            return Err(Status::Einval);
        }
        let path = &body[fixed..fixed + path_len];
        let value = &body[fixed + path_len..fixed + path_len + value_len];

        specs.push(SubdocMultiSpec { opcode, path_flags, path, value });
        body = &body[fixed + path_len + value_len..];
    }

    if specs.is_empty() {
        return Err(Status::SubdocInvalidCombo);
    }

    Ok(specs)
}

/// Serialize a lookup or mutation spec (used by the client side of tests).
pub fn encode_multi_spec(spec: &SubdocMultiSpec<'_>, mutation: bool, dst: &mut Vec<u8>) {
    dst.push(spec.opcode as u8);
    dst.push(spec.path_flags.bits());
    dst.extend_from_slice(&(spec.path.len() as u16).to_be_bytes());
    if mutation {
        dst.extend_from_slice(&(spec.value.len() as u32).to_be_bytes());
    }
    dst.extend_from_slice(spec.path);
    if mutation {
        dst.extend_from_slice(spec.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_lookup_payload() {
        let mut extras = Vec::new();
        extras.extend_from_slice(&4u16.to_be_bytes());
        extras.push(0);
        let body = b"a.b.cignored-not-really";
        let payload = SubdocSinglePayload::parse(&extras, body).unwrap();
        assert_eq!(payload.path, b"a.b.");
        assert_eq!(payload.value, &body[4..]);
        assert_eq!(payload.doc_flags, SubdocDocFlags::NONE);
        assert_eq!(payload.expiry, None);
    }

    #[test]
    fn single_with_expiry_and_doc_flags() {
        let mut extras = Vec::new();
        extras.extend_from_slice(&1u16.to_be_bytes());
        extras.push(SubdocPathFlags::MKDIR_P.bits());
        extras.extend_from_slice(&60u32.to_be_bytes());
        extras.push(SubdocDocFlags::MKDOC.bits());
        let payload = SubdocSinglePayload::parse(&extras, b"pvalue").unwrap();
        assert_eq!(payload.path, b"p");
        assert_eq!(payload.value, b"value");
        assert_eq!(payload.expiry, Some(60));
        assert!(payload.doc_flags.mkdoc());
        assert!(payload.path_flags.mkdir_p());
    }

    #[test]
    fn single_rejects_bad_extras() {
        assert_eq!(SubdocSinglePayload::parse(&[0; 2], b""), Err(Status::Einval));
        assert_eq!(SubdocSinglePayload::parse(&[0; 6], b""), Err(Status::Einval));
    }

    #[test]
    fn macros_require_xattr() {
        let mut extras = Vec::new();
        extras.extend_from_slice(&1u16.to_be_bytes());
        extras.push(SubdocPathFlags::EXPAND_MACROS.bits());
        assert_eq!(
            SubdocSinglePayload::parse(&extras, b"p"),
            Err(Status::SubdocXattrInvalidFlagCombo)
        );
    }

    #[test]
    fn mkdoc_add_conflict() {
        let mut extras = Vec::new();
        extras.extend_from_slice(&1u16.to_be_bytes());
        extras.push(0);
        extras.push((SubdocDocFlags::MKDOC | SubdocDocFlags::ADD).bits());
        assert_eq!(SubdocSinglePayload::parse(&extras, b"p"), Err(Status::Einval));
    }

    #[test]
    fn multi_lookup_specs() {
        let mut body = Vec::new();
        encode_multi_spec(
            &SubdocMultiSpec {
                opcode: Opcode::SubdocGet,
                path_flags: SubdocPathFlags::NONE,
                path: b"name",
                value: b"",
            },
            false,
            &mut body,
        );
        encode_multi_spec(
            &SubdocMultiSpec {
                opcode: Opcode::SubdocExists,
                path_flags: SubdocPathFlags::NONE,
                path: b"tags[0]",
                value: b"",
            },
            false,
            &mut body,
        );
        let specs = parse_multi_specs(&body, false).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].path, b"name");
        assert_eq!(specs[1].opcode, Opcode::SubdocExists);
    }

    #[test]
    fn multi_mutation_specs() {
        let mut body = Vec::new();
        encode_multi_spec(
            &SubdocMultiSpec {
                opcode: Opcode::SubdocDictUpsert,
                path_flags: SubdocPathFlags::NONE,
                path: b"a",
                value: b"1",
            },
            true,
            &mut body,
        );
        let specs = parse_multi_specs(&body, true).unwrap();
        assert_eq!(specs[0].value, b"1");
    }

    #[test]
    fn mixing_rejected() {
        let mut body = Vec::new();
        encode_multi_spec(
            &SubdocMultiSpec {
                opcode: Opcode::SubdocGet,
                path_flags: SubdocPathFlags::NONE,
                path: b"a",
                value: b"",
            },
            true,
            &mut body,
        );
        // a lookup op inside a mutation request
        assert_eq!(parse_multi_specs(&body, true), Err(Status::SubdocInvalidCombo));
    }

    #[test]
    fn too_many_paths_rejected() {
        let mut body = Vec::new();
        for _ in 0..=SUBDOC_MULTI_MAX_PATHS {
            encode_multi_spec(
                &SubdocMultiSpec {
                    opcode: Opcode::SubdocGet,
                    path_flags: SubdocPathFlags::NONE,
                    path: b"a",
                    value: b"",
                },
                false,
                &mut body,
            );
        }
        assert_eq!(parse_multi_specs(&body, false), Err(Status::SubdocInvalidCombo));
    }

    #[test]
    fn empty_spec_list_rejected() {
        assert_eq!(parse_multi_specs(&[], false), Err(Status::SubdocInvalidCombo));
    }

    #[test]
    fn truncated_spec_rejected() {
        let mut body = Vec::new();
        encode_multi_spec(
            &SubdocMultiSpec {
                opcode: Opcode::SubdocGet,
                path_flags: SubdocPathFlags::NONE,
                path: b"abcdef",
                value: b"",
            },
            false,
            &mut body,
        );
        body.truncate(body.len() - 2);
        assert_eq!(parse_multi_specs(&body, false), Err(Status::Einval));
    }
}
