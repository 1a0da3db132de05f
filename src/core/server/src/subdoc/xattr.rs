// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Extended-attribute plumbing: the on-disk blob codec, the virtual
//! attributes (`$document`, `$XTOC`) and the mutation-macro expansion.

use engine::Item;
use protocol_mcbp::Datatype;

/// System attributes are namespaced with a leading underscore; virtual
/// attributes with a dollar sign.
pub(crate) fn is_system_xattr(key: &[u8]) -> bool {
    key.first() == Some(&b'_')
}

pub(crate) fn is_virtual_xattr(key: &[u8]) -> bool {
    key.first() == Some(&b'$')
}

/// The first path component: the xattr key a path addresses.
pub(crate) fn xattr_key(path: &[u8]) -> &[u8] {
    let end = path
        .iter()
        .position(|b| *b == b'.' || *b == b'[')
        .unwrap_or(path.len());
    &path[..end]
}

/// Decode an xattr section (including its leading total-length word) into
/// key/value pairs. Each pair is encoded as
/// `pair_len[4] || key || 0x00 || value || 0x00`.
pub(crate) fn decode(section: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut pairs = Vec::new();
    if section.len() < 4 {
        return pairs;
    }
    let total = u32::from_be_bytes([section[0], section[1], section[2], section[3]]) as usize;
    let mut body = &section[4..std::cmp::min(4 + total, section.len())];

    while body.len() >= 4 {
        let pair_len = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
        if body.len() < 4 + pair_len {
            break;
        }
        let pair = &body[4..4 + pair_len];
        if let Some(separator) = pair.iter().position(|b| *b == 0) {
            let key = pair[..separator].to_vec();
            let value = pair[separator + 1..pair.len().saturating_sub(1)].to_vec();
            pairs.push((key, value));
        }
        body = &body[4 + pair_len..];
    }
    pairs
}

/// Encode pairs back into a section. An empty pair list yields an empty
/// section (and the caller clears the XATTR datatype bit).
pub(crate) fn encode(pairs: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    if pairs.is_empty() {
        return Vec::new();
    }
    let mut body = Vec::new();
    for (key, value) in pairs {
        let pair_len = (key.len() + value.len() + 2) as u32;
        body.extend_from_slice(&pair_len.to_be_bytes());
        body.extend_from_slice(key);
        body.push(0);
        body.extend_from_slice(value);
        body.push(0);
    }
    let mut section = Vec::with_capacity(4 + body.len());
    section.extend_from_slice(&(body.len() as u32).to_be_bytes());
    section.extend_from_slice(&body);
    section
}

/// The `$document` virtual attribute: document metadata synthesized on
/// demand. It carries no privilege requirement.
pub(crate) fn vattr_document(item: &Item, deleted: bool) -> serde_json::Value {
    let mut datatypes = Vec::new();
    let datatype = item.datatype();
    if datatype.is_json() {
        datatypes.push("json");
    }
    if datatype.is_snappy() {
        datatypes.push("snappy");
    }
    if datatype.is_xattr() {
        datatypes.push("xattr");
    }
    if datatypes.is_empty() {
        datatypes.push("raw");
    }

    serde_json::json!({
        "CAS": format!("0x{:016x}", item.cas()),
        "seqno": format!("0x{:016x}", item.seqno()),
        "exptime": item.expiry(),
        "value_bytes": item.value().len(),
        "datatype": datatypes,
        "deleted": deleted,
        "flags": item.flags(),
    })
}

/// The `$XTOC` virtual attribute: the list of xattr keys visible with the
/// caller's privileges.
pub(crate) fn vattr_xtoc(
    pairs: &[(Vec<u8>, Vec<u8>)],
    user_visible: bool,
    system_visible: bool,
) -> serde_json::Value {
    let mut keys = Vec::new();
    for (key, _) in pairs {
        let system = is_system_xattr(key);
        if (system && system_visible) || (!system && user_visible) {
            keys.push(String::from_utf8_lossy(key).to_string());
        }
    }
    keys.sort();
    serde_json::json!(keys)
}

/// Replace the well-known mutation macros with their reserved-width
/// placeholder encodings. The storage layer rewrites the placeholders with
/// the post-commit values.
pub(crate) fn expand_macros(value: &[u8]) -> Vec<u8> {
    const MACROS: &[(&str, &str)] = &[
        ("\"${Mutation.CAS}\"", "\"0x0000000000000000\""),
        ("\"${Mutation.seqno}\"", "\"0x0000000000000000\""),
        ("\"${Mutation.value_crc32c}\"", "\"0x00000000\""),
    ];
    let mut text = String::from_utf8_lossy(value).to_string();
    for (marker, replacement) in MACROS {
        text = text.replace(marker, replacement);
    }
    text.into_bytes()
}
