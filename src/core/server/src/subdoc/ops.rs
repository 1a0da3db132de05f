// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The path-operation seam. The frontend drives sub-document operations
//! through the `SubdocOperator` trait; the bundled implementation walks
//! serde_json values with a dotted-path / bracket-index syntax.

use protocol_mcbp::{Opcode, Status, SubdocPathFlags};
use serde_json::Value;

const MAX_PATH_COMPONENTS: usize = 32;
const MAX_PATH_LENGTH: usize = 1024;

pub(crate) trait SubdocOperator: Send + Sync {
    /// Run a lookup op; returns the matched bytes (empty for EXISTS).
    fn lookup(&self, doc: &[u8], op: Opcode, path: &str) -> Result<Vec<u8>, Status>;

    /// Run a mutation op; returns the new document plus an optional
    /// result payload (the post-operation counter value).
    fn mutate(
        &self,
        doc: &[u8],
        op: Opcode,
        flags: SubdocPathFlags,
        path: &str,
        value: &[u8],
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), Status>;
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(i64),
}

fn parse_path(path: &str) -> Result<Vec<Segment>, Status> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(Status::SubdocPathE2big);
    }
    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    let mut current = String::new();
    let mut has_current = false;

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !has_current && segments.is_empty() {
                    return Err(Status::SubdocPathEinval);
                }
                if has_current {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                    has_current = false;
                } else if !matches!(segments.last(), Some(Segment::Index(_))) {
                    return Err(Status::SubdocPathEinval);
                }
            }
            '[' => {
                if has_current {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                    has_current = false;
                }
                let mut index = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    index.push(c);
                }
                let index: i64 = index.trim().parse().map_err(|_| Status::SubdocPathEinval)?;
                segments.push(Segment::Index(index));
            }
            ']' => return Err(Status::SubdocPathEinval),
            _ => {
                current.push(c);
                has_current = true;
            }
        }
    }
    if has_current {
        segments.push(Segment::Key(current));
    }

    if segments.len() > MAX_PATH_COMPONENTS {
        return Err(Status::SubdocPathE2big);
    }
    Ok(segments)
}

fn parse_doc(doc: &[u8]) -> Result<Value, Status> {
    serde_json::from_slice(doc).map_err(|_| Status::SubdocDocNotJson)
}

fn parse_value(value: &[u8]) -> Result<Value, Status> {
    serde_json::from_slice(value).map_err(|_| Status::SubdocValueCantinsert)
}

/// Parse a mutation value which may be a comma separated list of values
/// (for the array push operations).
fn parse_value_list(value: &[u8]) -> Result<Vec<Value>, Status> {
    let mut wrapped = Vec::with_capacity(value.len() + 2);
    wrapped.push(b'[');
    wrapped.extend_from_slice(value);
    wrapped.push(b']');
    match serde_json::from_slice::<Value>(&wrapped) {
        Ok(Value::Array(values)) if !values.is_empty() => Ok(values),
        _ => Err(Status::SubdocValueCantinsert),
    }
}

fn resolve_index(index: i64, len: usize) -> Result<usize, Status> {
    if index >= 0 {
        Ok(index as usize)
    } else if (-index) as usize <= len {
        Ok(len - (-index) as usize)
    } else {
        Err(Status::SubdocPathEnoent)
    }
}

fn walk<'a>(root: &'a Value, segments: &[Segment]) -> Result<&'a Value, Status> {
    let mut current = root;
    for segment in segments {
        match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => {
                current = map.get(key).ok_or(Status::SubdocPathEnoent)?;
            }
            (Segment::Key(_), _) => return Err(Status::SubdocPathMismatch),
            (Segment::Index(index), Value::Array(items)) => {
                let index = resolve_index(*index, items.len())?;
                current = items.get(index).ok_or(Status::SubdocPathEnoent)?;
            }
            (Segment::Index(_), _) => return Err(Status::SubdocPathMismatch),
        }
    }
    Ok(current)
}

/// Walk to the parent of the final segment, optionally creating
/// intermediate containers.
fn walk_parent<'a>(
    root: &'a mut Value,
    segments: &[Segment],
    create: bool,
) -> Result<&'a mut Value, Status> {
    let mut current = root;
    for segment in &segments[..segments.len().saturating_sub(1)] {
        match segment {
            Segment::Key(key) => match current {
                Value::Object(map) => {
                    if !map.contains_key(key) {
                        if !create {
                            return Err(Status::SubdocPathEnoent);
                        }
                        map.insert(key.clone(), Value::Object(Default::default()));
                    }
                    current = match map.get_mut(key) {
                        Some(value) => value,
                        None => return Err(Status::SubdocPathEnoent),
                    };
                }
                _ => return Err(Status::SubdocPathMismatch),
            },
            Segment::Index(index) => match current {
                Value::Array(items) => {
                    let index = resolve_index(*index, items.len())?;
                    current = match items.get_mut(index) {
                        Some(value) => value,
                        None => return Err(Status::SubdocPathEnoent),
                    };
                }
                _ => return Err(Status::SubdocPathMismatch),
            },
        }
    }
    Ok(current)
}

pub(crate) struct JsonSubdocOperator;

impl SubdocOperator for JsonSubdocOperator {
    fn lookup(&self, doc: &[u8], op: Opcode, path: &str) -> Result<Vec<u8>, Status> {
        let root = parse_doc(doc)?;
        let segments = parse_path(path)?;
        let matched = walk(&root, &segments)?;

        match op {
            Opcode::SubdocGet => {
                serde_json::to_vec(matched).map_err(|_| Status::Einternal)
            }
            Opcode::SubdocExists => Ok(Vec::new()),
            Opcode::SubdocGetCount => {
                let count = match matched {
                    Value::Object(map) => map.len(),
                    Value::Array(items) => items.len(),
                    _ => return Err(Status::SubdocPathMismatch),
                };
                Ok(count.to_string().into_bytes())
            }
            _ => Err(Status::Einval),
        }
    }

    fn mutate(
        &self,
        doc: &[u8],
        op: Opcode,
        flags: SubdocPathFlags,
        path: &str,
        value: &[u8],
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), Status> {
        let mut root = parse_doc(doc)?;
        let segments = parse_path(path)?;
        let mkdir_p = flags.mkdir_p();
        let mut result = None;

        match op {
            Opcode::SubdocDictAdd | Opcode::SubdocDictUpsert => {
                if segments.is_empty() {
                    return Err(Status::SubdocPathEinval);
                }
                let new = parse_value(value)?;
                let parent = walk_parent(&mut root, &segments, mkdir_p)?;
                match (&segments[segments.len() - 1], parent) {
                    (Segment::Key(key), Value::Object(map)) => {
                        if op == Opcode::SubdocDictAdd && map.contains_key(key) {
                            return Err(Status::SubdocPathEexists);
                        }
                        map.insert(key.clone(), new);
                    }
                    (Segment::Key(_), _) => return Err(Status::SubdocPathMismatch),
                    (Segment::Index(_), _) => return Err(Status::SubdocPathEinval),
                }
            }
            Opcode::SubdocDelete => {
                if segments.is_empty() {
                    return Err(Status::SubdocPathEinval);
                }
                let parent = walk_parent(&mut root, &segments, false)?;
                match (&segments[segments.len() - 1], parent) {
                    (Segment::Key(key), Value::Object(map)) => {
                        if map.remove(key).is_none() {
                            return Err(Status::SubdocPathEnoent);
                        }
                    }
                    (Segment::Index(index), Value::Array(items)) => {
                        let index = resolve_index(*index, items.len())?;
                        if index >= items.len() {
                            return Err(Status::SubdocPathEnoent);
                        }
                        items.remove(index);
                    }
                    _ => return Err(Status::SubdocPathMismatch),
                }
            }
            Opcode::SubdocReplace => {
                if segments.is_empty() {
                    return Err(Status::SubdocPathEinval);
                }
                let new = parse_value(value)?;
                let parent = walk_parent(&mut root, &segments, false)?;
                match (&segments[segments.len() - 1], parent) {
                    (Segment::Key(key), Value::Object(map)) => {
                        let slot = map.get_mut(key).ok_or(Status::SubdocPathEnoent)?;
                        *slot = new;
                    }
                    (Segment::Index(index), Value::Array(items)) => {
                        let index = resolve_index(*index, items.len())?;
                        let slot = items.get_mut(index).ok_or(Status::SubdocPathEnoent)?;
                        *slot = new;
                    }
                    _ => return Err(Status::SubdocPathMismatch),
                }
            }
            Opcode::SubdocArrayPushLast | Opcode::SubdocArrayPushFirst => {
                let values = parse_value_list(value)?;
                let target = target_array(&mut root, &segments, mkdir_p)?;
                if op == Opcode::SubdocArrayPushLast {
                    target.extend(values);
                } else {
                    for value in values.into_iter().rev() {
                        target.insert(0, value);
                    }
                }
            }
            Opcode::SubdocArrayAddUnique => {
                let new = parse_value(value)?;
                if new.is_object() || new.is_array() {
                    return Err(Status::SubdocValueCantinsert);
                }
                let target = target_array(&mut root, &segments, mkdir_p)?;
                if target.iter().any(|existing| existing == &new) {
                    return Err(Status::SubdocPathEexists);
                }
                target.push(new);
            }
            Opcode::SubdocArrayInsert => {
                let index = match segments.last() {
                    Some(Segment::Index(index)) => *index,
                    _ => return Err(Status::SubdocPathEinval),
                };
                let values = parse_value_list(value)?;
                let parent = walk_parent(&mut root, &segments, false)?;
                let items = match parent {
                    Value::Array(items) => items,
                    _ => return Err(Status::SubdocPathMismatch),
                };
                let index = if index >= 0 {
                    index as usize
                } else {
                    return Err(Status::SubdocPathEinval);
                };
                if index > items.len() {
                    return Err(Status::SubdocPathEnoent);
                }
                for (offset, value) in values.into_iter().enumerate() {
                    items.insert(index + offset, value);
                }
            }
            Opcode::SubdocCounter => {
                if segments.is_empty() {
                    return Err(Status::SubdocPathEinval);
                }
                let delta: i64 = std::str::from_utf8(value)
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .ok_or(Status::SubdocDeltaEinval)?;
                if delta == 0 {
                    return Err(Status::SubdocDeltaEinval);
                }
                let parent = walk_parent(&mut root, &segments, mkdir_p)?;
                let map = match parent {
                    Value::Object(map) => map,
                    _ => return Err(Status::SubdocPathMismatch),
                };
                let key = match &segments[segments.len() - 1] {
                    Segment::Key(key) => key,
                    Segment::Index(_) => return Err(Status::SubdocPathEinval),
                };
                let current = match map.get(key) {
                    None => 0,
                    Some(Value::Number(n)) => n.as_i64().ok_or(Status::SubdocNumErange)?,
                    Some(_) => return Err(Status::SubdocPathMismatch),
                };
                let new = current
                    .checked_add(delta)
                    .ok_or(Status::SubdocValueCantinsert)?;
                map.insert(key.clone(), serde_json::json!(new));
                result = Some(new.to_string().into_bytes());
            }
            _ => return Err(Status::Einval),
        }

        let doc = serde_json::to_vec(&root).map_err(|_| Status::Einternal)?;
        Ok((doc, result))
    }
}

/// Resolve (or create, with mkdir_p) the array a push-style op targets.
fn target_array<'a>(
    root: &'a mut Value,
    segments: &[Segment],
    mkdir_p: bool,
) -> Result<&'a mut Vec<Value>, Status> {
    if segments.is_empty() {
        return match root {
            Value::Array(items) => Ok(items),
            _ => Err(Status::SubdocPathMismatch),
        };
    }

    let parent = walk_parent(root, segments, mkdir_p)?;
    match &segments[segments.len() - 1] {
        Segment::Key(key) => {
            let map = match parent {
                Value::Object(map) => map,
                _ => return Err(Status::SubdocPathMismatch),
            };
            if !map.contains_key(key) {
                if !mkdir_p {
                    return Err(Status::SubdocPathEnoent);
                }
                map.insert(key.clone(), Value::Array(Vec::new()));
            }
            match map.get_mut(key) {
                Some(Value::Array(items)) => Ok(items),
                Some(_) => Err(Status::SubdocPathMismatch),
                None => Err(Status::SubdocPathEnoent),
            }
        }
        Segment::Index(index) => {
            let items = match parent {
                Value::Array(items) => items,
                _ => return Err(Status::SubdocPathMismatch),
            };
            let index = resolve_index(*index, items.len())?;
            match items.get_mut(index) {
                Some(Value::Array(items)) => Ok(items),
                Some(_) => Err(Status::SubdocPathMismatch),
                None => Err(Status::SubdocPathEnoent),
            }
        }
    }
}
