// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! The sub-document engine: fetch the document, apply the path operations
//! in their xattr and body phases, write back with optimistic-concurrency
//! retry, and shape the (possibly per-op) response.

pub(crate) mod ops;
pub(crate) mod xattr;

pub(crate) use ops::{JsonSubdocOperator, SubdocOperator};

use engine::{CookieIo, DocState, DocStateFilter, DurabilityRequirement, EngineError,
    EngineResult, Item, KvEngine, StoreResult, StoreSemantics};
use protocol_mcbp::*;

/// Snapshot of the xattr-relevant privileges, taken before the phases run.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct XattrPrivileges {
    pub read: bool,
    pub write: bool,
    pub sys_read: bool,
    pub sys_write: bool,
}

#[derive(Debug)]
pub(crate) struct SubdocOp {
    pub opcode: Opcode,
    pub flags: SubdocPathFlags,
    pub path: Vec<u8>,
    pub value: Vec<u8>,
    pub status: Status,
    pub result: Vec<u8>,
}

/// The resumable command context: survives both engine suspensions and
/// CAS-retry resets.
pub(crate) struct SubdocContext {
    pub single: bool,
    pub mutator: bool,
    doc_flags: SubdocDocFlags,
    expiry: Option<u32>,
    key: Vec<u8>,
    vbucket: u16,
    client_cas: u64,
    durability: Option<DurabilityRequirement>,
    pub ops: Vec<SubdocOp>,
    fetched: Option<Item>,
    pub document_deleted: bool,
    needs_new_doc: bool,
    attempts: usize,
    /// Set when a multi-mutation contains a whole-document delete.
    do_delete_doc: bool,
    pub store_result: Option<StoreResult>,
    pub response_cas: u64,
}

impl SubdocContext {
    /// Decode the wire payload into operations. A `single` request has
    /// exactly one op built from the extras; a multi request carries a
    /// spec list in the value.
    pub fn parse(cookie: &crate::Cookie, single: bool, mutator: bool) -> Result<Self, Status> {
        let request = cookie.request();
        let header = request.header();
        let opcode = Opcode::try_from(header.opcode).map_err(|_| Status::UnknownCommand)?;

        let mut ops = Vec::new();
        let (doc_flags, expiry);

        if single {
            let payload = SubdocSinglePayload::parse(request.extras(), request.value())?;
            doc_flags = payload.doc_flags;
            expiry = payload.expiry;
            ops.push(SubdocOp {
                opcode,
                flags: payload.path_flags,
                path: payload.path.to_vec(),
                value: payload.value.to_vec(),
                status: Status::Success,
                result: Vec::new(),
            });
        } else {
            let payload = SubdocMultiPayload::parse(request.extras())?;
            doc_flags = payload.doc_flags;
            expiry = payload.expiry;
            for spec in parse_multi_specs(request.value(), mutator)? {
                ops.push(SubdocOp {
                    opcode: spec.opcode,
                    flags: spec.path_flags,
                    path: spec.path.to_vec(),
                    value: spec.value.to_vec(),
                    status: Status::Success,
                    result: Vec::new(),
                });
            }
        }

        Ok(Self {
            single,
            mutator,
            doc_flags,
            expiry,
            key: request.key().to_vec(),
            vbucket: header.vbucket(),
            client_cas: header.cas,
            durability: cookie.durability,
            ops,
            fetched: None,
            document_deleted: false,
            needs_new_doc: false,
            attempts: 0,
            do_delete_doc: false,
            store_result: None,
            response_cas: 0,
        })
    }

    /// Whether any op addresses the xattr section with the given
    /// namespace.
    fn uses_xattrs(&self, system: bool) -> bool {
        self.ops.iter().any(|op| {
            op.flags.is_xattr()
                && !xattr::is_virtual_xattr(xattr::xattr_key(&op.path))
                && xattr::is_system_xattr(xattr::xattr_key(&op.path)) == system
        })
    }

    fn uses_xtoc(&self) -> bool {
        self.ops
            .iter()
            .any(|op| op.flags.is_xattr() && xattr::xattr_key(&op.path) == b"$XTOC")
    }

    /// Authorize the xattr phase before it touches anything.
    fn check_xattr_access(&self, privileges: &XattrPrivileges) -> Result<(), EngineError> {
        if self.uses_xattrs(true) {
            let held = if self.mutator {
                privileges.sys_write
            } else {
                privileges.sys_read
            };
            if !held {
                return Err(EngineError::Eaccess);
            }
        }
        if self.uses_xattrs(false) {
            let held = if self.mutator {
                privileges.write
            } else {
                privileges.read
            };
            if !held {
                return Err(EngineError::Eaccess);
            }
        }
        // $XTOC needs at least one of the read privileges
        if self.uses_xtoc() && !privileges.read && !privileges.sys_read {
            return Err(EngineError::Eaccess);
        }
        Ok(())
    }

    /// The root type inferred from the first mutator's path, used to
    /// synthesize an empty document for Add/Mkdoc semantics.
    fn inferred_root(&self) -> Vec<u8> {
        let array_root = self
            .ops
            .iter()
            .find(|op| !op.flags.is_xattr())
            .map(|op| op.path.first() == Some(&b'['))
            .unwrap_or(false);
        if array_root {
            b"[]".to_vec()
        } else {
            b"{}".to_vec()
        }
    }

    /// Drive fetch → operate → update until done or suspended. Responses
    /// are shaped by the caller from the per-op state left in `self`.
    pub fn step(
        &mut self,
        engine: &dyn KvEngine,
        io: &CookieIo,
        operator: &dyn SubdocOperator,
        privileges: &XattrPrivileges,
        max_attempts: usize,
    ) -> EngineResult<()> {
        let auto_retry = self.client_cas == 0 && self.mutator;

        loop {
            self.attempts += 1;
            if self.attempts > max_attempts {
                warn!(
                    "subdoc: hit maximum number of auto-retry attempts ({}), returning tmpfail",
                    max_attempts
                );
                return Err(EngineError::TempFail);
            }

            // 1. fetch
            if self.fetched.is_none() && !self.needs_new_doc {
                let filter = if self.doc_flags.access_deleted() {
                    DocStateFilter::AliveOrDeleted
                } else {
                    DocStateFilter::Alive
                };
                match engine.get(io, &self.key, self.vbucket, filter) {
                    Ok(item) => {
                        self.document_deleted = item.is_deleted();
                        self.fetched = Some(item);
                    }
                    Err(EngineError::KeyNotFound) if self.mutator => {
                        if self.doc_flags.add() || self.doc_flags.mkdoc() {
                            self.needs_new_doc = true;
                        } else {
                            return Err(EngineError::KeyNotFound);
                        }
                    }
                    Err(e) => return Err(e),
                }
            }

            // 2. authorize the xattr phase
            self.check_xattr_access(privileges)?;

            // 3. operate (both phases, pure CPU)
            let outcome = self.operate(operator, privileges)?;

            if !self.mutator {
                self.response_cas = self.fetched.as_ref().map(|i| i.cas()).unwrap_or(0);
                return Ok(());
            }

            // single-path mutation failure or multi-path failure: report,
            // do not write
            if !outcome.all_ok {
                return Ok(());
            }
            if !outcome.modified && !self.needs_new_doc {
                self.response_cas = self.fetched.as_ref().map(|i| i.cas()).unwrap_or(0);
                return Ok(());
            }

            // 4. update
            let (semantics, cas) = if self.needs_new_doc {
                (StoreSemantics::Add, 0)
            } else if self.client_cas != 0 {
                (StoreSemantics::Cas, self.client_cas)
            } else {
                (
                    StoreSemantics::Cas,
                    self.fetched.as_ref().map(|i| i.cas()).unwrap_or(0),
                )
            };

            let document_state = if self.do_delete_doc || self.document_deleted {
                DocState::Deleted
            } else {
                DocState::Alive
            };

            let mut item = Item::new(
                &self.key,
                outcome.value,
                outcome.datatype,
                self.fetched.as_ref().map(|i| i.flags()).unwrap_or(0),
                self.vbucket,
            );
            if let Some(expiry) = self.expiry {
                item.set_expiry(expiry);
            } else if let Some(fetched) = &self.fetched {
                item.set_expiry(fetched.expiry());
            }

            match engine.store(io, &item, cas, semantics, self.durability, document_state) {
                Ok(result) => {
                    self.store_result = Some(result);
                    self.response_cas = result.cas;
                    return Ok(());
                }
                Err(EngineError::KeyExists) if auto_retry => {
                    // a concurrent writer got in between our fetch and
                    // store; start over from a fresh fetch
                    self.reset();
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn reset(&mut self) {
        self.fetched = None;
        self.needs_new_doc = false;
        self.document_deleted = false;
        self.do_delete_doc = false;
        self.store_result = None;
        for op in &mut self.ops {
            op.status = Status::Success;
            op.result.clear();
        }
    }

    /// Run the xattr phase, the xattr-delete phase, and the body phase
    /// over the current document image.
    fn operate(
        &mut self,
        operator: &dyn SubdocOperator,
        privileges: &XattrPrivileges,
    ) -> EngineResult<OperateOutcome> {
        // current document image
        let (mut datatype, value): (Datatype, Vec<u8>) = if self.needs_new_doc {
            (Datatype::JSON, self.inferred_root())
        } else {
            match &self.fetched {
                Some(item) => (item.datatype(), item.value().to_vec()),
                None => return Err(EngineError::Internal),
            }
        };

        let (xattr_section, body) = Item::split_xattr(&value, datatype);
        let mut pairs = xattr::decode(xattr_section);

        let mut body = if datatype.is_snappy() {
            let mut decoder = snap::raw::Decoder::new();
            let inflated = decoder
                .decompress_vec(body)
                .map_err(|_| EngineError::Internal)?;
            datatype.clear(Datatype::SNAPPY);
            inflated
        } else {
            body.to_vec()
        };

        let mut all_ok = true;
        let mut modified = false;

        // phase: XATTR
        for op in &mut self.ops {
            if !op.flags.is_xattr() {
                continue;
            }
            let key = xattr::xattr_key(&op.path).to_vec();

            let status = if xattr::is_virtual_xattr(&key) {
                run_virtual_op(op, &key, &pairs, self.fetched.as_ref(), self.document_deleted, privileges)
            } else {
                run_xattr_op(operator, op, &key, &mut pairs, &mut modified)
            };
            op.status = status;
            if self.mutator && status != Status::Success {
                all_ok = false;
                break;
            }
        }

        // phase: XATTR delete (a whole-document delete strips the user
        // attributes but the system namespace survives)
        if all_ok {
            let delete_requested = self
                .ops
                .iter()
                .any(|op| !op.flags.is_xattr() && op.opcode == Opcode::Delete);
            if delete_requested {
                self.do_delete_doc = true;
                pairs.retain(|(key, _)| xattr::is_system_xattr(key));
                modified = true;
            }
        }

        // phase: body
        if all_ok {
            for op in &mut self.ops {
                if op.flags.is_xattr() || op.status != Status::Success {
                    continue;
                }
                let status = if is_wholedoc_op(op.opcode) {
                    match op.opcode {
                        Opcode::Get => {
                            op.result = body.clone();
                            Status::Success
                        }
                        Opcode::Set => {
                            body = op.value.clone();
                            modified = true;
                            Status::Success
                        }
                        Opcode::Delete => Status::Success, // handled above
                        _ => Status::Einval,
                    }
                } else if op.opcode == Opcode::SubdocGet
                    || op.opcode == Opcode::SubdocExists
                    || op.opcode == Opcode::SubdocGetCount
                {
                    match operator.lookup(&body, op.opcode, &path_str(&op.path)) {
                        Ok(result) => {
                            op.result = result;
                            Status::Success
                        }
                        Err(status) => status,
                    }
                } else {
                    match operator.mutate(
                        &body,
                        op.opcode,
                        op.flags,
                        &path_str(&op.path),
                        &op.value,
                    ) {
                        Ok((new_body, result)) => {
                            body = new_body;
                            if let Some(result) = result {
                                op.result = result;
                            }
                            modified = true;
                            Status::Success
                        }
                        Err(status) => status,
                    }
                };
                op.status = status;
                if self.mutator && status != Status::Success {
                    all_ok = false;
                    break;
                }
            }
        }

        // assemble the new document image
        let xattr_blob = xattr::encode(&pairs);
        let mut out = Vec::with_capacity(xattr_blob.len() + body.len());
        out.extend_from_slice(&xattr_blob);
        let body_start = out.len();
        if !self.do_delete_doc {
            out.extend_from_slice(&body);
        }

        let mut out_datatype = Datatype::RAW;
        if !xattr_blob.is_empty() {
            out_datatype |= Datatype::XATTR;
        }
        if serde_json::from_slice::<serde::de::IgnoredAny>(&out[body_start..]).is_ok() {
            out_datatype |= Datatype::JSON;
        }

        Ok(OperateOutcome {
            all_ok,
            modified,
            value: out,
            datatype: out_datatype,
        })
    }
}

struct OperateOutcome {
    all_ok: bool,
    modified: bool,
    value: Vec<u8>,
    datatype: Datatype,
}

fn path_str(path: &[u8]) -> String {
    String::from_utf8_lossy(path).to_string()
}

/// Lookups against the virtual attributes. Mutating them is never
/// allowed.
fn run_virtual_op(
    op: &mut SubdocOp,
    key: &[u8],
    pairs: &[(Vec<u8>, Vec<u8>)],
    fetched: Option<&Item>,
    deleted: bool,
    privileges: &XattrPrivileges,
) -> Status {
    let is_lookup = matches!(
        op.opcode,
        Opcode::SubdocGet | Opcode::SubdocExists | Opcode::SubdocGetCount
    );
    if !is_lookup {
        return Status::SubdocXattrCantModifyVattr;
    }

    let synthesized = match key {
        b"$document" => {
            let item = match fetched {
                Some(item) => item,
                None => return Status::SubdocPathEnoent,
            };
            serde_json::json!({ "$document": xattr::vattr_document(item, deleted) })
        }
        b"$XTOC" => serde_json::json!({
            "$XTOC": xattr::vattr_xtoc(pairs, privileges.read, privileges.sys_read)
        }),
        _ => return Status::SubdocXattrUnknownVattr,
    };

    let doc = synthesized.to_string().into_bytes();
    match JsonSubdocOperator.lookup(&doc, op.opcode, &path_str(&op.path)) {
        Ok(result) => {
            op.result = result;
            Status::Success
        }
        Err(status) => status,
    }
}

/// One op against a real xattr key: the operator runs over a synthesized
/// `{"<key>": <value>}` document, and for mutations the key's pair is
/// rewritten from the operator's output.
fn run_xattr_op(
    operator: &dyn SubdocOperator,
    op: &mut SubdocOp,
    key: &[u8],
    pairs: &mut Vec<(Vec<u8>, Vec<u8>)>,
    modified: &mut bool,
) -> Status {
    let existing = pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

    // the operator sees a document of the shape {"<xattr_key>": <value>}
    let doc = match &existing {
        Some(value) => {
            let mut doc = Vec::with_capacity(key.len() + value.len() + 4);
            doc.push(b'{');
            doc.extend_from_slice(
                serde_json::json!(String::from_utf8_lossy(key)).to_string().as_bytes(),
            );
            doc.push(b':');
            doc.extend_from_slice(value);
            doc.push(b'}');
            doc
        }
        None => b"{}".to_vec(),
    };

    let is_lookup = matches!(
        op.opcode,
        Opcode::SubdocGet | Opcode::SubdocExists | Opcode::SubdocGetCount
    );

    if is_lookup {
        match operator.lookup(&doc, op.opcode, &path_str(&op.path)) {
            Ok(result) => {
                op.result = result;
                Status::Success
            }
            Err(status) => status,
        }
    } else {
        let value = if op.flags.expand_macros() {
            xattr::expand_macros(&op.value)
        } else {
            op.value.clone()
        };
        // creating a fresh xattr key always needs the implicit mkdir
        let flags = op.flags | SubdocPathFlags::MKDIR_P;
        match operator.mutate(&doc, op.opcode, flags, &path_str(&op.path), &value) {
            Ok((new_doc, result)) => {
                if let Some(result) = result {
                    op.result = result;
                }
                update_pair(pairs, key, &new_doc);
                *modified = true;
                Status::Success
            }
            Err(status) => status,
        }
    }
}

/// Extract the key's value from the operator's output document and fold it
/// back into the pair list.
fn update_pair(pairs: &mut Vec<(Vec<u8>, Vec<u8>)>, key: &[u8], new_doc: &[u8]) {
    let parsed: serde_json::Value = match serde_json::from_slice(new_doc) {
        Ok(parsed) => parsed,
        Err(_) => return,
    };
    let key_str = String::from_utf8_lossy(key).to_string();
    match parsed.get(&key_str) {
        Some(value) => {
            let encoded = value.to_string().into_bytes();
            if let Some(pair) = pairs.iter_mut().find(|(k, _)| k == key) {
                pair.1 = encoded;
            } else {
                pairs.push((key.to_vec(), encoded));
            }
        }
        None => {
            pairs.retain(|(k, _)| k != key);
        }
    }
}

pub(crate) fn is_wholedoc_op(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::Get | Opcode::Set | Opcode::Delete)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::memory::MemoryEngine;
    use engine::IoNotify;
    use std::sync::Arc;

    fn io() -> CookieIo {
        struct Noop;
        impl IoNotify for Noop {
            fn notify_io_complete(&self, _status: EngineResult<()>) {}
        }
        Arc::new(Noop)
    }

    fn full_privileges() -> XattrPrivileges {
        XattrPrivileges { read: true, write: true, sys_read: true, sys_write: true }
    }

    fn context(mutator: bool, ops: Vec<SubdocOp>, doc_flags: SubdocDocFlags) -> SubdocContext {
        SubdocContext {
            single: ops.len() == 1,
            mutator,
            doc_flags,
            expiry: None,
            key: b"doc".to_vec(),
            vbucket: 0,
            client_cas: 0,
            durability: None,
            ops,
            fetched: None,
            document_deleted: false,
            needs_new_doc: false,
            attempts: 0,
            do_delete_doc: false,
            store_result: None,
            response_cas: 0,
        }
    }

    fn op(opcode: Opcode, path: &str, value: &str) -> SubdocOp {
        SubdocOp {
            opcode,
            flags: SubdocPathFlags::NONE,
            path: path.as_bytes().to_vec(),
            value: value.as_bytes().to_vec(),
            status: Status::Success,
            result: Vec::new(),
        }
    }

    fn xattr_op(opcode: Opcode, path: &str, value: &str) -> SubdocOp {
        SubdocOp {
            flags: SubdocPathFlags::XATTR_PATH,
            ..op(opcode, path, value)
        }
    }

    fn seed(engine: &MemoryEngine, value: &[u8], datatype: Datatype) {
        let item = Item::new(b"doc", value.to_vec(), datatype, 0, 0);
        engine
            .store(&io(), &item, 0, StoreSemantics::Set, None, DocState::Alive)
            .unwrap();
    }

    #[test]
    fn lookup_and_mutation_roundtrip() {
        let engine = MemoryEngine::new(1);
        seed(&engine, br#"{"a":1}"#, Datatype::JSON);

        let mut ctx = context(false, vec![op(Opcode::SubdocGet, "a", "")], SubdocDocFlags::NONE);
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        assert_eq!(ctx.ops[0].status, Status::Success);
        assert_eq!(ctx.ops[0].result, b"1");
        assert_ne!(ctx.response_cas, 0);

        let mut ctx = context(
            true,
            vec![op(Opcode::SubdocDictUpsert, "b", "2")],
            SubdocDocFlags::NONE,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        assert!(ctx.store_result.is_some());

        let fetched = engine.get(&io(), b"doc", 0, DocStateFilter::Alive).unwrap();
        assert_eq!(fetched.value(), br#"{"a":1,"b":2}"#);
    }

    #[test]
    fn missing_document_semantics() {
        let engine = MemoryEngine::new(1);

        // replace semantics: error to client
        let mut ctx = context(
            true,
            vec![op(Opcode::SubdocDictUpsert, "a", "1")],
            SubdocDocFlags::NONE,
        );
        assert_eq!(
            ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
                .unwrap_err(),
            EngineError::KeyNotFound
        );

        // mkdoc synthesizes an empty root inferred from the first path
        let mut ctx = context(
            true,
            vec![op(Opcode::SubdocDictUpsert, "a", "1")],
            SubdocDocFlags::MKDOC,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        let fetched = engine.get(&io(), b"doc", 0, DocStateFilter::Alive).unwrap();
        assert_eq!(fetched.value(), br#"{"a":1}"#);
    }

    #[test]
    fn multi_mutation_aborts_on_first_failure() {
        let engine = MemoryEngine::new(1);
        seed(&engine, br#"{"a":1}"#, Datatype::JSON);

        let mut ctx = context(
            true,
            vec![
                op(Opcode::SubdocDictUpsert, "b", "2"),
                op(Opcode::SubdocReplace, "missing", "3"),
                op(Opcode::SubdocDictUpsert, "c", "4"),
            ],
            SubdocDocFlags::NONE,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        assert!(ctx.store_result.is_none());
        assert_eq!(ctx.ops[1].status, Status::SubdocPathEnoent);

        // nothing was written
        let fetched = engine.get(&io(), b"doc", 0, DocStateFilter::Alive).unwrap();
        assert_eq!(fetched.value(), br#"{"a":1}"#);
    }

    #[test]
    fn multi_lookup_continues_past_failures() {
        let engine = MemoryEngine::new(1);
        seed(&engine, br#"{"a":1}"#, Datatype::JSON);

        let mut ctx = context(
            false,
            vec![
                op(Opcode::SubdocGet, "missing", ""),
                op(Opcode::SubdocGet, "a", ""),
            ],
            SubdocDocFlags::NONE,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        assert_eq!(ctx.ops[0].status, Status::SubdocPathEnoent);
        assert_eq!(ctx.ops[1].status, Status::Success);
        assert_eq!(ctx.ops[1].result, b"1");
    }

    #[test]
    fn xattr_phase_reads_and_writes_pairs() {
        let engine = MemoryEngine::new(1);
        let blob = xattr::encode(&[(b"meta".to_vec(), br#"{"rev":1}"#.to_vec())]);
        let mut value = blob.clone();
        value.extend_from_slice(br#"{"a":1}"#);
        seed(&engine, &value, Datatype::JSON | Datatype::XATTR);

        // lookup within the xattr
        let mut ctx = context(
            false,
            vec![xattr_op(Opcode::SubdocGet, "meta.rev", "")],
            SubdocDocFlags::NONE,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        assert_eq!(ctx.ops[0].status, Status::Success);
        assert_eq!(ctx.ops[0].result, b"1");

        // mutate the xattr and the body in one request
        let mut ctx = context(
            true,
            vec![
                xattr_op(Opcode::SubdocDictUpsert, "meta.rev", "2"),
                op(Opcode::SubdocDictUpsert, "b", "9"),
            ],
            SubdocDocFlags::NONE,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();

        let fetched = engine.get(&io(), b"doc", 0, DocStateFilter::Alive).unwrap();
        assert!(fetched.datatype().is_xattr());
        let (section, body) = Item::split_xattr(fetched.value(), fetched.datatype());
        assert_eq!(body, br#"{"a":1,"b":9}"#);
        let pairs = xattr::decode(section);
        assert_eq!(pairs[0].0, b"meta");
        assert_eq!(pairs[0].1, br#"{"rev":2}"#);
    }

    #[test]
    fn xattr_privilege_enforced() {
        let engine = MemoryEngine::new(1);
        let blob = xattr::encode(&[(b"_sys".to_vec(), b"1".to_vec())]);
        let mut value = blob;
        value.extend_from_slice(br#"{}"#);
        seed(&engine, &value, Datatype::JSON | Datatype::XATTR);

        let mut ctx = context(
            false,
            vec![xattr_op(Opcode::SubdocGet, "_sys", "")],
            SubdocDocFlags::NONE,
        );
        let privileges = XattrPrivileges { read: true, ..Default::default() };
        assert_eq!(
            ctx.step(&engine, &io(), &JsonSubdocOperator, &privileges, 100)
                .unwrap_err(),
            EngineError::Eaccess
        );
    }

    #[test]
    fn xtoc_requires_some_read_privilege() {
        let engine = MemoryEngine::new(1);
        seed(&engine, br#"{}"#, Datatype::JSON);

        let mut ctx = context(
            false,
            vec![xattr_op(Opcode::SubdocGet, "$XTOC", "")],
            SubdocDocFlags::NONE,
        );
        assert_eq!(
            ctx.step(&engine, &io(), &JsonSubdocOperator, &XattrPrivileges::default(), 100)
                .unwrap_err(),
            EngineError::Eaccess
        );

        let mut ctx = context(
            false,
            vec![xattr_op(Opcode::SubdocGet, "$XTOC", "")],
            SubdocDocFlags::NONE,
        );
        let privileges = XattrPrivileges { read: true, ..Default::default() };
        ctx.step(&engine, &io(), &JsonSubdocOperator, &privileges, 100)
            .unwrap();
        assert_eq!(ctx.ops[0].status, Status::Success);
        assert_eq!(ctx.ops[0].result, b"[]");
    }

    #[test]
    fn vattr_document_lookup() {
        let engine = MemoryEngine::new(1);
        seed(&engine, br#"{"a":1}"#, Datatype::JSON);

        let mut ctx = context(
            false,
            vec![xattr_op(Opcode::SubdocGet, "$document.deleted", "")],
            SubdocDocFlags::NONE,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        assert_eq!(ctx.ops[0].status, Status::Success);
        assert_eq!(ctx.ops[0].result, b"false");

        // mutating a virtual attribute is refused
        let mut ctx = context(
            true,
            vec![xattr_op(Opcode::SubdocDictUpsert, "$document.deleted", "true")],
            SubdocDocFlags::NONE,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        assert_eq!(ctx.ops[0].status, Status::SubdocXattrCantModifyVattr);
    }

    #[test]
    fn wholedoc_delete_strips_user_xattrs() {
        let engine = MemoryEngine::new(1);
        let blob = xattr::encode(&[
            (b"meta".to_vec(), b"1".to_vec()),
            (b"_sync".to_vec(), b"2".to_vec()),
        ]);
        let mut value = blob;
        value.extend_from_slice(br#"{"a":1}"#);
        seed(&engine, &value, Datatype::JSON | Datatype::XATTR);

        let mut ctx = context(
            true,
            vec![op(Opcode::Delete, "", "")],
            SubdocDocFlags::NONE,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        assert!(ctx.do_delete_doc);

        let tombstone = engine
            .get(&io(), b"doc", 0, DocStateFilter::AliveOrDeleted)
            .unwrap();
        assert!(tombstone.is_deleted());
        let (section, body) = Item::split_xattr(tombstone.value(), tombstone.datatype());
        assert!(body.is_empty());
        let pairs = xattr::decode(section);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, b"_sync");
    }

    /// A concurrent writer between fetch and store surfaces as KeyExists;
    /// with a client CAS of zero the outer loop re-fetches and the second
    /// store succeeds. The engine observes exactly two store attempts.
    #[test]
    fn cas_race_retries_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        struct RacingEngine {
            inner: MemoryEngine,
            stores: AtomicUsize,
        }

        impl KvEngine for RacingEngine {
            fn get(
                &self,
                cookie: &CookieIo,
                key: &[u8],
                vbucket: u16,
                filter: DocStateFilter,
            ) -> EngineResult<Item> {
                self.inner.get(cookie, key, vbucket, filter)
            }

            fn get_locked(
                &self,
                cookie: &CookieIo,
                key: &[u8],
                vbucket: u16,
                lock_seconds: u32,
            ) -> EngineResult<Item> {
                self.inner.get_locked(cookie, key, vbucket, lock_seconds)
            }

            fn unlock(
                &self,
                cookie: &CookieIo,
                key: &[u8],
                vbucket: u16,
                cas: u64,
            ) -> EngineResult<()> {
                self.inner.unlock(cookie, key, vbucket, cas)
            }

            fn store(
                &self,
                cookie: &CookieIo,
                item: &Item,
                cas: u64,
                semantics: StoreSemantics,
                durability: Option<DurabilityRequirement>,
                document_state: DocState,
            ) -> EngineResult<StoreResult> {
                if self.stores.fetch_add(1, Ordering::SeqCst) == 0 {
                    // another client wrote the document under us
                    let sneak = Item::new(item.key(), br#"{"z":0}"#.to_vec(), Datatype::JSON, 0, 0);
                    self.inner
                        .store(cookie, &sneak, 0, StoreSemantics::Set, None, DocState::Alive)
                        .unwrap();
                    return Err(EngineError::KeyExists);
                }
                self.inner
                    .store(cookie, item, cas, semantics, durability, document_state)
            }

            fn remove(
                &self,
                cookie: &CookieIo,
                key: &[u8],
                vbucket: u16,
                cas: u64,
                durability: Option<DurabilityRequirement>,
            ) -> EngineResult<StoreResult> {
                self.inner.remove(cookie, key, vbucket, cas, durability)
            }

            fn arithmetic(
                &self,
                cookie: &CookieIo,
                key: &[u8],
                vbucket: u16,
                args: engine::ArithmeticArgs,
            ) -> EngineResult<(u64, StoreResult)> {
                self.inner.arithmetic(cookie, key, vbucket, args)
            }

            fn touch(
                &self,
                cookie: &CookieIo,
                key: &[u8],
                vbucket: u16,
                expiry: u32,
            ) -> EngineResult<Item> {
                self.inner.touch(cookie, key, vbucket, expiry)
            }

            fn flush(&self, cookie: &CookieIo) -> EngineResult<()> {
                self.inner.flush(cookie)
            }

            fn vbucket_uuid(&self, vbucket: u16) -> EngineResult<u64> {
                self.inner.vbucket_uuid(vbucket)
            }

            fn dcp_open(
                &self,
                cookie: &CookieIo,
                flags: u32,
                name: &[u8],
            ) -> EngineResult<Box<dyn engine::DcpConnection>> {
                self.inner.dcp_open(cookie, flags, name)
            }
        }

        let engine = RacingEngine {
            inner: MemoryEngine::new(1),
            stores: AtomicUsize::new(0),
        };
        seed(&engine.inner, br#"{"a":1}"#, Datatype::JSON);

        let mut ctx = context(
            true,
            vec![op(Opcode::SubdocDictUpsert, "b", "2")],
            SubdocDocFlags::NONE,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();

        assert_eq!(engine.stores.load(Ordering::SeqCst), 2);
        assert!(ctx.store_result.is_some());
        // the retry operated on the concurrent writer's document
        let fetched = engine.inner.get(&io(), b"doc", 0, DocStateFilter::Alive).unwrap();
        assert_eq!(fetched.value(), br#"{"b":2,"z":0}"#);
    }

    #[test]
    fn deleted_document_access() {
        let engine = MemoryEngine::new(1);
        let blob = xattr::encode(&[(b"_sync".to_vec(), br#"{"id":7}"#.to_vec())]);
        let mut value = blob;
        value.extend_from_slice(br#"{"a":1}"#);
        seed(&engine, &value, Datatype::JSON | Datatype::XATTR);
        engine.remove(&io(), b"doc", 0, 0, None).unwrap();

        // without AccessDeleted the document is gone
        let mut ctx = context(
            false,
            vec![xattr_op(Opcode::SubdocGet, "_sync.id", "")],
            SubdocDocFlags::NONE,
        );
        assert_eq!(
            ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
                .unwrap_err(),
            EngineError::KeyNotFound
        );

        // with AccessDeleted the system xattr is still addressable
        let mut ctx = context(
            false,
            vec![xattr_op(Opcode::SubdocGet, "_sync.id", "")],
            SubdocDocFlags::ACCESS_DELETED,
        );
        ctx.step(&engine, &io(), &JsonSubdocOperator, &full_privileges(), 100)
            .unwrap();
        assert!(ctx.document_deleted);
        assert_eq!(ctx.ops[0].status, Status::Success);
        assert_eq!(ctx.ops[0].result, b"7");
    }
}
