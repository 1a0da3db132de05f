// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Append / prepend: fetch-modify-store with optimistic concurrency. The
//! command context is an explicit state machine so that the command can be
//! re-entered after an engine suspension without re-parsing its input, and
//! reset cleanly when a CAS race forces a retry.

use crate::dispatch::{drive_steppable, ExecCtx};
use crate::executors::mutation_extras;
use crate::Cookie;
use engine::{CookieIo, DocState, DocStateFilter, EngineError, EngineResult, Item, KvEngine,
    StoreResult, StoreSemantics};
use protocol_mcbp::{Datatype, Opcode, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApState {
    ValidateInput,
    InflateInputData,
    GetItem,
    AllocateNewItem,
    StoreItem,
    Reset,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Append,
    Prepend,
}

struct AppendPrependContext {
    state: ApState,
    mode: Mode,
    key: Vec<u8>,
    vbucket: u16,
    /// CAS requested by the client (0 for none).
    client_cas: u64,
    /// The (possibly still compressed) bytes to concatenate.
    input: Vec<u8>,
    input_snappy: bool,
    durability: Option<engine::DurabilityRequirement>,
    old: Option<Item>,
    new_item: Option<Item>,
    attempts: usize,
    result: Option<StoreResult>,
}

impl AppendPrependContext {
    fn new(cookie: &Cookie) -> Self {
        let request = cookie.request();
        let header = request.header();
        let mode = match cookie.opcode() {
            Ok(Opcode::Prepend) | Ok(Opcode::Prependq) => Mode::Prepend,
            _ => Mode::Append,
        };
        Self {
            state: ApState::ValidateInput,
            mode,
            key: request.key().to_vec(),
            vbucket: header.vbucket(),
            client_cas: header.cas,
            input: request.value().to_vec(),
            input_snappy: header.datatype.is_snappy(),
            durability: cookie.durability,
            old: None,
            new_item: None,
            attempts: 0,
            result: None,
        }
    }

    /// Run the state machine until it completes or needs the engine to
    /// call back. Never touches the cookie: results land in `self`.
    fn step(
        &mut self,
        engine: &dyn KvEngine,
        io: &CookieIo,
        max_retries: usize,
    ) -> EngineResult<StoreResult> {
        loop {
            match self.state {
                ApState::ValidateInput => {
                    self.state = if self.input_snappy {
                        ApState::InflateInputData
                    } else {
                        ApState::GetItem
                    };
                }
                ApState::InflateInputData => {
                    let mut decoder = snap::raw::Decoder::new();
                    match decoder.decompress_vec(&self.input) {
                        Ok(inflated) => {
                            self.input = inflated;
                            self.input_snappy = false;
                            self.state = ApState::GetItem;
                        }
                        Err(_) => return Err(EngineError::Invalid),
                    }
                }
                ApState::GetItem => {
                    let item = match engine.get(io, &self.key, self.vbucket, DocStateFilter::Alive)
                    {
                        Ok(item) => item,
                        // concatenating onto a missing document is not stored
                        Err(EngineError::KeyNotFound) => return Err(EngineError::NotStored),
                        Err(e) => return Err(e),
                    };
                    if self.client_cas != 0 && item.cas() != self.client_cas {
                        return Err(EngineError::KeyExists);
                    }
                    self.old = Some(item);
                    self.state = ApState::AllocateNewItem;
                }
                ApState::AllocateNewItem => {
                    let old = match &self.old {
                        Some(old) => old,
                        None => return Err(EngineError::Internal),
                    };
                    self.new_item = Some(concatenate(old, &self.input, self.mode)?);
                    self.state = ApState::StoreItem;
                }
                ApState::StoreItem => {
                    let (new_item, old_cas) = match (&self.new_item, &self.old) {
                        (Some(new_item), Some(old)) => (new_item, old.cas()),
                        _ => return Err(EngineError::Internal),
                    };
                    match engine.store(
                        io,
                        new_item,
                        old_cas,
                        StoreSemantics::Cas,
                        self.durability,
                        DocState::Alive,
                    ) {
                        Ok(result) => {
                            self.result = Some(result);
                            self.state = ApState::Done;
                        }
                        Err(EngineError::KeyExists) => {
                            self.state = ApState::Reset;
                        }
                        Err(e) => return Err(e),
                    }
                }
                ApState::Reset => {
                    // lost the CAS race; drop the fetched item and the new
                    // allocation and go again, bounded so two fighting
                    // clients cannot pin the worker
                    self.attempts += 1;
                    if self.client_cas != 0 {
                        return Err(EngineError::KeyExists);
                    }
                    if self.attempts >= max_retries {
                        return Err(EngineError::TempFail);
                    }
                    self.old = None;
                    self.new_item = None;
                    self.state = ApState::GetItem;
                }
                ApState::Done => {
                    return self.result.ok_or(EngineError::Internal);
                }
            }
        }
    }
}

pub(crate) fn append_prepend(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let quiet = cookie.opcode().map(|o| o.is_quiet()).unwrap_or(false);
        let max_retries = ctx.server.settings.mutation_retries;
        let io = ctx.cookie_io(cookie);
        let engine = ctx.engine();

        let mut context = cookie
            .take_context::<AppendPrependContext>()
            .unwrap_or_else(|| AppendPrependContext::new(cookie));

        match context.step(engine.as_ref(), &io, max_retries) {
            Ok(result) => {
                cookie.cas = result.cas;
                if quiet {
                    cookie.response_complete = true;
                } else {
                    let extras = mutation_extras(ctx.conn, result.mutation);
                    ctx.conn.send_response(
                        ctx.server,
                        cookie,
                        Status::Success,
                        &extras,
                        &[],
                        &[],
                        Datatype::RAW,
                        result.cas,
                    );
                }
                Ok(())
            }
            Err(EngineError::WouldBlock) => {
                // park; the context resumes exactly where it suspended
                cookie.store_context(context);
                Err(EngineError::WouldBlock)
            }
            Err(e) => Err(e),
        }
    })
}

/// Concatenate onto the user body only: a document's xattr section is
/// carried over untouched, and a compressed body is inflated first.
fn concatenate(old: &Item, input: &[u8], mode: Mode) -> EngineResult<Item> {
    let mut datatype = old.datatype();
    let (xattrs, body) = Item::split_xattr(old.value(), datatype);

    let inflated;
    let body = if datatype.is_snappy() {
        let mut decoder = snap::raw::Decoder::new();
        inflated = decoder
            .decompress_vec(body)
            .map_err(|_| EngineError::Internal)?;
        datatype.clear(Datatype::SNAPPY);
        &inflated[..]
    } else {
        body
    };

    let mut value = Vec::with_capacity(xattrs.len() + body.len() + input.len());
    value.extend_from_slice(xattrs);
    match mode {
        Mode::Append => {
            value.extend_from_slice(body);
            value.extend_from_slice(input);
        }
        Mode::Prepend => {
            value.extend_from_slice(input);
            value.extend_from_slice(body);
        }
    }

    // concatenation rarely preserves JSON-ness; re-check the body
    let body_start = xattrs.len();
    if serde_json::from_slice::<serde::de::IgnoredAny>(&value[body_start..]).is_ok() {
        datatype |= Datatype::JSON;
    } else {
        datatype.clear(Datatype::JSON);
    }

    let mut item = Item::new(old.key(), value, datatype, old.flags(), old.vbucket());
    item.set_expiry(old.expiry());
    Ok(item)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concatenate_preserves_xattrs() {
        let pair = b"_sys\x00v\x00";
        let mut blob = Vec::new();
        blob.extend_from_slice(&(pair.len() as u32).to_be_bytes());
        blob.extend_from_slice(pair);
        let mut value = Vec::new();
        value.extend_from_slice(&(blob.len() as u32).to_be_bytes());
        value.extend_from_slice(&blob);
        value.extend_from_slice(b"hello");

        let old = Item::new(b"k", value.clone(), Datatype::XATTR, 0, 0);
        let appended = concatenate(&old, b" world", Mode::Append).unwrap();
        let (xattrs, body) = Item::split_xattr(appended.value(), appended.datatype());
        assert_eq!(body, b"hello world");
        assert_eq!(xattrs, &value[..value.len() - 5]);
        assert!(appended.datatype().is_xattr());

        let prepended = concatenate(&old, b">> ", Mode::Prepend).unwrap();
        let (_, body) = Item::split_xattr(prepended.value(), prepended.datatype());
        assert_eq!(body, b">> hello");
    }

    #[test]
    fn concatenate_inflates_compressed_body() {
        let mut encoder = snap::raw::Encoder::new();
        let compressed = encoder.compress_vec(b"abcabcabcabc").unwrap();
        let old = Item::new(b"k", compressed, Datatype::SNAPPY, 0, 0);
        let appended = concatenate(&old, b"!", Mode::Append).unwrap();
        assert!(!appended.datatype().is_snappy());
        assert_eq!(appended.value(), b"abcabcabcabc!");
    }

    #[test]
    fn concatenate_rechecks_json() {
        let old = Item::new(b"k", b"[1,2".to_vec(), Datatype::RAW, 0, 0);
        let appended = concatenate(&old, b",3]", Mode::Append).unwrap();
        assert!(appended.datatype().is_json());
        assert_eq!(appended.value(), b"[1,2,3]");
    }
}
