// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Entry points wiring the sub-document engine into the dispatcher and
//! shaping its wire responses.

use crate::dispatch::{drive_steppable, ExecCtx};
use crate::executors::mutation_extras;
use crate::privileges::Privilege;
use crate::subdoc::{SubdocContext, XattrPrivileges};
use crate::Cookie;
use engine::EngineError;
use protocol_mcbp::{Datatype, Status};

pub(crate) fn single_lookup(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    execute(ctx, cookie, true, false)
}

pub(crate) fn single_mutation(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    execute(ctx, cookie, true, true)
}

pub(crate) fn multi_lookup(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    execute(ctx, cookie, false, false)
}

pub(crate) fn multi_mutation(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    execute(ctx, cookie, false, true)
}

fn execute(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie, single: bool, mutator: bool) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let mut context = match cookie.take_context::<SubdocContext>() {
            Some(context) => context,
            None => match SubdocContext::parse(cookie, single, mutator) {
                Ok(context) => context,
                Err(status) => {
                    cookie.set_error_context("invalid subdoc request");
                    ctx.conn.send_error(ctx.server, cookie, status);
                    return Ok(());
                }
            },
        };

        let privileges = XattrPrivileges {
            read: ctx.conn.priv_ctx.holds(Privilege::XattrRead),
            write: ctx.conn.priv_ctx.holds(Privilege::XattrWrite),
            sys_read: ctx.conn.priv_ctx.holds(Privilege::SystemXattrRead),
            sys_write: ctx.conn.priv_ctx.holds(Privilege::SystemXattrWrite),
        };

        let io = ctx.cookie_io(cookie);
        let engine = ctx.engine();
        let operator = ctx.worker.operator.clone();
        let max_attempts = ctx.server.settings.mutation_retries;

        match context.step(engine.as_ref(), &io, operator.as_ref(), &privileges, max_attempts) {
            Ok(()) => {
                respond(ctx, cookie, &context);
                Ok(())
            }
            Err(EngineError::WouldBlock) => {
                cookie.store_context(context);
                Err(EngineError::WouldBlock)
            }
            Err(e) => Err(e),
        }
    })
}

fn respond(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie, context: &SubdocContext) {
    cookie.cas = context.response_cas;

    if context.single {
        respond_single(ctx, cookie, context);
    } else if context.mutator {
        respond_multi_mutation(ctx, cookie, context);
    } else {
        respond_multi_lookup(ctx, cookie, context);
    }
}

fn overall_success_status(deleted: bool) -> Status {
    if deleted {
        Status::SubdocSuccessDeleted
    } else {
        Status::Success
    }
}

fn overall_failure_status(deleted: bool) -> Status {
    if deleted {
        Status::SubdocMultiPathFailureDeleted
    } else {
        Status::SubdocMultiPathFailure
    }
}

fn respond_single(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie, context: &SubdocContext) {
    let op = &context.ops[0];
    if op.status != Status::Success {
        ctx.conn.send_error(ctx.server, cookie, op.status);
        return;
    }

    let extras = match context.store_result {
        Some(result) => mutation_extras(ctx.conn, result.mutation),
        None => Vec::new(),
    };
    let status = overall_success_status(context.document_deleted);
    let cas = context.response_cas;
    let value = op.result.clone();
    ctx.conn.send_response(
        ctx.server,
        cookie,
        status,
        &extras,
        &[],
        &value,
        Datatype::RAW,
        cas,
    );
}

/// Per-op results: `status[2] || resultlen[4] || result` for every op.
fn respond_multi_lookup(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie, context: &SubdocContext) {
    let mut body = Vec::new();
    let mut any_failed = false;
    for op in &context.ops {
        if op.status != Status::Success {
            any_failed = true;
        }
        body.extend_from_slice(&(op.status as u16).to_be_bytes());
        body.extend_from_slice(&(op.result.len() as u32).to_be_bytes());
        body.extend_from_slice(&op.result);
    }

    let status = if any_failed {
        overall_failure_status(context.document_deleted)
    } else {
        overall_success_status(context.document_deleted)
    };
    let cas = context.response_cas;
    ctx.conn.send_response(
        ctx.server,
        cookie,
        status,
        &[],
        &[],
        &body,
        Datatype::RAW,
        cas,
    );
}

/// Success: results only for ops which produce one
/// (`index[1] || status[2] || resultlen[4] || result`). Failure: the index
/// and status of the first failing op, and nothing was written.
fn respond_multi_mutation(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie, context: &SubdocContext) {
    if let Some((index, op)) = context
        .ops
        .iter()
        .enumerate()
        .find(|(_, op)| op.status != Status::Success)
    {
        let mut body = Vec::with_capacity(3);
        body.push(index as u8);
        body.extend_from_slice(&(op.status as u16).to_be_bytes());
        // the deleted-document failure mapping applies to lookups only;
        // a failed mutation always reports the plain multi-path failure
        ctx.conn.send_response(
            ctx.server,
            cookie,
            Status::SubdocMultiPathFailure,
            &[],
            &[],
            &body,
            Datatype::RAW,
            0,
        );
        return;
    }

    let extras = match context.store_result {
        Some(result) => mutation_extras(ctx.conn, result.mutation),
        None => Vec::new(),
    };

    let mut body = Vec::new();
    for (index, op) in context.ops.iter().enumerate() {
        if op.result.is_empty() {
            continue;
        }
        body.push(index as u8);
        body.extend_from_slice(&(op.status as u16).to_be_bytes());
        body.extend_from_slice(&(op.result.len() as u32).to_be_bytes());
        body.extend_from_slice(&op.result);
    }

    let status = overall_success_status(context.document_deleted);
    let cas = context.response_cas;
    ctx.conn.send_response(
        ctx.server,
        cookie,
        status,
        &extras,
        &[],
        &body,
        Datatype::RAW,
        cas,
    );
}
