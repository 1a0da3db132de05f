// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::dispatch::{drive_steppable, ExecCtx};
use crate::statemachine::State;
use crate::Cookie;
use protocol_mcbp::{Datatype, Opcode, Status};

pub(crate) fn not_supported(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    cookie.set_error_context("command not supported by this server");
    ctx.conn.send_error(ctx.server, cookie, Status::NotSupported);
}

pub(crate) fn noop(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    ctx.conn.send_success(ctx.server, cookie);
}

pub(crate) fn version(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let version = env!("CARGO_PKG_VERSION").as_bytes();
    ctx.conn.send_response(
        ctx.server,
        cookie,
        Status::Success,
        &[],
        &[],
        version,
        Datatype::RAW,
        0,
    );
}

/// Quit sends a response and then closes; Quitq closes silently.
pub(crate) fn quit(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    if cookie.opcode() == Ok(Opcode::Quit) {
        ctx.conn.send_success(ctx.server, cookie);
    } else {
        cookie.response_complete = true;
    }
    ctx.conn.write_and_go = State::Closing;
}

/// Accepted for compatibility; the verbosity level has no effect on the
/// structured logger.
pub(crate) fn verbosity(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    ctx.conn.send_success(ctx.server, cookie);
}

pub(crate) fn get_error_map(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let request = cookie.request();
    let value = request.value();
    let version = u16::from_be_bytes([value[0], value[1]]);
    if version < 1 {
        cookie.set_error_context("requested version does not exist");
        ctx.conn.send_error(ctx.server, cookie, Status::KeyEnoent);
        return;
    }
    let map = ctx.server.error_map.to_vec();
    ctx.conn.send_response(
        ctx.server,
        cookie,
        Status::Success,
        &[],
        &[],
        &map,
        Datatype::JSON,
        0,
    );
}

/// Invalidate every cached privilege context in the process.
pub(crate) fn rbac_refresh(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    ctx.server.privileges.bump_generation();
    ctx.conn.send_success(ctx.server, cookie);
}

/// Drop a privilege from the connection's effective set (a test hook, as
/// in the original protocol).
pub(crate) fn drop_privilege(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let request = cookie.request();
    let name = String::from_utf8_lossy(request.key()).to_string();
    match crate::privileges::Privilege::ALL
        .iter()
        .find(|p| format!("{:?}", p).eq_ignore_ascii_case(&name))
    {
        Some(privilege) => {
            ctx.conn.priv_ctx.drop_privilege(*privilege);
            ctx.conn.send_success(ctx.server, cookie);
        }
        None => {
            cookie.set_error_context("unknown privilege");
            ctx.conn.send_error(ctx.server, cookie, Status::KeyEnoent);
        }
    }
}

pub(crate) fn get_cmd_timer(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let request = cookie.request();
    let opcode = request.extras()[0];
    let timings = ctx.bucket().timings.to_json(opcode).to_string().into_bytes();
    ctx.conn.send_response(
        ctx.server,
        cookie,
        Status::Success,
        &[],
        &[],
        &timings,
        Datatype::JSON,
        0,
    );
}

pub(crate) fn flush(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let io = ctx.cookie_io(cookie);
        ctx.engine().flush(&io)?;
        if cookie.opcode() == Ok(Opcode::Flushq) {
            cookie.response_complete = true;
        } else {
            ctx.conn.send_success(ctx.server, cookie);
        }
        Ok(())
    })
}
