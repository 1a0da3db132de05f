// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::dispatch::{drive_steppable, ExecCtx};
use crate::Cookie;
use engine::{EngineError, Item};
use protocol_mcbp::{Datatype, Opcode, Status};

/// touch: update the expiry without returning the value.
pub(crate) fn touch(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let (key, vbucket, expiry) = parse(cookie);
        let io = ctx.cookie_io(cookie);
        let item = ctx.engine().touch(&io, &key, vbucket, expiry)?;
        cookie.cas = item.cas();
        ctx.conn.send_success(ctx.server, cookie);
        Ok(())
    })
}

/// gat / gatq: get-and-touch.
pub(crate) fn gat(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let (key, vbucket, expiry) = parse(cookie);
        let quiet = cookie.opcode() == Ok(Opcode::Gatq);

        let io = ctx.cookie_io(cookie);
        let item = match ctx.engine().touch(&io, &key, vbucket, expiry) {
            Ok(item) => item,
            Err(EngineError::KeyNotFound) if quiet => {
                cookie.response_complete = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut datatype = item.datatype();
        let (_, body) = Item::split_xattr(item.value(), datatype);
        datatype.clear(Datatype::XATTR);
        let body = body.to_vec();
        let extras = item.flags().to_be_bytes();
        ctx.conn.send_response(
            ctx.server,
            cookie,
            Status::Success,
            &extras,
            &[],
            &body,
            datatype,
            item.cas(),
        );
        Ok(())
    })
}

fn parse(cookie: &Cookie) -> (Vec<u8>, u16, u32) {
    let request = cookie.request();
    let extras = request.extras();
    let expiry = u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]);
    (request.key().to_vec(), request.header().vbucket(), expiry)
}
