// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::dispatch::{drive_steppable, ExecCtx};
use crate::executors::mutation_extras;
use crate::Cookie;
use protocol_mcbp::{Datatype, Status};

pub(crate) fn remove(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let request = cookie.request();
        let header = *request.header();
        let key = request.key().to_vec();
        let quiet = cookie.opcode().map(|o| o.is_quiet()).unwrap_or(false);

        let io = ctx.cookie_io(cookie);
        let result = ctx.engine().remove(
            &io,
            &key,
            header.vbucket(),
            header.cas,
            cookie.durability,
        )?;

        cookie.cas = result.cas;
        if quiet {
            cookie.response_complete = true;
            return Ok(());
        }

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
        Ok(())
    })
}
