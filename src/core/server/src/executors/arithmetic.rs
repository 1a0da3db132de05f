// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::dispatch::{drive_steppable, ExecCtx};
use crate::executors::mutation_extras;
use crate::Cookie;
use engine::{ArithmeticArgs, EngineError};
use protocol_mcbp::{Datatype, Opcode, Status};

/// increment / decrement. Extras are `delta[8] || initial[8] || expiry[4]`;
/// an expiry of `0xffffffff` means "do not create on miss".
pub(crate) fn arithmetic(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let request = cookie.request();
        let opcode = cookie.opcode().map_err(|_| EngineError::Invalid)?;
        let extras = request.extras();
        let delta = u64::from_be_bytes([
            extras[0], extras[1], extras[2], extras[3], extras[4], extras[5], extras[6], extras[7],
        ]);
        let initial = u64::from_be_bytes([
            extras[8], extras[9], extras[10], extras[11], extras[12], extras[13], extras[14],
            extras[15],
        ]);
        let expiry = u32::from_be_bytes([extras[16], extras[17], extras[18], extras[19]]);
        let key = request.key().to_vec();
        let vbucket = request.header().vbucket();

        if delta > i64::MAX as u64 {
            return Err(EngineError::DeltaBadval);
        }
        let delta = match opcode {
            Opcode::Decrement | Opcode::Decrementq => -(delta as i64),
            _ => delta as i64,
        };

        let io = ctx.cookie_io(cookie);
        let (value, result) = ctx.engine().arithmetic(
            &io,
            &key,
            vbucket,
            ArithmeticArgs { delta, initial, expiry },
        )?;

        cookie.cas = result.cas;
        if opcode.is_quiet() {
            cookie.response_complete = true;
            return Ok(());
        }

        let extras = mutation_extras(ctx.conn, result.mutation);
        let body = value.to_be_bytes();
        ctx.conn.send_response(
            ctx.server,
            cookie,
            Status::Success,
            &extras,
            &[],
            &body,
            Datatype::RAW,
            result.cas,
        );
        Ok(())
    })
}
