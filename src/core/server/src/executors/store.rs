// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::dispatch::{drive_steppable, ExecCtx};
use crate::executors::mutation_extras;
use crate::Cookie;
use engine::{DocState, EngineError, Item, StoreSemantics};
use protocol_mcbp::{Datatype, Opcode, Status};

/// set / add / replace and their quiet variants. Extras are
/// `flags[4] || expiry[4]`.
pub(crate) fn store(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let request = cookie.request();
        let opcode = cookie.opcode().map_err(|_| EngineError::Invalid)?;
        let header = *request.header();
        let extras = request.extras();
        let flags = u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]);
        let expiry = u32::from_be_bytes([extras[4], extras[5], extras[6], extras[7]]);
        let key = request.key().to_vec();
        let value = request.value().to_vec();

        let semantics = match opcode {
            Opcode::Add | Opcode::Addq => StoreSemantics::Add,
            Opcode::Replace | Opcode::Replaceq => StoreSemantics::Replace,
            _ => {
                if header.cas != 0 {
                    StoreSemantics::Cas
                } else {
                    StoreSemantics::Set
                }
            }
        };

        // we do not trust the datatype the client sent; check the payload
        let mut datatype = header.datatype;
        if !datatype.is_snappy() {
            if serde_json::from_slice::<serde::de::IgnoredAny>(&value).is_ok() {
                datatype |= Datatype::JSON;
            } else {
                datatype.clear(Datatype::JSON);
            }
        }

        let mut item = Item::new(&key, value, datatype, flags, header.vbucket());
        item.set_expiry(expiry);

        let io = ctx.cookie_io(cookie);
        let result = ctx.engine().store(
            &io,
            &item,
            header.cas,
            semantics,
            cookie.durability,
            DocState::Alive,
        )?;

        cookie.cas = result.cas;
        if opcode.is_quiet() {
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
