// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::dispatch::{drive_steppable, ExecCtx};
use crate::Cookie;
use engine::{DocStateFilter, EngineError, Item};
use protocol_mcbp::{Datatype, Feature, Opcode, Status};

/// get / getq / getk / getkq
pub(crate) fn get(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let request = cookie.request();
        let opcode = cookie.opcode().map_err(|_| EngineError::Invalid)?;
        let key = request.key().to_vec();
        let vbucket = request.header().vbucket();

        let io = ctx.cookie_io(cookie);
        let item = match ctx.engine().get(&io, &key, vbucket, DocStateFilter::Alive) {
            Ok(item) => item,
            Err(EngineError::KeyNotFound)
                if matches!(opcode, Opcode::Getq | Opcode::Getkq) =>
            {
                // quiet gets swallow the miss
                cookie.response_complete = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        send_item(ctx, cookie, opcode, &key, &item);
        Ok(())
    })
}

/// get_locked: like get, but takes a write lock on the document. The
/// optional extras carry the lock timeout in seconds.
pub(crate) fn get_locked(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let request = cookie.request();
        let key = request.key().to_vec();
        let vbucket = request.header().vbucket();
        let extras = request.extras();
        let lock_seconds = if extras.len() == 4 {
            u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]])
        } else {
            15
        };

        let io = ctx.cookie_io(cookie);
        let item = ctx.engine().get_locked(&io, &key, vbucket, lock_seconds)?;
        send_item(ctx, cookie, Opcode::GetLocked, &key, &item);
        Ok(())
    })
}

pub(crate) fn unlock(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let request = cookie.request();
        let key = request.key().to_vec();
        let vbucket = request.header().vbucket();
        let cas = request.header().cas;

        let io = ctx.cookie_io(cookie);
        ctx.engine().unlock(&io, &key, vbucket, cas)?;
        ctx.conn.send_success(ctx.server, cookie);
        Ok(())
    })
}

/// Compose the item into a get response: 4 bytes of flags extras, the key
/// for the k-variants, and the user body (the xattr section never leaves
/// the engine through this path).
fn send_item(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie, opcode: Opcode, key: &[u8], item: &Item) {
    let mut datatype = item.datatype();
    let (_, mut body) = Item::split_xattr(item.value(), datatype);
    datatype.clear(Datatype::XATTR);

    let inflated;
    if datatype.is_snappy() && !ctx.conn.features.contains(Feature::Snappy) {
        let mut decoder = snap::raw::Decoder::new();
        match decoder.decompress_vec(body) {
            Ok(value) => {
                inflated = value;
                body = &inflated;
                datatype.clear(Datatype::SNAPPY);
            }
            Err(_) => {
                cookie.set_error_context("stored document failed to inflate");
                ctx.conn.send_error(ctx.server, cookie, Status::Einternal);
                return;
            }
        }
    }

    let extras = item.flags().to_be_bytes();
    let echo_key: &[u8] = if matches!(opcode, Opcode::Getk | Opcode::Getkq) {
        key
    } else {
        &[]
    };

    let body = body.to_vec();
    ctx.conn.send_response(
        ctx.server,
        cookie,
        Status::Success,
        &extras,
        echo_key,
        &body,
        datatype,
        item.cas(),
    );
}
