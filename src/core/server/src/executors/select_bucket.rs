// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::auth;
use crate::dispatch::ExecCtx;
use crate::Cookie;
use protocol_mcbp::{Datatype, Status};

/// Associate the connection with a bucket. The caller must be able to see
/// the bucket in the privilege database; otherwise the bucket's existence
/// is not revealed.
pub(crate) fn select_bucket(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let request = cookie.request();
    let name = String::from_utf8_lossy(request.key()).to_string();

    let index = match ctx.server.find_bucket(&name) {
        Some(index) if index != 0 => index,
        _ => {
            cookie.set_error_context("no such bucket");
            ctx.conn.send_error(ctx.server, cookie, Status::Eaccess);
            return;
        }
    };

    let user = auth::effective_user(ctx.server, ctx.conn);
    if !ctx
        .server
        .privileges
        .user_may_access_bucket(user.as_deref(), &name)
    {
        cookie.set_error_context("not authorized for bucket");
        ctx.conn.send_error(ctx.server, cookie, Status::Eaccess);
        return;
    }

    ctx.conn.bucket_index = index;
    auth::rebuild_context(ctx.server, ctx.conn);
    ctx.conn.send_success(ctx.server, cookie);
}

/// The names of the ready buckets the caller may access, joined with
/// spaces as on the wire.
pub(crate) fn list_buckets(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let user = auth::effective_user(ctx.server, ctx.conn);
    let mut names = Vec::new();
    for bucket in ctx.server.buckets() {
        if bucket.is_no_bucket() || bucket.state() != crate::BucketState::Ready {
            continue;
        }
        if ctx
            .server
            .privileges
            .user_may_access_bucket(user.as_deref(), bucket.name())
        {
            names.push(bucket.name().to_string());
        }
    }

    let body = names.join(" ").into_bytes();
    ctx.conn.send_response(
        ctx.server,
        cookie,
        Status::Success,
        &[],
        &[],
        &body,
        Datatype::RAW,
        0,
    );
}
