// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::dispatch::ExecCtx;
use crate::server_event::ServerEvent;
use crate::Cookie;
use protocol_mcbp::{Datatype, Status};

pub(crate) fn get_cluster_config(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let (revision, payload) = ctx.server.cluster.get();
    if payload.is_empty() {
        cookie.set_error_context("no cluster configuration available");
        ctx.conn.send_error(ctx.server, cookie, Status::KeyEnoent);
        return;
    }
    ctx.conn.last_seen_clustermap_rev = revision;
    let value = payload.to_vec();
    ctx.conn.send_response(
        ctx.server,
        cookie,
        Status::Success,
        &[],
        &[],
        &value,
        Datatype::JSON,
        0,
    );
}

/// Install a new cluster map (extras carry the revision) and push change
/// notifications to every connection which negotiated them.
pub(crate) fn set_cluster_config(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let request = cookie.request();
    let extras = request.extras();
    let revision = u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]) as i64;
    let payload = request.value().to_vec();

    ctx.server.cluster.set(revision, payload);
    let (_, payload) = ctx.server.cluster.get();

    let bucket_name = ctx.bucket().name().to_string();
    for (worker, token, conn_id) in ctx.server.ccn_subscribers() {
        // skip the sender; it obviously has the map already
        if conn_id == ctx.conn.id {
            ctx.conn.last_seen_clustermap_rev = revision;
            continue;
        }
        worker.send_server_event(
            token,
            conn_id,
            ServerEvent::ClustermapNotification {
                revision,
                bucket: bucket_name.clone(),
                payload: payload.clone(),
            },
        );
    }

    ctx.conn.send_success(ctx.server, cookie);
}
