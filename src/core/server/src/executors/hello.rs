// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::dispatch::ExecCtx;
use crate::Cookie;
use protocol_mcbp::{Datatype, Feature, FeatureSet, Status};

/// Feature negotiation. The value holds 16-bit feature codes; the response
/// echoes the accepted intersection. Unknown codes are ignored and
/// duplicates collapse.
pub(crate) fn hello(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let request = cookie.request();
    let agent = String::from_utf8_lossy(request.key()).to_string();
    let value = request.value();

    let mut accepted = FeatureSet::new();
    for chunk in value.chunks_exact(2) {
        let code = u16::from_be_bytes([chunk[0], chunk[1]]);
        if let Ok(feature) = Feature::try_from(code) {
            accepted.insert(feature);
        } else {
            debug!("{}: ignoring unknown hello feature {:#06x}", ctx.conn.id, code);
        }
    }

    if !agent.is_empty() {
        debug!("{}: client agent \"{}\"", ctx.conn.id, agent);
    }

    ctx.conn.features = accepted;

    if accepted.contains(Feature::ClustermapChangeNotification) {
        ctx.server
            .subscribe_ccn(ctx.worker.clone(), ctx.token, ctx.conn.id);
    } else {
        ctx.server.unsubscribe_ccn(ctx.conn.id);
    }

    let mut body = Vec::with_capacity(accepted.iter().count() * 2);
    for feature in accepted.iter() {
        body.extend_from_slice(&(feature as u16).to_be_bytes());
    }

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
