// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Executors for the DCP control commands a client sends. Once a DCP
//! connection has been opened the connection's idle state is rewritten to
//! ship_log and the data direction is driven from there.

use crate::auth;
use crate::connection::Priority;
use crate::dispatch::{drive_steppable, ExecCtx};
use crate::privileges::Privilege;
use crate::Cookie;
use engine::{EngineError, DCP_OPEN_PRODUCER};
use protocol_mcbp::{Datatype, Status};

pub(crate) fn open(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        if ctx.conn.is_dcp() {
            cookie.set_error_context("a dcp connection is already open");
            ctx.conn.send_error(ctx.server, cookie, Status::Einval);
            return Ok(());
        }

        let request = cookie.request();
        let extras = request.extras();
        // extras: seqno[4] (unused) || flags[4]
        let flags = u32::from_be_bytes([extras[4], extras[5], extras[6], extras[7]]);
        let name = request.key().to_vec();

        let privilege = if flags & DCP_OPEN_PRODUCER != 0 {
            Privilege::DcpProducer
        } else {
            Privilege::DcpConsumer
        };
        if !auth::require(ctx, cookie, privilege) {
            return Ok(());
        }

        let io = ctx.cookie_io(cookie);
        let dcp = ctx.engine().dcp_open(&io, flags, &name)?;
        ctx.conn.dcp = Some(dcp);
        // replication links matter more than ordinary clients
        ctx.conn.priority = Priority::High;
        info!(
            "{}: dcp {} \"{}\" opened",
            ctx.conn.id,
            if flags & DCP_OPEN_PRODUCER != 0 { "producer" } else { "consumer" },
            String::from_utf8_lossy(&name)
        );
        ctx.conn.send_success(ctx.server, cookie);
        Ok(())
    })
}

pub(crate) fn stream_req(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let request = cookie.request();
        let header = *request.header();
        let extras = request.extras();
        let flags = u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]);
        let start_seqno = be64(&extras[8..16]);
        let end_seqno = be64(&extras[16..24]);
        let vbucket_uuid = be64(&extras[24..32]);
        let snap_start = be64(&extras[32..40]);
        let snap_end = be64(&extras[40..48]);

        if ctx.conn.dcp.is_none() {
            cookie.set_error_context("dcp stream-req on a non-dcp connection");
            ctx.conn.send_error(ctx.server, cookie, Status::Einval);
            return Ok(());
        }
        let dcp = match ctx.conn.dcp.as_mut() {
            Some(dcp) => dcp,
            None => return Err(EngineError::Internal),
        };

        match dcp.stream_req(
            header.opaque,
            header.vbucket(),
            flags,
            start_seqno,
            end_seqno,
            vbucket_uuid,
            snap_start,
            snap_end,
        ) {
            Ok(failover_log) => {
                let mut body = Vec::with_capacity(failover_log.len() * 16);
                for (uuid, seqno) in failover_log {
                    body.extend_from_slice(&uuid.to_be_bytes());
                    body.extend_from_slice(&seqno.to_be_bytes());
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
                Ok(())
            }
            Err(EngineError::Rollback) => {
                // the client must roll back to the indicated seqno; the
                // engine interface keeps this coarse and always rolls back
                // to zero
                let body = 0u64.to_be_bytes();
                ctx.conn.send_response(
                    ctx.server,
                    cookie,
                    Status::Rollback,
                    &[],
                    &[],
                    &body,
                    Datatype::RAW,
                    0,
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    })
}

pub(crate) fn close_stream(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let header = cookie.header();
        let stream_id = cookie.stream_id;
        let dcp = match ctx.conn.dcp.as_mut() {
            Some(dcp) => dcp,
            None => return Err(EngineError::Invalid),
        };
        dcp.close_stream(header.opaque, header.vbucket(), stream_id)?;
        ctx.conn.send_success(ctx.server, cookie);
        Ok(())
    })
}

pub(crate) fn get_failover_log(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let header = cookie.header();
        let dcp = match ctx.conn.dcp.as_mut() {
            Some(dcp) => dcp,
            None => return Err(EngineError::Invalid),
        };
        let failover_log = dcp.get_failover_log(header.opaque, header.vbucket())?;
        let mut body = Vec::with_capacity(failover_log.len() * 16);
        for (uuid, seqno) in failover_log {
            body.extend_from_slice(&uuid.to_be_bytes());
            body.extend_from_slice(&seqno.to_be_bytes());
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
        Ok(())
    })
}

pub(crate) fn buffer_acknowledgement(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let request = cookie.request();
        let header = *request.header();
        let extras = request.extras();
        let bytes = u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]);
        let dcp = match ctx.conn.dcp.as_mut() {
            Some(dcp) => dcp,
            None => return Err(EngineError::Invalid),
        };
        dcp.buffer_acknowledgement(header.opaque, header.vbucket(), bytes)?;
        // acknowledged without a response; flow control is one-way
        cookie.response_complete = true;
        Ok(())
    })
}

pub(crate) fn control(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let request = cookie.request();
        let header = *request.header();
        let key = request.key().to_vec();
        let value = request.value().to_vec();
        let dcp = match ctx.conn.dcp.as_mut() {
            Some(dcp) => dcp,
            None => return Err(EngineError::Invalid),
        };
        dcp.control(header.opaque, &key, &value)?;
        ctx.conn.send_success(ctx.server, cookie);
        Ok(())
    })
}

pub(crate) fn noop(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        let opaque = cookie.opaque();
        let dcp = match ctx.conn.dcp.as_mut() {
            Some(dcp) => dcp,
            None => return Err(EngineError::Invalid),
        };
        dcp.noop(opaque)?;
        ctx.conn.send_success(ctx.server, cookie);
        Ok(())
    })
}

fn be64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}
