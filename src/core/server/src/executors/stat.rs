// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::dispatch::ExecCtx;
use crate::Cookie;
use protocol_common::Compose;
use protocol_mcbp::{Datatype, ResponseMessage, Status};

/// Stat groups. Each entry is its own response packet; an empty key/value
/// packet terminates the sequence.
pub(crate) fn stat(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    let request = cookie.request();
    let group = String::from_utf8_lossy(request.key()).to_string();

    let entries: Vec<(String, Vec<u8>)> = match group.as_str() {
        "" => {
            let bucket = ctx.bucket();
            vec![
                (
                    "version".to_string(),
                    env!("CARGO_PKG_VERSION").as_bytes().to_vec(),
                ),
                ("bucket".to_string(), bucket.name().as_bytes().to_vec()),
                (
                    "cmd_total".to_string(),
                    total_commands(&bucket).to_string().into_bytes(),
                ),
            ]
        }
        // the read-only JSON dump of this connection's state
        "connections" => {
            vec![(
                format!("conn_{}", ctx.conn.id),
                ctx.conn.to_json().to_string().into_bytes(),
            )]
        }
        "responses" => {
            let bucket = ctx.bucket();
            let mut entries = Vec::new();
            for code in 0u16..256 {
                let count = bucket.response_count(code);
                if count > 0 {
                    entries.push((format!("{:x}", code), count.to_string().into_bytes()));
                }
            }
            entries
        }
        _ => {
            cookie.set_error_context("unknown stat group");
            ctx.conn.send_error(ctx.server, cookie, Status::KeyEnoent);
            return;
        }
    };

    let opcode = cookie.header().opcode;
    let opaque = cookie.opaque();
    for (key, value) in &entries {
        let message = ResponseMessage {
            opcode,
            status: Status::Success as u16,
            opaque,
            key: key.as_bytes(),
            value,
            datatype: Datatype::RAW,
            ..Default::default()
        };
        message.compose(&mut cookie.response);
    }

    // terminating packet with empty key and value
    let terminator = ResponseMessage {
        opcode,
        status: Status::Success as u16,
        opaque,
        ..Default::default()
    };
    terminator.compose(&mut cookie.response);
    cookie.response_complete = true;
    ctx.bucket().count_response(Status::Success as u16);
}

fn total_commands(bucket: &crate::Bucket) -> u64 {
    (0u16..256).map(|op| bucket.timings.count(op as u8)).sum()
}
