// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Request authorization: map an opcode onto the privilege it requires and
//! check it against the connection's cached privilege context, rebuilding
//! the context a bounded number of times when it has gone stale.

use crate::connection::{Connection, DriveCtx};
use crate::context::ServerContext;
use crate::dispatch::ExecCtx;
use crate::privileges::{CheckResult, Privilege};
use crate::Cookie;
use protocol_mcbp::{Opcode, Status};

pub(crate) enum Outcome {
    Ok,
    /// An error response was queued on the cookie.
    SentError,
    Disconnect,
}

/// The privilege a client command requires up front. Commands returning
/// `None` either need no privilege or perform finer-grained checks in
/// their executor (sub-document XATTR access, DCP open direction).
fn required_privilege(opcode: Opcode) -> Option<Privilege> {
    use Opcode::*;
    match opcode {
        Get | Getq | Getk | Getkq | GetLocked | UnlockKey | Touch | Gat | Gatq | GetReplica
        | GetRandomKey | GetMeta | GetqMeta | Observe | ObserveSeqno | SubdocGet
        | SubdocExists | SubdocGetCount | SubdocMultiLookup => Some(Privilege::Read),
        Set | Setq | Add | Addq | Replace | Replaceq | Append | Appendq | Prepend | Prependq
        | Increment | Incrementq | Decrement | Decrementq | EvictKey | SubdocDictAdd
        | SubdocDictUpsert | SubdocDelete | SubdocReplace | SubdocArrayPushLast
        | SubdocArrayPushFirst | SubdocArrayInsert | SubdocArrayAddUnique | SubdocCounter
        | SubdocMultiMutation => Some(Privilege::Upsert),
        Delete | Deleteq | DelVbucket => Some(Privilege::Delete),
        Stat | GetCmdTimer => Some(Privilege::SimpleStats),
        Flush | Flushq | CreateBucket | DeleteBucket | CollectionsSetManifest => {
            Some(Privilege::BucketManagement)
        }
        GetVbucket | GetAllVbSeqnos => Some(Privilege::MetaRead),
        SetVbucket => Some(Privilege::Upsert),
        AuditPut => Some(Privilege::Audit),
        Shutdown => Some(Privilege::Administrator),
        RbacRefresh | AuthProvider | SetClusterConfig => Some(Privilege::SecurityManagement),
        DcpStreamReq | GetFailoverLog | DcpGetFailoverLog => Some(Privilege::DcpProducer),
        DcpAddStream => Some(Privilege::DcpConsumer),
        _ => None,
    }
}

/// Check the opcode's privilege chain against the connection's cached
/// context. A stale context is rebuilt from the current database and the
/// check retried, bounded to keep a buggy peer from spinning us.
pub(crate) fn check(
    ctx: &mut DriveCtx,
    conn: &mut Connection,
    cookie: &mut Cookie,
    opcode: Opcode,
) -> Outcome {
    let privilege = match required_privilege(opcode) {
        Some(privilege) => privilege,
        None => return Outcome::Ok,
    };
    check_privilege(ctx.server, conn, cookie, privilege)
}

pub(crate) fn check_privilege(
    server: &ServerContext,
    conn: &mut Connection,
    cookie: &mut Cookie,
    privilege: Privilege,
) -> Outcome {
    for _ in 0..server.settings.privilege_rebuild_retries {
        match conn.priv_ctx.check(privilege, &server.privileges) {
            CheckResult::Ok => return Outcome::Ok,
            CheckResult::Fail => {
                info!(
                    target: "audit",
                    "{}",
                    serde_json::json!({
                        "event": "access_denied",
                        "connection": conn.id,
                        "privilege": format!("{:?}", privilege),
                        "user": conn.auth.username(),
                    })
                );
                return deny(server, conn, cookie, Status::Eaccess);
            }
            CheckResult::Stale => {
                rebuild_context(server, conn);
            }
        }
    }

    warn!(
        "{}: privilege context rebuild did not converge after {} attempts",
        conn.id, server.settings.privilege_rebuild_retries
    );
    deny(server, conn, cookie, Status::AuthStale)
}

/// Convenience for executors with data-dependent privilege needs.
pub(crate) fn require(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie, privilege: Privilege) -> bool {
    matches!(
        check_privilege(ctx.server, ctx.conn, cookie, privilege),
        Outcome::Ok
    )
}

fn deny(
    server: &ServerContext,
    conn: &mut Connection,
    cookie: &mut Cookie,
    status: Status,
) -> Outcome {
    if conn.xerror_support() {
        cookie.ensure_event_id();
        conn.send_error(server, cookie, status);
        Outcome::SentError
    } else {
        Outcome::Disconnect
    }
}

/// Rebuild the privilege context for the connection's current identity.
/// When the selected bucket no longer exists the context is rebuilt
/// against "no bucket".
pub(crate) fn rebuild_context(server: &ServerContext, conn: &mut Connection) {
    let bucket = server.bucket(conn.bucket_index);
    let bucket_name = if bucket.is_no_bucket() { "" } else { bucket.name() };
    let user = effective_user(server, conn);
    conn.priv_ctx = server.privileges.create_context(user.as_deref(), bucket_name);
}

/// The identity privilege checks run against: the authenticated user, or
/// the implicit "default" user for unauthenticated connections when the
/// default bucket is enabled.
pub(crate) fn effective_user(server: &ServerContext, conn: &Connection) -> Option<String> {
    match conn.auth.username() {
        Some(user) => Some(user.to_string()),
        None if server.settings.default_bucket_enabled => Some("default".to_string()),
        None => None,
    }
}
