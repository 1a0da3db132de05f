// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Opcode dispatch: a dense table of executor functions plus the shared
//! driver for "steppable" commands which may suspend on the engine and
//! re-enter.

use crate::bucket::Bucket;
use crate::connection::Connection;
use crate::context::ServerContext;
use crate::cookie::Cookie;
use crate::executors;
use crate::notify::{CookieIoHandle, WorkerShared};
use engine::{CookieIo, EngineError, EngineResult, KvEngine};
use protocol_mcbp::Opcode;
use std::sync::{Arc, OnceLock};

pub(crate) struct ExecCtx<'a> {
    pub conn: &'a mut Connection,
    pub server: &'a Arc<ServerContext>,
    pub worker: &'a Arc<WorkerShared>,
    pub token: usize,
}

impl<'a> ExecCtx<'a> {
    pub fn bucket(&self) -> Arc<Bucket> {
        self.server.bucket(self.conn.bucket_index).clone()
    }

    pub fn engine(&self) -> Arc<dyn KvEngine> {
        self.bucket().engine().clone()
    }

    /// Build the engine-facing resumption token for a cookie.
    pub fn cookie_io(&self, cookie: &Cookie) -> CookieIo {
        Arc::new(CookieIoHandle {
            shared: self.worker.clone(),
            token: self.token,
            conn_id: self.conn.id,
            cookie_seq: cookie.seq,
        })
    }
}

pub(crate) type ExecutorFn = for<'a, 'b, 'c> fn(&'a mut ExecCtx<'b>, &'c mut Cookie);

/// Route an opcode to its executor. Valid opcodes without an executor get
/// the not-supported responder; truly unknown opcodes are rejected before
/// dispatch.
pub(crate) fn executor_for(opcode: Opcode) -> ExecutorFn {
    static TABLE: OnceLock<[ExecutorFn; 256]> = OnceLock::new();
    TABLE.get_or_init(build_table)[opcode as u8 as usize]
}

fn build_table() -> [ExecutorFn; 256] {
    use Opcode::*;

    let mut table = [executors::misc::not_supported as ExecutorFn; 256];
    let mut set = |opcode: Opcode, executor: ExecutorFn| {
        table[opcode as u8 as usize] = executor;
    };

    set(Get, executors::get::get);
    set(Getq, executors::get::get);
    set(Getk, executors::get::get);
    set(Getkq, executors::get::get);
    set(GetLocked, executors::get::get_locked);
    set(UnlockKey, executors::get::unlock);

    set(Set, executors::store::store);
    set(Setq, executors::store::store);
    set(Add, executors::store::store);
    set(Addq, executors::store::store);
    set(Replace, executors::store::store);
    set(Replaceq, executors::store::store);

    set(Delete, executors::remove::remove);
    set(Deleteq, executors::remove::remove);

    set(Increment, executors::arithmetic::arithmetic);
    set(Incrementq, executors::arithmetic::arithmetic);
    set(Decrement, executors::arithmetic::arithmetic);
    set(Decrementq, executors::arithmetic::arithmetic);

    set(Append, executors::append_prepend::append_prepend);
    set(Appendq, executors::append_prepend::append_prepend);
    set(Prepend, executors::append_prepend::append_prepend);
    set(Prependq, executors::append_prepend::append_prepend);

    set(Touch, executors::touch::touch);
    set(Gat, executors::touch::gat);
    set(Gatq, executors::touch::gat);

    set(Quit, executors::misc::quit);
    set(Quitq, executors::misc::quit);
    set(Noop, executors::misc::noop);
    set(Version, executors::misc::version);
    set(Verbosity, executors::misc::verbosity);
    set(GetErrorMap, executors::misc::get_error_map);
    set(RbacRefresh, executors::misc::rbac_refresh);
    set(DropPrivilege, executors::misc::drop_privilege);
    set(GetCmdTimer, executors::misc::get_cmd_timer);
    set(Flush, executors::misc::flush);
    set(Flushq, executors::misc::flush);

    set(Hello, executors::hello::hello);

    set(SaslListMechs, executors::sasl::list_mechs);
    set(SaslAuth, executors::sasl::auth);
    set(SaslStep, executors::sasl::step);
    set(AuthProvider, executors::sasl::auth_provider);

    set(SelectBucket, executors::select_bucket::select_bucket);
    set(ListBuckets, executors::select_bucket::list_buckets);

    set(Stat, executors::stat::stat);

    set(GetClusterConfig, executors::cluster_config::get_cluster_config);
    set(SetClusterConfig, executors::cluster_config::set_cluster_config);

    set(DcpOpen, executors::dcp_exec::open);
    set(DcpControl, executors::dcp_exec::control);
    set(DcpStreamReq, executors::dcp_exec::stream_req);
    set(DcpCloseStream, executors::dcp_exec::close_stream);
    set(DcpGetFailoverLog, executors::dcp_exec::get_failover_log);
    set(GetFailoverLog, executors::dcp_exec::get_failover_log);
    set(DcpBufferAcknowledgement, executors::dcp_exec::buffer_acknowledgement);
    set(DcpNoop, executors::dcp_exec::noop);

    set(SubdocGet, executors::subdoc_exec::single_lookup);
    set(SubdocExists, executors::subdoc_exec::single_lookup);
    set(SubdocGetCount, executors::subdoc_exec::single_lookup);
    set(SubdocDictAdd, executors::subdoc_exec::single_mutation);
    set(SubdocDictUpsert, executors::subdoc_exec::single_mutation);
    set(SubdocDelete, executors::subdoc_exec::single_mutation);
    set(SubdocReplace, executors::subdoc_exec::single_mutation);
    set(SubdocArrayPushLast, executors::subdoc_exec::single_mutation);
    set(SubdocArrayPushFirst, executors::subdoc_exec::single_mutation);
    set(SubdocArrayInsert, executors::subdoc_exec::single_mutation);
    set(SubdocArrayAddUnique, executors::subdoc_exec::single_mutation);
    set(SubdocCounter, executors::subdoc_exec::single_mutation);
    set(SubdocMultiLookup, executors::subdoc_exec::multi_lookup);
    set(SubdocMultiMutation, executors::subdoc_exec::multi_mutation);

    table
}

/// The shared driver for steppable commands: swap out the stored async
/// status, run the step function, remap the result through the
/// connection's error filter and route it.
pub(crate) fn drive_steppable<F>(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie, mut step: F)
where
    F: FnMut(&mut ExecCtx<'_>, &mut Cookie) -> EngineResult<()>,
{
    let resumed = cookie.swap_aiostat();
    cookie.ewouldblock = false;

    let result = match resumed {
        Ok(()) => step(ctx, cookie),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {}
        Err(EngineError::WouldBlock) => {
            cookie.ewouldblock = true;
        }
        Err(e) => {
            let _ = ctx.conn.send_engine_error(ctx.server, cookie, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_routes() {
        for byte in 0u8..=0xff {
            if let Ok(opcode) = Opcode::try_from(byte) {
                // must not panic, and unimplemented opcodes fall through to
                // the not-supported responder
                let _ = executor_for(opcode);
            }
        }
    }
}
