// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! One module per executor family. Executors receive the execution context
//! and the cookie for the in-flight command; anything they cannot finish
//! synchronously is captured in the cookie's command context and resumed
//! after the engine notifies.

pub(crate) mod append_prepend;
pub(crate) mod arithmetic;
pub(crate) mod cluster_config;
pub(crate) mod dcp_exec;
pub(crate) mod get;
pub(crate) mod hello;
pub(crate) mod misc;
pub(crate) mod remove;
pub(crate) mod sasl;
pub(crate) mod select_bucket;
pub(crate) mod stat;
pub(crate) mod store;
pub(crate) mod subdoc_exec;
pub(crate) mod touch;

use crate::connection::Connection;
use engine::MutationDescr;
use protocol_mcbp::Feature;

/// Mutation responses carry `{vbucket_uuid, seqno}` extras when the client
/// negotiated mutation sequence numbers.
pub(crate) fn mutation_extras(conn: &Connection, descr: MutationDescr) -> Vec<u8> {
    if conn.features.contains(Feature::MutationSeqno) {
        let mut extras = Vec::with_capacity(16);
        extras.extend_from_slice(&descr.vbucket_uuid.to_be_bytes());
        extras.extend_from_slice(&descr.seqno.to_be_bytes());
        extras
    } else {
        Vec::new()
    }
}
