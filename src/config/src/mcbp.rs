// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const MAX_PACKET_SIZE: usize = 30 * 1024 * 1024;
const MAX_SEND_QUEUE_SIZE: usize = 40 * 1024 * 1024;
const STUCK_LIMIT_READY: u64 = 29;
const STUCK_LIMIT_NOT_READY: u64 = 1;
const IDLE_TIMEOUT: u64 = 0;
const MUTATION_RETRIES: usize = 100;
const PRIVILEGE_REBUILD_RETRIES: usize = 100;

// helper functions for default values
fn max_packet_size() -> usize {
    MAX_PACKET_SIZE
}

fn max_send_queue_size() -> usize {
    MAX_SEND_QUEUE_SIZE
}

fn stuck_limit_ready() -> u64 {
    STUCK_LIMIT_READY
}

fn stuck_limit_not_ready() -> u64 {
    STUCK_LIMIT_NOT_READY
}

fn idle_timeout() -> u64 {
    IDLE_TIMEOUT
}

fn mutation_retries() -> usize {
    MUTATION_RETRIES
}

fn privilege_rebuild_retries() -> usize {
    PRIVILEGE_REBUILD_RETRIES
}

// definitions
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Mcbp {
    /// Largest packet accepted from a client; anything bigger is a fatal
    /// protocol error.
    #[serde(default = "max_packet_size")]
    max_packet_size: usize,
    /// Backpressure threshold at which a connection drains its send queue
    /// before executing further commands.
    #[serde(default = "max_send_queue_size")]
    max_send_queue_size: usize,
    /// Seconds the send queue may sit unchanged before the connection is
    /// presumed stuck, when the selected bucket is ready.
    #[serde(default = "stuck_limit_ready")]
    stuck_limit_ready: u64,
    /// Same limit while the bucket is not in the ready state.
    #[serde(default = "stuck_limit_not_ready")]
    stuck_limit_not_ready: u64,
    /// Seconds a connection may be idle before it is closed. Zero disables
    /// the idle reaper.
    #[serde(default = "idle_timeout")]
    idle_timeout: u64,
    /// Bounded retries for CAS-contended read-modify-write commands.
    #[serde(default = "mutation_retries")]
    mutation_retries: usize,
    /// Bounded retries for rebuilding a stale privilege context.
    #[serde(default = "privilege_rebuild_retries")]
    privilege_rebuild_retries: usize,
}

// implementation
impl Mcbp {
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn max_send_queue_size(&self) -> usize {
        self.max_send_queue_size
    }

    pub fn stuck_limit_ready(&self) -> u64 {
        self.stuck_limit_ready
    }

    pub fn stuck_limit_not_ready(&self) -> u64 {
        self.stuck_limit_not_ready
    }

    pub fn idle_timeout(&self) -> Option<u64> {
        if self.idle_timeout == 0 {
            None
        } else {
            Some(self.idle_timeout)
        }
    }

    pub fn mutation_retries(&self) -> usize {
        self.mutation_retries
    }

    pub fn privilege_rebuild_retries(&self) -> usize {
        self.privilege_rebuild_retries
    }
}

// trait implementations
impl Default for Mcbp {
    fn default() -> Self {
        Self {
            max_packet_size: max_packet_size(),
            max_send_queue_size: max_send_queue_size(),
            stuck_limit_ready: stuck_limit_ready(),
            stuck_limit_not_ready: stuck_limit_not_ready(),
            idle_timeout: idle_timeout(),
            mutation_retries: mutation_retries(),
            privilege_rebuild_retries: privilege_rebuild_retries(),
        }
    }
}

pub trait McbpConfig {
    fn mcbp(&self) -> &Mcbp;
}
