// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use config::*;

/// Immutable snapshot of the configuration the data path needs, taken once
/// at startup and shared read-only across every thread.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_packet_size: usize,
    pub max_send_queue_size: usize,
    pub stuck_limit_ready: u64,
    pub stuck_limit_not_ready: u64,
    pub idle_timeout: Option<u64>,
    pub mutation_retries: usize,
    pub privilege_rebuild_retries: usize,
    pub reqs_per_event_high: usize,
    pub reqs_per_event_med: usize,
    pub reqs_per_event_low: usize,
    pub vbuckets: u16,
    pub default_bucket_enabled: bool,
    pub extauth_push_interval: u64,
}

impl Settings {
    pub fn new<T: McbpConfig + WorkerConfig + BucketConfig + ExternalAuthConfig>(
        config: &T,
    ) -> Self {
        let mcbp = config.mcbp();
        let worker = config.worker();
        let bucket = config.bucket();
        Self {
            max_packet_size: mcbp.max_packet_size(),
            max_send_queue_size: mcbp.max_send_queue_size(),
            stuck_limit_ready: mcbp.stuck_limit_ready(),
            stuck_limit_not_ready: mcbp.stuck_limit_not_ready(),
            idle_timeout: mcbp.idle_timeout(),
            mutation_retries: mcbp.mutation_retries(),
            privilege_rebuild_retries: mcbp.privilege_rebuild_retries(),
            reqs_per_event_high: worker.reqs_per_event_high(),
            reqs_per_event_med: worker.reqs_per_event_med(),
            reqs_per_event_low: worker.reqs_per_event_low(),
            vbuckets: bucket.vbuckets(),
            default_bucket_enabled: bucket.default_bucket_enabled(),
            extauth_push_interval: config.extauth().push_interval(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(&McbpserverConfig::default())
    }
}
