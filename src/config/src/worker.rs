// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const WORKER_THREADS: usize = 4;
const WORKER_TIMEOUT: usize = 100;
const WORKER_NEVENT: usize = 1024;

// requests processed per connection per event-loop entry, by priority
const REQS_PER_EVENT_HIGH: usize = 50;
const REQS_PER_EVENT_MED: usize = 20;
const REQS_PER_EVENT_LOW: usize = 5;

// helper functions for default values
fn threads() -> usize {
    WORKER_THREADS
}

fn timeout() -> usize {
    WORKER_TIMEOUT
}

fn nevent() -> usize {
    WORKER_NEVENT
}

fn reqs_per_event_high() -> usize {
    REQS_PER_EVENT_HIGH
}

fn reqs_per_event_med() -> usize {
    REQS_PER_EVENT_MED
}

fn reqs_per_event_low() -> usize {
    REQS_PER_EVENT_LOW
}

// definitions
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Worker {
    #[serde(default = "threads")]
    threads: usize,
    #[serde(default = "timeout")]
    timeout: usize,
    #[serde(default = "nevent")]
    nevent: usize,
    #[serde(default = "reqs_per_event_high")]
    reqs_per_event_high: usize,
    #[serde(default = "reqs_per_event_med")]
    reqs_per_event_med: usize,
    #[serde(default = "reqs_per_event_low")]
    reqs_per_event_low: usize,
}

// implementation
impl Worker {
    pub fn threads(&self) -> usize {
        std::cmp::max(1, self.threads)
    }

    /// poll timeout in milliseconds
    pub fn timeout(&self) -> usize {
        self.timeout
    }

    pub fn nevent(&self) -> usize {
        self.nevent
    }

    pub fn reqs_per_event_high(&self) -> usize {
        self.reqs_per_event_high
    }

    pub fn reqs_per_event_med(&self) -> usize {
        self.reqs_per_event_med
    }

    pub fn reqs_per_event_low(&self) -> usize {
        self.reqs_per_event_low
    }
}

// trait implementations
impl Default for Worker {
    fn default() -> Self {
        Self {
            threads: threads(),
            timeout: timeout(),
            nevent: nevent(),
            reqs_per_event_high: reqs_per_event_high(),
            reqs_per_event_med: reqs_per_event_med(),
            reqs_per_event_low: reqs_per_event_low(),
        }
    }
}

pub trait WorkerConfig {
    fn worker(&self) -> &Worker;

    fn worker_mut(&mut self) -> &mut Worker;
}
