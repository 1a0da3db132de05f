// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

/// Process-level signals broadcast from the parent process to every thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Drop all cached data in every bucket.
    FlushAll,
    /// Begin an orderly shutdown.
    Shutdown,
}
