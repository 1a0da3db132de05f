// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const BUCKET_NAMES: &[&str] = &["default"];
const DEFAULT_BUCKET_ENABLED: bool = true;
const VBUCKETS: u16 = 1024;

// helper functions for default values
fn names() -> Vec<String> {
    BUCKET_NAMES.iter().map(|s| s.to_string()).collect()
}

fn default_bucket_enabled() -> bool {
    DEFAULT_BUCKET_ENABLED
}

fn vbuckets() -> u16 {
    VBUCKETS
}

// definitions
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Bucket {
    /// Buckets created at startup, each backed by its own engine instance.
    #[serde(default = "names")]
    names: Vec<String>,
    /// Associate unauthenticated connections with the bucket named
    /// "default" on accept.
    #[serde(default = "default_bucket_enabled")]
    default_bucket_enabled: bool,
    /// Number of vbuckets each engine is carved into.
    #[serde(default = "vbuckets")]
    vbuckets: u16,
}

// implementation
impl Bucket {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn default_bucket_enabled(&self) -> bool {
        self.default_bucket_enabled
    }

    pub fn vbuckets(&self) -> u16 {
        std::cmp::max(1, self.vbuckets)
    }
}

// trait implementations
impl Default for Bucket {
    fn default() -> Self {
        Self {
            names: names(),
            default_bucket_enabled: default_bucket_enabled(),
            vbuckets: vbuckets(),
        }
    }
}

pub trait BucketConfig {
    fn bucket(&self) -> &Bucket;
}
