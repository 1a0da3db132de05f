// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use serde::{Deserialize, Serialize};

// constants to define default values
const PUSH_INTERVAL: u64 = 300;
const USER_DB: Option<String> = None;

// helper functions
fn push_interval() -> u64 {
    PUSH_INTERVAL
}

fn user_db() -> Option<String> {
    USER_DB
}

// definitions
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ExternalAuth {
    /// Seconds between pushes of the active-users list to the
    /// authentication provider.
    #[serde(default = "push_interval")]
    push_interval: u64,
    /// Path to the JSON user database used for local SASL authentication.
    #[serde(default = "user_db")]
    user_db: Option<String>,
}

// implementation
impl ExternalAuth {
    pub fn push_interval(&self) -> u64 {
        std::cmp::max(1, self.push_interval)
    }

    pub fn user_db(&self) -> Option<String> {
        self.user_db.clone()
    }
}

// trait implementations
impl Default for ExternalAuth {
    fn default() -> Self {
        Self {
            push_interval: push_interval(),
            user_db: user_db(),
        }
    }
}

pub trait ExternalAuthConfig {
    fn extauth(&self) -> &ExternalAuth;
}
