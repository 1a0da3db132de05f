// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use log::LevelFilter;
use serde::{Deserialize, Serialize};

// constants to define default values
const DEBUG_LOG_LEVEL: Level = Level::Info;
const DEBUG_LOG_FILE: Option<String> = None;

// helper functions
fn log_level() -> Level {
    DEBUG_LOG_LEVEL
}

fn log_file() -> Option<String> {
    DEBUG_LOG_FILE
}

// definitions
#[derive(Copy, Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Level> for LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => LevelFilter::Error,
            Level::Warn => LevelFilter::Warn,
            Level::Info => LevelFilter::Info,
            Level::Debug => LevelFilter::Debug,
            Level::Trace => LevelFilter::Trace,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Debug {
    #[serde(default = "log_level")]
    log_level: Level,
    #[serde(default = "log_file")]
    log_file: Option<String>,
}

// implementation
impl Debug {
    pub fn log_level(&self) -> LevelFilter {
        self.log_level.into()
    }

    pub fn log_file(&self) -> Option<String> {
        self.log_file.clone()
    }
}

// trait implementations
impl Default for Debug {
    fn default() -> Self {
        Self {
            log_level: log_level(),
            log_file: log_file(),
        }
    }
}

pub trait DebugConfig {
    fn debug(&self) -> &Debug;
}
