// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

#[macro_use]
extern crate log;

mod bucket;
mod debug;
mod extauth;
mod mcbp;
mod mcbpserver;
mod server;
mod tls;
mod worker;

pub use bucket::{Bucket, BucketConfig};
pub use debug::{Debug, DebugConfig};
pub use extauth::{ExternalAuth, ExternalAuthConfig};
pub use mcbp::{Mcbp, McbpConfig};
pub use mcbpserver::McbpserverConfig;
pub use server::{Server, ServerConfig};
pub use tls::{Tls, TlsConfig};
pub use worker::{Worker, WorkerConfig};
