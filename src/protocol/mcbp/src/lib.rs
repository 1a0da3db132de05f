// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Implementation of the memcached binary protocol (MCBP) wire format: the
//! fixed 24-byte header with its "Alt" framing-extras variants, the opcode
//! and status enumerations, frame-info elements, feature negotiation codes
//! and the sub-document payload encodings.
//!
//! This crate is purely about bytes. Anything that needs a connection, a
//! bucket, or an engine lives in the server core.

mod builder;
mod datatype;
mod feature;
mod frame;
mod header;
mod magic;
mod opcode;
mod request;
mod status;
mod subdoc;

pub use builder::*;
pub use datatype::*;
pub use feature::*;
pub use frame::*;
pub use header::*;
pub use magic::*;
pub use opcode::*;
pub use request::*;
pub use status::*;
pub use subdoc::*;

pub use protocol_common::{Compose, Parse, ParseOk};

/// Size of the fixed packet header in bytes. Shared by requests and
/// responses in both the classic and the "Alt" encodings.
pub const HEADER_LEN: usize = 24;
