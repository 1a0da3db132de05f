// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Server-initiated packets injected into a connection's output stream in
//! between responses: authentication requests relayed to the auth
//! provider, the active-external-users push, and clustermap change
//! notifications.

use protocol_common::Compose;
use protocol_mcbp::{Datatype, RequestMessage, ServerOpcode};
use session::Session;
use std::sync::Arc;

pub(crate) enum ServerEvent {
    /// Relay a SASL exchange to the authentication provider. The id
    /// correlates the eventual response.
    Authenticate { id: u32, payload: Vec<u8> },
    /// Push the list of currently authenticated external users.
    ActiveExternalUsers { payload: Vec<u8> },
    /// Push a new cluster map to a client which negotiated change
    /// notifications.
    ClustermapNotification {
        revision: i64,
        bucket: String,
        payload: Arc<Vec<u8>>,
    },
}

impl ServerEvent {
    pub fn description(&self) -> &'static str {
        match self {
            ServerEvent::Authenticate { .. } => "AuthenticationRequest",
            ServerEvent::ActiveExternalUsers { .. } => "ActiveExternalUsers",
            ServerEvent::ClustermapNotification { .. } => "ClustermapChangeNotification",
        }
    }

    /// Serialize the event into the session's send pipeline. Returns the
    /// number of bytes written.
    pub fn execute(&self, session: &mut Session) -> usize {
        match self {
            ServerEvent::Authenticate { id, payload } => {
                let message = RequestMessage {
                    opaque: *id,
                    datatype: Datatype::JSON,
                    value: payload,
                    ..RequestMessage::server(ServerOpcode::Authenticate)
                };
                message.compose(session)
            }
            ServerEvent::ActiveExternalUsers { payload } => {
                let message = RequestMessage {
                    datatype: Datatype::JSON,
                    value: payload,
                    ..RequestMessage::server(ServerOpcode::ActiveExternalUsers)
                };
                message.compose(session)
            }
            ServerEvent::ClustermapNotification { revision, bucket, payload } => {
                let extras = (*revision as u32).to_be_bytes();
                let message = RequestMessage {
                    datatype: Datatype::JSON,
                    extras: &extras,
                    key: bucket.as_bytes(),
                    value: payload,
                    ..RequestMessage::server(ServerOpcode::ClustermapChangeNotification)
                };
                message.compose(session)
            }
        }
    }
}
