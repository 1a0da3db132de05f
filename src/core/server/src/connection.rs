// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! A client connection and its state machine. Each connection is owned by
//! exactly one worker for its whole life; everything here runs on that
//! worker's thread. Cross-thread effects arrive only through the worker's
//! shared notification structure.

use crate::context::ServerContext;
use crate::cookie::status_for_engine_error;
use crate::dcp::McbpDcpProducers;
use crate::dispatch::{executor_for, ExecCtx};
use crate::notify::WorkerShared;
use crate::privileges::PrivilegeContext;
use crate::server_event::ServerEvent;
use crate::statemachine::State;
use crate::validators;
use crate::{auth, Cookie, MAX_INFLIGHT_COOKIES};
use bytes::BufMut;
use engine::{DcpConnection, DcpResponse, EngineError};
use protocol_common::Compose;
use protocol_mcbp::*;
use session::Session;
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Instant;

/// Sentinel: no cluster map revision has ever been sent on this
/// connection.
const CLUSTERMAP_REV_UNSEEN: i64 = i64::MIN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthState {
    Unauthenticated,
    Local(String),
    External(String),
    System,
}

impl AuthState {
    pub fn username(&self) -> Option<&str> {
        match self {
            AuthState::Unauthenticated => None,
            AuthState::Local(user) | AuthState::External(user) => Some(user),
            AuthState::System => Some("@internal"),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        !matches!(self, AuthState::Unauthenticated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Priority {
    High,
    Medium,
    Low,
}

pub(crate) struct DriveCtx<'a> {
    pub server: &'a Arc<ServerContext>,
    pub worker: &'a Arc<WorkerShared>,
    pub token: usize,
}

pub(crate) struct Connection {
    pub id: u64,
    pub session: Session,
    state: State,
    pub write_and_go: State,
    pub cookies: VecDeque<Cookie>,
    next_cookie_seq: u64,
    /// Sequence number of the cookie currently being (re)executed.
    pub executing: Option<u64>,
    pub features: FeatureSet,
    pub auth: AuthState,
    pub bucket_index: usize,
    pub priv_ctx: PrivilegeContext,
    pub priority: Priority,
    pub dcp: Option<Box<dyn DcpConnection>>,
    pub server_events: VecDeque<ServerEvent>,
    pub last_seen_clustermap_rev: i64,
    /// Executors set this to request an unconditional disconnect.
    pub disconnect: bool,
    pub is_provider: bool,
    peer: String,
    local: String,
    stuck_queue_size: usize,
    stuck_since: Instant,
    pub last_activity: Instant,
    reqs_remaining: usize,
    pub created: Instant,
}

impl Connection {
    pub fn new(id: u64, session: Session, server: &ServerContext) -> Self {
        let peer = session
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let local = session
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let state = if session.is_handshaking() {
            State::SslInit
        } else {
            State::NewCmd
        };

        // unauthenticated connections may use the default bucket
        let (bucket_index, priv_ctx) = if server.settings.default_bucket_enabled {
            match server.find_bucket("default") {
                Some(index) => (
                    index,
                    server.privileges.create_context(Some("default"), "default"),
                ),
                None => (0, server.privileges.create_context(None, "")),
            }
        } else {
            (0, server.privileges.create_context(None, ""))
        };

        let now = Instant::now();
        Self {
            id,
            session,
            state,
            write_and_go: State::NewCmd,
            cookies: VecDeque::new(),
            next_cookie_seq: 0,
            executing: None,
            features: FeatureSet::new(),
            auth: AuthState::Unauthenticated,
            bucket_index,
            priv_ctx,
            priority: Priority::Medium,
            dcp: None,
            server_events: VecDeque::new(),
            last_seen_clustermap_rev: CLUSTERMAP_REV_UNSEEN,
            disconnect: false,
            is_provider: false,
            peer,
            local,
            stuck_queue_size: 0,
            stuck_since: now,
            last_activity: now,
            reqs_remaining: 0,
            created: now,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_dcp(&self) -> bool {
        self.dcp.is_some()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn description(&self) -> String {
        format!("[ {} - {} ]", self.peer, self.local)
    }

    /// DCP connections never block on reads: the idle state becomes the
    /// full-duplex ship-log state.
    pub fn set_state(&mut self, state: State) {
        let state = if self.is_dcp() && state == State::Waiting {
            State::ShipLog
        } else {
            state
        };
        self.state = state;
    }

    pub fn xerror_support(&self) -> bool {
        self.features.contains(Feature::Xerror)
    }

    pub fn collections_support(&self) -> bool {
        self.features.contains(Feature::Collections)
    }

    fn max_reqs_per_event(&self, server: &ServerContext) -> usize {
        match self.priority {
            Priority::High => server.settings.reqs_per_event_high,
            Priority::Medium => server.settings.reqs_per_event_med,
            Priority::Low => server.settings.reqs_per_event_low,
        }
    }

    // ------------------------------------------------------------------
    // driving
    // ------------------------------------------------------------------

    /// Run the state machine until it yields. Called by the worker for
    /// every readiness event, resume, or notification.
    pub fn drive(&mut self, ctx: &mut DriveCtx) {
        self.reqs_remaining = self.max_reqs_per_event(ctx.server);
        while self.step(ctx) {
            if self.state == State::Destroyed {
                break;
            }
        }
    }

    fn step(&mut self, ctx: &mut DriveCtx) -> bool {
        trace!("{}: state {}", self.id, self.state.name());
        self.sample_send_queue(ctx.server);

        match self.state {
            State::SslInit => self.conn_ssl_init(),
            State::NewCmd => self.conn_new_cmd(ctx),
            State::Waiting => self.conn_waiting(ctx),
            State::ReadPacketHeader => self.conn_read_packet_header(ctx),
            State::ParseCmd => self.conn_parse_cmd(ctx),
            State::ReadPacketBody => self.conn_read_packet_body(ctx),
            State::Validate => self.conn_validate(ctx),
            State::Execute => self.conn_execute(ctx),
            State::SendData => self.conn_send_data(ctx),
            State::DrainSendBuffer => self.conn_drain_send_buffer(),
            State::ShipLog => self.conn_ship_log(ctx),
            State::Closing => self.conn_closing(ctx),
            State::PendingClose => self.conn_pending_close(),
            State::ImmediateClose => self.conn_immediate_close(),
            State::Destroyed => false,
        }
    }

    /// The stuck-connection watchdog, sampled on every tick: a send queue
    /// which holds bytes but has not moved for the limit closes the
    /// connection.
    fn sample_send_queue(&mut self, server: &ServerContext) {
        let size = self.session.send_queue_size();
        if size != self.stuck_queue_size {
            self.stuck_queue_size = size;
            self.stuck_since = Instant::now();
            return;
        }
        if size == 0 {
            return;
        }
        if matches!(
            self.state,
            State::Closing | State::ImmediateClose | State::Destroyed
        ) {
            return;
        }

        let ready = server.bucket(self.bucket_index).state() == crate::BucketState::Ready;
        let limit = if ready {
            server.settings.stuck_limit_ready
        } else {
            server.settings.stuck_limit_not_ready
        };
        if self.stuck_since.elapsed().as_secs() >= limit {
            warn!(
                "{}: send queue stuck for {}s with {} bytes, closing {}",
                self.id, limit, size, self.description()
            );
            self.set_state(State::Closing);
        }
    }

    fn check_bucket_dying(&mut self, server: &ServerContext) -> bool {
        let state = server.bucket(self.bucket_index).state();
        if matches!(state, crate::BucketState::Stopping | crate::BucketState::Destroying) {
            self.set_state(State::Closing);
            return true;
        }
        false
    }

    // ------------------------------------------------------------------
    // states
    // ------------------------------------------------------------------

    fn conn_ssl_init(&mut self) -> bool {
        if !self.session.is_handshaking() {
            self.set_state(State::NewCmd);
            return true;
        }
        match self.session.do_handshake() {
            Ok(()) => {
                self.set_state(State::NewCmd);
                true
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(e) => {
                warn!("{}: tls handshake failed: {}", self.id, e);
                self.set_state(State::Closing);
                true
            }
        }
    }

    fn conn_new_cmd(&mut self, ctx: &mut DriveCtx) -> bool {
        if self.check_bucket_dying(ctx.server) {
            return true;
        }

        if self.cookies.len() >= MAX_INFLIGHT_COOKIES {
            return false;
        }

        // a suspended command without the reorder marker blocks all
        // further dispatch on this connection
        if self
            .cookies
            .iter()
            .any(|c| c.ewouldblock && !c.response_complete && !c.reorder)
        {
            return false;
        }

        self.write_and_go = State::NewCmd;
        self.set_state(State::Waiting);

        // each connection only processes a bounded number of operations
        // before backing off so its siblings on this worker get served
        if self.reqs_remaining == 0 {
            ctx.worker.notify_connection(ctx.token, self.id);
            return false;
        }
        self.reqs_remaining -= 1;
        true
    }

    fn conn_waiting(&mut self, ctx: &mut DriveCtx) -> bool {
        if self.check_bucket_dying(ctx.server) {
            return true;
        }
        if self.process_server_events() {
            return true;
        }
        self.set_state(State::ReadPacketHeader);
        true
    }

    fn conn_read_packet_header(&mut self, ctx: &mut DriveCtx) -> bool {
        if self.check_bucket_dying(ctx.server) {
            return true;
        }
        if self.process_server_events() {
            return true;
        }

        if self.session.read_buffer().len() < HEADER_LEN && !self.fill_session() {
            return true; // moved to closing
        }

        if self.session.read_buffer().len() >= HEADER_LEN {
            self.set_state(State::ParseCmd);
            return true;
        }

        self.set_state(State::Waiting);
        false
    }

    fn conn_parse_cmd(&mut self, ctx: &mut DriveCtx) -> bool {
        let header = match PacketHeader::parse(self.session.read_buffer()) {
            Ok(header) => header,
            Err(e) => {
                // malformed wire: best effort error response, then close
                warn!("{}: invalid packet header ({}), closing {}", self.id, e, self.description());
                let opaque = raw_opaque(self.session.read_buffer());
                self.send_raw_error(0, Status::Einval, opaque);
                self.write_and_go = State::Closing;
                self.set_state(State::SendData);
                return true;
            }
        };

        if header.total_len() > ctx.server.settings.max_packet_size {
            warn!(
                "{}: packet of {} bytes exceeds max packet size, closing {}",
                self.id,
                header.total_len(),
                self.description()
            );
            self.send_raw_error(header.opcode, Status::E2big, header.opaque);
            self.write_and_go = State::Closing;
            self.set_state(State::SendData);
            return true;
        }

        self.set_state(State::ReadPacketBody);
        true
    }

    fn conn_read_packet_body(&mut self, ctx: &mut DriveCtx) -> bool {
        if self.check_bucket_dying(ctx.server) {
            return true;
        }

        let total = match PacketHeader::parse(self.session.read_buffer()) {
            Ok(header) => header.total_len(),
            Err(_) => {
                self.set_state(State::Closing);
                return true;
            }
        };

        if self.session.read_buffer().len() < total && !self.fill_session() {
            return true;
        }

        if self.session.read_buffer().len() < total {
            // wait for the rest of the packet
            return false;
        }

        let wire = self.session.read_buffer()[..total].to_vec();
        self.session.consume(total);
        let packet = match OwnedPacket::from_wire(wire) {
            Ok(packet) => packet,
            Err(_) => {
                self.set_state(State::Closing);
                return true;
            }
        };

        self.next_cookie_seq += 1;
        let cookie = Cookie::new(self.next_cookie_seq, packet);
        self.executing = Some(cookie.seq);
        self.cookies.push_back(cookie);
        self.set_state(State::Validate);
        true
    }

    fn conn_validate(&mut self, ctx: &mut DriveCtx) -> bool {
        if self.check_bucket_dying(ctx.server) {
            return true;
        }

        let index = match self.executing_index() {
            Some(index) => index,
            None => {
                self.set_state(State::Closing);
                return true;
            }
        };
        let header = self.cookies[index].header();

        if header.magic.is_response() {
            return self.handle_inbound_response(ctx, index);
        }

        if header.magic == Magic::ServerRequest {
            warn!("{}: received a server command, closing {}", self.id, self.description());
            self.drop_cookie(index);
            self.set_state(State::Closing);
            return true;
        }

        let opcode = match Opcode::try_from(header.opcode) {
            Ok(opcode) => opcode,
            Err(opcode) => {
                debug!("{}: unknown command {:#04x}", self.id, opcode);
                let mut cookie = match self.take_cookie(index) {
                    Some(cookie) => cookie,
                    None => return false,
                };
                self.send_error(ctx.server, &mut cookie, Status::UnknownCommand);
                self.put_cookie(index, cookie);
                self.finish_command(ctx);
                return true;
            }
        };

        // decode the framing extras into the cookie
        if let Err(close) = self.apply_frame_infos(ctx, index, opcode) {
            return close;
        }

        // per-opcode structural validation
        let request = self.cookies[index].request();
        if let Err((status, context)) = validators::validate(opcode, &request, &self.features) {
            warn!(
                "{}: invalid format for {} ({}): closing {}",
                self.id,
                opcode,
                context,
                self.description()
            );
            crate::validators::audit_invalid_packet(self.id, &self.cookies[index]);
            let mut cookie = match self.take_cookie(index) {
                Some(cookie) => cookie,
                None => return false,
            };
            cookie.set_error_context(context);
            self.send_error(ctx.server, &mut cookie, status);
            self.put_cookie(index, cookie);
            self.write_and_go = State::Closing;
            self.flush_ready_responses();
            self.executing = None;
            self.set_state(State::SendData);
            return true;
        }

        self.set_state(State::Execute);
        true
    }

    fn conn_execute(&mut self, ctx: &mut DriveCtx) -> bool {
        if self.check_bucket_dying(ctx.server) {
            return true;
        }

        let index = match self.executing_index() {
            Some(index) => index,
            None => {
                self.set_state(State::Closing);
                return true;
            }
        };

        let mut cookie = match self.take_cookie(index) {
            Some(cookie) => cookie,
            None => return false,
        };

        let opcode = match cookie.opcode() {
            Ok(opcode) => opcode,
            Err(_) => {
                self.put_cookie(index, cookie);
                self.set_state(State::Closing);
                return true;
            }
        };

        let authorized = auth::check(ctx, self, &mut cookie, opcode);
        match authorized {
            auth::Outcome::Ok => {
                let executor = executor_for(opcode);
                let mut exec = ExecCtx {
                    conn: &mut *self,
                    server: ctx.server,
                    worker: ctx.worker,
                    token: ctx.token,
                };
                executor(&mut exec, &mut cookie);
            }
            auth::Outcome::SentError => {}
            auth::Outcome::Disconnect => {
                self.put_cookie(index, cookie);
                self.set_state(State::Closing);
                return true;
            }
        }

        if self.disconnect {
            self.put_cookie(index, cookie);
            self.set_state(State::Closing);
            return true;
        }

        if cookie.ewouldblock {
            if self.features.contains(Feature::UnorderedExecution)
                && cookie.reorder
                && opcode.is_reorder_safe()
            {
                // park this cookie and keep serving the connection
                self.put_cookie(index, cookie);
                self.executing = None;
                self.set_state(State::NewCmd);
                return true;
            }
            // ordered execution: stay in execute until the engine notifies
            self.put_cookie(index, cookie);
            return false;
        }

        ctx.server
            .bucket(self.bucket_index)
            .timings
            .record(opcode as u8, cookie.started.elapsed());

        self.put_cookie(index, cookie);
        self.finish_command(ctx);
        true
    }

    /// A command has produced its response (or decided to send none).
    fn finish_command(&mut self, _ctx: &mut DriveCtx) {
        self.executing = None;
        self.flush_ready_responses();
        self.set_state(State::SendData);
    }

    fn conn_send_data(&mut self, _ctx: &mut DriveCtx) -> bool {
        match self.session.flush() {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => {
                debug!("{}: flush failed: {}", self.id, e);
                self.set_state(State::Closing);
                return true;
            }
        }
        if self.session.send_queue_size() == 0 {
            self.set_state(State::DrainSendBuffer);
            return true;
        }
        // partial write; wait for the socket to become writable again
        false
    }

    fn conn_drain_send_buffer(&mut self) -> bool {
        if self.session.send_queue_size() > 0 {
            match self.session.flush() {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(_) => {
                    self.set_state(State::Closing);
                    return true;
                }
            }
            if self.session.send_queue_size() > 0 {
                return false;
            }
        }
        let next = self.write_and_go;
        self.write_and_go = State::NewCmd;
        self.set_state(next);
        true
    }

    fn conn_ship_log(&mut self, ctx: &mut DriveCtx) -> bool {
        if self.check_bucket_dying(ctx.server) {
            return true;
        }

        // duplex: incoming bytes (acks from the peer) win over shipping
        let _ = self.try_fill_quietly();
        if self.session.read_buffer().len() >= HEADER_LEN {
            if let Ok(header) = PacketHeader::parse(self.session.read_buffer()) {
                if self.session.read_buffer().len() >= header.total_len() {
                    self.set_state(State::ParseCmd);
                    return true;
                }
            } else {
                self.set_state(State::Closing);
                return true;
            }
        }

        let mut dcp = match self.dcp.take() {
            Some(dcp) => dcp,
            None => {
                self.set_state(State::Closing);
                return true;
            }
        };

        let result = {
            let mut producers = McbpDcpProducers::new(
                &mut self.session,
                self.features.contains(Feature::Collections),
            );
            dcp.step(&mut producers)
        };
        self.dcp = Some(dcp);

        match self.remap_error_code(result) {
            Ok(()) => {
                // the engine produced a message to ship
                self.set_state(State::SendData);
                self.write_and_go = State::NewCmd;
                true
            }
            Err(EngineError::WouldBlock) => false,
            Err(e) => {
                warn!(
                    "{}: ship_log - step returned {:?} - closing connection {}",
                    self.id,
                    e,
                    self.description()
                );
                self.set_state(State::Closing);
                true
            }
        }
    }

    fn conn_closing(&mut self, ctx: &mut DriveCtx) -> bool {
        if self.is_provider {
            ctx.server.extauth.remove_provider(self.id);
            self.is_provider = false;
        }
        ctx.server.unsubscribe_ccn(self.id);
        let _ = self.session.shutdown_read();

        if self.has_inflight_cookies() {
            self.set_state(State::PendingClose);
            return false;
        }
        self.set_state(State::ImmediateClose);
        true
    }

    fn conn_pending_close(&mut self) -> bool {
        if self.has_inflight_cookies() {
            return false;
        }
        self.set_state(State::ImmediateClose);
        true
    }

    fn conn_immediate_close(&mut self) -> bool {
        self.cookies.clear();
        self.set_state(State::Destroyed);
        false
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    /// Engine callbacks still outstanding (or cookies reserved by another
    /// party) keep the connection in pending_close.
    fn has_inflight_cookies(&self) -> bool {
        self.cookies
            .iter()
            .any(|c| (c.ewouldblock && !c.response_complete) || c.is_reserved())
    }

    fn executing_index(&self) -> Option<usize> {
        let seq = self.executing?;
        self.cookies.iter().position(|c| c.seq == seq)
    }

    fn take_cookie(&mut self, index: usize) -> Option<Cookie> {
        self.cookies.remove(index)
    }

    fn put_cookie(&mut self, index: usize, cookie: Cookie) {
        let index = std::cmp::min(index, self.cookies.len());
        self.cookies.insert(index, cookie);
    }

    fn drop_cookie(&mut self, index: usize) {
        let _ = self.cookies.remove(index);
        self.executing = None;
    }

    /// Read from the socket; `false` means the connection moved to
    /// closing.
    fn fill_session(&mut self) -> bool {
        match self.session.fill() {
            Ok(0) => {
                trace!("{}: client hangup", self.id);
                self.set_state(State::Closing);
                false
            }
            Ok(_) => {
                self.last_activity = Instant::now();
                true
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => true,
            Err(e) => {
                debug!("{}: read error: {}", self.id, e);
                self.set_state(State::Closing);
                false
            }
        }
    }

    fn try_fill_quietly(&mut self) -> bool {
        match self.session.fill() {
            Ok(0) => {
                self.set_state(State::Closing);
                false
            }
            Ok(_) => {
                self.last_activity = Instant::now();
                true
            }
            Err(_) => true,
        }
    }

    /// Incoming response packets: acks for DCP messages we produced, or
    /// the auth provider answering a server-initiated request.
    fn handle_inbound_response(&mut self, ctx: &mut DriveCtx, index: usize) -> bool {
        let header = self.cookies[index].header();

        if header.magic == Magic::ServerResponse {
            if self.is_provider
                && header.opcode == ServerOpcode::Authenticate as u8
            {
                let value = self.cookies[index].request().value().to_vec();
                ctx.server
                    .extauth
                    .response_received(header.opaque, header.vbucket_or_status, value);
                self.drop_cookie(index);
                self.set_state(State::NewCmd);
                return true;
            }
            warn!("{}: unexpected server response, closing {}", self.id, self.description());
            self.drop_cookie(index);
            self.set_state(State::Closing);
            return true;
        }

        // client response magic: only legal on DCP connections
        if let Some(mut dcp) = self.dcp.take() {
            let response = DcpResponse {
                opcode: header.opcode,
                status: header.vbucket_or_status,
                opaque: header.opaque,
            };
            let result = dcp.response(response);
            self.dcp = Some(dcp);
            self.drop_cookie(index);
            match result {
                Ok(()) => {
                    self.set_state(State::NewCmd);
                    true
                }
                Err(e) => {
                    warn!("{}: dcp response handler failed: {:?}", self.id, e);
                    self.set_state(State::Closing);
                    true
                }
            }
        } else {
            warn!("{}: unexpected response packet, closing {}", self.id, self.description());
            self.drop_cookie(index);
            self.set_state(State::Closing);
            true
        }
    }

    /// Decode framing extras into the cookie. `Err(continue)` means the
    /// state machine already moved; the bool is the step's return value.
    fn apply_frame_infos(
        &mut self,
        ctx: &mut DriveCtx,
        index: usize,
        opcode: Opcode,
    ) -> std::result::Result<(), bool> {
        let request = self.cookies[index].request();
        let framing_extras = request.framing_extras().to_vec();
        if framing_extras.is_empty() {
            return Ok(());
        }

        let mut reorder = false;
        let mut durability = None;
        let mut stream_id = None;
        let mut tracing = None;

        let parse_result = parse_frame_infos(&framing_extras, |info| {
            match info {
                FrameInfo::Reorder => reorder = true,
                FrameInfo::DurabilityRequirement { level, timeout_ms } => {
                    durability = Some(engine::DurabilityRequirement { level, timeout_ms });
                }
                FrameInfo::DcpStreamId(id) => stream_id = Some(id),
                FrameInfo::OpenTracingContext(context) => tracing = Some(context.to_vec()),
            }
            Ok(())
        });

        if let Err(e) = parse_result {
            let status = e.status();
            let close = status != Status::DurabilityInvalidLevel;
            let mut cookie = match self.take_cookie(index) {
                Some(cookie) => cookie,
                None => return Err(false),
            };
            cookie.set_error_context(e.to_string());
            self.send_error(ctx.server, &mut cookie, status);
            self.put_cookie(index, cookie);
            self.executing = None;
            self.flush_ready_responses();
            // a structurally valid frame with a bad durability level is a
            // semantic rejection, not a protocol violation
            self.write_and_go = if close { State::Closing } else { State::NewCmd };
            self.set_state(State::SendData);
            return Err(true);
        }

        if durability.is_some() && !opcode.supports_durability() {
            let mut cookie = match self.take_cookie(index) {
                Some(cookie) => cookie,
                None => return Err(false),
            };
            cookie.set_error_context("The requested command does not support durability requirements");
            self.send_error(ctx.server, &mut cookie, Status::Einval);
            self.put_cookie(index, cookie);
            self.executing = None;
            self.flush_ready_responses();
            self.write_and_go = State::Closing;
            self.set_state(State::SendData);
            return Err(true);
        }

        let cookie = &mut self.cookies[index];
        cookie.reorder = reorder;
        cookie.durability = durability;
        cookie.stream_id = stream_id;
        cookie.tracing_context = tracing;
        Ok(())
    }

    /// Pop one queued server event into the output stream.
    fn process_server_events(&mut self) -> bool {
        if let Some(event) = self.server_events.pop_front() {
            trace!("{}: injecting server event {}", self.id, event.description());
            event.execute(&mut self.session);
            self.write_and_go = State::NewCmd;
            self.set_state(State::SendData);
            return true;
        }
        false
    }

    /// Error-code remapping for clients which have not negotiated
    /// extended error codes: a fixed whitelist passes through, a few codes
    /// degrade to legacy equivalents, everything else becomes a
    /// disconnect.
    pub fn remap_error_code(&self, result: engine::EngineResult<()>) -> engine::EngineResult<()> {
        let code = match result {
            Ok(()) => return Ok(()),
            Err(code) => code,
        };

        if self.xerror_support() {
            return Err(code);
        }

        use EngineError::*;
        match code {
            KeyNotFound | KeyExists | OutOfMemory | NotStored | Invalid | NotSupported
            | WouldBlock | TooBig | Disconnect | NotMyVbucket | TempFail | Erange | Rollback
            | Busy | DeltaBadval | PredicateFailed | Failed => Err(code),
            Locked => Err(KeyExists),
            LockedTmpfail => Err(TempFail),
            UnknownCollection => {
                if self.collections_support() {
                    Err(code)
                } else {
                    Err(Invalid)
                }
            }
            SyncWriteInProgress | SyncWriteReCommitInProgress => Err(TempFail),
            Eaccess | NoBucket | AuthStale | DurabilityInvalidLevel | DurabilityImpossible
            | SyncWriteAmbiguous | DcpStreamIdInvalid | Internal => {
                warn!(
                    "{} - client {} not aware of extended error code ({:?}), disconnecting",
                    self.id,
                    self.description(),
                    code
                );
                Err(Disconnect)
            }
        }
    }

    // ------------------------------------------------------------------
    // responses
    // ------------------------------------------------------------------

    /// Move completed responses into the send pipeline. Responses leave in
    /// cookie-creation order unless every outstanding cookie asked for
    /// reordering, in which case completed cookies flush immediately.
    pub fn flush_ready_responses(&mut self) {
        let all_reorder = !self.cookies.is_empty() && self.cookies.iter().all(|c| c.reorder);

        if all_reorder {
            let mut index = 0;
            while index < self.cookies.len() {
                if self.cookies[index].response_complete {
                    if let Some(cookie) = self.cookies.remove(index) {
                        self.session.put_slice(&cookie.response);
                    }
                } else {
                    index += 1;
                }
            }
        } else {
            while self
                .cookies
                .front()
                .map(|c| c.response_complete)
                .unwrap_or(false)
            {
                if let Some(cookie) = self.cookies.pop_front() {
                    self.session.put_slice(&cookie.response);
                }
            }
        }
    }

    /// A full response with payload sections.
    #[allow(clippy::too_many_arguments)]
    pub fn send_response(
        &mut self,
        server: &ServerContext,
        cookie: &mut Cookie,
        status: Status,
        extras: &[u8],
        key: &[u8],
        value: &[u8],
        datatype: Datatype,
        cas: u64,
    ) {
        let header = cookie.header();
        let message = ResponseMessage {
            opcode: header.opcode,
            status: status as u16,
            datatype,
            opaque: header.opaque,
            cas,
            framing_extras: &[],
            extras,
            key,
            value,
        };
        message.compose(&mut cookie.response);
        cookie.response_complete = true;
        server.bucket(self.bucket_index).count_response(status as u16);
    }

    /// Plain success response with no payload.
    pub fn send_success(&mut self, server: &ServerContext, cookie: &mut Cookie) {
        self.send_response(server, cookie, Status::Success, &[], &[], &[], Datatype::RAW, cookie.cas)
    }

    /// An error response. For clients which negotiated extended errors an
    /// error-info JSON object rides in the value (unless the status keeps
    /// its body for other purposes).
    pub fn send_error(&mut self, server: &ServerContext, cookie: &mut Cookie, status: Status) {
        let (value, datatype) = if self.xerror_support() && !status.suppresses_error_json() {
            match cookie.error_json() {
                Some(json) => (json, Datatype::JSON),
                None => (Vec::new(), Datatype::RAW),
            }
        } else {
            (Vec::new(), Datatype::RAW)
        };
        self.send_response(server, cookie, status, &[], &[], &value, datatype, 0);
    }

    /// Map and send an engine status. Returns false when the mapped code
    /// demands a disconnect instead of a response.
    pub fn send_engine_error(
        &mut self,
        server: &ServerContext,
        cookie: &mut Cookie,
        error: EngineError,
    ) -> bool {
        match self.remap_error_code(Err(error)) {
            Ok(()) => true,
            Err(EngineError::Disconnect) => {
                self.disconnect = true;
                false
            }
            Err(EngineError::NotMyVbucket) => {
                self.send_not_my_vbucket(server, cookie);
                true
            }
            Err(code) => {
                self.send_error(server, cookie, status_for_engine_error(code));
                true
            }
        }
    }

    /// Not-my-vbucket with the deduplicated cluster map body: the map is
    /// only attached when this connection has not seen the current
    /// revision yet.
    pub fn send_not_my_vbucket(&mut self, server: &ServerContext, cookie: &mut Cookie) {
        let (revision, payload) = server.cluster.get();

        let dedup = revision != crate::cluster::CLUSTER_MAP_NO_REVISION
            && self.last_seen_clustermap_rev == revision;

        if dedup || payload.is_empty() {
            self.send_response(
                server,
                cookie,
                Status::NotMyVbucket,
                &[],
                &[],
                &[],
                Datatype::RAW,
                0,
            );
        } else {
            self.last_seen_clustermap_rev = revision;
            let value = payload.to_vec();
            self.send_response(
                server,
                cookie,
                Status::NotMyVbucket,
                &[],
                &[],
                &value,
                Datatype::JSON,
                0,
            );
        }
    }

    /// Emergency error path used before a cookie exists (malformed
    /// header): compose straight into the session.
    fn send_raw_error(&mut self, opcode: u8, status: Status, opaque: u32) {
        let message = ResponseMessage {
            opcode,
            status: status as u16,
            opaque,
            ..Default::default()
        };
        message.compose(&mut self.session);
    }

    /// Read-only JSON dump of the connection state for diagnostics.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "peer": self.peer,
            "local": self.local,
            "state": self.state.name(),
            "user": self.auth.username(),
            "bucket_index": self.bucket_index,
            "dcp": self.is_dcp(),
            "provider": self.is_provider,
            "features": self.features.iter().map(|f| format!("{}", f)).collect::<Vec<_>>(),
            "send_queue": self.session.send_queue_size(),
            "cookies": self.cookies.iter().map(|c| c.to_json()).collect::<Vec<_>>(),
            "age_seconds": self.created.elapsed().as_secs(),
        })
    }
}

fn raw_opaque(buf: &[u8]) -> u32 {
    if buf.len() >= 16 {
        u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]])
    } else {
        0
    }
}
