// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! SASL authentication. PLAIN is validated against the local user
//! database; users in the external domain round-trip through the
//! authentication provider, with the originating command suspended until
//! the provider answers (or the bridge synthesizes a failure).

use crate::auth;
use crate::connection::AuthState;
use crate::dispatch::{drive_steppable, ExecCtx};
use crate::extauth::{AuthReplySlot, AuthRequest, ProviderHandle};
use crate::privileges::AuthFailure;
use crate::Cookie;
use engine::EngineError;
use protocol_mcbp::{Datatype, Feature, Status};
use std::sync::{Arc, Mutex};

const MECHANISMS: &str = "PLAIN";

pub(crate) fn list_mechs(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    ctx.conn.send_response(
        ctx.server,
        cookie,
        Status::Success,
        &[],
        &[],
        MECHANISMS.as_bytes(),
        Datatype::RAW,
        0,
    );
}

/// Context for a SASL exchange relayed to the external provider.
struct ExternalAuthContext {
    username: String,
    reply: Arc<AuthReplySlot>,
}

pub(crate) fn auth(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    sasl_exchange(ctx, cookie, false)
}

pub(crate) fn step(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    sasl_exchange(ctx, cookie, true)
}

fn sasl_exchange(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie, step: bool) {
    drive_steppable(ctx, cookie, |ctx, cookie| {
        // resuming after the external provider answered?
        if let Some(context) = cookie.take_context::<ExternalAuthContext>() {
            return complete_external(ctx, cookie, context);
        }

        let request = cookie.request();
        let mechanism = String::from_utf8_lossy(request.key()).to_string();
        if !mechanism.eq_ignore_ascii_case("PLAIN") {
            cookie.set_error_context("mechanism not supported");
            ctx.conn.send_error(ctx.server, cookie, Status::AuthError);
            return Ok(());
        }

        let challenge = request.value().to_vec();
        let (user, password) = match parse_plain(&challenge) {
            Some(parts) => parts,
            None => {
                cookie.set_error_context("invalid PLAIN payload");
                ctx.conn.send_error(ctx.server, cookie, Status::Einval);
                return Ok(());
            }
        };

        match ctx.server.privileges.authenticate(&user, &password) {
            Ok(_) => {
                if let AuthState::External(old) = &ctx.conn.auth {
                    ctx.server.extauth.logoff(old);
                }
                ctx.conn.auth = AuthState::Local(user.clone());
                auth::rebuild_context(ctx.server, ctx.conn);
                info!("{}: authenticated as {}", ctx.conn.id, user);
                ctx.conn.send_response(
                    ctx.server,
                    cookie,
                    Status::Success,
                    &[],
                    &[],
                    b"Authenticated",
                    Datatype::RAW,
                    0,
                )
            }
            Err(AuthFailure::BadPassword) => {
                info!(
                    target: "audit",
                    "{}",
                    serde_json::json!({
                        "event": "auth_failure",
                        "connection": ctx.conn.id,
                        "user": user,
                    })
                );
                cookie.ensure_event_id();
                ctx.conn.send_error(ctx.server, cookie, Status::AuthError)
            }
            Err(AuthFailure::UnknownUser) | Err(AuthFailure::WrongDomain) => {
                if !ctx.server.extauth.has_provider() {
                    cookie.ensure_event_id();
                    ctx.conn.send_error(ctx.server, cookie, Status::AuthError);
                    return Ok(());
                }

                // relay to the provider and suspend this command
                let reply = Arc::new(AuthReplySlot {
                    result: Mutex::new(None),
                    notifier: ctx.cookie_io(cookie),
                });
                ctx.server.extauth.enqueue_request(AuthRequest {
                    username: user.clone(),
                    mechanism,
                    challenge,
                    step,
                    reply: reply.clone(),
                });
                cookie.store_context(ExternalAuthContext { username: user, reply });
                return Err(EngineError::WouldBlock);
            }
        }
        Ok(())
    })
}

fn complete_external(
    ctx: &mut ExecCtx<'_>,
    cookie: &mut Cookie,
    context: ExternalAuthContext,
) -> engine::EngineResult<()> {
    let result = context
        .reply
        .result
        .lock()
        .ok()
        .and_then(|mut slot| slot.take());

    let result = match result {
        Some(result) => result,
        None => {
            // resumed without a response; the provider vanished
            cookie.set_error_context("external authentication service failure");
            ctx.conn.send_error(ctx.server, cookie, Status::Einternal);
            return Ok(());
        }
    };

    match Status::try_from(result.status) {
        Ok(Status::Success) => {
            if let AuthState::External(old) = &ctx.conn.auth {
                ctx.server.extauth.logoff(old);
            }
            ctx.conn.auth = AuthState::External(context.username.clone());
            ctx.server.extauth.login(&context.username);
            auth::rebuild_context(ctx.server, ctx.conn);
            info!("{}: externally authenticated as {}", ctx.conn.id, context.username);
            ctx.conn.send_response(
                ctx.server,
                cookie,
                Status::Success,
                &[],
                &[],
                b"Authenticated",
                Datatype::RAW,
                0,
            );
        }
        Ok(Status::AuthContinue) => {
            ctx.conn.send_response(
                ctx.server,
                cookie,
                Status::AuthContinue,
                &[],
                &[],
                &result.payload,
                Datatype::RAW,
                0,
            );
        }
        _ => {
            cookie.ensure_event_id();
            if !result.payload.is_empty() {
                cookie.set_error_context(String::from_utf8_lossy(&result.payload).to_string());
            }
            ctx.conn.send_error(ctx.server, cookie, Status::AuthError);
        }
    }
    Ok(())
}

/// Register this connection as the external authentication provider.
pub(crate) fn auth_provider(ctx: &mut ExecCtx<'_>, cookie: &mut Cookie) {
    if !ctx.conn.features.contains(Feature::Duplex) {
        cookie.set_error_context("duplex must be negotiated to be a provider");
        ctx.conn.send_error(ctx.server, cookie, Status::Einval);
        return;
    }
    if !ctx.conn.auth.is_authenticated() {
        cookie.set_error_context("must be authenticated to be a provider");
        ctx.conn.send_error(ctx.server, cookie, Status::AuthError);
        return;
    }

    ctx.server.extauth.add_provider(ProviderHandle {
        worker: ctx.worker.clone(),
        token: ctx.token,
        conn_id: ctx.conn.id,
    });
    ctx.conn.is_provider = true;
    info!("{}: registered as authentication provider", ctx.conn.id);
    ctx.conn.send_success(ctx.server, cookie);
}

/// PLAIN: `authzid \0 authcid \0 passwd`.
fn parse_plain(challenge: &[u8]) -> Option<(String, String)> {
    let mut parts = challenge.splitn(3, |b| *b == 0);
    let _authzid = parts.next()?;
    let user = parts.next()?;
    let password = parts.next()?;
    Some((
        String::from_utf8(user.to_vec()).ok()?,
        String::from_utf8(password.to_vec()).ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_parsing() {
        assert_eq!(
            parse_plain(b"\0user\0password"),
            Some(("user".to_string(), "password".to_string()))
        );
        assert_eq!(
            parse_plain(b"authz\0user\0"),
            Some(("user".to_string(), "".to_string()))
        );
        assert_eq!(parse_plain(b"no-separators"), None);
        // embedded NULs beyond the second separator belong to the password
        assert_eq!(
            parse_plain(b"\0u\0p\0q"),
            Some(("u".to_string(), "p\0q".to_string()))
        );
    }
}
