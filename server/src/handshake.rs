//! Credential exchange that turns a raw connection into a registered session

use axum::extract::ws::Message;
use futures::{Stream, StreamExt};
use parlor_shared::payloads::{LoginRequest, LoginResponse, SystemMessagePush, PUSH_SYSTEM_MESSAGE};
use parlor_shared::{unix_millis, verify_password, Codec, Envelope, Frame, Permission, Profile};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::session::{ConnectionHandle, Session};
use crate::websocket::ServerState;

/// Why a connection never became a session
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("connection closed before login")]
    Closed,
    #[error("transport error during login: {0}")]
    Transport(String),
    #[error("no successful login within the auth timeout")]
    TimedOut,
    #[error("too many failed login attempts")]
    TooManyAttempts,
}

/// Progress of a single connection through the handshake
#[derive(Debug)]
enum HandshakeState {
    AwaitingCredentials,
    Verifying(LoginRequest, Codec),
    Admitted(Arc<Session>),
    Rejected(String, Codec),
}

/// Read credential frames until one is accepted.
///
/// Each rejected frame earns a failure reply and counts as one attempt. The
/// whole exchange, store lookups included, is bounded by the configured auth
/// timeout and attempt count. On success the session is registered and any previous session of
/// the same user is evicted.
pub async fn authenticate<S>(
    frames: &mut S,
    handle: &ConnectionHandle,
    state: &ServerState,
) -> Result<Arc<Session>, HandshakeError>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let deadline = tokio::time::Instant::now() + state.config.auth_timeout();
    let mut attempts = 0u32;
    let mut current = HandshakeState::AwaitingCredentials;

    loop {
        current = match current {
            HandshakeState::AwaitingCredentials => {
                let next = tokio::time::timeout_at(deadline, frames.next())
                    .await
                    .map_err(|_| HandshakeError::TimedOut)?;
                match next {
                    Some(Ok(Message::Text(text))) => examine(Frame::Text(text), state),
                    Some(Ok(Message::Binary(data))) => examine(Frame::Binary(data), state),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        HandshakeState::AwaitingCredentials
                    }
                    Some(Ok(Message::Close(_))) | None => return Err(HandshakeError::Closed),
                    Some(Err(e)) => return Err(HandshakeError::Transport(e.to_string())),
                }
            }

            HandshakeState::Verifying(request, codec) => {
                let verified = tokio::time::timeout_at(deadline, verify(&request, state))
                    .await
                    .map_err(|_| HandshakeError::TimedOut)?;
                match verified {
                    Ok(profile) => {
                        let session = Arc::new(Session::new(
                            profile.clone(),
                            codec,
                            handle.clone(),
                            state.config.write_timeout(),
                        ));
                        let response = LoginResponse {
                            state: true,
                            message: "Login successful".into(),
                            profile: Some(profile),
                        };
                        reply(handle, codec, &state.config.commands.login, &response).await;
                        HandshakeState::Admitted(session)
                    }
                    Err(reason) => HandshakeState::Rejected(reason, codec),
                }
            }

            HandshakeState::Admitted(session) => {
                if let Some(existing) = state.registry.lookup(session.user_id()) {
                    notify_evicted(&existing);
                }
                if let Some(old) = state.registry.register(session.clone()) {
                    info!(
                        "User {} logged in again; evicted connection {}",
                        session.user_id(),
                        old.connection_id()
                    );
                }
                info!("User {} authenticated ({:?})", session.user_id(), session.codec());
                return Ok(session);
            }

            HandshakeState::Rejected(reason, codec) => {
                attempts += 1;
                debug!("Login attempt {} rejected: {}", attempts, reason);
                let response = LoginResponse {
                    state: false,
                    message: reason,
                    profile: None,
                };
                reply(handle, codec, &state.config.commands.login, &response).await;
                if attempts >= state.config.max_auth_attempts {
                    return Err(HandshakeError::TooManyAttempts);
                }
                HandshakeState::AwaitingCredentials
            }
        };
    }
}

fn examine(frame: Frame, state: &ServerState) -> HandshakeState {
    match parse_credentials(&frame, &state.config.commands.login) {
        Some((request, codec)) => HandshakeState::Verifying(request, codec),
        None => HandshakeState::Rejected("Malformed login request".into(), codec_of(&frame)),
    }
}

fn codec_of(frame: &Frame) -> Codec {
    match frame {
        Frame::Text(_) => Codec::Json,
        Frame::Binary(_) => Codec::MessagePack,
    }
}

/// Accept either a bare `{userId, password}` object or one wrapped in an
/// envelope under the login command token.
fn parse_credentials(frame: &Frame, login_token: &str) -> Option<(LoginRequest, Codec)> {
    if let Ok((envelope, codec)) = Codec::decode::<Envelope>(frame) {
        if envelope.command != login_token {
            return None;
        }
        return envelope.payload::<LoginRequest>().ok().map(|req| (req, codec));
    }
    Codec::decode::<LoginRequest>(frame).ok()
}

/// Check the credentials against the store. The error is the reason sent
/// back to the client.
async fn verify(request: &LoginRequest, state: &ServerState) -> Result<Profile, String> {
    const INVALID: &str = "Invalid user id or password";

    if request.user_id <= 0 || request.password.is_empty() {
        return Err(INVALID.into());
    }

    let (hash, salt) = match state.store.fetch_password_hash(request.user_id).await {
        Ok(Some(stored)) => stored,
        Ok(None) => return Err(INVALID.into()),
        Err(e) => {
            warn!("Credential lookup for user {} failed: {}", request.user_id, e);
            return Err("Login unavailable, try again later".into());
        }
    };

    if !verify_password(&request.password, &salt, &hash) {
        return Err(INVALID.into());
    }

    let profile = match state.store.fetch_profile(request.user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return Err(INVALID.into()),
        Err(e) => {
            warn!("Profile load for user {} failed: {}", request.user_id, e);
            return Err("Login unavailable, try again later".into());
        }
    };

    if profile.user_permission == Permission::Banned {
        return Err("banned".into());
    }

    Ok(profile)
}

/// Tell a session it is about to be replaced. Best effort: the notice is
/// flushed with whatever else is queued when the session closes.
fn notify_evicted(session: &Session) {
    let notice = SystemMessagePush {
        message_body: "Logged in from another connection".into(),
        time: unix_millis(),
    };
    if let Ok(envelope) = Envelope::new(PUSH_SYSTEM_MESSAGE, &notice) {
        let _ = session.try_send(&envelope);
    }
}

async fn reply(handle: &ConnectionHandle, codec: Codec, token: &str, response: &LoginResponse) {
    let frame = Envelope::new(token, response).and_then(|env| codec.encode(&env));
    match frame {
        Ok(frame) => {
            if handle.outbound.send(frame.into()).await.is_err() {
                debug!("Login reply dropped: writer gone");
            }
        }
        Err(e) => warn!("Failed to encode login reply: {}", e),
    }
}
