//! Stateful control-protocol session.
//!
//! A [`ControlSession`] owns at most one socket. It walks
//! `Disconnected -> Connecting -> Handshaking -> Ready` on [`ControlSession::connect`]
//! and falls back to `Disconnected` on any failure; retrying is left to the caller.
//! [`ControlSession::call`] takes `&mut self`, so only one request can be in flight.

use futures_util::{FutureExt, SinkExt, StreamExt};
use serde_json::Value;
use sha2::{Digest, Sha256};
use stagehand_core::control_proto::{
    decode_frame, encode_frame, Announce, ControlMsg, RequestFrame, RequestType,
    DEFAULT_MAX_FRAME_BYTES, RPC_VERSION, STATUS_RESOURCE_ALREADY_EXISTS,
};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);
const REQUEST_ID_PREFIX: &str = "stagehand";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub url: Url,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub request_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl SessionConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            password: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Closing,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Handshaking => "handshaking",
            SessionState::Ready => "ready",
            SessionState::Closing => "closing",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to bring a session to `Ready`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("connect to {url} failed: {reason}")]
    Connect { url: String, reason: String },
    #[error("connect to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("protocol version mismatch: expected {expected}, server speaks {actual}")]
    VersionMismatch { expected: u32, actual: u32 },
    #[error("server requires authentication but no password is configured")]
    AuthRequired,
}

/// Failure of a single `call`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("session not ready (state={0})")]
    NotReady(SessionState),
    #[error("{request_type} timed out after {timeout:?}")]
    Timeout {
        request_type: RequestType,
        timeout: Duration,
    },
    #[error("connection lost: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("{request_type} rejected (code {code}): {comment}")]
    Rejected {
        request_type: RequestType,
        code: i64,
        comment: String,
    },
    #[error("request encode failed: {0}")]
    Encode(String),
    #[error("unexpected response to {request_type}: {detail}")]
    UnexpectedResponse {
        request_type: RequestType,
        detail: String,
    },
}

impl RequestError {
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            RequestError::Rejected { code, .. } if *code == STATUS_RESOURCE_ALREADY_EXISTS
        )
    }

    /// Transport and framing failures leave the socket in an unknown position.
    pub fn resets_session(&self) -> bool {
        matches!(self, RequestError::Connection(_) | RequestError::Protocol(_))
    }
}

/// Shared-secret digest: `base64(sha256(base64(sha256(password + salt)) + challenge))`.
pub fn auth_response(password: &str, salt: &str, challenge: &str) -> String {
    let secret = base64::encode(Sha256::digest(format!("{password}{salt}").as_bytes()));
    base64::encode(Sha256::digest(format!("{secret}{challenge}").as_bytes()))
}

pub struct ControlSession {
    config: SessionConfig,
    state: SessionState,
    socket: Option<Socket>,
    next_request_id: u64,
    server_version: Option<String>,
}

impl ControlSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: SessionState::Disconnected,
            socket: None,
            next_request_id: 0,
            server_version: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.is_ready() {
            return Ok(());
        }
        self.drop_socket().await;
        self.state = SessionState::Connecting;
        let url = self.config.url.to_string();
        let mut socket = match timeout(self.config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((socket, _))) => socket,
            Ok(Err(err)) => {
                self.state = SessionState::Disconnected;
                return Err(SessionError::Connect {
                    url,
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                self.state = SessionState::Disconnected;
                return Err(SessionError::ConnectTimeout {
                    url,
                    timeout: self.config.connect_timeout,
                });
            }
        };

        self.state = SessionState::Handshaking;
        let outcome = timeout(
            self.config.handshake_timeout,
            handshake(&mut socket, &self.config),
        )
        .await;
        match outcome {
            Ok(Ok(server_version)) => {
                info!(
                    "obs_connected: url={} server_version={}",
                    url,
                    server_version.as_deref().unwrap_or("unknown")
                );
                self.server_version = server_version;
                self.socket = Some(socket);
                self.next_request_id = 0;
                self.state = SessionState::Ready;
                Ok(())
            }
            Ok(Err(err)) => {
                close_socket(socket).await;
                self.state = SessionState::Disconnected;
                Err(err)
            }
            Err(_) => {
                close_socket(socket).await;
                self.state = SessionState::Disconnected;
                Err(SessionError::HandshakeTimeout(self.config.handshake_timeout))
            }
        }
    }

    /// Sends one request and waits for its response.
    ///
    /// A timeout leaves the session `Ready`; a later reply to the abandoned id is
    /// skipped by the next call. Transport and framing failures reset the session.
    pub async fn call(
        &mut self,
        request_type: RequestType,
        request_data: Option<Value>,
    ) -> Result<Value, RequestError> {
        if self.state != SessionState::Ready {
            return Err(RequestError::NotReady(self.state));
        }
        let Some(socket) = self.socket.as_mut() else {
            self.state = SessionState::Disconnected;
            return Err(RequestError::NotReady(self.state));
        };
        self.next_request_id += 1;
        let request_id = format!("{REQUEST_ID_PREFIX}-{}", self.next_request_id);
        let max_frame_bytes = self.config.max_frame_bytes;
        let request_timeout = self.config.request_timeout;
        debug!("obs_request: id={request_id} type={request_type}");

        let exchange = exchange(
            socket,
            request_type,
            &request_id,
            request_data,
            max_frame_bytes,
        );
        let outcome = match timeout(request_timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RequestError::Timeout {
                request_type,
                timeout: request_timeout,
            }),
        };
        if let Err(err) = &outcome {
            if err.resets_session() {
                warn!("obs_session_reset: id={request_id} {err}");
                self.drop_socket().await;
                self.state = SessionState::Disconnected;
            }
        }
        outcome
    }

    /// Drains frames that arrived between calls without waiting, so a peer that
    /// went away is noticed even when no request is due.
    pub async fn check_alive(&mut self) -> bool {
        if !self.is_ready() {
            return false;
        }
        let Some(socket) = self.socket.as_mut() else {
            self.state = SessionState::Disconnected;
            return false;
        };
        let lost = loop {
            match socket.next().now_or_never() {
                None => break None,
                Some(None) | Some(Some(Ok(Message::Close(_)))) => {
                    break Some("socket closed by peer".to_string())
                }
                Some(Some(Err(err))) => break Some(err.to_string()),
                Some(Some(Ok(_))) => {}
            }
        };
        match lost {
            Some(reason) => {
                warn!("obs_session_lost: {reason}");
                self.drop_socket().await;
                self.state = SessionState::Disconnected;
                false
            }
            None => true,
        }
    }

    /// Releases the socket. Safe to call in any state, any number of times.
    pub async fn close(&mut self) {
        if self.state == SessionState::Disconnected && self.socket.is_none() {
            return;
        }
        self.state = SessionState::Closing;
        self.drop_socket().await;
        self.state = SessionState::Disconnected;
        info!("obs_closed: url={}", self.config.url);
    }

    async fn drop_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            close_socket(socket).await;
        }
    }
}

/// The server greets first; the client answers with a single announcement that
/// carries the auth digest when the greeting holds a challenge.
async fn handshake(socket: &mut Socket, config: &SessionConfig) -> Result<Option<String>, SessionError> {
    let max = config.max_frame_bytes;
    let hello = loop {
        match next_msg(socket, max)
            .await
            .map_err(|err| SessionError::Handshake(err.to_string()))?
        {
            ControlMsg::HelloAck(hello) => break hello,
            other => debug!("obs_handshake_skip: op={}", other.opcode().as_u8()),
        }
    };
    if hello.rpc_version != RPC_VERSION {
        return Err(SessionError::VersionMismatch {
            expected: RPC_VERSION,
            actual: hello.rpc_version,
        });
    }

    let authentication = match &hello.authentication {
        Some(challenge) => {
            let password = config
                .password
                .as_deref()
                .ok_or(SessionError::AuthRequired)?;
            Some(auth_response(password, &challenge.salt, &challenge.challenge))
        }
        None => None,
    };
    let authenticating = authentication.is_some();
    let announce = Announce {
        rpc_version: RPC_VERSION,
        authentication,
        event_subscriptions: Some(0),
    };
    send_msg(socket, ControlMsg::Announce(announce), max)
        .await
        .map_err(|err| SessionError::Handshake(err.to_string()))?;

    loop {
        match next_msg(socket, max).await {
            Ok(ControlMsg::Identified(_)) => break,
            Ok(other) => debug!("obs_handshake_skip: op={}", other.opcode().as_u8()),
            Err(err) if authenticating => {
                return Err(SessionError::Handshake(format!(
                    "authentication rejected: {err}"
                )))
            }
            Err(err) => return Err(SessionError::Handshake(err.to_string())),
        }
    }
    Ok(hello.server_version)
}

async fn exchange(
    socket: &mut Socket,
    request_type: RequestType,
    request_id: &str,
    request_data: Option<Value>,
    max_frame_bytes: usize,
) -> Result<Value, RequestError> {
    let frame = RequestFrame {
        request_type: request_type.to_string(),
        request_id: request_id.to_string(),
        request_data,
    };
    send_msg(socket, ControlMsg::Request(frame), max_frame_bytes).await?;
    loop {
        match next_msg(socket, max_frame_bytes).await? {
            ControlMsg::Response(response) if response.request_id == request_id => {
                let status = response.request_status;
                if !status.result {
                    return Err(RequestError::Rejected {
                        request_type,
                        code: status.code,
                        comment: status.comment.unwrap_or_default(),
                    });
                }
                return Ok(response.response_data.unwrap_or(Value::Null));
            }
            ControlMsg::Response(response) => {
                debug!(
                    "obs_stale_response: id={} expected={request_id}",
                    response.request_id
                );
            }
            other => debug!("obs_frame_skipped: op={}", other.opcode().as_u8()),
        }
    }
}

async fn send_msg(socket: &mut Socket, msg: ControlMsg, max_frame_bytes: usize) -> Result<(), RequestError> {
    let text =
        encode_frame(msg, max_frame_bytes).map_err(|err| RequestError::Encode(err.to_string()))?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|err| RequestError::Connection(err.to_string()))
}

async fn next_msg(socket: &mut Socket, max_frame_bytes: usize) -> Result<ControlMsg, RequestError> {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => {
                return decode_frame(&text, max_frame_bytes)
                    .map_err(|err| RequestError::Protocol(err.to_string()));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(RequestError::Connection("socket closed by peer".to_string()));
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(RequestError::Connection(err.to_string())),
        }
    }
}

async fn close_socket(mut socket: Socket) {
    let _ = timeout(CLOSE_TIMEOUT, socket.close(None)).await;
}
