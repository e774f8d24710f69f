//! Discord gateway transport over WebSocket.
//!
//! # Protocol
//!
//! 1. Discover the gateway URL with `GET {api_base}/gateway`, unless a fixed
//!    URL is configured. Discovery failures fall back to
//!    [`DEFAULT_GATEWAY_URL`].
//! 2. Connect and wait for Hello (op 10), which carries the heartbeat period.
//! 3. Send Identify (op 2) and wait for the `READY` dispatch, whose `user` is
//!    the watcher's own identity.
//! 4. Heartbeat (op 1) every period, the first beat after a random fraction
//!    of it. If the previous beat was not acknowledged (op 11) by the time the
//!    next one is due, the connection is considered dead. Frames that have
//!    already arrived are searched for the ACK first, so time the caller
//!    spends between `next_event` calls never counts against the server.
//!
//! Heartbeats are sent from inside [`Transport::next_event`] while it waits
//! for frames, so the socket has a single owner and no background task.
//!
//! Reconnect (op 7), Invalid Session (op 9) and close frames end the session
//! with a fatal error. Resuming is left to whoever restarts the process.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{FutureExt, SinkExt, StreamExt};
use rand::Rng;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use super::payload::{
    heartbeat_frame, identify_frame, Channel, GatewayPayload, GuildCreate, Hello, MessageCreate,
    Ready, OP_DISPATCH, OP_HEARTBEAT, OP_HEARTBEAT_ACK, OP_HELLO, OP_INVALID_SESSION,
    OP_RECONNECT,
};
use super::{Transport, TransportError};
use crate::config::{Config, DEFAULT_API_BASE};
use crate::credential::Credential;
use crate::types::{Event, Identity};

/// Gateway used when discovery fails.
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";

/// Query selecting API version and encoding.
const GATEWAY_QUERY: &str = "/?v=10&encoding=json";

/// Close code sent by the gateway for a rejected token.
const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

/// Timeout for the discovery request.
const DISCOVERY_TIMEOUT_SECS: u64 = 10;

/// Time allowed from socket open to `READY`.
const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Where to find the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Fixed gateway URL; skips discovery when set.
    pub gateway_url: Option<String>,

    /// REST API base used for discovery.
    pub api_base: String,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            gateway_url: None,
            api_base: api_base.into(),
        }
    }

    #[must_use]
    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl From<&Config> for GatewayConfig {
    fn from(config: &Config) -> Self {
        Self {
            gateway_url: config.gateway_url.clone(),
            api_base: config.api_base.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GatewayInfo {
    url: String,
}

/// [`Transport`] backed by the Discord gateway.
pub struct GatewayTransport {
    config: GatewayConfig,
    client: Client,
    session: Option<Session>,
    /// URL returned by the last successful discovery.
    discovered_url: Option<String>,
    /// Guild channel names by channel id, filled from dispatches.
    channel_names: HashMap<String, String>,
}

impl GatewayTransport {
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            session: None,
            discovered_url: None,
            channel_names: HashMap::new(),
        }
    }

    /// Returns true while a session is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Resolves the gateway base URL, without query string.
    ///
    /// A successful discovery is remembered; failures are retried on the
    /// next call.
    pub async fn gateway_url(&mut self) -> String {
        if let Some(url) = &self.config.gateway_url {
            return url.trim_end_matches('/').to_string();
        }
        if let Some(url) = &self.discovered_url {
            return url.clone();
        }

        let endpoint = format!("{}/gateway", self.config.api_base);
        let response = self
            .client
            .get(&endpoint)
            .timeout(Duration::from_secs(DISCOVERY_TIMEOUT_SECS))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        let info = match response {
            Ok(response) => response.json::<GatewayInfo>().await,
            Err(e) => Err(e),
        };

        match info {
            Ok(info) => {
                debug!(url = %info.url, "Discovered gateway URL");
                let url = info.url.trim_end_matches('/').to_string();
                self.discovered_url = Some(url.clone());
                url
            }
            Err(e) => {
                warn!(
                    endpoint = %endpoint,
                    error = %e,
                    "Gateway discovery failed, using default"
                );
                DEFAULT_GATEWAY_URL.to_string()
            }
        }
    }

    async fn handshake(
        &mut self,
        mut socket: Socket,
        credential: &Credential,
    ) -> Result<(Session, Identity), TransportError> {
        let hello = read_hello(&mut socket).await?;
        if hello.heartbeat_interval == 0 {
            return Err(TransportError::Handshake(
                "hello carried a zero heartbeat interval".to_string(),
            ));
        }

        let mut session = Session::new(socket, Duration::from_millis(hello.heartbeat_interval));
        session.send(identify_frame(credential.token())).await?;
        debug!(heartbeat_ms = hello.heartbeat_interval, "Sent identify");

        loop {
            let payload = match session.next_payload().await {
                Ok(payload) => payload,
                Err(e) if !e.is_fatal() => {
                    warn!(error = %e, "Ignoring malformed frame during handshake");
                    continue;
                }
                Err(e) => return Err(e),
            };

            match payload.op {
                OP_DISPATCH if payload.t.as_deref() == Some("READY") => {
                    let ready: Ready = serde_json::from_value(payload.d)
                        .map_err(|e| TransportError::Handshake(format!("invalid READY: {e}")))?;
                    debug!(session_id = ?ready.session_id, "Gateway session ready");
                    return Ok((session, ready.user.into_identity()));
                }
                OP_DISPATCH => {
                    if let Some(kind) = payload.t.as_deref() {
                        update_channel_names(&mut self.channel_names, kind, payload.d);
                    }
                }
                OP_INVALID_SESSION => return Err(TransportError::SessionInvalidated),
                OP_RECONNECT => return Err(TransportError::ReconnectRequested),
                op => trace!(op, "Ignoring opcode during handshake"),
            }
        }
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn connect(&mut self, credential: &Credential) -> Result<Identity, TransportError> {
        let url = format!("{}{GATEWAY_QUERY}", self.gateway_url().await);
        info!(url = %url, "Connecting to gateway");

        let (socket, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let handshake = timeout(
            Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
            self.handshake(socket, credential),
        )
        .await
        .map_err(|_| TransportError::Handshake("timed out waiting for READY".to_string()))?;

        let (session, identity) = handshake?;
        self.session = Some(session);
        Ok(identity)
    }

    async fn next_event(&mut self) -> Result<Option<Event>, TransportError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(None);
        };

        loop {
            let payload = session.next_payload().await?;

            match payload.op {
                OP_DISPATCH => match payload.t.as_deref() {
                    Some("MESSAGE_CREATE") => {
                        let message = serde_json::from_value::<MessageCreate>(payload.d).map_err(
                            |e| TransportError::Malformed {
                                kind: "MESSAGE_CREATE".to_string(),
                                message: e.to_string(),
                            },
                        )?;
                        return Ok(Some(message.into_event(&self.channel_names)));
                    }
                    Some(kind) => update_channel_names(&mut self.channel_names, kind, payload.d),
                    None => {}
                },
                OP_RECONNECT => return Err(TransportError::ReconnectRequested),
                OP_INVALID_SESSION => return Err(TransportError::SessionInvalidated),
                op => trace!(op, "Ignoring gateway opcode"),
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.socket.close(None).await {
                debug!(error = %e, "Error while closing gateway socket");
            }
            info!("Gateway connection closed");
        }
    }
}

type Frame = Option<Result<Message, tokio_tungstenite::tungstenite::Error>>;

/// Live socket plus heartbeat bookkeeping.
struct Session {
    socket: Socket,
    heartbeat: Interval,
    awaiting_ack: bool,
    sequence: Option<u64>,
    /// Frames read ahead while looking for a heartbeat ACK.
    read_ahead: VecDeque<Frame>,
}

enum Step {
    Beat,
    Frame(Frame),
}

impl Session {
    fn new(socket: Socket, period: Duration) -> Self {
        let jitter: f64 = rand::rng().random();
        let mut heartbeat = interval_at(Instant::now() + period.mul_f64(jitter), period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            socket,
            heartbeat,
            awaiting_ack: false,
            sequence: None,
            read_ahead: VecDeque::new(),
        }
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.socket
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
        trace!(sequence = ?self.sequence, "Sending heartbeat");
        self.send(heartbeat_frame(self.sequence)).await
    }

    /// Moves every frame that is already readable into `read_ahead`.
    ///
    /// ACKs are applied and dropped. Sequence numbers are tracked so the next
    /// heartbeat carries the latest one. Stops at the end of the stream or the
    /// first error, which stay queued for `next_payload` to report.
    fn read_ready_frames(&mut self) {
        while let Some(frame) = self.socket.next().now_or_never() {
            let stop = !matches!(frame, Some(Ok(_)));

            if let Some(Ok(Message::Text(text))) = &frame {
                if let Ok(payload) = serde_json::from_str::<GatewayPayload>(text) {
                    if let Some(sequence) = payload.s {
                        self.sequence = Some(sequence);
                    }
                    if payload.op == OP_HEARTBEAT_ACK {
                        self.awaiting_ack = false;
                        continue;
                    }
                }
            }

            self.read_ahead.push_back(frame);
            if stop {
                break;
            }
        }
    }

    /// Reads frames until one needs the caller's attention.
    ///
    /// Heartbeat requests and acknowledgements are handled here and never
    /// returned.
    async fn next_payload(&mut self) -> Result<GatewayPayload, TransportError> {
        loop {
            let step = match self.read_ahead.pop_front() {
                Some(frame) => Step::Frame(frame),
                None => tokio::select! {
                    _ = self.heartbeat.tick() => Step::Beat,
                    frame = self.socket.next() => Step::Frame(frame),
                },
            };

            let message = match step {
                Step::Beat => {
                    if self.awaiting_ack {
                        self.read_ready_frames();
                    }
                    if self.awaiting_ack {
                        return Err(TransportError::HeartbeatTimeout);
                    }
                    self.send_heartbeat().await?;
                    self.awaiting_ack = true;
                    continue;
                }
                Step::Frame(None) => {
                    return Err(TransportError::Network("gateway stream ended".to_string()))
                }
                Step::Frame(Some(Err(e))) => return Err(TransportError::Network(e.to_string())),
                Step::Frame(Some(Ok(message))) => message,
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(frame) => return Err(close_error(frame)),
                _ => continue,
            };

            let payload: GatewayPayload =
                serde_json::from_str(&text).map_err(|e| TransportError::Malformed {
                    kind: "gateway frame".to_string(),
                    message: e.to_string(),
                })?;

            if let Some(sequence) = payload.s {
                self.sequence = Some(sequence);
            }

            match payload.op {
                // Answered out of band; only scheduled beats arm the ACK check.
                OP_HEARTBEAT => self.send_heartbeat().await?,
                OP_HEARTBEAT_ACK => self.awaiting_ack = false,
                _ => return Ok(payload),
            }
        }
    }
}

async fn read_hello(socket: &mut Socket) -> Result<Hello, TransportError> {
    while let Some(frame) = socket.next().await {
        let text = match frame.map_err(|e| TransportError::Network(e.to_string()))? {
            Message::Text(text) => text,
            Message::Close(frame) => return Err(close_error(frame)),
            _ => continue,
        };

        let payload: GatewayPayload = serde_json::from_str(&text)
            .map_err(|e| TransportError::Handshake(format!("invalid hello frame: {e}")))?;
        if payload.op != OP_HELLO {
            return Err(TransportError::Handshake(format!(
                "expected hello (op {OP_HELLO}), got op {}",
                payload.op
            )));
        }

        return serde_json::from_value(payload.d)
            .map_err(|e| TransportError::Handshake(format!("invalid hello payload: {e}")));
    }

    Err(TransportError::Network(
        "connection closed before hello".to_string(),
    ))
}

fn close_error(frame: Option<CloseFrame<'_>>) -> TransportError {
    let Some(frame) = frame else {
        return TransportError::Closed {
            code: 1005,
            reason: "no close frame".to_string(),
        };
    };

    let code = u16::from(frame.code);
    let reason = frame.reason.to_string();
    if code == CLOSE_AUTHENTICATION_FAILED {
        TransportError::AuthFailed(reason)
    } else {
        TransportError::Closed { code, reason }
    }
}

/// Keeps the channel-name cache current from guild and channel dispatches.
fn update_channel_names(names: &mut HashMap<String, String>, kind: &str, data: Value) {
    match kind {
        "GUILD_CREATE" => match serde_json::from_value::<GuildCreate>(data) {
            Ok(guild) => {
                for channel in guild.channels.into_iter().chain(guild.threads) {
                    remember(names, channel);
                }
            }
            Err(e) => debug!(error = %e, "Skipping unreadable GUILD_CREATE"),
        },
        "CHANNEL_CREATE" | "CHANNEL_UPDATE" | "THREAD_CREATE" | "THREAD_UPDATE" => {
            match serde_json::from_value::<Channel>(data) {
                Ok(channel) => remember(names, channel),
                Err(e) => debug!(kind, error = %e, "Skipping unreadable channel dispatch"),
            }
        }
        _ => trace!(kind, "Ignoring dispatch"),
    }
}

fn remember(names: &mut HashMap<String, String>, channel: Channel) {
    if let Some(name) = channel.name {
        names.insert(channel.id, name);
    }
}
