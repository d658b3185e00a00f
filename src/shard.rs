//! Connection orchestrator: dial, authenticate, and keep one shard's
//! connection alive across reconnects.
//!
//! [`Shard::run`] drives exactly one dial-to-disconnect lifecycle and
//! returns the classified [`GatewayError`] that ended it. It does not
//! retry itself: the caller inspects [`GatewayError::is_fatal`],
//! [`is_resumable`][GatewayError::is_resumable], and
//! [`is_restartable`][GatewayError::is_restartable] to decide whether,
//! and how, to call `run` again.

use crate::{
    channel::{MessageChannel, MessageSender},
    close::CloseCode,
    command::{self, Command, Heartbeat, HeartbeatReply, Identify, IdentifyProperties, Resume},
    compression::Compression,
    config::{GatewayConfig, ShardId},
    error::{GatewayError, GatewayErrorType, ShardInitializeError, ShardInitializeErrorType},
    event::{self, GatewayEvent},
    latency::{Latency, PingLatency},
    message::Message,
    ratelimiter::RateLimiter,
    session::SessionState,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::Value;
use std::{
    fmt::{self, Debug, Display, Formatter},
    sync::{Mutex as StdMutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    net::TcpStream,
    sync::{mpsc::UnboundedReceiver, Mutex as AsyncMutex},
};
use tokio_tungstenite::{
    tungstenite::{protocol::WebSocketConfig, Message as TungsteniteMessage},
    MaybeTlsStream, WebSocketStream,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WriteHalf = SplitSink<WsStream, TungsteniteMessage>;
type ReadHalf = SplitStream<WsStream>;
type WriteMutex = AsyncMutex<WriteHalf>;

/// `max_frame_size` and `max_message_size` are left unbounded: the
/// gateway isn't an adversary. `accept_unmasked_frames` and
/// `max_send_queue` are left at their defaults.
const WEBSOCKET_CONFIG: WebSocketConfig = WebSocketConfig {
    accept_unmasked_frames: false,
    max_frame_size: None,
    max_message_size: None,
    max_send_queue: None,
};

/// Owns a single persistent connection to the gateway.
///
/// Construct one with [`Shard::new`], then drive it by calling
/// [`run`][Self::run] in a loop: each call performs the
/// Dialing → Awaiting-Hello → Authenticating → Listening lifecycle
/// once and returns when the connection ends, classifying why. The
/// observables ([`is_connected`][Self::is_connected],
/// [`latency`][Self::latency], [`seq`][Self::seq], ...) may be read
/// concurrently from any task while `run` is in progress.
pub struct Shard {
    config: GatewayConfig,
    session: SessionState,
    rate_limiter: RateLimiter,
    channel: AsyncMutex<MessageChannel>,
    sender: MessageSender,
    ping_latency: StdMutex<PingLatency>,
    heartbeat_latency: StdMutex<Latency>,
}

impl Shard {
    /// Construct a new shard from its configuration.
    ///
    /// The connection is not established until [`run`][Self::run] is
    /// first called.
    pub fn new(config: GatewayConfig) -> Self {
        let channel = MessageChannel::with_codec(config.serializer_arc());
        let sender = channel.sender();

        Self {
            config,
            session: SessionState::new(),
            rate_limiter: RateLimiter::default_gateway(),
            channel: AsyncMutex::new(channel),
            sender,
            ping_latency: StdMutex::new(PingLatency::new()),
            heartbeat_latency: StdMutex::new(Latency::new()),
        }
    }

    /// This shard's configuration.
    pub const fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// This shard's identifying index.
    pub const fn shard_id(&self) -> ShardId {
        self.config.shard_id()
    }

    /// Base URL this shard connects to.
    pub fn url(&self) -> &str {
        self.config.url()
    }

    /// Whether the shard currently has an established connection.
    pub fn is_connected(&self) -> bool {
        self.session.uptime().is_some()
    }

    /// How long the current connection has been up.
    pub fn uptime(&self) -> Option<Duration> {
        self.session.uptime()
    }

    /// Last inbound dispatch sequence number observed.
    pub fn seq(&self) -> Option<u64> {
        self.session.seq()
    }

    /// Currently active session id, if the shard has completed a
    /// handshake at least once.
    pub fn session_id(&self) -> Option<String> {
        self.session.session_id()
    }

    /// Round-trip latency of the websocket-level ping/pong keepalive.
    pub fn latency(&self) -> Option<Duration> {
        self.lock_ping_latency().latency()
    }

    /// Round-trip latency of the application-level heartbeat
    /// acknowledgement, `None` until the first acknowledgement arrives.
    pub fn heartbeat_latency(&self) -> Option<Duration> {
        let latency = self.lock_heartbeat_latency();
        let sent = latency.sent()?;
        let received = latency.received()?;

        received.checked_duration_since(sent)
    }

    /// Clone of the channel used to send messages to this shard from
    /// another task.
    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    /// Send a command to the gateway.
    ///
    /// The command is queued and written out by the connection's
    /// poll loop the next time it runs; this does not block on the
    /// rate limiter.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayErrorType::PayloadTooLarge`] error if the
    /// command failed to encode within the payload length limit, or a
    /// [`GatewayErrorType::ClientClosed`] error if the shard has been
    /// dropped.
    pub fn command(&self, command: &impl Command) -> Result<(), GatewayError> {
        self.sender.command(command)
    }

    /// Discard the session identity, forcing the next [`run`][Self::run]
    /// to IDENTIFY rather than RESUME.
    ///
    /// The caller is responsible for calling this after a
    /// [restartable][GatewayError::is_restartable] error; `run` never
    /// does so itself.
    pub fn clear_session(&self) {
        self.session.clear_session();
    }

    /// Request that the shard stop.
    ///
    /// Idempotent; safe to call from any task, including while
    /// [`run`][Self::run] is in progress elsewhere. Once set, the next
    /// (or current) `run` call ends with
    /// [`GatewayErrorType::ClientClosed`] and every subsequent `run`
    /// call returns the same error immediately without dialing.
    pub fn close(&self) {
        self.session.close_handle().close();
    }

    /// Drive one dial-to-disconnect lifecycle: dial, await HELLO,
    /// authenticate, then listen until the connection ends.
    ///
    /// Returns the classified error the connection ended with. This
    /// method does not retry; call it again to reconnect once the
    /// caller has applied its own policy (see
    /// [`is_resumable`][GatewayError::is_resumable] and
    /// [`is_restartable`][GatewayError::is_restartable]).
    pub async fn run(&self) -> GatewayError {
        if self.session.close_handle().is_closed() {
            return GatewayError {
                kind: GatewayErrorType::ClientClosed,
                source: None,
            };
        }

        tracing::debug!(shard = %self.shard_id(), "dialing");
        let stream = match dial(&self.config).await {
            Ok(stream) => stream,
            Err(source) => {
                tracing::warn!(shard = %self.shard_id(), error = %source, "failed to establish connection");

                return GatewayError {
                    kind: GatewayErrorType::ConnectionClosed {
                        close_code: CloseCode::Other(0),
                    },
                    source: Some(Box::new(source)),
                };
            },
        };

        let (write, mut read) = stream.split();
        let write = AsyncMutex::new(write);
        let mut compression = Compression::new(self.config.compression());

        tracing::debug!(shard = %self.shard_id(), "awaiting hello");
        let heartbeat_interval = match await_hello(&self.config, &mut compression, &mut read).await {
            Ok(interval) => interval,
            Err(error) => {
                let _ = write_frame(&self.rate_limiter, &write, TungsteniteMessage::Close(None)).await;

                return error;
            },
        };

        tracing::debug!(
            shard = %self.shard_id(),
            ?heartbeat_interval,
            resume = self.session.can_resume(),
            "authenticating"
        );

        if let Err(error) = self.authenticate(&write).await {
            let _ = write_frame(&self.rate_limiter, &write, TungsteniteMessage::Close(None)).await;

            return error;
        }

        self.session.mark_connected();
        tracing::debug!(shard = %self, "listening");

        let outcome = self
            .listen(&write, &mut read, &mut compression, heartbeat_interval)
            .await;

        let _ = write_frame(&self.rate_limiter, &write, TungsteniteMessage::Close(None)).await;
        self.session.reset_timing();

        if outcome.is_fatal() {
            tracing::warn!(shard = %self.shard_id(), error = %outcome, "connection ended fatally");
        } else {
            tracing::debug!(shard = %self.shard_id(), error = %outcome, "connection ended");
        }

        outcome
    }

    async fn authenticate(&self, write: &WriteMutex) -> Result<(), GatewayError> {
        if let Some(session_id) = self.session.session_id() {
            let resume = Resume {
                token: self.config.token().to_owned(),
                seq: self.session.seq().unwrap_or_default(),
                session_id,
            };

            self.send_command(write, &resume).await
        } else {
            let identify = Identify {
                token: self.config.token().to_owned(),
                compress: false,
                large_threshold: self.config.large_threshold(),
                properties: IdentifyProperties::new(),
                guild_subscriptions: self.config.guild_subscriptions(),
                shard: [self.config.shard_id().current(), self.config.shard_id().total()],
                presence: self.config.initial_presence().cloned(),
            };

            self.send_command(write, &identify).await
        }
    }

    async fn send_command(&self, write: &WriteMutex, command: &impl Command) -> Result<(), GatewayError> {
        let message = command::prepare(self.config.serializer(), command)?;

        write_frame(&self.rate_limiter, write, message.into_tungstenite()).await
    }

    async fn listen(
        &self,
        write: &WriteMutex,
        read: &mut ReadHalf,
        compression: &mut Compression,
        heartbeat_interval: Duration,
    ) -> GatewayError {
        let mut channel = self.channel.lock().await;

        let ping = self.ping_loop(write, self.config.ping_interval());
        let heartbeat = self.heartbeat_loop(write, heartbeat_interval);
        let poll = self.poll_loop(write, read, compression, channel.rx_mut());

        tokio::pin!(ping, heartbeat, poll);

        let result = tokio::select! {
            result = &mut ping => result,
            result = &mut heartbeat => result,
            result = &mut poll => result,
        };

        result.err().unwrap_or(GatewayError {
            kind: GatewayErrorType::ClientClosed,
            source: None,
        })
    }

    /// Periodic websocket-level ping, every `0.75 * receive_timeout`.
    async fn ping_loop(&self, write: &WriteMutex, interval: Duration) -> Result<(), GatewayError> {
        loop {
            write_frame(&self.rate_limiter, write, TungsteniteMessage::Ping(Vec::new())).await?;
            self.lock_ping_latency().track_sent();

            tokio::select! {
                () = tokio::time::sleep(interval) => {},
                () = self.session.close_handle().wait() => return Ok(()),
            }
        }
    }

    /// Application-level heartbeat, every `heartbeat_interval`. Errors
    /// with [`GatewayErrorType::Zombied`] if the previous heartbeat was
    /// never acknowledged before the next is due.
    async fn heartbeat_loop(&self, write: &WriteMutex, interval: Duration) -> Result<(), GatewayError> {
        loop {
            {
                let latency = self.lock_heartbeat_latency();

                if let Some(sent) = latency.sent() {
                    let acked = latency.received().map_or(false, |received| received >= sent);

                    if !acked {
                        return Err(GatewayError {
                            kind: GatewayErrorType::Zombied,
                            source: None,
                        });
                    }
                }
            }

            self.send_command(write, &Heartbeat(self.session.seq())).await?;
            self.lock_heartbeat_latency().track_sent();

            tokio::select! {
                () = tokio::time::sleep(interval) => {},
                () = self.session.close_handle().wait() => return Ok(()),
            }
        }
    }

    /// Read inbound frames and dispatch them by opcode; also drains
    /// commands queued via [`Shard::command`]/[`MessageSender`] so
    /// every outbound write funnels through the same writer.
    async fn poll_loop(
        &self,
        write: &WriteMutex,
        read: &mut ReadHalf,
        compression: &mut Compression,
        channel_rx: &mut UnboundedReceiver<Message>,
    ) -> Result<(), GatewayError> {
        loop {
            tokio::select! {
                () = self.session.close_handle().wait() => return Ok(()),
                queued = channel_rx.recv() => {
                    if let Some(queued) = queued {
                        write_frame(&self.rate_limiter, write, queued.into_tungstenite()).await?;
                    }
                },
                message = tokio::time::timeout(self.config.receive_timeout(), read.next()) => {
                    let message = message
                        .map_err(|_elapsed| receive_timed_out())?
                        .ok_or_else(connection_dropped)?
                        .map_err(transport_error)?;

                    if let TungsteniteMessage::Pong(_) = &message {
                        self.lock_ping_latency().track_received();
                    }

                    match Message::from_tungstenite(message) {
                        None => {},
                        Some(Message::Close(frame)) => {
                            let code = frame.map_or(CloseCode::Other(1000), |frame| {
                                CloseCode::from_code(frame.code())
                            });

                            return Err(GatewayError::from_close_code(code));
                        },
                        Some(Message::Binary(bytes)) => {
                            if let Some(decoded) = decode_binary(compression, &bytes)? {
                                self.handle_payload(write, &decoded).await?;
                            }
                        },
                        Some(Message::Text(text)) => {
                            self.handle_payload(write, text.as_bytes()).await?;
                        },
                    }
                },
            }
        }
    }

    async fn handle_payload(&self, write: &WriteMutex, bytes: &[u8]) -> Result<(), GatewayError> {
        let value = self.config.deserializer().from_slice(bytes).map_err(|source| GatewayError {
            kind: GatewayErrorType::Protocol {
                reason: "payload was not valid json".to_owned(),
            },
            source: Some(Box::new(source)),
        })?;

        let event = event::classify_value(value).map_err(|source| GatewayError {
            kind: GatewayErrorType::Protocol {
                reason: "payload did not match its opcode's shape".to_owned(),
            },
            source: Some(Box::new(source)),
        })?;

        match event {
            GatewayEvent::Dispatch { seq, event_name, payload } => {
                self.session.set_seq(seq);

                if event_name == "READY" {
                    if let Some(session_id) = payload.get("session_id").and_then(Value::as_str) {
                        self.session.set_session_id(Some(session_id.to_owned()));
                    }
                }

                self.config.dispatch_sink().dispatch(&event_name, &payload);
            },
            GatewayEvent::HeartbeatRequest => {
                self.send_command(write, &HeartbeatReply::new()).await?;
            },
            GatewayEvent::Reconnect => {
                return Err(GatewayError {
                    kind: GatewayErrorType::MustReconnect,
                    source: None,
                });
            },
            GatewayEvent::InvalidSession { resumable } => {
                return Err(GatewayError {
                    kind: GatewayErrorType::InvalidSession { resumable },
                    source: None,
                });
            },
            GatewayEvent::Hello { .. } => {
                tracing::debug!(shard = %self.shard_id(), "ignoring unexpected hello outside the handshake");
            },
            GatewayEvent::HeartbeatAck => {
                self.lock_heartbeat_latency().track_received();
            },
            GatewayEvent::Unknown { op, .. } => {
                tracing::trace!(shard = %self.shard_id(), opcode = op, "ignoring unrecognized opcode");
            },
        }

        Ok(())
    }

    fn lock_ping_latency(&self) -> MutexGuard<'_, PingLatency> {
        self.ping_latency.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_heartbeat_latency(&self) -> MutexGuard<'_, Latency> {
        self.heartbeat_latency.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Debug for Shard {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Display for Shard {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} connected={} seq={:?} session_id={:?} uptime={:?} latency={:?}",
            self.shard_id(),
            self.is_connected(),
            self.seq(),
            self.session_id(),
            self.uptime(),
            self.latency(),
        )
    }
}

/// No frame arrived within [`GatewayConfig::receive_timeout`]. Resumable:
/// the caller should reconnect and RESUME rather than re-IDENTIFY.
fn receive_timed_out() -> GatewayError {
    GatewayError {
        kind: GatewayErrorType::ConnectionClosed {
            close_code: CloseCode::Other(0),
        },
        source: None,
    }
}

fn connection_dropped() -> GatewayError {
    GatewayError {
        kind: GatewayErrorType::ConnectionClosed {
            close_code: CloseCode::Other(0),
        },
        source: None,
    }
}

fn transport_error(source: tokio_tungstenite::tungstenite::Error) -> GatewayError {
    GatewayError {
        kind: GatewayErrorType::ConnectionClosed {
            close_code: CloseCode::Other(0),
        },
        source: Some(Box::new(source)),
    }
}

async fn write_frame(
    rate_limiter: &RateLimiter,
    write: &WriteMutex,
    message: TungsteniteMessage,
) -> Result<(), GatewayError> {
    rate_limiter.acquire().await;

    let mut sink = write.lock().await;
    sink.send(message).await.map_err(transport_error)
}

/// Feed a binary frame into the decompressor, returning the decoded
/// payload once a complete message has been accumulated.
fn decode_binary(compression: &mut Compression, bytes: &[u8]) -> Result<Option<Vec<u8>>, GatewayError> {
    compression.extend(bytes);

    match compression.message_mut() {
        Ok(Some(_)) => {
            let decoded = compression.take();
            compression.clear();

            Ok(Some(decoded))
        },
        Ok(None) => Ok(None),
        Err(source) => Err(GatewayError {
            kind: GatewayErrorType::Protocol {
                reason: "frame failed to decompress".to_owned(),
            },
            source: Some(Box::new(source)),
        }),
    }
}

async fn await_hello(
    config: &GatewayConfig,
    compression: &mut Compression,
    read: &mut ReadHalf,
) -> Result<Duration, GatewayError> {
    loop {
        let message = tokio::time::timeout(config.receive_timeout(), read.next())
            .await
            .map_err(|_elapsed| receive_timed_out())?
            .ok_or_else(connection_dropped)?
            .map_err(transport_error)?;

        let bytes = match Message::from_tungstenite(message) {
            Some(Message::Binary(bytes)) => match decode_binary(compression, &bytes)? {
                Some(decoded) => decoded,
                None => continue,
            },
            Some(Message::Text(text)) => text.into_bytes(),
            Some(Message::Close(frame)) => {
                let code = frame.map_or(CloseCode::Other(1000), |frame| {
                    CloseCode::from_code(frame.code())
                });

                return Err(GatewayError::from_close_code(code));
            },
            None => continue,
        };

        let value = config.deserializer().from_slice(&bytes).map_err(|source| GatewayError {
            kind: GatewayErrorType::Protocol {
                reason: "hello payload was not valid json".to_owned(),
            },
            source: Some(Box::new(source)),
        })?;

        return match event::classify_value(value) {
            Ok(GatewayEvent::Hello { heartbeat_interval }) => Ok(Duration::from_millis(heartbeat_interval)),
            Ok(_) => Err(GatewayError {
                kind: GatewayErrorType::Protocol {
                    reason: "expected hello as the first frame".to_owned(),
                },
                source: None,
            }),
            Err(source) => Err(GatewayError {
                kind: GatewayErrorType::Protocol {
                    reason: "hello payload failed to parse".to_owned(),
                },
                source: Some(Box::new(source)),
            }),
        };
    }
}

fn build_url(config: &GatewayConfig) -> Result<url::Url, ShardInitializeError> {
    let mut raw_url = config.url().to_owned();
    raw_url.push_str("?v=");
    raw_url.push_str(&crate::API_VERSION.to_string());
    raw_url.push_str("&encoding=json");

    let mut url = url::Url::parse(&raw_url).map_err(|_source| ShardInitializeError {
        kind: ShardInitializeErrorType::UrlInvalid { url: raw_url.clone() },
        source: None,
    })?;

    crate::compression::add_url_feature(&mut url, config.compression());

    Ok(url)
}

async fn dial(config: &GatewayConfig) -> Result<WsStream, ShardInitializeError> {
    let url = build_url(config)?;

    tokio_tungstenite::connect_async_tls_with_config(url, Some(WEBSOCKET_CONFIG), None)
        .await
        .map(|(stream, _response)| stream)
        .map_err(|source| ShardInitializeError {
            kind: ShardInitializeErrorType::Establishing,
            source: Some(Box::new(source)),
        })
}

#[cfg(test)]
mod tests {
    use super::{build_url, Shard};
    use crate::config::{GatewayConfig, ShardId};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Shard: Debug, Send, Sync);

    #[test]
    fn build_url_appends_version_and_encoding() {
        let config = GatewayConfig::builder("T".to_owned(), ShardId::ONE)
            .url("wss://gateway.example.invalid")
            .compression(false)
            .build();

        let url = build_url(&config).unwrap();
        assert_eq!(url.as_str(), "wss://gateway.example.invalid/?v=7&encoding=json");
    }

    #[test]
    fn build_url_appends_compression_when_enabled() {
        let config = GatewayConfig::builder("T".to_owned(), ShardId::ONE)
            .url("wss://gateway.example.invalid")
            .compression(true)
            .build();

        let url = build_url(&config).unwrap();
        assert!(url.query().unwrap().contains("compress=zlib-stream"));
    }

    #[test]
    fn new_shard_starts_disconnected() {
        let config = GatewayConfig::new("T".to_owned(), ShardId::ONE);
        let shard = Shard::new(config);

        assert!(!shard.is_connected());
        assert!(shard.uptime().is_none());
        assert!(shard.seq().is_none());
        assert!(shard.session_id().is_none());
        assert!(shard.latency().is_none());
        assert!(shard.heartbeat_latency().is_none());
    }

    #[tokio::test]
    async fn close_before_run_returns_client_closed_without_dialing() {
        let config = GatewayConfig::new("T".to_owned(), ShardId::ONE);
        let shard = Shard::new(config);
        shard.close();

        let error = shard.run().await;
        assert!(matches!(error.kind(), crate::error::GatewayErrorType::ClientClosed));
    }
}
