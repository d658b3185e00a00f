//! Outbound command encoders.
//!
//! Every command is wrapped in the `{"op": <int>, "d": <payload>}`
//! envelope and run through [`prepare`] before being handed to the
//! websocket, which enforces the 4096-byte hard cap on the encoded
//! payload.

use crate::{
    error::{GatewayError, GatewayErrorType},
    json::{self, JsonCodec},
    message::Message,
};
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

/// Maximum encoded length, in bytes, of an outbound payload.
///
/// <https://discord.com/developers/docs/topics/gateway#sending-payloads>
pub const PAYLOAD_LENGTH_LIMIT: usize = 4096;

/// A command that can be sent to the gateway.
///
/// Implementors provide the `d` payload via [`Serialize`]; [`prepare`]
/// wraps it with the `op` the gateway expects.
pub trait Command: Serialize + Debug {
    /// Gateway opcode transmitted alongside this command's payload.
    const OPCODE: u8;
}

/// Serialize a command through a [`JsonCodec`] and wrap it as a
/// websocket [`Message`], enforcing the payload length cap.
///
/// # Errors
///
/// Returns a [`GatewayErrorType::PayloadTooLarge`] error if the
/// encoded payload exceeds [`PAYLOAD_LENGTH_LIMIT`] bytes.
pub fn prepare(codec: &dyn JsonCodec, command: &impl Command) -> Result<Message, GatewayError> {
    #[derive(Serialize)]
    struct Envelope<'a, T> {
        op: u8,
        d: &'a T,
    }

    let envelope = Envelope {
        op: command.opcode(),
        d: command,
    };

    let bytes = json::encode(codec, &envelope).map_err(|source| GatewayError {
        kind: GatewayErrorType::Protocol {
            reason: "command failed to serialize".to_owned(),
        },
        source: Some(Box::new(source)),
    })?;

    if bytes.len() > PAYLOAD_LENGTH_LIMIT {
        return Err(GatewayError {
            kind: GatewayErrorType::PayloadTooLarge { size: bytes.len() },
            source: None,
        });
    }

    let text = String::from_utf8(bytes).map_err(|source| GatewayError {
        kind: GatewayErrorType::Protocol {
            reason: "command encoded to invalid utf-8".to_owned(),
        },
        source: Some(Box::new(source)),
    })?;

    Ok(Message::Text(text))
}

/// Indirection so [`prepare`] can read `Command::OPCODE` through a
/// `&impl Command` without `Self: Sized` friction.
trait CommandOpcode {
    fn opcode(&self) -> u8;
}

impl<T: Command> CommandOpcode for T {
    fn opcode(&self) -> u8 {
        T::OPCODE
    }
}

/// Properties describing the client, sent with [`Identify`].
#[derive(Clone, Debug, Serialize)]
pub struct IdentifyProperties {
    /// Operating system the client is running on.
    pub os: String,
    /// Name of the library connecting to the gateway.
    pub browser: String,
    /// Name of the library connecting to the gateway.
    pub device: String,
}

impl IdentifyProperties {
    /// Default properties, naming this crate and the host OS.
    pub fn new() -> Self {
        Self {
            os: std::env::consts::OS.to_owned(),
            browser: env!("CARGO_PKG_NAME").to_owned(),
            device: env!("CARGO_PKG_NAME").to_owned(),
        }
    }
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self::new()
    }
}

/// `op: 2` — authenticate a new session.
#[derive(Clone, Debug, Serialize)]
pub struct Identify {
    /// Authentication token.
    pub token: String,
    /// Always `false`; transport compression is negotiated via the
    /// connect URL, not this flag.
    pub compress: bool,
    /// Member-count threshold above which the gateway omits member
    /// lists from GUILD_CREATE payloads.
    pub large_threshold: u16,
    /// Client identification properties.
    pub properties: IdentifyProperties,
    /// Whether to receive full guild member/presence push updates.
    pub guild_subscriptions: bool,
    /// `[shard_id, shard_count]`, sent even when `shard_count == 1`.
    pub shard: [u64; 2],
    /// Initial presence, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<Value>,
}

impl Command for Identify {
    const OPCODE: u8 = 2;
}

/// `op: 6` — resume a previously interrupted session.
#[derive(Clone, Debug, Serialize)]
pub struct Resume {
    /// Authentication token.
    pub token: String,
    /// Last sequence number observed before the disconnect.
    pub seq: u64,
    /// Session id to resume.
    pub session_id: String,
}

impl Command for Resume {
    const OPCODE: u8 = 6;
}

/// `op: 1` — application-level heartbeat, carrying the last observed
/// sequence number (or `null` if none has been seen yet).
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(transparent)]
pub struct Heartbeat(pub Option<u64>);

impl Command for Heartbeat {
    const OPCODE: u8 = 1;
}

/// `op: 11` — reply to a server-requested heartbeat (`op: 1` inbound).
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(transparent)]
pub struct HeartbeatReply(pub Option<()>);

impl HeartbeatReply {
    /// The single instance of this command; it carries no payload.
    pub const fn new() -> Self {
        Self(None)
    }
}

impl Command for HeartbeatReply {
    const OPCODE: u8 = 11;
}

/// Member selector for [`RequestGuildMembers`]: either explicit user
/// ids, or a name-prefix query with a result limit.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum MemberSelector {
    /// Request specific members by id.
    UserIds(Vec<u64>),
    /// Request members whose names start with `query`, limited to
    /// `limit` results (`0` meaning no limit).
    Query {
        /// Prefix to match against member names.
        query: String,
        /// Maximum number of members to return.
        limit: u32,
    },
}

impl MemberSelector {
    /// The default selector: all members, unlimited.
    pub fn all() -> Self {
        Self::Query {
            query: String::new(),
            limit: 0,
        }
    }
}

/// Request guild member information for one or more guilds.
///
/// `user_ids` takes precedence over `query`/`limit` when both would
/// otherwise apply; construct the desired variant of
/// [`MemberSelector`] directly rather than supplying both.
#[derive(Clone, Debug, Serialize)]
pub struct RequestGuildMembers {
    /// Guilds to request members from.
    pub guild_id: Vec<u64>,
    /// Which members to request.
    #[serde(flatten)]
    pub selector: MemberSelector,
}

impl RequestGuildMembers {
    /// Request all members of a single guild.
    pub fn builder(guild_id: u64) -> Self {
        Self {
            guild_id: vec![guild_id],
            selector: MemberSelector::all(),
        }
    }

    /// Request members of `guild_id` matching `query`, with an
    /// optional result `limit` (`0` for unlimited).
    pub fn query(mut self, query: impl Into<String>, limit: Option<u32>) -> Self {
        self.selector = MemberSelector::Query {
            query: query.into(),
            limit: limit.unwrap_or(0),
        };

        self
    }

    /// Request specific members by id.
    pub fn user_ids(mut self, user_ids: Vec<u64>) -> Self {
        self.selector = MemberSelector::UserIds(user_ids);

        self
    }
}

impl Command for RequestGuildMembers {
    const OPCODE: u8 = 8;
}

/// `op: 3` — update this connection's presence.
#[derive(Clone, Debug, Serialize)]
pub struct UpdateStatus {
    /// Milliseconds the client has been idle, `None` if active.
    pub idle: Option<u64>,
    /// Online status (e.g. `"online"`, `"idle"`, `"dnd"`, `"invisible"`).
    pub status: String,
    /// Activity payload; shape is owned by the embedder's presence
    /// model, so it is passed through opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<Value>,
    /// Whether the client is AFK.
    pub afk: bool,
}

impl Command for UpdateStatus {
    const OPCODE: u8 = 3;
}
