//! Decoded inbound gateway payloads.

use serde::Deserialize;
use serde_json::Value;

/// An event received from the gateway.
///
/// Unlike the wire envelope, this is a tagged variant keyed on opcode
/// (and, for dispatches, the `t` field) rather than a raw JSON object,
/// so callers match on it directly instead of re-parsing `d`.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum GatewayEvent {
    /// `op: 0` — a named event with its sequence number and payload.
    Dispatch {
        /// Sequence number this dispatch was tagged with.
        seq: u64,
        /// Name of the event, e.g. `"MESSAGE_CREATE"`.
        event_name: String,
        /// Raw event payload; shape is owned by the embedder.
        payload: Value,
    },
    /// `op: 1` — the gateway is requesting an immediate heartbeat.
    HeartbeatRequest,
    /// `op: 7` — the gateway is asking the client to reconnect.
    Reconnect,
    /// `op: 9` — the session was invalidated.
    InvalidSession {
        /// Whether the session may be resumed.
        resumable: bool,
    },
    /// `op: 10` — the first frame of a new connection.
    Hello {
        /// Heartbeat interval, in milliseconds.
        heartbeat_interval: u64,
    },
    /// `op: 11` — acknowledgement of a previously sent heartbeat.
    HeartbeatAck,
    /// Any opcode not listed above; forward-compatible catch-all.
    Unknown {
        /// The unrecognized opcode.
        op: u8,
        /// The raw payload received alongside it, if any.
        raw: Value,
    },
}

impl GatewayEvent {
    /// Gateway opcode this event corresponds to on the wire.
    pub const fn op(&self) -> u8 {
        match self {
            Self::Dispatch { .. } => 0,
            Self::HeartbeatRequest => 1,
            Self::Reconnect => 7,
            Self::InvalidSession { .. } => 9,
            Self::Hello { .. } => 10,
            Self::HeartbeatAck => 11,
            Self::Unknown { op, .. } => *op,
        }
    }
}

/// The inbound wire envelope, before it is classified into a
/// [`GatewayEvent`].
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

/// Classify an already-decoded [`Value`] into a [`GatewayEvent`].
///
/// The payload is always decoded first through the injected
/// [`JsonCodec`][crate::json::JsonCodec] (`config.deserializer()`), so
/// this takes a [`Value`] rather than raw bytes.
///
/// # Errors
///
/// Returns a [`serde_json::Error`] if `value` is not a well-formed
/// envelope, or if a recognized opcode's `d` payload doesn't match its
/// expected shape.
pub(crate) fn classify_value(value: Value) -> Result<GatewayEvent, serde_json::Error> {
    let envelope: Envelope = serde_json::from_value(value)?;

    classify(envelope)
}

fn classify(envelope: Envelope) -> Result<GatewayEvent, serde_json::Error> {
    Ok(match envelope.op {
        0 => {
            let seq = envelope.s.unwrap_or_default();
            let event_name = envelope.t.unwrap_or_default();

            GatewayEvent::Dispatch {
                seq,
                event_name,
                payload: envelope.d,
            }
        },
        1 => GatewayEvent::HeartbeatRequest,
        7 => GatewayEvent::Reconnect,
        9 => {
            let resumable = envelope.d.as_bool().unwrap_or(false);

            GatewayEvent::InvalidSession { resumable }
        },
        10 => {
            #[derive(Deserialize)]
            struct Hello {
                heartbeat_interval: u64,
            }

            let hello: Hello = serde_json::from_value(envelope.d)?;

            GatewayEvent::Hello {
                heartbeat_interval: hello.heartbeat_interval,
            }
        },
        11 => GatewayEvent::HeartbeatAck,
        op => GatewayEvent::Unknown { op, raw: envelope.d },
    })
}

#[cfg(test)]
mod tests {
    use super::{classify_value, GatewayEvent};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(GatewayEvent: Clone, Debug, Send, Sync);

    fn parse(bytes: &[u8]) -> Result<GatewayEvent, serde_json::Error> {
        classify_value(serde_json::from_slice(bytes)?)
    }

    #[test]
    fn hello_carries_the_heartbeat_interval() {
        let event = parse(br#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();

        assert!(matches!(
            event,
            GatewayEvent::Hello {
                heartbeat_interval: 41250
            }
        ));
    }

    #[test]
    fn dispatch_carries_seq_and_event_name() {
        let event = parse(br#"{"op":0,"s":43,"t":"MESSAGE_CREATE","d":{"id":"1"}}"#).unwrap();

        match event {
            GatewayEvent::Dispatch {
                seq,
                event_name,
                payload,
            } => {
                assert_eq!(seq, 43);
                assert_eq!(event_name, "MESSAGE_CREATE");
                assert_eq!(payload["id"], "1");
            },
            other => panic!("expected a dispatch, got {:?}", other),
        }
    }

    #[test]
    fn invalid_session_carries_resumable_flag() {
        let event = parse(br#"{"op":9,"d":false}"#).unwrap();
        assert!(matches!(
            event,
            GatewayEvent::InvalidSession { resumable: false }
        ));

        let event = parse(br#"{"op":9,"d":true}"#).unwrap();
        assert!(matches!(
            event,
            GatewayEvent::InvalidSession { resumable: true }
        ));
    }

    #[test]
    fn unrecognized_opcodes_are_preserved_not_discarded() {
        let event = parse(br#"{"op":99,"d":{"x":1}}"#).unwrap();
        match event {
            GatewayEvent::Unknown { op, raw } => {
                assert_eq!(op, 99);
                assert_eq!(raw["x"], 1);
            },
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn simple_opcodes_round_trip() {
        assert!(matches!(
            parse(br#"{"op":1}"#).unwrap(),
            GatewayEvent::HeartbeatRequest
        ));
        assert!(matches!(parse(br#"{"op":7}"#).unwrap(), GatewayEvent::Reconnect));
        assert!(matches!(
            parse(br#"{"op":11}"#).unwrap(),
            GatewayEvent::HeartbeatAck
        ));
    }
}
