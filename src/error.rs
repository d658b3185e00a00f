//! Errors returned by gateway operations.

use crate::close::CloseCode;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
};

/// A gateway operation failed.
///
/// Carries a classification ([`kind`][Self::kind]) used to decide the
/// reconnect policy, and the underlying cause if one is available.
#[derive(Debug)]
pub struct GatewayError {
    /// Type of error.
    pub(crate) kind: GatewayErrorType,
    /// Source error if available.
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl GatewayError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &GatewayErrorType {
        &self.kind
    }

    /// Whether the connection must not be retried: the caller should
    /// treat this shard as permanently done.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorType::InvalidToken
                | GatewayErrorType::NeedsSharding
                | GatewayErrorType::ClientClosed
        )
    }

    /// Whether reconnecting should retain `session_id` and `seq` and
    /// RESUME.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorType::MustReconnect
                | GatewayErrorType::InvalidSession { resumable: true }
                | GatewayErrorType::Zombied
                | GatewayErrorType::ConnectionClosed { .. }
                | GatewayErrorType::Protocol { .. }
        )
    }

    /// Whether reconnecting should discard `session_id` and IDENTIFY
    /// anew.
    pub fn is_restartable(&self) -> bool {
        matches!(
            self.kind,
            GatewayErrorType::InvalidSession { resumable: false }
        )
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn Error + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the
    /// source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(self) -> (GatewayErrorType, Option<Box<dyn Error + Send + Sync>>) {
        (self.kind, self.source)
    }

    /// Classify a close code into the error it should be surfaced as.
    pub(crate) fn from_close_code(close_code: CloseCode) -> Self {
        let kind = match close_code {
            CloseCode::AuthenticationFailed => GatewayErrorType::InvalidToken,
            CloseCode::SessionTimeout | CloseCode::InvalidSeq => {
                GatewayErrorType::InvalidSession { resumable: false }
            },
            CloseCode::ShardingRequired => GatewayErrorType::NeedsSharding,
            CloseCode::Other(_) => GatewayErrorType::ConnectionClosed { close_code },
        };

        Self { kind, source: None }
    }
}

impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            GatewayErrorType::InvalidToken => f.write_str("the provided token is invalid"),
            GatewayErrorType::NeedsSharding => {
                f.write_str("the gateway requires this bot to be sharded")
            },
            GatewayErrorType::InvalidSession { resumable } => {
                write!(f, "session invalidated, resumable: {}", resumable)
            },
            GatewayErrorType::MustReconnect => {
                f.write_str("the gateway asked the client to reconnect")
            },
            GatewayErrorType::Zombied => {
                f.write_str("heartbeat was not acknowledged before the next cycle")
            },
            GatewayErrorType::ConnectionClosed { close_code } => {
                write!(f, "connection closed with code {}", close_code)
            },
            GatewayErrorType::ClientClosed => f.write_str("the client closed the connection"),
            GatewayErrorType::Protocol { reason } => {
                write!(f, "protocol violation: {}", reason)
            },
            GatewayErrorType::PayloadTooLarge { size } => {
                write!(f, "encoded payload of {} bytes exceeds the 4096 byte limit", size)
            },
        }
    }
}

impl Error for GatewayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`GatewayError`] that occurred, doubling as the reconnect
/// classification.
#[derive(Debug)]
#[non_exhaustive]
pub enum GatewayErrorType {
    /// The provided token was rejected. Fatal; do not retry.
    InvalidToken,
    /// The gateway requires this connection to be sharded. Fatal; the
    /// caller must reshard.
    NeedsSharding,
    /// The session was invalidated.
    ///
    /// Restart (discard `session_id`, IDENTIFY) if `resumable` is
    /// `false`; otherwise resume.
    InvalidSession {
        /// Whether the session may be resumed.
        resumable: bool,
    },
    /// The gateway asked the client to reconnect. Resume.
    MustReconnect,
    /// A heartbeat was not acknowledged before the next heartbeat
    /// cycle began. Resume.
    Zombied,
    /// The connection was closed with an unclassified close code.
    /// Resume.
    ConnectionClosed {
        /// Close code the connection was closed with.
        close_code: CloseCode,
    },
    /// The client itself initiated the close. Terminal for this
    /// instance; not part of the automatic reconnect policy.
    ClientClosed,
    /// An unexpected frame or opcode was received. Resume.
    Protocol {
        /// Human-readable description of the violation.
        reason: String,
    },
    /// A local command failed to encode within the payload length
    /// limit. The connection is unaffected; only this send failed.
    PayloadTooLarge {
        /// Encoded size of the rejected payload, in bytes.
        size: usize,
    },
}

/// Establishing a connection to the gateway failed.
#[derive(Debug)]
pub struct ShardInitializeError {
    /// Type of error.
    pub(crate) kind: ShardInitializeErrorType,
    /// Source error if available.
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl ShardInitializeError {
    /// Immutable reference to the type of error that occurred.
    #[must_use = "retrieving the type has no effect if left unused"]
    pub const fn kind(&self) -> &ShardInitializeErrorType {
        &self.kind
    }

    /// Consume the error, returning the source error if there is any.
    #[must_use = "consuming the error and retrieving the source has no effect if left unused"]
    pub fn into_source(self) -> Option<Box<dyn Error + Send + Sync>> {
        self.source
    }

    /// Consume the error, returning the owned error type and the
    /// source error.
    #[must_use = "consuming the error into its parts has no effect if left unused"]
    pub fn into_parts(
        self,
    ) -> (
        ShardInitializeErrorType,
        Option<Box<dyn Error + Send + Sync>>,
    ) {
        (self.kind, self.source)
    }
}

impl Display for ShardInitializeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            ShardInitializeErrorType::Establishing => {
                f.write_str("establishing the connection failed")
            },
            ShardInitializeErrorType::UrlInvalid { url } => {
                f.write_str("gateway url is invalid: ")?;

                f.write_str(url)
            },
        }
    }
}

impl Error for ShardInitializeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`ShardInitializeError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum ShardInitializeErrorType {
    /// Establishing a connection to the gateway failed.
    Establishing,
    /// Gateway URL provided via [`GatewayConfigBuilder::url`] is
    /// invalid.
    ///
    /// [`GatewayConfigBuilder::url`]: crate::config::GatewayConfigBuilder::url
    UrlInvalid {
        /// Fully built URL with a specified API version, compression,
        /// and other features.
        url: String,
    },
}

#[cfg(test)]
mod tests {
    use super::{GatewayError, GatewayErrorType, ShardInitializeError, ShardInitializeErrorType};
    use crate::close::CloseCode;
    use static_assertions::{assert_fields, assert_impl_all};
    use std::{error::Error, fmt::Debug};

    assert_fields!(GatewayErrorType::InvalidSession: resumable);
    assert_fields!(GatewayErrorType::ConnectionClosed: close_code);
    assert_fields!(GatewayErrorType::Protocol: reason);
    assert_fields!(GatewayErrorType::PayloadTooLarge: size);
    assert_fields!(ShardInitializeErrorType::UrlInvalid: url);
    assert_impl_all!(GatewayErrorType: Debug, Send, Sync);
    assert_impl_all!(GatewayError: Error, Send, Sync);
    assert_impl_all!(ShardInitializeErrorType: Debug, Send, Sync);
    assert_impl_all!(ShardInitializeError: Error, Send, Sync);

    #[test]
    fn fatal_kinds_stop_the_client() {
        let invalid_token = GatewayError {
            kind: GatewayErrorType::InvalidToken,
            source: None,
        };
        assert!(invalid_token.is_fatal());
        assert!(!invalid_token.is_resumable());
        assert!(!invalid_token.is_restartable());

        let needs_sharding = GatewayError {
            kind: GatewayErrorType::NeedsSharding,
            source: None,
        };
        assert!(needs_sharding.is_fatal());
    }

    #[test]
    fn resumable_kinds_retain_session() {
        let must_reconnect = GatewayError {
            kind: GatewayErrorType::MustReconnect,
            source: None,
        };
        assert!(must_reconnect.is_resumable());
        assert!(!must_reconnect.is_fatal());

        let zombied = GatewayError {
            kind: GatewayErrorType::Zombied,
            source: None,
        };
        assert!(zombied.is_resumable());

        let resumable_session = GatewayError {
            kind: GatewayErrorType::InvalidSession { resumable: true },
            source: None,
        };
        assert!(resumable_session.is_resumable());
    }

    #[test]
    fn restartable_kinds_discard_session() {
        let restart = GatewayError {
            kind: GatewayErrorType::InvalidSession { resumable: false },
            source: None,
        };
        assert!(restart.is_restartable());
        assert!(!restart.is_resumable());
        assert!(!restart.is_fatal());
    }

    #[test]
    fn close_code_classification_matches_the_documented_table() {
        assert!(matches!(
            GatewayError::from_close_code(CloseCode::AuthenticationFailed).kind(),
            GatewayErrorType::InvalidToken
        ));
        assert!(matches!(
            GatewayError::from_close_code(CloseCode::ShardingRequired).kind(),
            GatewayErrorType::NeedsSharding
        ));
        assert!(GatewayError::from_close_code(CloseCode::SessionTimeout).is_restartable());
        assert!(GatewayError::from_close_code(CloseCode::InvalidSeq).is_restartable());
        assert!(GatewayError::from_close_code(CloseCode::Other(4999)).is_resumable());
    }
}
