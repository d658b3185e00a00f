//! Close code taxonomy driving reconnect decisions.
//!
//! The gateway signals most connection-ending conditions through the
//! WebSocket close frame's numeric code. [`CloseCode`] recognizes the
//! codes the protocol documents; any other code observed on the wire is
//! treated as transient and resumable.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Known close codes sent by the gateway, with their recovery class.
///
/// Codes not represented here are not unknown failures: they are
/// transient and resumable, exactly like [`CloseCode::Other`] ones are
/// classified by [`CloseCode::is_resumable`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum CloseCode {
    /// The token used to identify was invalid.
    AuthenticationFailed,
    /// The session has been invalidated and can no longer be resumed by
    /// `session_id` alone; the session timed out server-side.
    SessionTimeout,
    /// The sequence number sent in a RESUME was invalid.
    InvalidSeq,
    /// This identify would put the connection over the shard limit; the
    /// caller must shard.
    ShardingRequired,
    /// Any other close code observed on the wire.
    Other(u16),
}

impl CloseCode {
    /// Construct a `CloseCode` from the raw numeric code on the wire.
    pub const fn from_code(code: u16) -> Self {
        match code {
            4004 => Self::AuthenticationFailed,
            4009 => Self::SessionTimeout,
            4007 => Self::InvalidSeq,
            4011 => Self::ShardingRequired,
            other => Self::Other(other),
        }
    }

    /// Raw numeric code this variant represents.
    pub const fn code(self) -> u16 {
        match self {
            Self::AuthenticationFailed => 4004,
            Self::SessionTimeout => 4009,
            Self::InvalidSeq => 4007,
            Self::ShardingRequired => 4011,
            Self::Other(code) => code,
        }
    }

    /// Whether this close is fatal: reconnecting cannot possibly
    /// succeed and the caller should stop.
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::AuthenticationFailed | Self::ShardingRequired)
    }

    /// Whether the existing session should be discarded and a fresh
    /// IDENTIFY sent on reconnect, as opposed to a RESUME.
    pub const fn is_restartable(self) -> bool {
        matches!(self, Self::SessionTimeout | Self::InvalidSeq)
    }

    /// Whether the existing session can be carried across the
    /// reconnect via RESUME.
    ///
    /// This is the default outcome for every code not otherwise
    /// classified: the protocol is explicitly forward-compatible about
    /// close codes it has not yet assigned meaning to.
    pub const fn is_resumable(self) -> bool {
        !self.is_fatal() && !self.is_restartable()
    }
}

impl Display for CloseCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::AuthenticationFailed => f.write_str("authentication failed (4004)"),
            Self::SessionTimeout => f.write_str("session timed out (4009)"),
            Self::InvalidSeq => f.write_str("invalid sequence number (4007)"),
            Self::ShardingRequired => f.write_str("sharding required (4011)"),
            Self::Other(code) => write!(f, "close code {code}"),
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        Self::from_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::CloseCode;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(CloseCode: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn fatal_codes() {
        assert!(CloseCode::from_code(4004).is_fatal());
        assert!(CloseCode::from_code(4011).is_fatal());
        assert!(!CloseCode::from_code(4004).is_resumable());
    }

    #[test]
    fn restartable_codes() {
        assert!(CloseCode::from_code(4009).is_restartable());
        assert!(CloseCode::from_code(4007).is_restartable());
        assert!(!CloseCode::from_code(4009).is_fatal());
        assert!(!CloseCode::from_code(4009).is_resumable());
    }

    #[test]
    fn unknown_codes_are_resumable() {
        let code = CloseCode::from_code(1006);
        assert!(code.is_resumable());
        assert!(!code.is_fatal());
        assert!(!code.is_restartable());
        assert_eq!(code, CloseCode::Other(1006));
    }

    #[test]
    fn round_trips_through_raw_code() {
        for raw in [4004_u16, 4009, 4007, 4011, 1000, 1006] {
            assert_eq!(CloseCode::from_code(raw).code(), raw);
        }
    }
}
