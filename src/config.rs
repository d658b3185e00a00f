//! Customizable configuration for a gateway connection.

use crate::json::{JsonCodec, SerdeJsonCodec};
use serde_json::Value;
use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    sync::Arc,
    time::Duration,
};

/// Maximum value of an acceptable [large threshold].
///
/// [large threshold]: GatewayConfigBuilder::large_threshold
pub const LARGE_THRESHOLD_MAXIMUM: u16 = 250;

/// Minimum value of an acceptable [large threshold].
///
/// [large threshold]: GatewayConfigBuilder::large_threshold
pub const LARGE_THRESHOLD_MINIMUM: u16 = 50;

/// Default large threshold transmitted when none is configured.
///
/// This is deliberately outside the `50..=250` range accepted by
/// [`GatewayConfigBuilder::large_threshold`]; the gateway clamps any
/// value above the maximum down to it, so shipping `1000` by default
/// simply always asks for the server's own ceiling.
pub const LARGE_THRESHOLD_DEFAULT: u16 = 1000;

/// Default base URL used when [`GatewayConfigBuilder::url`] isn't
/// called.
pub const DEFAULT_URL: &str = "wss://gateway.example.invalid";

/// Identifier of a shard, including its index and the total number of
/// shards splitting the workload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShardId {
    /// Current ID of the shard, 0-indexed.
    current: u64,
    /// Total number of shards in use, 1-indexed.
    total: u64,
}

impl ShardId {
    /// ID of the only shard of an un-sharded connection.
    pub const ONE: ShardId = ShardId::new(0, 1);

    /// Create a new shard identifier.
    ///
    /// The current shard is 0-indexed while the total number of
    /// shards is 1-indexed: a current shard of 7 out of 8 total is
    /// valid, while 8 out of 8 total is not.
    ///
    /// # Panics
    ///
    /// Panics if `current >= total`, or if `total == 0`.
    pub const fn new(current: u64, total: u64) -> Self {
        assert!(total > 0, "total must be greater than zero");
        assert!(
            current < total,
            "current shard (0-indexed) must be less than total (1-indexed)",
        );

        Self { current, total }
    }

    /// Create a new shard identifier, returning `None` if the indexes
    /// are invalid instead of panicking.
    pub const fn new_checked(current: u64, total: u64) -> Option<Self> {
        if total > 0 && current < total {
            Some(Self { current, total })
        } else {
            None
        }
    }

    /// ID of the shard, 0-indexed.
    pub const fn current(self) -> u64 {
        self.current
    }

    /// Total number of shards, 1-indexed.
    pub const fn total(self) -> u64 {
        self.total
    }
}

impl Display for ShardId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("shard ")?;
        Display::fmt(&self.current, f)?;
        f.write_str("/")?;

        Display::fmt(&self.total, f)
    }
}

/// A sink called once per dispatch event, synchronously from the poll
/// loop.
///
/// Must not block; offload work to another task if it would.
pub trait DispatchSink: Debug + Send + Sync {
    /// Handle a dispatch event.
    fn dispatch(&self, event_name: &str, payload: &Value);
}

/// Default [`DispatchSink`]: does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDispatchSink;

impl DispatchSink for NoopDispatchSink {
    fn dispatch(&self, _event_name: &str, _payload: &Value) {}
}

/// Immutable configuration a connection is constructed with.
///
/// Use [`GatewayConfig::builder`] to start configuring a connection.
#[derive(Clone)]
pub struct GatewayConfig {
    /// Token used to authenticate.
    token: Box<str>,
    /// Base URL the client connects to.
    url: Box<str>,
    /// Identifying shard index.
    shard_id: ShardId,
    /// Whether to negotiate zlib-stream transport compression.
    compression: bool,
    /// Member-count threshold transmitted in IDENTIFY.
    large_threshold: u16,
    /// Whether to request full guild member/presence push updates.
    guild_subscriptions: bool,
    /// Hard deadline on a single frame receive; also governs ping
    /// cadence (`0.75 * receive_timeout`).
    receive_timeout: Duration,
    /// Presence sent alongside IDENTIFY, if any.
    initial_presence: Option<Value>,
    /// JSON codec used to serialize outbound commands.
    serializer: Arc<dyn JsonCodec>,
    /// JSON codec used to deserialize inbound payloads.
    deserializer: Arc<dyn JsonCodec>,
    /// Sink invoked with every dispatch event.
    dispatch: Arc<dyn DispatchSink>,
}

impl Debug for GatewayConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url)
            .field("shard_id", &self.shard_id)
            .field("compression", &self.compression)
            .field("large_threshold", &self.large_threshold)
            .field("guild_subscriptions", &self.guild_subscriptions)
            .field("receive_timeout", &self.receive_timeout)
            .finish_non_exhaustive()
    }
}

impl GatewayConfig {
    /// Create a new default configuration for a connection.
    ///
    /// Shortcut for [`builder`][Self::builder] immediately finalized.
    pub fn new(token: String, shard_id: ShardId) -> Self {
        Self::builder(token, shard_id).build()
    }

    /// Create a builder to customize a connection's configuration.
    pub fn builder(token: String, shard_id: ShardId) -> GatewayConfigBuilder {
        GatewayConfigBuilder::new(token, shard_id)
    }

    /// Token used to authenticate.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Base URL used to connect.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Identifying shard index.
    pub const fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Whether zlib-stream transport compression is negotiated.
    pub const fn compression(&self) -> bool {
        self.compression
    }

    /// Member-count threshold transmitted in IDENTIFY.
    pub const fn large_threshold(&self) -> u16 {
        self.large_threshold
    }

    /// Whether full guild member/presence push updates are requested.
    pub const fn guild_subscriptions(&self) -> bool {
        self.guild_subscriptions
    }

    /// Hard deadline on a single frame receive.
    pub const fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Ping cadence, derived as `0.75 * receive_timeout`.
    pub fn ping_interval(&self) -> Duration {
        self.receive_timeout.mul_f64(0.75)
    }

    /// Presence sent alongside IDENTIFY, if any.
    pub const fn initial_presence(&self) -> Option<&Value> {
        self.initial_presence.as_ref()
    }

    /// JSON codec used to serialize outbound commands.
    pub fn serializer(&self) -> &dyn JsonCodec {
        &*self.serializer
    }

    /// Clone of the serializer, for handing to collaborators (e.g. the
    /// cross-task [`MessageChannel`][crate::channel::MessageChannel])
    /// that need to own a codec rather than borrow one.
    pub(crate) fn serializer_arc(&self) -> Arc<dyn JsonCodec> {
        self.serializer.clone()
    }

    /// JSON codec used to deserialize inbound payloads.
    pub fn deserializer(&self) -> &dyn JsonCodec {
        &*self.deserializer
    }

    /// Sink invoked with every dispatch event.
    pub fn dispatch_sink(&self) -> &dyn DispatchSink {
        &*self.dispatch
    }
}

/// Builder to customize a [`GatewayConfig`].
#[must_use = "builder must be completed to be used"]
pub struct GatewayConfigBuilder {
    inner: GatewayConfig,
}

impl Debug for GatewayConfigBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GatewayConfigBuilder")
            .field("inner", &self.inner)
            .finish()
    }
}

impl GatewayConfigBuilder {
    /// Create a new builder to configure and construct a connection.
    ///
    /// Refer to each method for its default value.
    pub fn new(token: String, shard_id: ShardId) -> Self {
        Self {
            inner: GatewayConfig {
                token: token.into_boxed_str(),
                url: DEFAULT_URL.to_owned().into_boxed_str(),
                shard_id,
                compression: true,
                large_threshold: LARGE_THRESHOLD_DEFAULT,
                guild_subscriptions: true,
                receive_timeout: Duration::from_secs(45),
                initial_presence: None,
                serializer: Arc::new(SerdeJsonCodec),
                deserializer: Arc::new(SerdeJsonCodec),
                dispatch: Arc::new(NoopDispatchSink),
            },
        }
    }

    /// Consume the builder, constructing a [`GatewayConfig`].
    pub fn build(self) -> GatewayConfig {
        self.inner
    }

    /// Set the base URL used to connect.
    ///
    /// The client appends `?v=7&encoding=json` and, if compression is
    /// enabled, `&compress=zlib-stream`.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.inner.url = url.into().into_boxed_str();

        self
    }

    /// Set whether zlib-stream transport compression is negotiated.
    ///
    /// Defaults to `true`.
    pub const fn compression(mut self, compression: bool) -> Self {
        self.inner.compression = compression;

        self
    }

    /// Set the member-count threshold transmitted in IDENTIFY.
    ///
    /// The accepted range is `50..=250`; values outside it panic. The
    /// unconfigured default ships `1000`, letting the gateway clamp it
    /// to its own maximum.
    ///
    /// # Panics
    ///
    /// Panics if `large_threshold` is outside `50..=250`.
    pub const fn large_threshold(mut self, large_threshold: u16) -> Self {
        assert!(
            large_threshold >= LARGE_THRESHOLD_MINIMUM
                && large_threshold <= LARGE_THRESHOLD_MAXIMUM,
            "large threshold isn't in the accepted range"
        );

        self.inner.large_threshold = large_threshold;

        self
    }

    /// Set whether to request full guild member/presence push updates.
    ///
    /// Defaults to `true`.
    pub const fn guild_subscriptions(mut self, guild_subscriptions: bool) -> Self {
        self.inner.guild_subscriptions = guild_subscriptions;

        self
    }

    /// Set the hard deadline on a single frame receive.
    ///
    /// Ping cadence is derived from this as `0.75 * receive_timeout`.
    /// Defaults to 45 seconds.
    pub const fn receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.inner.receive_timeout = receive_timeout;

        self
    }

    /// Set the presence to send alongside IDENTIFY.
    ///
    /// Defaults to none, which the gateway treats as online with no
    /// special status.
    pub fn initial_presence(mut self, presence: Value) -> Self {
        self.inner.initial_presence = Some(presence);

        self
    }

    /// Set the JSON codec used for both serializing and deserializing.
    pub fn json_codec(mut self, codec: Arc<dyn JsonCodec>) -> Self {
        self.inner.serializer = codec.clone();
        self.inner.deserializer = codec;

        self
    }

    /// Set the sink invoked with every dispatch event.
    pub fn dispatch_sink(mut self, sink: Arc<dyn DispatchSink>) -> Self {
        self.inner.dispatch = sink;

        self
    }
}

#[cfg(test)]
mod tests {
    use super::{GatewayConfig, ShardId};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(GatewayConfig: Clone, Debug, Send, Sync);
    assert_impl_all!(ShardId: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    const fn test_shard_id() {
        let id = ShardId::new(2, 4);

        assert!(id.current() == 2);
        assert!(id.total() == 4);
    }

    #[should_panic]
    #[test]
    const fn test_shard_id_current_equal_invalid() {
        ShardId::new(4, 4);
    }

    #[should_panic]
    #[test]
    const fn test_shard_id_current_greater_invalid() {
        ShardId::new(10, 4);
    }

    #[should_panic]
    #[test]
    const fn test_shard_id_total_zero_invalid() {
        ShardId::new(0, 0);
    }

    #[test]
    const fn test_shard_id_new_checked() {
        assert!(ShardId::new_checked(0, 1).is_some());
        assert!(ShardId::new_checked(1, 1).is_none());
        assert!(ShardId::new_checked(2, 1).is_none());
        assert!(ShardId::new_checked(0, 0).is_none());
    }

    #[test]
    fn test_shard_id_display() {
        assert_eq!("shard 0/1", ShardId::ONE.to_string());
        assert_eq!("shard 2/4", ShardId::new(2, 4).to_string());
        assert_eq!("shard 13/102", ShardId::new(13, 102).to_string());
    }

    #[test]
    fn default_config_ships_an_out_of_range_large_threshold() {
        let config = GatewayConfig::new("T".to_owned(), ShardId::ONE);
        assert_eq!(config.large_threshold(), 1000);
    }

    #[should_panic]
    #[test]
    fn large_threshold_rejects_values_outside_the_accepted_range() {
        let _ = GatewayConfig::builder("T".to_owned(), ShardId::ONE).large_threshold(1000);
    }

    #[test]
    fn ping_interval_is_three_quarters_of_receive_timeout() {
        let config = GatewayConfig::builder("T".to_owned(), ShardId::ONE)
            .receive_timeout(std::time::Duration::from_secs(40))
            .build();

        assert_eq!(config.ping_interval(), std::time::Duration::from_secs(30));
    }
}
