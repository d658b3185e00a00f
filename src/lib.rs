#![allow(
    clippy::let_unit_value,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::semicolon_if_nothing_returned,
    clippy::used_underscore_binding
)]
#![deny(
    clippy::all,
    clippy::missing_const_for_fn,
    clippy::pedantic,
    future_incompatible,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::broken_intra_doc_links,
    unsafe_code,
    unused,
    warnings
)]
#![doc = include_str!("../README.md")]

pub mod channel;
pub mod close;
pub mod command;
pub mod compression;
pub mod config;
pub mod error;
pub mod json;
pub mod latency;
pub mod message;
pub mod ratelimiter;
pub mod session;
pub mod shard;

pub(crate) mod event;

#[doc(no_inline)]
pub use self::{
    close::CloseCode,
    config::{GatewayConfig, GatewayConfigBuilder, ShardId},
    error::{GatewayError, GatewayErrorType, ShardInitializeError, ShardInitializeErrorType},
    shard::Shard,
};

/// Gateway protocol version spoken by this client.
///
/// Sent as the `v` query parameter on the connect URL.
pub const API_VERSION: u8 = 7;

#[cfg(not(any(
    feature = "native",
    feature = "rustls-native-roots",
    feature = "rustls-webpki-roots"
)))]
compile_error!(
    "Either the `native`, `rustls-native-roots` or `rustls-webpki-roots` feature must be enabled."
);
