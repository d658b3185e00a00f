//! Injectable JSON codec used to serialize outbound commands and
//! deserialize inbound gateway payloads.
//!
//! The wire format is always JSON; the crate performing the
//! encode/decode is not fixed, so callers can swap in a faster decoder
//! without touching the rest of the client. [`SerdeJsonCodec`] is the
//! default and is what [`GatewayConfigBuilder`] uses when no codec is
//! supplied.
//!
//! [`GatewayConfigBuilder`]: crate::config::GatewayConfigBuilder

use serde::Serialize;
use serde_json::Value;
use std::{
    error::Error,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
};

/// A JSON encoder/decoder pair injected into a [`GatewayConfig`].
///
/// [`GatewayConfig`]: crate::config::GatewayConfig
pub trait JsonCodec: Debug + Send + Sync {
    /// Serialize a JSON value to its wire representation.
    ///
    /// # Errors
    ///
    /// Returns a [`JsonError`] if the value could not be serialized.
    fn to_vec(&self, value: &Value) -> Result<Vec<u8>, JsonError>;

    /// Deserialize a wire payload into a JSON value.
    ///
    /// # Errors
    ///
    /// Returns a [`JsonError`] if the payload is not valid JSON.
    fn from_slice(&self, bytes: &[u8]) -> Result<Value, JsonError>;
}

/// Default [`JsonCodec`] backed by `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerdeJsonCodec;

impl JsonCodec for SerdeJsonCodec {
    fn to_vec(&self, value: &Value) -> Result<Vec<u8>, JsonError> {
        serde_json::to_vec(value).map_err(|source| JsonError {
            kind: JsonErrorType::Serializing,
            source: Some(Box::new(source)),
        })
    }

    fn from_slice(&self, bytes: &[u8]) -> Result<Value, JsonError> {
        serde_json::from_slice(bytes).map_err(|source| {
            tracing::trace!("invalid JSON: {}", String::from_utf8_lossy(bytes));

            JsonError {
                kind: JsonErrorType::Deserializing,
                source: Some(Box::new(source)),
            }
        })
    }
}

/// Serialize any `Serialize` type through a [`JsonCodec`] in one step.
///
/// # Errors
///
/// Returns a [`JsonError`] if the value could not be represented as a
/// [`Value`] or the codec failed to serialize it.
pub fn encode<T: Serialize>(codec: &dyn JsonCodec, value: &T) -> Result<Vec<u8>, JsonError> {
    let value = serde_json::to_value(value).map_err(|source| JsonError {
        kind: JsonErrorType::Serializing,
        source: Some(Box::new(source)),
    })?;

    codec.to_vec(&value)
}

/// Parsing or producing a JSON payload failed.
#[derive(Debug)]
pub struct JsonError {
    /// Type of error.
    pub(crate) kind: JsonErrorType,
    /// Source error if available.
    pub(crate) source: Option<Box<dyn Error + Send + Sync>>,
}

impl JsonError {
    /// Immutable reference to the type of error that occurred.
    pub const fn kind(&self) -> &JsonErrorType {
        &self.kind
    }
}

impl Display for JsonError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.kind {
            JsonErrorType::Deserializing => f.write_str("deserializing payload as json failed"),
            JsonErrorType::Serializing => f.write_str("serializing payload as json failed"),
        }
    }
}

impl Error for JsonError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| &**source as &(dyn Error + 'static))
    }
}

/// Type of [`JsonError`] that occurred.
#[derive(Debug)]
#[non_exhaustive]
pub enum JsonErrorType {
    /// A payload received from the gateway failed to deserialize.
    Deserializing,
    /// A value failed to serialize to its wire representation.
    Serializing,
}

#[cfg(test)]
mod tests {
    use super::{JsonCodec, JsonError, JsonErrorType, SerdeJsonCodec};
    use static_assertions::assert_impl_all;
    use std::{error::Error, fmt::Debug};

    assert_impl_all!(JsonErrorType: Debug, Send, Sync);
    assert_impl_all!(JsonError: Error, Send, Sync);
    assert_impl_all!(SerdeJsonCodec: Clone, Copy, Debug, JsonCodec, Send, Sync);

    #[test]
    fn round_trips_through_the_default_codec() {
        let codec = SerdeJsonCodec;
        let value = serde_json::json!({ "op": 1, "d": 42 });

        let bytes = codec.to_vec(&value).unwrap();
        let decoded = codec.from_slice(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn rejects_malformed_json() {
        let codec = SerdeJsonCodec;
        assert!(codec.from_slice(b"{not json").is_err());
    }
}
