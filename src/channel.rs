//! Channel for users to send [messages] across threads when calling a
//! connection's send method directly is not possible.
//!
//! [messages]: crate::message::Message

use crate::{
    command::{self, Command},
    error::{GatewayError, GatewayErrorType},
    json::{JsonCodec, SerdeJsonCodec},
    message::Message,
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Message channel between the user and the connection for sending
/// outgoing commands.
#[derive(Debug)]
pub struct MessageChannel {
    /// Receiving half for the connection to receive users' messages.
    rx: UnboundedReceiver<Message>,
    /// Sending half for users to send messages.
    tx: UnboundedSender<Message>,
    /// Codec used to encode commands sent via [`MessageSender::command`].
    codec: Arc<dyn JsonCodec>,
}

impl MessageChannel {
    /// Initialize a new unbounded mpsc channel using the default
    /// [`SerdeJsonCodec`].
    pub fn new() -> Self {
        Self::with_codec(Arc::new(SerdeJsonCodec))
    }

    /// Initialize a new unbounded mpsc channel using a specific codec.
    pub fn with_codec(codec: Arc<dyn JsonCodec>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self { rx, tx, codec }
    }

    /// Mutable reference to the receiving half for the connection.
    pub fn rx_mut(&mut self) -> &mut UnboundedReceiver<Message> {
        &mut self.rx
    }

    /// Clone of the sending half for users.
    pub fn sender(&self) -> MessageSender {
        MessageSender {
            tx: self.tx.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl Default for MessageChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel to send websocket [`Message`]s to a connection from another
/// task or thread.
#[derive(Clone, Debug)]
pub struct MessageSender {
    /// Sending half of the channel for the user to send messages.
    tx: UnboundedSender<Message>,
    /// Codec used to encode commands sent via [`command`][Self::command].
    codec: Arc<dyn JsonCodec>,
}

impl MessageSender {
    /// Whether the channel is closed.
    ///
    /// The channel will only be closed if the associated connection has
    /// been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send a command to the associated connection.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayErrorType::PayloadTooLarge`] error if the
    /// command failed to encode within the payload length limit.
    ///
    /// Returns a [`GatewayErrorType::ClientClosed`] error if the
    /// message could not be sent because the connection has been
    /// dropped.
    pub fn command(&self, command: &impl Command) -> Result<(), GatewayError> {
        let message = command::prepare(&*self.codec, command)?;

        self.send(message)
    }

    /// Send a raw websocket message to the associated connection.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayErrorType::ClientClosed`] error if the
    /// message could not be sent because the connection has been
    /// dropped.
    pub fn send(&self, message: Message) -> Result<(), GatewayError> {
        self.tx.send(message).map_err(|_| GatewayError {
            kind: GatewayErrorType::ClientClosed,
            source: None,
        })
    }
}
