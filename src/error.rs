//! Bridge error types.

use crate::codec::DecodeError;

/// Boxed error returned by message handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors reported by a [`LineBridge`](crate::bridge::LineBridge).
///
/// `Decode`, `Callback`, `CallbackPanicked` and `Peer` are delivered to the
/// `on_error` handler and never end a listener. `Io` ends a listener.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    /// An inbound line could not be decoded.
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// The message handler returned an error.
    #[error("Message handler failed: {0}")]
    Callback(#[source] BoxError),

    /// The message handler panicked.
    #[error("Message handler panicked: {0}")]
    CallbackPanicked(String),

    /// The peer process wrote to its stderr.
    #[error("Peer error: {0}")]
    Peer(String),

    /// Reading or writing a stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The output stream was closed with [`MessageSender::close`](crate::bridge::MessageSender::close).
    #[error("Output stream closed")]
    Closed,

    /// The listener already owns the input stream.
    #[error("Listener already started")]
    AlreadyStarted,

    /// The listener has stopped; a new bridge is required.
    #[error("Listener stopped")]
    ListenerStopped,

    /// The input stream is owned by a running listener.
    #[error("Input stream is owned by the listener")]
    ListenerActive,
}
