//! The line bridge.
//!
//! A [`LineBridge`] owns one input stream and one output stream. Outbound
//! messages are padded, encoded and written as one flushed line each.
//! Inbound lines are decoded and either pulled with
//! [`LineBridge::read_message`] or pushed to `on_message` by a listener
//! started with [`LineBridge::start`].
//!
//! # Protocol
//!
//! ```text
//! <encoded-line> ::= <int> ("," <int>)* "\n"
//! <message>      ::= " " <text> " "
//! ```
//!
//! # Example
//!
//! ```no_run
//! use line_bridge::{BoxError, BridgeHandlers, BridgeOptions, LineBridge, MessageSender};
//!
//! # async fn example() -> Result<(), line_bridge::BridgeError> {
//! let sender = MessageSender::new(tokio::io::stdout(), true);
//! let reply = sender.clone();
//!
//! let handlers = BridgeHandlers::new().on_message(move |message| {
//!     let reply = reply.clone();
//!     async move {
//!         reply.send(&format!("Echo: {}", message.trim())).await?;
//!         Ok::<(), BoxError>(())
//!     }
//! });
//!
//! let bridge = LineBridge::with_sender(tokio::io::stdin(), sender, handlers, BridgeOptions::default());
//! let listener = bridge.start()?;
//! listener.join().await;
//! # Ok(())
//! # }
//! ```

mod handlers;
mod listener;
mod sender;
mod state;

pub use handlers::{BridgeHandlers, MessageFuture};
pub use listener::ListenerHandle;
pub use sender::MessageSender;
pub use state::{ListenerState, ListenerStatus};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, Stdin, Stdout};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::error::BridgeError;

use listener::Listener;

/// Behavior flags fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Trace sent and received messages and lifecycle events.
    pub logging: bool,
    /// Remove the single space of padding from each side of inbound
    /// messages before delivering them.
    pub strip_padding: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            logging: true,
            strip_padding: false,
        }
    }
}

/// Result of a synchronous read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A line was decoded.
    Message(String),
    /// A line was read but could not be decoded; `on_error` was called.
    DecodeFailure,
    /// The input stream is exhausted.
    EndOfStream,
}

impl ReadOutcome {
    /// The decoded message, if any.
    #[must_use]
    pub fn into_message(self) -> Option<String> {
        match self {
            Self::Message(message) => Some(message),
            Self::DecodeFailure | Self::EndOfStream => None,
        }
    }

    /// Whether the input stream is exhausted.
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }
}

/// Message bridge over an input and an output byte stream.
#[derive(Debug)]
pub struct LineBridge<R, W> {
    reader: Mutex<Option<BufReader<R>>>,
    sender: MessageSender<W>,
    handlers: BridgeHandlers,
    options: BridgeOptions,
    status: ListenerStatus,
}

impl LineBridge<Stdin, Stdout> {
    /// Bridge over the process's own stdin and stdout.
    ///
    /// Diagnostics go through `tracing`; install a subscriber that writes
    /// to stderr so they never mix with the protocol stream.
    #[must_use]
    pub fn stdio(handlers: BridgeHandlers, options: BridgeOptions) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), handlers, options)
    }
}

impl<R, W> LineBridge<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a bridge over the given streams.
    #[must_use]
    pub fn new(reader: R, writer: W, handlers: BridgeHandlers, options: BridgeOptions) -> Self {
        Self::with_sender(
            reader,
            MessageSender::new(writer, options.logging),
            handlers,
            options,
        )
    }

    /// Create a bridge around an existing sender.
    ///
    /// Lets handlers hold a clone of the sender before the bridge exists.
    #[must_use]
    pub fn with_sender(
        reader: R,
        sender: MessageSender<W>,
        handlers: BridgeHandlers,
        options: BridgeOptions,
    ) -> Self {
        Self {
            reader: Mutex::new(Some(BufReader::new(reader))),
            sender,
            handlers,
            options,
            status: ListenerStatus::default(),
        }
    }

    /// A sender sharing this bridge's output stream.
    #[must_use]
    pub fn sender(&self) -> MessageSender<W> {
        self.sender.clone()
    }

    /// Options the bridge was built with.
    #[must_use]
    pub fn options(&self) -> &BridgeOptions {
        &self.options
    }

    /// Current listener state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.status.get()
    }

    /// Shared view of the listener state, readable from handlers.
    #[must_use]
    pub fn status(&self) -> ListenerStatus {
        self.status.clone()
    }

    /// Send one message.
    ///
    /// # Errors
    ///
    /// See [`MessageSender::send`].
    pub async fn send(&self, message: &str) -> Result<(), BridgeError> {
        self.sender.send(message).await
    }

    /// Close the output stream so the peer sees end of stream.
    ///
    /// # Errors
    ///
    /// See [`MessageSender::close`].
    pub async fn close(&self) -> Result<(), BridgeError> {
        self.sender.close().await
    }

    /// Decode one line, reporting failures instead of returning them.
    ///
    /// On failure the error is logged (if logging is enabled), passed to
    /// `on_error`, and an empty message is returned.
    #[must_use]
    pub fn decode_line(&self, line: &str) -> String {
        decode_inbound(line.as_bytes(), &self.handlers, self.options).unwrap_or_default()
    }

    /// Wait for one line and decode it.
    ///
    /// Must not race with a listener; once [`start`](Self::start) has
    /// taken the input stream this returns an error.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ListenerActive`] or
    /// [`BridgeError::ListenerStopped`] if the listener owns the input
    /// stream, and [`BridgeError::Io`] if reading fails.
    pub async fn read_message(&self) -> Result<ReadOutcome, BridgeError> {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(self.detached_reader_error());
        };

        let mut line = Vec::new();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }

        Ok(match decode_inbound(&line, &self.handlers, self.options) {
            Some(message) => ReadOutcome::Message(message),
            None => ReadOutcome::DecodeFailure,
        })
    }

    /// Start the background listener.
    ///
    /// Returns immediately; the listener runs on a spawned task until end
    /// of stream, a read error, or [`ListenerHandle::stop`].
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::AlreadyStarted`] if a listener was already
    /// started, [`BridgeError::ListenerStopped`] if it has finished, and
    /// [`BridgeError::ListenerActive`] while a `read_message` call holds
    /// the input stream.
    pub fn start(&self) -> Result<ListenerHandle, BridgeError> {
        self.start_with_cancellation(CancellationToken::new())
    }

    /// Start the listener, stopping it when `cancel` is cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub fn start_with_cancellation(
        &self,
        cancel: CancellationToken,
    ) -> Result<ListenerHandle, BridgeError> {
        if self.state() == ListenerState::Stopped {
            return Err(BridgeError::ListenerStopped);
        }

        let reader = self
            .reader
            .try_lock()
            .map_err(|_| BridgeError::ListenerActive)?
            .take()
            .ok_or(BridgeError::AlreadyStarted)?;

        let listener = Listener {
            reader,
            handlers: self.handlers.clone(),
            options: self.options,
            status: self.status.clone(),
            cancel,
        };
        Ok(listener.spawn())
    }

    fn detached_reader_error(&self) -> BridgeError {
        match self.state() {
            ListenerState::Stopped => BridgeError::ListenerStopped,
            ListenerState::Idle | ListenerState::Running => BridgeError::ListenerActive,
        }
    }
}

/// Decode an inbound line, reporting any failure to logs and `on_error`.
///
/// Takes raw bytes so a line that is not UTF-8 is a decode failure rather
/// than a stream error.
pub(crate) fn decode_inbound(
    line: &[u8],
    handlers: &BridgeHandlers,
    options: BridgeOptions,
) -> Option<String> {
    match codec::decode_bytes(line) {
        Ok(message) if options.strip_padding => Some(codec::strip_padding(&message).to_string()),
        Ok(message) => Some(message),
        Err(e) => {
            if options.logging {
                let line = String::from_utf8_lossy(line);
                tracing::warn!(line = %line.trim(), error = %e, "Decoding error");
            }
            handlers.report_error(&BridgeError::Decode(e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    type TestBridge = LineBridge<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn bridge_pair(handlers: BridgeHandlers, options: BridgeOptions) -> (TestBridge, DuplexStream) {
        let (local, remote) = tokio::io::duplex(1024);
        let (reader, writer) = tokio::io::split(local);
        (LineBridge::new(reader, writer, handlers, options), remote)
    }

    fn quiet() -> BridgeOptions {
        BridgeOptions {
            logging: false,
            ..BridgeOptions::default()
        }
    }

    #[test]
    fn test_default_options_enable_logging() {
        let options = BridgeOptions::default();
        assert!(options.logging);
        assert!(!options.strip_padding);
    }

    #[test]
    fn test_read_outcome_helpers() {
        assert_eq!(
            ReadOutcome::Message("x".into()).into_message(),
            Some("x".to_string())
        );
        assert_eq!(ReadOutcome::DecodeFailure.into_message(), None);
        assert!(ReadOutcome::EndOfStream.is_end_of_stream());
        assert!(!ReadOutcome::DecodeFailure.is_end_of_stream());
    }

    #[tokio::test]
    async fn test_decode_line_reports_malformed_input_once() {
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let handlers = BridgeHandlers::new().on_error(move |err| {
            assert!(matches!(err, BridgeError::Decode(_)));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (bridge, _remote) = bridge_pair(handlers, quiet());

        assert_eq!(bridge.decode_line("5,a,10"), "");
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decode_line_tolerates_trailing_delimiter() {
        let (bridge, _remote) = bridge_pair(BridgeHandlers::new(), quiet());
        assert_eq!(bridge.decode_line("72,105,"), "Hi");
    }

    #[tokio::test]
    async fn test_decode_line_strips_padding_when_enabled() {
        let options = BridgeOptions {
            logging: false,
            strip_padding: true,
        };
        let (bridge, _remote) = bridge_pair(BridgeHandlers::new(), options);
        assert_eq!(bridge.decode_line(&codec::encode_message("hi")), "hi");
    }

    #[tokio::test]
    async fn test_read_message_distinguishes_outcomes() {
        let (bridge, mut remote) = bridge_pair(BridgeHandlers::new(), quiet());

        remote.write_all(b"32,104,105,32\n5,a,10\n").await.unwrap();
        drop(remote);

        assert_eq!(
            bridge.read_message().await.unwrap(),
            ReadOutcome::Message(" hi ".to_string())
        );
        assert_eq!(
            bridge.read_message().await.unwrap(),
            ReadOutcome::DecodeFailure
        );
        assert_eq!(
            bridge.read_message().await.unwrap(),
            ReadOutcome::EndOfStream
        );
    }

    #[tokio::test]
    async fn test_read_message_reports_invalid_utf8_as_decode_failure() {
        let errors = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&errors);
        let handlers = BridgeHandlers::new().on_error(move |err| {
            assert!(matches!(
                err,
                BridgeError::Decode(codec::DecodeError::InvalidUtf8(_))
            ));
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (bridge, mut remote) = bridge_pair(handlers, quiet());

        remote.write_all(b"72,\xff105\n72,105\n").await.unwrap();
        drop(remote);

        assert_eq!(
            bridge.read_message().await.unwrap(),
            ReadOutcome::DecodeFailure
        );
        assert_eq!(
            bridge.read_message().await.unwrap(),
            ReadOutcome::Message("Hi".to_string())
        );
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_message_after_start_is_rejected() {
        let (bridge, _remote) = bridge_pair(BridgeHandlers::new(), quiet());
        let handle = bridge.start().unwrap();

        assert!(matches!(
            bridge.read_message().await,
            Err(BridgeError::ListenerActive)
        ));

        handle.stop();
        handle.join().await;
        assert!(matches!(
            bridge.read_message().await,
            Err(BridgeError::ListenerStopped)
        ));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (bridge, _remote) = bridge_pair(BridgeHandlers::new(), quiet());
        let handle = bridge.start().unwrap();

        assert!(matches!(bridge.start(), Err(BridgeError::AlreadyStarted)));

        handle.stop();
        handle.join().await;
        assert_eq!(bridge.state(), ListenerState::Stopped);
        assert!(matches!(bridge.start(), Err(BridgeError::ListenerStopped)));
    }

    #[tokio::test]
    async fn test_state_is_idle_before_start() {
        let (bridge, _remote) = bridge_pair(BridgeHandlers::new(), quiet());
        assert_eq!(bridge.state(), ListenerState::Idle);
        assert_eq!(bridge.status().get(), ListenerState::Idle);
    }
}
