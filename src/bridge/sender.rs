//! Outbound half of a bridge.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::codec;
use crate::error::BridgeError;

/// Writes encoded messages to the output stream.
///
/// Cloning is cheap; all clones share the same stream, and each line is
/// written and flushed under a lock so lines never interleave.
pub struct MessageSender<W> {
    writer: Arc<Mutex<Option<W>>>,
    logging: bool,
}

impl<W> Clone for MessageSender<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            logging: self.logging,
        }
    }
}

impl<W> fmt::Debug for MessageSender<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSender")
            .field("logging", &self.logging)
            .finish_non_exhaustive()
    }
}

impl<W> MessageSender<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap an output stream.
    #[must_use]
    pub fn new(writer: W, logging: bool) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Some(writer))),
            logging,
        }
    }

    /// Whether sent messages are traced.
    #[must_use]
    pub fn logging(&self) -> bool {
        self.logging
    }

    /// Encode a message and write it as one flushed line.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Closed`] after [`close`](Self::close), or
    /// [`BridgeError::Io`] if the write or flush fails.
    pub async fn send(&self, message: &str) -> Result<(), BridgeError> {
        let mut line = codec::encode_message(message);
        line.push('\n');

        {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(BridgeError::Closed)?;
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }

        if self.logging {
            tracing::info!(message = %message, "Sent message");
        }
        Ok(())
    }

    /// Shut down and release the output stream.
    ///
    /// The peer sees end of stream. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Io`] if shutting the stream down fails.
    pub async fn close(&self) -> Result<(), BridgeError> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.shutdown().await?;
            tracing::debug!("Output stream closed");
        }
        Ok(())
    }

    /// Whether [`close`](Self::close) has been called.
    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}
