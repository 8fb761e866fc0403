//! Background listener task.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::handlers::BridgeHandlers;
use super::state::{ListenerState, ListenerStatus};
use super::{decode_inbound, BridgeOptions};

/// Handle to a running listener.
///
/// Dropping the handle does not stop the listener; it keeps running until
/// end of stream. Use [`stop`](Self::stop) for a deterministic shutdown.
#[derive(Debug)]
pub struct ListenerHandle {
    cancel: CancellationToken,
    status: ListenerStatus,
    join: JoinHandle<()>,
}

impl ListenerHandle {
    /// Ask the listener to stop after its current read or dispatch.
    ///
    /// `on_close` still runs.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token that stops the listener when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current listener state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        self.status.get()
    }

    /// Whether the listener task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the listener task to exit.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::warn!(error = %e, "Listener task failed");
        }
    }
}

pub(crate) struct Listener<R> {
    pub(crate) reader: BufReader<R>,
    pub(crate) handlers: BridgeHandlers,
    pub(crate) options: BridgeOptions,
    pub(crate) status: ListenerStatus,
    pub(crate) cancel: CancellationToken,
}

impl<R> Listener<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub(crate) fn spawn(self) -> ListenerHandle {
        let cancel = self.cancel.clone();
        let status = self.status.clone();
        let join = tokio::spawn(self.run());
        ListenerHandle {
            cancel,
            status,
            join,
        }
    }

    async fn run(mut self) {
        self.status.transition(ListenerState::Running);
        let logging = self.options.logging;
        if logging {
            tracing::info!("Listening for incoming messages");
        }

        let mut line = Vec::new();
        loop {
            line.clear();

            // A partially read line is dropped on cancellation; the stream
            // is abandoned at that point anyway.
            let read = tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    tracing::debug!("Listener cancelled");
                    break;
                }

                read = self.reader.read_until(b'\n', &mut line) => read,
            };

            match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    if logging {
                        tracing::warn!(error = %e, "Failed to read from input stream");
                    }
                    break;
                }
            }

            let message = decode_inbound(&line, &self.handlers, self.options).unwrap_or_default();
            if logging {
                tracing::info!(message = %message, "Received message");
            }

            if let Err(err) = self.handlers.dispatch_message(message).await {
                if logging {
                    tracing::warn!(error = %err, "Message handler failed");
                }
                self.handlers.report_error(&err);
            }
        }

        self.status.transition(ListenerState::Stopped);
        self.handlers.notify_close();
        if logging {
            tracing::info!("Listening stopped");
        }
    }
}
