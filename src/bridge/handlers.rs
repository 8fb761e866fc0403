//! Lifecycle handlers supplied by the host.
//!
//! Handlers run on the listener task, not on the caller's task, so they
//! must be `Send + Sync`.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::error::{BoxError, BridgeError};

/// Future returned by a message handler.
pub type MessageFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

type MessageFn = dyn Fn(String) -> MessageFuture + Send + Sync;
type ErrorFn = dyn Fn(&BridgeError) + Send + Sync;
type CloseFn = dyn Fn() + Send + Sync;

/// The optional `on_message`, `on_error` and `on_close` handlers of a bridge.
///
/// # Example
///
/// ```
/// use line_bridge::BridgeHandlers;
///
/// let handlers = BridgeHandlers::new()
///     .on_message(|message| async move {
///         println!("got {message}");
///         Ok(())
///     })
///     .on_error(|err| eprintln!("bridge error: {err}"))
///     .on_close(|| eprintln!("peer closed"));
/// # let _ = handlers;
/// ```
#[derive(Clone, Default)]
pub struct BridgeHandlers {
    on_message: Option<Arc<MessageFn>>,
    on_error: Option<Arc<ErrorFn>>,
    on_close: Option<Arc<CloseFn>>,
}

impl BridgeHandlers {
    /// Create an empty set of handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per inbound line with the decoded message.
    ///
    /// An `Err` or a panic is forwarded to `on_error`; the listener keeps
    /// running.
    #[must_use]
    pub fn on_message<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.on_message = Some(Arc::new(move |message| {
            Box::pin(handler(message)) as MessageFuture
        }));
        self
    }

    /// Called for decode failures, handler failures and peer stderr output.
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&BridgeError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Called exactly once when the listener stops, after its state is
    /// already `Stopped`.
    #[must_use]
    pub fn on_close<F>(mut self, handler: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(handler));
        self
    }

    /// Run the message handler, converting failures and panics into errors.
    pub(crate) async fn dispatch_message(&self, message: String) -> Result<(), BridgeError> {
        let Some(handler) = &self.on_message else {
            return Ok(());
        };

        let future = std::panic::catch_unwind(AssertUnwindSafe(|| handler(message)))
            .map_err(|payload| BridgeError::CallbackPanicked(panic_message(payload.as_ref())))?;

        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BridgeError::Callback(e)),
            Err(payload) => Err(BridgeError::CallbackPanicked(panic_message(
                payload.as_ref(),
            ))),
        }
    }

    pub(crate) fn report_error(&self, err: &BridgeError) {
        if let Some(handler) = &self.on_error {
            handler(err);
        }
    }

    pub(crate) fn notify_close(&self) {
        if let Some(handler) = &self.on_close {
            handler();
        }
    }
}

impl fmt::Debug for BridgeHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeHandlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
