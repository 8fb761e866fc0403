//! Line Bridge - newline-delimited numeric message bridge over process stdio.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod display;
pub mod error;
pub mod process;

pub use bridge::{
    BridgeHandlers, BridgeOptions, LineBridge, ListenerHandle, ListenerState, ListenerStatus,
    MessageSender, ReadOutcome,
};
pub use codec::DecodeError;
pub use error::{BoxError, BridgeError};
pub use process::{ChildBridge, ChildCommand, SpawnError};
