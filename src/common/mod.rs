//! Common utilities and types shared across the application.

pub mod error;
pub mod reconnect;
pub mod types;

pub use error::{
    BridgeError, BridgeResult, CacheError, CacheResult, ConfigError, HostError,
    StartError,
};
pub use reconnect::{ReconnectConfig, RetryPolicy};
pub use types::{Account, Attachment, ChannelRef, EventKind, InboundEvent, OutboundMessage};
