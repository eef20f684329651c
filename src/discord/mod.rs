//! Discord bridge built on serenity.

mod bridge;
mod handler;

pub use bridge::DiscordBridge;
