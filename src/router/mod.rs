//! Gateway router.
//!
//! ## Module Structure
//!
//! - `draft`: message bodies rendered once their attachments are re-hosted
//! - `formatter`: nick decoration and per-target clamping
//! - `orchestrator`: the [`Router`] itself
//! - `outbox`: per-target send paths with retry and timeout
//! - `relay`: relay records for loop prevention and edit correlation

pub mod draft;
pub mod formatter;
pub mod orchestrator;
pub mod outbox;
pub mod relay;

pub use orchestrator::{Router, RouterSettings};
