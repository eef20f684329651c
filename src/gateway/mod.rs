//! Gateway routing rules.
//!
//! - `definition`: immutable gateway model and target resolution
//! - `loader`: validation of raw gateway config into a `GatewaySet`

pub mod definition;
pub mod loader;

pub use definition::{Direction, Gateway, GatewayEntry, GatewaySet, Target};
pub use loader::load_gateways;
