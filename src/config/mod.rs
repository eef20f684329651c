//! Configuration parsing, environment overrides and validation.

pub mod env;
pub mod parser;
pub mod types;
pub mod validate;

use std::path::Path;

use crate::common::ConfigError;

pub use parser::load_config;
pub use types::*;

/// Load a config file, apply environment overrides and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config = env::apply_env_overrides(load_config(path)?);
    validate::validate_config(&config)?;
    Ok(config)
}
