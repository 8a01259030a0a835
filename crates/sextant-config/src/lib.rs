//! Configuration system for Sextant.
//!
//! Provides TOML-based configuration with:
//! - `[knowledge]`, `[checkpoint]`, `[session]`, `[embedding]`, `[logging]` sections
//! - Config file layering (user config dir + project-local `sextant.toml`)
//! - Data directory resolution for relative database paths

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    save_config, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
