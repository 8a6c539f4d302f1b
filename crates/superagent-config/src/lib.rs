//! Configuration system for the Superagent orchestration server.
//!
//! Provides TOML-based configuration with:
//! - Per-role model bindings (`[models]`) in `provider/model` form
//! - Per-provider credentials and endpoints (`[providers.<name>]`)
//! - Tool deadlines, workspace roots, browser and search settings (`[tools]`)
//! - Config file layering (user config dir + project-local overrides)
//! - API key resolution (env var → config file)

pub mod discovery;
pub mod error;
pub mod resolver;
pub mod secrets;
pub mod types;

pub use discovery::{
    LoadedConfig, load_config, load_config_file, load_config_with_options, save_config,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use resolver::{ResolvedFrom, ResolvedModel, ResolvedProvider, resolve_provider, resolve_role_model};
pub use types::*;
