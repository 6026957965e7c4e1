pub mod command;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flags;
pub mod help;
pub mod ipc;
pub mod loader;
pub mod logging;
pub mod opts;
pub mod output;
pub mod plugin_host;
pub mod registry;
pub mod services;

pub use command::{Args, Command};
pub use config::Config;
pub use dispatcher::{Cli, CliBuilder, MAX_DISPATCH_DEPTH};
pub use error::StegaError;
pub use flags::{convert_flag_value, parse_flags, ConversionError};
pub use loader::{LoaderOptions, Plugin, PluginLoader, StaticRegistry};
pub use output::Output;
pub use plugin_api::{CommandSpec, FlagType, FlagValue, OptionSpec, PluginMetadata};

use anyhow::Result;
use std::path::PathBuf;

/// Determine the workspace root by walking up from the current executable
/// until a `Cargo.toml` file is found.
pub fn workspace_root() -> Result<PathBuf> {
    let mut path = std::env::current_exe()?;
    while path.pop() {
        let candidate = path.join("Cargo.toml");
        if candidate.exists() {
            return Ok(path);
        }
    }
    Err(anyhow::anyhow!("failed to determine workspace root"))
}
