use clap::Parser;
use std::path::PathBuf;

/// Command line options of the `stega` binary. Everything after the
/// global options is handed to the dispatcher untouched.
#[derive(Parser, Debug, Default)]
#[command(name = "stega", author, version, about)]
pub struct Opts {
    /// Path to the configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Directory, under the base directory, local plugins may load from.
    #[arg(long)]
    pub plugins_dir: Option<PathBuf>,
    /// Start without autoloading any plugins.
    #[arg(long)]
    pub safe_mode: bool,
    /// Log level or filter directive, e.g. `debug` or `stega=trace`.
    #[arg(long)]
    pub log_level: Option<String>,
    /// Command line to dispatch.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
