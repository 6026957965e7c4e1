//! Commands every [`Cli`] starts with unless built `without_builtins`.

mod batch;
mod plugin;

use crate::dispatcher::Cli;

pub use batch::{batch_command, split_entry};
pub use plugin::plugin_command;

pub(crate) fn register_builtins(cli: &Cli) {
    cli.register(batch_command());
    cli.register(plugin_command());
}
