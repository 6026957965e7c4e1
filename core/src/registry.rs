use std::sync::Arc;

use tracing::debug;

use crate::command::Command;

/// In-memory store of top-level commands, kept in insertion order.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: Vec<Arc<Command>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command. Replaces any existing command with the same name,
    /// keeping its original position.
    pub fn register(&mut self, command: Arc<Command>) {
        match self.commands.iter_mut().find(|c| c.name == command.name) {
            Some(slot) => {
                debug!(command = %command.name, "replacing registered command");
                *slot = command;
            }
            None => self.commands.push(command),
        }
    }

    /// Top-level lookup only; subcommands are resolved by the dispatcher.
    pub fn find_command(&self, name: &str) -> Option<Arc<Command>> {
        self.commands.iter().find(|c| c.name == name).cloned()
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.commands.len();
        self.commands.retain(|c| c.name != name);
        self.commands.len() != before
    }

    /// Remove `command` only if it is still the registered instance for its
    /// name.
    pub fn remove_exact(&mut self, command: &Arc<Command>) -> bool {
        let before = self.commands.len();
        self.commands.retain(|c| !Arc::ptr_eq(c, command));
        self.commands.len() != before
    }

    pub fn commands(&self) -> Vec<Arc<Command>> {
        self.commands.clone()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
