//! Command definitions and the arguments handed to their actions.

use std::{collections::BTreeMap, fmt, future::Future, sync::Arc};

use futures::future::BoxFuture;
use plugin_api::{CommandSpec, FlagValue, OptionSpec};

use crate::dispatcher::Cli;

/// Future returned by actions and middleware.
pub type ActionFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Handler invoked when a command is dispatched.
pub type Action = Arc<dyn Fn(Args) -> ActionFuture + Send + Sync>;

/// Hook run before every dispatched command, in registration order.
pub type Middleware = Arc<dyn Fn(Args, Arc<Command>) -> ActionFuture + Send + Sync>;

/// A named, invocable unit. A command may carry an action, subcommands, or
/// both.
#[derive(Clone)]
pub struct Command {
    pub name: String,
    pub description: Option<String>,
    pub options: Vec<OptionSpec>,
    pub subcommands: Vec<Command>,
    action: Option<Action>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            options: Vec::new(),
            subcommands: Vec::new(),
            action: None,
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn option(mut self, option: OptionSpec) -> Self {
        self.options.push(option);
        self
    }

    pub fn subcommand(mut self, command: Command) -> Self {
        self.subcommands.push(command);
        self
    }

    /// Attach the handler run when this command is dispatched.
    pub fn action<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.action = Some(Arc::new(move |args| Box::pin(f(args))));
        self
    }

    /// Attach an already boxed handler.
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn has_action(&self) -> bool {
        self.action.is_some()
    }

    pub fn find_subcommand(&self, name: &str) -> Option<&Command> {
        self.subcommands.iter().find(|c| c.name == name)
    }

    /// Run the action, if any. Commands without one succeed without effect.
    pub async fn invoke(&self, args: Args) -> anyhow::Result<()> {
        match &self.action {
            Some(action) => action(args).await,
            None => Ok(()),
        }
    }

    /// Build an action-less command tree from a wire description.
    pub fn from_spec(spec: &CommandSpec) -> Self {
        Self {
            name: spec.name.clone(),
            description: spec.description.clone(),
            options: spec.options.clone(),
            subcommands: spec.subcommands.iter().map(Command::from_spec).collect(),
            action: None,
        }
    }

    pub fn to_spec(&self) -> CommandSpec {
        CommandSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            options: self.options.clone(),
            subcommands: self.subcommands.iter().map(Command::to_spec).collect(),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("options", &self.options)
            .field("subcommands", &self.subcommands)
            .field("action", &self.action.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// A parsed invocation passed to a command's action.
#[derive(Clone)]
pub struct Args {
    /// Resolved command path, e.g. `["parent", "child"]`.
    pub command: Vec<String>,
    /// Converted flag values, defaults included.
    pub flags: BTreeMap<String, FlagValue>,
    /// Non-flag tokens left after command resolution.
    pub positionals: Vec<String>,
    pub cli: Cli,
}

impl Args {
    pub fn flag(&self, name: &str) -> Option<&FlagValue> {
        self.flags.get(name)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.flag(name).and_then(FlagValue::as_str)
    }

    /// Boolean flag value; absent or non-boolean flags read as false.
    pub fn bool(&self, name: &str) -> bool {
        self.flag(name).and_then(FlagValue::as_bool).unwrap_or(false)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.flag(name).and_then(FlagValue::as_f64)
    }

    pub fn array(&self, name: &str) -> Option<&[String]> {
        self.flag(name).and_then(FlagValue::as_array)
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("command", &self.command)
            .field("flags", &self.flags)
            .field("positionals", &self.positionals)
            .finish_non_exhaustive()
    }
}
