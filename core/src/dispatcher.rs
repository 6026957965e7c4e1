//! The dispatcher: owns the command registry, the middleware chain and the
//! plugin loader, and turns argv into an executed command.

use std::{future::Future, sync::Arc};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use plugin_api::PluginMetadata;
use tokio::sync::watch;
use tracing::debug;

use crate::{
    command::{Args, Command, Middleware},
    commands,
    error::StegaError,
    flags::parse_flags,
    help,
    loader::{self, LoaderOptions, Plugin, PluginLoader, StaticRegistry},
    output::Output,
    registry::CommandRegistry,
};

/// How many times `run_command` may re-enter itself through command actions
/// such as `batch` or a manifest `invoke`.
pub const MAX_DISPATCH_DEPTH: usize = 16;

tokio::task_local! {
    static DISPATCH_DEPTH: usize;
}

/// Handle to the CLI core. Cloning is cheap; all clones share state.
#[derive(Clone)]
pub struct Cli {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Mutex<CommandRegistry>,
    middleware: Mutex<Vec<Middleware>>,
    plugins: PluginLoader,
    output: Output,
    ready: watch::Sender<bool>,
}

/// Builder for [`Cli`].
pub struct CliBuilder {
    options: LoaderOptions,
    registry: StaticRegistry,
    output: Output,
    builtins: bool,
}

impl CliBuilder {
    pub fn loader_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the registry that `jsr:` specifiers resolve against.
    pub fn plugin_registry(mut self, registry: StaticRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    /// Skip registering the built-in `batch` and `plugin` commands.
    pub fn without_builtins(mut self) -> Self {
        self.builtins = false;
        self
    }

    pub fn build(self) -> Cli {
        let (ready, _) = watch::channel(false);
        let cli = Cli {
            inner: Arc::new(Inner {
                registry: Mutex::new(CommandRegistry::new()),
                middleware: Mutex::new(Vec::new()),
                plugins: PluginLoader::new(self.options, self.registry),
                output: self.output,
                ready,
            }),
        };
        if self.builtins {
            commands::register_builtins(&cli);
        }
        cli
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self::new()
    }
}

impl Cli {
    /// A CLI writing to stdout, with built-in commands and default loader
    /// options.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CliBuilder {
        CliBuilder {
            options: LoaderOptions::default(),
            registry: StaticRegistry::with_builtins(),
            output: Output::stdout(),
            builtins: true,
        }
    }

    pub fn register(&self, command: Command) {
        let command = Arc::new(command);
        loader::record_registration(&command);
        self.inner.registry.lock().register(command);
    }

    pub fn remove(&self, name: &str) -> bool {
        self.inner.registry.lock().remove(name)
    }

    pub(crate) fn remove_exact(&self, command: &Arc<Command>) -> bool {
        self.inner.registry.lock().remove_exact(command)
    }

    pub fn find_command(&self, name: &str) -> Option<Arc<Command>> {
        self.inner.registry.lock().find_command(name)
    }

    pub fn commands(&self) -> Vec<Arc<Command>> {
        self.inner.registry.lock().commands()
    }

    /// Append a middleware. Middleware run sequentially, in registration
    /// order, before the resolved command's action; an error aborts the run.
    pub fn use_middleware<F, Fut>(&self, f: F)
    where
        F: Fn(Args, Arc<Command>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mw: Middleware = Arc::new(move |args, cmd| Box::pin(f(args, cmd)));
        self.inner.middleware.lock().push(mw);
    }

    pub fn output(&self) -> &Output {
        &self.inner.output
    }

    pub fn plugins(&self) -> &PluginLoader {
        &self.inner.plugins
    }

    /// Signal that asynchronous setup, typically plugin registration, is done.
    pub fn mark_as_ready(&self) {
        self.inner.ready.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    /// Wait until [`Cli::mark_as_ready`] has been called.
    pub async fn ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        // the sender lives as long as `self`, so this cannot close early
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn help_text(&self) -> String {
        help::general_help(&self.commands())
    }

    pub fn print_help(&self) {
        self.inner.output.write_line(&self.help_text());
    }

    /// Parse the process arguments and execute the resolved command.
    pub async fn run(&self) -> Result<()> {
        let argv: Vec<String> = std::env::args().skip(1).collect();
        self.run_command(argv).await
    }

    /// Parse `argv` and execute the resolved command.
    ///
    /// On any failure general help is printed before the error is returned.
    /// Nested calls made from inside a command leave that to the outermost
    /// call and fail once [`MAX_DISPATCH_DEPTH`] is reached.
    pub async fn run_command<I, S>(&self, argv: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        let first = match argv.first() {
            None => {
                self.print_help();
                return Ok(());
            }
            Some(first) => first.as_str(),
        };
        if first == "help" {
            self.print_help_for(&argv[1..]);
            return Ok(());
        }

        let depth = DISPATCH_DEPTH.try_with(|d| *d).unwrap_or(0);
        if depth >= MAX_DISPATCH_DEPTH {
            return Err(StegaError::NestingTooDeep(MAX_DISPATCH_DEPTH).into());
        }
        let result = DISPATCH_DEPTH.scope(depth + 1, self.dispatch(&argv)).await;
        if result.is_err() && depth == 0 {
            self.print_help();
        }
        result
    }

    async fn dispatch(&self, argv: &[String]) -> Result<()> {
        let (command, args) = self.resolve(argv)?;
        if !command.has_action() {
            self.inner
                .output
                .write_line(&help::command_help(&args.command, &command));
            return Ok(());
        }

        debug!(command = %args.command.join(" "), "dispatching");
        let middleware = self.inner.middleware.lock().clone();
        for mw in middleware {
            mw(args.clone(), command.clone()).await?;
        }
        command.invoke(args).await
    }

    fn resolve(&self, argv: &[String]) -> Result<(Arc<Command>, Args), StegaError> {
        let name = &argv[0];
        let mut current = self
            .find_command(name)
            .ok_or_else(|| StegaError::CommandNotFound(name.clone()))?;
        let mut path = vec![current.name.clone()];

        let mut rest = &argv[1..];
        while let Some(token) = rest.first() {
            if token.starts_with('-') || current.subcommands.is_empty() {
                break;
            }
            let sub = current
                .find_subcommand(token)
                .cloned()
                .ok_or_else(|| StegaError::SubcommandNotFound(token.clone()))?;
            path.push(sub.name.clone());
            current = Arc::new(sub);
            rest = &rest[1..];
        }

        let parsed = parse_flags(&current.options, rest)?;
        let args = Args {
            command: path,
            flags: parsed.flags,
            positionals: parsed.positionals,
            cli: self.clone(),
        };
        Ok((current, args))
    }

    fn print_help_for(&self, path: &[String]) {
        let Some(root) = path.first().and_then(|name| self.find_command(name)) else {
            self.print_help();
            return;
        };
        let mut current: &Command = &root;
        let mut resolved = vec![root.name.clone()];
        for token in &path[1..] {
            match current.find_subcommand(token) {
                Some(sub) => {
                    resolved.push(sub.name.clone());
                    current = sub;
                }
                None => break,
            }
        }
        self.inner
            .output
            .write_line(&help::command_help(&resolved, current));
    }

    /// Load a single plugin from a local path, `jsr:` specifier or URL.
    pub async fn load_plugin(&self, source: &str) -> Result<()> {
        self.inner.plugins.load_plugin(source, self).await
    }

    /// Load plugins in order, stopping at the first failure.
    pub async fn load_plugins<S: AsRef<str>>(&self, sources: &[S]) -> Result<()> {
        for source in sources {
            self.load_plugin(source.as_ref()).await?;
        }
        Ok(())
    }

    pub async fn unload_plugin(&self, name: &str) -> Result<()> {
        self.inner.plugins.unload_plugin(name, self).await
    }

    pub fn loaded_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.inner.plugins.get_loaded_plugins()
    }

    pub fn list_plugins(&self) -> Vec<PluginMetadata> {
        self.inner.plugins.list_plugins()
    }

    /// Wait for a loaded plugin's `init` to finish.
    pub async fn wait_for_plugin(&self, name: &str) -> Result<()> {
        self.inner
            .plugins
            .wait_for(name)
            .await
            .with_context(|| format!("waiting for plugin {name}"))
    }
}
