//! The static in-process registry behind `jsr:` specifiers and the plugins
//! shipped with the binary.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use plugin_api::{OptionSpec, PluginMetadata};

use super::{source::registry_url, Plugin};
use crate::{command::Command, dispatcher::Cli};

/// Builds a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Arc<dyn Plugin> + Send + Sync>;

/// Specifier to factory map consulted for registry sources.
#[derive(Clone, Default)]
pub struct StaticRegistry {
    entries: BTreeMap<String, PluginFactory>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `@stega/echo` and `@stega/env`.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register("jsr:@stega/echo", || -> Arc<dyn Plugin> { Arc::new(EchoPlugin::new()) });
        reg.register("jsr:@stega/env", || -> Arc<dyn Plugin> { Arc::new(EnvPlugin::new()) });
        reg
    }

    /// Register a factory. `specifier` may be `jsr:@scope/name`,
    /// `@scope/name` or a registry URL.
    pub fn register<F>(&mut self, specifier: &str, factory: F)
    where
        F: Fn() -> Arc<dyn Plugin> + Send + Sync + 'static,
    {
        self.entries
            .insert(registry_url(specifier), Arc::new(factory));
    }

    pub fn instantiate(&self, url: &str) -> Option<Arc<dyn Plugin>> {
        self.entries.get(url).map(|factory| factory())
    }

    pub fn urls(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

impl fmt::Debug for StaticRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

fn builtin_metadata(name: &str, description: &str) -> PluginMetadata {
    PluginMetadata {
        name: name.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        description: Some(description.to_string()),
        dependencies: Vec::new(),
    }
}

/// Registers `echo`, which prints its positional arguments.
pub struct EchoPlugin {
    metadata: PluginMetadata,
}

impl EchoPlugin {
    pub fn new() -> Self {
        Self {
            metadata: builtin_metadata("echo", "Print arguments back"),
        }
    }
}

impl Default for EchoPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for EchoPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn init(&self, cli: &Cli) -> anyhow::Result<()> {
        cli.register(
            Command::new("echo")
                .description("Print the given words")
                .option(
                    OptionSpec::boolean("upper")
                        .alias("u")
                        .default_value(false)
                        .description("Uppercase the output"),
                )
                .action(|args| async move {
                    let text = args.positionals.join(" ");
                    let text = if args.bool("upper") {
                        text.to_uppercase()
                    } else {
                        text
                    };
                    args.cli.output().write_line(&text);
                    Ok(())
                }),
        );
        Ok(())
    }

    async fn unload(&self, cli: &Cli) -> anyhow::Result<()> {
        cli.remove("echo");
        Ok(())
    }
}

/// Registers `env`, which prints environment variables.
pub struct EnvPlugin {
    metadata: PluginMetadata,
}

impl EnvPlugin {
    pub fn new() -> Self {
        Self {
            metadata: builtin_metadata("env", "Inspect environment variables"),
        }
    }
}

impl Default for EnvPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for EnvPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn init(&self, cli: &Cli) -> anyhow::Result<()> {
        cli.register(
            Command::new("env")
                .description("Print one or all environment variables")
                .option(
                    OptionSpec::string("name")
                        .alias("n")
                        .description("Variable to print"),
                )
                .action(|args| async move {
                    let out = args.cli.output();
                    match args.string("name") {
                        Some(name) => match std::env::var(name) {
                            Ok(value) => out.write_line(&format!("{name}={value}")),
                            Err(_) => out.write_line(&format!("{name} is not set")),
                        },
                        None => {
                            let mut vars: Vec<(String, String)> = std::env::vars().collect();
                            vars.sort();
                            for (k, v) in vars {
                                out.write_line(&format!("{k}={v}"));
                            }
                        }
                    }
                    Ok(())
                }),
        );
        Ok(())
    }
}
