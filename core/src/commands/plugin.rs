use anyhow::Result;

use crate::command::{Args, Command};

/// `plugin load|unload|list|available`: manage plugins at runtime.
pub fn plugin_command() -> Command {
    Command::new("plugin")
        .description("Load, unload and inspect plugins")
        .subcommand(
            Command::new("load")
                .description("Load plugins from local paths, jsr: specifiers or URLs")
                .action(load),
        )
        .subcommand(
            Command::new("unload")
                .description("Unload plugins by name")
                .action(unload),
        )
        .subcommand(
            Command::new("list")
                .description("List loaded plugins")
                .action(list),
        )
        .subcommand(
            Command::new("available")
                .description("List plugins known to the built-in registry")
                .action(available),
        )
}

async fn load(args: Args) -> Result<()> {
    if args.positionals.is_empty() {
        anyhow::bail!("usage: plugin load <source>...");
    }
    for source in &args.positionals {
        args.cli.load_plugin(source).await?;
        args.cli.output().write_line(&format!("loaded {source}"));
    }
    Ok(())
}

async fn unload(args: Args) -> Result<()> {
    if args.positionals.is_empty() {
        anyhow::bail!("usage: plugin unload <name>...");
    }
    for name in &args.positionals {
        args.cli.unload_plugin(name).await?;
        args.cli.output().write_line(&format!("unloaded {name}"));
    }
    Ok(())
}

async fn list(args: Args) -> Result<()> {
    let out = args.cli.output();
    let sources = args.cli.plugins().sources();
    if sources.is_empty() {
        out.write_line("no plugins loaded");
        return Ok(());
    }
    for meta in args.cli.list_plugins() {
        let source = sources
            .iter()
            .find(|(name, _)| *name == meta.name)
            .map(|(_, source)| source.as_str())
            .unwrap_or("");
        out.write_line(&format!("{:<15} {:<10} {}", meta.name, meta.version, source));
    }
    Ok(())
}

async fn available(args: Args) -> Result<()> {
    for url in args.cli.plugins().registry().urls() {
        args.cli.output().write_line(&url);
    }
    Ok(())
}
