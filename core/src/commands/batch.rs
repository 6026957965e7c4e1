use anyhow::Result;
use futures::future::join_all;
use plugin_api::OptionSpec;
use tracing::info;

use crate::{
    command::{Args, Command},
    dispatcher::Cli,
};

/// `batch --commands=<a,b> [--parallel]`: run several command lines.
pub fn batch_command() -> Command {
    Command::new("batch")
        .description("Run several commands, sequentially or in parallel")
        .option(
            OptionSpec::array("commands")
                .alias("c")
                .required()
                .description("Comma separated command lines"),
        )
        .option(
            OptionSpec::boolean("parallel")
                .alias("p")
                .default_value(false)
                .description("Run all commands concurrently"),
        )
        .action(run_batch)
}

/// Split one batch entry into argv on whitespace.
pub fn split_entry(entry: &str) -> Vec<String> {
    entry.split_whitespace().map(str::to_string).collect()
}

async fn run_batch(args: Args) -> Result<()> {
    let entries: Vec<Vec<String>> = args
        .array("commands")
        .unwrap_or_default()
        .iter()
        .map(|entry| split_entry(entry))
        .filter(|argv| !argv.is_empty())
        .collect();

    if args.bool("parallel") {
        run_parallel(&args.cli, entries).await
    } else {
        run_sequential(&args.cli, entries).await
    }
}

async fn run_parallel(cli: &Cli, entries: Vec<Vec<String>>) -> Result<()> {
    info!("Executing {} command(s) in parallel", entries.len());
    let results = join_all(entries.into_iter().map(|argv| cli.run_command(argv))).await;
    results.into_iter().collect()
}

async fn run_sequential(cli: &Cli, entries: Vec<Vec<String>>) -> Result<()> {
    info!("Executing {} command(s) sequentially", entries.len());
    for argv in entries {
        cli.run_command(argv).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_split_on_whitespace() {
        assert_eq!(split_entry("  greet  --name  Ada "), ["greet", "--name", "Ada"]);
        assert!(split_entry("   ").is_empty());
    }
}
