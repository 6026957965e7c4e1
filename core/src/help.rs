//! Help text rendering.

use std::{fmt::Write, sync::Arc};

use plugin_api::OptionSpec;

use crate::command::Command;

pub const BIN_NAME: &str = "stega";

/// General help listing every top-level command.
pub fn general_help(commands: &[Arc<Command>]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Usage: {BIN_NAME} <command> [subcommand...] [options]");
    let _ = writeln!(out);
    let _ = writeln!(out, "Available Commands:");
    if commands.is_empty() {
        let _ = writeln!(out, "  (none registered)");
    }
    let width = commands.iter().map(|c| c.name.len()).max().unwrap_or(0);
    for cmd in commands {
        let _ = writeln!(
            out,
            "  {:<width$}  {}",
            cmd.name,
            cmd.description.as_deref().unwrap_or("")
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Run `{BIN_NAME} help <command>` for details on a command.");
    out
}

/// Detailed help for a single command at `path`.
pub fn command_help(path: &[String], command: &Command) -> String {
    let mut out = String::new();
    let suffix = if command.subcommands.is_empty() {
        ""
    } else {
        " <subcommand>"
    };
    let _ = writeln!(out, "Usage: {BIN_NAME} {}{suffix} [options]", path.join(" "));
    if let Some(desc) = &command.description {
        let _ = writeln!(out);
        let _ = writeln!(out, "{desc}");
    }
    if !command.options.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Options:");
        let rows: Vec<(String, String)> = command.options.iter().map(option_row).collect();
        let width = rows.iter().map(|(l, _)| l.len()).max().unwrap_or(0);
        for (left, right) in rows {
            let _ = writeln!(out, "  {left:<width$}  {right}");
        }
    }
    if !command.subcommands.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Subcommands:");
        let width = command
            .subcommands
            .iter()
            .map(|c| c.name.len())
            .max()
            .unwrap_or(0);
        for sub in &command.subcommands {
            let _ = writeln!(
                out,
                "  {:<width$}  {}",
                sub.name,
                sub.description.as_deref().unwrap_or("")
            );
        }
    }
    out
}

fn option_row(opt: &OptionSpec) -> (String, String) {
    let mut left = format!("--{}", opt.name);
    if let Some(alias) = &opt.alias {
        let _ = write!(left, ", -{alias}");
    }
    let _ = write!(left, " <{}>", opt.kind);

    let mut right = opt.description.clone().unwrap_or_default();
    if opt.required {
        right.push_str(" (required)");
    }
    if let Some(default) = &opt.default {
        let _ = write!(right, " [default: {default}]");
    }
    (left, right.trim_start().to_string())
}
