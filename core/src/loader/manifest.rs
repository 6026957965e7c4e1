//! `plugin.toml` manifests and the declarative plugins built from them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use plugin_api::{FlagValue, OptionSpec, PluginMetadata, PROTOCOL_VERSION};
use serde::Deserialize;

use super::{
    shape::{validate_shape, ShapeCheck},
    LoadError, Plugin,
};
use crate::{command::Command, dispatcher::Cli};

/// A parsed and shape-checked plugin manifest.
#[derive(Debug, Clone)]
pub struct PluginManifest {
    pub metadata: PluginMetadata,
    pub api_version: Option<String>,
    /// Executable speaking the stdio protocol. Absent for declarative
    /// plugins.
    pub exec: Option<String>,
    pub commands: Vec<ManifestCommand>,
}

#[derive(Debug, Deserialize)]
struct ManifestBody {
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    exec: Option<String>,
    #[serde(default)]
    commands: Vec<ManifestCommand>,
}

/// A command declared in a manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestCommand {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
    #[serde(default)]
    pub subcommands: Vec<ManifestCommand>,
    /// Text printed when run; `{flag}` and `{args}` are substituted.
    #[serde(default)]
    pub echo: Option<String>,
    /// Argv dispatched through the same CLI when run, after substitution.
    #[serde(default)]
    pub invoke: Option<Vec<String>>,
}

impl PluginManifest {
    pub fn parse(text: &str) -> Result<Self, LoadError> {
        let table: toml::Value = toml::from_str(text)
            .map_err(|e| LoadError::InvalidPlugin(format!("manifest is not valid TOML: {e}")))?;
        let value = serde_json::to_value(&table)
            .map_err(|e| LoadError::InvalidPlugin(e.to_string()))?;

        let metadata = match validate_shape(&value) {
            ShapeCheck::Valid(metadata) => metadata,
            ShapeCheck::Invalid { reason } => return Err(LoadError::InvalidPlugin(reason)),
        };
        let body: ManifestBody =
            serde_json::from_value(value).map_err(|e| LoadError::InvalidPlugin(e.to_string()))?;
        if let Some(api) = body.api_version.as_deref() {
            if api != PROTOCOL_VERSION {
                return Err(LoadError::InvalidPlugin(format!(
                    "unsupported api_version {api}, expected {PROTOCOL_VERSION}"
                )));
            }
        }

        Ok(Self {
            metadata,
            api_version: body.api_version,
            exec: body.exec,
            commands: body.commands,
        })
    }
}

impl ManifestCommand {
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.name);
        cmd.description = self.description.clone();
        cmd.options = self.options.clone();
        cmd.subcommands = self.subcommands.iter().map(Self::to_command).collect();
        if self.echo.is_none() && self.invoke.is_none() {
            return cmd;
        }

        let echo = self.echo.clone();
        let invoke = self.invoke.clone();
        cmd.action(move |args| {
            let echo = echo.clone();
            let invoke = invoke.clone();
            async move {
                if let Some(template) = echo {
                    let text = render_template(&template, &args.flags, &args.positionals);
                    args.cli.output().write_line(&text);
                }
                if let Some(argv) = invoke {
                    let argv: Vec<String> = argv
                        .iter()
                        .map(|a| render_template(a, &args.flags, &args.positionals))
                        .collect();
                    args.cli.run_command(argv).await?;
                }
                Ok(())
            }
        })
    }
}

/// Substitute `{name}` with the flag's value and `{args}` with the
/// space-joined positionals. Unknown keys render empty.
pub fn render_template(
    template: &str,
    flags: &BTreeMap<String, FlagValue>,
    positionals: &[String],
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        if key == "args" {
            out.push_str(&positionals.join(" "));
        } else if let Some(value) = flags.get(key) {
            out.push_str(&value.to_string());
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// A plugin whose commands are fully described by its manifest.
pub struct ManifestPlugin {
    manifest: PluginManifest,
}

impl ManifestPlugin {
    pub fn new(manifest: PluginManifest) -> Self {
        Self { manifest }
    }
}

#[async_trait]
impl Plugin for ManifestPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.manifest.metadata
    }

    async fn init(&self, cli: &Cli) -> anyhow::Result<()> {
        for cmd in &self.manifest.commands {
            cli.register(cmd.to_command());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
name = "deploy"
version = "1.0.0"
description = "Deployment helpers"
dependencies = ["echo"]

[[commands]]
name = "ship"
description = "Ship it"
echo = "shipping {target} ({args})"

[[commands.options]]
name = "target"
alias = "t"
type = "string"
required = true

[[commands.subcommands]]
name = "dry"
invoke = ["echo", "dry", "{target}"]
"#;

    #[test]
    fn parses_declarative_manifest() {
        let manifest = PluginManifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.metadata.name, "deploy");
        assert_eq!(manifest.metadata.dependencies, vec!["echo".to_string()]);
        assert!(manifest.exec.is_none());
        let cmd = manifest.commands[0].to_command();
        assert!(cmd.has_action());
        assert_eq!(cmd.options[0].alias.as_deref(), Some("t"));
        assert!(cmd.find_subcommand("dry").unwrap().has_action());
    }

    #[test]
    fn missing_version_is_invalid() {
        let err = PluginManifest::parse("name = \"x\"\n").unwrap_err();
        assert_eq!(err.to_string(), "invalid plugin: missing metadata.version");
    }

    #[test]
    fn wrong_api_version_is_invalid() {
        let err = PluginManifest::parse("name = \"x\"\nversion = \"1\"\napi_version = \"9\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("unsupported api_version 9"));
    }

    #[test]
    fn templates_substitute_flags_and_args() {
        let mut flags = BTreeMap::new();
        flags.insert("target".to_string(), FlagValue::from("prod"));
        flags.insert("force".to_string(), FlagValue::Bool(true));
        let positionals = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            render_template("to {target} force={force} [{args}] {nope}.", &flags, &positionals),
            "to prod force=true [a b] ."
        );
        assert_eq!(render_template("open {brace", &flags, &[]), "open {brace");
    }
}
