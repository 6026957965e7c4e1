//! Structural validation of plugin descriptions.

use std::collections::HashSet;

use plugin_api::PluginMetadata;
use serde_json::Value;

/// Outcome of checking a plugin description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeCheck {
    Valid(PluginMetadata),
    Invalid { reason: String },
}

impl ShapeCheck {
    fn invalid(reason: impl Into<String>) -> Self {
        ShapeCheck::Invalid {
            reason: reason.into(),
        }
    }
}

/// Check a plugin description: `name` and `version` must be non-empty
/// strings, `description` a string and `dependencies` a list of strings when
/// present. When a `commands` list is present every entry needs a unique,
/// non-empty `name`, recursively through `subcommands`.
pub fn validate_shape(value: &Value) -> ShapeCheck {
    let Some(obj) = value.as_object() else {
        return ShapeCheck::invalid("plugin description is not a table");
    };

    let name = match obj.get("name") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(_) => return ShapeCheck::invalid("metadata.name must be a non-empty string"),
        None => return ShapeCheck::invalid("missing metadata.name"),
    };
    let version = match obj.get("version") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(_) => return ShapeCheck::invalid("metadata.version must be a non-empty string"),
        None => return ShapeCheck::invalid("missing metadata.version"),
    };
    let description = match obj.get("description") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => return ShapeCheck::invalid("metadata.description must be a string"),
    };
    let dependencies = match obj.get("dependencies") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => {
            let mut deps = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(dep) if !dep.is_empty() => deps.push(dep.to_string()),
                    _ => {
                        return ShapeCheck::invalid(
                            "metadata.dependencies must be a list of plugin names",
                        )
                    }
                }
            }
            deps
        }
        Some(_) => {
            return ShapeCheck::invalid("metadata.dependencies must be a list of plugin names")
        }
    };

    if let Some(commands) = obj.get("commands") {
        if let Err(reason) = check_commands(commands, "commands") {
            return ShapeCheck::Invalid { reason };
        }
    }

    ShapeCheck::Valid(PluginMetadata {
        name,
        version,
        description,
        dependencies,
    })
}

fn check_commands(value: &Value, at: &str) -> Result<(), String> {
    let list = value
        .as_array()
        .ok_or_else(|| format!("{at} must be a list"))?;
    let mut seen = HashSet::new();
    for entry in list {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty() && !n.starts_with('-'))
            .ok_or_else(|| format!("every entry in {at} needs a name"))?;
        if !seen.insert(name) {
            return Err(format!("duplicate command {name:?} in {at}"));
        }
        if let Some(subs) = entry.get("subcommands") {
            check_commands(subs, &format!("{at}.{name}.subcommands"))?;
        }
    }
    Ok(())
}
